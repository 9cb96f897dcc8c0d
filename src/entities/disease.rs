use serde::{Deserialize, Serialize};

use crate::entities::organization::Organization;

/// Catalog record for one designated intractable or childhood chronic disease.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiseaseInfo {
    pub disease_id: String,
    pub name_ja: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name_en: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synonyms_ja: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synonyms_en: Option<Vec<String>>,
    #[serde(default)]
    pub is_intractable: bool,
    #[serde(default)]
    pub is_childhood_chronic: bool,
}

impl DiseaseInfo {
    /// Case-insensitive substring match; `query` must already be lowercased.
    pub fn matches(&self, query: &str, include_synonyms: bool) -> bool {
        let hit = |value: &str| value.to_lowercase().contains(query);

        if hit(&self.name_ja) || self.name_en.as_deref().is_some_and(hit) {
            return true;
        }
        if !include_synonyms {
            return false;
        }
        self.synonyms_ja
            .iter()
            .chain(self.synonyms_en.iter())
            .flatten()
            .any(|synonym| hit(synonym))
    }

    /// Japanese name, falling back to the id for blank catalog rows.
    pub fn display_name(&self) -> &str {
        if self.name_ja.trim().is_empty() {
            self.disease_id.as_str()
        } else {
            self.name_ja.as_str()
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DiseaseWithOrganizations {
    pub disease: DiseaseInfo,
    pub organizations: Vec<Organization>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub results: Vec<DiseaseWithOrganizations>,
    pub total: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct DiseaseListResponse {
    pub results: Vec<DiseaseInfo>,
    pub total: usize,
    pub intractable_count: usize,
    pub childhood_chronic_count: usize,
}

impl DiseaseListResponse {
    pub fn from_diseases(results: Vec<DiseaseInfo>) -> Self {
        let intractable_count = results.iter().filter(|d| d.is_intractable).count();
        let childhood_chronic_count = results.iter().filter(|d| d.is_childhood_chronic).count();
        Self {
            total: results.len(),
            results,
            intractable_count,
            childhood_chronic_count,
        }
    }
}
