//! Disease catalog: loaded once at startup and read-only afterwards.

use std::collections::HashMap;
use std::path::Path;

use rust_embed::RustEmbed;
use tracing::info;

use crate::entities::disease::{DiseaseInfo, DiseaseListResponse};
use crate::error::FinderError;

#[derive(RustEmbed)]
#[folder = "data/"]
struct EmbeddedCatalog;

const EMBEDDED_CATALOG_FILE: &str = "diseases.json";

#[derive(Debug, Clone, Default)]
pub struct Catalog {
    diseases: Vec<DiseaseInfo>,
    index: HashMap<String, usize>,
}

impl Catalog {
    /// Parses a JSON array of disease records. Later duplicates of an id are dropped.
    ///
    /// # Errors
    ///
    /// Returns [`FinderError::Json`] for malformed input.
    pub fn from_json(bytes: &[u8]) -> Result<Self, FinderError> {
        let parsed: Vec<DiseaseInfo> = serde_json::from_slice(bytes)?;
        Ok(Self::from_diseases(parsed))
    }

    pub fn from_diseases(parsed: Vec<DiseaseInfo>) -> Self {
        let mut diseases = Vec::with_capacity(parsed.len());
        let mut index = HashMap::with_capacity(parsed.len());
        for disease in parsed {
            let id = disease.disease_id.trim().to_string();
            if id.is_empty() || index.contains_key(&id) {
                continue;
            }
            index.insert(id, diseases.len());
            diseases.push(disease);
        }
        Self { diseases, index }
    }

    /// Loads the catalog from `path`, or the bundled sample when `path` is `None`.
    ///
    /// # Errors
    ///
    /// Returns an error when the file cannot be read or parsed.
    pub async fn load(path: Option<&Path>) -> Result<Self, FinderError> {
        let catalog = match path {
            Some(path) => {
                let bytes = tokio::fs::read(path).await?;
                Self::from_json(&bytes)?
            }
            None => {
                let Some(asset) = EmbeddedCatalog::get(EMBEDDED_CATALOG_FILE) else {
                    return Err(FinderError::Config(format!(
                        "embedded catalog {EMBEDDED_CATALOG_FILE} is missing"
                    )));
                };
                Self::from_json(asset.data.as_ref())?
            }
        };
        info!(
            diseases = catalog.len(),
            source = path.map(|p| p.display().to_string()).unwrap_or_else(|| "embedded".into()),
            "Loaded disease catalog"
        );
        Ok(catalog)
    }

    pub fn len(&self) -> usize {
        self.diseases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.diseases.is_empty()
    }

    pub fn all(&self) -> &[DiseaseInfo] {
        &self.diseases
    }

    pub fn get(&self, disease_id: &str) -> Option<&DiseaseInfo> {
        self.index
            .get(disease_id.trim())
            .and_then(|&i| self.diseases.get(i))
    }

    /// Looks up a disease.
    ///
    /// # Errors
    ///
    /// Returns [`FinderError::NotFound`] for an unknown id.
    pub fn require(&self, disease_id: &str) -> Result<&DiseaseInfo, FinderError> {
        self.get(disease_id)
            .ok_or_else(|| FinderError::not_found("disease", disease_id))
    }

    /// Substring search in catalog order.
    ///
    /// # Errors
    ///
    /// Returns [`FinderError::InvalidArgument`] for a blank query.
    pub fn search(
        &self,
        query: &str,
        include_synonyms: bool,
    ) -> Result<Vec<&DiseaseInfo>, FinderError> {
        let query = query.trim().to_lowercase();
        if query.is_empty() {
            return Err(FinderError::InvalidArgument(
                "query must not be empty".into(),
            ));
        }
        Ok(self
            .diseases
            .iter()
            .filter(|d| d.matches(&query, include_synonyms))
            .collect())
    }

    pub fn list_response(&self) -> DiseaseListResponse {
        DiseaseListResponse::from_diseases(self.diseases.clone())
    }
}
