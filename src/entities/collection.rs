use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::entities::organization::{Organization, OrganizationType, TokenUsage};
use crate::error::FinderError;

/// All organization records and notes kept for one disease.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrganizationCollection {
    pub disease_id: String,
    pub disease_name: String,
    #[serde(default)]
    pub organizations: Vec<Organization>,
    #[serde(default)]
    pub manual_entries: Vec<ManualEntry>,
    #[serde(default)]
    pub token_usage: Vec<TokenUsage>,
    #[serde(with = "time::serde::rfc3339")]
    pub last_updated: OffsetDateTime,
}

impl OrganizationCollection {
    pub fn new(disease_id: &str, disease_name: &str) -> Self {
        Self {
            disease_id: disease_id.to_string(),
            disease_name: disease_name.to_string(),
            organizations: Vec::new(),
            manual_entries: Vec::new(),
            token_usage: Vec::new(),
            last_updated: crate::utils::date::now(),
        }
    }

    pub fn find(&self, key: &str) -> Option<&Organization> {
        self.organizations.iter().find(|o| o.is_identified_by(key))
    }

    pub fn find_mut(&mut self, key: &str) -> Option<&mut Organization> {
        self.organizations.iter_mut().find(|o| o.is_identified_by(key))
    }

    pub fn find_by_url_mut(&mut self, url: &str) -> Option<&mut Organization> {
        self.organizations.iter_mut().find(|o| o.url == url)
    }

    /// Inserts `org`, or merges its descriptive fields into the record
    /// already holding the same URL. Returns the id of the stored record.
    pub fn upsert(&mut self, org: Organization) -> Uuid {
        if let Some(existing) = self.find_by_url_mut(&org.url) {
            existing.name = org.name;
            existing.org_type = org.org_type;
            if org.description.is_some() {
                existing.description = org.description;
            }
            if org.notes.is_some() {
                existing.notes = org.notes;
            }
            if org.additional_info.is_some() {
                existing.additional_info = org.additional_info;
            }
            return existing.id;
        }
        let id = org.id;
        self.organizations.push(org);
        id
    }

    /// Removes the record matching `key` (id or URL).
    ///
    /// # Errors
    ///
    /// Returns [`FinderError::NotFound`] when no record matches.
    pub fn remove(&mut self, key: &str) -> Result<Organization, FinderError> {
        let index = self
            .organizations
            .iter()
            .position(|o| o.is_identified_by(key))
            .ok_or_else(|| FinderError::not_found("organization", key))?;
        Ok(self.organizations.remove(index))
    }

    pub fn touch(&mut self) {
        self.last_updated = crate::utils::date::now();
    }
}

fn default_entry_type() -> String {
    "note".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManualEntry {
    pub id: String,
    pub disease_id: String,
    pub title: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default = "default_entry_type")]
    pub entry_type: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ManualEntryRequest {
    pub disease_id: String,
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_entry_type")]
    pub entry_type: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ManualOrganizationRequest {
    pub disease_id: String,
    pub name: String,
    pub url: String,
    #[serde(rename = "type", default)]
    pub org_type: OrganizationType,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Partial edit of an organization's descriptive fields.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OrganizationUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(rename = "type", default)]
    pub org_type: Option<OrganizationType>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CollectionListResponse {
    pub results: Vec<OrganizationCollection>,
    pub total: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::organization::Source;

    #[test]
    fn upsert_same_url_updates_in_place() {
        let mut collection = OrganizationCollection::new("NANDO:1", "疾患");
        let first = Organization::new("旧名", "https://example.org", OrganizationType::Support, Source::Manual);
        let first_id = collection.upsert(first);

        let mut second = Organization::new("新名", "https://example.org", OrganizationType::Patient, Source::Manual);
        second.description = Some("説明".into());
        let second_id = collection.upsert(second);

        assert_eq!(first_id, second_id);
        assert_eq!(collection.organizations.len(), 1);
        assert_eq!(collection.organizations[0].name, "新名");
        assert_eq!(collection.organizations[0].org_type, OrganizationType::Patient);
        assert_eq!(collection.organizations[0].description.as_deref(), Some("説明"));
    }

    #[test]
    fn remove_only_touches_matching_record() {
        let mut collection = OrganizationCollection::new("NANDO:1", "疾患");
        collection.upsert(Organization::new("A", "https://a.example.org", OrganizationType::Patient, Source::Auto));
        collection.upsert(Organization::new("B", "https://b.example.org", OrganizationType::Family, Source::Manual));

        let removed = collection.remove("https://b.example.org").expect("present");
        assert_eq!(removed.name, "B");
        assert_eq!(collection.organizations.len(), 1);
        assert_eq!(collection.organizations[0].name, "A");

        let err = collection.remove("https://b.example.org").expect_err("already gone");
        assert!(matches!(err, FinderError::NotFound { .. }));
    }

    #[test]
    fn manual_entry_request_defaults_to_note() {
        let req: ManualEntryRequest =
            serde_json::from_str(r#"{"disease_id":"NANDO:1","title":"t","content":"c"}"#).unwrap();
        assert_eq!(req.entry_type, "note");
        assert!(req.url.is_none());
    }
}
