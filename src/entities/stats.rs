use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::entities::organization::{Organization, TokenUsage};
use crate::entities::validation::ValidationStatus;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrganizationStats {
    #[serde(default)]
    pub total_count: usize,
    #[serde(default)]
    pub by_type: BTreeMap<String, usize>,
    #[serde(default)]
    pub by_source: BTreeMap<String, usize>,
    #[serde(default)]
    pub available_count: usize,
    #[serde(default)]
    pub unavailable_count: usize,
    #[serde(with = "time::serde::rfc3339")]
    pub last_updated: OffsetDateTime,
}

impl OrganizationStats {
    pub fn from_organizations(organizations: &[Organization]) -> Self {
        let mut by_type = BTreeMap::new();
        let mut by_source = BTreeMap::new();
        for key in ["patient", "family", "support"] {
            by_type.insert(key.to_string(), 0);
        }
        for key in ["auto", "manual"] {
            by_source.insert(key.to_string(), 0);
        }

        let mut available_count = 0;
        for org in organizations {
            *by_type.entry(org.org_type.as_str().to_string()).or_default() += 1;
            *by_source.entry(org.source.as_str().to_string()).or_default() += 1;
            if org.is_available {
                available_count += 1;
            }
        }

        Self {
            total_count: organizations.len(),
            by_type,
            by_source,
            available_count,
            unavailable_count: organizations.len() - available_count,
            last_updated: crate::utils::date::now(),
        }
    }
}

impl Default for OrganizationStats {
    fn default() -> Self {
        Self::from_organizations(&[])
    }
}

/// A candidate URL the pipeline dropped, with the reason.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedCandidate {
    pub url: String,
    pub reason: String,
}

/// Search and pipeline statistics for one disease.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiseaseSearchStats {
    pub disease_id: String,
    pub disease_name: String,
    #[serde(default)]
    pub search_count: u64,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub last_searched: Option<OffsetDateTime>,
    #[serde(default)]
    pub organization_stats: OrganizationStats,

    #[serde(default)]
    pub token_usage: Vec<TokenUsage>,
    #[serde(default)]
    pub search_terms_used: Vec<String>,
    #[serde(default)]
    pub approximate_matches_found: usize,
    #[serde(default)]
    pub verified_organizations: usize,
    #[serde(default)]
    pub human_approved_organizations: usize,
    #[serde(default)]
    pub rejected_organizations: usize,
    #[serde(default)]
    pub skipped_candidates: Vec<SkippedCandidate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run_duration_ms: Option<u64>,
}

impl DiseaseSearchStats {
    pub fn new(disease_id: &str, disease_name: &str) -> Self {
        Self {
            disease_id: disease_id.to_string(),
            disease_name: disease_name.to_string(),
            search_count: 0,
            last_searched: None,
            organization_stats: OrganizationStats::default(),
            token_usage: Vec::new(),
            search_terms_used: Vec::new(),
            approximate_matches_found: 0,
            verified_organizations: 0,
            human_approved_organizations: 0,
            rejected_organizations: 0,
            skipped_candidates: Vec::new(),
            last_run_duration_ms: None,
        }
    }

    /// Recomputes the organization rollups from the current collection.
    pub fn refresh_counts(&mut self, organizations: &[Organization]) {
        self.organization_stats = OrganizationStats::from_organizations(organizations);
        let count = |status: ValidationStatus| {
            organizations
                .iter()
                .filter(|o| o.validation_status == status)
                .count()
        };
        self.verified_organizations = count(ValidationStatus::Verified);
        self.human_approved_organizations = count(ValidationStatus::HumanApproved);
        self.rejected_organizations = count(ValidationStatus::Rejected);
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StatsListResponse {
    pub results: Vec<DiseaseSearchStats>,
    pub total: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::organization::{OrganizationType, Source};

    #[test]
    fn counts_split_by_type_source_and_availability() {
        let mut down = Organization::new("B", "https://b.example.org", OrganizationType::Medical, Source::Manual);
        down.is_available = false;
        let orgs = vec![
            Organization::new("A", "https://a.example.org", OrganizationType::Patient, Source::Auto),
            down,
        ];

        let stats = OrganizationStats::from_organizations(&orgs);
        assert_eq!(stats.total_count, 2);
        assert_eq!(stats.by_type["patient"], 1);
        assert_eq!(stats.by_type["medical"], 1);
        assert_eq!(stats.by_type["family"], 0);
        assert_eq!(stats.by_source["manual"], 1);
        assert_eq!(stats.available_count + stats.unavailable_count, stats.total_count);
    }

    #[test]
    fn refresh_counts_tracks_validation_states() {
        let mut approved = Organization::new("A", "https://a.example.org", OrganizationType::Patient, Source::Auto);
        approved.validation_status = ValidationStatus::HumanApproved;
        let mut verified = Organization::new("B", "https://b.example.org", OrganizationType::Patient, Source::Auto);
        verified.validation_status = ValidationStatus::Verified;

        let mut stats = DiseaseSearchStats::new("NANDO:1", "疾患");
        stats.refresh_counts(&[approved, verified]);
        assert_eq!(stats.human_approved_organizations, 1);
        assert_eq!(stats.verified_organizations, 1);
        assert_eq!(stats.rejected_organizations, 0);
    }
}
