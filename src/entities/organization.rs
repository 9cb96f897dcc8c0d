use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::entities::validation::ValidationStatus;
use crate::error::FinderError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrganizationType {
    Patient,
    Family,
    #[default]
    Support,
    Medical,
    Research,
    Government,
    #[serde(other)]
    Other,
}

impl OrganizationType {
    pub const ALL: [OrganizationType; 7] = [
        Self::Patient,
        Self::Family,
        Self::Support,
        Self::Medical,
        Self::Research,
        Self::Government,
        Self::Other,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Patient => "patient",
            Self::Family => "family",
            Self::Support => "support",
            Self::Medical => "medical",
            Self::Research => "research",
            Self::Government => "government",
            Self::Other => "other",
        }
    }

    /// Maps a free-form label (English key or the Japanese label an LLM
    /// returns) onto a type. Unknown labels become [`OrganizationType::Other`].
    pub fn from_label(label: &str) -> Self {
        let label = label.trim();
        let lower = label.to_ascii_lowercase();
        if let Some(found) = Self::ALL.into_iter().find(|t| t.as_str() == lower) {
            return found;
        }
        match label {
            "患者会" => Self::Patient,
            "家族会" => Self::Family,
            "支援団体" => Self::Support,
            "医療機関" => Self::Medical,
            "研究機関" => Self::Research,
            "政府機関" | "行政機関" => Self::Government,
            _ => Self::Other,
        }
    }
}

impl fmt::Display for OrganizationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrganizationType {
    type Err = FinderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == lower)
            .ok_or_else(|| {
                FinderError::InvalidArgument(format!(
                    "Invalid organization type: {s}. Expected one of: patient, family, support, medical, research, government, other"
                ))
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    #[default]
    Auto,
    Manual,
}

impl Source {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Manual => "manual",
        }
    }
}

/// One probe outcome for a website.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebsiteAvailabilityRecord {
    pub url: String,
    #[serde(with = "time::serde::rfc3339")]
    pub check_date: OffsetDateTime,
    pub is_available: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_time_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
    pub model: String,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

impl TokenUsage {
    pub fn new(model: &str, prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens.saturating_add(completion_tokens),
            model: model.to_string(),
            timestamp: crate::utils::date::now(),
        }
    }
}

/// Minimal organization shape used by presentation code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupportOrganization {
    pub name: String,
    pub url: String,
    #[serde(rename = "type")]
    pub org_type: OrganizationType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

fn default_available() -> bool {
    true
}

/// Stored organization record with provenance, availability and validation state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Organization {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub name: String,
    pub url: String,
    #[serde(rename = "type", default)]
    pub org_type: OrganizationType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default)]
    pub source: Source,
    #[serde(with = "time::serde::rfc3339")]
    pub added_date: OffsetDateTime,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_info: Option<String>,

    #[serde(default, with = "time::serde::rfc3339::option")]
    pub last_checked: Option<OffsetDateTime>,
    #[serde(default = "default_available")]
    pub is_available: bool,
    #[serde(default)]
    pub availability_history: Vec<WebsiteAvailabilityRecord>,

    #[serde(default)]
    pub validation_status: ValidationStatus,
    #[serde(default)]
    pub validation_score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation_notes: Option<String>,
    #[serde(default)]
    pub token_usage: Vec<TokenUsage>,
    #[serde(default)]
    pub human_verified: bool,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub human_verification_date: Option<OffsetDateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub human_verification_notes: Option<String>,
}

impl Organization {
    pub fn new(name: &str, url: &str, org_type: OrganizationType, source: Source) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.trim().to_string(),
            url: url.trim().to_string(),
            org_type,
            description: None,
            source,
            added_date: crate::utils::date::now(),
            notes: None,
            additional_info: None,
            last_checked: None,
            is_available: true,
            availability_history: Vec::new(),
            validation_status: ValidationStatus::Pending,
            validation_score: 0.0,
            validation_notes: None,
            token_usage: Vec::new(),
            human_verified: false,
            human_verification_date: None,
            human_verification_notes: None,
        }
    }

    /// True when `key` is this record's id or its URL.
    pub fn is_identified_by(&self, key: &str) -> bool {
        let key = key.trim();
        self.url == key || Uuid::parse_str(key).is_ok_and(|id| id == self.id)
    }

    /// Appends a probe result and refreshes the summary fields.
    ///
    /// The record's `check_date` is clamped to the last entry so the history
    /// stays ordered even if the wall clock moves backwards.
    pub fn push_availability(&mut self, mut record: WebsiteAvailabilityRecord) {
        let floor = self.availability_history.last().map(|r| r.check_date);
        record.check_date = crate::utils::date::not_before(record.check_date, floor);
        self.is_available = record.is_available;
        self.last_checked = Some(record.check_date);
        self.availability_history.push(record);
    }

    /// Moves the record forward along the validation lifecycle.
    ///
    /// # Errors
    ///
    /// Returns [`FinderError::Conflict`] for a backward or terminal move.
    pub fn advance(&mut self, next: ValidationStatus) -> Result<(), FinderError> {
        self.validation_status = self.validation_status.advance(next)?;
        Ok(())
    }

    /// Applies a human decision to a `verified` record.
    ///
    /// # Errors
    ///
    /// Returns [`FinderError::Conflict`] and leaves the record untouched when
    /// it is not currently `verified`.
    pub fn apply_human_decision(
        &mut self,
        approve: bool,
        notes: Option<String>,
    ) -> Result<(), FinderError> {
        if self.validation_status != ValidationStatus::Verified {
            return Err(FinderError::Conflict(format!(
                "organization '{}' is {}, only verified organizations can be reviewed",
                self.name, self.validation_status
            )));
        }
        let next = if approve {
            ValidationStatus::HumanApproved
        } else {
            ValidationStatus::Rejected
        };
        self.advance(next)?;
        self.human_verified = true;
        self.human_verification_date = Some(crate::utils::date::now());
        self.human_verification_notes = notes.filter(|n| !n.trim().is_empty());
        Ok(())
    }

    pub fn reset_validation(&mut self) {
        self.validation_status = ValidationStatus::reset();
        self.human_verified = false;
        self.human_verification_date = None;
        self.human_verification_notes = None;
    }

    pub fn summary(&self) -> SupportOrganization {
        SupportOrganization {
            name: self.name.clone(),
            url: self.url.clone(),
            org_type: self.org_type,
            description: self.description.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn probe(at: OffsetDateTime, ok: bool) -> WebsiteAvailabilityRecord {
        WebsiteAvailabilityRecord {
            url: "https://example.org".into(),
            check_date: at,
            is_available: ok,
            status_code: Some(if ok { 200 } else { 503 }),
            response_time_ms: Some(12),
            error_message: None,
        }
    }

    #[test]
    fn japanese_labels_map_to_types() {
        assert_eq!(OrganizationType::from_label("患者会"), OrganizationType::Patient);
        assert_eq!(OrganizationType::from_label("家族会"), OrganizationType::Family);
        assert_eq!(OrganizationType::from_label("行政機関"), OrganizationType::Government);
        assert_eq!(OrganizationType::from_label("Medical"), OrganizationType::Medical);
        assert_eq!(OrganizationType::from_label("ブログ"), OrganizationType::Other);
    }

    #[test]
    fn unknown_stored_type_deserializes_as_other() {
        let parsed: OrganizationType = serde_json::from_str("\"charity\"").unwrap();
        assert_eq!(parsed, OrganizationType::Other);
    }

    #[test]
    fn history_append_keeps_prior_entries_and_order() {
        let mut org = Organization::new("会", "https://example.org", OrganizationType::Patient, Source::Auto);
        org.push_availability(probe(datetime!(2025-05-02 00:00 UTC), true));
        org.push_availability(probe(datetime!(2025-05-01 00:00 UTC), false));

        assert_eq!(org.availability_history.len(), 2);
        assert!(org.availability_history[0].is_available);
        assert!(org.availability_history[1].check_date >= org.availability_history[0].check_date);
        assert!(!org.is_available);
        assert_eq!(org.last_checked, Some(org.availability_history[1].check_date));
    }

    #[test]
    fn identified_by_id_or_url() {
        let org = Organization::new("会", "https://example.org/a", OrganizationType::Support, Source::Manual);
        assert!(org.is_identified_by("https://example.org/a"));
        assert!(org.is_identified_by(&org.id.to_string()));
        assert!(!org.is_identified_by("https://example.org/b"));
    }

    #[test]
    fn human_decision_on_extracted_record_conflicts_without_change() {
        let mut org = Organization::new("会", "https://example.org", OrganizationType::Patient, Source::Auto);
        org.validation_status = ValidationStatus::Extracted;

        let err = org
            .apply_human_decision(true, Some("looks fine".into()))
            .expect_err("extracted cannot be approved");
        assert!(matches!(err, FinderError::Conflict(_)));
        assert_eq!(org.validation_status, ValidationStatus::Extracted);
        assert!(!org.human_verified);
        assert!(org.human_verification_notes.is_none());
    }

    #[test]
    fn human_rejection_and_reset() {
        let mut org = Organization::new("会", "https://example.org", OrganizationType::Patient, Source::Auto);
        org.validation_status = ValidationStatus::Verified;
        org.apply_human_decision(false, Some("not a patient group".into()))
            .expect("verified can be rejected");
        assert_eq!(org.validation_status, ValidationStatus::Rejected);
        assert!(org.human_verified);

        org.reset_validation();
        assert_eq!(org.validation_status, ValidationStatus::Pending);
        assert!(!org.human_verified);
        assert!(org.human_verification_date.is_none());
    }

    #[test]
    fn legacy_record_without_id_gets_one() {
        let json = r#"{"name":"会","url":"https://example.org","type":"patient","added_date":"2025-01-01T00:00:00Z"}"#;
        let org: Organization = serde_json::from_str(json).unwrap();
        assert!(!org.id.is_nil());
        assert!(org.is_available);
        assert_eq!(org.validation_status, ValidationStatus::Pending);
        assert_eq!(org.source, Source::Auto);
    }
}
