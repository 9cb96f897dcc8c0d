use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::entities::disease::DiseaseInfo;
use crate::error::FinderError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    Ja,
    En,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TermType {
    #[default]
    Patient,
    Family,
    Support,
    General,
}

impl TermType {
    /// Query text appended to a term when building web searches.
    pub fn query_suffix(self) -> Option<&'static str> {
        match self {
            Self::Patient => Some("患者会"),
            Self::Family => Some("家族会"),
            Self::Support => Some("支援団体"),
            Self::General => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchTerm {
    pub id: String,
    pub term: String,
    #[serde(default)]
    pub language: Language,
    #[serde(rename = "type", default)]
    pub term_type: TermType,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl SearchTerm {
    pub fn new(term: &str, language: Language, term_type: TermType) -> Self {
        let now = crate::utils::date::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            term: term.trim().to_string(),
            language,
            term_type,
            enabled: true,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn query(&self) -> String {
        match self.term_type.query_suffix() {
            Some(suffix) => format!("{} {suffix}", self.term),
            None => self.term.clone(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_max_token_limit() -> usize {
    16_000
}

/// Per-disease pipeline settings and editable search terms.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchConfig {
    pub disease_id: String,
    #[serde(default)]
    pub search_terms: Vec<SearchTerm>,
    #[serde(default = "default_max_token_limit")]
    pub max_token_limit: usize,
    #[serde(default = "default_true")]
    pub use_approximate_matching: bool,
    #[serde(default = "default_true")]
    pub two_step_validation: bool,
    #[serde(default)]
    pub require_human_verification: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub last_updated: OffsetDateTime,
}

impl SearchConfig {
    pub fn defaults_for(disease: &DiseaseInfo) -> Self {
        let mut search_terms = vec![
            SearchTerm::new(&disease.name_ja, Language::Ja, TermType::Patient),
            SearchTerm::new(&disease.name_ja, Language::Ja, TermType::Family),
            SearchTerm::new(&disease.name_ja, Language::Ja, TermType::Support),
        ];
        if let Some(name_en) = disease.name_en.as_deref().filter(|n| !n.trim().is_empty()) {
            search_terms.push(SearchTerm::new(name_en, Language::En, TermType::Patient));
            search_terms.push(SearchTerm::new(name_en, Language::En, TermType::Support));
        }
        Self {
            disease_id: disease.disease_id.clone(),
            search_terms,
            max_token_limit: default_max_token_limit(),
            use_approximate_matching: true,
            two_step_validation: true,
            require_human_verification: false,
            last_updated: crate::utils::date::now(),
        }
    }

    pub fn apply(&mut self, update: SearchConfigUpdate) {
        if let Some(limit) = update.max_token_limit {
            self.max_token_limit = limit.max(1);
        }
        if let Some(value) = update.use_approximate_matching {
            self.use_approximate_matching = value;
        }
        if let Some(value) = update.two_step_validation {
            self.two_step_validation = value;
        }
        if let Some(value) = update.require_human_verification {
            self.require_human_verification = value;
        }
        self.last_updated = crate::utils::date::now();
    }

    pub fn enabled_terms(&self) -> impl Iterator<Item = &SearchTerm> {
        self.search_terms.iter().filter(|t| t.enabled)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchConfigUpdate {
    #[serde(default)]
    pub max_token_limit: Option<usize>,
    #[serde(default)]
    pub use_approximate_matching: Option<bool>,
    #[serde(default)]
    pub two_step_validation: Option<bool>,
    #[serde(default)]
    pub require_human_verification: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchTermRequest {
    pub term: String,
    #[serde(default)]
    pub language: Language,
    #[serde(rename = "type", default)]
    pub term_type: TermType,
}

impl SearchTermRequest {
    pub fn validate(&self) -> Result<(), FinderError> {
        if self.term.trim().is_empty() {
            return Err(FinderError::InvalidArgument("term must not be empty".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchTermUpdate {
    #[serde(default)]
    pub term: Option<String>,
    #[serde(default)]
    pub language: Option<Language>,
    #[serde(rename = "type", default)]
    pub term_type: Option<TermType>,
    #[serde(default)]
    pub enabled: Option<bool>,
}

impl SearchTerm {
    /// Applies a partial update.
    ///
    /// # Errors
    ///
    /// Returns [`FinderError::InvalidArgument`] for a blank replacement term.
    pub fn apply(&mut self, update: SearchTermUpdate) -> Result<(), FinderError> {
        if let Some(term) = update.term {
            let term = term.trim();
            if term.is_empty() {
                return Err(FinderError::InvalidArgument("term must not be empty".into()));
            }
            self.term = term.to_string();
        }
        if let Some(language) = update.language {
            self.language = language;
        }
        if let Some(term_type) = update.term_type {
            self.term_type = term_type;
        }
        if let Some(enabled) = update.enabled {
            self.enabled = enabled;
        }
        self.updated_at = crate::utils::date::now();
        Ok(())
    }
}
