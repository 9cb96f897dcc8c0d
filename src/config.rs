//! Runtime configuration read from `SUPPORT_FINDER_*` environment variables.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::FinderError;
use crate::sources::llm::ProviderKind;

pub(crate) const DEFAULT_SEARCH_BASE: &str = "https://html.duckduckgo.com/html/";
pub const DEFAULT_MODEL: &str = "mistral:latest";

#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    pub catalog_path: Option<PathBuf>,
    pub search_base: String,
    pub probe_timeout: Duration,
    pub page_timeout: Duration,
    pub llm_timeout: Duration,
    pub probe_concurrency: usize,
    pub llm_concurrency: usize,
    pub match_threshold: f64,
    pub auto_reject_threshold: f64,
    pub max_results_per_disease: usize,
    pub default_provider: ProviderKind,
    pub default_model: String,
}

pub(crate) fn env_value(var: &str) -> Option<String> {
    std::env::var(var)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn env_parse<T>(var: &str, default: T) -> Result<T, FinderError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env_value(var) {
        Some(raw) => raw
            .parse::<T>()
            .map_err(|e| FinderError::Config(format!("{var}={raw}: {e}"))),
        None => Ok(default),
    }
}

fn default_data_dir() -> PathBuf {
    match dirs::data_dir() {
        Some(dir) => dir.join("support-finder"),
        None => std::env::temp_dir().join("support-finder"),
    }
}

impl Config {
    /// Defaults rooted at `data_dir`, ignoring the environment.
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            catalog_path: None,
            search_base: DEFAULT_SEARCH_BASE.to_string(),
            probe_timeout: Duration::from_secs(10),
            page_timeout: Duration::from_secs(15),
            llm_timeout: Duration::from_secs(120),
            probe_concurrency: 8,
            llm_concurrency: 2,
            match_threshold: 0.5,
            auto_reject_threshold: 0.3,
            max_results_per_disease: 10,
            default_provider: ProviderKind::Ollama,
            default_model: DEFAULT_MODEL.to_string(),
        }
    }

    /// Reads configuration from the environment.
    ///
    /// # Errors
    ///
    /// Returns [`FinderError::Config`] when a variable is present but cannot be parsed.
    pub fn from_env() -> Result<Self, FinderError> {
        let data_dir = env_value("SUPPORT_FINDER_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(default_data_dir);
        let mut config = Self::with_data_dir(data_dir);

        config.catalog_path = env_value("SUPPORT_FINDER_CATALOG").map(PathBuf::from);
        if let Some(base) = env_value("SUPPORT_FINDER_SEARCH_BASE") {
            config.search_base = base;
        }
        config.probe_timeout = Duration::from_secs(env_parse("SUPPORT_FINDER_PROBE_TIMEOUT_SECS", 10)?);
        config.page_timeout = Duration::from_secs(env_parse("SUPPORT_FINDER_PAGE_TIMEOUT_SECS", 15)?);
        config.llm_timeout = Duration::from_secs(env_parse("SUPPORT_FINDER_LLM_TIMEOUT_SECS", 120)?);
        config.probe_concurrency = env_parse("SUPPORT_FINDER_PROBE_CONCURRENCY", 8_usize)?.max(1);
        config.llm_concurrency = env_parse("SUPPORT_FINDER_LLM_CONCURRENCY", 2_usize)?.max(1);
        config.match_threshold = env_parse("SUPPORT_FINDER_MATCH_THRESHOLD", 0.5)?;
        config.auto_reject_threshold = env_parse("SUPPORT_FINDER_AUTO_REJECT_THRESHOLD", 0.3)?;
        config.max_results_per_disease = env_parse("SUPPORT_FINDER_MAX_RESULTS", 10_usize)?.max(1);
        if let Some(provider) = env_value("SUPPORT_FINDER_PROVIDER") {
            config.default_provider = provider.parse()?;
        }
        if let Some(model) = env_value("SUPPORT_FINDER_MODEL") {
            config.default_model = model;
        }

        for (name, value) in [
            ("SUPPORT_FINDER_MATCH_THRESHOLD", config.match_threshold),
            ("SUPPORT_FINDER_AUTO_REJECT_THRESHOLD", config.auto_reject_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(FinderError::Config(format!(
                    "{name} must be between 0.0 and 1.0 (got {value})"
                )));
            }
        }

        Ok(config)
    }

    pub fn organizations_dir(&self) -> PathBuf {
        self.data_dir.join("organizations")
    }

    pub fn search_terms_dir(&self) -> PathBuf {
        self.data_dir.join("search_terms")
    }

    pub fn stats_dir(&self) -> PathBuf {
        self.data_dir.join("stats")
    }

    pub fn content_cache_dir(&self) -> PathBuf {
        self.data_dir.join("content_cache")
    }
}
