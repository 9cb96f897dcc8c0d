//! JSON-backed persistence under the data directory.

pub mod content_cache;
pub mod table;

use crate::config::Config;
use crate::entities::collection::OrganizationCollection;
use crate::entities::organization::Organization;
use crate::entities::search_config::SearchConfig;
use crate::entities::stats::DiseaseSearchStats;
use crate::error::FinderError;

pub use content_cache::ContentCache;
pub use table::{JsonTable, Keyed};

impl Keyed for OrganizationCollection {
    fn key(&self) -> &str {
        &self.disease_id
    }
}

impl Keyed for SearchConfig {
    fn key(&self) -> &str {
        &self.disease_id
    }
}

impl Keyed for DiseaseSearchStats {
    fn key(&self) -> &str {
        &self.disease_id
    }
}

#[derive(Debug)]
pub struct Store {
    pub collections: JsonTable<OrganizationCollection>,
    pub search_configs: JsonTable<SearchConfig>,
    pub stats: JsonTable<DiseaseSearchStats>,
    pub content: ContentCache,
}

impl Store {
    /// Opens (and lazily creates) every table under the configured data directory.
    ///
    /// # Errors
    ///
    /// Returns an I/O error when a table directory cannot be listed.
    pub async fn open(config: &Config) -> Result<Self, FinderError> {
        Ok(Self {
            collections: JsonTable::open("organization collection", &config.organizations_dir())
                .await?,
            search_configs: JsonTable::open("search config", &config.search_terms_dir()).await?,
            stats: JsonTable::open("search stats", &config.stats_dir()).await?,
            content: ContentCache::new(config.content_cache_dir()),
        })
    }

    /// Diseases whose collection lists `url`, ordered by disease id.
    pub async fn owners_of(&self, url: &str) -> Vec<OrganizationCollection> {
        self.collections
            .all()
            .await
            .into_iter()
            .filter(|c| c.organizations.iter().any(|o| o.url == url))
            .collect()
    }

    /// Recounts the stored stats row for `disease_id` after its collection
    /// changed. Diseases without a row are left without one.
    ///
    /// # Errors
    ///
    /// Returns an I/O error when the row cannot be saved.
    pub async fn refresh_stats_if_present(
        &self,
        disease_id: &str,
        organizations: &[Organization],
    ) -> Result<(), FinderError> {
        let refreshed = self
            .stats
            .mutate_existing(disease_id, |stats| {
                stats.refresh_counts(organizations);
                Ok(())
            })
            .await;
        match refreshed {
            Ok(()) | Err(FinderError::NotFound { .. }) => Ok(()),
            Err(err) => Err(err),
        }
    }
}
