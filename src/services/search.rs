//! Read paths over the catalog and stored collections. Reads never create rows.

use tracing::debug;

use crate::entities::collection::{CollectionListResponse, OrganizationCollection};
use crate::entities::disease::{DiseaseListResponse, DiseaseWithOrganizations, SearchResponse};
use crate::entities::organization::Organization;
use crate::entities::stats::{DiseaseSearchStats, StatsListResponse};
use crate::error::FinderError;
use crate::services::Services;

impl Services {
    pub fn diseases(&self) -> DiseaseListResponse {
        self.catalog.list_response()
    }

    /// Matches `query` against catalog names and pairs each hit with its organizations.
    ///
    /// # Errors
    ///
    /// Returns [`FinderError::InvalidArgument`] for a blank query.
    pub async fn search(&self, query: &str, include_synonyms: bool) -> Result<SearchResponse, FinderError> {
        let hits = self.catalog.search(query, include_synonyms)?;
        let mut results = Vec::with_capacity(hits.len());
        for disease in hits {
            results.push(DiseaseWithOrganizations {
                organizations: self.stored_organizations(&disease.disease_id).await,
                disease: disease.clone(),
            });
        }
        debug!(query, hits = results.len(), "Catalog search");
        Ok(SearchResponse {
            total: results.len(),
            results,
        })
    }

    async fn stored_organizations(&self, disease_id: &str) -> Vec<Organization> {
        self.store
            .collections
            .get(disease_id)
            .await
            .map(|c| c.organizations)
            .unwrap_or_default()
    }

    pub async fn disease(&self, disease_id: &str) -> Result<DiseaseWithOrganizations, FinderError> {
        let disease = self.catalog.require(disease_id)?.clone();
        Ok(DiseaseWithOrganizations {
            organizations: self.stored_organizations(&disease.disease_id).await,
            disease,
        })
    }

    pub async fn organizations(&self, disease_id: &str) -> Result<Vec<Organization>, FinderError> {
        let disease = self.catalog.require(disease_id)?;
        Ok(self.stored_organizations(&disease.disease_id).await)
    }

    /// Stored collection, or an unsaved empty one for a catalog disease.
    pub async fn collection(&self, disease_id: &str) -> Result<OrganizationCollection, FinderError> {
        if let Some(collection) = self.store.collections.get(disease_id).await {
            return Ok(collection);
        }
        let disease = self.catalog.require(disease_id)?;
        Ok(OrganizationCollection::new(&disease.disease_id, &disease.name_ja))
    }

    pub async fn collections(&self) -> CollectionListResponse {
        let results = self.store.collections.all().await;
        CollectionListResponse {
            total: results.len(),
            results,
        }
    }

    pub async fn all_stats(&self) -> StatsListResponse {
        let results = self.store.stats.all().await;
        StatsListResponse {
            total: results.len(),
            results,
        }
    }

    /// Stored stats, or counts computed from the collection when the disease
    /// has never been searched.
    pub async fn stats(&self, disease_id: &str) -> Result<DiseaseSearchStats, FinderError> {
        if let Some(stats) = self.store.stats.get(disease_id).await {
            return Ok(stats);
        }
        let disease = self.catalog.require(disease_id)?;
        let mut stats = DiseaseSearchStats::new(&disease.disease_id, &disease.name_ja);
        stats.refresh_counts(&self.stored_organizations(&disease.disease_id).await);
        Ok(stats)
    }
}
