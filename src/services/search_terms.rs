//! Per-disease search-term configuration.

use tracing::info;

use crate::entities::disease::DiseaseInfo;
use crate::entities::search_config::{
    SearchConfig, SearchConfigUpdate, SearchTerm, SearchTermRequest, SearchTermUpdate,
};
use crate::error::FinderError;
use crate::services::Services;
use crate::store::Store;

/// Stored config for `disease`, persisting the defaults on first access.
pub(crate) async fn load_or_init(store: &Store, disease: &DiseaseInfo) -> Result<SearchConfig, FinderError> {
    if let Some(config) = store.search_configs.get(&disease.disease_id).await {
        return Ok(config);
    }
    let config = store
        .search_configs
        .mutate(
            &disease.disease_id,
            || SearchConfig::defaults_for(disease),
            |config| Ok(config.clone()),
        )
        .await?;
    info!(disease_id = %disease.disease_id, terms = config.search_terms.len(), "Created default search config");
    Ok(config)
}

impl Services {
    /// # Errors
    ///
    /// Returns [`FinderError::NotFound`] for a disease missing from the catalog.
    pub async fn search_config(&self, disease_id: &str) -> Result<SearchConfig, FinderError> {
        let disease = self.catalog.require(disease_id)?;
        load_or_init(&self.store, disease).await
    }

    pub async fn update_search_config(
        &self,
        disease_id: &str,
        update: SearchConfigUpdate,
    ) -> Result<SearchConfig, FinderError> {
        let disease = self.catalog.require(disease_id)?;
        self.store
            .search_configs
            .mutate(
                &disease.disease_id,
                || SearchConfig::defaults_for(disease),
                |config| {
                    config.apply(update);
                    Ok(config.clone())
                },
            )
            .await
    }

    /// Appends a term.
    ///
    /// # Errors
    ///
    /// Returns [`FinderError::InvalidArgument`] for a blank term.
    pub async fn add_search_term(
        &self,
        disease_id: &str,
        request: SearchTermRequest,
    ) -> Result<SearchTerm, FinderError> {
        request.validate()?;
        let disease = self.catalog.require(disease_id)?;
        self.store
            .search_configs
            .mutate(
                &disease.disease_id,
                || SearchConfig::defaults_for(disease),
                |config| {
                    let term = SearchTerm::new(&request.term, request.language, request.term_type);
                    config.search_terms.push(term.clone());
                    config.last_updated = crate::utils::date::now();
                    Ok(term)
                },
            )
            .await
    }

    pub async fn update_search_term(
        &self,
        disease_id: &str,
        term_id: &str,
        update: SearchTermUpdate,
    ) -> Result<SearchTerm, FinderError> {
        let disease = self.catalog.require(disease_id)?;
        self.store
            .search_configs
            .mutate(
                &disease.disease_id,
                || SearchConfig::defaults_for(disease),
                |config| {
                    let term = config
                        .search_terms
                        .iter_mut()
                        .find(|t| t.id == term_id)
                        .ok_or_else(|| FinderError::not_found("search term", term_id))?;
                    term.apply(update)?;
                    let term = term.clone();
                    config.last_updated = crate::utils::date::now();
                    Ok(term)
                },
            )
            .await
    }

    pub async fn delete_search_term(&self, disease_id: &str, term_id: &str) -> Result<SearchTerm, FinderError> {
        let disease = self.catalog.require(disease_id)?;
        self.store
            .search_configs
            .mutate(
                &disease.disease_id,
                || SearchConfig::defaults_for(disease),
                |config| {
                    let index = config
                        .search_terms
                        .iter()
                        .position(|t| t.id == term_id)
                        .ok_or_else(|| FinderError::not_found("search term", term_id))?;
                    config.last_updated = crate::utils::date::now();
                    Ok(config.search_terms.remove(index))
                },
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use crate::config::Config;
    use crate::entities::search_config::{Language, SearchTermRequest, SearchTermUpdate, TermType};
    use crate::error::FinderError;
    use crate::services::Services;

    async fn services(dir: &std::path::Path) -> Services {
        Services::open(Config::with_data_dir(dir)).await.expect("services")
    }

    #[tokio::test]
    async fn defaults_are_persisted_on_first_load() {
        let dir = tempfile::tempdir().expect("tempdir");
        let services = services(dir.path()).await;
        let config = services.search_config("NANDO:1200019").await.expect("config");
        assert_eq!(config.search_terms.len(), 5);
        assert!(dir.path().join("search_terms").join("NANDO_1200019.json").exists());

        let again = services.search_config("NANDO:1200019").await.expect("config");
        assert_eq!(config.search_terms[0].id, again.search_terms[0].id);
    }

    #[tokio::test]
    async fn add_update_delete_term() {
        let dir = tempfile::tempdir().expect("tempdir");
        let services = services(dir.path()).await;
        let term = services
            .add_search_term(
                "NANDO:1200019",
                SearchTermRequest {
                    term: "アンダーソン・ファブリー病".into(),
                    language: Language::Ja,
                    term_type: TermType::General,
                },
            )
            .await
            .expect("add");

        let updated = services
            .update_search_term(
                "NANDO:1200019",
                &term.id,
                SearchTermUpdate {
                    enabled: Some(false),
                    ..SearchTermUpdate::default()
                },
            )
            .await
            .expect("update");
        assert!(!updated.enabled);

        services
            .delete_search_term("NANDO:1200019", &term.id)
            .await
            .expect("delete");
        let err = services
            .delete_search_term("NANDO:1200019", &term.id)
            .await
            .expect_err("already gone");
        assert!(matches!(err, FinderError::NotFound { .. }));
        assert_eq!(
            services.search_config("NANDO:1200019").await.expect("config").search_terms.len(),
            5
        );
    }

    #[tokio::test]
    async fn blank_term_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let services = services(dir.path()).await;
        let err = services
            .add_search_term(
                "NANDO:1200019",
                SearchTermRequest {
                    term: "  ".into(),
                    language: Language::Ja,
                    term_type: TermType::Patient,
                },
            )
            .await
            .expect_err("blank");
        assert!(matches!(err, FinderError::InvalidArgument(_)));
    }
}
