//! Application services shared by the HTTP surface and the CLI.

pub mod availability;
pub mod jobs;
pub mod manual;
pub mod pipeline;
pub mod search;
pub mod search_terms;

use std::sync::Arc;

use tracing::debug;

use crate::catalog::Catalog;
use crate::config::Config;
use crate::error::FinderError;
use crate::sources::probe::Prober;
use crate::sources::web::WebClient;
use crate::store::Store;

use availability::WebsiteTracker;
use jobs::JobController;
use pipeline::Pipeline;

/// Catalog, store and background workers wired to one data directory.
#[derive(Clone)]
pub struct Services {
    pub config: Arc<Config>,
    pub catalog: Arc<Catalog>,
    pub store: Arc<Store>,
    pub jobs: JobController,
    pub tracker: WebsiteTracker,
    pub pipeline: Pipeline,
}

impl Services {
    /// Loads the catalog and opens the store.
    ///
    /// # Errors
    ///
    /// Returns an error when the catalog cannot be parsed, the data directory
    /// cannot be read, or an HTTP client cannot be built.
    pub async fn open(config: Config) -> Result<Self, FinderError> {
        let catalog = Arc::new(Catalog::load(config.catalog_path.as_deref()).await?);
        let store = Arc::new(Store::open(&config).await?);
        let jobs = JobController::new();
        let tracker = WebsiteTracker::new(
            catalog.clone(),
            store.clone(),
            jobs.clone(),
            Prober::new(config.probe_timeout)?,
            config.probe_concurrency,
        );
        let web = WebClient::new(&config.search_base, config.page_timeout)?;
        let config = Arc::new(config);
        let pipeline = Pipeline::new(config.clone(), catalog.clone(), store.clone(), jobs.clone(), web);
        debug!(data_dir = %config.data_dir.display(), "Services ready");
        Ok(Self {
            config,
            catalog,
            store,
            jobs,
            tracker,
            pipeline,
        })
    }
}
