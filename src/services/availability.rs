//! Website availability tracking for stored organizations.

use std::collections::BTreeSet;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use serde::Serialize;
use time::OffsetDateTime;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::catalog::Catalog;
use crate::entities::collection::OrganizationCollection;
use crate::entities::organization::WebsiteAvailabilityRecord;
use crate::error::FinderError;
use crate::services::jobs::{JobController, JobKind, JobSnapshot};
use crate::sources::probe::Prober;
use crate::store::Store;
use crate::utils::keyed_lock::KeyedLock;

/// Outcome of probing one disease's organizations.
#[derive(Debug, Clone, Serialize)]
pub struct CheckReport {
    pub disease_id: String,
    pub total: usize,
    pub available: usize,
    pub unavailable: usize,
    pub results: Vec<WebsiteAvailabilityRecord>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrganizationAvailability {
    pub id: Uuid,
    pub name: String,
    pub url: String,
    pub is_available: bool,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_checked: Option<OffsetDateTime>,
    pub history: Vec<WebsiteAvailabilityRecord>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DiseaseAvailability {
    pub disease_id: String,
    pub disease_name: String,
    pub total_organizations: usize,
    pub available_count: usize,
    pub unavailable_count: usize,
    pub organizations: Vec<OrganizationAvailability>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DiseaseAvailabilitySummary {
    pub disease_id: String,
    pub disease_name: String,
    pub total_organizations: usize,
    pub available_count: usize,
    pub unavailable_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct AvailabilityOverview {
    pub total_diseases: usize,
    pub total_organizations: usize,
    pub available_count: usize,
    pub unavailable_count: usize,
    pub availability_rate: f64,
    pub disease_summary: Vec<DiseaseAvailabilitySummary>,
    pub check_all: JobSnapshot,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiseaseRef {
    pub disease_id: String,
    pub disease_name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct UrlHistory {
    pub url: String,
    pub organization_id: Uuid,
    pub name: String,
    pub disease_id: String,
    pub disease_name: String,
    pub is_available: bool,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_checked: Option<OffsetDateTime>,
    pub history: Vec<WebsiteAvailabilityRecord>,
    pub also_listed_in: Vec<DiseaseRef>,
}

fn count_available(collection: &OrganizationCollection) -> usize {
    collection
        .organizations
        .iter()
        .filter(|o| o.is_available)
        .count()
}

#[derive(Clone)]
pub struct WebsiteTracker {
    catalog: Arc<Catalog>,
    store: Arc<Store>,
    jobs: JobController,
    prober: Prober,
    url_locks: Arc<KeyedLock>,
    concurrency: usize,
}

impl WebsiteTracker {
    pub fn new(
        catalog: Arc<Catalog>,
        store: Arc<Store>,
        jobs: JobController,
        prober: Prober,
        concurrency: usize,
    ) -> Self {
        Self {
            catalog,
            store,
            jobs,
            prober,
            url_locks: Arc::new(KeyedLock::new()),
            concurrency: concurrency.max(1),
        }
    }

    /// Probes `url` once; a second probe of the same URL waits for the first.
    pub async fn probe(&self, url: &str) -> WebsiteAvailabilityRecord {
        let _guard = self.url_locks.lock(url).await;
        self.prober.check(url).await
    }

    /// Probes `url` and appends the result to every organization listing it.
    ///
    /// # Errors
    ///
    /// Returns an I/O error when an owning collection cannot be saved.
    pub async fn check_one(&self, url: &str) -> Result<WebsiteAvailabilityRecord, FinderError> {
        let record = self.probe(url).await;
        for owner in self.store.owners_of(url).await {
            let organizations = self
                .store
                .collections
                .mutate_existing(&owner.disease_id, |collection| {
                    for org in collection.organizations.iter_mut().filter(|o| o.url == url) {
                        org.push_availability(record.clone());
                    }
                    collection.touch();
                    Ok(collection.organizations.clone())
                })
                .await?;
            self.store
                .refresh_stats_if_present(&owner.disease_id, &organizations)
                .await?;
        }
        Ok(record)
    }

    /// Probes every organization URL of one disease and saves all results together.
    ///
    /// # Errors
    ///
    /// Returns [`FinderError::NotFound`] for a disease that is neither in the
    /// catalog nor stored, or an I/O error when saving fails.
    pub async fn check_disease(&self, disease_id: &str) -> Result<CheckReport, FinderError> {
        let Some(collection) = self.store.collections.get(disease_id).await else {
            self.catalog.require(disease_id)?;
            return Ok(CheckReport {
                disease_id: disease_id.to_string(),
                total: 0,
                available: 0,
                unavailable: 0,
                results: Vec::new(),
            });
        };

        let urls: BTreeSet<String> = collection
            .organizations
            .iter()
            .map(|o| o.url.clone())
            .collect();
        let results: Vec<WebsiteAvailabilityRecord> = stream::iter(urls)
            .map(|url| async move { self.probe(&url).await })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let organizations = self
            .store
            .collections
            .mutate_existing(&collection.disease_id, |collection| {
                for record in &results {
                    for org in collection
                        .organizations
                        .iter_mut()
                        .filter(|o| o.url == record.url)
                    {
                        org.push_availability(record.clone());
                    }
                }
                collection.touch();
                Ok(collection.organizations.clone())
            })
            .await?;
        self.store
            .refresh_stats_if_present(&collection.disease_id, &organizations)
            .await?;

        let available = results.iter().filter(|r| r.is_available).count();
        info!(
            disease_id = %collection.disease_id,
            total = results.len(),
            available,
            "Checked organization websites"
        );
        Ok(CheckReport {
            disease_id: collection.disease_id,
            total: results.len(),
            available,
            unavailable: results.len() - available,
            results,
        })
    }

    /// Starts checking every stored collection in the background.
    ///
    /// # Errors
    ///
    /// Returns [`FinderError::AlreadyRunning`] while a previous check-all is in flight.
    pub async fn start_check_all(&self) -> Result<JobSnapshot, FinderError> {
        let disease_ids = self.store.collections.keys().await;
        let ticket = self
            .jobs
            .try_start(JobKind::WebsiteCheckAll, disease_ids.len())?;
        let tracker = self.clone();
        tokio::spawn(async move {
            let mut checked = 0usize;
            let mut failed = 0usize;
            for disease_id in disease_ids {
                ticket.set_current(&disease_id);
                match tracker.check_disease(&disease_id).await {
                    Ok(report) => {
                        checked += report.total;
                        ticket.item_done(true);
                    }
                    Err(err) => {
                        failed += 1;
                        warn!(%disease_id, error = %err, "Website check failed for disease");
                        ticket.item_done(false);
                    }
                }
            }
            ticket.complete(format!(
                "{checked} websites checked, {failed} diseases failed"
            ));
        });
        Ok(self.jobs.snapshot(JobKind::WebsiteCheckAll))
    }

    /// Current availability of one disease's organizations.
    ///
    /// # Errors
    ///
    /// Returns [`FinderError::NotFound`] for an unknown disease.
    pub async fn status(&self, disease_id: &str) -> Result<DiseaseAvailability, FinderError> {
        let collection = match self.store.collections.get(disease_id).await {
            Some(collection) => collection,
            None => {
                let disease = self.catalog.require(disease_id)?;
                OrganizationCollection::new(&disease.disease_id, &disease.name_ja)
            }
        };
        let available_count = count_available(&collection);
        Ok(DiseaseAvailability {
            total_organizations: collection.organizations.len(),
            available_count,
            unavailable_count: collection.organizations.len() - available_count,
            organizations: collection
                .organizations
                .into_iter()
                .map(|o| OrganizationAvailability {
                    id: o.id,
                    name: o.name,
                    url: o.url,
                    is_available: o.is_available,
                    last_checked: o.last_checked,
                    history: o.availability_history,
                })
                .collect(),
            disease_id: collection.disease_id,
            disease_name: collection.disease_name,
        })
    }

    pub async fn status_all(&self) -> AvailabilityOverview {
        let collections = self.store.collections.all().await;
        let mut total_organizations = 0;
        let mut available_count = 0;
        let mut disease_summary = Vec::new();
        for collection in &collections {
            let total = collection.organizations.len();
            let available = count_available(collection);
            total_organizations += total;
            available_count += available;
            if total > 0 {
                disease_summary.push(DiseaseAvailabilitySummary {
                    disease_id: collection.disease_id.clone(),
                    disease_name: collection.disease_name.clone(),
                    total_organizations: total,
                    available_count: available,
                    unavailable_count: total - available,
                });
            }
        }
        let availability_rate = if total_organizations == 0 {
            0.0
        } else {
            available_count as f64 / total_organizations as f64
        };
        AvailabilityOverview {
            total_diseases: collections.len(),
            total_organizations,
            available_count,
            unavailable_count: total_organizations - available_count,
            availability_rate,
            disease_summary,
            check_all: self.jobs.snapshot(JobKind::WebsiteCheckAll),
        }
    }

    /// Full probe history of `url`, from its first owner by disease id.
    ///
    /// # Errors
    ///
    /// Returns [`FinderError::NotFound`] when no collection lists the URL.
    pub async fn history(&self, url: &str) -> Result<UrlHistory, FinderError> {
        let url = url.trim();
        let mut owners = self.store.owners_of(url).await.into_iter();
        let Some(first) = owners.next() else {
            return Err(FinderError::not_found("website", url));
        };
        let also_listed_in: Vec<DiseaseRef> = owners
            .map(|c| DiseaseRef {
                disease_id: c.disease_id,
                disease_name: c.disease_name,
            })
            .collect();
        let Some(org) = first.organizations.into_iter().find(|o| o.url == url) else {
            return Err(FinderError::not_found("website", url));
        };
        debug!(url, owners = also_listed_in.len() + 1, "Loaded website history");
        Ok(UrlHistory {
            url: org.url,
            organization_id: org.id,
            name: org.name,
            disease_id: first.disease_id,
            disease_name: first.disease_name,
            is_available: org.is_available,
            last_checked: org.last_checked,
            history: org.availability_history,
            also_listed_in,
        })
    }
}
