//! Hand-entered notes and organizations.

use reqwest::Url;
use tracing::info;
use uuid::Uuid;

use crate::entities::collection::{
    ManualEntry, ManualEntryRequest, ManualOrganizationRequest, OrganizationCollection,
    OrganizationUpdate,
};
use crate::entities::organization::{Organization, Source};
use crate::error::FinderError;
use crate::services::Services;

fn required(field: &str, value: &str) -> Result<String, FinderError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(FinderError::InvalidArgument(format!("{field} must not be empty")));
    }
    Ok(value.to_string())
}

/// Trimmed `url`, which must be an absolute http(s) URL.
fn http_url(url: &str) -> Result<String, FinderError> {
    let url = required("url", url)?;
    let parsed = Url::parse(&url)
        .map_err(|e| FinderError::InvalidArgument(format!("Invalid url '{url}': {e}")))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(FinderError::InvalidArgument(format!(
            "Invalid url '{url}': expected an http(s) URL"
        )));
    }
    Ok(url)
}

fn optional_url(url: Option<String>) -> Result<Option<String>, FinderError> {
    match url.filter(|u| !u.trim().is_empty()) {
        Some(url) => http_url(&url).map(Some),
        None => Ok(None),
    }
}

impl Services {
    /// # Errors
    ///
    /// Returns [`FinderError::InvalidArgument`] for a blank title or content
    /// or a malformed URL, and [`FinderError::NotFound`] for an unknown disease.
    pub async fn add_manual_entry(&self, request: ManualEntryRequest) -> Result<ManualEntry, FinderError> {
        let title = required("title", &request.title)?;
        let content = required("content", &request.content)?;
        let url = optional_url(request.url)?;
        let disease = self.catalog.require(&request.disease_id)?;
        let now = crate::utils::date::now();
        let entry = ManualEntry {
            id: Uuid::new_v4().to_string(),
            disease_id: disease.disease_id.clone(),
            title,
            content,
            url,
            entry_type: request.entry_type,
            created_at: now,
            updated_at: now,
        };
        let stored = entry.clone();
        self.store
            .collections
            .mutate(
                &disease.disease_id,
                || OrganizationCollection::new(&disease.disease_id, &disease.name_ja),
                |collection| {
                    collection.manual_entries.push(stored);
                    collection.touch();
                    Ok(())
                },
            )
            .await?;
        info!(disease_id = %entry.disease_id, entry_id = %entry.id, "Added manual entry");
        Ok(entry)
    }

    async fn entry_owner(&self, entry_id: &str) -> Result<String, FinderError> {
        self.store
            .collections
            .all()
            .await
            .into_iter()
            .find(|c| c.manual_entries.iter().any(|e| e.id == entry_id))
            .map(|c| c.disease_id)
            .ok_or_else(|| FinderError::not_found("manual entry", entry_id))
    }

    /// Rewrites the entry with `entry_id`, wherever it is stored.
    pub async fn update_manual_entry(
        &self,
        entry_id: &str,
        request: ManualEntryRequest,
    ) -> Result<ManualEntry, FinderError> {
        let title = required("title", &request.title)?;
        let content = required("content", &request.content)?;
        let url = optional_url(request.url)?;
        let owner = self.entry_owner(entry_id).await?;
        self.store
            .collections
            .mutate_existing(&owner, |collection| {
                let entry = collection
                    .manual_entries
                    .iter_mut()
                    .find(|e| e.id == entry_id)
                    .ok_or_else(|| FinderError::not_found("manual entry", entry_id))?;
                entry.title = title;
                entry.content = content;
                entry.url = url;
                entry.entry_type = request.entry_type;
                entry.updated_at = crate::utils::date::now();
                let entry = entry.clone();
                collection.touch();
                Ok(entry)
            })
            .await
    }

    pub async fn delete_manual_entry(&self, entry_id: &str) -> Result<ManualEntry, FinderError> {
        let owner = self.entry_owner(entry_id).await?;
        self.store
            .collections
            .mutate_existing(&owner, |collection| {
                let index = collection
                    .manual_entries
                    .iter()
                    .position(|e| e.id == entry_id)
                    .ok_or_else(|| FinderError::not_found("manual entry", entry_id))?;
                collection.touch();
                Ok(collection.manual_entries.remove(index))
            })
            .await
    }

    pub async fn manual_entries(&self, disease_id: &str) -> Result<Vec<ManualEntry>, FinderError> {
        if let Some(collection) = self.store.collections.get(disease_id).await {
            return Ok(collection.manual_entries);
        }
        self.catalog.require(disease_id)?;
        Ok(Vec::new())
    }

    /// Adds an organization with `source=manual` after one availability probe.
    /// A URL already listed for the disease updates that record instead.
    ///
    /// # Errors
    ///
    /// Returns [`FinderError::InvalidArgument`] for a blank name or a
    /// malformed URL, and [`FinderError::NotFound`] for an unknown disease.
    pub async fn add_manual_organization(
        &self,
        request: ManualOrganizationRequest,
    ) -> Result<Organization, FinderError> {
        let name = required("name", &request.name)?;
        let url = http_url(&request.url)?;
        let disease = self.catalog.require(&request.disease_id)?;

        let probe = self.tracker.probe(&url).await;
        let mut org = Organization::new(&name, &url, request.org_type, Source::Manual);
        org.description = request.description.filter(|d| !d.trim().is_empty());
        org.notes = request.notes.filter(|n| !n.trim().is_empty());

        let (stored, organizations) = self
            .store
            .collections
            .mutate(
                &disease.disease_id,
                || OrganizationCollection::new(&disease.disease_id, &disease.name_ja),
                |collection| {
                    let id = collection.upsert(org);
                    let key = id.to_string();
                    let stored = collection
                        .find_mut(&key)
                        .ok_or_else(|| FinderError::not_found("organization", &key))?;
                    stored.push_availability(probe);
                    let stored = stored.clone();
                    collection.touch();
                    Ok((stored, collection.organizations.clone()))
                },
            )
            .await?;
        self.store
            .refresh_stats_if_present(&disease.disease_id, &organizations)
            .await?;
        info!(
            disease_id = %disease.disease_id,
            url = %stored.url,
            available = stored.is_available,
            "Saved manual organization"
        );
        Ok(stored)
    }

    pub async fn update_organization(
        &self,
        disease_id: &str,
        organization_key: &str,
        update: OrganizationUpdate,
    ) -> Result<Organization, FinderError> {
        let name = update.name.as_deref().map(|n| required("name", n)).transpose()?;
        let (org, organizations) = self
            .store
            .collections
            .mutate_existing(disease_id, |collection| {
                let org = collection
                    .find_mut(organization_key)
                    .ok_or_else(|| FinderError::not_found("organization", organization_key))?;
                if let Some(name) = name {
                    org.name = name;
                }
                if let Some(org_type) = update.org_type {
                    org.org_type = org_type;
                }
                if let Some(description) = update.description {
                    org.description = Some(description).filter(|d| !d.trim().is_empty());
                }
                if let Some(notes) = update.notes {
                    org.notes = Some(notes).filter(|n| !n.trim().is_empty());
                }
                let org = org.clone();
                collection.touch();
                Ok((org, collection.organizations.clone()))
            })
            .await?;
        self.store.refresh_stats_if_present(disease_id, &organizations).await?;
        Ok(org)
    }

    /// Removes exactly the record identified by id or URL.
    pub async fn delete_organization(
        &self,
        disease_id: &str,
        organization_key: &str,
    ) -> Result<Organization, FinderError> {
        let (removed, organizations) = self
            .store
            .collections
            .mutate_existing(disease_id, |collection| {
                let removed = collection.remove(organization_key)?;
                collection.touch();
                Ok((removed, collection.organizations.clone()))
            })
            .await?;
        self.store.refresh_stats_if_present(disease_id, &organizations).await?;
        info!(disease_id, url = %removed.url, "Deleted organization");
        Ok(removed)
    }
}
