use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;

use super::ApiResult;
use crate::entities::collection::{
    ManualEntry, ManualEntryRequest, ManualOrganizationRequest, OrganizationUpdate,
};
use crate::entities::organization::Organization;
use crate::server::error::ApiError;
use crate::services::Services;

pub async fn add_entry(
    State(services): State<Services>,
    Json(request): Json<ManualEntryRequest>,
) -> Result<(StatusCode, Json<ManualEntry>), ApiError> {
    let entry = services.add_manual_entry(request).await?;
    Ok((StatusCode::CREATED, Json(entry)))
}

pub async fn update_entry(
    State(services): State<Services>,
    Path(entry_id): Path<String>,
    Json(request): Json<ManualEntryRequest>,
) -> ApiResult<ManualEntry> {
    Ok(Json(services.update_manual_entry(&entry_id, request).await?))
}

pub async fn delete_entry(
    State(services): State<Services>,
    Path(entry_id): Path<String>,
) -> ApiResult<ManualEntry> {
    Ok(Json(services.delete_manual_entry(&entry_id).await?))
}

pub async fn entries(
    State(services): State<Services>,
    Path(disease_id): Path<String>,
) -> ApiResult<Vec<ManualEntry>> {
    Ok(Json(services.manual_entries(&disease_id).await?))
}

pub async fn add_organization(
    State(services): State<Services>,
    Json(request): Json<ManualOrganizationRequest>,
) -> Result<(StatusCode, Json<Organization>), ApiError> {
    let org = services.add_manual_organization(request).await?;
    Ok((StatusCode::CREATED, Json(org)))
}

pub async fn update_organization(
    State(services): State<Services>,
    Path((disease_id, org_id)): Path<(String, String)>,
    Json(update): Json<OrganizationUpdate>,
) -> ApiResult<Organization> {
    Ok(Json(services.update_organization(&disease_id, &org_id, update).await?))
}

pub async fn delete_organization(
    State(services): State<Services>,
    Path((disease_id, org_id)): Path<(String, String)>,
) -> ApiResult<Organization> {
    Ok(Json(services.delete_organization(&disease_id, &org_id).await?))
}
