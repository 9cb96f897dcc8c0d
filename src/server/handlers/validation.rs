use axum::Json;
use axum::extract::{Path, Query, State};
use serde::Deserialize;

use super::ApiResult;
use crate::entities::organization::Organization;
use crate::entities::validation::ValidationStatus;
use crate::server::error::ApiError;
use crate::services::Services;
use crate::services::pipeline::ValidationStats;

#[derive(Debug, Default, Deserialize)]
pub struct StatusFilter {
    pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ValidationRequest {
    #[serde(default)]
    pub validation_notes: Option<String>,
    pub approve: bool,
}

pub async fn organizations(
    State(services): State<Services>,
    Path(id): Path<String>,
    Query(filter): Query<StatusFilter>,
) -> ApiResult<Vec<Organization>> {
    let status = filter
        .status
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .map(str::parse::<ValidationStatus>)
        .transpose()
        .map_err(ApiError::from)?;
    Ok(Json(services.pipeline.organizations_by_status(&id, status).await?))
}

pub async fn validate(
    State(services): State<Services>,
    Path((id, org_id)): Path<(String, String)>,
    Json(request): Json<ValidationRequest>,
) -> ApiResult<Organization> {
    Ok(Json(
        services
            .pipeline
            .validate(&id, &org_id, request.approve, request.validation_notes)
            .await?,
    ))
}

pub async fn reset(
    State(services): State<Services>,
    Path((id, org_id)): Path<(String, String)>,
) -> ApiResult<Organization> {
    Ok(Json(services.pipeline.reset(&id, &org_id).await?))
}

pub async fn stats(State(services): State<Services>) -> Json<ValidationStats> {
    Json(services.pipeline.validation_stats().await)
}
