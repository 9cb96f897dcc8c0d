use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;

use super::ApiResult;
use crate::server::error::ApiError;
use crate::services::Services;
use crate::services::availability::{AvailabilityOverview, CheckReport, DiseaseAvailability, UrlHistory};
use crate::services::jobs::JobSnapshot;

pub async fn check_disease(
    State(services): State<Services>,
    Path(id): Path<String>,
) -> ApiResult<CheckReport> {
    Ok(Json(services.tracker.check_disease(&id).await?))
}

pub async fn check_all(
    State(services): State<Services>,
) -> Result<(StatusCode, Json<JobSnapshot>), ApiError> {
    let job = services.tracker.start_check_all().await?;
    Ok((StatusCode::ACCEPTED, Json(job)))
}

pub async fn status_all(State(services): State<Services>) -> Json<AvailabilityOverview> {
    Json(services.tracker.status_all().await)
}

pub async fn status(
    State(services): State<Services>,
    Path(id): Path<String>,
) -> ApiResult<DiseaseAvailability> {
    Ok(Json(services.tracker.status(&id).await?))
}

/// `url` arrives percent-encoded in one path segment.
pub async fn history(
    State(services): State<Services>,
    Path(url): Path<String>,
) -> ApiResult<UrlHistory> {
    Ok(Json(services.tracker.history(&url).await?))
}
