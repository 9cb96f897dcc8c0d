use axum::Json;
use axum::extract::{Path, State};
use serde::Deserialize;

use super::ApiResult;
use crate::entities::collection::{CollectionListResponse, OrganizationCollection};
use crate::entities::disease::{DiseaseListResponse, DiseaseWithOrganizations, SearchResponse};
use crate::entities::organization::Organization;
use crate::entities::stats::{DiseaseSearchStats, StatsListResponse};
use crate::services::Services;

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default = "default_true")]
    pub include_synonyms: bool,
}

pub async fn diseases(State(services): State<Services>) -> Json<DiseaseListResponse> {
    Json(services.diseases())
}

pub async fn search(
    State(services): State<Services>,
    Json(request): Json<SearchRequest>,
) -> ApiResult<SearchResponse> {
    Ok(Json(services.search(&request.query, request.include_synonyms).await?))
}

pub async fn disease(
    State(services): State<Services>,
    Path(id): Path<String>,
) -> ApiResult<DiseaseWithOrganizations> {
    Ok(Json(services.disease(&id).await?))
}

pub async fn organizations(
    State(services): State<Services>,
    Path(id): Path<String>,
) -> ApiResult<Vec<Organization>> {
    Ok(Json(services.organizations(&id).await?))
}

pub async fn all_stats(State(services): State<Services>) -> Json<StatsListResponse> {
    Json(services.all_stats().await)
}

pub async fn stats(
    State(services): State<Services>,
    Path(id): Path<String>,
) -> ApiResult<DiseaseSearchStats> {
    Ok(Json(services.stats(&id).await?))
}

pub async fn collections(State(services): State<Services>) -> Json<CollectionListResponse> {
    Json(services.collections().await)
}

pub async fn collection(
    State(services): State<Services>,
    Path(id): Path<String>,
) -> ApiResult<OrganizationCollection> {
    Ok(Json(services.collection(&id).await?))
}
