use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;

use super::ApiResult;
use crate::entities::search_config::{
    SearchConfig, SearchConfigUpdate, SearchTerm, SearchTermRequest, SearchTermUpdate,
};
use crate::server::error::ApiError;
use crate::services::Services;

pub async fn config(
    State(services): State<Services>,
    Path(id): Path<String>,
) -> ApiResult<SearchConfig> {
    Ok(Json(services.search_config(&id).await?))
}

pub async fn update_config(
    State(services): State<Services>,
    Path(id): Path<String>,
    Json(update): Json<SearchConfigUpdate>,
) -> ApiResult<SearchConfig> {
    Ok(Json(services.update_search_config(&id, update).await?))
}

pub async fn add_term(
    State(services): State<Services>,
    Path(id): Path<String>,
    Json(request): Json<SearchTermRequest>,
) -> Result<(StatusCode, Json<SearchTerm>), ApiError> {
    let term = services.add_search_term(&id, request).await?;
    Ok((StatusCode::CREATED, Json(term)))
}

pub async fn update_term(
    State(services): State<Services>,
    Path((id, term_id)): Path<(String, String)>,
    Json(update): Json<SearchTermUpdate>,
) -> ApiResult<SearchTerm> {
    Ok(Json(services.update_search_term(&id, &term_id, update).await?))
}

pub async fn delete_term(
    State(services): State<Services>,
    Path((id, term_id)): Path<(String, String)>,
) -> ApiResult<SearchTerm> {
    Ok(Json(services.delete_search_term(&id, &term_id).await?))
}
