use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use serde::Deserialize;

use super::ApiResult;
use crate::server::error::ApiError;
use crate::services::Services;
use crate::services::jobs::JobSnapshot;
use crate::services::pipeline::{RunReport, SearchProgress, SearchStatus, TokenSummary};
use crate::sources::llm::{self, ModelListing, ProviderConfig, ProviderInfo};

#[derive(Debug, Default, Deserialize)]
pub struct ProviderQuery {
    pub provider: Option<String>,
    pub model_name: Option<String>,
    pub base_url: Option<String>,
    pub max_diseases: Option<usize>,
}

impl ProviderQuery {
    fn resolve(&self, services: &Services) -> Result<ProviderConfig, ApiError> {
        Ok(ProviderConfig::resolve(
            &services.config,
            self.provider.as_deref(),
            self.model_name.as_deref(),
            self.base_url.as_deref(),
        )?)
    }
}

pub async fn providers() -> Json<Vec<ProviderInfo>> {
    Json(llm::providers())
}

pub async fn models(
    State(services): State<Services>,
    Query(query): Query<ProviderQuery>,
) -> ApiResult<ModelListing> {
    let provider = llm::build(&query.resolve(&services)?)?;
    Ok(Json(llm::list_models_with_fallback(provider.as_ref()).await))
}

pub async fn run(
    State(services): State<Services>,
    Path(id): Path<String>,
    Query(query): Query<ProviderQuery>,
) -> ApiResult<RunReport> {
    let config = query.resolve(&services)?;
    Ok(Json(services.pipeline.run_with_config(&id, &config).await?))
}

pub async fn run_all(
    State(services): State<Services>,
    Query(query): Query<ProviderQuery>,
) -> Result<(StatusCode, Json<JobSnapshot>), ApiError> {
    let config = query.resolve(&services)?;
    let job = services
        .pipeline
        .start_run_all(&config, query.max_diseases.unwrap_or(0))?;
    Ok((StatusCode::ACCEPTED, Json(job)))
}

pub async fn status(State(services): State<Services>) -> Json<SearchStatus> {
    Json(services.pipeline.status().await)
}

pub async fn progress(State(services): State<Services>) -> Json<SearchProgress> {
    Json(services.pipeline.progress().await)
}

pub async fn tokens(State(services): State<Services>) -> Json<TokenSummary> {
    Json(services.pipeline.token_summary().await)
}
