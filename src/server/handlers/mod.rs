pub mod catalog;
pub mod llm;
pub mod manual;
pub mod search_terms;
pub mod validation;
pub mod websites;

use axum::Json;
use serde_json::{Value, json};

use crate::server::error::ApiError;

pub type ApiResult<T> = Result<Json<T>, ApiError>;

pub async fn banner() -> Json<Value> {
    Json(json!({
        "service": "support-finder",
        "version": env!("CARGO_PKG_VERSION"),
        "description": "希少疾患の患者会・家族会・支援団体を検索するAPI",
        "features": [
            "disease catalog search",
            "organization collections per disease",
            "website availability tracking",
            "LLM extraction and validation",
            "human approval workflow",
            "manual entries",
            "search-term configuration",
        ],
    }))
}
