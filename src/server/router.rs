use axum::Router;
use axum::routing::{get, post, put};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::server::handlers::{self, catalog, llm, manual, search_terms, validation, websites};
use crate::services::Services;

/// Every route of the HTTP surface. Path params use `:param` syntax (axum 0.7).
pub fn build_router(services: Services) -> Router {
    Router::new()
        .route("/", get(handlers::banner))
        .route("/api/diseases", get(catalog::diseases))
        .route("/api/v2/diseases/all", get(catalog::diseases))
        .route("/api/search", post(catalog::search))
        .route("/api/disease/:id", get(catalog::disease))
        .route("/api/organizations/:id", get(catalog::organizations))
        .route("/api/v2/stats", get(catalog::all_stats))
        .route("/api/v2/stats/:id", get(catalog::stats))
        .route("/api/v2/organizations/all", get(catalog::collections))
        .route("/api/v2/organizations/collection/:id", get(catalog::collection))
        .route("/api/v2/manual/entry", post(manual::add_entry))
        .route(
            "/api/v2/manual/entry/:id",
            put(manual::update_entry).delete(manual::delete_entry),
        )
        .route("/api/v2/manual/entries/:disease_id", get(manual::entries))
        .route("/api/v2/manual/organization", post(manual::add_organization))
        .route(
            "/api/v2/manual/organization/:disease_id/:org_id",
            put(manual::update_organization).delete(manual::delete_organization),
        )
        .route("/api/v2/websites/check-all", post(websites::check_all))
        .route("/api/v2/websites/check/:id", post(websites::check_disease))
        .route("/api/v2/websites/status", get(websites::status_all))
        .route("/api/v2/websites/status/:id", get(websites::status))
        .route("/api/v2/websites/history/:url", get(websites::history))
        .route("/api/llm/providers", get(llm::providers))
        .route("/api/llm/models", get(llm::models))
        .route("/api/llm/search/run-all", post(llm::run_all))
        .route("/api/llm/search/run/:id", post(llm::run))
        .route("/api/llm/search/status", get(llm::status))
        .route("/api/llm/search/progress", get(llm::progress))
        .route("/api/llm/tokens", get(llm::tokens))
        .route("/api/validation/stats", get(validation::stats))
        .route("/api/validation/organizations/:id", get(validation::organizations))
        .route(
            "/api/validation/organizations/:id/:org_id",
            post(validation::validate),
        )
        .route(
            "/api/validation/organizations/:id/:org_id/reset",
            post(validation::reset),
        )
        .route(
            "/api/search-terms/config/:id",
            get(search_terms::config).post(search_terms::update_config),
        )
        .route("/api/search-terms/terms/:id", post(search_terms::add_term))
        .route(
            "/api/search-terms/terms/:id/:term_id",
            put(search_terms::update_term).delete(search_terms::delete_term),
        )
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(services)
}
