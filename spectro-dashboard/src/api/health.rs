//! Health check endpoint

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use crate::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub module: String,
    pub version: String,
    pub sources: usize,
    /// Milliseconds since the result list was last merged
    pub cache_age_ms: Option<u64>,
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let cache_age_ms = state
        .aggregator
        .cache_age()
        .await
        .map(|age| u64::try_from(age.as_millis()).unwrap_or(u64::MAX));

    Json(HealthResponse {
        status: "ok".to_string(),
        module: "spectro-dashboard".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        sources: state.aggregator.source_count(),
        cache_age_ms,
    })
}

/// Build health check routes
pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
