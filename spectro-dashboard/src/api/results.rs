//! Merged result list endpoint

use axum::{
    extract::State,
    http::header,
    response::{IntoResponse, Response},
};
use tracing::error;

use super::ApiResult;
use crate::AppState;

/// GET /results
///
/// Newest-first JSON array of the latest samples across every source.
/// Served from the freshness cache; a miss triggers one merge.
pub async fn get_results(State(state): State<AppState>) -> ApiResult<Response> {
    let body = state.aggregator.get_merged_result().await.map_err(|e| {
        error!("Failed to build result list: {}", e);
        e
    })?;

    Ok(([(header::CONTENT_TYPE, "application/json")], body).into_response())
}
