//! Latest result per furnace endpoint

use axum::{
    extract::{RawQuery, State},
    Json,
};
use spectro_common::{FurnaceQuery, SampleRecord};
use tracing::error;

use super::{ApiError, ApiResult};
use crate::AppState;

/// Parse `f=F1&f=F2&t=true`
///
/// `f` may repeat; `t` is read from its first occurrence only.
pub fn parse_furnace_query(raw: Option<&str>) -> ApiResult<FurnaceQuery> {
    let pairs: Vec<(String, String)> = match raw {
        Some(raw) if !raw.is_empty() => serde_urlencoded::from_str(raw)
            .map_err(|e| ApiError::BadRequest(format!("malformed query string: {}", e)))?,
        _ => Vec::new(),
    };

    let furnaces = pairs
        .iter()
        .filter(|(key, _)| key == "f")
        .map(|(_, value)| value.clone())
        .collect();
    let test_samples_only = pairs
        .iter()
        .find(|(key, _)| key == "t")
        .is_some_and(|(_, value)| value == "true");

    Ok(FurnaceQuery::new(furnaces, test_samples_only))
}

/// GET /lastfurnaceresults?f=<furnace>[&f=...][&t=true]
pub async fn last_furnace_results(
    State(state): State<AppState>,
    RawQuery(raw): RawQuery,
) -> ApiResult<Json<Vec<SampleRecord>>> {
    let query = parse_furnace_query(raw.as_deref())?;

    let records = state.furnaces.resolve_latest(&query).await.map_err(|e| {
        error!("Error querying furnace results: {}", e);
        ApiError::from(e)
    })?;

    Ok(Json(records))
}
