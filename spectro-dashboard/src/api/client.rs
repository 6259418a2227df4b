//! Endpoints used by the static dashboard page

use axum::{extract::State, Json};
use chrono::{DateTime, Local};
use serde::Serialize;

use crate::AppState;

/// Settings the dashboard page polls with
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ClientSettings {
    /// Seconds between page refreshes
    pub client_refresh_interval: u64,
    pub number_of_results: usize,
}

#[derive(Debug, Serialize)]
pub struct ServerTime {
    pub t: DateTime<Local>,
}

/// GET /gettime
///
/// Server clock, so wall displays can show time without trusting the client.
pub async fn get_time() -> Json<ServerTime> {
    Json(ServerTime { t: Local::now() })
}

/// GET /config
pub async fn client_config(State(state): State<AppState>) -> Json<ClientSettings> {
    Json(state.client)
}
