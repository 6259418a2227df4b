//! spectro-dashboard library - result aggregation service
//!
//! Merges the latest spectrometer samples from local databases, XML export
//! directories and peer dashboards, caches the merged list for display
//! clients, and forwards new samples to a reporting database.

use axum::Router;
use std::path::Path;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

pub mod aggregator;
pub mod api;
pub mod cache;
pub mod error;
pub mod furnace;
pub mod merge;
pub mod providers;
pub mod reporting;
pub mod service;

pub use aggregator::Aggregator;
pub use api::client::ClientSettings;
pub use error::{DashError, Result};
pub use furnace::FurnaceResolver;

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub aggregator: Arc<Aggregator>,
    pub furnaces: Arc<FurnaceResolver>,
    pub client: ClientSettings,
}

impl AppState {
    pub fn new(aggregator: Arc<Aggregator>, furnaces: Arc<FurnaceResolver>, client: ClientSettings) -> Self {
        Self {
            aggregator,
            furnaces,
            client,
        }
    }
}

/// Build application router
///
/// Unmatched paths are served from `static_dir` when one is configured.
pub fn build_router(state: AppState, static_dir: Option<&Path>) -> Router {
    use axum::routing::get;

    let router = Router::new()
        .route("/results", get(api::get_results))
        .route("/lastfurnaceresults", get(api::last_furnace_results))
        .route("/gettime", get(api::get_time))
        .route("/config", get(api::client_config))
        .merge(api::health_routes())
        .with_state(state);

    let router = match static_dir {
        Some(dir) => router.fallback_service(ServeDir::new(dir)),
        None => router,
    };

    router.layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive()),
    )
}
