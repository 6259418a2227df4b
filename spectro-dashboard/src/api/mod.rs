//! HTTP API handlers for spectro-dashboard

pub mod client;
pub mod error;
pub mod furnace;
pub mod health;
pub mod results;

pub use client::{client_config, get_time};
pub use error::{ApiError, ApiResult};
pub use furnace::last_furnace_results;
pub use health::health_routes;
pub use results::get_results;
