//! Service assembly and lifecycle
//!
//! Startup order: providers, reporting writer, aggregator, furnace
//! resolver, optional cache warm-up, periodic refresh, HTTP. Shutdown
//! cancels the refresh, drains HTTP, then stops the reporting writer, and
//! reports every step that failed, not just the first.

use axum::Router;
use spectro_common::config::DashboardConfig;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::aggregator::{Aggregator, ReportingTarget};
use crate::error::{DashError, Result};
use crate::furnace::FurnaceResolver;
use crate::providers::build_providers;
use crate::reporting::{ReportingForwarder, SqlReportingSink};
use crate::{build_router, AppState, ClientSettings};

/// Assembled service, ready to serve
pub struct Service {
    config: DashboardConfig,
    state: AppState,
    forwarder: Option<ReportingForwarder>,
}

impl Service {
    /// Build every component from configuration
    ///
    /// Any failure is a setup error; nothing is left running.
    pub async fn build(config: DashboardConfig) -> Result<Self> {
        config.validate()?;

        let providers = build_providers(&config).await?;
        let furnaces = FurnaceResolver::from_providers(&providers)
            .ok_or_else(|| DashError::Setup("no result sources configured".to_string()))?;

        let forwarder = match &config.reporting {
            Some(reporting) => {
                let sink = SqlReportingSink::connect(reporting, config.reporting_order()?)
                    .await
                    .map_err(|e| DashError::Setup(format!("reporting database: {}", e)))?;
                Some(ReportingForwarder::spawn(Arc::new(sink), reporting.queue_capacity))
            }
            None => {
                info!("Reporting database not configured");
                None
            }
        };

        let reporting = match &forwarder {
            Some(forwarder) => Some(ReportingTarget {
                handle: forwarder.handle(),
                order: config.reporting_order()?,
            }),
            None => None,
        };

        let aggregator = Aggregator::new(
            providers,
            config.number_of_results,
            config.cache_ttl(),
            reporting,
        );

        let state = AppState::new(
            Arc::new(aggregator),
            Arc::new(furnaces),
            ClientSettings {
                client_refresh_interval: config.client_refresh_interval,
                number_of_results: config.number_of_results,
            },
        );

        Ok(Self {
            config,
            state,
            forwarder,
        })
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn router(&self) -> Router {
        build_router(self.state.clone(), self.config.static_dir.as_deref())
    }

    /// Serve until `shutdown` resolves, then stop every component
    pub async fn run<S>(self, listener: TcpListener, shutdown: S) -> Result<()>
    where
        S: Future<Output = ()> + Send + 'static,
    {
        let aggregator = self.state.aggregator.clone();

        if self.config.warm_cache_on_start {
            match aggregator.get_merged_result().await {
                Ok(body) => info!("Result cache warmed ({} bytes)", body.len()),
                Err(e) => warn!("Cache warm-up failed: {}", e),
            }
        }

        let cancel = CancellationToken::new();
        let refresh = spawn_refresh_task(aggregator, self.config.refresh_interval(), cancel.clone());

        let router = self.router();
        if let Ok(addr) = listener.local_addr() {
            info!("spectro-dashboard listening on http://{}", addr);
        }
        let served = axum::serve(listener, router)
            .with_graceful_shutdown(cancel_on(shutdown, cancel.clone()))
            .await;

        info!("HTTP server stopped, shutting down background tasks");
        let mut failures = Vec::new();
        if let Err(e) = served {
            failures.push(format!("http server: {}", e));
        }

        stop_components(cancel, refresh, self.forwarder, &mut failures).await;

        if failures.is_empty() {
            info!("Shutdown complete");
            Ok(())
        } else {
            Err(DashError::Shutdown(failures))
        }
    }
}

/// Resolve once `shutdown` does, cancelling the refresh task before HTTP drains
async fn cancel_on<S>(shutdown: S, cancel: CancellationToken)
where
    S: Future<Output = ()>,
{
    shutdown.await;
    debug!("Shutdown requested, cancelling periodic refresh");
    cancel.cancel();
}

async fn stop_components(
    cancel: CancellationToken,
    refresh: JoinHandle<()>,
    forwarder: Option<ReportingForwarder>,
    failures: &mut Vec<String>,
) {
    cancel.cancel();
    if let Err(e) = refresh.await {
        failures.push(format!("refresh task: {}", e));
    }

    if let Some(forwarder) = forwarder {
        if let Err(e) = forwarder.shutdown().await {
            failures.push(format!("reporting forwarder: {}", e));
        }
    }
}

/// Recompute the merged result list every `period`
///
/// Keeps the cache warm and the reporting database current even when no
/// client is polling. Cancellation is observed between refreshes, so an
/// in-flight refresh always completes.
pub fn spawn_refresh_task(
    aggregator: Arc<Aggregator>,
    period: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    debug!("Periodic result refresh");
                    if let Err(e) = aggregator.get_merged_result().await {
                        warn!("Periodic refresh failed: {}", e);
                    }
                }
            }
        }

        debug!("Refresh task stopped");
    })
}
