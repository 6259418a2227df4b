//! Cached merged result list
//!
//! Owns the providers and the freshness cache behind `GET /results`. A
//! cache miss runs one merge, queues its full record list for reporting,
//! and stores the serialized display list.

use axum::body::Bytes;
use spectro_common::ElementOrder;
use std::time::Duration;
use tracing::{debug, error, info};

use crate::cache::FreshnessCache;
use crate::error::DashError;
use crate::merge::merge_batches;
use crate::providers::SharedProvider;
use crate::reporting::{ForwarderHandle, ReportRow};

/// Reporting side of the aggregator
pub struct ReportingTarget {
    pub handle: ForwarderHandle,
    pub order: ElementOrder,
}

pub struct Aggregator {
    providers: Vec<SharedProvider>,
    limit: usize,
    cache: FreshnessCache<Bytes>,
    reporting: Option<ReportingTarget>,
}

impl Aggregator {
    pub fn new(
        providers: Vec<SharedProvider>,
        limit: usize,
        cache_ttl: Duration,
        reporting: Option<ReportingTarget>,
    ) -> Self {
        Self {
            providers,
            limit,
            cache: FreshnessCache::new(cache_ttl),
            reporting,
        }
    }

    pub fn source_count(&self) -> usize {
        self.providers.len()
    }

    /// Age of the cached list, `None` until the first merge
    pub async fn cache_age(&self) -> Option<Duration> {
        self.cache.age().await
    }

    /// Serialized newest-first result list, at most `limit` records
    ///
    /// Source failures only shrink the list. Serialization is the only error.
    pub async fn get_merged_result(&self) -> Result<Bytes, DashError> {
        self.cache.get_or_refresh(|| self.compute()).await
    }

    async fn compute(&self) -> Result<Bytes, DashError> {
        let outcome = merge_batches(&self.providers, self.limit).await;

        if outcome.is_empty() {
            info!("Merge produced no records");
        } else {
            debug!(
                display = outcome.display.len(),
                full = outcome.full.len(),
                "Merged results"
            );
        }

        if let Some(reporting) = &self.reporting {
            reporting
                .handle
                .submit(ReportRow::from_records(&outcome.full, &reporting.order));
        }

        let body = serde_json::to_vec(&outcome.display).map_err(|e| {
            error!("Failed to serialize merged results: {}", e);
            DashError::Serialization(e)
        })?;
        Ok(Bytes::from(body))
    }
}
