//! Result merger
//!
//! Fetches the latest batch from every provider concurrently and combines
//! them into one newest-first list. A failing provider is logged and left
//! out; the merge itself never fails.

use futures::future::join_all;
use spectro_common::sample::newest_first;
use spectro_common::SampleRecord;
use tracing::{debug, warn};

use crate::providers::SharedProvider;

/// Result of one merge
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergeOutcome {
    /// First `limit` records of the merged list, served to clients
    pub display: Vec<SampleRecord>,
    /// Every record fetched, newest first, fed to the reporting path
    pub full: Vec<SampleRecord>,
}

impl MergeOutcome {
    pub fn is_empty(&self) -> bool {
        self.full.is_empty()
    }
}

/// Combine already-fetched batches
///
/// Each batch is capped at `limit` before concatenation. The sort is
/// stable, so records with equal timestamps keep provider order and then
/// in-batch order.
pub fn merge_sorted(batches: Vec<Vec<SampleRecord>>, limit: usize) -> MergeOutcome {
    if limit == 0 {
        return MergeOutcome::default();
    }

    let mut full: Vec<SampleRecord> = batches
        .into_iter()
        .flat_map(|batch| batch.into_iter().take(limit))
        .collect();
    full.sort_by(newest_first);

    let display = full.iter().take(limit).cloned().collect();
    MergeOutcome { display, full }
}

/// Fetch from every provider and merge
pub async fn merge_batches(providers: &[SharedProvider], limit: usize) -> MergeOutcome {
    if limit == 0 {
        return MergeOutcome::default();
    }

    let fetches = providers.iter().map(|provider| async move {
        match provider.fetch_batch(limit).await {
            Ok(batch) => {
                debug!(source = provider.name(), count = batch.len(), "Fetched batch");
                Some(batch)
            }
            Err(e) => {
                warn!(source = provider.name(), "Skipping source in merge: {}", e);
                None
            }
        }
    });

    let batches = join_all(fetches).await.into_iter().flatten().collect();
    merge_sorted(batches, limit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SourceError;
    use crate::providers::testing::StaticProvider;
    use crate::providers::ProviderKind;
    use chrono::{Duration as ChronoDuration, TimeZone, Utc};
    use std::sync::Arc;
    use std::time::Duration;

    fn record(name: &str, minute: Option<i64>) -> SampleRecord {
        let base = Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap();
        SampleRecord {
            sample_name: name.to_string(),
            time_stamp: minute.map(|m| base + ChronoDuration::minutes(m)),
            ..Default::default()
        }
    }

    fn names(records: &[SampleRecord]) -> Vec<&str> {
        records.iter().map(|r| r.sample_name.as_str()).collect()
    }

    #[test]
    fn test_merge_sorted_newest_first() {
        let outcome = merge_sorted(
            vec![
                vec![record("a3", Some(30)), record("a1", Some(10))],
                vec![record("b4", Some(40)), record("b2", Some(20))],
            ],
            3,
        );
        assert_eq!(names(&outcome.display), vec!["b4", "a3", "b2"]);
        assert_eq!(names(&outcome.full), vec!["b4", "a3", "b2", "a1"]);
    }

    #[test]
    fn test_unknown_timestamps_sort_last() {
        let outcome = merge_sorted(
            vec![vec![record("x", None), record("a", Some(1))], vec![record("b", Some(2))]],
            5,
        );
        assert_eq!(names(&outcome.full), vec!["b", "a", "x"]);
    }

    #[test]
    fn test_equal_timestamps_keep_provider_order() {
        let outcome = merge_sorted(
            vec![vec![record("first", Some(5))], vec![record("second", Some(5))]],
            5,
        );
        assert_eq!(names(&outcome.display), vec!["first", "second"]);
    }

    #[test]
    fn test_batches_capped_at_limit() {
        let big: Vec<_> = (0..10).map(|i| record(&format!("a{}", i), Some(100 - i))).collect();
        let outcome = merge_sorted(vec![big, vec![record("b", Some(0))]], 4);
        assert_eq!(outcome.full.len(), 5);
        assert_eq!(outcome.display.len(), 4);
        assert_eq!(outcome.full.last().unwrap().sample_name, "b");
    }

    #[test]
    fn test_zero_limit_is_empty() {
        let outcome = merge_sorted(vec![vec![record("a", Some(1))]], 0);
        assert!(outcome.is_empty());
        assert!(outcome.display.is_empty());
    }

    #[tokio::test]
    async fn test_failed_provider_is_skipped() {
        let ok_a: Vec<_> = (0..10).map(|i| record(&format!("a{}", i), Some(i * 2))).collect();
        let ok_b: Vec<_> = (0..15).map(|i| record(&format!("b{}", i), Some(i * 2 + 1))).collect();

        let providers: Vec<SharedProvider> = vec![
            Arc::new(StaticProvider::new("a", ProviderKind::LocalDatabase, Ok(ok_a))),
            Arc::new(StaticProvider::new(
                "down",
                ProviderKind::RemotePeer,
                Err(SourceError::Unavailable("connection refused".to_string())),
            )),
            Arc::new(StaticProvider::new("b", ProviderKind::XmlDirectory, Ok(ok_b))),
        ];

        let outcome = merge_batches(&providers, 20).await;
        assert_eq!(outcome.display.len(), 20);
        assert_eq!(outcome.full.len(), 25);
        assert!(outcome
            .display
            .windows(2)
            .all(|w| w[0].time_stamp >= w[1].time_stamp));
    }

    #[tokio::test]
    async fn test_all_providers_failing_yields_empty() {
        let providers: Vec<SharedProvider> = vec![Arc::new(StaticProvider::new(
            "down",
            ProviderKind::LocalDatabase,
            Err(SourceError::Malformed("bad row".to_string())),
        ))];
        assert!(merge_batches(&providers, 20).await.is_empty());
    }

    #[tokio::test]
    async fn test_zero_limit_calls_no_provider() {
        let provider = Arc::new(StaticProvider::new(
            "a",
            ProviderKind::LocalDatabase,
            Ok(vec![record("a", Some(1))]),
        ));
        let providers: Vec<SharedProvider> = vec![provider.clone()];

        assert!(merge_batches(&providers, 0).await.is_empty());
        assert_eq!(provider.batch_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_providers_fetched_concurrently() {
        let slow_a = Arc::new(
            StaticProvider::new("a", ProviderKind::LocalDatabase, Ok(vec![record("a", Some(1))]))
                .with_delay(Duration::from_secs(2)),
        );
        let slow_b = Arc::new(
            StaticProvider::new("b", ProviderKind::XmlDirectory, Ok(vec![record("b", Some(2))]))
                .with_delay(Duration::from_secs(2)),
        );
        let providers: Vec<SharedProvider> = vec![slow_a, slow_b];

        let start = tokio::time::Instant::now();
        let outcome = merge_batches(&providers, 5).await;
        assert_eq!(outcome.full.len(), 2);
        assert!(start.elapsed() < Duration::from_secs(3));
    }
}
