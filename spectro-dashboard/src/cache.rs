//! Time-bounded single-value cache
//!
//! Readers share the cached value while it is fresh. On expiry exactly one
//! caller recomputes under the write lock; callers arriving meanwhile wait
//! for that computation and then read its result.

use std::future::Future;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

struct Slot<T> {
    value: Option<T>,
    computed_at: Option<Instant>,
}

impl<T: Clone> Slot<T> {
    fn fresh(&self, ttl: Duration) -> Option<T> {
        match (&self.value, self.computed_at) {
            (Some(value), Some(at)) if at.elapsed() < ttl => Some(value.clone()),
            _ => None,
        }
    }
}

pub struct FreshnessCache<T> {
    ttl: Duration,
    slot: RwLock<Slot<T>>,
}

impl<T: Clone> FreshnessCache<T> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            slot: RwLock::new(Slot {
                value: None,
                computed_at: None,
            }),
        }
    }

    /// Return the cached value, recomputing it first when stale
    ///
    /// A failed `compute` leaves the previous value and its age untouched.
    pub async fn get_or_refresh<F, Fut, E>(&self, compute: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(value) = self.slot.read().await.fresh(self.ttl) {
            return Ok(value);
        }

        let mut slot = self.slot.write().await;
        // Another caller may have refreshed while we waited for the lock
        if let Some(value) = slot.fresh(self.ttl) {
            return Ok(value);
        }

        let value = compute().await?;
        slot.value = Some(value.clone());
        slot.computed_at = Some(Instant::now());
        Ok(value)
    }

    /// Time since the last successful compute, `None` before the first one
    pub async fn age(&self) -> Option<Duration> {
        self.slot.read().await.computed_at.map(|at| at.elapsed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    async fn counted(counter: &AtomicUsize) -> Result<usize, String> {
        Ok(counter.fetch_add(1, Ordering::SeqCst) + 1)
    }

    #[tokio::test(start_paused = true)]
    async fn test_fresh_value_reused_until_ttl() {
        let cache = FreshnessCache::new(Duration::from_secs(5));
        let computes = AtomicUsize::new(0);

        // t=0 computes
        assert_eq!(cache.get_or_refresh(|| counted(&computes)).await, Ok(1));

        // t=3 still fresh
        tokio::time::advance(Duration::from_secs(3)).await;
        assert_eq!(cache.get_or_refresh(|| counted(&computes)).await, Ok(1));

        // t=6 stale, recomputed
        tokio::time::advance(Duration::from_secs(3)).await;
        assert_eq!(cache.get_or_refresh(|| counted(&computes)).await, Ok(2));
        assert_eq!(computes.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_share_one_compute() {
        let cache = Arc::new(FreshnessCache::new(Duration::from_secs(5)));
        let computes = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            let computes = computes.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_refresh(|| async {
                        tokio::time::sleep(Duration::from_secs(1)).await;
                        counted(&computes).await
                    })
                    .await
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap(), Ok(1));
        }
        assert_eq!(computes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_compute_leaves_cache_untouched() {
        let cache = FreshnessCache::new(Duration::from_secs(5));
        assert_eq!(cache.get_or_refresh(|| async { Ok::<u32, String>(7) }).await, Ok(7));

        tokio::time::advance(Duration::from_secs(6)).await;
        let failed = cache
            .get_or_refresh(|| async { Err::<u32, _>("boom".to_string()) })
            .await;
        assert_eq!(failed, Err("boom".to_string()));
        assert_eq!(cache.age().await, Some(Duration::from_secs(6)));

        // Still stale, so the next call computes again
        assert_eq!(cache.get_or_refresh(|| async { Ok::<u32, String>(8) }).await, Ok(8));
    }

    #[tokio::test(start_paused = true)]
    async fn test_age_tracks_last_compute() {
        let cache: FreshnessCache<u8> = FreshnessCache::new(Duration::from_secs(5));
        assert_eq!(cache.age().await, None);

        cache.get_or_refresh(|| async { Ok::<u8, String>(1) }).await.unwrap();
        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(cache.age().await, Some(Duration::from_secs(2)));
    }
}
