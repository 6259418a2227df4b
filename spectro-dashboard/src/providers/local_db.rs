//! Spectrometer result database provider
//!
//! Reads the instrument's own result store, opened read-only. The store
//! tolerates exactly one reader reliably, so every query from this provider
//! runs under `query_lock` and the pool holds a single connection. The
//! provider is shared process-wide, which makes the lock process-wide too.
//!
//! Tables read:
//! - `KSampleResultTbl`: one row per sample (`Quality` holds the furnace)
//! - `KMeasureResultTbl`: measurements of a sample (`ResultType = 1` is final)
//! - `KResultValueTbl`: element values of a measurement (`ResultType = 2`)

use async_trait::async_trait;
use spectro_common::elements::symbol_from_result_key;
use spectro_common::sample::furnace_key;
use spectro_common::time::parse_local_wall_time;
use spectro_common::{ElementOrder, FurnaceQuery, SampleRecord};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::{ProviderKind, SourceProvider};
use crate::error::SourceError;

/// Upper bound on waiting for the single connection
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(15);

pub struct LocalDbProvider {
    name: String,
    source_id: u32,
    display_order: ElementOrder,
    pool: SqlitePool,
    query_lock: Mutex<()>,
}

impl LocalDbProvider {
    /// Open the result database read-only
    pub async fn open(
        path: &Path,
        source_id: u32,
        display_order: ElementOrder,
    ) -> Result<Self, SourceError> {
        if !path.exists() {
            return Err(SourceError::Unavailable(format!(
                "database not found: {}",
                path.display()
            )));
        }

        // mode=ro: the instrument software owns this file
        let options = SqliteConnectOptions::new().filename(path).read_only(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .acquire_timeout(ACQUIRE_TIMEOUT)
            .connect_with(options)
            .await?;

        Ok(Self::with_pool(
            pool,
            format!("local-db:{}", path.display()),
            source_id,
            display_order,
        ))
    }

    /// Wrap an existing pool
    pub fn with_pool(
        pool: SqlitePool,
        name: impl Into<String>,
        source_id: u32,
        display_order: ElementOrder,
    ) -> Self {
        Self {
            name: name.into(),
            source_id,
            display_order,
            pool,
            query_lock: Mutex::new(()),
        }
    }

    /// Element values and final timestamp of one sample
    async fn load_measurements(
        &self,
        sample_result_id: i64,
    ) -> Result<(Option<chrono::DateTime<chrono::Utc>>, BTreeMap<String, f64>), SourceError> {
        let rows: Vec<(Option<String>, Option<String>, Option<f64>)> = sqlx::query_as(
            r#"
            SELECT m.Timestamp, r.ResultKey, r.Value
            FROM KMeasureResultTbl m
            LEFT JOIN KResultValueTbl r
                ON r.MeasureResultID = m.MeasureResultID
                AND r.ResultType = 2
                AND r.Value > 0.0
            WHERE m.SampleResultID = ? AND m.ResultType = 1
            ORDER BY m.MeasureResultID ASC
            "#,
        )
        .bind(sample_result_id)
        .fetch_all(&self.pool)
        .await?;

        let mut time_stamp = None;
        let mut values = BTreeMap::new();

        for (raw_time, key, value) in rows {
            if let Some(raw_time) = raw_time {
                match parse_local_wall_time(&raw_time) {
                    Some(parsed) => time_stamp = time_stamp.max(Some(parsed)),
                    None => warn!(
                        sample_result_id,
                        "Unparseable measurement timestamp '{}' in {}", raw_time, self.name
                    ),
                }
            }

            let (Some(key), Some(value)) = (key, value) else {
                continue;
            };
            if let Some(symbol) = symbol_from_result_key(&key) {
                // First reported value of an element wins
                values.entry(symbol.to_string()).or_insert(value);
            }
        }

        Ok((time_stamp, values))
    }
}

#[async_trait]
impl SourceProvider for LocalDbProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn source_id(&self) -> u32 {
        self.source_id
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::LocalDatabase
    }

    async fn fetch_batch(&self, limit: usize) -> Result<Vec<SampleRecord>, SourceError> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let _guard = self.query_lock.lock().await;

        let samples: Vec<(i64, Option<String>, Option<String>)> = sqlx::query_as(
            r#"
            SELECT SampleResultID, SampleName, Quality
            FROM KSampleResultTbl
            ORDER BY SampleResultID DESC
            LIMIT ?
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut records = Vec::with_capacity(samples.len());
        for (sample_result_id, sample_name, furnace) in samples {
            let (time_stamp, element_values) = self.load_measurements(sample_result_id).await?;

            records.push(SampleRecord {
                sample_name: sample_name.unwrap_or_default(),
                furnace: furnace.unwrap_or_default(),
                time_stamp,
                results: self.display_order.place(&element_values),
                source_id: self.source_id,
                element_values,
            });
        }

        debug!("{} returned {} record(s)", self.name, records.len());
        Ok(records)
    }

    async fn fetch_furnace_latest(
        &self,
        query: &FurnaceQuery,
    ) -> Result<Vec<SampleRecord>, SourceError> {
        let keys = query.keys();
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let sql = if query.test_samples_only {
            r#"
            SELECT SampleName, Quality, StoreDateTime
            FROM KSampleResultTbl
            WHERE UPPER(TRIM(Quality)) = ? AND UPPER(SUBSTR(SampleName, -1)) = 'T'
            ORDER BY SampleResultID DESC
            LIMIT 1
            "#
        } else {
            r#"
            SELECT SampleName, Quality, StoreDateTime
            FROM KSampleResultTbl
            WHERE UPPER(TRIM(Quality)) = ?
            ORDER BY SampleResultID DESC
            LIMIT 1
            "#
        };

        let _guard = self.query_lock.lock().await;

        let mut records = Vec::with_capacity(keys.len());
        for key in keys {
            let row: Option<(Option<String>, Option<String>, Option<String>)> =
                sqlx::query_as(sql).bind(&key).fetch_optional(&self.pool).await?;

            let Some((sample_name, furnace, stored_at)) = row else {
                continue;
            };

            records.push(SampleRecord {
                sample_name: sample_name.unwrap_or_default(),
                furnace: furnace
                    .filter(|f| !f.trim().is_empty())
                    .unwrap_or_else(|| furnace_key(&key)),
                time_stamp: stored_at.as_deref().and_then(parse_local_wall_time),
                source_id: self.source_id,
                ..Default::default()
            });
        }

        Ok(records)
    }
}
