//! Reporting forwarder
//!
//! Every merge hands its full record list to a background writer that
//! appends samples to the reporting database. The writer only inserts rows
//! newer than what the database already holds for the same source, so the
//! heavily overlapping batches of successive merges are written once.
//!
//! Failures here never reach HTTP clients; they are logged and the next
//! merge retries with a fresh batch.

use async_trait::async_trait;
use chrono::{DateTime, SubsecRound, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use spectro_common::config::{is_valid_identifier, ReportingConfig};
use spectro_common::time::{format_local_wall_time, parse_local_wall_time};
use spectro_common::{ElementOrder, SampleRecord};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::PersistenceError;

/// One sample reshaped for the reporting table
#[derive(Debug, Clone, PartialEq)]
pub struct ReportRow {
    pub time_stamp: DateTime<Utc>,
    pub sample_name: String,
    pub furnace: String,
    pub source_id: u32,
    /// Present elements in reporting order
    pub values: Vec<(String, f64)>,
}

impl ReportRow {
    /// Reshape a merged record; records with unknown time are not reportable
    pub fn from_record(record: &SampleRecord, order: &ElementOrder) -> Option<Self> {
        let time_stamp = record.time_stamp?;

        let values = if record.element_values.is_empty() {
            let mut filled = record.clone();
            filled.fill_values_from_results();
            order.select(&filled.element_values)
        } else {
            order.select(&record.element_values)
        };

        Some(Self {
            time_stamp,
            sample_name: record.sample_name.clone(),
            furnace: record.furnace.clone(),
            source_id: record.source_id,
            values,
        })
    }

    /// Rows for every reportable record
    pub fn from_records(records: &[SampleRecord], order: &ElementOrder) -> Vec<Self> {
        records
            .iter()
            .filter_map(|r| Self::from_record(r, order))
            .collect()
    }
}

/// Destination of reporting rows
#[async_trait]
pub trait ReportingSink: Send + Sync {
    /// Insert rows newer than the stored watermark of their source
    ///
    /// Returns the number of inserted rows.
    async fn insert_newer_than_watermark(&self, rows: &[ReportRow]) -> Result<usize, PersistenceError>;

    /// Release the underlying connection
    async fn close(&self) -> Result<(), PersistenceError>;
}

/// Reporting table in a SQL database
pub struct SqlReportingSink {
    pool: SqlitePool,
    table: String,
    order: ElementOrder,
}

impl SqlReportingSink {
    /// Connect to the configured reporting database
    pub async fn connect(config: &ReportingConfig, order: ElementOrder) -> Result<Self, PersistenceError> {
        let options = SqliteConnectOptions::from_str(&config.database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(2)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await?;

        let sink = Self::with_pool(pool, &config.table, order)?;
        if config.create_table {
            sink.ensure_table().await?;
        }

        info!(table = %sink.table, "Connected to reporting database");
        Ok(sink)
    }

    /// Wrap an existing pool, validating every identifier spliced into SQL
    pub fn with_pool(pool: SqlitePool, table: &str, order: ElementOrder) -> Result<Self, PersistenceError> {
        if !is_valid_identifier(table) {
            return Err(PersistenceError::InvalidIdentifier(table.to_string()));
        }
        if let Some(bad) = order.symbols().iter().find(|s| !is_valid_identifier(s)) {
            return Err(PersistenceError::InvalidIdentifier(bad.clone()));
        }

        Ok(Self {
            pool,
            table: table.to_string(),
            order,
        })
    }

    /// Create the reporting table when it does not exist
    pub async fn ensure_table(&self) -> Result<(), PersistenceError> {
        let element_columns: String = self
            .order
            .symbols()
            .iter()
            .map(|symbol| format!(", \"{}\" REAL", symbol))
            .collect();

        let sql = format!(
            "CREATE TABLE IF NOT EXISTS \"{}\" (\
                id INTEGER PRIMARY KEY AUTOINCREMENT, \
                time_stamp TEXT NOT NULL, \
                sample_name TEXT NOT NULL, \
                furnace TEXT NOT NULL, \
                spectro INTEGER NOT NULL{})",
            self.table, element_columns
        );
        debug!(sql = %sql, "Ensuring reporting table");
        sqlx::query(&sql).execute(&self.pool).await?;
        Ok(())
    }

    async fn watermark(
        &self,
        conn: &mut sqlx::SqliteConnection,
        source_id: u32,
    ) -> Result<Option<DateTime<Utc>>, PersistenceError> {
        let sql = format!("SELECT MAX(time_stamp) FROM \"{}\" WHERE spectro = ?", self.table);
        let latest: Option<String> = sqlx::query_scalar(&sql)
            .bind(source_id as i64)
            .fetch_one(&mut *conn)
            .await?;

        let watermark = latest.as_deref().and_then(parse_local_wall_time);
        debug!(source_id, watermark = ?latest, "Reporting watermark");
        Ok(watermark)
    }

    fn insert_sql(&self, row: &ReportRow) -> Result<String, PersistenceError> {
        let mut columns = String::from("time_stamp, sample_name, furnace, spectro");
        let mut placeholders = String::from("?, ?, ?, ?");
        for (element, _) in &row.values {
            if !self.order.contains(element) || !is_valid_identifier(element) {
                return Err(PersistenceError::InvalidIdentifier(element.clone()));
            }
            columns.push_str(&format!(", \"{}\"", element));
            placeholders.push_str(", ?");
        }

        Ok(format!(
            "INSERT INTO \"{}\" ({}) VALUES ({})",
            self.table, columns, placeholders
        ))
    }
}

#[async_trait]
impl ReportingSink for SqlReportingSink {
    async fn insert_newer_than_watermark(&self, rows: &[ReportRow]) -> Result<usize, PersistenceError> {
        if rows.is_empty() {
            return Ok(0);
        }

        let mut ordered: Vec<&ReportRow> = rows.iter().collect();
        ordered.sort_by_key(|row| row.time_stamp);

        // Fixed per source for the whole batch
        let mut tx = self.pool.begin().await?;
        let mut watermarks: HashMap<u32, Option<DateTime<Utc>>> = HashMap::new();
        let mut inserted = 0usize;

        for row in ordered {
            let watermark = match watermarks.get(&row.source_id) {
                Some(w) => *w,
                None => {
                    let w = self.watermark(&mut *tx, row.source_id).await?;
                    watermarks.insert(row.source_id, w);
                    w
                }
            };

            // Stored precision is whole seconds
            let time_stamp = row.time_stamp.trunc_subsecs(0);
            if watermark.is_some_and(|w| time_stamp <= w) {
                continue;
            }

            let sql = self.insert_sql(row)?;
            debug!(sql = %sql, sample = %row.sample_name, "Inserting reporting row");

            let mut query = sqlx::query(&sql)
                .bind(format_local_wall_time(&time_stamp))
                .bind(&row.sample_name)
                .bind(&row.furnace)
                .bind(row.source_id as i64);
            for (_, value) in &row.values {
                query = query.bind(*value);
            }
            query.execute(&mut *tx).await?;
            inserted += 1;
        }

        tx.commit().await?;
        Ok(inserted)
    }

    async fn close(&self) -> Result<(), PersistenceError> {
        self.pool.close().await;
        Ok(())
    }
}

/// Cloneable submission side of the forwarder
#[derive(Clone)]
pub struct ForwarderHandle {
    tx: mpsc::Sender<Vec<ReportRow>>,
}

impl ForwarderHandle {
    /// Queue a batch without waiting
    ///
    /// Returns false when the batch was dropped (queue full or writer stopped).
    pub fn submit(&self, rows: Vec<ReportRow>) -> bool {
        if rows.is_empty() {
            return true;
        }
        match self.tx.try_send(rows) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(rows)) => {
                warn!("Reporting queue full, dropping batch of {} row(s)", rows.len());
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("Reporting writer stopped, batch not queued");
                false
            }
        }
    }
}

/// Background writer feeding a `ReportingSink`
pub struct ReportingForwarder {
    handle: ForwarderHandle,
    stop: CancellationToken,
    task: JoinHandle<Result<(), PersistenceError>>,
}

impl ReportingForwarder {
    pub fn spawn(sink: Arc<dyn ReportingSink>, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let stop = CancellationToken::new();
        let task = tokio::spawn(run_writer(sink, rx, stop.clone()));

        Self {
            handle: ForwarderHandle { tx },
            stop,
            task,
        }
    }

    pub fn handle(&self) -> ForwarderHandle {
        self.handle.clone()
    }

    /// Stop accepting batches, write what is queued, and close the sink
    pub async fn shutdown(self) -> Result<(), PersistenceError> {
        self.stop.cancel();
        match self.task.await {
            Ok(result) => result,
            Err(e) => Err(PersistenceError::Worker(e.to_string())),
        }
    }
}

async fn write_batch(sink: &dyn ReportingSink, rows: Vec<ReportRow>) {
    match sink.insert_newer_than_watermark(&rows).await {
        Ok(0) => debug!("No new reporting rows in batch of {}", rows.len()),
        Ok(inserted) => info!("Inserted {} new row(s) into reporting database", inserted),
        Err(e) => error!("Reporting insert failed: {}", e),
    }
}

async fn run_writer(
    sink: Arc<dyn ReportingSink>,
    mut rx: mpsc::Receiver<Vec<ReportRow>>,
    stop: CancellationToken,
) -> Result<(), PersistenceError> {
    debug!("Reporting writer started");

    loop {
        tokio::select! {
            batch = rx.recv() => match batch {
                Some(rows) => write_batch(sink.as_ref(), rows).await,
                None => break,
            },
            _ = stop.cancelled() => {
                rx.close();
                while let Some(rows) = rx.recv().await {
                    write_batch(sink.as_ref(), rows).await;
                }
                break;
            }
        }
    }

    debug!("Reporting writer stopping");
    sink.close().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, TimeZone};
    use spectro_common::ElementResult;
    use std::collections::BTreeMap;
    use std::sync::Mutex;
    use tempfile::TempDir;

    fn at(minute: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap() + ChronoDuration::minutes(minute)
    }

    fn row(name: &str, source_id: u32, minute: i64) -> ReportRow {
        ReportRow {
            time_stamp: at(minute),
            sample_name: name.to_string(),
            furnace: "F1".to_string(),
            source_id,
            values: vec![("C".to_string(), 3.4), ("Si".to_string(), 2.1)],
        }
    }

    async fn sink(dir: &TempDir) -> SqlReportingSink {
        let config = ReportingConfig {
            database_url: format!("sqlite://{}", dir.path().join("report.db").display()),
            table: "spectro_results".to_string(),
            create_table: true,
            queue_capacity: 4,
        };
        SqlReportingSink::connect(&config, ElementOrder::new(["C", "Si", "Mn"]).unwrap())
            .await
            .unwrap()
    }

    async fn stored(sink: &SqlReportingSink) -> Vec<(String, i64, Option<f64>)> {
        sqlx::query_as("SELECT sample_name, spectro, \"Mn\" FROM spectro_results ORDER BY id")
            .fetch_all(&sink.pool)
            .await
            .unwrap()
    }

    #[test]
    fn test_row_from_record_uses_reporting_order() {
        let order = ElementOrder::new(["Ni", "C", "Fe"]).unwrap();
        let record = SampleRecord {
            sample_name: "S1".to_string(),
            furnace: "F2".to_string(),
            time_stamp: Some(at(0)),
            source_id: 3,
            element_values: BTreeMap::from([
                ("C".to_string(), 3.4),
                ("Ni".to_string(), 0.04),
                ("Zr".to_string(), 0.01),
            ]),
            ..Default::default()
        };

        let row = ReportRow::from_record(&record, &order).unwrap();
        assert_eq!(row.source_id, 3);
        assert_eq!(
            row.values,
            vec![("Ni".to_string(), 0.04), ("C".to_string(), 3.4)]
        );
    }

    #[test]
    fn test_row_falls_back_to_display_slots() {
        let order = ElementOrder::new(["C", "Mn"]).unwrap();
        let record = SampleRecord {
            time_stamp: Some(at(0)),
            results: vec![ElementResult::new("Mn", 0.6), ElementResult::default()],
            ..Default::default()
        };
        let row = ReportRow::from_record(&record, &order).unwrap();
        assert_eq!(row.values, vec![("Mn".to_string(), 0.6)]);
    }

    #[test]
    fn test_unknown_time_not_reportable() {
        let record = SampleRecord::default();
        assert!(ReportRow::from_record(&record, &ElementOrder::default_reporting()).is_none());
    }

    #[tokio::test]
    async fn test_insert_is_idempotent_across_overlapping_batches() {
        let dir = TempDir::new().unwrap();
        let sink = sink(&dir).await;

        // Newest first, as merges produce them
        let first = vec![row("s2", 1, 2), row("s1", 1, 1)];
        assert_eq!(sink.insert_newer_than_watermark(&first).await.unwrap(), 2);

        let second = vec![row("s3", 1, 3), row("s2", 1, 2), row("s1", 1, 1)];
        assert_eq!(sink.insert_newer_than_watermark(&second).await.unwrap(), 1);
        assert_eq!(sink.insert_newer_than_watermark(&second).await.unwrap(), 0);

        let names: Vec<_> = stored(&sink).await.into_iter().map(|r| r.0).collect();
        assert_eq!(names, vec!["s1", "s2", "s3"]);
    }

    #[tokio::test]
    async fn test_same_second_samples_all_inserted() {
        let dir = TempDir::new().unwrap();
        let sink = sink(&dir).await;

        let batch = vec![row("s1", 1, 0), row("s2", 1, 0)];
        assert_eq!(sink.insert_newer_than_watermark(&batch).await.unwrap(), 2);
        // Stored MAX now equals their timestamp, so a repeat adds nothing
        assert_eq!(sink.insert_newer_than_watermark(&batch).await.unwrap(), 0);

        let mut names: Vec<_> = stored(&sink).await.into_iter().map(|r| r.0).collect();
        names.sort();
        assert_eq!(names, vec!["s1", "s2"]);
    }

    #[tokio::test]
    async fn test_watermark_is_per_source() {
        let dir = TempDir::new().unwrap();
        let sink = sink(&dir).await;

        sink.insert_newer_than_watermark(&[row("a5", 1, 5)]).await.unwrap();
        // Older than source 1's latest but new for source 2
        let inserted = sink
            .insert_newer_than_watermark(&[row("b3", 2, 3), row("a4", 1, 4)])
            .await
            .unwrap();
        assert_eq!(inserted, 1);

        let rows = stored(&sink).await;
        assert_eq!(rows[1].0, "b3");
        assert_eq!(rows[1].1, 2);
    }

    #[tokio::test]
    async fn test_missing_elements_stored_as_null() {
        let dir = TempDir::new().unwrap();
        let sink = sink(&dir).await;
        sink.insert_newer_than_watermark(&[row("s1", 1, 1)]).await.unwrap();
        assert_eq!(stored(&sink).await[0].2, None);
    }

    #[tokio::test]
    async fn test_invalid_table_rejected() {
        let pool = SqlitePoolOptions::new().connect("sqlite::memory:").await.unwrap();
        let result = SqlReportingSink::with_pool(pool, "results; DROP", ElementOrder::default_reporting());
        assert!(matches!(result, Err(PersistenceError::InvalidIdentifier(_))));
    }

    #[derive(Default)]
    struct RecordingSink {
        batches: Mutex<Vec<usize>>,
        closed: Mutex<bool>,
    }

    #[async_trait]
    impl ReportingSink for RecordingSink {
        async fn insert_newer_than_watermark(&self, rows: &[ReportRow]) -> Result<usize, PersistenceError> {
            self.batches.lock().unwrap().push(rows.len());
            Ok(rows.len())
        }

        async fn close(&self) -> Result<(), PersistenceError> {
            *self.closed.lock().unwrap() = true;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_forwarder_drains_on_shutdown() {
        let sink = Arc::new(RecordingSink::default());
        let forwarder = ReportingForwarder::spawn(sink.clone(), 4);
        let handle = forwarder.handle();

        assert!(handle.submit(vec![row("a", 1, 1)]));
        assert!(handle.submit(vec![row("b", 1, 2), row("c", 1, 3)]));
        forwarder.shutdown().await.unwrap();

        assert_eq!(*sink.batches.lock().unwrap(), vec![1, 2]);
        assert!(*sink.closed.lock().unwrap());
        assert!(!handle.submit(vec![row("d", 1, 4)]));
    }

    #[tokio::test]
    async fn test_full_queue_drops_batch() {
        struct BlockedSink(tokio::sync::Semaphore);

        #[async_trait]
        impl ReportingSink for BlockedSink {
            async fn insert_newer_than_watermark(&self, rows: &[ReportRow]) -> Result<usize, PersistenceError> {
                let _permit = self.0.acquire().await;
                Ok(rows.len())
            }

            async fn close(&self) -> Result<(), PersistenceError> {
                Ok(())
            }
        }

        let sink = Arc::new(BlockedSink(tokio::sync::Semaphore::new(0)));
        let forwarder = ReportingForwarder::spawn(sink.clone(), 1);
        let handle = forwarder.handle();

        let mut accepted = 0;
        for i in 0..5 {
            if handle.submit(vec![row("x", 1, i)]) {
                accepted += 1;
            }
        }
        // At most one in the writer plus one queued
        assert!(accepted <= 2);
        assert!(accepted >= 1);

        sink.0.add_permits(10);
        forwarder.shutdown().await.unwrap();
    }

    #[test]
    fn test_empty_batch_accepted_without_queueing() {
        let (tx, _rx) = mpsc::channel(1);
        let handle = ForwarderHandle { tx };
        assert!(handle.submit(Vec::new()));
        assert!(handle.submit(vec![row("a", 1, 1)]));
        assert!(!handle.submit(vec![row("b", 1, 2)]));
    }
}
