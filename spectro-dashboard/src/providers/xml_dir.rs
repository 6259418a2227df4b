//! XML result directory provider
//!
//! Spectrometers of the newer generation export one XML file per sample
//! into a directory. File names embed the measurement date, so descending
//! lexical order of names is newest-first order of samples.
//!
//! Only files whose name contains `spectro` and ends in `.xml` are read.
//! Directory and file I/O runs on the blocking pool.

use async_trait::async_trait;
use serde::Deserialize;
use spectro_common::sample::furnace_key;
use spectro_common::time::parse_local_wall_time;
use spectro_common::{ElementOrder, FurnaceQuery, SampleRecord};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::{ProviderKind, SourceProvider};
use crate::error::SourceError;

const SAMPLE_ID_NAME: &str = "Sample ID";
// Operators enter the furnace into the Quality field
const FURNACE_ID_NAME: &str = "Quality";
const REPORTED_STAT_TYPE: &str = "Reported";

/// Root of a result file; the root element name varies between firmware versions
#[derive(Debug, Default, Deserialize)]
struct ResultFileXml {
    #[serde(rename = "SampleResult", default)]
    sample_results: Vec<SampleResultXml>,
}

#[derive(Debug, Default, Deserialize)]
struct SampleResultXml {
    #[serde(rename = "@RecalculationDateTime", default)]
    timestamp: String,

    #[serde(rename = "SampleIDs", default)]
    sample_ids: SampleIdsXml,

    #[serde(rename = "MeasurementStatistics", default)]
    statistics: MeasurementStatisticsXml,
}

#[derive(Debug, Default, Deserialize)]
struct SampleIdsXml {
    #[serde(rename = "SampleID", default)]
    ids: Vec<SampleIdXml>,
}

#[derive(Debug, Default, Deserialize)]
struct SampleIdXml {
    #[serde(rename = "IDName", default)]
    name: String,
    #[serde(rename = "IDValue", default)]
    value: String,
}

#[derive(Debug, Default, Deserialize)]
struct MeasurementStatisticsXml {
    #[serde(rename = "Measurement", default)]
    measurements: Vec<MeasurementXml>,
}

#[derive(Debug, Default, Deserialize)]
struct MeasurementXml {
    #[serde(rename = "Elements", default)]
    elements: ElementsXml,
}

#[derive(Debug, Default, Deserialize)]
struct ElementsXml {
    #[serde(rename = "Element", default)]
    elements: Vec<ElementXml>,
}

#[derive(Debug, Default, Deserialize)]
struct ElementXml {
    #[serde(rename = "@ElementName", default)]
    name: String,
    #[serde(rename = "ElementResult", default)]
    results: Vec<ElementResultXml>,
}

#[derive(Debug, Default, Deserialize)]
struct ElementResultXml {
    #[serde(rename = "@StatType", default)]
    stat_type: String,
    #[serde(rename = "ResultValue", default)]
    value: String,
}

impl SampleResultXml {
    fn find_id(&self, id_name: &str) -> String {
        self.sample_ids
            .ids
            .iter()
            .find(|id| id.name == id_name)
            .map(|id| id.value.trim().to_string())
            .unwrap_or_default()
    }

    /// Reported values of the first statistics measurement
    fn reported_values(&self) -> BTreeMap<String, f64> {
        let mut values = BTreeMap::new();
        let Some(measurement) = self.statistics.measurements.first() else {
            return values;
        };

        for element in &measurement.elements.elements {
            let reported = element
                .results
                .iter()
                .find(|r| r.stat_type == REPORTED_STAT_TYPE)
                .and_then(|r| r.value.trim().parse::<f64>().ok());

            if let Some(value) = reported {
                values.entry(element.name.trim().to_string()).or_insert(value);
            }
        }
        values
    }

    fn into_record(self, source_id: u32, display_order: &ElementOrder) -> SampleRecord {
        let element_values = self.reported_values();
        SampleRecord {
            sample_name: self.find_id(SAMPLE_ID_NAME),
            furnace: self.find_id(FURNACE_ID_NAME),
            time_stamp: parse_local_wall_time(&self.timestamp),
            results: display_order.place(&element_values),
            source_id,
            element_values,
        }
    }
}

/// Result files in `dir`, newest first
fn scan_result_files(dir: &Path) -> Result<Vec<PathBuf>, SourceError> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
        .map_err(|e| SourceError::Unavailable(format!("{}: {}", dir.display(), e)))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.is_file()
                && path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.contains("spectro") && n.ends_with(".xml"))
        })
        .collect();

    files.sort_by(|a, b| b.file_name().cmp(&a.file_name()));
    Ok(files)
}

fn parse_result_file(path: &Path) -> Result<Vec<SampleResultXml>, SourceError> {
    let bytes = std::fs::read(path)
        .map_err(|e| SourceError::Unavailable(format!("{}: {}", path.display(), e)))?;
    let text = String::from_utf8_lossy(&bytes);
    let text = text.trim_start_matches('\u{feff}');

    let file: ResultFileXml = quick_xml::de::from_str(text)
        .map_err(|e| SourceError::Malformed(format!("{}: {}", path.display(), e)))?;
    Ok(file.sample_results)
}

/// Parse result files newest first until `limit` records are collected
///
/// Unreadable files are skipped with a warning; the fetch only fails when
/// every attempted file failed.
fn read_latest(
    dir: &Path,
    limit: usize,
    source_id: u32,
    display_order: &ElementOrder,
) -> Result<Vec<SampleRecord>, SourceError> {
    let files = scan_result_files(dir)?;
    let mut records = Vec::with_capacity(limit.min(files.len()));
    let mut attempted = 0usize;
    let mut last_error = None;

    for path in &files {
        if records.len() >= limit {
            break;
        }
        attempted += 1;
        match parse_result_file(path) {
            Ok(samples) => {
                for sample in samples {
                    if records.len() >= limit {
                        break;
                    }
                    records.push(sample.into_record(source_id, display_order));
                }
            }
            Err(e) => {
                warn!("Skipping result file: {}", e);
                last_error = Some(e);
            }
        }
    }

    if records.is_empty() && attempted > 0 {
        if let Some(e) = last_error {
            return Err(e);
        }
    }

    Ok(records)
}

/// Walk result files newest first until every requested furnace is found
fn read_furnace_latest(
    dir: &Path,
    query: &FurnaceQuery,
    source_id: u32,
) -> Result<Vec<SampleRecord>, SourceError> {
    let keys = query.keys();
    let mut found: HashMap<String, SampleRecord> = HashMap::with_capacity(keys.len());

    for path in scan_result_files(dir)? {
        if found.len() == keys.len() {
            break;
        }

        let samples = match parse_result_file(&path) {
            Ok(samples) => samples,
            Err(e) => {
                warn!("Skipping result file: {}", e);
                continue;
            }
        };

        for sample in samples {
            let key = furnace_key(&sample.find_id(FURNACE_ID_NAME));
            if !keys.contains(&key) {
                continue;
            }
            let Some(time_stamp) = parse_local_wall_time(&sample.timestamp) else {
                continue;
            };

            let candidate = SampleRecord {
                sample_name: sample.find_id(SAMPLE_ID_NAME),
                furnace: key.clone(),
                time_stamp: Some(time_stamp),
                source_id,
                ..Default::default()
            };
            if query.test_samples_only && !candidate.is_test_sample() {
                continue;
            }

            // A sample replaces the current pick unless it is older
            let replace = match found.get(&key) {
                Some(current) => current.time_stamp <= candidate.time_stamp,
                None => true,
            };
            if replace {
                found.insert(key, candidate);
            }
        }
    }

    Ok(keys.iter().filter_map(|key| found.remove(key)).collect())
}

pub struct XmlDirProvider {
    name: String,
    dir: PathBuf,
    source_id: u32,
    display_order: ElementOrder,
}

impl XmlDirProvider {
    pub fn new(dir: PathBuf, source_id: u32, display_order: ElementOrder) -> Self {
        Self {
            name: format!("xml-dir:{}", dir.display()),
            dir,
            source_id,
            display_order,
        }
    }
}

#[async_trait]
impl SourceProvider for XmlDirProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn source_id(&self) -> u32 {
        self.source_id
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::XmlDirectory
    }

    async fn fetch_batch(&self, limit: usize) -> Result<Vec<SampleRecord>, SourceError> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let dir = self.dir.clone();
        let source_id = self.source_id;
        let display_order = self.display_order.clone();

        let records = tokio::task::spawn_blocking(move || {
            read_latest(&dir, limit, source_id, &display_order)
        })
        .await
        .map_err(|e| SourceError::Unavailable(format!("XML reader task failed: {}", e)))??;

        debug!("{} returned {} record(s)", self.name, records.len());
        Ok(records)
    }

    async fn fetch_furnace_latest(
        &self,
        query: &FurnaceQuery,
    ) -> Result<Vec<SampleRecord>, SourceError> {
        if query.keys().is_empty() {
            return Ok(Vec::new());
        }

        let dir = self.dir.clone();
        let query = query.clone();
        let source_id = self.source_id;

        tokio::task::spawn_blocking(move || read_furnace_latest(&dir, &query, source_id))
            .await
            .map_err(|e| SourceError::Unavailable(format!("XML reader task failed: {}", e)))?
    }
}
