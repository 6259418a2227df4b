//! Sample record data model
//!
//! A `SampleRecord` is one spectrometer measurement event. The JSON shape is
//! the wire format of `GET /results` and `GET /lastfurnaceresults`, and is
//! also what a remote peer instance returns, so decoding must accept what
//! encoding produces.

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// One element measurement in a display slot
///
/// An empty slot (`element == ""`, `value == 0.0`) means "not measured".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ElementResult {
    #[serde(default)]
    pub element: String,
    #[serde(default)]
    pub value: f64,
}

impl ElementResult {
    pub fn new(element: impl Into<String>, value: f64) -> Self {
        Self {
            element: element.into(),
            value,
        }
    }

    /// True when this slot holds no measurement
    pub fn is_empty(&self) -> bool {
        self.element.is_empty()
    }
}

/// One spectrometer measurement event
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SampleRecord {
    /// Physical sample identifier (may be empty for malformed source data)
    #[serde(default, alias = "id")]
    pub sample_name: String,

    /// Furnace/batch identifier (may be empty)
    #[serde(default)]
    pub furnace: String,

    /// Time the measurement was finalized; `None` means unknown and sorts last
    #[serde(default, deserialize_with = "deserialize_time_stamp")]
    pub time_stamp: Option<DateTime<Utc>>,

    /// Element results positioned by the configured display order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub results: Vec<ElementResult>,

    /// Provider that produced this record (selects the reporting `spectro` column)
    #[serde(skip)]
    pub source_id: u32,

    /// Raw symbol -> value map, only used by the reporting path
    #[serde(skip)]
    pub element_values: BTreeMap<String, f64>,
}

impl SampleRecord {
    /// Whether the sample name follows the "test sample" convention (trailing `T`)
    pub fn is_test_sample(&self) -> bool {
        self.sample_name.ends_with(&['T', 't'][..])
    }

    /// Rebuild `element_values` from the filled display slots
    ///
    /// Used for records that arrive without a raw value map (remote peers).
    pub fn fill_values_from_results(&mut self) {
        for slot in self.results.iter().filter(|r| !r.is_empty()) {
            self.element_values
                .entry(slot.element.clone())
                .or_insert(slot.value);
        }
    }
}

/// Ordering used for merged batches: newest first, unknown timestamps last
pub fn newest_first(a: &SampleRecord, b: &SampleRecord) -> Ordering {
    b.time_stamp.cmp(&a.time_stamp)
}

/// Normalized furnace identifier used for lookups
pub fn furnace_key(furnace: &str) -> String {
    furnace.trim().to_uppercase()
}

/// Request for the latest sample of each listed furnace
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FurnaceQuery {
    pub furnaces: Vec<String>,
    /// Only consider samples whose name ends in `T`
    pub test_samples_only: bool,
}

impl FurnaceQuery {
    pub fn new(furnaces: Vec<String>, test_samples_only: bool) -> Self {
        Self {
            furnaces,
            test_samples_only,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.furnaces.is_empty()
    }

    /// Normalized keys of the requested furnaces, duplicates removed, request order kept
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = Vec::with_capacity(self.furnaces.len());
        for key in self.furnaces.iter().map(|f| furnace_key(f)) {
            if !key.is_empty() && !keys.contains(&key) {
                keys.push(key);
            }
        }
        keys
    }
}

/// Accepts RFC3339 strings, `null`, or a missing field.
///
/// Peers written against older builds send the zero time
/// (`0001-01-01T00:00:00Z`) for unknown timestamps; that decodes to `None`.
fn deserialize_time_stamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    let Some(raw) = raw else {
        return Ok(None);
    };
    if raw.trim().is_empty() {
        return Ok(None);
    }

    let parsed = DateTime::parse_from_rfc3339(raw.trim())
        .map_err(|e| serde::de::Error::custom(format!("invalid time_stamp '{}': {}", raw, e)))?
        .with_timezone(&Utc);

    if parsed.year() <= 1 {
        return Ok(None);
    }
    Ok(Some(parsed))
}
