//! Timestamp utilities
//!
//! Spectrometers and the reporting database store wall-clock time without a
//! zone. These helpers interpret such values as local time.

use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};

/// Wall-clock layouts accepted from sources, most specific first
const WALL_TIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
];

/// Layout written to the reporting database (`DATETIME` without zone)
pub const REPORTING_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Parse a zone-less wall-clock string as local time
///
/// RFC3339 strings with an explicit offset are also accepted. Returns `None`
/// for anything unparseable or for a wall time skipped by a DST transition.
pub fn parse_local_wall_time(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(with_offset) = DateTime::parse_from_rfc3339(raw) {
        return Some(with_offset.with_timezone(&Utc));
    }

    WALL_TIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .and_then(local_to_utc)
}

/// Interpret a naive timestamp as local wall time
///
/// Ambiguous times (DST fall-back) resolve to the earlier instant.
pub fn local_to_utc(naive: NaiveDateTime) -> Option<DateTime<Utc>> {
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|t| t.with_timezone(&Utc))
}

/// Format an instant as local wall time for the reporting database
pub fn format_local_wall_time(instant: &DateTime<Utc>) -> String {
    instant
        .with_timezone(&Local)
        .format(REPORTING_TIME_FORMAT)
        .to_string()
}
