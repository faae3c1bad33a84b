//! Append-only detection log with CSV export.
//!
use anyhow::{anyhow, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use common::protocol::Detection;
use serde::Serialize;

/// Column order of the exported CSV.
pub const CSV_HEADER: [&str; 5] = ["DateTime", "Event", "Coordinates", "Quantity", "Confidence"];

/// Placeholder used when no fix has been received yet.
pub const NO_COORDINATES: &str = "N/A";

/// One logged detection.
///
/// `quantity` is always 1, same-class detections within one frame are not
/// aggregated.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogEntry {
    #[serde(rename = "DateTime")]
    pub datetime: String,
    #[serde(rename = "Event")]
    pub event: String,
    #[serde(rename = "Coordinates")]
    pub coordinates: String,
    #[serde(rename = "Quantity")]
    pub quantity: u32,
    #[serde(rename = "Confidence")]
    pub confidence: String,
}

impl LogEntry {
    pub fn from_detection(
        detection: &Detection,
        coordinates: String,
        datetime: DateTime<Utc>,
    ) -> Self {
        Self {
            datetime: datetime.to_rfc3339_opts(SecondsFormat::Millis, true),
            event: detection.class.clone(),
            coordinates,
            quantity: 1,
            confidence: format!("{:.2}", detection.score),
        }
    }
}

/// In-memory detection log, never truncated for the session.
///
/// Only HTTP views are limited to a tail; the exporter always serializes the
/// full sequence in insertion order.
#[derive(Debug, Default)]
pub struct DetectionLog {
    entries: Vec<LogEntry>,
}

impl DetectionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: LogEntry) {
        self.entries.push(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The most recent `n` entries in insertion order.
    pub fn tail(&self, n: usize) -> &[LogEntry] {
        &self.entries[self.entries.len().saturating_sub(n)..]
    }

    /// Serialize the full log as CSV with the fixed header.
    ///
    /// Fields containing delimiters are quoted instead of corrupting the row
    /// format.
    pub fn to_csv(&self) -> Result<String> {
        let mut writer = csv::Writer::from_writer(vec![]);
        writer.write_record(CSV_HEADER)?;

        for entry in &self.entries {
            let quantity = entry.quantity.to_string();
            writer.write_record([
                entry.datetime.as_str(),
                entry.event.as_str(),
                entry.coordinates.as_str(),
                quantity.as_str(),
                entry.confidence.as_str(),
            ])?;
        }

        let data = writer
            .into_inner()
            .map_err(|err| anyhow!("flushing csv writer: {err}"))?;
        Ok(String::from_utf8(data)?)
    }
}
