//! Pothole telemetry
//!
//! Core of the pothole collection pipeline: detections are reported by a
//! mobile client as three independent, append-only logs (GPS fixes,
//! accelerometer samples, gyroscope samples) correlated only by a shared
//! client-assigned `detection_id`. This crate stores those logs, reads them
//! back as a snapshot, and turns each snapshot into classified map markers.
//!
//! # Pipeline
//!
//! 1. **Decode**: raw log entries are parsed permissively (`payload`).
//!    Entries without a correlation id are dropped, malformed axis values
//!    read as `0.0`, fixes without numeric coordinates are skipped.
//! 2. **Aggregate**: inertial samples of both kinds are grouped by
//!    detection id (`aggregate`).
//! 3. **Classify**: each group is reduced to a peak calibrated reading and
//!    mapped to Minor / Moderate / Severe (`classify`).
//! 4. **Assemble**: every GPS fix with inertial evidence yields one marker,
//!    in fix order (`markers`).
//!
//! Every pass is a pure function of one snapshot. Nothing is cached between
//! passes.
//!
//! # Module Structure
//!
//! - `storage`: event log store (SQLite, in-memory)
//! - `images`: detection snapshot images on disk
//! - `api`: `potholed` HTTP ingest/read server
//! - `client`: uploader, snapshot fetcher, detection counter
//! - `proximity`: nearby-marker warnings
//! - `config`: daemon configuration

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

pub mod aggregate;
pub mod api;
pub mod classify;
pub mod client;
pub mod config;
pub mod images;
pub mod markers;
pub mod payload;
pub mod proximity;
pub mod storage;

pub use aggregate::{aggregate, AggregatedGroup, Aggregation};
pub use classify::{SeverityAssessment, SeverityCategory, SeverityPolicy};
pub use markers::{assemble_markers, Marker, MarkerPipeline, MarkerSet};
pub use payload::{DecodedLogs, ParseMode, TelemetrySnapshot};
pub use proximity::{ProximityAlert, ProximityMonitor};
pub use storage::{EventLog, EventLogStore, InMemoryEventLogStore, SqliteEventLogStore};

// -------------------- Detection Ids --------------------

/// Client-assigned correlation key shared by every log entry of one detection.
///
/// Ids come from a single per-install counter, so two devices reporting to
/// the same server can collide. The id is treated as an opaque string and
/// compared exactly; `"5"` and `"05"` are different detections.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DetectionId(String);

impl DetectionId {
    /// Returns `None` for the empty string, which can never be correlated.
    pub fn new(raw: impl Into<String>) -> Option<Self> {
        let raw = raw.into();
        if raw.is_empty() {
            None
        } else {
            Some(Self(raw))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for DetectionId {
    type Error = anyhow::Error;

    fn try_from(raw: String) -> anyhow::Result<Self> {
        Self::new(raw).ok_or_else(|| anyhow::anyhow!("detection id cannot be empty"))
    }
}

impl From<DetectionId> for String {
    fn from(id: DetectionId) -> Self {
        id.0
    }
}

impl From<u64> for DetectionId {
    fn from(counter: u64) -> Self {
        Self(counter.to_string())
    }
}

impl fmt::Display for DetectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// -------------------- Telemetry Records --------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorKind {
    Accelerometer,
    Gyroscope,
}

impl SensorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SensorKind::Accelerometer => "accelerometer",
            SensorKind::Gyroscope => "gyroscope",
        }
    }

    /// Matches the wire `type` literal exactly (no case folding).
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "accelerometer" => Some(SensorKind::Accelerometer),
            "gyroscope" => Some(SensorKind::Gyroscope),
            _ => None,
        }
    }
}

impl fmt::Display for SensorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A location report tied to one detection.
///
/// Serializes to the location upload payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GpsFix {
    pub detection_id: DetectionId,
    pub latitude: f64,
    pub longitude: f64,
}

impl GpsFix {
    pub fn position(&self) -> GeoPoint {
        GeoPoint {
            latitude: self.latitude,
            longitude: self.longitude,
        }
    }
}

/// One accelerometer or gyroscope reading streamed during a detection window.
///
/// Readings are produced as `f32` on the device and widen losslessly; they
/// are held as `f64` because the classifier works in double precision.
/// Serializes to the sensor upload payload.
///
/// `kind` is `None` for entries whose `type` is missing or unrecognised.
/// Such a sample still correlates its detection but feeds neither peak.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InertialSample {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<SensorKind>,
    pub detection_id: DetectionId,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl InertialSample {
    pub fn axes(&self) -> [f64; 3] {
        [self.x, self.y, self.z]
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

pub(crate) fn now_s() -> anyhow::Result<u64> {
    Ok(SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs())
}
