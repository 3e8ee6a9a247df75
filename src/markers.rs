//! Marker assembly: one classified marker per correlated GPS fix.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::aggregate::{aggregate, Aggregation};
use crate::classify::{SeverityCategory, SeverityPolicy};
use crate::payload::{DecodedLogs, ParseMode, TelemetrySnapshot};
use crate::{DetectionId, GeoPoint, GpsFix};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Marker {
    pub detection_id: DetectionId,
    pub position: GeoPoint,
    pub category: SeverityCategory,
    pub label: String,
    pub raw_max_accel: f64,
    pub raw_max_gyro: f64,
}

/// Markers of one pass, in GPS log order.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MarkerSet {
    markers: Vec<Marker>,
}

impl MarkerSet {
    /// The first emitted marker; the map recenters on it.
    pub fn camera_hint(&self) -> Option<&Marker> {
        self.markers.first()
    }

    pub fn markers(&self) -> &[Marker] {
        &self.markers
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Marker> {
        self.markers.iter()
    }

    pub fn len(&self) -> usize {
        self.markers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.markers.is_empty()
    }

    pub fn count(&self, category: SeverityCategory) -> usize {
        self.markers
            .iter()
            .filter(|m| m.category == category)
            .count()
    }

    pub fn into_vec(self) -> Vec<Marker> {
        self.markers
    }
}

impl<'a> IntoIterator for &'a MarkerSet {
    type Item = &'a Marker;
    type IntoIter = std::slice::Iter<'a, Marker>;

    fn into_iter(self) -> Self::IntoIter {
        self.markers.iter()
    }
}

/// Classifies each fix against its inertial group.
///
/// Fixes whose id has no group produce nothing: a detection without
/// inertial evidence is expected data sparsity, not a fault.
pub fn assemble_markers(
    gps: &[GpsFix],
    aggregation: &Aggregation,
    policy: &SeverityPolicy,
) -> MarkerSet {
    let mut markers = Vec::with_capacity(gps.len().min(aggregation.len()));
    for (idx, fix) in gps.iter().enumerate() {
        let Some(group) = aggregation.get(&fix.detection_id) else {
            log::debug!(
                "gps fix {} (detection {}) has no inertial samples; skipped",
                idx,
                fix.detection_id
            );
            continue;
        };
        let assessment = policy.assess(group);
        let label = assessment.label();
        log::debug!(
            "marker {}: {} (max_accel={}, max_gyro={})",
            idx,
            label,
            assessment.max_accel,
            assessment.max_gyro
        );
        markers.push(Marker {
            detection_id: fix.detection_id.clone(),
            position: fix.position(),
            category: assessment.category,
            label,
            raw_max_accel: assessment.max_accel,
            raw_max_gyro: assessment.max_gyro,
        });
    }
    MarkerSet { markers }
}

/// Snapshot in, markers out. Holds configuration only, no state between runs.
#[derive(Clone, Copy, Debug, Default)]
pub struct MarkerPipeline {
    policy: SeverityPolicy,
    mode: ParseMode,
}

impl MarkerPipeline {
    pub fn new(policy: SeverityPolicy) -> Self {
        Self {
            policy,
            mode: ParseMode::default(),
        }
    }

    pub fn with_mode(mut self, mode: ParseMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn policy(&self) -> &SeverityPolicy {
        &self.policy
    }

    pub fn run(&self, snapshot: &TelemetrySnapshot) -> Result<MarkerSet> {
        let logs = snapshot.decode(self.mode)?;
        Ok(self.assemble(&logs))
    }

    pub fn assemble(&self, logs: &DecodedLogs) -> MarkerSet {
        let aggregation = aggregate(&logs.accelerometer, &logs.gyroscope);
        let markers = assemble_markers(&logs.gps, &aggregation, &self.policy);
        log::info!(
            "classified {} markers from {} gps fixes and {} detection groups",
            markers.len(),
            logs.gps.len(),
            aggregation.len()
        );
        markers
    }
}
