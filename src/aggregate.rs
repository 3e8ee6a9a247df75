//! Groups inertial samples by detection id.

use std::collections::BTreeMap;

use crate::{DetectionId, InertialSample, SensorKind};

/// All inertial samples of one detection, both kinds interleaved. Samples
/// without a kind are members too but never returned by `of_kind`.
#[derive(Clone, Debug, PartialEq)]
pub struct AggregatedGroup {
    pub detection_id: DetectionId,
    pub samples: Vec<InertialSample>,
}

impl AggregatedGroup {
    pub fn of_kind(&self, kind: SensorKind) -> impl Iterator<Item = &InertialSample> + '_ {
        self.samples.iter().filter(move |s| s.kind == Some(kind))
    }

    pub fn accelerometer(&self) -> impl Iterator<Item = &InertialSample> + '_ {
        self.of_kind(SensorKind::Accelerometer)
    }

    pub fn gyroscope(&self) -> impl Iterator<Item = &InertialSample> + '_ {
        self.of_kind(SensorKind::Gyroscope)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Result of one aggregation pass. Every group holds at least one sample.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Aggregation {
    groups: BTreeMap<DetectionId, AggregatedGroup>,
}

impl Aggregation {
    pub fn get(&self, id: &DetectionId) -> Option<&AggregatedGroup> {
        self.groups.get(id)
    }

    pub fn contains(&self, id: &DetectionId) -> bool {
        self.groups.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Groups in detection id order.
    pub fn groups(&self) -> impl Iterator<Item = &AggregatedGroup> {
        self.groups.values()
    }

    fn push(&mut self, sample: &InertialSample) {
        self.groups
            .entry(sample.detection_id.clone())
            .or_insert_with(|| AggregatedGroup {
                detection_id: sample.detection_id.clone(),
                samples: Vec::new(),
            })
            .samples
            .push(sample.clone());
    }
}

/// Builds the detection id → samples mapping over both inertial logs.
///
/// Group membership does not depend on input order; only the order of
/// samples inside a group does, and nothing downstream reads it.
pub fn aggregate<'a, A, G>(accelerometer: A, gyroscope: G) -> Aggregation
where
    A: IntoIterator<Item = &'a InertialSample>,
    G: IntoIterator<Item = &'a InertialSample>,
{
    let mut out = Aggregation::default();
    for sample in accelerometer.into_iter().chain(gyroscope) {
        out.push(sample);
    }
    out
}
