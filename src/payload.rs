//! Snapshot document and per-record decoding.
//!
//! The event store keeps payloads exactly as they were posted. Decoding
//! happens here, once per pass, and degrades per record: a bad entry is
//! skipped or zero-filled, never fails the batch. `ParseMode::Strict`
//! turns those degradations into errors for callers that want validation.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{DetectionId, GpsFix, InertialSample, SensorKind};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParseMode {
    /// Drop uncorrelatable records, read malformed axis values as `0.0`.
    #[default]
    Permissive,
    /// Reject the pass on the first record permissive mode would repair.
    Strict,
}

/// One complete read of the three event logs.
///
/// All three arrays are required: a document missing any of them is a
/// failed fetch and no part of it is processed.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    pub gps_log: Vec<Value>,
    pub accelerometer_log: Vec<Value>,
    pub gyroscope_log: Vec<Value>,
}

impl TelemetrySnapshot {
    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).context("invalid telemetry snapshot document")
    }

    pub fn from_slice(raw: &[u8]) -> Result<Self> {
        serde_json::from_slice(raw).context("invalid telemetry snapshot document")
    }

    pub fn decode(&self, mode: ParseMode) -> Result<DecodedLogs> {
        let mut out = DecodedLogs::default();

        for (idx, value) in self.gps_log.iter().enumerate() {
            match parse_gps_fix(value, mode).with_context(|| format!("gps_log[{idx}]"))? {
                Some(fix) => out.gps.push(fix),
                None => out.dropped_gps += 1,
            }
        }
        for (idx, value) in self.accelerometer_log.iter().enumerate() {
            match parse_inertial_sample(value, SensorKind::Accelerometer, mode)
                .with_context(|| format!("accelerometer_log[{idx}]"))?
            {
                Some(sample) => out.accelerometer.push(sample),
                None => out.dropped_inertial += 1,
            }
        }
        for (idx, value) in self.gyroscope_log.iter().enumerate() {
            match parse_inertial_sample(value, SensorKind::Gyroscope, mode)
                .with_context(|| format!("gyroscope_log[{idx}]"))?
            {
                Some(sample) => out.gyroscope.push(sample),
                None => out.dropped_inertial += 1,
            }
        }

        if out.dropped_gps > 0 || out.dropped_inertial > 0 {
            log::debug!(
                "snapshot decode dropped {} gps fixes and {} inertial samples",
                out.dropped_gps,
                out.dropped_inertial
            );
        }
        Ok(out)
    }
}

/// Typed view of a snapshot, in source order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DecodedLogs {
    pub gps: Vec<GpsFix>,
    pub accelerometer: Vec<InertialSample>,
    pub gyroscope: Vec<InertialSample>,
    pub dropped_gps: usize,
    pub dropped_inertial: usize,
}

/// Decode one `gps_log` entry.
///
/// `Ok(None)` means the entry cannot be placed on the map: it is not an
/// object, a coordinate is missing or non-numeric, or the id is empty.
pub fn parse_gps_fix(value: &Value, mode: ParseMode) -> Result<Option<GpsFix>> {
    let Some(obj) = value.as_object() else {
        return reject(mode, "gps entry must be a JSON object");
    };
    let (Some(latitude), Some(longitude)) = (opt_f64(obj, "latitude"), opt_f64(obj, "longitude"))
    else {
        return reject(mode, "gps entry needs numeric latitude and longitude");
    };
    let Some(detection_id) = DetectionId::new(opt_string(obj, "detection_id")) else {
        return reject(mode, "gps entry has no detection_id");
    };
    Ok(Some(GpsFix {
        detection_id,
        latitude,
        longitude,
    }))
}

/// Decode one entry of an inertial log.
///
/// The entry's own `type` decides its kind, whichever log it was read
/// from. Entries without a recognised `type` are kept with no kind.
pub fn parse_inertial_sample(
    value: &Value,
    log_kind: SensorKind,
    mode: ParseMode,
) -> Result<Option<InertialSample>> {
    let Some(obj) = value.as_object() else {
        return reject(mode, "sensor entry must be a JSON object");
    };
    let Some(detection_id) = DetectionId::new(opt_string(obj, "detection_id")) else {
        return reject(mode, "sensor entry has no detection_id");
    };

    let kind = SensorKind::parse(&opt_string(obj, "type"));
    if mode == ParseMode::Strict && kind != Some(log_kind) {
        return Err(match kind {
            Some(kind) => anyhow!("{} entry found in {} log", kind, log_kind),
            None => anyhow!("sensor entry type must be \"{}\"", log_kind),
        });
    }

    let axis = |key: &str| -> Result<f64> {
        match opt_f64(obj, key) {
            Some(v) => Ok(v),
            None if mode == ParseMode::Strict => Err(anyhow!("sensor axis {key} must be a number")),
            None => Ok(0.0),
        }
    };

    Ok(Some(InertialSample {
        kind,
        detection_id,
        x: axis("x")?,
        y: axis("y")?,
        z: axis("z")?,
    }))
}

fn reject<T>(mode: ParseMode, reason: &str) -> Result<Option<T>> {
    match mode {
        ParseMode::Permissive => Ok(None),
        ParseMode::Strict => Err(anyhow!("{reason}")),
    }
}

/// Missing and `null` read as the empty string; scalars read as their text.
fn opt_string(obj: &Map<String, Value>, key: &str) -> String {
    match obj.get(key) {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// Numbers and numeric strings read as finite `f64`; anything else is `None`.
fn opt_f64(obj: &Map<String, Value>, key: &str) -> Option<f64> {
    let v = match obj.get(key)? {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    v.is_finite().then_some(v)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn gps_fix_requires_numeric_coordinates() {
        let missing = json!({"detection_id": "1", "latitude": 1.0});
        assert_eq!(parse_gps_fix(&missing, ParseMode::Permissive).unwrap(), None);

        let text = json!({"detection_id": "1", "latitude": "north", "longitude": 2.0});
        assert_eq!(parse_gps_fix(&text, ParseMode::Permissive).unwrap(), None);

        let numeric_string = json!({"detection_id": "1", "latitude": "1.5", "longitude": 2.0});
        let fix = parse_gps_fix(&numeric_string, ParseMode::Permissive)
            .unwrap()
            .expect("numeric strings are coordinates");
        assert_eq!(fix.latitude, 1.5);
    }

    #[test]
    fn gps_fix_without_id_is_dropped() {
        for value in [
            json!({"latitude": 1.0, "longitude": 2.0}),
            json!({"detection_id": "", "latitude": 1.0, "longitude": 2.0}),
            json!({"detection_id": null, "latitude": 1.0, "longitude": 2.0}),
        ] {
            assert_eq!(parse_gps_fix(&value, ParseMode::Permissive).unwrap(), None);
        }
    }

    #[test]
    fn numeric_detection_id_reads_as_text() {
        let value = json!({"detection_id": 12, "latitude": 1.0, "longitude": 2.0});
        let fix = parse_gps_fix(&value, ParseMode::Permissive).unwrap().unwrap();
        assert_eq!(fix.detection_id.as_str(), "12");
    }

    #[test]
    fn malformed_axes_default_to_zero() {
        let value = json!({"type": "accelerometer", "detection_id": "4", "x": "bad", "z": null});
        let sample = parse_inertial_sample(&value, SensorKind::Accelerometer, ParseMode::Permissive)
            .unwrap()
            .unwrap();
        assert_eq!(sample.axes(), [0.0, 0.0, 0.0]);
    }

    #[test]
    fn entry_type_wins_over_log_kind() {
        let value = json!({"type": "gyroscope", "detection_id": "4", "x": 1.0, "y": 2.0, "z": 3.0});
        let sample = parse_inertial_sample(&value, SensorKind::Accelerometer, ParseMode::Permissive)
            .unwrap()
            .unwrap();
        assert_eq!(sample.kind, Some(SensorKind::Gyroscope));
    }

    #[test]
    fn untyped_entries_keep_no_kind() {
        for value in [
            json!({"detection_id": "4", "x": 40.0}),
            json!({"type": "magnetometer", "detection_id": "4", "x": 40.0}),
            json!({"type": "Gyroscope", "detection_id": "4", "x": 40.0}),
        ] {
            let sample = parse_inertial_sample(&value, SensorKind::Gyroscope, ParseMode::Permissive)
                .unwrap()
                .expect("untyped entries still correlate");
            assert_eq!(sample.kind, None);
            assert_eq!(sample.detection_id.as_str(), "4");

            assert!(parse_inertial_sample(&value, SensorKind::Gyroscope, ParseMode::Strict).is_err());
        }
    }

    #[test]
    fn strict_mode_rejects_what_permissive_repairs() {
        let value = json!({"type": "accelerometer", "detection_id": "4", "x": "bad", "y": 0, "z": 0});
        let err = parse_inertial_sample(&value, SensorKind::Accelerometer, ParseMode::Strict)
            .unwrap_err();
        assert!(format!("{err}").contains("axis x"));

        let no_id = json!({"latitude": 1.0, "longitude": 2.0});
        assert!(parse_gps_fix(&no_id, ParseMode::Strict).is_err());
    }

    #[test]
    fn snapshot_requires_all_three_logs() {
        let err = TelemetrySnapshot::from_json(r#"{"gps_log": [], "accelerometer_log": []}"#)
            .unwrap_err();
        assert!(format!("{err:#}").contains("gyroscope_log"));
    }

    #[test]
    fn decode_counts_dropped_records() {
        let snapshot = TelemetrySnapshot {
            gps_log: vec![
                json!({"detection_id": "1", "latitude": 1.0, "longitude": 2.0}),
                json!("not an object"),
            ],
            accelerometer_log: vec![json!({"type": "accelerometer", "x": 1.0})],
            gyroscope_log: vec![],
        };
        let decoded = snapshot.decode(ParseMode::Permissive).unwrap();
        assert_eq!(decoded.gps.len(), 1);
        assert_eq!(decoded.dropped_gps, 1);
        assert_eq!(decoded.dropped_inertial, 1);

        let err = snapshot.decode(ParseMode::Strict).unwrap_err();
        assert!(format!("{err:#}").contains("gps_log[1]"));
    }
}
