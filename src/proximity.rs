//! Nearby-marker warnings for a moving device.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use crate::markers::{Marker, MarkerSet};
use crate::GeoPoint;

pub const DEFAULT_PROXIMITY_METERS: f64 = 20.0;
pub const DEFAULT_MAX_ACCURACY_METERS: f64 = 20.0;

/// Mean Earth radius (IUGG), metres.
const EARTH_RADIUS_M: f64 = 6_371_008.8;

/// Great-circle distance in metres.
pub fn haversine_distance_m(a: GeoPoint, b: GeoPoint) -> f64 {
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let dlat = lat2 - lat1;
    let dlng = (b.longitude - a.longitude).to_radians();
    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlng / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * h.sqrt().min(1.0).asin()
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProximityAlert {
    pub marker: Marker,
    pub distance_m: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProximityMonitor {
    /// Alert when strictly closer than this.
    pub threshold_m: f64,
    /// Positions reported with a worse horizontal accuracy are ignored.
    pub max_accuracy_m: f64,
}

impl Default for ProximityMonitor {
    fn default() -> Self {
        Self {
            threshold_m: DEFAULT_PROXIMITY_METERS,
            max_accuracy_m: DEFAULT_MAX_ACCURACY_METERS,
        }
    }
}

impl ProximityMonitor {
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("threshold_m", self.threshold_m),
            ("max_accuracy_m", self.max_accuracy_m),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(anyhow!("proximity {name} must be a positive number"));
            }
        }
        Ok(())
    }

    /// First marker, in marker order, within the threshold of `position`.
    pub fn check(
        &self,
        markers: &MarkerSet,
        position: GeoPoint,
        accuracy_m: f64,
    ) -> Option<ProximityAlert> {
        if accuracy_m.is_nan() || accuracy_m > self.max_accuracy_m {
            log::debug!("position accuracy {accuracy_m} m too coarse for proximity check");
            return None;
        }
        markers.iter().find_map(|marker| {
            let distance_m = haversine_distance_m(position, marker.position);
            (distance_m < self.threshold_m).then(|| ProximityAlert {
                marker: marker.clone(),
                distance_m,
            })
        })
    }
}
