use crate::config::AttendanceConfig;
use crate::error::attendance_rejection::AttendanceRejection;

const EARTH_RADIUS_KM: f64 = 6371.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

/// Great-circle distance in kilometres (haversine formula).
pub fn haversine_km(from: Coordinates, to: Coordinates) -> f64 {
    let lat1 = from.latitude.to_radians();
    let lat2 = to.latitude.to_radians();
    let delta_lat = (to.latitude - from.latitude).to_radians();
    let delta_lon = (to.longitude - from.longitude).to_radians();

    let a = (delta_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (delta_lon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * a.sqrt().atan2((1.0 - a).sqrt())
}

/// Proximity check against the campus reference point.
#[derive(Debug, Clone, Copy)]
pub struct CampusFence {
    pub campus: Coordinates,
    pub max_distance_km: f64,
}

impl CampusFence {
    pub fn from_config(config: &AttendanceConfig) -> Self {
        Self {
            campus: Coordinates {
                latitude: config.campus_latitude,
                longitude: config.campus_longitude,
            },
            max_distance_km: config.max_distance_km,
        }
    }

    /// Returns the measured distance when the scan is close enough. A distance
    /// that cannot be measured (non-finite input) counts as out of range.
    pub fn check(&self, scan: Coordinates) -> Result<f64, AttendanceRejection> {
        let distance_km = haversine_km(self.campus, scan);
        if !distance_km.is_finite() || distance_km > self.max_distance_km {
            return Err(AttendanceRejection::OutOfRange {
                distance_km,
                max_distance_km: self.max_distance_km,
            });
        }
        Ok(distance_km)
    }

    /// Only applies when both coordinates were supplied; partial or absent
    /// positions skip the check.
    pub fn check_optional(&self, latitude: Option<f64>, longitude: Option<f64>) -> Result<Option<f64>, AttendanceRejection> {
        match (latitude, longitude) {
            (Some(latitude), Some(longitude)) => self.check(Coordinates { latitude, longitude }).map(Some),
            _ => Ok(None),
        }
    }
}
