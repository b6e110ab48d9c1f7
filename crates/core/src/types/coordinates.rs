//! Geographic coordinates and distance helpers.

use serde::{Deserialize, Serialize};

/// Mean Earth radius in kilometres.
const EARTH_RADIUS_KM: f64 = 6371.0;

/// Average walking pace used for walking-time estimates.
const WALKING_SPEED_KMH: f64 = 5.0;

/// Tunis city centre, used whenever no device position is available.
pub const TUNIS_CITY_CENTER: Coordinates = Coordinates {
    lat: 36.8065,
    lng: 10.1815,
};

/// A WGS84 latitude/longitude pair in decimal degrees.
///
/// Serialized as `{"lat": .., "lng": ..}`, the shape persisted in the
/// location cache.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    /// Latitude in degrees.
    pub lat: f64,
    /// Longitude in degrees.
    pub lng: f64,
}

impl Coordinates {
    /// Create a coordinate pair.
    #[must_use]
    pub const fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// Whether both components are finite and inside WGS84 bounds.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
    }

    /// Great-circle distance to `other` in kilometres (haversine).
    #[must_use]
    pub fn distance_km(&self, other: &Self) -> f64 {
        let d_lat = (other.lat - self.lat).to_radians();
        let d_lng = (other.lng - self.lng).to_radians();
        let a = (d_lat / 2.0).sin().powi(2)
            + self.lat.to_radians().cos()
                * other.lat.to_radians().cos()
                * (d_lng / 2.0).sin().powi(2);
        let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
        EARTH_RADIUS_KM * c
    }

    /// Key that groups positions within ~10 m, for memoising lookups.
    #[must_use]
    pub fn rounded_key(&self) -> String {
        format!("{:.4},{:.4}", self.lat, self.lng)
    }
}

/// Estimated walking time for `distance_km`, formatted as `"<n> mins"`.
#[must_use]
pub fn walking_time(distance_km: f64) -> String {
    let minutes = (distance_km / WALKING_SPEED_KMH * 60.0).round();
    format!("{minutes:.0} mins")
}

/// Human readable distance: metres below 1 km, one decimal km above.
///
/// Returns an empty string for a zero or negative distance.
#[must_use]
pub fn format_distance(distance_km: f64) -> String {
    if distance_km <= 0.0 || !distance_km.is_finite() {
        return String::new();
    }
    if distance_km < 1.0 {
        let metres = (distance_km * 1000.0).round();
        return format!("{metres:.0}m away");
    }
    format!("{distance_km:.1}km away")
}
