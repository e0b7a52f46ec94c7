//! Geographic points and great-circle distance
//!
//! Distances are meters on a sphere with the mean Earth radius. Radius
//! bounds are inclusive.

use serde::{Deserialize, Serialize};

use crate::error::{CrowdError, Result};

/// Mean Earth radius in meters (IUGG)
pub const EARTH_RADIUS_M: f64 = 6_371_008.8;

/// Latitude/longitude pair in degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    /// Build a point, rejecting out-of-range or non-finite coordinates
    pub fn new(lat: f64, lng: f64) -> Result<Self> {
        let point = Self { lat, lng };
        point.validate()?;
        Ok(point)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.lat.is_finite() || !(-90.0..=90.0).contains(&self.lat) {
            return Err(CrowdError::Validation(format!("latitude out of range: {}", self.lat)));
        }
        if !self.lng.is_finite() || !(-180.0..=180.0).contains(&self.lng) {
            return Err(CrowdError::Validation(format!("longitude out of range: {}", self.lng)));
        }
        Ok(())
    }

    /// Haversine distance to `other` in meters
    pub fn distance_m(&self, other: &GeoPoint) -> f64 {
        let phi1 = self.lat.to_radians();
        let phi2 = other.lat.to_radians();
        let d_phi = (other.lat - self.lat).to_radians();
        let d_lambda = (other.lng - self.lng).to_radians();

        let a = (d_phi / 2.0).sin().powi(2)
            + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
        let c = 2.0 * a.sqrt().min(1.0).asin();
        EARTH_RADIUS_M * c
    }

    pub fn within(&self, center: &GeoPoint, radius_m: f64) -> bool {
        self.distance_m(center) <= radius_m
    }
}

/// Lat/lng rectangle enclosing every point within some radius of a center.
///
/// Used only to narrow candidates; the exact distance test runs afterwards.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lng: f64,
    pub max_lng: f64,
}

impl BoundingBox {
    pub fn around(center: &GeoPoint, radius_m: f64) -> Self {
        let d_lat = (radius_m / EARTH_RADIUS_M).to_degrees();
        let min_lat = (center.lat - d_lat).max(-90.0);
        let max_lat = (center.lat + d_lat).min(90.0);

        // Near the poles, or when the box would wrap the antimeridian,
        // fall back to the full longitude range.
        let cos_lat = min_lat.to_radians().cos().min(max_lat.to_radians().cos());
        if min_lat <= -90.0 || max_lat >= 90.0 || cos_lat <= f64::EPSILON {
            return Self { min_lat, max_lat, min_lng: -180.0, max_lng: 180.0 };
        }
        let d_lng = d_lat / cos_lat;
        let (min_lng, max_lng) = (center.lng - d_lng, center.lng + d_lng);
        if min_lng < -180.0 || max_lng > 180.0 {
            return Self { min_lat, max_lat, min_lng: -180.0, max_lng: 180.0 };
        }
        Self { min_lat, max_lat, min_lng, max_lng }
    }

    /// Smallest box covering both
    pub fn union(&self, other: &BoundingBox) -> Self {
        Self {
            min_lat: self.min_lat.min(other.min_lat),
            max_lat: self.max_lat.max(other.max_lat),
            min_lng: self.min_lng.min(other.min_lng),
            max_lng: self.max_lng.max(other.max_lng),
        }
    }

    pub fn contains(&self, point: &GeoPoint) -> bool {
        (self.min_lat..=self.max_lat).contains(&point.lat)
            && (self.min_lng..=self.max_lng).contains(&point.lng)
    }
}
