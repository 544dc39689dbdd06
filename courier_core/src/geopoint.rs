use serde::{Deserialize, Serialize};
use thiserror::Error;

const EARTH_RADIUS: f64 = 6_371_000.0;

#[derive(Debug, Error)]
pub enum CoordinateError {
    #[error("coordinate out of range: lat {lat}, lng {lng}")]
    OutOfRange { lat: f64, lng: f64 },
}

/// A WGS-84 position in degrees. No unit conversion happens internally.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl Into<[f64; 2]> for &GeoPoint {
    fn into(self) -> [f64; 2] {
        [self.lng, self.lat]
    }
}

impl Into<geo_types::Point> for &GeoPoint {
    fn into(self) -> geo_types::Point {
        geo_types::Point::new(self.lng, self.lat)
    }
}

impl GeoPoint {
    pub fn new(lat: f64, lng: f64) -> Self {
        GeoPoint { lat, lng }
    }

    pub fn validated(lat: f64, lng: f64) -> Result<Self, CoordinateError> {
        let point = GeoPoint { lat, lng };
        point.validate()?;
        Ok(point)
    }

    pub fn validate(&self) -> Result<(), CoordinateError> {
        if !self.lat.is_finite()
            || !self.lng.is_finite()
            || self.lat.abs() > 90.0
            || self.lng.abs() > 180.0
        {
            return Err(CoordinateError::OutOfRange {
                lat: self.lat,
                lng: self.lng,
            });
        }

        Ok(())
    }

    pub fn haversine_distance(&self, other: &GeoPoint) -> f64 {
        let lat1 = self.lat.to_radians();
        let lng1 = self.lng.to_radians();
        let lat2 = other.lat.to_radians();
        let lng2 = other.lng.to_radians();

        let dlat = lat2 - lat1;
        let dlng = lng2 - lng1;

        let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlng / 2.0).sin().powi(2);
        let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

        EARTH_RADIUS * c
    }

    /// Great-circle forward azimuth towards `other`, degrees clockwise from
    /// north, in [0, 360).
    pub fn initial_bearing(&self, other: &GeoPoint) -> f64 {
        let lat1 = self.lat.to_radians();
        let lat2 = other.lat.to_radians();
        let dlng = (other.lng - self.lng).to_radians();

        let y = dlng.sin() * lat2.cos();
        let x = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * dlng.cos();

        (y.atan2(x).to_degrees() + 360.0) % 360.0
    }

    /// Straight-line displacement on raw degrees, ignoring projection. Only
    /// meaningful as a coarse "did the target move" comparator.
    pub fn degree_displacement(&self, other: &GeoPoint) -> f64 {
        let dlat = self.lat - other.lat;
        let dlng = self.lng - other.lng;

        (dlat * dlat + dlng * dlng).sqrt()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_rejects_out_of_range() {
        assert!(GeoPoint::new(91.0, 0.0).validate().is_err());
        assert!(GeoPoint::new(0.0, -180.5).validate().is_err());
        assert!(GeoPoint::new(f64::NAN, 0.0).validate().is_err());
        assert!(GeoPoint::new(48.8566, 2.3522).validate().is_ok());
    }

    #[test]
    fn test_haversine_distance() {
        let paris = GeoPoint::new(48.8566, 2.3522);
        let brussels = GeoPoint::new(50.8503, 4.3517);

        let distance = paris.haversine_distance(&brussels);
        assert!((distance - 264_000.0).abs() < 2_000.0);
    }

    #[test]
    fn test_initial_bearing_cardinal_directions() {
        let origin = GeoPoint::new(0.0, 0.0);

        let north = origin.initial_bearing(&GeoPoint::new(1.0, 0.0));
        let east = origin.initial_bearing(&GeoPoint::new(0.0, 1.0));
        let south = origin.initial_bearing(&GeoPoint::new(-1.0, 0.0));
        let west = origin.initial_bearing(&GeoPoint::new(0.0, -1.0));

        assert!((north - 0.0).abs() < 1e-9);
        assert!((east - 90.0).abs() < 1e-9);
        assert!((south - 180.0).abs() < 1e-9);
        assert!((west - 270.0).abs() < 1e-9);
    }

    #[test]
    fn test_bearing_stays_in_range() {
        let a = GeoPoint::new(50.0, 10.0);
        let b = GeoPoint::new(49.0, 9.0);

        let bearing = a.initial_bearing(&b);
        assert!((0.0..360.0).contains(&bearing));
    }

    #[test]
    fn test_degree_displacement() {
        let a = GeoPoint::new(50.0, 4.0);
        let b = GeoPoint::new(50.0, 4.001);

        assert!((a.degree_displacement(&b) - 0.001).abs() < 1e-12);
    }
}
