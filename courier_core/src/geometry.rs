use serde::{Deserialize, Serialize};

use crate::geopoint::GeoPoint;

/// Assumed average speed for synthesized straight-line routes, in m/s.
const STRAIGHT_LINE_SPEED: f64 = 8.33;

/// An ordered, immutable route shape plus the provider's aggregate distance
/// and duration. Produced once per provider response and only ever replaced,
/// never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteGeometry {
    points: Vec<GeoPoint>,
    distance_meters: f64,
    duration_millis: u64,
}

impl RouteGeometry {
    pub fn new(points: Vec<GeoPoint>, distance_meters: f64, duration_millis: u64) -> Self {
        RouteGeometry {
            points,
            distance_meters,
            duration_millis,
        }
    }

    /// Degraded two-point route used when the provider cannot supply one.
    /// Still interpolatable by the simulator.
    pub fn straight_line(origin: GeoPoint, destination: GeoPoint) -> Self {
        let distance = origin.haversine_distance(&destination);
        let duration_millis = (distance / STRAIGHT_LINE_SPEED * 1000.0).round() as u64;

        RouteGeometry {
            points: vec![origin, destination],
            distance_meters: distance,
            duration_millis,
        }
    }

    pub fn points(&self) -> &[GeoPoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn distance_meters(&self) -> f64 {
        self.distance_meters
    }

    pub fn duration_millis(&self) -> u64 {
        self.duration_millis
    }

    /// Highest valid fractional index, `len - 1` as a float.
    pub fn last_index(&self) -> f64 {
        self.points.len().saturating_sub(1) as f64
    }

    /// Position at a fractional index, linearly interpolated between the two
    /// surrounding geometry points. Indexes are clamped to the route.
    pub fn position_at(&self, index: f64) -> Option<GeoPoint> {
        if self.points.is_empty() {
            return None;
        }

        let index = index.clamp(0.0, self.last_index());
        let floor = index.floor() as usize;
        let ceil = index.ceil() as usize;

        if floor == ceil {
            return Some(self.points[floor]);
        }

        let fraction = index - floor as f64;
        let from = self.points[floor];
        let to = self.points[ceil];

        Some(GeoPoint::new(
            from.lat + (to.lat - from.lat) * fraction,
            from.lng + (to.lng - from.lng) * fraction,
        ))
    }

    /// Forward bearing of the segment starting at `segment`. None past the
    /// last segment.
    pub fn bearing_at(&self, segment: usize) -> Option<f64> {
        if segment + 1 >= self.points.len() {
            return None;
        }

        Some(self.points[segment].initial_bearing(&self.points[segment + 1]))
    }
}

pub fn compute_geometry_distance(points: &[GeoPoint]) -> f64 {
    points
        .windows(2)
        .map(|pair| pair[0].haversine_distance(&pair[1]))
        .sum()
}
