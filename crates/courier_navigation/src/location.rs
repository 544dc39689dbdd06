use std::sync::Arc;

use jiff::{SignedDuration, Timestamp};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use courier_core::geopoint::GeoPoint;

use crate::simulator::RouteSimulator;

pub const MIN_UPDATE_INTERVAL: SignedDuration = SignedDuration::from_secs(2);
pub const MIN_DISPLACEMENT_METERS: f64 = 10.0;

#[derive(Debug, Error)]
pub enum LocationError {
    #[error("location provider unavailable: {0}")]
    Unavailable(String),

    #[error("timed out waiting for a location fix")]
    Timeout,
}

/// Raw sensor sample. Arrives at sensor cadence with no ordering or delivery
/// guarantee.
#[derive(Debug, Copy, Clone, Serialize, Deserialize)]
pub struct LocationSample {
    pub latitude: f64,
    pub longitude: f64,
    pub timestamp: Timestamp,
}

/// Throttles the sensor stream: a sample must be newer than the last one,
/// at least `min_interval` later and at least `min_displacement_meters`
/// away. Samples failing any threshold are dropped, not queued.
pub struct LocationTracker {
    min_interval: SignedDuration,
    min_displacement_meters: f64,
    last: Option<(GeoPoint, Timestamp)>,
}

impl Default for LocationTracker {
    fn default() -> Self {
        LocationTracker::new(MIN_UPDATE_INTERVAL, MIN_DISPLACEMENT_METERS)
    }
}

impl LocationTracker {
    pub fn new(min_interval: SignedDuration, min_displacement_meters: f64) -> Self {
        LocationTracker {
            min_interval,
            min_displacement_meters,
            last: None,
        }
    }

    pub fn accept(&mut self, sample: LocationSample) -> Option<GeoPoint> {
        let point = GeoPoint::new(sample.latitude, sample.longitude);
        if point.validate().is_err() {
            debug!("LocationTracker: dropping invalid sample");
            return None;
        }

        if let Some((last_point, last_seen)) = &self.last {
            // Out-of-order and duplicate samples are dropped outright.
            if sample.timestamp <= *last_seen {
                return None;
            }

            if sample.timestamp.duration_since(*last_seen) < self.min_interval {
                return None;
            }

            if last_point.haversine_distance(&point) < self.min_displacement_meters {
                return None;
            }
        }

        self.last = Some((point, sample.timestamp));
        Some(point)
    }

    pub fn reset(&mut self) {
        self.last = None;
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum LocationMode {
    Live,
    Simulated,
}

/// Owns the switch between live tracking and simulated replay. Both sources
/// write the same position state, so the simulator's tick must be stopped
/// before live samples are accepted, and vice versa the throttle window is
/// reset when the simulator takes over.
pub struct TrackingController {
    mode: LocationMode,
    tracker: LocationTracker,
    simulator: Arc<RouteSimulator>,
}

impl TrackingController {
    pub fn new(mode: LocationMode, simulator: Arc<RouteSimulator>) -> Self {
        TrackingController {
            mode,
            tracker: LocationTracker::default(),
            simulator,
        }
    }

    pub fn mode(&self) -> LocationMode {
        self.mode
    }

    pub fn simulator(&self) -> &Arc<RouteSimulator> {
        &self.simulator
    }

    pub fn set_mode(&mut self, mode: LocationMode) {
        if mode == self.mode {
            return;
        }

        match mode {
            LocationMode::Live => {
                self.simulator.stop();
                self.tracker.reset();
            }
            LocationMode::Simulated => {
                self.tracker.reset();
            }
        }

        debug!("TrackingController: switched to {:?}", mode);
        self.mode = mode;
    }

    /// Feeds a live sensor sample through the throttle. Ignored entirely in
    /// simulated mode.
    pub fn live_sample(&mut self, sample: LocationSample) -> Option<GeoPoint> {
        if self.mode != LocationMode::Live {
            return None;
        }

        self.tracker.accept(sample)
    }
}
