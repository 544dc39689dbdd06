use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::debug;

use courier_core::geometry::RouteGeometry;
use courier_core::geopoint::GeoPoint;

pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(200);

/// Geometry points traversed per second at 1x speed.
pub const BASE_SPEED_POINTS_PER_SECOND: f64 = 1.0;

#[derive(Debug, Error)]
pub enum SimulatorError {
    #[error("no route loaded")]
    NoRouteLoaded,

    #[error("simulation already running")]
    AlreadyRunning,

    #[error("simulation is not running")]
    NotRunning,

    #[error("simulation is not paused")]
    NotPaused,

    #[error("route completed, load a route to restart")]
    Completed,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SimulatorStatus {
    Idle,
    Running,
    Paused,
    Completed,
}

/// Snapshot of the replay position, published to the active listener and
/// readable at any time.
#[derive(Debug, Copy, Clone, PartialEq, Serialize)]
pub struct SimulationState {
    pub is_running: bool,
    pub current_index: f64,
    pub current_location: GeoPoint,
    pub current_heading_degrees: f64,
    pub progress: f64,
}

/// Single active subscriber; setting a new listener replaces the previous
/// one. Within one tick the order is location, then heading, then any
/// derived-state notification.
pub trait SimulatorListener: Send + Sync {
    fn on_location_update(&self, _location: GeoPoint) {}
    fn on_heading_update(&self, _heading_degrees: f64) {}
    fn on_progress(&self, _progress: f64) {}
    fn on_simulation_complete(&self) {}
}

pub struct SimulatorParams {
    pub tick_interval: Duration,
    pub base_speed: f64,
}

impl Default for SimulatorParams {
    fn default() -> Self {
        SimulatorParams {
            tick_interval: DEFAULT_TICK_INTERVAL,
            base_speed: BASE_SPEED_POINTS_PER_SECOND,
        }
    }
}

struct SimulatorInner {
    geometry: Option<RouteGeometry>,
    status: SimulatorStatus,
    index: f64,
    segment: usize,
    location: Option<GeoPoint>,
    heading: f64,
    speed_multiplier: f64,
    completion_notified: bool,
    listener: Option<Arc<dyn SimulatorListener>>,
}

impl SimulatorInner {
    fn new() -> Self {
        SimulatorInner {
            geometry: None,
            status: SimulatorStatus::Idle,
            index: 0.0,
            segment: 0,
            location: None,
            heading: 0.0,
            speed_multiplier: 1.0,
            completion_notified: false,
            listener: None,
        }
    }

    fn progress(&self) -> f64 {
        match &self.geometry {
            Some(geometry) if geometry.last_index() > 0.0 => {
                (self.index / geometry.last_index()).clamp(0.0, 1.0)
            }
            _ => 0.0,
        }
    }

    fn state(&self) -> Option<SimulationState> {
        let location = self.location?;

        Some(SimulationState {
            is_running: self.status == SimulatorStatus::Running,
            current_index: self.index,
            current_location: location,
            current_heading_degrees: self.heading,
            progress: self.progress(),
        })
    }

    /// Moves the fractional index to `target` and recomputes location and
    /// heading. Heading only changes when the integer index moves to a new
    /// segment. Returns the notifications to deliver after unlock.
    fn move_to(&mut self, target: f64) -> Notifications {
        let Some(geometry) = &self.geometry else {
            return Notifications::default();
        };

        let last_index = geometry.last_index();
        self.index = target.clamp(0.0, last_index);

        let segment = (self.index.floor() as usize).min(geometry.len().saturating_sub(1));
        let mut heading_changed = false;

        if segment != self.segment || self.location.is_none() {
            if let Some(heading) = geometry.bearing_at(segment) {
                self.heading = heading;
                heading_changed = true;
            }
            self.segment = segment;
        }

        self.location = geometry.position_at(self.index);

        let completed = self.index >= last_index && !self.completion_notified;
        if completed {
            self.status = SimulatorStatus::Completed;
            self.completion_notified = true;
        }

        Notifications {
            listener: self.listener.clone(),
            location: self.location,
            heading: heading_changed.then_some(self.heading),
            progress: Some(self.progress()),
            completed,
        }
    }
}

#[derive(Default)]
struct Notifications {
    listener: Option<Arc<dyn SimulatorListener>>,
    location: Option<GeoPoint>,
    heading: Option<f64>,
    progress: Option<f64>,
    completed: bool,
}

impl Notifications {
    fn deliver(self) {
        let Some(listener) = self.listener else {
            return;
        };

        if let Some(location) = self.location {
            listener.on_location_update(location);
        }
        if let Some(heading) = self.heading {
            listener.on_heading_update(heading);
        }
        if let Some(progress) = self.progress {
            listener.on_progress(progress);
        }
        if self.completed {
            listener.on_simulation_complete();
        }
    }
}

/// Replays a route geometry over wall-clock time. One instance is shared per
/// session; the tick task must be stopped before the simulator is handed to
/// another location source.
pub struct RouteSimulator {
    params: SimulatorParams,
    inner: Arc<Mutex<SimulatorInner>>,
    tick_task: Mutex<Option<JoinHandle<()>>>,
}

impl RouteSimulator {
    pub fn new(params: SimulatorParams) -> Self {
        RouteSimulator {
            params,
            inner: Arc::new(Mutex::new(SimulatorInner::new())),
            tick_task: Mutex::new(None),
        }
    }

    pub fn set_listener(&self, listener: Arc<dyn SimulatorListener>) {
        self.inner.lock().listener = Some(listener);
    }

    pub fn clear_listener(&self) {
        self.inner.lock().listener = None;
    }

    /// Loads a geometry and resets the replay position. Does not start the
    /// clock. Any running tick task is cancelled first.
    pub fn load_route(&self, geometry: RouteGeometry) {
        self.abort_tick_task();

        let mut inner = self.inner.lock();
        inner.status = SimulatorStatus::Idle;
        inner.index = 0.0;
        inner.segment = 0;
        inner.heading = geometry.bearing_at(0).unwrap_or(0.0);
        inner.location = geometry.points().first().copied();
        inner.completion_notified = false;
        inner.geometry = Some(geometry);
    }

    pub fn start(&self) -> Result<(), SimulatorError> {
        {
            let mut inner = self.inner.lock();

            match inner.status {
                SimulatorStatus::Running => return Err(SimulatorError::AlreadyRunning),
                SimulatorStatus::Completed => return Err(SimulatorError::Completed),
                SimulatorStatus::Idle | SimulatorStatus::Paused => {}
            }

            if inner.geometry.as_ref().is_none_or(|g| g.is_empty()) {
                return Err(SimulatorError::NoRouteLoaded);
            }

            inner.status = SimulatorStatus::Running;
        }

        self.spawn_tick_task();
        debug!("RouteSimulator: started");

        Ok(())
    }

    pub fn pause(&self) -> Result<(), SimulatorError> {
        {
            let mut inner = self.inner.lock();
            if inner.status != SimulatorStatus::Running {
                return Err(SimulatorError::NotRunning);
            }
            inner.status = SimulatorStatus::Paused;
        }

        self.abort_tick_task();
        debug!("RouteSimulator: paused");

        Ok(())
    }

    pub fn resume(&self) -> Result<(), SimulatorError> {
        {
            let mut inner = self.inner.lock();
            if inner.status != SimulatorStatus::Paused {
                return Err(SimulatorError::NotPaused);
            }
            inner.status = SimulatorStatus::Running;
        }

        self.spawn_tick_task();
        debug!("RouteSimulator: resumed");

        Ok(())
    }

    /// Stops the clock and returns to idle, keeping the loaded geometry and
    /// the current position. `load_route` is the reset point.
    pub fn stop(&self) {
        self.abort_tick_task();
        self.inner.lock().status = SimulatorStatus::Idle;
        debug!("RouteSimulator: stopped");
    }

    /// Scrubs to a fractional geometry index, recomputing position and
    /// heading immediately rather than on the next tick.
    pub fn jump_to_point(&self, index: f64) -> Result<(), SimulatorError> {
        let notifications = {
            let mut inner = self.inner.lock();
            if inner.geometry.is_none() {
                return Err(SimulatorError::NoRouteLoaded);
            }
            // Scrubbing backwards re-arms the completion notification.
            if let Some(geometry) = &inner.geometry {
                if index < geometry.last_index() {
                    inner.completion_notified = false;
                    if inner.status == SimulatorStatus::Completed {
                        inner.status = SimulatorStatus::Idle;
                    }
                }
            }
            inner.move_to(index)
        };

        notifications.deliver();
        Ok(())
    }

    pub fn seek_to_progress(&self, fraction: f64) -> Result<(), SimulatorError> {
        let last_index = {
            let inner = self.inner.lock();
            inner
                .geometry
                .as_ref()
                .ok_or(SimulatorError::NoRouteLoaded)?
                .last_index()
        };

        self.jump_to_point(fraction.clamp(0.0, 1.0) * last_index)
    }

    /// Takes effect on the next tick, never retroactively.
    pub fn set_speed_multiplier(&self, multiplier: f64) {
        self.inner.lock().speed_multiplier = multiplier.max(0.0);
    }

    pub fn state(&self) -> Option<SimulationState> {
        self.inner.lock().state()
    }

    pub fn status(&self) -> SimulatorStatus {
        self.inner.lock().status
    }

    fn spawn_tick_task(&self) {
        let inner = Arc::clone(&self.inner);
        let tick_interval = self.params.tick_interval;
        let base_speed = self.params.base_speed;

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick fires immediately; consume it so elapsed time
            // is measured between real ticks.
            interval.tick().await;
            let mut last_tick = Instant::now();

            loop {
                interval.tick().await;
                let now = Instant::now();
                let elapsed = now - last_tick;
                last_tick = now;

                if !advance(&inner, base_speed, elapsed) {
                    break;
                }
            }
        });

        *self.tick_task.lock() = Some(handle);
    }

    fn abort_tick_task(&self) {
        if let Some(handle) = self.tick_task.lock().take() {
            handle.abort();
        }
    }
}

impl Drop for RouteSimulator {
    fn drop(&mut self) {
        self.abort_tick_task();
    }
}

/// One simulation tick. Returns false when the tick loop should halt.
fn advance(inner: &Arc<Mutex<SimulatorInner>>, base_speed: f64, elapsed: Duration) -> bool {
    let notifications = {
        let mut inner = inner.lock();

        if inner.status != SimulatorStatus::Running {
            return false;
        }

        let advance_by = base_speed * inner.speed_multiplier * elapsed.as_secs_f64();
        let target = inner.index + advance_by;
        inner.move_to(target)
    };

    let completed = notifications.completed;
    notifications.deliver();

    !completed
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geometry() -> RouteGeometry {
        RouteGeometry::new(
            vec![
                GeoPoint::new(50.0, 4.0),
                GeoPoint::new(50.0, 4.001),
                GeoPoint::new(50.001, 4.001),
                GeoPoint::new(50.001, 4.002),
                GeoPoint::new(50.002, 4.002),
            ],
            400.0,
            120_000,
        )
    }

    fn simulator() -> RouteSimulator {
        let simulator = RouteSimulator::new(SimulatorParams::default());
        simulator.load_route(geometry());
        simulator
    }

    #[test]
    fn test_load_route_resets_position() {
        let simulator = simulator();
        let state = simulator.state().unwrap();

        assert_eq!(state.current_index, 0.0);
        assert_eq!(state.progress, 0.0);
        assert!(!state.is_running);
        assert_eq!(state.current_location, GeoPoint::new(50.0, 4.0));
    }

    #[test]
    fn test_progress_is_monotonic_under_ticks() {
        let simulator = simulator();
        simulator.inner.lock().status = SimulatorStatus::Running;

        let mut previous = 0.0;
        for _ in 0..25 {
            advance(&simulator.inner, 1.0, Duration::from_millis(200));
            let progress = simulator.inner.lock().progress();
            assert!(progress >= previous);
            previous = progress;
        }

        // 25 ticks of 200 ms at 1 point/s walk past the 4-segment route.
        assert_eq!(previous, 1.0);
    }

    #[test]
    fn test_completion_fires_exactly_once() {
        struct Counter(Mutex<u32>);
        impl SimulatorListener for Counter {
            fn on_simulation_complete(&self) {
                *self.0.lock() += 1;
            }
        }

        let simulator = simulator();
        let counter = Arc::new(Counter(Mutex::new(0)));
        simulator.set_listener(counter.clone());

        simulator.inner.lock().status = SimulatorStatus::Running;
        // Two giant ticks, both past the end of the route.
        let first = advance(&simulator.inner, 1.0, Duration::from_secs(60));
        let second = advance(&simulator.inner, 1.0, Duration::from_secs(60));

        assert!(!first);
        assert!(!second);
        assert_eq!(*counter.0.lock(), 1);

        let state = simulator.state().unwrap();
        assert_eq!(state.progress, 1.0);
        assert_eq!(simulator.status(), SimulatorStatus::Completed);
    }

    #[test]
    fn test_seek_is_idempotent() {
        let simulator = simulator();

        simulator.jump_to_point(2.5).unwrap();
        let first = simulator.state().unwrap();

        simulator.jump_to_point(2.5).unwrap();
        let second = simulator.state().unwrap();

        assert_eq!(first.current_location, second.current_location);
        assert_eq!(
            first.current_heading_degrees,
            second.current_heading_degrees
        );
    }

    #[test]
    fn test_jump_interpolates_between_points() {
        let simulator = simulator();
        simulator.jump_to_point(0.5).unwrap();

        let state = simulator.state().unwrap();
        assert!((state.current_location.lng - 4.0005).abs() < 1e-12);
        assert!((state.progress - 0.125).abs() < 1e-12);
    }

    #[test]
    fn test_heading_changes_only_on_segment_advance() {
        let simulator = simulator();

        simulator.jump_to_point(0.2).unwrap();
        let east = simulator.state().unwrap().current_heading_degrees;

        simulator.jump_to_point(0.8).unwrap();
        let still_east = simulator.state().unwrap().current_heading_degrees;
        assert_eq!(east, still_east);

        simulator.jump_to_point(1.2).unwrap();
        let north = simulator.state().unwrap().current_heading_degrees;
        assert_ne!(east, north);
        assert!(north < 1.0 || north > 359.0);
    }

    #[tokio::test]
    async fn test_overlapping_start_is_rejected() {
        let simulator = simulator();

        simulator.start().unwrap();
        assert!(matches!(
            simulator.start(),
            Err(SimulatorError::AlreadyRunning)
        ));

        simulator.stop();
        assert_eq!(simulator.status(), SimulatorStatus::Idle);
    }

    #[tokio::test]
    async fn test_start_without_route_is_rejected() {
        let simulator = RouteSimulator::new(SimulatorParams::default());

        assert!(matches!(
            simulator.start(),
            Err(SimulatorError::NoRouteLoaded)
        ));
    }

    #[tokio::test]
    async fn test_pause_and_resume_preserve_position() {
        let simulator = simulator();

        simulator.start().unwrap();
        simulator.jump_to_point(1.5).unwrap();
        simulator.pause().unwrap();

        let paused = simulator.state().unwrap();
        assert_eq!(simulator.status(), SimulatorStatus::Paused);
        assert_eq!(paused.current_index, 1.5);

        simulator.resume().unwrap();
        assert_eq!(simulator.status(), SimulatorStatus::Running);
        assert!(simulator.state().unwrap().current_index >= 1.5);

        simulator.stop();
    }

    #[test]
    fn test_speed_multiplier_scales_advance() {
        let simulator = simulator();
        simulator.set_speed_multiplier(2.0);
        simulator.inner.lock().status = SimulatorStatus::Running;

        advance(&simulator.inner, 1.0, Duration::from_secs(1));

        // 1 point/s at 2x for one second.
        assert_eq!(simulator.state().unwrap().current_index, 2.0);
    }
}
