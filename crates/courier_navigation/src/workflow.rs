use std::sync::Arc;

use jiff::civil;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use courier_core::geopoint::GeoPoint;
use courier_providers::navigation_link::{DEFAULT_MAPS_HOST, navigation_deep_link};
use courier_providers::package_api::{
    Package, PackageApiError, PackageBackend, PackageService, PackageStatus,
};

use crate::breaks::{Break, schedule_breaks};
use crate::location::LocationError;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowState {
    Loading,
    WaitingLocation,
    ShowingNavigation,
    WaitingConfirmation,
    Completed,
    Error,
}

impl WorkflowState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkflowState::Completed | WorkflowState::Error)
    }
}

/// Everything that can move the workflow. The transition table below is
/// total over (state, event); anything not listed is an invalid transition
/// and fails loudly instead of being swallowed.
#[derive(Debug, Clone)]
pub enum WorkflowEvent {
    PackagesLoaded { undelivered: usize },
    LoadFailed,
    LocationFix,
    OpenNavigation,
    Confirmed { delivered: bool, remaining: usize },
    SensorLost,
    Fault,
}

impl WorkflowEvent {
    fn name(&self) -> &'static str {
        match self {
            WorkflowEvent::PackagesLoaded { .. } => "packages_loaded",
            WorkflowEvent::LoadFailed => "load_failed",
            WorkflowEvent::LocationFix => "location_fix",
            WorkflowEvent::OpenNavigation => "open_navigation",
            WorkflowEvent::Confirmed { .. } => "confirmed",
            WorkflowEvent::SensorLost => "sensor_lost",
            WorkflowEvent::Fault => "fault",
        }
    }
}

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("missing route identifier")]
    MissingRouteIdentifier,

    #[error("invalid transition: {event} in state {state:?}")]
    InvalidTransition {
        state: WorkflowState,
        event: &'static str,
    },

    #[error("failed to load route packages: {0}")]
    LoadFailed(#[source] PackageApiError),

    #[error("status update rejected for package {package_id}: {source}")]
    StatusUpdateFailed {
        package_id: String,
        #[source]
        source: PackageApiError,
    },

    #[error("no active package")]
    NoActivePackage,

    #[error("workflow is not in the error state")]
    NothingToRetry,
}

/// Pure transition function. Faults are accepted from every non-terminal
/// state; sensor loss only while a location actually matters.
pub fn transition(
    state: WorkflowState,
    event: &WorkflowEvent,
) -> Result<WorkflowState, WorkflowError> {
    use WorkflowEvent as Event;
    use WorkflowState as State;

    let next = match (state, event) {
        (State::Loading, Event::PackagesLoaded { undelivered: 0 }) => State::Completed,
        (State::Loading, Event::PackagesLoaded { .. }) => State::WaitingLocation,
        (State::Loading, Event::LoadFailed) => State::Error,

        (State::WaitingLocation, Event::LocationFix) => State::ShowingNavigation,

        (State::ShowingNavigation, Event::OpenNavigation) => State::WaitingConfirmation,

        (State::WaitingConfirmation, Event::Confirmed {
            delivered: false, ..
        }) => State::ShowingNavigation,
        (State::WaitingConfirmation, Event::Confirmed { remaining: 0, .. }) => State::Completed,
        (State::WaitingConfirmation, Event::Confirmed { .. }) => State::ShowingNavigation,

        (State::WaitingLocation | State::ShowingNavigation, Event::SensorLost) => {
            State::WaitingLocation
        }

        (state, Event::Fault) if !state.is_terminal() => State::Error,

        (state, event) => {
            return Err(WorkflowError::InvalidTransition {
                state,
                event: event.name(),
            });
        }
    };

    Ok(next)
}

/// The interleaved stop/rest list shown to the driver.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RoutePlanEntry {
    Stop(Package),
    Rest(Break),
}

pub trait WorkflowListener: Send + Sync {
    fn on_state_change(&self, _state: WorkflowState) {}
    fn on_open_navigation(&self, _url: &str) {}
    fn on_workflow_error(&self, _message: &str) {}
}

pub struct WorkflowParams {
    pub maps_host: String,
}

impl Default for WorkflowParams {
    fn default() -> Self {
        WorkflowParams {
            maps_host: DEFAULT_MAPS_HOST.to_string(),
        }
    }
}

/// Drives one driver session over one route: load packages, wait for a
/// location fix, hand off to external navigation, collect the confirmation,
/// move to the next stop. Exactly one package is current at any non-terminal
/// state.
pub struct DeliveryWorkflow<B: PackageBackend> {
    params: WorkflowParams,
    packages_api: Arc<PackageService<B>>,
    route_id: Option<String>,
    packages: Vec<Package>,
    state: WorkflowState,
    last_stable: WorkflowState,
    listener: Option<Arc<dyn WorkflowListener>>,
}

impl<B: PackageBackend> DeliveryWorkflow<B> {
    pub fn new(
        params: WorkflowParams,
        packages_api: Arc<PackageService<B>>,
        route_id: Option<String>,
    ) -> Self {
        DeliveryWorkflow {
            params,
            packages_api,
            route_id,
            packages: Vec::new(),
            state: WorkflowState::Loading,
            last_stable: WorkflowState::Loading,
            listener: None,
        }
    }

    pub fn set_listener(&mut self, listener: Arc<dyn WorkflowListener>) {
        self.listener = Some(listener);
    }

    pub fn clear_listener(&mut self) {
        self.listener = None;
    }

    pub fn state(&self) -> WorkflowState {
        self.state
    }

    pub fn packages(&self) -> &[Package] {
        &self.packages
    }

    /// First undelivered package in stop-priority order.
    pub fn current_package(&self) -> Option<&Package> {
        self.packages
            .iter()
            .find(|package| package.status != PackageStatus::Delivered)
    }

    /// Fetches the route's packages and leaves the workflow waiting for a
    /// location fix, or completed when nothing is left to deliver.
    pub async fn load(&mut self) -> Result<WorkflowState, WorkflowError> {
        let Some(route_id) = self.route_id.clone() else {
            self.enter_error("missing route identifier");
            return Err(WorkflowError::MissingRouteIdentifier);
        };

        match self.packages_api.route_packages(&route_id).await {
            Ok(packages) => {
                self.packages = packages;
                let undelivered = self.undelivered_count();
                self.apply(&WorkflowEvent::PackagesLoaded { undelivered })
            }
            Err(error) => {
                warn!("DeliveryWorkflow: package fetch failed: {}", error);
                self.notify_error(&error.to_string());
                let _ = self.apply(&WorkflowEvent::LoadFailed);
                Err(WorkflowError::LoadFailed(error))
            }
        }
    }

    /// First fix for the current package moves the workflow forward; later
    /// fixes are position updates, not transitions.
    pub fn location_fix(&mut self, _location: GeoPoint) -> Result<WorkflowState, WorkflowError> {
        if self.state != WorkflowState::WaitingLocation {
            return Ok(self.state);
        }

        self.apply(&WorkflowEvent::LocationFix)
    }

    /// Sensors are expected to drop out; this is a step back, not a fault.
    pub fn sensor_error(&mut self, error: LocationError) -> Result<WorkflowState, WorkflowError> {
        warn!("DeliveryWorkflow: sensor error: {}", error);
        self.notify_error(&error.to_string());
        self.apply(&WorkflowEvent::SensorLost)
    }

    /// Hands the current package's destination to the external navigation
    /// surface. Fire-and-forget; the hand-off is not awaited and has no
    /// recovery path.
    pub fn open_navigation(&mut self) -> Result<String, WorkflowError> {
        if self.state != WorkflowState::ShowingNavigation {
            return Err(WorkflowError::InvalidTransition {
                state: self.state,
                event: "open_navigation",
            });
        }

        let package = self
            .current_package()
            .ok_or(WorkflowError::NoActivePackage)?;
        let url = navigation_deep_link(&self.params.maps_host, package);

        if let Some(listener) = &self.listener {
            listener.on_open_navigation(&url);
        }

        self.apply(&WorkflowEvent::OpenNavigation)?;
        Ok(url)
    }

    /// Settles the confirmation for the current package. `delivered = false`
    /// means the driver missed the stop and goes back to navigation for the
    /// same package. A backend rejection is terminal until retried; losing a
    /// confirmation silently would be a correctness violation.
    pub async fn confirm_delivery(
        &mut self,
        delivered: bool,
    ) -> Result<WorkflowState, WorkflowError> {
        if self.state != WorkflowState::WaitingConfirmation {
            return Err(WorkflowError::InvalidTransition {
                state: self.state,
                event: "confirmed",
            });
        }

        if !delivered {
            return self.apply(&WorkflowEvent::Confirmed {
                delivered: false,
                remaining: self.undelivered_count(),
            });
        }

        let route_id = self
            .route_id
            .clone()
            .ok_or(WorkflowError::MissingRouteIdentifier)?;
        let package_id = self
            .current_package()
            .ok_or(WorkflowError::NoActivePackage)?
            .id
            .clone();

        if let Err(error) = self.packages_api.mark_delivered(&route_id, &package_id).await {
            self.enter_error(&error.to_string());
            return Err(WorkflowError::StatusUpdateFailed {
                package_id,
                source: error,
            });
        }

        if let Some(package) = self
            .packages
            .iter_mut()
            .find(|package| package.id == package_id)
        {
            package.status = PackageStatus::Delivered;
        }

        let remaining = self.undelivered_count();
        self.apply(&WorkflowEvent::Confirmed {
            delivered: true,
            remaining,
        })
    }

    /// Manual retry out of the error state, back to the last stable state.
    pub fn retry(&mut self) -> Result<WorkflowState, WorkflowError> {
        if self.state != WorkflowState::Error {
            return Err(WorkflowError::NothingToRetry);
        }

        self.state = self.last_stable;
        debug!("DeliveryWorkflow: retrying from {:?}", self.state);
        self.notify_state();

        Ok(self.state)
    }

    /// Stops and rest breaks interleaved in driving order, for display.
    pub fn route_plan(&self, start: civil::Time) -> Vec<RoutePlanEntry> {
        let route_id = self.route_id.as_deref().unwrap_or_default();
        let mut breaks = schedule_breaks(route_id, &self.packages, start);

        let mut plan = Vec::with_capacity(self.packages.len() + breaks.len());

        for package in &self.packages {
            plan.push(RoutePlanEntry::Stop(package.clone()));

            while let Some(position) = breaks
                .iter()
                .position(|b| b.after_package == package.id)
            {
                plan.push(RoutePlanEntry::Rest(breaks.remove(position)));
            }
        }

        plan
    }

    fn undelivered_count(&self) -> usize {
        self.packages
            .iter()
            .filter(|package| package.status != PackageStatus::Delivered)
            .count()
    }

    fn apply(&mut self, event: &WorkflowEvent) -> Result<WorkflowState, WorkflowError> {
        let next = transition(self.state, event)?;

        debug!(
            "DeliveryWorkflow: {:?} --{}--> {:?}",
            self.state,
            event.name(),
            next
        );

        self.state = next;
        if next != WorkflowState::Error {
            self.last_stable = next;
        }
        self.notify_state();

        Ok(next)
    }

    fn enter_error(&mut self, message: &str) {
        self.notify_error(message);
        if !self.state.is_terminal() {
            let _ = self.apply(&WorkflowEvent::Fault);
        } else {
            self.state = WorkflowState::Error;
            self.notify_state();
        }
    }

    fn notify_state(&self) {
        if let Some(listener) = &self.listener {
            listener.on_state_change(self.state);
        }
    }

    fn notify_error(&self, message: &str) {
        if let Some(listener) = &self.listener {
            listener.on_workflow_error(message);
        }
    }
}
