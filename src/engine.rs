//! # Navigation Engine
//!
//! Matches each position fix against the selected route and emits
//! [`NavUpdate`]s, the single output contract of the navigation core.
//!
//! Per update:
//! 1. Nearest route point by linear scan (first index wins ties)
//! 2. Off-route when farther than [`OFF_ROUTE_THRESHOLD_M`] from every point
//! 3. Progress as the nearest index over the last index, in percent
//! 4. Current/next step from the derived step list
//! 5. `destination_reached` after the step update once the last point is
//!    nearest and progress reaches [`ARRIVAL_PROGRESS`]
//!
//! The engine is synchronous: listeners run before `on_position_update`
//! returns, in emission order.

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::{NavError, Result};
use crate::geo_utils::haversine_distance;
use crate::route_model::{Route, RouteModel};
use crate::steps::{derive_steps, locate, NavStep, StepMode};
use crate::{Coordinate, Position};

/// Distance from the route beyond which a fix is off route (meters)
pub const OFF_ROUTE_THRESHOLD_M: f64 = 50.0;

/// Progress at which the last route point counts as arrival (percent)
pub const ARRIVAL_PROGRESS: f64 = 99.0;

const NO_ROUTE_MESSAGE: &str = "No route coordinates available";

// ============================================================================
// Output Contract
// ============================================================================

/// Snapshot of the active route's metadata carried by every step update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteInfo {
    pub distance: f64,
    pub duration: f64,
    pub total_risk: u32,
    #[serde(rename = "type")]
    pub route_type: String,
}

impl From<&Route> for RouteInfo {
    fn from(route: &Route) -> Self {
        Self {
            distance: route.distance_km,
            duration: route.duration_min,
            total_risk: route.total_risk,
            route_type: route.route_type.clone(),
        }
    }
}

/// Payload of `step_updated` and `off_route`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepUpdate {
    pub current_step: Option<NavStep>,
    pub next_step: Option<NavStep>,
    /// 0-100
    pub progress: f64,
    /// Meters to the next step's anchor point, 0 without a next step
    pub distance_to_next: f64,
    pub is_off_route: bool,
    pub current_position: Position,
    pub route_info: RouteInfo,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NavUpdate {
    StepUpdated(StepUpdate),
    OffRoute(StepUpdate),
    DestinationReached {
        current_step: NavStep,
    },
    RouteChanged {
        route: Option<Route>,
        selected_index: Option<usize>,
    },
    GpsError {
        error: String,
    },
    RouteError {
        error: String,
    },
}

impl NavUpdate {
    pub fn kind(&self) -> &'static str {
        match self {
            NavUpdate::StepUpdated(_) => "step_updated",
            NavUpdate::OffRoute(_) => "off_route",
            NavUpdate::DestinationReached { .. } => "destination_reached",
            NavUpdate::RouteChanged { .. } => "route_changed",
            NavUpdate::GpsError { .. } => "gps_error",
            NavUpdate::RouteError { .. } => "route_error",
        }
    }

    /// The step payload of `step_updated`/`off_route`.
    pub fn step_update(&self) -> Option<&StepUpdate> {
        match self {
            NavUpdate::StepUpdated(update) | NavUpdate::OffRoute(update) => Some(update),
            _ => None,
        }
    }
}

// ============================================================================
// Engine
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Running,
    Paused,
    Stopped,
}

pub type NavListener = Box<dyn FnMut(&NavUpdate) + Send>;

/// Index and distance of the route point nearest to `point`.
///
/// Strict comparison keeps the first index on ties. Non-finite distances are
/// skipped. `None` for an empty slice or when no distance is finite.
pub fn nearest_point(point: &Coordinate, coords: &[Coordinate]) -> Option<(usize, f64)> {
    let mut best: Option<(usize, f64)> = None;
    for (i, coord) in coords.iter().enumerate() {
        let d = haversine_distance(point, coord);
        if !d.is_finite() {
            continue;
        }
        match best {
            Some((_, min)) if d >= min => {}
            _ => best = Some((i, d)),
        }
    }
    best
}

/// `100 * index / (len - 1)` clamped to 0..=100; 0 for single-point routes.
pub fn progress_percent(nearest_index: usize, len: usize) -> f64 {
    if len <= 1 {
        return 0.0;
    }
    (100.0 * nearest_index as f64 / (len - 1) as f64).clamp(0.0, 100.0)
}

pub struct NavigationEngine {
    model: RouteModel,
    step_mode: StepMode,
    state: EngineState,
    last_position: Option<Position>,
    current_position_index: usize,
    progress_percent: f64,
    listeners: Vec<NavListener>,
}

impl NavigationEngine {
    /// Engine over `model` with the start/destination step model.
    pub fn new(model: RouteModel) -> Self {
        Self::with_step_mode(model, StepMode::Endpoints)
    }

    pub fn with_config(model: RouteModel, config: &Config) -> Self {
        Self::with_step_mode(model, config.step_mode)
    }

    pub fn with_step_mode(model: RouteModel, step_mode: StepMode) -> Self {
        info!(
            "[NavigationEngine] Created with {} routes, selected {:?}",
            model.len(),
            model.selected_index()
        );
        Self {
            model,
            step_mode,
            state: EngineState::Running,
            last_position: None,
            current_position_index: 0,
            progress_percent: 0.0,
            listeners: Vec::new(),
        }
    }

    pub fn subscribe(&mut self, listener: impl FnMut(&NavUpdate) + Send + 'static) {
        self.listeners.push(Box::new(listener));
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn model(&self) -> &RouteModel {
        &self.model
    }

    pub fn current_route(&self) -> Option<&Route> {
        self.model.selected()
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn last_position(&self) -> Option<&Position> {
        self.last_position.as_ref()
    }

    pub fn current_position_index(&self) -> usize {
        self.current_position_index
    }

    pub fn progress_percent(&self) -> f64 {
        self.progress_percent
    }

    pub fn step_mode(&self) -> StepMode {
        self.step_mode
    }

    /// Steps of the selected route, derived on demand.
    pub fn steps(&self) -> Vec<NavStep> {
        self.current_route()
            .map(|route| derive_steps(&route.coordinates, self.step_mode))
            .unwrap_or_default()
    }

    // ========================================================================
    // Position Updates
    // ========================================================================

    /// Match a fix against the selected route and notify listeners.
    ///
    /// Returns the emitted updates. Ignored while paused or stopped.
    pub fn on_position_update(&mut self, position: Position) -> Vec<NavUpdate> {
        if self.state != EngineState::Running {
            debug!("[NavigationEngine] Ignoring fix while {:?}", self.state);
            return Vec::new();
        }
        if !position.coordinate.is_valid() {
            warn!(
                "[NavigationEngine] Rejecting invalid fix ({}, {})",
                position.coordinate.latitude, position.coordinate.longitude
            );
            return vec![self.report_gps_error(&NavError::gps("Invalid location fix"))];
        }
        self.last_position = Some(position.clone());
        let updates = self.evaluate(&position);
        self.emit_all(&updates);
        updates
    }

    fn evaluate(&mut self, position: &Position) -> Vec<NavUpdate> {
        let Some(route) = self.model.selected() else {
            return vec![route_error()];
        };
        let coords = &route.coordinates;
        let Some((nearest, min_distance)) = nearest_point(&position.coordinate, coords) else {
            return vec![route_error()];
        };

        let is_off_route = min_distance > OFF_ROUTE_THRESHOLD_M;
        let progress = progress_percent(nearest, coords.len());

        let steps = derive_steps(coords, self.step_mode);
        let (current, next) = locate(&steps, nearest);
        let distance_to_next = match (current, next) {
            (Some(_), Some(next)) => coords
                .get(next.route_index)
                .map(|anchor| haversine_distance(&position.coordinate, anchor))
                .unwrap_or(0.0),
            _ => 0.0,
        };

        let update = StepUpdate {
            current_step: current.cloned(),
            next_step: next.cloned(),
            progress,
            distance_to_next,
            is_off_route,
            current_position: position.clone(),
            route_info: RouteInfo::from(route),
        };

        let last = coords.len() - 1;
        let arrived = nearest == last && progress >= ARRIVAL_PROGRESS;
        let arrival_point = coords[last];

        let mut updates = Vec::with_capacity(2);
        if is_off_route {
            debug!(
                "[NavigationEngine] Off route: {:.1}m from nearest point {}",
                min_distance, nearest
            );
            updates.push(NavUpdate::OffRoute(update));
        } else {
            updates.push(NavUpdate::StepUpdated(update));
        }
        if arrived {
            info!("[NavigationEngine] Destination reached");
            updates.push(NavUpdate::DestinationReached {
                current_step: NavStep::arrived(arrival_point, last),
            });
        }

        self.current_position_index = nearest;
        self.progress_percent = progress;
        updates
    }

    // ========================================================================
    // Route Selection
    // ========================================================================

    /// Select another candidate. Out-of-range indices return false and
    /// change nothing.
    pub fn switch_route(&mut self, index: usize) -> bool {
        if !self.model.switch_route(index) {
            warn!(
                "[NavigationEngine] Rejected switch to route {} ({} routes)",
                index,
                self.model.len()
            );
            return false;
        }
        info!("[NavigationEngine] Switched to route {}", index);
        self.on_route_changed();
        true
    }

    /// Like [`switch_route`](Self::switch_route), with the bounds failure as an error.
    pub fn try_switch_route(&mut self, index: usize) -> Result<()> {
        let len = self.model.len();
        if self.switch_route(index) {
            Ok(())
        } else {
            Err(NavError::InvalidIndex { index, len })
        }
    }

    /// Replace the whole model, as after a recalculation.
    pub fn replace_model(&mut self, model: RouteModel) {
        info!(
            "[NavigationEngine] Route model replaced ({} routes)",
            model.len()
        );
        self.model = model;
        self.on_route_changed();
    }

    fn on_route_changed(&mut self) {
        self.current_position_index = 0;
        self.progress_percent = 0.0;

        let changed = NavUpdate::RouteChanged {
            route: self.model.selected().cloned(),
            selected_index: self.model.selected_index(),
        };
        self.emit_all(std::slice::from_ref(&changed));

        // Bring step state up to date without waiting for the next fix
        if self.state == EngineState::Running {
            if let Some(position) = self.last_position.clone() {
                let updates = self.evaluate(&position);
                self.emit_all(&updates);
            }
        }
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Surface a tracker failure. Never retried here.
    pub fn report_gps_error(&mut self, err: &NavError) -> NavUpdate {
        warn!("[NavigationEngine] GPS error: {}", err);
        let update = NavUpdate::GpsError {
            error: err.user_message(),
        };
        self.emit_all(std::slice::from_ref(&update));
        update
    }

    pub fn start(&mut self) {
        self.state = EngineState::Running;
    }

    /// Stop consuming fixes, keeping all cached state.
    pub fn pause(&mut self) {
        if self.state == EngineState::Running {
            self.state = EngineState::Paused;
        }
    }

    pub fn resume(&mut self) {
        if self.state == EngineState::Paused {
            self.state = EngineState::Running;
        }
    }

    pub fn stop(&mut self) {
        self.state = EngineState::Stopped;
        self.last_position = None;
    }

    fn emit_all(&mut self, updates: &[NavUpdate]) {
        for update in updates {
            for listener in self.listeners.iter_mut() {
                listener(update);
            }
        }
    }
}

fn route_error() -> NavUpdate {
    NavUpdate::RouteError {
        error: NO_ROUTE_MESSAGE.to_string(),
    }
}
