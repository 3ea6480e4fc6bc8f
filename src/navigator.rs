//! # Navigator
//!
//! Wires one navigation screen together: the position tracker feeds the
//! engine, the engine's fixes move the map marker, route switches and
//! recalculations redraw the map.
//!
//! The host drives it as a pump: call [`Navigator::step`] in its event loop
//! and forward surface messages to [`Navigator::handle_map_message`].
//! Going off route never recalculates by itself; the host asks the user and
//! calls [`Navigator::recalculate`].

use std::sync::Arc;

use log::{info, warn};

use crate::backend::RoutingBackend;
use crate::bridge::{MapSurface, RouteRenderingBridge};
use crate::config::Config;
use crate::engine::{NavUpdate, NavigationEngine};
use crate::error::{RecalcFailure, Result};
use crate::recalculation::{CancelHandle, RecalculationFlow};
use crate::route_model::RouteModel;
use crate::tracker::{LocationProvider, PositionTracker, TrackerEvent};
use crate::{Coordinate, Position};

/// Origin and destination the routes were requested for.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TripEndpoints {
    pub start: Option<Coordinate>,
    pub end: Option<Coordinate>,
}

impl TripEndpoints {
    pub fn new(start: Coordinate, end: Coordinate) -> Self {
        Self {
            start: Some(start),
            end: Some(end),
        }
    }

    pub fn both(&self) -> Option<(Coordinate, Coordinate)> {
        Some((self.start?, self.end?))
    }
}

pub struct Navigator<P: LocationProvider, R: RoutingBackend, M: MapSurface> {
    tracker: PositionTracker<P>,
    engine: NavigationEngine,
    bridge: RouteRenderingBridge<M>,
    recalculation: RecalculationFlow<R>,
    endpoints: TripEndpoints,
}

impl<P: LocationProvider, R: RoutingBackend, M: MapSurface> Navigator<P, R, M> {
    /// Build the screen and queue the initial route drawing.
    pub fn new(
        provider: Arc<P>,
        backend: Arc<R>,
        surface: M,
        model: RouteModel,
        endpoints: TripEndpoints,
        config: &Config,
    ) -> Result<Self> {
        let mut bridge = RouteRenderingBridge::new(surface, config);
        bridge.show_routes(&model, None)?;
        if let Some(start) = endpoints.start {
            bridge.set_start(start)?;
        }
        if let Some(end) = endpoints.end {
            bridge.set_end(end)?;
        }

        Ok(Self {
            tracker: PositionTracker::new(provider, config.navigation_watch),
            engine: NavigationEngine::with_config(model, config),
            bridge,
            recalculation: RecalculationFlow::new(backend, config),
            endpoints,
        })
    }

    pub fn subscribe(&mut self, listener: impl FnMut(&NavUpdate) + Send + 'static) {
        self.engine.subscribe(listener);
    }

    pub fn engine(&self) -> &NavigationEngine {
        &self.engine
    }

    pub fn tracker(&self) -> &PositionTracker<P> {
        &self.tracker
    }

    pub fn bridge(&self) -> &RouteRenderingBridge<M> {
        &self.bridge
    }

    pub fn endpoints(&self) -> &TripEndpoints {
        &self.endpoints
    }

    pub fn latest_position(&self) -> Option<Position> {
        self.tracker.latest()
    }

    pub fn is_recalculating(&self) -> bool {
        self.recalculation.is_loading()
    }

    /// Handle for aborting a recalculation from elsewhere (screen teardown).
    pub fn cancel_handle(&self) -> CancelHandle {
        self.recalculation.cancel_handle()
    }

    // ========================================================================
    // Position Flow
    // ========================================================================

    /// Start tracking and evaluate the first fix.
    ///
    /// Failures are also emitted to listeners as `gps_error`.
    pub async fn start(&mut self) -> Result<Vec<NavUpdate>> {
        match self.tracker.start().await {
            Ok(first) => {
                self.engine.start();
                self.apply_fix(first)
            }
            Err(e) => {
                self.engine.report_gps_error(&e);
                Err(e)
            }
        }
    }

    /// Process the next tracker event. `Ok(None)` when tracking is not active.
    pub async fn step(&mut self) -> Result<Option<Vec<NavUpdate>>> {
        let Some(event) = self.tracker.next_event().await else {
            return Ok(None);
        };
        match event {
            TrackerEvent::Position(position) => self.apply_fix(position).map(Some),
            TrackerEvent::Error(e) => Ok(Some(vec![self.engine.report_gps_error(&e)])),
        }
    }

    fn apply_fix(&mut self, position: Position) -> Result<Vec<NavUpdate>> {
        let updates = self.engine.on_position_update(position.clone());
        self.bridge.update_user_marker(&position)?;
        Ok(updates)
    }

    // ========================================================================
    // Map and Routes
    // ========================================================================

    /// Forward a surface message. Returns a clicked coordinate, if any.
    pub fn handle_map_message(&mut self, raw: &str) -> Result<Option<Coordinate>> {
        self.bridge.handle_message(raw)
    }

    pub fn set_destination(&mut self, end: Coordinate) -> Result<()> {
        self.endpoints.end = Some(end);
        self.bridge.set_end(end)
    }

    pub fn set_origin(&mut self, start: Coordinate) -> Result<()> {
        self.endpoints.start = Some(start);
        self.bridge.set_start(start)
    }

    /// Select another candidate and redraw. `Ok(false)` for a bad index.
    pub fn switch_route(&mut self, index: usize) -> Result<bool> {
        if !self.engine.switch_route(index) {
            return Ok(false);
        }
        let position = self.tracker.latest();
        self.bridge.show_routes(self.engine.model(), position.as_ref())?;
        Ok(true)
    }

    /// Re-fetch routes for the trip and replace the model.
    ///
    /// Tracking keeps running; the map is cleared and redrawn with the new
    /// candidates, first one selected. Returns the number of candidates.
    pub async fn recalculate(&mut self) -> std::result::Result<usize, RecalcFailure> {
        let model = self.recalculation.recalculate(&self.endpoints).await?;
        let count = model.len();

        self.engine.replace_model(model);
        self.bridge.clear_all()?;
        let position = self.tracker.latest();
        self.bridge.show_routes(self.engine.model(), position.as_ref())?;
        if let Some(start) = self.endpoints.start {
            self.bridge.set_start(start)?;
        }
        if let Some(end) = self.endpoints.end {
            self.bridge.set_end(end)?;
        }
        info!("[Navigator] Recalculated: {} routes", count);
        Ok(count)
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    pub fn pause(&mut self) {
        self.tracker.pause();
        self.engine.pause();
    }

    pub fn resume(&mut self) -> Result<()> {
        if let Err(e) = self.tracker.resume() {
            warn!("[Navigator] Resume failed: {}", e);
            self.engine.report_gps_error(&e);
            return Err(e);
        }
        self.engine.resume();
        Ok(())
    }

    /// Tear down tracking and abort any in-flight recalculation.
    pub fn stop(&mut self) {
        self.recalculation.cancel();
        self.tracker.stop();
        self.engine.stop();
        info!("[Navigator] Stopped");
    }
}
