//! FFI bindings for mobile platforms (iOS/Android).
//!
//! Exposes a process-wide navigation engine to Kotlin and Swift through
//! UniFFI. The host owns GPS and the map; it loads routes, pushes fixes and
//! renders the NavUpdates returned as JSON.

use std::sync::{Mutex, MutexGuard, PoisonError};

use log::{info, warn};
use once_cell::sync::Lazy;

use crate::backend::{RouteMode, RoutingBackend};
use crate::config::Config;
use crate::engine::NavigationEngine;
use crate::geo_utils::Bounds;
use crate::http::BackendClient;
use crate::route_model::RouteModel;
use crate::{format, haversine_distance, init_logging, Coordinate, NavError, Position};

/// Error surfaced to Kotlin/Swift.
#[derive(Debug, thiserror::Error, uniffi::Error)]
pub enum FfiNavError {
    #[error("No routes loaded")]
    NoRoutes,
    #[error("{message}")]
    Failed { message: String },
}

impl From<NavError> for FfiNavError {
    fn from(err: NavError) -> Self {
        FfiNavError::Failed {
            message: err.user_message(),
        }
    }
}

// ============================================================================
// Global Singleton
// ============================================================================

/// Global engine instance, present once routes are loaded.
pub static ENGINE: Lazy<Mutex<Option<NavigationEngine>>> = Lazy::new(|| Mutex::new(None));

/// Global configuration, replaced by `nav_configure`.
static CONFIG: Lazy<Mutex<Config>> = Lazy::new(|| Mutex::new(Config::default()));

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Run `f` against the loaded engine.
pub fn with_engine<F, R>(f: F) -> Result<R, FfiNavError>
where
    F: FnOnce(&mut NavigationEngine) -> R,
{
    let mut guard = lock(&ENGINE);
    let engine = guard.as_mut().ok_or(FfiNavError::NoRoutes)?;
    Ok(f(engine))
}

fn install(model: RouteModel) -> u32 {
    let count = model.len() as u32;
    let engine = NavigationEngine::with_config(model, &lock(&CONFIG));
    *lock(&ENGINE) = Some(engine);
    count
}

fn parse_mode(mode: Option<String>) -> Result<Option<RouteMode>, FfiNavError> {
    match mode.as_deref() {
        None | Some("") => Ok(None),
        Some(raw) => serde_json::from_value(serde_json::Value::String(raw.to_lowercase()))
            .map(Some)
            .map_err(|_| FfiNavError::Failed {
                message: format!("Unknown route mode: {}", raw),
            }),
    }
}

// ============================================================================
// FFI Exports
// ============================================================================

/// Apply host configuration (JSON, missing fields take defaults).
#[uniffi::export]
pub fn nav_configure(config_json: String) -> Result<(), FfiNavError> {
    init_logging();
    let config = Config::from_json(&config_json)?;
    info!("[SafeRouteNav] Configured for {}", config.api_base_url);
    *lock(&CONFIG) = config;
    Ok(())
}

/// Map style URL for the configured map key.
#[uniffi::export]
pub fn nav_map_style_url() -> Option<String> {
    lock(&CONFIG).map_style_url()
}

/// Load routes from a raw route array or a `/safe_route` response body.
/// Returns the number of candidates.
#[uniffi::export]
pub fn nav_load_routes(routes_json: String) -> Result<u32, FfiNavError> {
    init_logging();
    let value: serde_json::Value =
        serde_json::from_str(&routes_json).map_err(NavError::from)?;
    let model = match value.as_array() {
        Some(raw_routes) => RouteModel::normalize(raw_routes),
        None => RouteModel::from_response(&value)?,
    };
    let count = install(model);
    info!("[SafeRouteNav] Loaded {} routes", count);
    Ok(count)
}

/// Fetch routes from the backend and load them. Blocks the calling thread.
#[uniffi::export]
pub fn nav_fetch_routes(
    start_lat: f64,
    start_lng: f64,
    end_lat: f64,
    end_lng: f64,
    mode: Option<String>,
) -> Result<u32, FfiNavError> {
    use tokio::runtime::Runtime;

    init_logging();
    let mode = parse_mode(mode)?;
    let client = BackendClient::new(lock(&CONFIG).clone())?;
    let rt = Runtime::new().map_err(|e| FfiNavError::Failed {
        message: format!("Runtime error: {}", e),
    })?;

    let start = Coordinate::new(start_lat, start_lng);
    let end = Coordinate::new(end_lat, end_lng);
    let model = rt.block_on(client.fetch_routes(start, end, mode))?;
    if !model.has_navigable_route() {
        warn!("[SafeRouteNav] Backend returned no navigable route");
        return Err(NavError::route_unavailable("No navigable route returned").into());
    }
    Ok(install(model))
}

/// Feed one fix. Returns the emitted NavUpdates as a JSON array.
#[uniffi::export]
pub fn nav_push_position(
    latitude: f64,
    longitude: f64,
    accuracy: f64,
    speed_mps: f64,
) -> Result<String, FfiNavError> {
    let position = Position::new(
        Coordinate::new(latitude, longitude),
        accuracy,
        speed_mps,
        chrono::Utc::now(),
    );
    let updates = with_engine(|e| e.on_position_update(position))?;
    Ok(serde_json::to_string(&updates).map_err(NavError::from)?)
}

/// Report a host-side GPS failure. Returns the `gps_error` update as JSON.
#[uniffi::export]
pub fn nav_report_gps_error(message: String) -> Result<String, FfiNavError> {
    let update = with_engine(|e| e.report_gps_error(&NavError::gps(message)))?;
    Ok(serde_json::to_string(&update).map_err(NavError::from)?)
}

#[uniffi::export]
pub fn nav_switch_route(index: u32) -> Result<bool, FfiNavError> {
    with_engine(|e| e.switch_route(index as usize))
}

/// All candidate routes (canonical shape) as JSON.
#[uniffi::export]
pub fn nav_routes_json() -> Result<String, FfiNavError> {
    let routes = with_engine(|e| e.model().routes().to_vec())?;
    Ok(serde_json::to_string(&routes).map_err(NavError::from)?)
}

/// Bounding box of the selected route, for fitting the map camera.
#[uniffi::export]
pub fn nav_selected_bounds() -> Option<Bounds> {
    with_engine(|e| e.current_route().and_then(|r| r.bounds()))
        .ok()
        .flatten()
}

#[uniffi::export]
pub fn nav_progress() -> f64 {
    with_engine(|e| e.progress_percent()).unwrap_or(0.0)
}

#[uniffi::export]
pub fn nav_pause() -> Result<(), FfiNavError> {
    with_engine(|e| e.pause())
}

#[uniffi::export]
pub fn nav_resume() -> Result<(), FfiNavError> {
    with_engine(|e| e.resume())
}

/// Stop navigation and drop the loaded routes.
#[uniffi::export]
pub fn nav_stop() {
    if let Some(mut engine) = lock(&ENGINE).take() {
        engine.stop();
        info!("[SafeRouteNav] Navigation stopped");
    }
}

#[uniffi::export]
pub fn ffi_haversine_distance(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    haversine_distance(&Coordinate::new(lat1, lng1), &Coordinate::new(lat2, lng2))
}

#[uniffi::export]
pub fn ffi_format_distance(meters: f64) -> String {
    format::format_distance(meters)
}

#[cfg(test)]
mod tests {
    use super::*;

    // Single test so the global engine isn't shared between threads
    #[test]
    fn test_engine_singleton_flow() {
        nav_stop();
        assert!(matches!(nav_push_position(0.0, 0.0, 5.0, 0.0), Err(FfiNavError::NoRoutes)));
        assert!(matches!(nav_pause(), Err(FfiNavError::NoRoutes)));
        assert!(matches!(nav_resume(), Err(FfiNavError::NoRoutes)));

        let count = nav_load_routes(
            r#"{"success": true, "routes": [
                {"coords": [[12.90, 77.50], [12.91, 77.51], [12.92, 77.52]]},
                {"coords": [[12.90, 77.50], [12.92, 77.52]]}
            ]}"#
            .to_string(),
        )
        .unwrap();
        assert_eq!(count, 2);

        // Paused engines ignore fixes
        nav_pause().unwrap();
        assert_eq!(nav_push_position(12.92, 77.52, 5.0, 1.2).unwrap(), "[]");
        nav_resume().unwrap();

        let invalid = nav_push_position(f64::NAN, f64::NAN, 5.0, 0.0).unwrap();
        let updates: serde_json::Value = serde_json::from_str(&invalid).unwrap();
        assert_eq!(updates[0]["type"], "gps_error");
        assert_eq!(nav_progress(), 0.0);

        let json = nav_push_position(12.92, 77.52, 5.0, 1.2).unwrap();
        let updates: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(updates[0]["type"], "step_updated");
        assert_eq!(updates[1]["type"], "destination_reached");
        assert_eq!(nav_progress(), 100.0);

        assert!(nav_switch_route(1).unwrap());
        assert!(!nav_switch_route(7).unwrap());
        let bounds = nav_selected_bounds().unwrap();
        assert_eq!(bounds.max_lat, 12.92);

        nav_stop();
        assert!(nav_selected_bounds().is_none());
    }

    #[test]
    fn test_parse_mode() {
        assert_eq!(parse_mode(None).unwrap(), None);
        assert_eq!(parse_mode(Some("Walk".to_string())).unwrap(), Some(RouteMode::Walk));
        assert!(parse_mode(Some("teleport".to_string())).is_err());
    }

    #[test]
    fn test_haversine_export() {
        assert_eq!(ffi_haversine_distance(1.0, 1.0, 1.0, 1.0), 0.0);
    }
}
