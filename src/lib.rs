//! # Safe Route Nav
//!
//! Navigation core for a personal-safety app: route tracking against backend
//! safe routes, off-route detection, and live location sharing.
//!
//! This library provides:
//! - Route normalization for the heterogeneous payloads of the safe-route backend
//! - A navigation engine that matches live GPS fixes against the active route
//! - A typed message bridge to the map rendering surface
//! - Time-boxed live location sessions that survive app restarts
//!
//! ## Features
//!
//! - **`http`** - reqwest client for the routing/tracking backend (default)
//! - **`persistence`** - SQLite-backed durable local state (default)
//! - **`ffi`** - FFI bindings for mobile platforms (iOS/Android)
//!
//! ## Quick Start
//!
//! ```rust
//! use safe_route_nav::{Coordinate, NavigationEngine, NavUpdate, Position, RouteModel};
//! use serde_json::json;
//!
//! let model = RouteModel::normalize(&[json!({
//!     "coords": [
//!         {"lat": 12.90, "lng": 77.50},
//!         {"lat": 12.91, "lng": 77.51},
//!         {"lat": 12.92, "lng": 77.52},
//!     ],
//!     "distance": 1.2,
//!     "duration": 15,
//! })]);
//!
//! let mut engine = NavigationEngine::new(model);
//! engine.subscribe(|update: &NavUpdate| println!("{}", update.kind()));
//! engine.on_position_update(Position::at(Coordinate::new(12.90, 77.50)));
//! assert_eq!(engine.progress_percent(), 0.0);
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// Unified error handling
pub mod error;
pub use error::{NavError, OptionExt, RecalcFailure, Result};

// Host-supplied configuration
pub mod config;
pub use config::{Accuracy, Config, WatchOptions};

// Geographic utilities (distance, bearing, bounds)
pub mod geo_utils;
pub use geo_utils::haversine_distance;

// User-facing text helpers
pub mod format;

// Route payload normalization and selection
pub mod route_model;
pub use route_model::{RiskLevel, Route, RouteModel};

// Navigation step derivation
pub mod steps;
pub use steps::{NavStep, StepKind, StepMode};

// Device position acquisition
pub mod tracker;
pub use tracker::{LocationProvider, PermissionStatus, PositionTracker, TrackerEvent, TrackerState};

// Stateful navigation engine
pub mod engine;
pub use engine::{NavUpdate, NavigationEngine, RouteInfo, StepUpdate};

// Map rendering surface bridge
pub mod bridge;
pub use bridge::{InboundEvent, LatLng, MapSurface, OutboundMessage, RouteRenderingBridge};

// Backend contracts (routing + tracking sessions)
pub mod backend;
pub use backend::{RouteMode, RoutingBackend, TrackingBackend};

// HTTP implementation of the backend contracts
#[cfg(feature = "http")]
pub mod http;
#[cfg(feature = "http")]
pub use http::BackendClient;

// Route re-fetching after going off route
pub mod recalculation;
pub use recalculation::{CancelHandle, RecalculationFlow};

// Durable local state
pub mod persistence;
pub use persistence::{KeyValueStore, MemoryStore, StoredSession, UserIdentity};
#[cfg(feature = "persistence")]
pub use persistence::SqliteStore;

// Live location broadcasting
pub mod live_location;
pub use live_location::{LiveEvent, LiveLocationSession, RestoreOutcome, StopReport};

// Navigation screen orchestration
pub mod navigator;
pub use navigator::{Navigator, TripEndpoints};

// Simulated provider and map surface for replay and tests
pub mod simulation;
pub use simulation::{FixedRoutes, RecordingSurface, SimulatedProvider};

// FFI bindings for mobile platforms (iOS/Android)
#[cfg(feature = "ffi")]
pub mod ffi;

#[cfg(feature = "ffi")]
uniffi::setup_scaffolding!();

/// Initialize logging for Android (only used in FFI)
#[cfg(all(feature = "ffi", target_os = "android"))]
pub(crate) fn init_logging() {
    use android_logger::Config;
    use log::LevelFilter;

    android_logger::init_once(
        Config::default()
            .with_max_level(LevelFilter::Debug)
            .with_tag("SafeRouteNav"),
    );
}

#[cfg(all(feature = "ffi", not(target_os = "android")))]
pub(crate) fn init_logging() {
    // No-op on non-Android platforms
}

// ============================================================================
// Core Types
// ============================================================================

/// A GPS coordinate with latitude and longitude in degrees.
///
/// # Example
/// ```
/// use safe_route_nav::Coordinate;
/// let point = Coordinate::new(12.9716, 77.5946); // Bengaluru
/// assert!(point.is_valid());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinate {
    /// Create a new coordinate.
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Check if the coordinate is finite and inside the WGS84 ranges.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }
}

/// A single device fix.
///
/// The navigation engine keeps only the most recent one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub coordinate: Coordinate,
    /// Horizontal accuracy in meters
    pub accuracy: f64,
    /// Ground speed in m/s (never negative)
    pub speed_mps: f64,
    /// Course over ground in degrees, when the device reports one
    pub heading: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

impl Position {
    /// Create a fix, clamping invalid speeds to 0.
    pub fn new(coordinate: Coordinate, accuracy: f64, speed_mps: f64, timestamp: DateTime<Utc>) -> Self {
        let speed_mps = if speed_mps.is_finite() && speed_mps > 0.0 {
            speed_mps
        } else {
            0.0
        };
        Self {
            coordinate,
            accuracy,
            speed_mps,
            heading: None,
            timestamp,
        }
    }

    /// A stationary fix at `coordinate`, stamped now.
    pub fn at(coordinate: Coordinate) -> Self {
        Self::new(coordinate, 0.0, 0.0, Utc::now())
    }

    pub fn with_heading(mut self, heading: f64) -> Self {
        self.heading = Some(heading);
        self
    }
}

// ============================================================================
// Tests
// ============================================================================
