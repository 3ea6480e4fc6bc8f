//! Unified error handling for the navigation core.
//!
//! Every failure that changes user-facing state is returned as a `NavError`
//! (or surfaced as a `NavUpdate`) instead of being logged and swallowed.
//! Being off route is not an error: it is a steady-state classification
//! carried by `NavUpdate::OffRoute`.

use thiserror::Error;

/// Unified error type for navigation operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum NavError {
    /// Foreground location permission was refused or revoked
    #[error("Location permission not granted")]
    PermissionDenied,

    /// Provider unavailable, timed out or otherwise failed to deliver a fix
    #[error("Unable to get your location: {message}")]
    GpsAcquisitionFailed { message: String },

    /// Empty, degenerate or garbled route data
    #[error("Route unavailable: {message}")]
    RouteUnavailable { message: String },

    /// Client-side deadline elapsed before the backend answered
    #[error("{operation} timed out")]
    NetworkTimeout { operation: String },

    /// Connection-level failure reaching the backend
    #[error("Network error: {message}")]
    NetworkFailure { message: String },

    /// Well-formed error response from the backend
    #[error("Backend rejected request ({status}): {message}")]
    BackendRejected { status: u16, message: String },

    /// Route index outside the candidate list
    #[error("Route index {index} out of range ({len} routes)")]
    InvalidIndex { index: usize, len: usize },

    /// Durable local storage error
    #[error("Persistence error: {message}")]
    Persistence { message: String },

    /// Configuration error
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// JSON encoding/decoding error
    #[error("Serialization error: {message}")]
    Serialization { message: String },
}

impl NavError {
    pub fn gps(message: impl Into<String>) -> Self {
        NavError::GpsAcquisitionFailed {
            message: message.into(),
        }
    }

    pub fn route_unavailable(message: impl Into<String>) -> Self {
        NavError::RouteUnavailable {
            message: message.into(),
        }
    }

    pub fn persistence(message: impl Into<String>) -> Self {
        NavError::Persistence {
            message: message.into(),
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, NavError::NetworkTimeout { .. })
    }

    /// Short text for the non-blocking notification shown to the user.
    pub fn user_message(&self) -> String {
        match self {
            NavError::PermissionDenied => "Location permission not granted".to_string(),
            NavError::GpsAcquisitionFailed { message } => message.clone(),
            NavError::RouteUnavailable { .. } => "Could not find a route".to_string(),
            NavError::NetworkTimeout { .. } => {
                "The server took too long to respond. Please try again.".to_string()
            }
            NavError::NetworkFailure { .. } => {
                "Network error. Please check your connection.".to_string()
            }
            NavError::BackendRejected { message, .. } => message.clone(),
            NavError::InvalidIndex { .. } => "That route is no longer available".to_string(),
            NavError::Persistence { .. } => "Could not save your session".to_string(),
            NavError::Config { message } => message.clone(),
            NavError::Serialization { .. } => "Received unexpected data".to_string(),
        }
    }
}

impl From<serde_json::Error> for NavError {
    fn from(err: serde_json::Error) -> Self {
        NavError::Serialization {
            message: err.to_string(),
        }
    }
}

#[cfg(feature = "persistence")]
impl From<rusqlite::Error> for NavError {
    fn from(err: rusqlite::Error) -> Self {
        NavError::Persistence {
            message: err.to_string(),
        }
    }
}

/// Result type alias for navigation operations.
pub type Result<T> = std::result::Result<T, NavError>;

/// Consolidated outcome of a failed route recalculation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RecalcFailure {
    /// The re-fetch exceeded the client-side deadline and was cancelled
    #[error("Route recalculation timed out")]
    Timeout,
    /// No trip start/end is known, so nothing can be re-fetched
    #[error("Start and end points are required")]
    MissingEndpoints,
    /// Torn down before the backend answered
    #[error("Route recalculation cancelled")]
    Cancelled,
    /// Network failure, backend rejection, or unusable route data
    #[error("Failed to recalculate routes: {source}")]
    Failed { source: NavError },
}

impl RecalcFailure {
    pub fn user_message(&self) -> String {
        match self {
            RecalcFailure::Timeout => "Route recalculation timed out. Please try again.".to_string(),
            RecalcFailure::MissingEndpoints => "Start and end points are required".to_string(),
            RecalcFailure::Cancelled => "Route recalculation cancelled".to_string(),
            RecalcFailure::Failed { source } => match source {
                NavError::RouteUnavailable { .. } => {
                    "Could not find alternative routes".to_string()
                }
                _ => "Failed to recalculate routes".to_string(),
            },
        }
    }
}

impl From<NavError> for RecalcFailure {
    fn from(err: NavError) -> Self {
        if err.is_timeout() {
            RecalcFailure::Timeout
        } else {
            RecalcFailure::Failed { source: err }
        }
    }
}

/// Extension trait for converting Option to NavError.
pub trait OptionExt<T> {
    /// Convert Option to Result with a route-unavailable error.
    fn ok_or_route_unavailable(self, message: &str) -> Result<T>;

    /// Convert Option to Result with a GPS acquisition error.
    fn ok_or_gps(self, message: &str) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_route_unavailable(self, message: &str) -> Result<T> {
        self.ok_or_else(|| NavError::route_unavailable(message))
    }

    fn ok_or_gps(self, message: &str) -> Result<T> {
        self.ok_or_else(|| NavError::gps(message))
    }
}
