//! Host-supplied configuration.
//!
//! Constructed once at startup and passed into the components that need it;
//! nothing here is a module-level global.

use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{NavError, Result};
use crate::steps::StepMode;

/// Default backend used during local development
const DEFAULT_API_URL: &str = "http://localhost:5000";

const MAP_STYLE_BASE: &str = "https://maps.geoapify.com/v1/styles/osm-bright/style.json";

/// Location accuracy class requested from the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Accuracy {
    Low,
    Balanced,
    High,
}

/// Parameters for a continuous position subscription.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WatchOptions {
    pub accuracy: Accuracy,
    /// Minimum movement between updates (meters)
    pub distance_interval_m: f64,
    /// Minimum time between updates
    #[serde(with = "duration_ms")]
    pub time_interval: Duration,
}

impl WatchOptions {
    /// Navigation-grade tracking: high accuracy, 5 m / 1 s.
    pub fn navigation() -> Self {
        Self {
            accuracy: Accuracy::High,
            distance_interval_m: 5.0,
            time_interval: Duration::from_secs(1),
        }
    }

    /// Background safety broadcast: balanced accuracy, 10 m / 10 s.
    pub fn live_sharing() -> Self {
        Self {
            accuracy: Accuracy::Balanced,
            distance_interval_m: 10.0,
            time_interval: Duration::from_secs(10),
        }
    }
}

/// Configuration for the navigation core.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Base URL of the safe-route backend, without trailing slash
    pub api_base_url: String,
    /// Key for the map tile/style provider
    pub map_api_key: Option<String>,
    /// Per-request HTTP timeout
    #[serde(with = "duration_ms")]
    pub request_timeout: Duration,
    /// Deadline for a route re-fetch before it is cancelled
    #[serde(with = "duration_ms")]
    pub route_fetch_timeout: Duration,
    pub navigation_watch: WatchOptions,
    pub live_watch: WatchOptions,
    /// How often an active live session checks its expiry
    #[serde(with = "duration_ms")]
    pub expiry_check_interval: Duration,
    pub step_mode: StepMode,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_URL.to_string(),
            map_api_key: None,
            request_timeout: Duration::from_secs(30),
            route_fetch_timeout: Duration::from_secs(10),
            navigation_watch: WatchOptions::navigation(),
            live_watch: WatchOptions::live_sharing(),
            expiry_check_interval: Duration::from_secs(5),
            step_mode: StepMode::Endpoints,
        }
    }
}

impl Config {
    /// Build a configuration from `SAFE_ROUTE_*` environment variables,
    /// falling back to defaults for anything unset.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Ok(url) = env::var("SAFE_ROUTE_API_URL") {
            config.api_base_url = url;
        }
        if let Ok(key) = env::var("SAFE_ROUTE_MAP_KEY") {
            if !key.is_empty() {
                config.map_api_key = Some(key);
            }
        }
        if let Ok(secs) = env::var("SAFE_ROUTE_TIMEOUT_SECS") {
            let secs: u64 = secs.parse().map_err(|_| NavError::Config {
                message: format!("SAFE_ROUTE_TIMEOUT_SECS is not a number: {}", secs),
            })?;
            config.request_timeout = Duration::from_secs(secs);
        }
        config.normalized()
    }

    /// Parse a host-supplied JSON document. Missing fields take defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(json).map_err(|e| NavError::Config {
            message: format!("Invalid configuration JSON: {}", e),
        })?;
        config.normalized()
    }

    fn normalized(mut self) -> Result<Self> {
        self.api_base_url = self.api_base_url.trim().trim_end_matches('/').to_string();
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.api_base_url.is_empty() {
            return Err(NavError::Config {
                message: "API base URL is empty".to_string(),
            });
        }
        if !self.api_base_url.starts_with("http://") && !self.api_base_url.starts_with("https://") {
            return Err(NavError::Config {
                message: format!("API base URL must be http(s): {}", self.api_base_url),
            });
        }
        if self.route_fetch_timeout.is_zero() || self.request_timeout.is_zero() {
            return Err(NavError::Config {
                message: "Timeouts must be non-zero".to_string(),
            });
        }
        Ok(())
    }

    /// Full URL for a backend path such as `/safe_route`.
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.api_base_url, path.trim_start_matches('/'))
    }

    /// Host part of the base URL (no scheme, port or path).
    pub fn api_host(&self) -> &str {
        let without_scheme = self
            .api_base_url
            .split_once("://")
            .map(|(_, rest)| rest)
            .unwrap_or(&self.api_base_url);
        without_scheme
            .split(['/', ':'])
            .next()
            .unwrap_or(without_scheme)
    }

    /// Style document URL for the map surface, if a key is configured.
    pub fn map_style_url(&self) -> Option<String> {
        self.map_api_key
            .as_ref()
            .map(|key| format!("{}?apiKey={}", MAP_STYLE_BASE, key))
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let ms = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms))
    }
}
