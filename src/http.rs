//! HTTP client for the safe-route backend.
//!
//! Implements [`RoutingBackend`] and [`TrackingBackend`] over reqwest with:
//! - A single pooled `Client` with the configured per-request timeout
//! - Timeouts reported separately from connection failures
//! - `{success: false, message}` bodies surfaced as backend rejections
//! - Garbled route responses classified as route-unavailable

use log::{debug, info, warn};
use reqwest::{Client, StatusCode};
use serde::Serialize;
use serde_json::Value;

use crate::backend::{
    CreateSessionRequest, CreatedSession, LocationUpdate, RouteMode, RoutingBackend,
    SafeRouteRequest, StopSessionRequest, TrackingBackend,
};
use crate::config::Config;
use crate::error::{NavError, Result};
use crate::route_model::RouteModel;
use crate::Coordinate;

/// Port the tracking page is served on when the backend omits its host
const TRACKING_PORT: u16 = 5000;

pub struct BackendClient {
    client: Client,
    config: Config,
}

impl BackendClient {
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| NavError::Config {
                message: format!("Failed to create HTTP client: {}", e),
            })?;
        info!("[BackendClient] Using {}", config.api_base_url);
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// POST a JSON body and return the raw response text of a 2xx answer.
    async fn post<B: Serialize + ?Sized>(&self, operation: &str, path: &str, body: &B) -> Result<String> {
        let url = self.config.endpoint(path);
        debug!("[BackendClient] {} -> POST {}", operation, url);

        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| transport_error(operation, e))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| transport_error(operation, e))?;

        if !status.is_success() {
            let message = serde_json::from_str::<Value>(&text)
                .ok()
                .and_then(|body| error_message(&body))
                .unwrap_or_else(|| format!("HTTP {}", status));
            warn!("[BackendClient] {} rejected: {} {}", operation, status, message);
            return Err(NavError::BackendRejected {
                status: status.as_u16(),
                message,
            });
        }
        Ok(text)
    }
}

fn transport_error(operation: &str, err: reqwest::Error) -> NavError {
    if err.is_timeout() {
        warn!("[BackendClient] {} timed out", operation);
        NavError::NetworkTimeout {
            operation: operation.to_string(),
        }
    } else {
        warn!("[BackendClient] {} failed: {}", operation, err);
        NavError::NetworkFailure {
            message: err.to_string(),
        }
    }
}

fn error_message(body: &Value) -> Option<String> {
    body.get("message")
        .or_else(|| body.get("error"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Parse a 2xx body, treating `success: false` as a rejection.
fn parse_envelope(text: &str) -> Result<Value> {
    let body: Value = serde_json::from_str(text)?;
    if body.get("success").and_then(Value::as_bool) == Some(false) {
        return Err(NavError::BackendRejected {
            status: StatusCode::OK.as_u16(),
            message: error_message(&body).unwrap_or_else(|| "Request failed".to_string()),
        });
    }
    Ok(body)
}

/// Parse a routing response. Anything unreadable is route-unavailable.
fn parse_routes(text: &str) -> Result<RouteModel> {
    let body = parse_envelope(text).map_err(|e| match e {
        NavError::Serialization { message } => NavError::route_unavailable(message),
        other => other,
    })?;
    RouteModel::from_response(&body)
}

/// Rebuild a tracking URL that came back without a host.
pub fn repair_tracking_url(tracking_url: &str, session_id: &str, host: &str) -> String {
    let hostless = tracking_url.is_empty()
        || tracking_url.starts_with("http:///")
        || tracking_url.starts_with("https:///");
    if hostless {
        let repaired = format!("http://{}:{}/track/{}", host, TRACKING_PORT, session_id);
        debug!("[BackendClient] Repaired tracking URL: {}", repaired);
        repaired
    } else {
        tracking_url.to_string()
    }
}

impl RoutingBackend for BackendClient {
    async fn fetch_routes(
        &self,
        start: Coordinate,
        end: Coordinate,
        mode: Option<RouteMode>,
    ) -> Result<RouteModel> {
        let request = SafeRouteRequest::new(start, end, mode);
        let text = self.post("Route fetch", "/safe_route", &request).await?;
        let model = parse_routes(&text)?;
        info!(
            "[BackendClient] Received {} routes ({:?})",
            model.len(),
            mode
        );
        Ok(model)
    }

    async fn health_check(&self) -> Result<bool> {
        let url = self.config.endpoint("/health");
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| transport_error("Health check", e))?;
        Ok(response.status().is_success())
    }
}

impl TrackingBackend for BackendClient {
    async fn create_tracking_session(&self, request: CreateSessionRequest) -> Result<CreatedSession> {
        let text = self
            .post("Create tracking session", "/create_tracking_session", &request)
            .await?;
        let body = parse_envelope(&text)?;
        let mut session: CreatedSession = serde_json::from_value(body)?;
        session.tracking_url = repair_tracking_url(
            &session.tracking_url,
            &session.session_id,
            self.config.api_host(),
        );
        info!("[BackendClient] Created tracking session {}", session.session_id);
        Ok(session)
    }

    async fn update_location(&self, session_id: &str, update: LocationUpdate) -> Result<()> {
        let path = format!("/update_location/{}", session_id);
        self.post("Location update", &path, &update).await?;
        Ok(())
    }

    async fn stop_tracking_session(&self, session_id: &str) -> Result<()> {
        let request = StopSessionRequest {
            session_id: session_id.to_string(),
        };
        self.post("Stop tracking session", "/stop_tracking_session", &request)
            .await?;
        info!("[BackendClient] Stopped tracking session {}", session_id);
        Ok(())
    }
}
