//! Backend contracts for the routing and tracking-session services.
//!
//! The traits are the seam between the navigation core and the network; the
//! reqwest implementation lives in [`crate::http`] behind the `http` feature.
//! Wire types here mirror the backend's JSON bodies field for field.

use std::future::Future;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::bridge::LatLng;
use crate::error::Result;
use crate::route_model::RouteModel;
use crate::{Coordinate, Position};

/// Travel mode requested from `/safe_route`. Omitted to ask for alternatives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteMode {
    Walk,
    Vehicle,
    Single,
}

/// Body of `POST /safe_route`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafeRouteRequest {
    pub start: LatLng,
    pub end: LatLng,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<RouteMode>,
}

impl SafeRouteRequest {
    pub fn new(start: Coordinate, end: Coordinate, mode: Option<RouteMode>) -> Self {
        Self {
            start: start.into(),
            end: end.into(),
            mode,
        }
    }
}

/// Body of `POST /create_tracking_session`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateSessionRequest {
    pub user_id: String,
    pub user_name: String,
    pub latitude: f64,
    pub longitude: f64,
    /// 0 = unlimited
    pub duration_minutes: u32,
}

/// Successful answer of `POST /create_tracking_session`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreatedSession {
    pub session_id: String,
    pub tracking_url: String,
}

/// Body of `POST /update_location/{session_id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationUpdate {
    pub latitude: f64,
    pub longitude: f64,
    pub timestamp: DateTime<Utc>,
    pub accuracy: f64,
    pub speed: f64,
    pub heading: Option<f64>,
}

impl From<&Position> for LocationUpdate {
    fn from(position: &Position) -> Self {
        Self {
            latitude: position.coordinate.latitude,
            longitude: position.coordinate.longitude,
            timestamp: position.timestamp,
            accuracy: position.accuracy,
            speed: position.speed_mps,
            heading: position.heading,
        }
    }
}

/// Body of `POST /stop_tracking_session`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StopSessionRequest {
    pub session_id: String,
}

/// Safe-route computation service.
pub trait RoutingBackend: Send + Sync + 'static {
    /// Fetch candidate routes between two points.
    fn fetch_routes(
        &self,
        start: Coordinate,
        end: Coordinate,
        mode: Option<RouteMode>,
    ) -> impl Future<Output = Result<RouteModel>> + Send;

    /// Fetch exactly one route (`mode: "single"`).
    fn fetch_single_route(
        &self,
        start: Coordinate,
        end: Coordinate,
    ) -> impl Future<Output = Result<RouteModel>> + Send {
        async move {
            let model = self.fetch_routes(start, end, Some(RouteMode::Single)).await?;
            Ok(first_route_only(model))
        }
    }

    /// Check `GET /health`.
    fn health_check(&self) -> impl Future<Output = Result<bool>> + Send;
}

/// Live-location tracking-session service.
pub trait TrackingBackend: Send + Sync + 'static {
    fn create_tracking_session(
        &self,
        request: CreateSessionRequest,
    ) -> impl Future<Output = Result<CreatedSession>> + Send;

    fn update_location(
        &self,
        session_id: &str,
        update: LocationUpdate,
    ) -> impl Future<Output = Result<()>> + Send;

    fn stop_tracking_session(&self, session_id: &str) -> impl Future<Output = Result<()>> + Send;
}

fn first_route_only(model: RouteModel) -> RouteModel {
    if model.len() <= 1 {
        return model;
    }
    let mut single = RouteModel::from_routes(model.routes()[..1].to_vec());
    single.safety_score = model.safety_score;
    single.incident_count = model.incident_count;
    single
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_mode_omitted_when_absent() {
        let start = Coordinate::new(12.90, 77.50);
        let end = Coordinate::new(12.92, 77.52);

        let multi = serde_json::to_value(SafeRouteRequest::new(start, end, None)).unwrap();
        assert_eq!(
            multi,
            json!({"start": {"lat": 12.90, "lng": 77.50}, "end": {"lat": 12.92, "lng": 77.52}})
        );

        let single =
            serde_json::to_value(SafeRouteRequest::new(start, end, Some(RouteMode::Single))).unwrap();
        assert_eq!(single["mode"], "single");
    }

    #[test]
    fn test_location_update_from_position() {
        let position = Position::at(Coordinate::new(12.9, 77.5)).with_heading(90.0);
        let update = LocationUpdate::from(&position);
        assert_eq!(update.latitude, 12.9);
        assert_eq!(update.heading, Some(90.0));

        let json = serde_json::to_value(&update).unwrap();
        assert!(json["timestamp"].is_string());
        assert_eq!(json["speed"], 0.0);
    }

    #[test]
    fn test_first_route_only() {
        let mut model = RouteModel::normalize(&[json!({"type": "A"}), json!({"type": "B"})]);
        model.safety_score = Some(70.0);
        let single = first_route_only(model);
        assert_eq!(single.len(), 1);
        assert_eq!(single.routes()[0].route_type, "A");
        assert_eq!(single.safety_score, Some(70.0));
    }
}
