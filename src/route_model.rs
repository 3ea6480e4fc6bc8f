//! # Route Model
//!
//! Normalizes the heterogeneous route payloads of the safe-route backend into
//! canonical [`Route`]s and tracks which candidate is selected.
//!
//! Accepted payload variants:
//! - coordinates under `coords` or `coordinates`
//! - each coordinate as `{lat, lng}`, `{latitude, longitude}` or `[lat, lng]`,
//!   with numbers or numeric strings
//! - `distance`/`distance_km`, `duration`/`duration_min`,
//!   `total_risk`/`incident_count`
//!
//! Coordinates missing either component, or outside the WGS84 ranges, are
//! dropped rather than defaulted. A route left with no coordinates is kept
//! but is not navigable.

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{NavError, Result};
use crate::geo_utils::{compute_bounds, Bounds};
use crate::Coordinate;

/// Display color of the first (recommended) route
pub const PRIMARY_ROUTE_COLOR: &str = "#4CAF50";
/// Display color of every other candidate
pub const SECONDARY_ROUTE_COLOR: &str = "#007BFF";

/// Coarse safety classification derived from a route's risk count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Safest,
    Moderate,
    Risky,
}

impl RiskLevel {
    pub fn from_total_risk(total_risk: u32) -> Self {
        match total_risk {
            0 => RiskLevel::Safest,
            1..=2 => RiskLevel::Moderate,
            _ => RiskLevel::Risky,
        }
    }

    pub fn color(&self) -> &'static str {
        match self {
            RiskLevel::Safest => "#4CAF50",
            RiskLevel::Moderate => "#FFC107",
            RiskLevel::Risky => "#F44336",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            RiskLevel::Safest => "Safest",
            RiskLevel::Moderate => "Moderate",
            RiskLevel::Risky => "Risky",
        }
    }
}

/// A canonical candidate route. Immutable once normalized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Route {
    #[serde(rename = "type")]
    pub route_type: String,
    pub color: String,
    #[serde(rename = "distance")]
    pub distance_km: f64,
    #[serde(rename = "duration")]
    pub duration_min: f64,
    pub total_risk: u32,
    /// Backend safety rating (0-100), when provided
    pub safety_score: Option<f64>,
    #[serde(rename = "coords")]
    pub coordinates: Vec<Coordinate>,
}

impl Route {
    /// Normalize one raw route payload. `index` drives the positional defaults.
    pub fn normalize(raw: &Value, index: usize) -> Self {
        let route_type = raw
            .get("type")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("Route {}", index + 1));

        let color = raw
            .get("color")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| {
                if index == 0 {
                    PRIMARY_ROUTE_COLOR.to_string()
                } else {
                    SECONDARY_ROUTE_COLOR.to_string()
                }
            });

        let distance_km = first_number(raw, &["distance", "distance_km"])
            .filter(|d| *d >= 0.0)
            .unwrap_or(0.0);
        let duration_min = first_number(raw, &["duration", "duration_min"])
            .filter(|d| *d >= 0.0)
            .unwrap_or(0.0);
        let total_risk = first_number(raw, &["total_risk", "incident_count"])
            .filter(|r| *r >= 0.0)
            .map(|r| r.round() as u32)
            .unwrap_or(0);
        let safety_score = first_number(raw, &["safety_score"]);

        let raw_coords = raw
            .get("coords")
            .or_else(|| raw.get("coordinates"))
            .and_then(Value::as_array);
        let coordinates: Vec<Coordinate> = match raw_coords {
            Some(items) => {
                let coords: Vec<Coordinate> =
                    items.iter().filter_map(normalize_coordinate).collect();
                if coords.len() < items.len() {
                    warn!(
                        "[RouteModel] {}: dropped {} of {} coordinates",
                        route_type,
                        items.len() - coords.len(),
                        items.len()
                    );
                }
                coords
            }
            None => Vec::new(),
        };

        Self {
            route_type,
            color,
            distance_km,
            duration_min,
            total_risk,
            safety_score,
            coordinates,
        }
    }

    /// A route needs at least two points to be navigated.
    pub fn is_navigable(&self) -> bool {
        self.coordinates.len() >= 2
    }

    pub fn risk_level(&self) -> RiskLevel {
        RiskLevel::from_total_risk(self.total_risk)
    }

    /// Backend score if provided, otherwise `100 - 10 * total_risk` clamped to 0..=100.
    pub fn safety_score(&self) -> f64 {
        self.safety_score
            .unwrap_or_else(|| 100.0 - 10.0 * self.total_risk as f64)
            .clamp(0.0, 100.0)
    }

    pub fn bounds(&self) -> Option<Bounds> {
        compute_bounds(&self.coordinates)
    }
}

/// Normalize a single raw coordinate, or `None` if it must be dropped.
pub fn normalize_coordinate(raw: &Value) -> Option<Coordinate> {
    let (lat, lng) = match raw {
        Value::Object(map) => (
            map.get("latitude").or_else(|| map.get("lat")),
            map.get("longitude")
                .or_else(|| map.get("lng"))
                .or_else(|| map.get("lon")),
        ),
        Value::Array(items) if items.len() >= 2 => (items.first(), items.get(1)),
        _ => return None,
    };

    let coord = Coordinate::new(as_number(lat?)?, as_number(lng?)?);
    coord.is_valid().then_some(coord)
}

fn as_number(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    n.is_finite().then_some(n)
}

fn first_number(raw: &Value, keys: &[&str]) -> Option<f64> {
    keys.iter().find_map(|key| raw.get(*key).and_then(as_number))
}

/// The candidate routes of one routing response plus the current selection.
///
/// Mutated only by [`RouteModel::switch_route`]; a recalculation replaces
/// the whole model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RouteModel {
    routes: Vec<Route>,
    selected_index: Option<usize>,
    /// Response-level safety score, when the backend sends one
    pub safety_score: Option<f64>,
    /// Response-level incident count, when the backend sends one
    pub incident_count: Option<u32>,
}

impl RouteModel {
    /// Normalize a list of raw route payloads. Selects index 0 when non-empty.
    pub fn normalize(raw_routes: &[Value]) -> Self {
        let routes: Vec<Route> = raw_routes
            .iter()
            .enumerate()
            .map(|(i, raw)| Route::normalize(raw, i))
            .collect();
        debug!(
            "[RouteModel] Normalized {} routes ({} navigable)",
            routes.len(),
            routes.iter().filter(|r| r.is_navigable()).count()
        );
        Self::from_routes(routes)
    }

    pub fn from_routes(routes: Vec<Route>) -> Self {
        let selected_index = if routes.is_empty() { None } else { Some(0) };
        Self {
            routes,
            selected_index,
            safety_score: None,
            incident_count: None,
        }
    }

    /// Build a model from a `/safe_route` response body carrying either
    /// `routes: [...]` or a single `route: {...}`.
    pub fn from_response(body: &Value) -> Result<Self> {
        let raw_routes: Vec<Value> = match (body.get("routes"), body.get("route")) {
            (Some(Value::Array(routes)), _) if !routes.is_empty() => routes.clone(),
            (_, Some(route @ Value::Object(_))) => vec![route.clone()],
            _ => {
                let message = body
                    .get("message")
                    .or_else(|| body.get("error"))
                    .and_then(Value::as_str)
                    .unwrap_or("No routes found");
                return Err(NavError::route_unavailable(message));
            }
        };

        let mut model = Self::normalize(&raw_routes);
        model.safety_score = first_number(body, &["safety_score"]);
        model.incident_count = first_number(body, &["incident_count"])
            .filter(|c| *c >= 0.0)
            .map(|c| c.round() as u32);
        Ok(model)
    }

    /// Change the selection. Out-of-range indices leave the model untouched.
    pub fn switch_route(&mut self, index: usize) -> bool {
        if index >= self.routes.len() {
            return false;
        }
        self.selected_index = Some(index);
        true
    }

    pub fn selected(&self) -> Option<&Route> {
        self.selected_index.and_then(|i| self.routes.get(i))
    }

    pub fn selected_index(&self) -> Option<usize> {
        self.selected_index
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn has_navigable_route(&self) -> bool {
        self.routes.iter().any(Route::is_navigable)
    }

    /// Non-selected routes in order, paired with their index.
    pub fn alternatives(&self) -> impl Iterator<Item = (usize, &Route)> {
        let selected = self.selected_index;
        self.routes
            .iter()
            .enumerate()
            .filter(move |(i, _)| Some(*i) != selected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_coordinate_variants() {
        assert_eq!(
            normalize_coordinate(&json!({"lat": 12.9, "lng": 77.5})),
            Some(Coordinate::new(12.9, 77.5))
        );
        assert_eq!(
            normalize_coordinate(&json!({"latitude": 12.9, "longitude": 77.5})),
            Some(Coordinate::new(12.9, 77.5))
        );
        assert_eq!(
            normalize_coordinate(&json!([12.9, 77.5])),
            Some(Coordinate::new(12.9, 77.5))
        );
        assert_eq!(
            normalize_coordinate(&json!({"lat": "12.9", "lng": "77.5"})),
            Some(Coordinate::new(12.9, 77.5))
        );
    }

    #[test]
    fn test_zero_is_a_real_coordinate() {
        assert_eq!(
            normalize_coordinate(&json!({"lat": 0.0, "lng": 0.0})),
            Some(Coordinate::new(0.0, 0.0))
        );
    }

    #[test]
    fn test_invalid_coordinates_dropped() {
        assert!(normalize_coordinate(&json!({"lng": 77.5})).is_none());
        assert!(normalize_coordinate(&json!({"lat": 12.9})).is_none());
        assert!(normalize_coordinate(&json!({"lat": null, "lng": 77.5})).is_none());
        assert!(normalize_coordinate(&json!({"lat": "abc", "lng": 77.5})).is_none());
        assert!(normalize_coordinate(&json!({"lat": 95.0, "lng": 77.5})).is_none());
        assert!(normalize_coordinate(&json!([12.9])).is_none());
        assert!(normalize_coordinate(&json!("12.9,77.5")).is_none());
    }

    #[test]
    fn test_route_defaults() {
        let model = RouteModel::normalize(&[
            json!({"coords": [{"lat": 12.9, "lng": 77.5}, {"lng": 77.6}, {"lat": 12.91, "lng": 77.51}]}),
            json!({}),
        ]);
        assert_eq!(model.len(), 2);

        let first = &model.routes()[0];
        assert_eq!(first.route_type, "Route 1");
        assert_eq!(first.color, PRIMARY_ROUTE_COLOR);
        assert_eq!(first.distance_km, 0.0);
        assert_eq!(first.duration_min, 0.0);
        assert_eq!(first.total_risk, 0);
        assert_eq!(first.coordinates.len(), 2);

        // Empty route is retained, not deleted
        let second = &model.routes()[1];
        assert_eq!(second.route_type, "Route 2");
        assert_eq!(second.color, SECONDARY_ROUTE_COLOR);
        assert!(second.coordinates.is_empty());
        assert!(!second.is_navigable());
    }

    #[test]
    fn test_backend_key_variants() {
        let route = Route::normalize(
            &json!({
                "distance_km": 2.4,
                "duration_min": 29,
                "incident_count": 3,
                "safety_score": 80,
                "coordinates": [[12.90, 77.50], [12.91, 77.51]],
            }),
            0,
        );
        assert_eq!(route.distance_km, 2.4);
        assert_eq!(route.duration_min, 29.0);
        assert_eq!(route.total_risk, 3);
        assert_eq!(route.safety_score(), 80.0);
        assert_eq!(route.risk_level(), RiskLevel::Risky);
        assert!(route.is_navigable());
    }

    #[test]
    fn test_derived_safety_score() {
        let mut route = Route::normalize(&json!({"total_risk": 2}), 0);
        assert_eq!(route.safety_score(), 80.0);
        assert_eq!(route.risk_level(), RiskLevel::Moderate);
        route.total_risk = 15;
        assert_eq!(route.safety_score(), 0.0);
    }

    #[test]
    fn test_switch_route_bounds() {
        let mut model = RouteModel::normalize(&[json!({}), json!({})]);
        assert_eq!(model.selected_index(), Some(0));

        assert!(model.switch_route(1));
        assert_eq!(model.selected_index(), Some(1));

        assert!(!model.switch_route(2));
        assert!(!model.switch_route(usize::MAX));
        assert_eq!(model.selected_index(), Some(1));
    }

    #[test]
    fn test_empty_model() {
        let mut model = RouteModel::normalize(&[]);
        assert!(model.selected().is_none());
        assert!(model.selected_index().is_none());
        assert!(!model.switch_route(0));
    }

    #[test]
    fn test_from_response_variants() {
        let multi = RouteModel::from_response(&json!({
            "success": true,
            "routes": [{"coords": [[1.0, 2.0], [1.1, 2.1]]}, {"coords": []}],
        }))
        .unwrap();
        assert_eq!(multi.len(), 2);

        let single = RouteModel::from_response(&json!({
            "success": true,
            "route": {"distance_km": 0.3, "coords": [[1.0, 2.0], [1.1, 2.1]]},
            "safety_score": 90,
            "incident_count": 1,
        }))
        .unwrap();
        assert_eq!(single.len(), 1);
        assert_eq!(single.safety_score, Some(90.0));
        assert_eq!(single.incident_count, Some(1));

        let none = RouteModel::from_response(&json!({"success": true, "routes": []}));
        assert!(matches!(none, Err(NavError::RouteUnavailable { .. })));
    }

    #[test]
    fn test_alternatives_skip_selection() {
        let mut model = RouteModel::normalize(&[json!({}), json!({}), json!({})]);
        model.switch_route(1);
        let alts: Vec<usize> = model.alternatives().map(|(i, _)| i).collect();
        assert_eq!(alts, vec![0, 2]);
    }
}
