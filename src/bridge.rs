//! # Map Bridge
//!
//! Typed message protocol between the navigation core and the map rendering
//! surface (a web view or native map), plus the [`RouteRenderingBridge`]
//! that owns what is currently drawn.
//!
//! Messages are JSON strings. Outbound commands are fire-and-forget; inbound
//! events are `mapReady`/`mapLoaded` and `mapClick`. Commands issued before
//! the surface reports ready are queued and flushed in order on readiness.

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::Result;
use crate::route_model::RouteModel;
use crate::{Coordinate, Position};

/// Most alternatives the surface renders next to the selected route
pub const MAX_ALTERNATIVE_ROUTES: usize = 2;

const DEFAULT_ALTERNATIVE_COLOR: &str = "#FFC107";

/// Receives serialized outbound messages.
pub trait MapSurface {
    fn post_message(&mut self, payload: &str);
}

/// Coordinate in the surface's wire shape.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

impl From<Coordinate> for LatLng {
    fn from(c: Coordinate) -> Self {
        Self {
            lat: c.latitude,
            lng: c.longitude,
        }
    }
}

impl From<LatLng> for Coordinate {
    fn from(p: LatLng) -> Self {
        Coordinate::new(p.lat, p.lng)
    }
}

fn default_alternative_color() -> String {
    DEFAULT_ALTERNATIVE_COLOR.to_string()
}

/// A non-selected route drawn alongside the main one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlternativeRoute {
    pub coords: Vec<LatLng>,
    pub distance: f64,
    pub duration: f64,
    pub total_risk: u32,
    #[serde(rename = "type")]
    pub route_type: String,
    #[serde(default = "default_alternative_color")]
    pub color: String,
}

/// Commands sent to the surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum OutboundMessage {
    #[serde(rename = "updateRoute", rename_all = "camelCase")]
    UpdateRoute {
        route: Vec<LatLng>,
        current_position: Option<LatLng>,
        show_alternative_routes: bool,
        alternative_routes: Vec<AlternativeRoute>,
        selected_route_index: Option<usize>,
        route_color: String,
    },
    /// Moves the user marker without redrawing routes
    #[serde(rename = "updateNavigation", rename_all = "camelCase")]
    UpdateNavigation { current_position: LatLng },
    #[serde(rename = "clearRoutes")]
    ClearRoutes,
    #[serde(rename = "setStart")]
    SetStart { coord: LatLng },
    #[serde(rename = "setEnd")]
    SetEnd { coord: LatLng },
}

impl OutboundMessage {
    fn is_draw(&self) -> bool {
        matches!(
            self,
            OutboundMessage::UpdateRoute { .. } | OutboundMessage::UpdateNavigation { .. }
        )
    }
}

/// Events received from the surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum InboundEvent {
    #[serde(rename = "mapReady", alias = "mapLoaded")]
    Ready,
    #[serde(rename = "mapClick")]
    Click { coord: LatLng },
    #[serde(other)]
    Unknown,
}

/// Whether a marker update placed a new marker or moved the existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerUpdate {
    Created,
    Moved,
}

#[derive(Debug, Clone, PartialEq)]
struct DrawnRoute {
    id: String,
    points: Vec<LatLng>,
    color: String,
    distance: f64,
    duration: f64,
    total_risk: u32,
    route_type: String,
}

pub struct RouteRenderingBridge<M: MapSurface> {
    surface: M,
    ready: bool,
    pending: Vec<OutboundMessage>,
    drawn: Vec<DrawnRoute>,
    /// Index into `drawn` of the route rendered as the main polyline
    primary: Option<usize>,
    marker: Option<LatLng>,
    style_url: Option<String>,
}

impl<M: MapSurface> RouteRenderingBridge<M> {
    pub fn new(surface: M, config: &Config) -> Self {
        Self {
            surface,
            ready: false,
            pending: Vec::new(),
            drawn: Vec::new(),
            primary: None,
            marker: None,
            style_url: config.map_style_url(),
        }
    }

    /// Style document the surface should load, if a map key is configured.
    pub fn style_url(&self) -> Option<&str> {
        self.style_url.as_deref()
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Commands waiting for the surface to become ready.
    pub fn pending(&self) -> &[OutboundMessage] {
        &self.pending
    }

    pub fn surface(&self) -> &M {
        &self.surface
    }

    pub fn has_marker(&self) -> bool {
        self.marker.is_some()
    }

    /// Draw a polyline as the main route. Drawing an existing `route_id`
    /// replaces its polyline.
    pub fn draw_route(&mut self, points: &[Coordinate], color: &str, route_id: &str) -> Result<()> {
        let points: Vec<LatLng> = points.iter().copied().map(LatLng::from).collect();
        let index = match self.drawn.iter().position(|r| r.id == route_id) {
            Some(i) => {
                self.drawn[i].points = points;
                self.drawn[i].color = color.to_string();
                i
            }
            None => {
                self.drawn.push(DrawnRoute {
                    id: route_id.to_string(),
                    points,
                    color: color.to_string(),
                    distance: 0.0,
                    duration: 0.0,
                    total_risk: 0,
                    route_type: route_id.to_string(),
                });
                self.drawn.len() - 1
            }
        };
        self.primary = Some(index);
        self.render()
    }

    /// Replace everything drawn with the model's routes, the selected one as
    /// the main polyline.
    pub fn show_routes(&mut self, model: &RouteModel, position: Option<&Position>) -> Result<()> {
        self.drawn = model
            .routes()
            .iter()
            .enumerate()
            .map(|(i, route)| DrawnRoute {
                id: format!("route-{}", i),
                points: route.coordinates.iter().copied().map(LatLng::from).collect(),
                color: route.color.clone(),
                distance: route.distance_km,
                duration: route.duration_min,
                total_risk: route.total_risk,
                route_type: route.route_type.clone(),
            })
            .collect();
        self.primary = model.selected_index();
        if let Some(position) = position {
            self.marker = Some(position.coordinate.into());
        }
        self.render()
    }

    /// Create the user marker, or move it if it already exists.
    pub fn update_user_marker(&mut self, position: &Position) -> Result<MarkerUpdate> {
        let at = LatLng::from(position.coordinate);
        let outcome = if self.marker.replace(at).is_some() {
            MarkerUpdate::Moved
        } else {
            MarkerUpdate::Created
        };
        self.send(OutboundMessage::UpdateNavigation {
            current_position: at,
        })?;
        Ok(outcome)
    }

    /// Remove every drawn route and the marker. Draws still queued are dropped.
    pub fn clear_all(&mut self) -> Result<()> {
        self.pending.retain(|m| !m.is_draw());
        self.drawn.clear();
        self.primary = None;
        self.marker = None;
        self.send(OutboundMessage::ClearRoutes)
    }

    pub fn set_start(&mut self, coord: Coordinate) -> Result<()> {
        self.send(OutboundMessage::SetStart { coord: coord.into() })
    }

    pub fn set_end(&mut self, coord: Coordinate) -> Result<()> {
        self.send(OutboundMessage::SetEnd { coord: coord.into() })
    }

    /// Handle a raw inbound message. Returns the clicked coordinate for
    /// `mapClick`; readiness flushes queued commands.
    pub fn handle_message(&mut self, raw: &str) -> Result<Option<Coordinate>> {
        match serde_json::from_str::<InboundEvent>(raw)? {
            InboundEvent::Ready => {
                self.on_ready()?;
                Ok(None)
            }
            InboundEvent::Click { coord } => Ok(Some(coord.into())),
            InboundEvent::Unknown => {
                debug!("[MapBridge] Ignoring unknown message: {}", raw);
                Ok(None)
            }
        }
    }

    fn on_ready(&mut self) -> Result<()> {
        if !self.ready {
            info!(
                "[MapBridge] Surface ready, flushing {} queued messages",
                self.pending.len()
            );
        }
        self.ready = true;
        for message in std::mem::take(&mut self.pending) {
            self.post(&message)?;
        }
        Ok(())
    }

    fn render(&mut self) -> Result<()> {
        let Some(primary) = self.primary.and_then(|i| self.drawn.get(i)) else {
            return Ok(());
        };
        let alternative_routes: Vec<AlternativeRoute> = self
            .drawn
            .iter()
            .enumerate()
            .filter(|(i, _)| Some(*i) != self.primary)
            .take(MAX_ALTERNATIVE_ROUTES)
            .map(|(_, r)| AlternativeRoute {
                coords: r.points.clone(),
                distance: r.distance,
                duration: r.duration,
                total_risk: r.total_risk,
                route_type: r.route_type.clone(),
                color: r.color.clone(),
            })
            .collect();

        let message = OutboundMessage::UpdateRoute {
            route: primary.points.clone(),
            current_position: self.marker,
            show_alternative_routes: !alternative_routes.is_empty(),
            alternative_routes,
            selected_route_index: self.primary,
            route_color: primary.color.clone(),
        };
        self.send(message)
    }

    /// Post now, or queue until ready. A queued draw of the same kind is
    /// overwritten in place, since each one carries the full latest state.
    fn send(&mut self, message: OutboundMessage) -> Result<()> {
        if self.ready {
            return self.post(&message);
        }
        let queued = self
            .pending
            .iter_mut()
            .find(|m| m.is_draw() && std::mem::discriminant(&**m) == std::mem::discriminant(&message));
        match queued {
            Some(slot) => *slot = message,
            None => self.pending.push(message),
        }
        Ok(())
    }

    fn post(&mut self, message: &OutboundMessage) -> Result<()> {
        let payload = serde_json::to_string(message)?;
        self.surface.post_message(&payload);
        Ok(())
    }
}
