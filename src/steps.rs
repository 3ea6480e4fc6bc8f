//! Navigation step derivation.
//!
//! Steps are recomputed from the active route's coordinates on demand and
//! never persisted. The default model only knows the start and destination;
//! `StepMode::Turns` adds bearing-based turn steps between them.

use serde::{Deserialize, Serialize};

use crate::geo_utils::{bearing_change, haversine_distance, initial_bearing};
use crate::Coordinate;

/// Segments shorter than this carry no usable bearing (meters)
const MIN_SEGMENT_M: f64 = 1.0;

/// Kind of maneuver a step represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StepKind {
    Start,
    Straight,
    SlightLeft,
    Left,
    SharpLeft,
    SlightRight,
    Right,
    SharpRight,
    #[serde(rename = "uturn")]
    UTurn,
    Destination,
}

impl StepKind {
    /// Instruction text shown for this maneuver.
    pub fn instruction(&self) -> &'static str {
        match self {
            StepKind::Start => "Start navigation",
            StepKind::Straight => "Continue straight",
            StepKind::SlightLeft => "Slight left",
            StepKind::Left => "Turn left",
            StepKind::SharpLeft => "Sharp left",
            StepKind::SlightRight => "Slight right",
            StepKind::Right => "Turn right",
            StepKind::SharpRight => "Sharp right",
            StepKind::UTurn => "Make a U-turn",
            StepKind::Destination => "Arrive at destination",
        }
    }

    /// Classify a signed heading change (degrees, positive = right).
    pub fn from_heading_change(delta: f64) -> Self {
        let magnitude = delta.abs();
        let right = delta > 0.0;
        if magnitude > 170.0 {
            StepKind::UTurn
        } else if magnitude > 120.0 {
            if right { StepKind::SharpRight } else { StepKind::SharpLeft }
        } else if magnitude > 60.0 {
            if right { StepKind::Right } else { StepKind::Left }
        } else if magnitude > 20.0 {
            if right { StepKind::SlightRight } else { StepKind::SlightLeft }
        } else {
            StepKind::Straight
        }
    }
}

/// How steps are derived from a route polyline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepMode {
    /// Start and destination only
    #[default]
    Endpoints,
    /// Start, every non-straight turn, destination
    Turns,
}

/// A maneuver anchored at an index of the route's coordinate sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NavStep {
    #[serde(rename = "type")]
    pub kind: StepKind,
    pub text: String,
    pub coordinate: Coordinate,
    pub route_index: usize,
}

impl NavStep {
    pub fn new(kind: StepKind, coordinate: Coordinate, route_index: usize) -> Self {
        Self {
            kind,
            text: kind.instruction().to_string(),
            coordinate,
            route_index,
        }
    }

    /// The step reported alongside a `destination_reached` update.
    pub fn arrived(coordinate: Coordinate, route_index: usize) -> Self {
        Self {
            kind: StepKind::Destination,
            text: "You have reached your destination".to_string(),
            coordinate,
            route_index,
        }
    }
}

/// Derive steps for a polyline. Routes with fewer than 2 points have none.
pub fn derive_steps(coords: &[Coordinate], mode: StepMode) -> Vec<NavStep> {
    if coords.len() < 2 {
        return Vec::new();
    }
    let last = coords.len() - 1;

    let mut steps = vec![NavStep::new(StepKind::Start, coords[0], 0)];
    if mode == StepMode::Turns {
        steps.extend(turn_steps(coords));
    }
    steps.push(NavStep::new(StepKind::Destination, coords[last], last));
    steps
}

fn turn_steps(coords: &[Coordinate]) -> Vec<NavStep> {
    let mut steps = Vec::new();
    // Last usable incoming segment, so that duplicate points don't hide a turn
    let mut prev: Option<usize> = None;

    for i in 1..coords.len() - 1 {
        let from = prev.unwrap_or(0);
        if haversine_distance(&coords[from], &coords[i]) < MIN_SEGMENT_M {
            continue;
        }
        prev = Some(i);

        let Some(next) = (i + 1..coords.len())
            .find(|&j| haversine_distance(&coords[i], &coords[j]) >= MIN_SEGMENT_M)
        else {
            break;
        };

        let bearing_in = initial_bearing(&coords[from], &coords[i]);
        let bearing_out = initial_bearing(&coords[i], &coords[next]);
        let kind = StepKind::from_heading_change(bearing_change(bearing_in, bearing_out));
        if kind != StepKind::Straight {
            steps.push(NavStep::new(kind, coords[i], i));
        }
    }
    steps
}

/// The last step at or before `nearest_index`, and the one after it.
pub fn locate(steps: &[NavStep], nearest_index: usize) -> (Option<&NavStep>, Option<&NavStep>) {
    match steps.iter().rposition(|s| s.route_index <= nearest_index) {
        Some(pos) => (steps.get(pos), steps.get(pos + 1)),
        None => (steps.first(), steps.get(1)),
    }
}
