//! Navigation screen integration tests.
//!
//! Drives a full `Navigator` (tracker -> engine -> map bridge) with the
//! simulated provider, a canned routing backend and a recording map surface.
//!
//! Run with: `cargo test --test navigation_scenarios`

use std::sync::{Arc, Mutex};
use std::time::Duration;

use safe_route_nav::{
    Config, Coordinate, FixedRoutes, NavError, NavUpdate, Navigator, RecalcFailure,
    RecordingSurface, RouteModel, SimulatedProvider, TripEndpoints,
};
use serde_json::json;

type TestNavigator = Navigator<SimulatedProvider, FixedRoutes, RecordingSurface>;

const START: Coordinate = Coordinate {
    latitude: 12.90,
    longitude: 77.50,
};
const END: Coordinate = Coordinate {
    latitude: 12.92,
    longitude: 77.52,
};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn city_route() -> RouteModel {
    RouteModel::normalize(&[json!({
        "coords": [[12.90, 77.50], [12.91, 77.51], [12.92, 77.52]],
        "distance": 1.2,
        "duration": 15,
    })])
}

fn detours() -> RouteModel {
    RouteModel::normalize(&[
        json!({"coords": [[12.90, 77.50], [12.93, 77.50], [12.92, 77.52]], "type": "safest"}),
        json!({"coords": [[12.90, 77.50], [12.90, 77.52], [12.92, 77.52]], "type": "fastest"}),
    ])
}

/// Navigator wired to `provider`, recording every update kind it emits.
fn setup(
    provider: &Arc<SimulatedProvider>,
    backend: FixedRoutes,
    surface: &RecordingSurface,
) -> (TestNavigator, Arc<Mutex<Vec<&'static str>>>) {
    init_logging();
    let mut nav = Navigator::new(
        Arc::clone(provider),
        Arc::new(backend),
        surface.clone(),
        city_route(),
        TripEndpoints::new(START, END),
        &Config::default(),
    )
    .unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    nav.subscribe(move |update: &NavUpdate| sink.lock().unwrap().push(update.kind()));
    (nav, seen)
}

#[tokio::test]
async fn test_walk_to_destination() {
    let provider = Arc::new(SimulatedProvider::at(START));
    let surface = RecordingSurface::new();
    let (mut nav, seen) = setup(&provider, FixedRoutes::new(city_route()), &surface);
    nav.handle_map_message(r#"{"type":"mapReady"}"#).unwrap();

    let first = nav.start().await.unwrap();
    assert_eq!(first.len(), 1);
    let update = first[0].step_update().unwrap();
    assert_eq!(first[0].kind(), "step_updated");
    assert_eq!(update.progress, 0.0);
    assert!(!update.is_off_route);

    provider.push(END);
    let arrival = nav.step().await.unwrap().unwrap();
    assert_eq!(arrival.len(), 2);
    assert_eq!(arrival[0].kind(), "step_updated");
    assert!(arrival[0].step_update().unwrap().progress > 99.0);
    assert_eq!(arrival[1].kind(), "destination_reached");

    assert_eq!(
        *seen.lock().unwrap(),
        vec!["step_updated", "step_updated", "destination_reached"]
    );
    assert_eq!(nav.engine().progress_percent(), 100.0);
}

#[tokio::test]
async fn test_off_route_flagged_without_recalculating() {
    let provider = Arc::new(SimulatedProvider::at(START));
    let surface = RecordingSurface::new();
    let backend = FixedRoutes::new(detours());
    let (mut nav, _seen) = setup(&provider, backend, &surface);
    nav.start().await.unwrap();

    // ~97m east of the route start
    provider.push(Coordinate::new(12.90, 77.5009));
    let updates = nav.step().await.unwrap().unwrap();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].kind(), "off_route");
    assert!(updates[0].step_update().unwrap().is_off_route);
    assert!(!nav.is_recalculating());
}

#[tokio::test]
async fn test_gps_error_keeps_tracking() {
    let provider = Arc::new(SimulatedProvider::at(START));
    let surface = RecordingSurface::new();
    let (mut nav, seen) = setup(&provider, FixedRoutes::new(city_route()), &surface);
    nav.start().await.unwrap();

    provider.push_error(NavError::gps("Signal lost"));
    let updates = nav.step().await.unwrap().unwrap();
    assert_eq!(updates[0].kind(), "gps_error");

    provider.push(START);
    let updates = nav.step().await.unwrap().unwrap();
    assert_eq!(updates[0].kind(), "step_updated");
    assert_eq!(
        *seen.lock().unwrap(),
        vec!["step_updated", "gps_error", "step_updated"]
    );
}

#[tokio::test]
async fn test_commands_before_ready_are_flushed_in_order() {
    let provider = Arc::new(SimulatedProvider::at(START));
    let surface = RecordingSurface::new();
    let (mut nav, _seen) = setup(&provider, FixedRoutes::new(city_route()), &surface);

    nav.start().await.unwrap();
    assert!(nav.switch_route(0).unwrap());
    assert!(surface.posted().is_empty());

    provider.push(END);
    nav.step().await.unwrap().unwrap();
    assert!(surface.posted().is_empty());

    // Queued redraws and marker moves collapse to their latest state
    nav.handle_map_message(r#"{"type":"mapLoaded"}"#).unwrap();
    assert_eq!(
        surface.message_types(),
        vec!["updateRoute", "setStart", "setEnd", "updateNavigation"]
    );
    let marker: serde_json::Value = serde_json::from_str(&surface.posted()[3]).unwrap();
    assert_eq!(marker["currentPosition"], json!({"lat": 12.92, "lng": 77.52}));

    // Later commands go straight through
    surface.clear();
    nav.set_destination(Coordinate::new(12.95, 77.55)).unwrap();
    assert_eq!(surface.message_types(), vec!["setEnd"]);
}

#[tokio::test]
async fn test_map_click_returns_coordinate() {
    let provider = Arc::new(SimulatedProvider::at(START));
    let surface = RecordingSurface::new();
    let (mut nav, _seen) = setup(&provider, FixedRoutes::new(city_route()), &surface);

    let clicked = nav
        .handle_map_message(r#"{"type":"mapClick","coord":{"lat":12.95,"lng":77.55}}"#)
        .unwrap();
    assert_eq!(clicked, Some(Coordinate::new(12.95, 77.55)));
    assert_eq!(nav.handle_map_message(r#"{"type":"zoomChanged"}"#).unwrap(), None);
    assert!(nav.handle_map_message("not json").is_err());
}

#[tokio::test]
async fn test_recalculation_replaces_routes_and_redraws() {
    let provider = Arc::new(SimulatedProvider::at(START));
    let surface = RecordingSurface::new();
    let (mut nav, seen) = setup(&provider, FixedRoutes::new(detours()), &surface);
    nav.handle_map_message(r#"{"type":"mapReady"}"#).unwrap();
    nav.start().await.unwrap();
    surface.clear();

    let count = nav.recalculate().await.unwrap();
    assert_eq!(count, 2);
    assert_eq!(nav.engine().model().selected_index(), Some(0));
    assert_eq!(nav.engine().current_route().unwrap().route_type, "safest");
    assert!(!nav.is_recalculating());

    let types = surface.message_types();
    assert_eq!(types[0], "clearRoutes");
    assert_eq!(types[1], "updateRoute");
    assert!(seen.lock().unwrap().contains(&"route_changed"));

    // Tracking keeps running on the new model
    provider.push(END);
    let updates = nav.step().await.unwrap().unwrap();
    assert_eq!(updates.last().unwrap().kind(), "destination_reached");
}

#[tokio::test(start_paused = true)]
async fn test_recalculation_timeout_clears_loading() {
    let provider = Arc::new(SimulatedProvider::at(START));
    let surface = RecordingSurface::new();
    let backend = FixedRoutes::new(detours()).with_delay(Duration::from_secs(30));
    let (mut nav, _seen) = setup(&provider, backend, &surface);
    nav.start().await.unwrap();

    let outcome = nav.recalculate().await;
    assert_eq!(outcome, Err(RecalcFailure::Timeout));
    assert!(!nav.is_recalculating());
    assert!(!nav.cancel_handle().is_in_flight());

    // The old route is still in place
    assert_eq!(nav.engine().model().len(), 1);
}

#[tokio::test]
async fn test_recalculation_failure_keeps_model() {
    let provider = Arc::new(SimulatedProvider::at(START));
    let surface = RecordingSurface::new();
    let backend = FixedRoutes::failing(NavError::NetworkFailure {
        message: "connection refused".to_string(),
    });
    let (mut nav, _seen) = setup(&provider, backend, &surface);

    let outcome = nav.recalculate().await;
    assert!(matches!(outcome, Err(RecalcFailure::Failed { .. })));
    assert_eq!(nav.engine().model().len(), 1);
}

#[tokio::test]
async fn test_pause_resume_and_stop() {
    let provider = Arc::new(SimulatedProvider::at(START));
    let surface = RecordingSurface::new();
    let (mut nav, _seen) = setup(&provider, FixedRoutes::new(city_route()), &surface);
    nav.start().await.unwrap();
    assert_eq!(provider.open_watches(), 1);

    nav.pause();
    assert_eq!(provider.open_watches(), 0);
    assert_eq!(nav.step().await.unwrap(), None);

    nav.resume().unwrap();
    provider.push(END);
    let updates = nav.step().await.unwrap().unwrap();
    assert_eq!(updates.last().unwrap().kind(), "destination_reached");

    nav.stop();
    assert_eq!(provider.open_watches(), 0);
    assert!(nav.engine().last_position().is_none());
}
