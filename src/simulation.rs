//! In-process stand-ins for the platform seams.
//!
//! `SimulatedProvider` replays fixes pushed by the caller (recorded traces,
//! desktop demos, tests), `FixedRoutes` serves a canned routing answer, and
//! `RecordingSurface` captures what the bridge would post to a map.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use log::debug;
use tokio::sync::mpsc;

use crate::backend::{RouteMode, RoutingBackend};
use crate::bridge::MapSurface;
use crate::config::{Accuracy, WatchOptions};
use crate::error::{NavError, Result};
use crate::route_model::RouteModel;
use crate::tracker::{LocationProvider, PermissionStatus, PositionWatch};
use crate::{Coordinate, Position};

const WATCH_BUFFER: usize = 64;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Location provider driven by explicit `push` calls.
pub struct SimulatedProvider {
    permission: PermissionStatus,
    last_fix: Mutex<Option<Position>>,
    watchers: Mutex<Vec<mpsc::Sender<Result<Position>>>>,
    watch_calls: AtomicUsize,
}

impl SimulatedProvider {
    /// Permission granted, but no fix until one is pushed.
    pub fn granted() -> Self {
        Self {
            permission: PermissionStatus::Granted,
            last_fix: Mutex::new(None),
            watchers: Mutex::new(Vec::new()),
            watch_calls: AtomicUsize::new(0),
        }
    }

    pub fn denied() -> Self {
        Self {
            permission: PermissionStatus::Denied,
            ..Self::granted()
        }
    }

    /// Permission granted with a known initial fix.
    pub fn at(coordinate: Coordinate) -> Self {
        let provider = Self::granted();
        *lock(&provider.last_fix) = Some(Position::at(coordinate));
        provider
    }

    pub fn push(&self, coordinate: Coordinate) {
        self.push_position(Position::at(coordinate));
    }

    /// Deliver a fix to every open watch.
    pub fn push_position(&self, position: Position) {
        *lock(&self.last_fix) = Some(position.clone());
        self.broadcast(Ok(position));
    }

    pub fn push_error(&self, err: NavError) {
        self.broadcast(Err(err));
    }

    /// Close every open watch, as a provider that gives up would.
    pub fn close_watches(&self) {
        lock(&self.watchers).clear();
    }

    /// Number of `watch_position` calls so far.
    pub fn watch_count(&self) -> usize {
        self.watch_calls.load(Ordering::SeqCst)
    }

    /// Number of watches whose receiver is still alive.
    pub fn open_watches(&self) -> usize {
        let mut watchers = lock(&self.watchers);
        watchers.retain(|tx| !tx.is_closed());
        watchers.len()
    }

    fn broadcast(&self, item: Result<Position>) {
        let mut watchers = lock(&self.watchers);
        watchers.retain(|tx| !tx.is_closed());
        for tx in watchers.iter() {
            if tx.try_send(item.clone()).is_err() {
                debug!("[SimulatedProvider] Watch buffer full, dropping fix");
            }
        }
    }
}

impl LocationProvider for SimulatedProvider {
    async fn request_permission(&self) -> Result<PermissionStatus> {
        Ok(self.permission)
    }

    async fn current_position(&self, _accuracy: Accuracy) -> Result<Position> {
        if self.permission == PermissionStatus::Denied {
            return Err(NavError::PermissionDenied);
        }
        lock(&self.last_fix)
            .clone()
            .ok_or_else(|| NavError::gps("No fix available"))
    }

    fn watch_position(&self, _options: WatchOptions) -> Result<PositionWatch> {
        if self.permission == PermissionStatus::Denied {
            return Err(NavError::PermissionDenied);
        }
        let (tx, rx) = mpsc::channel(WATCH_BUFFER);
        lock(&self.watchers).push(tx);
        self.watch_calls.fetch_add(1, Ordering::SeqCst);
        Ok(rx)
    }
}

/// Routing backend answering every request with a fixed response.
pub struct FixedRoutes {
    response: Mutex<Result<RouteModel>>,
    delay: Duration,
    requests: AtomicUsize,
}

impl FixedRoutes {
    pub fn new(model: RouteModel) -> Self {
        Self {
            response: Mutex::new(Ok(model)),
            delay: Duration::ZERO,
            requests: AtomicUsize::new(0),
        }
    }

    pub fn failing(err: NavError) -> Self {
        Self {
            response: Mutex::new(Err(err)),
            ..Self::new(RouteModel::default())
        }
    }

    /// Answer only after `delay` (tokio time).
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn set_response(&self, response: Result<RouteModel>) {
        *lock(&self.response) = response;
    }

    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

impl RoutingBackend for FixedRoutes {
    async fn fetch_routes(
        &self,
        _start: Coordinate,
        _end: Coordinate,
        _mode: Option<RouteMode>,
    ) -> Result<RouteModel> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        lock(&self.response).clone()
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }
}

/// Map surface that records every posted payload. Clones share the log.
#[derive(Debug, Clone, Default)]
pub struct RecordingSurface {
    posted: Arc<Mutex<Vec<String>>>,
}

impl RecordingSurface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn posted(&self) -> Vec<String> {
        lock(&self.posted).clone()
    }

    /// The `type` field of every posted message, in order.
    pub fn message_types(&self) -> Vec<String> {
        self.posted()
            .iter()
            .filter_map(|raw| serde_json::from_str::<serde_json::Value>(raw).ok())
            .filter_map(|msg| msg.get("type").and_then(|t| t.as_str()).map(str::to_string))
            .collect()
    }

    pub fn clear(&self) {
        lock(&self.posted).clear();
    }
}

impl MapSurface for RecordingSurface {
    fn post_message(&mut self, payload: &str) {
        lock(&self.posted).push(payload.to_string());
    }
}
