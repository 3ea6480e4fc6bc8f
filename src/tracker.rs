//! # Position Tracker
//!
//! Acquires location permission and an initial fix, then keeps a continuous
//! subscription to device position updates.
//!
//! ```text
//! Idle -> RequestingPermission -> Active | Denied
//! Active <-> Paused
//! any -> Stopped
//! ```
//!
//! The tracker is the only writer of the latest-position cache; navigation
//! and live sharing read it through [`PositionTracker::latest_receiver`].

use std::future::Future;
use std::sync::Arc;

use log::{debug, info, warn};
use tokio::sync::{mpsc, watch};

use crate::config::{Accuracy, WatchOptions};
use crate::error::{NavError, Result};
use crate::Position;

/// Outcome of a foreground permission request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionStatus {
    Granted,
    Denied,
}

/// Continuous position subscription. Dropping the receiver unsubscribes.
pub type PositionWatch = mpsc::Receiver<Result<Position>>;

/// Device location plumbing implemented by the host platform.
pub trait LocationProvider: Send + Sync + 'static {
    fn request_permission(&self) -> impl Future<Output = Result<PermissionStatus>> + Send;

    /// One-shot fix at the requested accuracy.
    fn current_position(&self, accuracy: Accuracy) -> impl Future<Output = Result<Position>> + Send;

    /// Start continuous updates. Errors delivered on the channel surface as
    /// `gps_error`; a closed channel means the provider gave up.
    fn watch_position(&self, options: WatchOptions) -> Result<PositionWatch>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerState {
    Idle,
    RequestingPermission,
    Active,
    Denied,
    Paused,
    Stopped,
}

/// What the tracker hands to its consumers for each provider callback.
#[derive(Debug, Clone, PartialEq)]
pub enum TrackerEvent {
    Position(Position),
    Error(NavError),
}

/// Synchronous listener invoked for every tracker event.
pub type TrackerListener = Box<dyn FnMut(&TrackerEvent) + Send>;

pub struct PositionTracker<P: LocationProvider> {
    provider: Arc<P>,
    options: WatchOptions,
    state: TrackerState,
    subscription: Option<PositionWatch>,
    latest: watch::Sender<Option<Position>>,
    listeners: Vec<TrackerListener>,
}

/// Anything other than a permission refusal is an acquisition failure.
fn acquisition_error(err: NavError) -> NavError {
    match err {
        NavError::PermissionDenied | NavError::GpsAcquisitionFailed { .. } => err,
        other => NavError::gps(other.to_string()),
    }
}

impl<P: LocationProvider> PositionTracker<P> {
    pub fn new(provider: Arc<P>, options: WatchOptions) -> Self {
        let (latest, _) = watch::channel(None);
        Self {
            provider,
            options,
            state: TrackerState::Idle,
            subscription: None,
            latest,
            listeners: Vec::new(),
        }
    }

    pub fn state(&self) -> TrackerState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == TrackerState::Active
    }

    pub fn provider(&self) -> &Arc<P> {
        &self.provider
    }

    /// Most recent fix, kept across pause and cleared by stop.
    pub fn latest(&self) -> Option<Position> {
        self.latest.borrow().clone()
    }

    /// Read-only handle on the latest-position cache.
    pub fn latest_receiver(&self) -> watch::Receiver<Option<Position>> {
        self.latest.subscribe()
    }

    pub fn subscribe(&mut self, listener: impl FnMut(&TrackerEvent) + Send + 'static) {
        self.listeners.push(Box::new(listener));
    }

    /// Request permission, take one fix and begin watching.
    ///
    /// Always resolves: a refusal yields `PermissionDenied`, any provider
    /// failure yields `GpsAcquisitionFailed`.
    pub async fn start(&mut self) -> Result<Position> {
        if self.state == TrackerState::Active {
            if let Some(position) = self.latest() {
                return Ok(position);
            }
        }

        self.state = TrackerState::RequestingPermission;
        debug!("[PositionTracker] Requesting location permission");

        let status = match self.provider.request_permission().await {
            Ok(status) => status,
            Err(e) => return Err(self.fail(acquisition_error(e), TrackerState::Idle)),
        };
        if status == PermissionStatus::Denied {
            warn!("[PositionTracker] Location permission not granted");
            return Err(self.fail(NavError::PermissionDenied, TrackerState::Denied));
        }

        let first = match self.provider.current_position(self.options.accuracy).await {
            Ok(position) => position,
            Err(e) => return Err(self.fail(acquisition_error(e), TrackerState::Idle)),
        };
        info!(
            "[PositionTracker] Initial fix ({:.5}, {:.5}) +/-{:.0}m",
            first.coordinate.latitude, first.coordinate.longitude, first.accuracy
        );

        if let Err(e) = self.open_subscription() {
            return Err(self.fail(acquisition_error(e), TrackerState::Idle));
        }
        self.publish(first.clone());
        Ok(first)
    }

    /// Tear down the subscription but keep the latest fix.
    pub fn pause(&mut self) {
        if self.state == TrackerState::Active {
            self.subscription = None;
            self.state = TrackerState::Paused;
            info!("[PositionTracker] Paused");
        }
    }

    /// Re-subscribe, only if previously paused.
    pub fn resume(&mut self) -> Result<()> {
        if self.state != TrackerState::Paused {
            return Ok(());
        }
        if let Err(e) = self.open_subscription() {
            // Stay paused so the next resume retries
            let err = acquisition_error(e);
            self.notify(&TrackerEvent::Error(err.clone()));
            return Err(err);
        }
        info!("[PositionTracker] Resumed");
        Ok(())
    }

    /// Tear down the subscription and forget the latest fix. Idempotent.
    pub fn stop(&mut self) {
        self.subscription = None;
        self.latest.send_replace(None);
        if self.state != TrackerState::Stopped {
            self.state = TrackerState::Stopped;
            info!("[PositionTracker] Stopped");
        }
    }

    /// Wait for the next provider callback.
    ///
    /// Returns `None` immediately when there is no active subscription.
    pub async fn next_event(&mut self) -> Option<TrackerEvent> {
        let subscription = self.subscription.as_mut()?;
        let received = subscription.recv().await;

        let event = match received {
            Some(Ok(position)) => {
                self.latest.send_replace(Some(position.clone()));
                TrackerEvent::Position(position)
            }
            Some(Err(e)) => {
                let err = acquisition_error(e);
                if err == NavError::PermissionDenied {
                    warn!("[PositionTracker] Permission revoked mid-session");
                    self.subscription = None;
                    self.state = TrackerState::Denied;
                }
                TrackerEvent::Error(err)
            }
            None => {
                warn!("[PositionTracker] Provider closed the position stream");
                self.subscription = None;
                self.state = TrackerState::Paused;
                TrackerEvent::Error(NavError::gps("Location updates stopped"))
            }
        };

        self.notify(&event);
        Some(event)
    }

    fn open_subscription(&mut self) -> Result<()> {
        let subscription = self.provider.watch_position(self.options)?;
        self.subscription = Some(subscription);
        self.state = TrackerState::Active;
        debug!(
            "[PositionTracker] Watching ({:?}, {}m, {:?})",
            self.options.accuracy, self.options.distance_interval_m, self.options.time_interval
        );
        Ok(())
    }

    fn publish(&mut self, position: Position) {
        self.latest.send_replace(Some(position.clone()));
        self.notify(&TrackerEvent::Position(position));
    }

    fn fail(&mut self, err: NavError, state: TrackerState) -> NavError {
        self.subscription = None;
        self.state = state;
        self.notify(&TrackerEvent::Error(err.clone()));
        err
    }

    fn notify(&mut self, event: &TrackerEvent) {
        for listener in self.listeners.iter_mut() {
            listener(event);
        }
    }
}
