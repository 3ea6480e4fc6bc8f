//! # Live Location Session
//!
//! Time-boxed broadcast of the device position to the tracking backend so
//! trusted contacts can follow along.
//!
//! ```text
//! none -> active -> (expired | stopped) -> none
//! ```
//!
//! The active session is persisted under `active_tracking_session` and
//! restored on the next app start. While active, [`LiveLocationSession::next_event`]
//! drives two sources: the position subscription (each fix is pushed to the
//! backend) and the periodic expiry check. A failed push never ends the
//! session; only an explicit stop or expiry does. If the provider closes the
//! position stream, [`LiveLocationSession::resume`] re-subscribes.

use std::future::pending;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

use crate::backend::{CreateSessionRequest, LocationUpdate, TrackingBackend};
use crate::config::{Config, WatchOptions};
use crate::error::{NavError, Result};
use crate::format::share_message;
use crate::persistence::{clear_session, load_session, load_user, save_session, KeyValueStore, StoredSession};
use crate::tracker::{LocationProvider, PermissionStatus, PositionWatch};
use crate::Position;

/// Wall-clock source for expiry checks.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// What [`LiveLocationSession::next_event`] observed.
#[derive(Debug, Clone, PartialEq)]
pub enum LiveEvent {
    /// Fix delivered to the backend
    Pushed(Position),
    /// Fix could not be delivered; the session stays live
    PushFailed { position: Position, error: NavError },
    /// The position subscription reported a failure
    GpsError(NavError),
    /// The session reached its expiry and was stopped silently
    Expired(StopReport),
}

/// Result of tearing a session down.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StopReport {
    pub session_id: Option<String>,
    /// Whether the host should show a "sharing stopped" confirmation
    pub notify_user: bool,
    /// The backend could not be told; local teardown still happened
    pub backend_error: Option<NavError>,
    /// The persisted record could not be cleared
    pub store_error: Option<NavError>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RestoreOutcome {
    NothingToRestore,
    /// The persisted session had already expired and was stopped silently
    Expired {
        session: StoredSession,
        report: StopReport,
    },
    /// Broadcasting resumed for the persisted session
    Resumed(StoredSession),
}

pub struct LiveLocationSession<P: LocationProvider, B: TrackingBackend, S: KeyValueStore> {
    provider: Arc<P>,
    backend: Arc<B>,
    store: S,
    watch_options: WatchOptions,
    expiry_check_interval: Duration,
    clock: Clock,
    active: Option<StoredSession>,
    user_name: String,
    subscription: Option<PositionWatch>,
    expiry_timer: Option<Interval>,
    last_fix: Option<Position>,
}

enum Wake {
    Tick,
    Fix(Option<Result<Position>>),
}

async fn next_tick(timer: Option<&mut Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => pending::<()>().await,
    }
}

async fn next_fix(subscription: Option<&mut PositionWatch>) -> Option<Result<Position>> {
    match subscription {
        Some(rx) => rx.recv().await,
        None => pending().await,
    }
}

impl<P: LocationProvider, B: TrackingBackend, S: KeyValueStore> LiveLocationSession<P, B, S> {
    pub fn new(provider: Arc<P>, backend: Arc<B>, store: S, config: &Config) -> Self {
        Self {
            provider,
            backend,
            store,
            watch_options: config.live_watch,
            expiry_check_interval: config.expiry_check_interval,
            clock: Arc::new(Utc::now),
            active: None,
            user_name: String::new(),
            subscription: None,
            expiry_timer: None,
            last_fix: None,
        }
    }

    /// Replace the wall clock used for expiry.
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn active(&self) -> Option<&StoredSession> {
        self.active.as_ref()
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscription.is_some()
    }

    pub fn last_fix(&self) -> Option<&Position> {
        self.last_fix.as_ref()
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Message to share with trusted contacts for the active session.
    pub fn share_message(&self) -> Option<String> {
        self.active.as_ref().map(|session| {
            share_message(
                &self.user_name,
                &session.tracking_url,
                self.last_fix.as_ref().map(|p| &p.coordinate),
                session.duration_minutes,
            )
        })
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Create a tracking session and begin broadcasting.
    ///
    /// `latest` is the tracker's most recent fix; one is acquired when absent.
    /// `duration_minutes == 0` means unlimited. Starting while a session is
    /// active returns that session unchanged.
    pub async fn start(&mut self, duration_minutes: u32, latest: Option<Position>) -> Result<StoredSession> {
        if let Some(active) = &self.active {
            info!("[LiveLocation] Session {} already active", active.session_id);
            return Ok(active.clone());
        }

        let position = match latest {
            Some(position) => position,
            None => self.acquire_fix().await?,
        };

        let user = load_user(&self.store)?;
        self.user_name = user.display_name();
        let request = CreateSessionRequest {
            user_id: user.id.clone(),
            user_name: self.user_name.clone(),
            latitude: position.coordinate.latitude,
            longitude: position.coordinate.longitude,
            duration_minutes,
        };
        let created = self.backend.create_tracking_session(request).await?;
        let session = StoredSession::new(created, (self.clock)(), duration_minutes);

        if let Err(e) = save_session(&mut self.store, &session) {
            warn!("[LiveLocation] Could not persist session: {}", e);
            self.abandon_remote(&session.session_id).await;
            return Err(e);
        }

        let subscription = match self.provider.watch_position(self.watch_options) {
            Ok(subscription) => subscription,
            Err(e) => {
                warn!("[LiveLocation] Could not watch position: {}", e);
                self.abandon_remote(&session.session_id).await;
                if let Err(store_err) = clear_session(&mut self.store) {
                    warn!("[LiveLocation] Could not clear session: {}", store_err);
                }
                return Err(e);
            }
        };

        info!(
            "[LiveLocation] Started session {} ({} min)",
            session.session_id, duration_minutes
        );
        self.last_fix = Some(position);
        self.activate(session.clone(), subscription);
        Ok(session)
    }

    /// Resume a session persisted by a previous run.
    ///
    /// An already-expired session is stopped silently and its record cleared.
    pub async fn restore(&mut self) -> Result<RestoreOutcome> {
        if let Some(active) = &self.active {
            return Ok(RestoreOutcome::Resumed(active.clone()));
        }

        let stored = match load_session(&self.store) {
            Ok(stored) => stored,
            Err(NavError::Serialization { message }) => {
                warn!("[LiveLocation] Discarding unreadable session record: {}", message);
                clear_session(&mut self.store)?;
                None
            }
            Err(e) => return Err(e),
        };
        let Some(session) = stored else {
            return Ok(RestoreOutcome::NothingToRestore);
        };

        if session.is_expired((self.clock)()) {
            info!("[LiveLocation] Session {} expired while away", session.session_id);
            self.active = Some(session.clone());
            let report = self.stop(true).await;
            return Ok(RestoreOutcome::Expired { session, report });
        }

        let subscription = self.provider.watch_position(self.watch_options)?;
        self.user_name = load_user(&self.store)?.display_name();
        info!("[LiveLocation] Resumed session {}", session.session_id);
        self.activate(session.clone(), subscription);
        Ok(RestoreOutcome::Resumed(session))
    }

    /// End the active session.
    ///
    /// Local teardown (subscription, expiry check, persisted record) always
    /// happens; backend failures are reported, not raised. `silent`
    /// suppresses the user-facing confirmation.
    pub async fn stop(&mut self, silent: bool) -> StopReport {
        self.subscription = None;
        self.expiry_timer = None;

        let session = self.active.take();
        let backend_error = match &session {
            Some(session) => self
                .backend
                .stop_tracking_session(&session.session_id)
                .await
                .err(),
            None => None,
        };
        if let Some(e) = &backend_error {
            warn!("[LiveLocation] Backend stop failed: {}", e);
        }

        let store_error = clear_session(&mut self.store).err();
        if let Some(session) = &session {
            info!(
                "[LiveLocation] Stopped session {}{}",
                session.session_id,
                if silent { " (silent)" } else { "" }
            );
        }

        StopReport {
            notify_user: !silent && session.is_some(),
            session_id: session.map(|s| s.session_id),
            backend_error,
            store_error,
        }
    }

    /// True when the active session has an expiry at or before `now`.
    pub fn check_expiry(&self, now: DateTime<Utc>) -> bool {
        self.active
            .as_ref()
            .is_some_and(|session| session.is_expired(now))
    }

    /// Re-open the position subscription after the provider closed it.
    ///
    /// `Ok(false)` when no session is active or the subscription is still open.
    pub fn resume(&mut self) -> Result<bool> {
        let Some(session) = &self.active else {
            return Ok(false);
        };
        if self.subscription.is_some() {
            return Ok(false);
        }
        let subscription = self.provider.watch_position(self.watch_options)?;
        info!("[LiveLocation] Resubscribed session {}", session.session_id);
        self.subscription = Some(subscription);
        Ok(true)
    }

    // ========================================================================
    // Event Pump
    // ========================================================================

    /// Wait for the next fix or expiry. `None` when nothing is active.
    pub async fn next_event(&mut self) -> Option<LiveEvent> {
        loop {
            self.active.as_ref()?;
            if self.subscription.is_none() && self.expiry_timer.is_none() {
                return None;
            }

            let wake = tokio::select! {
                _ = next_tick(self.expiry_timer.as_mut()) => Wake::Tick,
                fix = next_fix(self.subscription.as_mut()) => Wake::Fix(fix),
            };

            match wake {
                Wake::Tick => {
                    if self.check_expiry((self.clock)()) {
                        let report = self.stop(true).await;
                        return Some(LiveEvent::Expired(report));
                    }
                }
                Wake::Fix(Some(Ok(position))) => return Some(self.push(position).await),
                Wake::Fix(Some(Err(e))) => return Some(LiveEvent::GpsError(e)),
                Wake::Fix(None) => {
                    warn!("[LiveLocation] Position stream closed");
                    self.subscription = None;
                    return Some(LiveEvent::GpsError(NavError::gps("Location updates stopped")));
                }
            }
        }
    }

    async fn push(&mut self, position: Position) -> LiveEvent {
        self.last_fix = Some(position.clone());
        let Some(session) = &self.active else {
            return LiveEvent::Pushed(position);
        };
        match self
            .backend
            .update_location(&session.session_id, LocationUpdate::from(&position))
            .await
        {
            Ok(()) => {
                debug!(
                    "[LiveLocation] Pushed ({:.5}, {:.5})",
                    position.coordinate.latitude, position.coordinate.longitude
                );
                LiveEvent::Pushed(position)
            }
            Err(error) => {
                warn!("[LiveLocation] Push failed, session stays live: {}", error);
                LiveEvent::PushFailed { position, error }
            }
        }
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    async fn acquire_fix(&self) -> Result<Position> {
        match self.provider.request_permission().await? {
            PermissionStatus::Granted => {}
            PermissionStatus::Denied => return Err(NavError::PermissionDenied),
        }
        self.provider
            .current_position(self.watch_options.accuracy)
            .await
            .map_err(|e| match e {
                NavError::PermissionDenied | NavError::GpsAcquisitionFailed { .. } => e,
                other => NavError::gps(other.to_string()),
            })
    }

    fn activate(&mut self, session: StoredSession, subscription: PositionWatch) {
        self.expiry_timer = session.expires_at.map(|_| {
            let mut timer = interval_at(
                Instant::now() + self.expiry_check_interval,
                self.expiry_check_interval,
            );
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
            timer
        });
        self.subscription = Some(subscription);
        self.active = Some(session);
    }

    async fn abandon_remote(&self, session_id: &str) {
        if let Err(e) = self.backend.stop_tracking_session(session_id).await {
            warn!("[LiveLocation] Could not end orphaned session {}: {}", session_id, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::CreatedSession;
    use crate::persistence::{MemoryStore, ACTIVE_SESSION_KEY};
    use crate::simulation::SimulatedProvider;
    use crate::Coordinate;
    use chrono::Duration as ChronoDuration;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct MockTracking {
        calls: Mutex<Vec<String>>,
        fail_updates: AtomicBool,
    }

    impl MockTracking {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl TrackingBackend for MockTracking {
        async fn create_tracking_session(&self, request: CreateSessionRequest) -> Result<CreatedSession> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("create:{}:{}", request.user_name, request.duration_minutes));
            Ok(CreatedSession {
                session_id: "s1".to_string(),
                tracking_url: "http://10.0.0.2:5000/track/s1".to_string(),
            })
        }

        async fn update_location(&self, session_id: &str, _update: LocationUpdate) -> Result<()> {
            self.calls.lock().unwrap().push(format!("update:{}", session_id));
            if self.fail_updates.load(Ordering::SeqCst) {
                return Err(NavError::NetworkFailure {
                    message: "offline".to_string(),
                });
            }
            Ok(())
        }

        async fn stop_tracking_session(&self, session_id: &str) -> Result<()> {
            self.calls.lock().unwrap().push(format!("stop:{}", session_id));
            Ok(())
        }
    }

    type TestSession = LiveLocationSession<SimulatedProvider, MockTracking, MemoryStore>;

    fn session(
        provider: &Arc<SimulatedProvider>,
        backend: &Arc<MockTracking>,
        store: &MemoryStore,
    ) -> TestSession {
        LiveLocationSession::new(
            Arc::clone(provider),
            Arc::clone(backend),
            store.clone(),
            &Config::default(),
        )
    }

    fn here() -> Coordinate {
        Coordinate::new(12.90, 77.50)
    }

    #[tokio::test]
    async fn test_unlimited_session() {
        let provider = Arc::new(SimulatedProvider::at(here()));
        let backend = Arc::new(MockTracking::default());
        let store = MemoryStore::new();
        let mut live = session(&provider, &backend, &store);

        let started = live.start(0, None).await.unwrap();
        assert!(started.expires_at.is_none());
        assert!(live.is_subscribed());
        assert!(!live.check_expiry(Utc::now() + ChronoDuration::days(30)));

        let raw = store.get(ACTIVE_SESSION_KEY).unwrap().unwrap();
        let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert!(json["expires_at"].is_null());
        assert_eq!(backend.calls(), vec!["create:User:0"]);
    }

    #[tokio::test]
    async fn test_push_failure_keeps_session() {
        let provider = Arc::new(SimulatedProvider::at(here()));
        let backend = Arc::new(MockTracking::default());
        let store = MemoryStore::new();
        let mut live = session(&provider, &backend, &store);
        live.start(15, Some(Position::at(here()))).await.unwrap();

        backend.fail_updates.store(true, Ordering::SeqCst);
        provider.push(Coordinate::new(12.901, 77.501));
        let event = live.next_event().await.unwrap();
        assert!(matches!(event, LiveEvent::PushFailed { .. }));
        assert!(live.is_active());

        backend.fail_updates.store(false, Ordering::SeqCst);
        provider.push(Coordinate::new(12.902, 77.502));
        let event = live.next_event().await.unwrap();
        assert!(matches!(event, LiveEvent::Pushed(_)));
        assert_eq!(
            live.last_fix().unwrap().coordinate,
            Coordinate::new(12.902, 77.502)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_stops_silently() {
        let provider = Arc::new(SimulatedProvider::at(here()));
        let backend = Arc::new(MockTracking::default());
        let store = MemoryStore::new();

        let now = Arc::new(Mutex::new(Utc::now()));
        let clock_now = Arc::clone(&now);
        let mut live = session(&provider, &backend, &store)
            .with_clock(Arc::new(move || *clock_now.lock().unwrap()));

        live.start(15, None).await.unwrap();
        *now.lock().unwrap() += ChronoDuration::minutes(16);

        let event = live.next_event().await.unwrap();
        match event {
            LiveEvent::Expired(report) => {
                assert!(!report.notify_user);
                assert_eq!(report.session_id.as_deref(), Some("s1"));
            }
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(!live.is_active());
        assert!(!live.is_subscribed());
        assert!(!store.contains(ACTIVE_SESSION_KEY));
        assert_eq!(provider.open_watches(), 0);
        assert!(live.next_event().await.is_none());
    }

    #[tokio::test]
    async fn test_explicit_stop_notifies() {
        let provider = Arc::new(SimulatedProvider::at(here()));
        let backend = Arc::new(MockTracking::default());
        let store = MemoryStore::new();
        let mut live = session(&provider, &backend, &store);
        live.start(30, None).await.unwrap();

        let report = live.stop(false).await;
        assert!(report.notify_user);
        assert!(report.backend_error.is_none());
        assert!(!store.contains(ACTIVE_SESSION_KEY));
        assert_eq!(backend.calls().last().unwrap(), "stop:s1");

        // Stopping again is a quiet no-op
        let again = live.stop(false).await;
        assert!(!again.notify_user);
        assert!(again.session_id.is_none());
    }

    #[tokio::test]
    async fn test_start_denied_without_fix() {
        let provider = Arc::new(SimulatedProvider::denied());
        let backend = Arc::new(MockTracking::default());
        let store = MemoryStore::new();
        let mut live = session(&provider, &backend, &store);

        assert_eq!(live.start(15, None).await, Err(NavError::PermissionDenied));
        assert!(backend.calls().is_empty());
        assert!(!store.contains(ACTIVE_SESSION_KEY));
    }

    #[tokio::test]
    async fn test_share_message_uses_user_name() {
        let provider = Arc::new(SimulatedProvider::at(here()));
        let backend = Arc::new(MockTracking::default());
        let mut store = MemoryStore::new();
        store
            .set("user", r#"{"id": "u1", "email": "asha@example.org"}"#)
            .unwrap();
        let mut live = session(&provider, &backend, &store);
        live.start(60, None).await.unwrap();

        let message = live.share_message().unwrap();
        assert!(message.contains("asha is sharing"));
        assert!(message.contains("/track/s1"));
        assert!(message.contains("1h"));
    }

    #[tokio::test]
    async fn test_restore_resumes_live_session() {
        let provider = Arc::new(SimulatedProvider::at(here()));
        let backend = Arc::new(MockTracking::default());
        let store = MemoryStore::new();
        {
            let mut first_run = session(&provider, &backend, &store);
            first_run.start(60, None).await.unwrap();
        }

        let mut second_run = session(&provider, &backend, &store);
        match second_run.restore().await.unwrap() {
            RestoreOutcome::Resumed(session) => assert_eq!(session.session_id, "s1"),
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert!(second_run.is_subscribed());
        assert!(store.contains(ACTIVE_SESSION_KEY));
    }

    #[tokio::test]
    async fn test_restore_discards_unreadable_record() {
        let provider = Arc::new(SimulatedProvider::at(here()));
        let backend = Arc::new(MockTracking::default());
        let mut store = MemoryStore::new();
        store.set(ACTIVE_SESSION_KEY, "{not json").unwrap();

        let mut live = session(&provider, &backend, &store);
        assert_eq!(live.restore().await.unwrap(), RestoreOutcome::NothingToRestore);
        assert!(!store.contains(ACTIVE_SESSION_KEY));
    }

    #[tokio::test]
    async fn test_resume_after_stream_closed() {
        let provider = Arc::new(SimulatedProvider::at(here()));
        let backend = Arc::new(MockTracking::default());
        let store = MemoryStore::new();
        let mut live = session(&provider, &backend, &store);
        assert!(!live.resume().unwrap());

        live.start(0, None).await.unwrap();
        assert!(!live.resume().unwrap());

        provider.close_watches();
        let event = live.next_event().await.unwrap();
        assert!(matches!(event, LiveEvent::GpsError(_)));
        assert!(live.is_active());
        assert!(!live.is_subscribed());

        assert!(live.resume().unwrap());
        assert!(live.is_subscribed());
        provider.push(Coordinate::new(12.905, 77.505));
        let event = live.next_event().await.unwrap();
        assert!(matches!(event, LiveEvent::Pushed(_)));
        assert_eq!(backend.calls(), vec!["create:User:0", "update:s1"]);
    }
}
