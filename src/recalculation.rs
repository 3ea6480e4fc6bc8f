//! Route re-fetching after the user chooses to recalculate.
//!
//! Each attempt is bounded by the configured route-fetch deadline and can be
//! aborted from a [`CancelHandle`] (screen teardown). All failures collapse
//! into one [`RecalcFailure`], with timeouts kept distinct. The loading flag
//! is cleared on every exit path.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::future::{abortable, AbortHandle, Aborted};
use log::{info, warn};

use crate::backend::{RouteMode, RoutingBackend};
use crate::config::Config;
use crate::error::{NavError, RecalcFailure};
use crate::navigator::TripEndpoints;
use crate::route_model::RouteModel;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Aborts the in-flight fetch, if any. Clones share the same slot.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    slot: Arc<Mutex<Slot>>,
}

/// The newest fetch's abort handle, tagged with the attempt that armed it.
#[derive(Debug, Default)]
struct Slot {
    generation: u64,
    handle: Option<AbortHandle>,
}

impl CancelHandle {
    /// Returns true if a fetch was in flight.
    pub fn cancel(&self) -> bool {
        match lock(&self.slot).handle.take() {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    pub fn is_in_flight(&self) -> bool {
        lock(&self.slot).handle.is_some()
    }

    /// Install `handle`, aborting the attempt it supersedes. Returns the
    /// generation the caller must present to `disarm`.
    fn arm(&self, handle: AbortHandle) -> u64 {
        let mut slot = lock(&self.slot);
        slot.generation += 1;
        if let Some(previous) = slot.handle.replace(handle) {
            previous.abort();
        }
        slot.generation
    }

    /// Clear the slot unless a newer attempt has taken it over.
    fn disarm(&self, generation: u64) {
        let mut slot = lock(&self.slot);
        if slot.generation == generation {
            slot.handle = None;
        }
    }
}

/// Holds the loading flag up while any attempt is outstanding.
struct LoadingGuard {
    flag: Arc<AtomicBool>,
    outstanding: Arc<AtomicUsize>,
}

impl LoadingGuard {
    fn enter(flag: &Arc<AtomicBool>, outstanding: &Arc<AtomicUsize>) -> Self {
        outstanding.fetch_add(1, Ordering::SeqCst);
        flag.store(true, Ordering::SeqCst);
        Self {
            flag: Arc::clone(flag),
            outstanding: Arc::clone(outstanding),
        }
    }
}

impl Drop for LoadingGuard {
    fn drop(&mut self) {
        if self.outstanding.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.flag.store(false, Ordering::SeqCst);
        }
    }
}

pub struct RecalculationFlow<R: RoutingBackend> {
    backend: Arc<R>,
    deadline: Duration,
    mode: Option<RouteMode>,
    loading: Arc<AtomicBool>,
    outstanding: Arc<AtomicUsize>,
    cancel: CancelHandle,
}

impl<R: RoutingBackend> RecalculationFlow<R> {
    pub fn new(backend: Arc<R>, config: &Config) -> Self {
        Self {
            backend,
            deadline: config.route_fetch_timeout,
            mode: None,
            loading: Arc::new(AtomicBool::new(false)),
            outstanding: Arc::new(AtomicUsize::new(0)),
            cancel: CancelHandle::default(),
        }
    }

    /// Travel mode sent with re-fetches. `None` asks for alternatives.
    pub fn with_mode(mut self, mode: Option<RouteMode>) -> Self {
        self.mode = mode;
        self
    }

    pub fn backend(&self) -> &Arc<R> {
        &self.backend
    }

    /// True while a re-fetch is outstanding.
    pub fn is_loading(&self) -> bool {
        self.loading.load(Ordering::SeqCst)
    }

    /// Shared flag for a host loading indicator.
    pub fn loading_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.loading)
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Abort the in-flight re-fetch, if any.
    pub fn cancel(&self) -> bool {
        self.cancel.cancel()
    }

    /// Re-fetch routes between the trip endpoints.
    ///
    /// A response without a single navigable route counts as route-unavailable.
    pub async fn recalculate(&self, endpoints: &TripEndpoints) -> Result<RouteModel, RecalcFailure> {
        let Some((start, end)) = endpoints.both() else {
            warn!("[Recalculation] Missing trip endpoints");
            return Err(RecalcFailure::MissingEndpoints);
        };

        let _loading = LoadingGuard::enter(&self.loading, &self.outstanding);
        info!(
            "[Recalculation] Re-fetching routes ({:.5}, {:.5}) -> ({:.5}, {:.5})",
            start.latitude, start.longitude, end.latitude, end.longitude
        );

        let (fetch, handle) = abortable(self.backend.fetch_routes(start, end, self.mode));
        let generation = self.cancel.arm(handle);
        // Dropping `fetch` on timeout drops the request with it
        let outcome = tokio::time::timeout(self.deadline, fetch).await;
        self.cancel.disarm(generation);

        match outcome {
            Err(_) => {
                warn!("[Recalculation] Timed out after {:?}", self.deadline);
                Err(RecalcFailure::Timeout)
            }
            Ok(Err(Aborted)) => {
                info!("[Recalculation] Cancelled");
                Err(RecalcFailure::Cancelled)
            }
            Ok(Ok(Err(e))) => {
                warn!("[Recalculation] Failed: {}", e);
                Err(e.into())
            }
            Ok(Ok(Ok(model))) if !model.has_navigable_route() => {
                warn!("[Recalculation] No navigable route in response");
                Err(RecalcFailure::Failed {
                    source: NavError::route_unavailable("No navigable route returned"),
                })
            }
            Ok(Ok(Ok(model))) => {
                info!("[Recalculation] Received {} routes", model.len());
                Ok(model)
            }
        }
    }
}
