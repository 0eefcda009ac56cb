//! Registration: the installing/waiting/active slots for one scope.

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

use pwakit_net::Request;
use tokio::sync::Mutex;
use tracing::{debug, info};
use url::Url;

use crate::clients::ClientMessage;
use crate::event::FetchDisposition;
use crate::lifecycle::ServiceWorker;
use crate::ServiceWorkerError;

const UPDATE_AVAILABLE_MESSAGE: &str = "A new version is available";

#[derive(Debug, Default)]
struct Slots {
    installing: Option<Arc<ServiceWorker>>,
    waiting: Option<Arc<ServiceWorker>>,
    active: Option<Arc<ServiceWorker>>,
    last_update: Option<Instant>,
}

/// A service worker registration.
///
/// The slots are only locked for reads and swaps, never across an install
/// or activation, so fetches keep reaching the active worker while the next
/// version installs.
#[derive(Debug)]
pub struct ServiceWorkerRegistration {
    /// Scope URL.
    scope: Url,

    slots: RwLock<Slots>,

    /// Held for the whole of an update or activation.
    updating: Mutex<()>,
}

impl ServiceWorkerRegistration {
    /// Create a new registration.
    pub fn new(scope: Url) -> Self {
        Self {
            scope,
            slots: RwLock::new(Slots::default()),
            updating: Mutex::new(()),
        }
    }

    fn slots(&self) -> RwLockReadGuard<'_, Slots> {
        self.slots.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn slots_mut(&self) -> RwLockWriteGuard<'_, Slots> {
        self.slots.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn scope(&self) -> &Url {
        &self.scope
    }

    pub fn installing(&self) -> Option<Arc<ServiceWorker>> {
        self.slots().installing.clone()
    }

    pub fn waiting(&self) -> Option<Arc<ServiceWorker>> {
        self.slots().waiting.clone()
    }

    /// Get the active worker.
    pub fn active(&self) -> Option<Arc<ServiceWorker>> {
        self.slots().active.clone()
    }

    pub fn last_update(&self) -> Option<Instant> {
        self.slots().last_update
    }

    /// Whether `url` falls under this registration.
    pub fn in_scope(&self, url: &Url) -> bool {
        url.as_str().starts_with(self.scope.as_str())
    }

    /// Install `worker` as the next version.
    ///
    /// Clients of the current worker are told an update is available. The new
    /// worker activates straight away when it asked to skip waiting or when
    /// nothing is active yet; otherwise it waits for [`activate_waiting`].
    /// Concurrent updates run one after the other.
    ///
    /// [`activate_waiting`]: Self::activate_waiting
    pub async fn update(&self, worker: ServiceWorker) -> Result<(), ServiceWorkerError> {
        let _updating = self.updating.lock().await;
        let worker = Arc::new(worker);
        {
            let mut slots = self.slots_mut();
            slots.last_update = Some(Instant::now());
            slots.installing = Some(Arc::clone(&worker));
        }

        let installed = worker.install().await;
        self.slots_mut().installing = None;
        installed?;

        if let Some(active) = self.active() {
            let notified = active
                .broadcast(&ClientMessage::update_available(UPDATE_AVAILABLE_MESSAGE))
                .await;
            debug!(scope = %self.scope, notified, "Update available");
        }

        let (previous, activate_now) = {
            let mut slots = self.slots_mut();
            let previous = slots.waiting.replace(Arc::clone(&worker));
            (previous, worker.skip_waiting_requested() || slots.active.is_none())
        };
        if let Some(previous) = previous {
            previous.mark_redundant();
        }

        if activate_now {
            self.promote_waiting().await?;
        }
        Ok(())
    }

    /// Promote the waiting worker. Returns `false` when nothing was waiting.
    pub async fn activate_waiting(&self) -> Result<bool, ServiceWorkerError> {
        let _updating = self.updating.lock().await;
        self.promote_waiting().await
    }

    async fn promote_waiting(&self) -> Result<bool, ServiceWorkerError> {
        let Some(worker) = self.slots_mut().waiting.take() else {
            return Ok(false);
        };

        if let Err(e) = worker.activate().await {
            self.slots_mut().waiting = Some(worker);
            return Err(e);
        }

        let old = self.slots_mut().active.replace(Arc::clone(&worker));
        if let Some(old) = old {
            old.mark_redundant();
        }
        info!(scope = %self.scope, worker = %worker.id(), "Worker active");
        Ok(true)
    }

    /// Route a fetch to the active worker.
    pub fn handle_fetch(&self, request: Request) -> FetchDisposition {
        match self.active() {
            Some(worker) if self.in_scope(&request.url) => worker.handle_fetch(request),
            _ => FetchDisposition::Passthrough,
        }
    }

    /// Unregister (mark every worker redundant).
    pub fn unregister(&self) {
        let workers = {
            let mut slots = self.slots_mut();
            [
                slots.installing.take(),
                slots.waiting.take(),
                slots.active.take(),
            ]
        };
        for worker in workers.into_iter().flatten() {
            worker.mark_redundant();
        }
    }
}
