//! The worker itself: lifecycle state machine and event handlers.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use pwakit_net::{Network, Request};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch, RwLock};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::cache::CacheBackend;
use crate::clients::{ClientMessage, Clients, WindowOutcome};
use crate::config::SwConfig;
use crate::event::{EventLifetime, FetchDisposition, HostEvent};
use crate::manifest::AssetGroup;
use crate::notification::{NotificationOptions, PushPayload};
use crate::partition::{PartitionHandle, PartitionRegistry};
use crate::strategy::{classify, StrategyEngine};
use crate::sync::{SyncQueue, SyncReport};
use crate::ServiceWorkerError;

// ==================== Types ====================

/// Unique identifier for a service worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServiceWorkerId(u64);

impl ServiceWorkerId {
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for ServiceWorkerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ServiceWorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sw-{}", self.0)
    }
}

/// Service worker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ServiceWorkerState {
    /// Created, install not started.
    #[default]
    Parsed,
    /// Installing (install event).
    Installing,
    /// Installed and waiting for activation.
    Installed,
    /// Activating (activate event).
    Activating,
    /// Active and controlling pages.
    Activated,
    /// Replaced or install failed.
    Redundant,
}

// ==================== Host ====================

/// Resources shared by every worker version on one origin.
#[derive(Clone)]
pub struct WorkerHost {
    pub backend: Arc<dyn CacheBackend>,
    pub network: Arc<dyn Network>,
    pub clients: Arc<RwLock<Clients>>,
    events: mpsc::UnboundedSender<HostEvent>,
}

impl fmt::Debug for WorkerHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerHost").finish_non_exhaustive()
    }
}

impl WorkerHost {
    /// Create a host and the receiver for the side effects workers request.
    pub fn new(
        backend: Arc<dyn CacheBackend>,
        network: Arc<dyn Network>,
    ) -> (Self, mpsc::UnboundedReceiver<HostEvent>) {
        let (events, event_rx) = mpsc::unbounded_channel();
        (
            Self {
                backend,
                network,
                clients: Arc::new(RwLock::new(Clients::new())),
                events,
            },
            event_rx,
        )
    }

    fn emit(&self, event: HostEvent) {
        if self.events.send(event).is_err() {
            debug!("Host event receiver dropped");
        }
    }
}

// ==================== Service Worker ====================

/// One version of the service worker and everything its handlers need.
pub struct ServiceWorker {
    id: ServiceWorkerId,
    config: Arc<SwConfig>,
    host: WorkerHost,
    registry: Arc<PartitionRegistry>,
    engine: StrategyEngine,
    sync_queue: SyncQueue,
    state: watch::Sender<ServiceWorkerState>,
    skip_waiting: AtomicBool,
}

impl fmt::Debug for ServiceWorker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceWorker")
            .field("id", &self.id)
            .field("version", self.registry.version())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl ServiceWorker {
    /// Create a worker version from its config.
    pub fn new(config: SwConfig, host: &WorkerHost) -> Result<Self, ServiceWorkerError> {
        config.validate()?;

        let registry = Arc::new(PartitionRegistry::new(
            config.cache_prefix.clone(),
            config.version.clone(),
            Arc::clone(&host.backend),
        ));
        let engine = StrategyEngine::new(
            Arc::clone(&registry),
            Arc::clone(&host.network),
            config.resolve(&config.offline_page)?,
            config.resolve(&config.fallback_image)?,
        );
        let (state, _) = watch::channel(ServiceWorkerState::Parsed);

        Ok(Self {
            id: ServiceWorkerId::new(),
            config: Arc::new(config),
            host: host.clone(),
            registry,
            engine,
            sync_queue: SyncQueue::new(),
            state,
            skip_waiting: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> ServiceWorkerId {
        self.id
    }

    pub fn config(&self) -> &SwConfig {
        &self.config
    }

    pub fn registry(&self) -> &PartitionRegistry {
        &self.registry
    }

    pub fn engine(&self) -> &StrategyEngine {
        &self.engine
    }

    /// Current state.
    pub fn state(&self) -> ServiceWorkerState {
        *self.state.borrow()
    }

    /// Watch state changes.
    pub fn subscribe(&self) -> watch::Receiver<ServiceWorkerState> {
        self.state.subscribe()
    }

    /// Whether install asked to skip the waiting phase.
    pub fn skip_waiting_requested(&self) -> bool {
        self.skip_waiting.load(Ordering::SeqCst)
    }

    fn set_state(&self, state: ServiceWorkerState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!(worker = %self.id, ?previous, ?state, "State change");
            self.host.emit(HostEvent::StateChange {
                worker_id: self.id,
                state,
            });
        }
    }

    /// Mark this worker as replaced.
    pub fn mark_redundant(&self) {
        self.set_state(ServiceWorkerState::Redundant);
    }

    // ==================== install ====================

    /// Install event: prime the three partitions from the manifest.
    ///
    /// Static and image batches are all-or-nothing and fail the install;
    /// external assets are best effort.
    pub async fn install(&self) -> Result<(), ServiceWorkerError> {
        if self.state() != ServiceWorkerState::Parsed {
            return Err(ServiceWorkerError::StateError(format!(
                "cannot install from {:?}",
                self.state()
            )));
        }

        info!(worker = %self.id, version = %self.config.version, "Install started");
        self.set_state(ServiceWorkerState::Installing);
        let started = Instant::now();

        match self.prime_caches().await {
            Ok(()) => {
                info!(
                    worker = %self.id,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Install completed"
                );
                self.set_state(ServiceWorkerState::Installed);
                self.request_skip_waiting();
                Ok(())
            }
            Err(e) => {
                error!(worker = %self.id, error = %e, "Install failed");
                self.set_state(ServiceWorkerState::Redundant);
                Err(ServiceWorkerError::InstallFailed(e.to_string()))
            }
        }
    }

    async fn prime_caches(&self) -> Result<(), ServiceWorkerError> {
        let static_cache = self.registry.open(AssetGroup::Static.partition()).await?;
        let image_cache = self.registry.open(AssetGroup::Images.partition()).await?;
        let external_cache = self.registry.open(AssetGroup::External.partition()).await?;

        let (statics, images, ()) = tokio::join!(
            self.prime_group(&static_cache, AssetGroup::Static),
            self.prime_group(&image_cache, AssetGroup::Images),
            self.prime_external(&external_cache),
        );
        statics?;
        images?;
        Ok(())
    }

    async fn prime_group(
        &self,
        cache: &PartitionHandle,
        group: AssetGroup,
    ) -> Result<(), ServiceWorkerError> {
        let requests = self.config.manifest.requests(group, self.config.origin()?)?;
        debug!(cache = cache.name(), count = requests.len(), "Caching assets");
        cache.add_all(self.host.network.as_ref(), requests).await?;
        Ok(())
    }

    async fn prime_external(&self, cache: &PartitionHandle) {
        let requests = match self
            .config
            .origin()
            .and_then(|origin| self.config.manifest.requests(AssetGroup::External, origin))
        {
            Ok(requests) => requests,
            Err(e) => {
                warn!(error = %e, "Skipping external assets");
                return;
            }
        };

        let network = self.host.network.as_ref();
        let results = join_all(requests.into_iter().map(|request| async move {
            let url = request.url.clone();
            (url, cache.add(network, request).await)
        }))
        .await;

        for (url, result) in results {
            if let Err(e) = result {
                warn!(url = %url, error = %e, "Failed to cache external asset");
            }
        }
    }

    /// `self.skipWaiting()`.
    pub fn request_skip_waiting(&self) {
        self.skip_waiting.store(true, Ordering::SeqCst);
        self.host.emit(HostEvent::SkipWaiting { worker_id: self.id });
    }

    // ==================== activate ====================

    /// Activate event: drop caches of other versions, claim clients, tell
    /// them about the update. Running it again is harmless.
    pub async fn activate(&self) -> Result<(), ServiceWorkerError> {
        match self.state() {
            ServiceWorkerState::Installed | ServiceWorkerState::Activated => {}
            other => {
                return Err(ServiceWorkerError::StateError(format!(
                    "cannot activate from {other:?}"
                )))
            }
        }

        info!(worker = %self.id, "Activate started");
        let started = Instant::now();
        if self.state() == ServiceWorkerState::Installed {
            self.set_state(ServiceWorkerState::Activating);
        }

        let (deleted, claimed) = tokio::join!(self.delete_stale_caches(), self.claim_clients());

        let message = ClientMessage::updated(self.config.update_message.clone());
        let notified = self.host.clients.read().await.broadcast(self.id, &message);

        self.set_state(ServiceWorkerState::Activated);
        info!(
            worker = %self.id,
            deleted,
            claimed,
            notified,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Activate completed"
        );
        Ok(())
    }

    async fn delete_stale_caches(&self) -> usize {
        let mut deleted = 0;
        for name in self.registry.cache_names().await {
            if !self.registry.is_current(&name) {
                info!(cache = %name, "Deleting old cache");
                if self.registry.delete_name(&name).await {
                    deleted += 1;
                }
            }
        }
        deleted
    }

    async fn claim_clients(&self) -> usize {
        self.host.clients.write().await.claim(self.id)
    }

    /// Post a message to every client this worker controls.
    pub async fn broadcast(&self, message: &ClientMessage) -> usize {
        self.host.clients.read().await.broadcast(self.id, message)
    }

    // ==================== fetch ====================

    /// Fetch event. Answers synchronously; the response itself is deferred.
    pub fn handle_fetch(&self, request: Request) -> FetchDisposition {
        if self.state() != ServiceWorkerState::Activated {
            return FetchDisposition::Passthrough;
        }

        let Some(strategy) = classify(&request, &self.config.static_path_markers) else {
            debug!(url = %request.url, method = %request.method, "Not intercepted");
            return FetchDisposition::Passthrough;
        };

        let engine = self.engine.clone();
        let lifetime = EventLifetime::new();
        let event_lifetime = lifetime.clone();
        FetchDisposition::RespondWith {
            response: Box::pin(async move {
                engine.respond(strategy, request, &event_lifetime).await
            }),
            lifetime,
        }
    }

    // ==================== sync ====================

    /// Queue a submission for the next background sync.
    pub async fn queue_submission(&self, request: Request) {
        self.sync_queue.enqueue(request).await;
    }

    pub fn sync_queue(&self) -> &SyncQueue {
        &self.sync_queue
    }

    /// Sync event. Unknown tags are ignored and yield `None`.
    pub async fn handle_sync(&self, tag: &str) -> Option<SyncReport> {
        if tag != self.config.sync_tag {
            debug!(tag, "Ignoring sync tag");
            return None;
        }

        info!(tag, "Background sync");
        Some(
            self.sync_queue
                .replay(self.host.network.as_ref(), &self.config.sync_retry)
                .await,
        )
    }

    // ==================== push & notifications ====================

    /// Push event. Returns whether a notification was shown; missing or
    /// malformed payloads are logged and skipped.
    pub async fn handle_push(&self, data: Option<&[u8]>) -> bool {
        let Some(data) = data else {
            debug!("Push without payload");
            return false;
        };

        let payload = match PushPayload::parse(data) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "Ignoring malformed push payload");
                return false;
            }
        };

        let options = NotificationOptions::for_push(&payload, &self.config.notification);
        self.host.emit(HostEvent::ShowNotification {
            title: payload.title,
            options,
        });
        true
    }

    /// Notification click: close it, then focus or open the site root.
    pub async fn handle_notification_click(
        &self,
        tag: Option<String>,
    ) -> Result<WindowOutcome, ServiceWorkerError> {
        info!("Notification click received");
        self.host.emit(HostEvent::CloseNotification { tag });

        let root: Url = self.config.resolve("/")?;
        self.host.clients.write().await.focus_or_open(&root)
    }
}
