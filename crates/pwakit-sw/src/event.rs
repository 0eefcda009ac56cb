//! Host-facing event plumbing: event lifetimes, fetch dispositions, and the
//! side effects the host has to carry out.

use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use pwakit_net::Response;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::lifecycle::{ServiceWorkerId, ServiceWorkerState};
use crate::notification::NotificationOptions;

/// Work an event handler started that the host must wait for before it may
/// terminate the worker (`event.waitUntil`).
#[derive(Debug, Clone, Default)]
pub struct EventLifetime {
    pending: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl EventLifetime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn `work` and tie it to this event.
    pub async fn extend<F>(&self, work: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(work);
        self.pending.lock().await.push(handle);
    }

    /// Number of tasks not yet waited for.
    pub async fn pending(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// Wait until every extension, including ones added while waiting, has
    /// finished.
    pub async fn settled(&self) {
        loop {
            let batch: Vec<JoinHandle<()>> = self.pending.lock().await.drain(..).collect();
            if batch.is_empty() {
                return;
            }
            for handle in batch {
                if let Err(e) = handle.await {
                    warn!(error = %e, "Extended task did not complete");
                }
            }
        }
    }
}

/// Answer to a fetch event.
pub enum FetchDisposition {
    /// Not intercepted; the host's default fetch handles the request.
    Passthrough,
    /// Intercepted; the host awaits `response` and keeps the worker alive
    /// until `lifetime` settles.
    RespondWith {
        response: BoxFuture<'static, Response>,
        lifetime: EventLifetime,
    },
}

impl std::fmt::Debug for FetchDisposition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FetchDisposition::Passthrough => f.write_str("Passthrough"),
            FetchDisposition::RespondWith { lifetime, .. } => f
                .debug_struct("RespondWith")
                .field("lifetime", lifetime)
                .finish_non_exhaustive(),
        }
    }
}

impl FetchDisposition {
    pub fn is_passthrough(&self) -> bool {
        matches!(self, FetchDisposition::Passthrough)
    }

    /// Await the response and every background task of the event.
    pub async fn settle(self) -> Option<Response> {
        match self {
            FetchDisposition::Passthrough => None,
            FetchDisposition::RespondWith { response, lifetime } => {
                let response = response.await;
                lifetime.settled().await;
                Some(response)
            }
        }
    }
}

/// Side effects the host performs on the worker's behalf.
#[derive(Debug, Clone, PartialEq)]
pub enum HostEvent {
    /// A worker changed state.
    StateChange {
        worker_id: ServiceWorkerId,
        state: ServiceWorkerState,
    },
    /// The worker asked to activate without waiting for old clients to close.
    SkipWaiting { worker_id: ServiceWorkerId },
    /// Display a system notification.
    ShowNotification {
        title: String,
        options: NotificationOptions,
    },
    /// Dismiss a notification.
    CloseNotification { tag: Option<String> },
}
