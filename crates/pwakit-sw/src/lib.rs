//! # PwaKit Service Worker
//!
//! Offline caching service worker for a static marketing site.
//!
//! ## Features
//!
//! - **Versioned partitions**: static, dynamic and image caches named
//!   `<prefix>-<partition>-<version>`
//! - **Install/activate**: manifest priming, stale version cleanup, client
//!   claiming and the `SW_UPDATED` broadcast
//! - **Fetch strategies**: network-first, cache-first, stale-while-revalidate
//!   and a shared offline fallback
//! - **Background sync, push and notification clicks**
//!
//! ## Architecture
//!
//! ```text
//! ServiceWorkerRegistration
//!     ├── installing / waiting / active (ServiceWorker)
//!     │       ├── PartitionRegistry ──► CacheBackend (shared)
//!     │       ├── StrategyEngine   ──► Network (shared)
//!     │       └── SyncQueue
//!     └── scope
//!
//! WorkerHost
//!     ├── CacheBackend
//!     ├── Network
//!     ├── Clients
//!     └── HostEvent channel
//! ```

use pwakit_net::NetError;
use thiserror::Error;

pub mod cache;
pub mod clients;
pub mod config;
pub mod event;
pub mod lifecycle;
pub mod manifest;
pub mod notification;
pub mod partition;
pub mod registration;
pub mod strategy;
pub mod sync;
pub mod testing;

pub use cache::{CacheBackend, CacheEntry, MemoryCacheBackend, RequestKey};
pub use clients::{Client, ClientMessage, ClientType, Clients, MessageKind, WindowOutcome};
pub use config::{NotificationConfig, SwConfig};
pub use event::{EventLifetime, FetchDisposition, HostEvent};
pub use lifecycle::{ServiceWorker, ServiceWorkerId, ServiceWorkerState, WorkerHost};
pub use manifest::{AssetGroup, AssetManifest, ManifestEntry};
pub use notification::{NotificationOptions, PushPayload};
pub use partition::{CacheVersion, Partition, PartitionRegistry};
pub use registration::ServiceWorkerRegistration;
pub use strategy::{classify, Strategy, StrategyEngine};
pub use sync::{SyncQueue, SyncReport};

// ==================== Errors ====================

/// Errors that can occur in service worker operations.
#[derive(Error, Debug)]
pub enum ServiceWorkerError {
    #[error("Network error: {0}")]
    Network(#[from] NetError),

    #[error("Bad status {status} for {url}")]
    BadStatus { url: String, status: u16 },

    #[error("Install failed: {0}")]
    InstallFailed(String),

    #[error("Cache error: {0}")]
    CacheError(String),

    #[error("State error: {0}")]
    StateError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Invalid push payload: {0}")]
    InvalidPayload(String),

    #[error("Client gone: {0}")]
    ClientGone(String),
}

impl ServiceWorkerError {
    /// Whether retrying the same operation could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ServiceWorkerError::Network(_) => true,
            ServiceWorkerError::BadStatus { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

impl From<ServiceWorkerError> for pwakit_common::PwaKitError {
    fn from(e: ServiceWorkerError) -> Self {
        match e {
            ServiceWorkerError::Network(source) => pwakit_common::PwaKitError::network_with_source(
                source.to_string(),
                source,
            ),
            ServiceWorkerError::Config(message) => pwakit_common::PwaKitError::config(message),
            ServiceWorkerError::NotFound(what) => pwakit_common::PwaKitError::NotFound(what),
            other => pwakit_common::PwaKitError::cache(other.to_string()),
        }
    }
}
