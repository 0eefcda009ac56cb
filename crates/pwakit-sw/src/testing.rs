//! Scriptable in-memory [`Network`] for hosts without sockets and for tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use futures::future::BoxFuture;
use hashbrown::{HashMap, HashSet};
use http::StatusCode;
use pwakit_net::{NetError, Network, Request, Response};
use tracing::trace;

#[derive(Debug, Default)]
struct Routes {
    responses: HashMap<String, (StatusCode, Bytes)>,
    unreachable: HashSet<String>,
    calls: HashMap<String, usize>,
}

/// Network that answers from a route table.
///
/// Unknown URLs get a 404. URLs marked unreachable, or every URL while the
/// network is offline, fail with [`NetError::Offline`].
#[derive(Debug, Default)]
pub struct MockNetwork {
    routes: Mutex<Routes>,
    offline: AtomicBool,
}

impl MockNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    fn routes(&self) -> MutexGuard<'_, Routes> {
        self.routes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Serve `body` with `status` for `url`, replacing any earlier route.
    pub fn respond(&self, url: &str, status: u16, body: impl Into<Bytes>) {
        let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let mut routes = self.routes();
        routes.unreachable.remove(url);
        routes.responses.insert(url.to_string(), (status, body.into()));
    }

    /// Make one URL fail at the transport level.
    pub fn unreachable(&self, url: &str) {
        self.routes().unreachable.insert(url.to_string());
    }

    /// Take the whole network down or bring it back.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Fetches attempted for `url`, including failed ones.
    pub fn calls(&self, url: &str) -> usize {
        self.routes().calls.get(url).copied().unwrap_or(0)
    }

    /// Fetches attempted for any URL.
    pub fn total_calls(&self) -> usize {
        self.routes().calls.values().sum()
    }
}

impl Network for MockNetwork {
    fn fetch(&self, request: Request) -> BoxFuture<'_, Result<Response, NetError>> {
        let url = request.url.to_string();
        let result = {
            let mut routes = self.routes();
            *routes.calls.entry(url.clone()).or_insert(0) += 1;

            if self.offline.load(Ordering::SeqCst) || routes.unreachable.contains(&url) {
                Err(NetError::Offline)
            } else {
                let (status, body) = routes
                    .responses
                    .get(&url)
                    .cloned()
                    .unwrap_or((StatusCode::NOT_FOUND, Bytes::new()));
                Ok(Response::new(request.url, status, body))
            }
        };

        trace!(url = %url, ok = result.is_ok(), "Mock fetch");
        Box::pin(async move {
            tokio::task::yield_now().await;
            result
        })
    }
}
