//! Request classification and the caching strategies.
//!
//! [`classify`] is a pure function of the request; [`StrategyEngine`] runs the
//! chosen strategy against the partition registry and the network.

use std::sync::Arc;

use http::{Method, StatusCode};
use pwakit_net::{Destination, Network, Request, Response};
use tracing::{debug, warn};
use url::Url;

use crate::event::EventLifetime;
use crate::partition::{Partition, PartitionRegistry};
use crate::ServiceWorkerError;

/// Body of the synthetic offline response.
pub const OFFLINE_BODY: &str = "Offline content not available";

/// How a request is fulfilled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Network, then cache, then the offline page for navigations.
    NetworkFirst,
    /// The given partition, then network (stored on success).
    CacheFirst(Partition),
    /// Cached copy now, refreshed from network in the background.
    StaleWhileRevalidate,
}

/// Pick the strategy for a request, or `None` if the worker must not
/// intercept it (non-GET or non-http(s)).
pub fn classify(request: &Request, static_markers: &[String]) -> Option<Strategy> {
    if request.method != Method::GET || !request.is_http() {
        return None;
    }

    let strategy = match request.destination {
        Destination::Document => Strategy::NetworkFirst,
        Destination::Image => Strategy::CacheFirst(Partition::Images),
        _ if static_markers
            .iter()
            .any(|marker| request.url.path().contains(marker.as_str())) =>
        {
            Strategy::CacheFirst(Partition::Static)
        }
        _ => Strategy::StaleWhileRevalidate,
    };
    Some(strategy)
}

/// Runs strategies for one worker version.
#[derive(Clone)]
pub struct StrategyEngine {
    registry: Arc<PartitionRegistry>,
    network: Arc<dyn Network>,
    offline_page: Url,
    fallback_image: Url,
}

impl std::fmt::Debug for StrategyEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StrategyEngine")
            .field("registry", &self.registry)
            .field("offline_page", &self.offline_page.as_str())
            .field("fallback_image", &self.fallback_image.as_str())
            .finish_non_exhaustive()
    }
}

impl StrategyEngine {
    pub fn new(
        registry: Arc<PartitionRegistry>,
        network: Arc<dyn Network>,
        offline_page: Url,
        fallback_image: Url,
    ) -> Self {
        Self {
            registry,
            network,
            offline_page,
            fallback_image,
        }
    }

    pub fn registry(&self) -> &PartitionRegistry {
        &self.registry
    }

    /// Run `strategy`; any failure is answered by [`StrategyEngine::fallback`].
    pub async fn respond(
        &self,
        strategy: Strategy,
        request: Request,
        lifetime: &EventLifetime,
    ) -> Response {
        let result = match strategy {
            Strategy::NetworkFirst => self.network_first(request.clone()).await,
            Strategy::CacheFirst(partition) => self.cache_first(request.clone(), partition).await,
            Strategy::StaleWhileRevalidate => {
                self.stale_while_revalidate(request.clone(), lifetime).await
            }
        };

        match result {
            Ok(response) => response,
            Err(e) => {
                warn!(url = %request.url, ?strategy, error = %e, "Fetch failed, using fallback");
                self.fallback(&request).await
            }
        }
    }

    /// Network first; on failure the cached copy (the latest runtime copy
    /// before the install-time one), then the offline page for navigations.
    pub async fn network_first(&self, request: Request) -> Result<Response, ServiceWorkerError> {
        let failure = match self.network.fetch(request.clone()).await {
            Ok(response) if response.ok() => {
                self.store(Partition::Dynamic, &request, &response).await;
                return Ok(response);
            }
            Ok(response) => ServiceWorkerError::BadStatus {
                url: request.url.to_string(),
                status: response.status.as_u16(),
            },
            Err(e) => e.into(),
        };

        debug!(url = %request.url, error = %failure, "Network failed, trying cache");
        if let Some(cached) = self.registry.match_latest(&request).await {
            return Ok(cached);
        }

        if request.is_navigation() {
            if let Some(page) = self.registry.match_url(&self.offline_page).await {
                return Ok(page);
            }
        }

        Err(failure)
    }

    /// Cache first against one partition; a miss goes to the network and is
    /// stored if ok. Non-ok network responses are returned as they are.
    pub async fn cache_first(
        &self,
        request: Request,
        partition: Partition,
    ) -> Result<Response, ServiceWorkerError> {
        if let Some(cached) = self.registry.match_in(partition, &request).await {
            debug!(url = %request.url, %partition, "Serving from cache");
            return Ok(cached);
        }

        debug!(url = %request.url, "Fetching from network");
        let response = self.network.fetch(request.clone()).await?;
        if response.ok() {
            self.store(partition, &request, &response).await;
        }
        Ok(response)
    }

    /// Cached copy immediately if there is one; the network refresh runs on
    /// the event's lifetime either way. Without a cached copy the network
    /// result is returned, and a network error is left to the fallback.
    pub async fn stale_while_revalidate(
        &self,
        request: Request,
        lifetime: &EventLifetime,
    ) -> Result<Response, ServiceWorkerError> {
        match self.registry.match_latest(&request).await {
            Some(cached) => {
                let engine = self.clone();
                lifetime
                    .extend(async move {
                        if let Err(e) = engine.revalidate(request).await {
                            warn!(error = %e, "Network fetch failed");
                        }
                    })
                    .await;
                Ok(cached)
            }
            None => self.revalidate(request).await,
        }
    }

    async fn revalidate(&self, request: Request) -> Result<Response, ServiceWorkerError> {
        let response = self.network.fetch(request.clone()).await?;
        if response.ok() {
            self.store(Partition::Dynamic, &request, &response).await;
        }
        Ok(response)
    }

    /// Last resort: the cached root page for documents, the cached logo for
    /// images, otherwise a 503.
    pub async fn fallback(&self, request: &Request) -> Response {
        let asset = match request.destination {
            Destination::Document => Some(&self.offline_page),
            Destination::Image => Some(&self.fallback_image),
            _ => None,
        };

        if let Some(url) = asset {
            if let Some(cached) = self.registry.match_url(url).await {
                return cached;
            }
        }

        Response::synthetic(
            request.url.clone(),
            StatusCode::SERVICE_UNAVAILABLE,
            OFFLINE_BODY,
        )
    }

    async fn store(&self, partition: Partition, request: &Request, response: &Response) {
        if let Err(e) = self.registry.put(partition, request, response).await {
            warn!(url = %request.url, %partition, error = %e, "Cache put failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCacheBackend;
    use crate::partition::CacheVersion;
    use crate::testing::MockNetwork;
    use bytes::Bytes;

    const SITE: &str = "https://site.test";

    fn url(path: &str) -> Url {
        Url::parse(SITE).unwrap().join(path).unwrap()
    }

    fn markers() -> Vec<String> {
        vec!["/css/".to_string(), "/script/".to_string()]
    }

    struct Fixture {
        engine: StrategyEngine,
        network: Arc<MockNetwork>,
        backend: Arc<MemoryCacheBackend>,
    }

    fn fixture() -> Fixture {
        let backend = Arc::new(MemoryCacheBackend::new());
        let network = Arc::new(MockNetwork::new());
        let registry = Arc::new(PartitionRegistry::new(
            "humanator",
            CacheVersion::new("v1"),
            backend.clone(),
        ));
        let engine = StrategyEngine::new(
            registry,
            network.clone(),
            url("/index.html"),
            url("/images/logo/logo.png"),
        );
        Fixture {
            engine,
            network,
            backend,
        }
    }

    async fn seed(f: &Fixture, partition: Partition, path: &str, body: &'static str) {
        let request = Request::get(url(path));
        let response = Response::new(request.url.clone(), StatusCode::OK, body);
        f.engine
            .registry()
            .put(partition, &request, &response)
            .await
            .unwrap();
    }

    // ==================== classify ====================

    #[test]
    fn test_classify_table() {
        let m = markers();
        let cases = [
            (Request::navigate(url("/about.html")), Some(Strategy::NetworkFirst)),
            (
                Request::get(url("/images/a.png")).destination(Destination::Image),
                Some(Strategy::CacheFirst(Partition::Images)),
            ),
            (
                Request::get(url("/css/style.css")).destination(Destination::Style),
                Some(Strategy::CacheFirst(Partition::Static)),
            ),
            (
                Request::get(url("/script/main.js")),
                Some(Strategy::CacheFirst(Partition::Static)),
            ),
            (Request::get(url("/api/stats.json")), Some(Strategy::StaleWhileRevalidate)),
            (
                Request::get(Url::parse("https://fonts.test/inter.woff2").unwrap())
                    .destination(Destination::Font),
                Some(Strategy::StaleWhileRevalidate),
            ),
            (Request::post(url("/contact"), Bytes::new()), None),
            (
                Request::get(Url::parse("chrome-extension://id/script/x.js").unwrap()),
                None,
            ),
        ];

        for (request, expected) in cases {
            assert_eq!(classify(&request, &m), expected, "{}", request.url);
        }
    }

    #[test]
    fn test_destination_wins_over_path_marker() {
        let request = Request::get(url("/css/bg.png")).destination(Destination::Image);
        assert_eq!(
            classify(&request, &markers()),
            Some(Strategy::CacheFirst(Partition::Images))
        );
    }

    // ==================== network-first ====================

    #[tokio::test]
    async fn test_network_first_caches_then_serves_offline() {
        let f = fixture();
        f.network.respond("https://site.test/about.html", 200, "about v1");

        let online = f
            .engine
            .network_first(Request::navigate(url("/about.html")))
            .await
            .unwrap();
        assert_eq!(online.body(), "about v1");
        assert!(!online.from_cache());

        f.network.set_offline(true);
        let offline = f
            .engine
            .network_first(Request::navigate(url("/about.html")))
            .await
            .unwrap();
        assert_eq!(offline.body(), "about v1");
        assert!(offline.from_cache());
    }

    #[tokio::test]
    async fn test_network_first_bad_status_uses_cache() {
        let f = fixture();
        seed(&f, Partition::Static, "/services.html", "cached services").await;
        f.network.respond("https://site.test/services.html", 500, "boom");

        let response = f
            .engine
            .network_first(Request::navigate(url("/services.html")))
            .await
            .unwrap();
        assert_eq!(response.body(), "cached services");
    }

    #[tokio::test]
    async fn test_network_first_navigation_gets_offline_page() {
        let f = fixture();
        seed(&f, Partition::Static, "/index.html", "home").await;
        f.network.set_offline(true);

        let response = f
            .engine
            .network_first(Request::navigate(url("/never-cached.html")))
            .await
            .unwrap();
        assert_eq!(response.body(), "home");

        // Not a navigation: the failure propagates.
        let result = f
            .engine
            .network_first(
                Request::get(url("/never-cached.html")).destination(Destination::Document),
            )
            .await;
        assert!(matches!(result, Err(ServiceWorkerError::Network(_))));
    }

    #[tokio::test]
    async fn test_network_first_offline_returns_last_online_body() {
        let f = fixture();
        seed(&f, Partition::Static, "/index.html", "home v1").await;
        f.network.respond("https://site.test/index.html", 200, "home v2");

        let online = f
            .engine
            .network_first(Request::navigate(url("/index.html")))
            .await
            .unwrap();
        assert_eq!(online.body(), "home v2");

        f.network.set_offline(true);
        let offline = f
            .engine
            .network_first(Request::navigate(url("/index.html")))
            .await
            .unwrap();
        assert!(offline.from_cache());
        assert_eq!(offline.body(), "home v2");
    }

    // ==================== cache-first ====================

    #[tokio::test]
    async fn test_cache_first_cold_then_warm() {
        let f = fixture();
        let logo = "https://site.test/images/logo/logo.png";
        f.network.respond(logo, 200, "png");
        let request = || Request::get(url("/images/logo/logo.png")).destination(Destination::Image);

        let cold = f.engine.cache_first(request(), Partition::Images).await.unwrap();
        assert_eq!(cold.body(), "png");
        assert_eq!(f.network.calls(logo), 1);
        assert_eq!(f.backend.write_count(), 1);

        let warm = f.engine.cache_first(request(), Partition::Images).await.unwrap();
        assert!(warm.from_cache());
        assert_eq!(f.network.calls(logo), 1);
        assert_eq!(f.backend.write_count(), 1);
    }

    #[tokio::test]
    async fn test_cache_first_only_checks_its_partition() {
        let f = fixture();
        seed(&f, Partition::Dynamic, "/css/style.css", "dynamic copy").await;
        f.network.respond("https://site.test/css/style.css", 200, "fresh");

        let response = f
            .engine
            .cache_first(Request::get(url("/css/style.css")), Partition::Static)
            .await
            .unwrap();
        assert_eq!(response.body(), "fresh");
    }

    #[tokio::test]
    async fn test_cache_first_returns_failed_response_uncached() {
        let f = fixture();
        f.network.respond("https://site.test/css/missing.css", 404, "nope");

        let response = f
            .engine
            .cache_first(Request::get(url("/css/missing.css")), Partition::Static)
            .await
            .unwrap();
        assert_eq!(response.status, StatusCode::NOT_FOUND);
        assert_eq!(f.backend.write_count(), 0);
    }

    // ==================== stale-while-revalidate ====================

    #[tokio::test]
    async fn test_swr_serves_stale_then_fresh() {
        let f = fixture();
        seed(&f, Partition::Dynamic, "/api/stats.json", "old").await;
        f.network.respond("https://site.test/api/stats.json", 200, "new");

        let lifetime = EventLifetime::new();
        let first = f
            .engine
            .stale_while_revalidate(Request::get(url("/api/stats.json")), &lifetime)
            .await
            .unwrap();
        assert_eq!(first.body(), "old");

        lifetime.settled().await;

        let second = f
            .engine
            .stale_while_revalidate(Request::get(url("/api/stats.json")), &EventLifetime::new())
            .await
            .unwrap();
        assert_eq!(second.body(), "new");
    }

    #[tokio::test]
    async fn test_swr_refreshes_install_time_copy() {
        let f = fixture();
        seed(&f, Partition::Static, "/manifest.json", "manifest v1").await;
        f.network.respond("https://site.test/manifest.json", 200, "manifest v2");

        let lifetime = EventLifetime::new();
        let first = f
            .engine
            .stale_while_revalidate(Request::get(url("/manifest.json")), &lifetime)
            .await
            .unwrap();
        assert_eq!(first.body(), "manifest v1");
        lifetime.settled().await;

        let second = f
            .engine
            .stale_while_revalidate(Request::get(url("/manifest.json")), &EventLifetime::new())
            .await
            .unwrap();
        assert_eq!(second.body(), "manifest v2");
        assert!(second.from_cache());
    }

    #[tokio::test]
    async fn test_swr_without_cache_waits_for_network() {
        let f = fixture();
        f.network.respond("https://site.test/data.json", 200, "fresh");

        let lifetime = EventLifetime::new();
        let response = f
            .engine
            .stale_while_revalidate(Request::get(url("/data.json")), &lifetime)
            .await
            .unwrap();
        assert_eq!(response.body(), "fresh");
        assert_eq!(lifetime.pending().await, 0);
        let stored = f
            .engine
            .registry()
            .match_in(Partition::Dynamic, &Request::get(url("/data.json")))
            .await;
        assert!(stored.is_some());
    }

    #[tokio::test]
    async fn test_swr_keeps_stale_copy_when_refresh_fails() {
        let f = fixture();
        seed(&f, Partition::Dynamic, "/data.json", "stale").await;
        f.network.set_offline(true);

        let lifetime = EventLifetime::new();
        let response = f
            .engine
            .stale_while_revalidate(Request::get(url("/data.json")), &lifetime)
            .await
            .unwrap();
        lifetime.settled().await;

        assert_eq!(response.body(), "stale");
        let again = f
            .engine
            .registry()
            .match_latest(&Request::get(url("/data.json")))
            .await
            .unwrap();
        assert_eq!(again.body(), "stale");
    }

    #[tokio::test]
    async fn test_swr_no_cache_and_no_network_routes_to_fallback() {
        let f = fixture();
        f.network.set_offline(true);

        let response = f
            .engine
            .respond(
                Strategy::StaleWhileRevalidate,
                Request::get(url("/data.json")),
                &EventLifetime::new(),
            )
            .await;
        assert_eq!(response.status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.body(), OFFLINE_BODY);
    }

    // ==================== fallback ====================

    #[tokio::test]
    async fn test_fallback_by_destination() {
        let f = fixture();
        let doc = Request::navigate(url("/contact.html"));
        let img = Request::get(url("/images/hero.jpg")).destination(Destination::Image);
        let other = Request::get(url("/api/x"));

        assert_eq!(f.engine.fallback(&doc).await.status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(f.engine.fallback(&img).await.status, StatusCode::SERVICE_UNAVAILABLE);

        seed(&f, Partition::Static, "/index.html", "home").await;
        seed(&f, Partition::Images, "/images/logo/logo.png", "logo").await;

        assert_eq!(f.engine.fallback(&doc).await.body(), "home");
        assert_eq!(f.engine.fallback(&img).await.body(), "logo");
        assert_eq!(f.engine.fallback(&other).await.status, StatusCode::SERVICE_UNAVAILABLE);
    }
}
