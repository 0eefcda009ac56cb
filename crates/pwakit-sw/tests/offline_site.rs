//! End-to-end behavior of the worker over a scripted network.

use std::sync::Arc;

use http::StatusCode;
use pwakit_net::{Destination, Request, ResponseSource};
use pwakit_sw::strategy::OFFLINE_BODY;
use pwakit_sw::testing::MockNetwork;
use pwakit_sw::{
    AssetManifest, CacheBackend, Client, ClientType, HostEvent, MemoryCacheBackend, MessageKind,
    Partition, ServiceWorker, ServiceWorkerError, ServiceWorkerRegistration, ServiceWorkerState,
    SwConfig, WorkerHost,
};
use tokio::sync::mpsc;
use url::Url;

const SITE: &str = "https://humanator.test/";

fn url(path: &str) -> Url {
    Url::parse(SITE).unwrap().join(path).unwrap()
}

fn manifest() -> AssetManifest {
    AssetManifest::new(
        [
            "/",
            "/index.html",
            "/css/style.css",
            "/script/main.js",
            "/manifest.json",
        ],
        ["/images/logo/logo.png", "/images/hero.webp"],
        [
            "https://cdn.test/font-awesome/all.min.css",
            "https://fonts.test/css2?family=Inter",
        ],
    )
}

fn config(version: &str) -> SwConfig {
    SwConfig::default()
        .with_origin(Url::parse(SITE).unwrap())
        .with_version(version)
        .with_manifest(manifest())
}

struct Site {
    host: WorkerHost,
    network: Arc<MockNetwork>,
    backend: Arc<MemoryCacheBackend>,
    events: mpsc::UnboundedReceiver<HostEvent>,
}

impl Site {
    fn new() -> Self {
        let network = Arc::new(MockNetwork::new());
        for (path, body) in [
            ("/", "home"),
            ("/index.html", "home"),
            ("/css/style.css", "body{}"),
            ("/script/main.js", "main()"),
            ("/images/logo/logo.png", "logo"),
            ("/images/hero.webp", "hero"),
            ("/about.html", "about"),
            ("/manifest.json", "manifest v1"),
        ] {
            network.respond(url(path).as_str(), 200, body);
        }
        network.respond("https://cdn.test/font-awesome/all.min.css", 200, ".fa{}");
        network.respond("https://fonts.test/css2?family=Inter", 200, "@font-face{}");

        let backend = Arc::new(MemoryCacheBackend::new());
        let (host, events) = WorkerHost::new(backend.clone(), network.clone());
        Self {
            host,
            network,
            backend,
            events,
        }
    }

    async fn active_worker(&self, version: &str) -> ServiceWorker {
        let worker = ServiceWorker::new(config(version), &self.host).unwrap();
        worker.install().await.unwrap();
        worker.activate().await.unwrap();
        worker
    }
}

#[tokio::test]
async fn upgrade_replaces_caches_and_notifies_once() {
    let site = Site::new();
    let (page, mut messages) = Client::connect(url("/"), ClientType::Window);
    site.host.clients.write().await.add(page);

    let registration = ServiceWorkerRegistration::new(url("/"));
    registration
        .update(ServiceWorker::new(config("v1"), &site.host).unwrap())
        .await
        .unwrap();
    assert_eq!(messages.try_recv().unwrap().kind, MessageKind::SwUpdated);
    assert!(messages.try_recv().is_err());

    let mut names = site.host.backend.keys().await;
    names.sort();
    assert_eq!(
        names,
        vec![
            "humanator-dynamic-v1",
            "humanator-images-v1",
            "humanator-static-v1"
        ]
    );

    registration
        .update(ServiceWorker::new(config("v2"), &site.host).unwrap())
        .await
        .unwrap();

    assert_eq!(messages.try_recv().unwrap().kind, MessageKind::UpdateAvailable);
    let updated = messages.try_recv().unwrap();
    assert_eq!(updated.kind, MessageKind::SwUpdated);
    assert_eq!(updated.message, "Service Worker updated successfully");
    assert!(messages.try_recv().is_err());

    let mut names = site.host.backend.keys().await;
    names.sort();
    assert_eq!(
        names,
        vec![
            "humanator-dynamic-v2",
            "humanator-images-v2",
            "humanator-static-v2"
        ]
    );

    let active = registration.active().unwrap();
    assert_eq!(active.state(), ServiceWorkerState::Activated);
    let client = site.host.clients.read().await;
    assert_eq!(client.len(), 1);
}

#[tokio::test]
async fn activation_is_idempotent() {
    let site = Site::new();
    let worker = site.active_worker("v1").await;
    let mut before = site.backend.keys().await;
    before.sort();

    worker.activate().await.unwrap();

    let mut after = site.backend.keys().await;
    after.sort();
    assert_eq!(before, after);
    assert_eq!(worker.state(), ServiceWorkerState::Activated);
}

#[tokio::test]
async fn state_changes_reach_the_host() {
    let mut site = Site::new();
    let worker = site.active_worker("v1").await;

    let mut states = Vec::new();
    while let Ok(event) = site.events.try_recv() {
        if let HostEvent::StateChange { worker_id, state } = event {
            assert_eq!(worker_id, worker.id());
            states.push(state);
        }
    }
    assert_eq!(
        states,
        vec![
            ServiceWorkerState::Installing,
            ServiceWorkerState::Installed,
            ServiceWorkerState::Activating,
            ServiceWorkerState::Activated,
        ]
    );
}

#[tokio::test]
async fn visited_document_is_served_offline() {
    let site = Site::new();
    let worker = site.active_worker("v1").await;

    let online = worker
        .handle_fetch(Request::navigate(url("/about.html")))
        .settle()
        .await
        .unwrap();
    assert_eq!(online.source, ResponseSource::Network);

    site.network.set_offline(true);
    let offline = worker
        .handle_fetch(Request::navigate(url("/about.html")))
        .settle()
        .await
        .unwrap();
    assert_eq!(offline.source, ResponseSource::Cache);
    assert_eq!(offline.text().unwrap(), "about");
}

#[tokio::test]
async fn precached_page_offline_matches_last_online_body() {
    let site = Site::new();
    let worker = site.active_worker("v1").await;
    site.network.respond(url("/index.html").as_str(), 200, "home v2");

    let online = worker
        .handle_fetch(Request::navigate(url("/index.html")))
        .settle()
        .await
        .unwrap();
    assert_eq!(online.text().unwrap(), "home v2");

    site.network.set_offline(true);
    let offline = worker
        .handle_fetch(Request::navigate(url("/index.html")))
        .settle()
        .await
        .unwrap();
    assert_eq!(offline.source, ResponseSource::Cache);
    assert_eq!(offline.text().unwrap(), "home v2");

    // The root-page fallback sees the refreshed copy too.
    let unvisited = worker
        .handle_fetch(Request::navigate(url("/services.html")))
        .settle()
        .await
        .unwrap();
    assert_eq!(unvisited.text().unwrap(), "home v2");
}

#[tokio::test]
async fn unvisited_document_offline_gets_the_home_page() {
    let site = Site::new();
    let worker = site.active_worker("v1").await;
    site.network.set_offline(true);

    let response = worker
        .handle_fetch(Request::navigate(url("/services.html")))
        .settle()
        .await
        .unwrap();

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.text().unwrap(), "home");
}

#[tokio::test]
async fn images_hit_the_network_once() {
    let site = Site::new();
    site.network.respond(url("/images/team.jpg").as_str(), 200, "team");
    let worker = site.active_worker("v1").await;
    let writes = site.backend.write_count();

    for _ in 0..2 {
        let request = Request::get(url("/images/team.jpg")).destination(Destination::Image);
        let response = worker.handle_fetch(request).settle().await.unwrap();
        assert_eq!(response.text().unwrap(), "team");
    }

    assert_eq!(site.network.calls(url("/images/team.jpg").as_str()), 1);
    assert_eq!(site.backend.write_count(), writes + 1);
}

#[tokio::test]
async fn missing_image_offline_gets_the_logo() {
    let site = Site::new();
    let worker = site.active_worker("v1").await;
    site.network.set_offline(true);

    let request = Request::get(url("/images/unknown.png")).destination(Destination::Image);
    let response = worker.handle_fetch(request).settle().await.unwrap();

    assert_eq!(response.text().unwrap(), "logo");
}

#[tokio::test]
async fn other_resources_offline_get_503() {
    let site = Site::new();
    let worker = site.active_worker("v1").await;
    site.network.set_offline(true);

    let response = worker
        .handle_fetch(Request::get(url("/data/feed.json")))
        .settle()
        .await
        .unwrap();

    assert_eq!(response.status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(response.source, ResponseSource::Synthetic);
    assert_eq!(response.text().unwrap(), OFFLINE_BODY);
}

#[tokio::test]
async fn stale_resource_is_refreshed_in_background() {
    let site = Site::new();
    site.network.respond(url("/data/feed.json").as_str(), 200, "old");
    let worker = site.active_worker("v1").await;

    let first = worker
        .handle_fetch(Request::get(url("/data/feed.json")))
        .settle()
        .await
        .unwrap();
    assert_eq!(first.text().unwrap(), "old");

    site.network.respond(url("/data/feed.json").as_str(), 200, "new");
    let second = worker
        .handle_fetch(Request::get(url("/data/feed.json")))
        .settle()
        .await
        .unwrap();
    assert_eq!(second.text().unwrap(), "old");
    assert!(second.from_cache());

    let third = worker
        .handle_fetch(Request::get(url("/data/feed.json")))
        .settle()
        .await
        .unwrap();
    assert_eq!(third.text().unwrap(), "new");
}

#[tokio::test]
async fn precached_manifest_is_refreshed_in_background() {
    let site = Site::new();
    let worker = site.active_worker("v1").await;
    site.network.respond(url("/manifest.json").as_str(), 200, "manifest v2");

    let first = worker
        .handle_fetch(Request::get(url("/manifest.json")))
        .settle()
        .await
        .unwrap();
    assert_eq!(first.text().unwrap(), "manifest v1");

    let second = worker
        .handle_fetch(Request::get(url("/manifest.json")))
        .settle()
        .await
        .unwrap();
    assert!(second.from_cache());
    assert_eq!(second.text().unwrap(), "manifest v2");
}

#[tokio::test]
async fn external_asset_failure_does_not_fail_install() {
    let site = Site::new();
    site.network.unreachable("https://fonts.test/css2?family=Inter");
    let worker = ServiceWorker::new(config("v1"), &site.host).unwrap();

    worker.install().await.unwrap();

    let cdn = Request::get(Url::parse("https://cdn.test/font-awesome/all.min.css").unwrap());
    assert!(worker
        .registry()
        .match_in(Partition::Dynamic, &cdn)
        .await
        .is_some());
}

#[tokio::test]
async fn failed_static_batch_stores_nothing() {
    let site = Site::new();
    site.network.unreachable(url("/script/main.js").as_str());
    let worker = ServiceWorker::new(config("v1"), &site.host).unwrap();

    let result = worker.install().await;

    assert!(matches!(result, Err(ServiceWorkerError::InstallFailed(_))));
    assert_eq!(worker.state(), ServiceWorkerState::Redundant);
    let statics = worker.registry().open(Partition::Static).await.unwrap();
    assert_eq!(statics.len().await, 0);
}

#[tokio::test]
async fn static_assets_served_from_cache_after_install() {
    let site = Site::new();
    let worker = site.active_worker("v1").await;
    let before = site.network.calls(url("/css/style.css").as_str());

    let response = worker
        .handle_fetch(Request::get(url("/css/style.css")))
        .settle()
        .await
        .unwrap();

    assert!(response.from_cache());
    assert_eq!(site.network.calls(url("/css/style.css").as_str()), before);
}

#[tokio::test]
async fn push_then_click_opens_the_site() {
    let mut site = Site::new();
    let worker = site.active_worker("v1").await;
    while site.events.try_recv().is_ok() {}

    assert!(
        worker
            .handle_push(Some(br#"{"title":"New article","body":"Read it now"}"#))
            .await
    );
    let shown = site.events.try_recv().unwrap();
    assert!(matches!(
        shown,
        HostEvent::ShowNotification { ref title, .. } if title == "New article"
    ));

    let (page, _messages) = Client::connect(url("/"), ClientType::Window);
    let page_id = page.id.clone();
    site.host.clients.write().await.add(page);

    let outcome = worker.handle_notification_click(None).await.unwrap();
    assert_eq!(outcome.client_id(), page_id);
    assert!(site.host.clients.read().await.get(&page_id).unwrap().focused);
    assert_eq!(
        site.events.try_recv().unwrap(),
        HostEvent::CloseNotification { tag: None }
    );
}
