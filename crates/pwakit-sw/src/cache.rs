//! Cache storage: named caches of request -> response snapshots.
//!
//! The worker only talks to storage through [`CacheBackend`], so the host can
//! plug in whatever persistent store it has. [`MemoryCacheBackend`] keeps
//! everything in process and is what the tests and the harness use.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use futures::future::BoxFuture;
use hashbrown::HashMap;
use http::{HeaderMap, Method, StatusCode};
use pwakit_net::{Request, Response, ResponseSource};
use tokio::sync::RwLock;
use tracing::trace;
use url::Url;

use crate::ServiceWorkerError;

// ==================== Keys & Entries ====================

/// Normalized cache key: method plus URL without its fragment.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey {
    pub method: Method,
    pub url: String,
}

impl RequestKey {
    /// Key for a GET of `url`.
    pub fn get(url: &Url) -> Self {
        let mut url = url.clone();
        url.set_fragment(None);
        Self {
            method: Method::GET,
            url: url.into(),
        }
    }

    /// Key for an arbitrary request.
    pub fn from_request(request: &Request) -> Self {
        Self {
            method: request.method.clone(),
            ..Self::get(&request.url)
        }
    }
}

/// A cached response snapshot.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Final response URL.
    pub url: Url,

    /// Response status.
    pub status: StatusCode,

    /// Response headers.
    pub headers: HeaderMap,

    /// Response body.
    pub body: Bytes,

    /// Cached at timestamp (ms since epoch).
    pub cached_at: u64,
}

impl CacheEntry {
    /// Snapshot a response.
    pub fn from_response(response: &Response) -> Self {
        Self {
            url: response.url.clone(),
            status: response.status,
            headers: response.headers.clone(),
            body: response.body().clone(),
            cached_at: now_millis(),
        }
    }

    /// Rebuild a response marked as served from cache.
    pub fn to_response(&self) -> Response {
        let mut response = Response::new(self.url.clone(), self.status, self.body.clone())
            .with_source(ResponseSource::Cache);
        response.headers = self.headers.clone();
        response
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

// ==================== Backend ====================

/// Persistent storage of named caches.
///
/// `match_any` must search caches in creation order, the way the host's
/// `caches.match()` does.
pub trait CacheBackend: Send + Sync {
    /// Create the cache if it does not exist.
    fn open<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<(), ServiceWorkerError>>;

    /// Whether a cache with this name exists.
    fn has<'a>(&'a self, name: &'a str) -> BoxFuture<'a, bool>;

    /// All cache names, in creation order.
    fn keys(&self) -> BoxFuture<'_, Vec<String>>;

    /// Delete a whole cache. Returns whether it existed.
    fn delete<'a>(&'a self, name: &'a str) -> BoxFuture<'a, bool>;

    /// Look up a key in one cache.
    fn match_in<'a>(
        &'a self,
        name: &'a str,
        key: &'a RequestKey,
    ) -> BoxFuture<'a, Option<CacheEntry>>;

    /// Look up a key across all caches.
    fn match_any<'a>(&'a self, key: &'a RequestKey) -> BoxFuture<'a, Option<CacheEntry>>;

    /// Store an entry, replacing any previous one for the key.
    fn put<'a>(
        &'a self,
        name: &'a str,
        key: RequestKey,
        entry: CacheEntry,
    ) -> BoxFuture<'a, Result<(), ServiceWorkerError>>;

    /// Keys stored in one cache.
    fn entry_keys<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Vec<RequestKey>>;
}

// ==================== In-memory storage ====================

/// A single named cache.
#[derive(Debug, Default)]
pub struct Cache {
    /// Cache name.
    pub name: String,

    entries: HashMap<RequestKey, CacheEntry>,
}

impl Cache {
    /// Create a new cache.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            entries: HashMap::new(),
        }
    }

    /// Match a request key.
    pub fn match_request(&self, key: &RequestKey) -> Option<&CacheEntry> {
        self.entries.get(key)
    }

    /// Add or replace an entry.
    pub fn put(&mut self, key: RequestKey, entry: CacheEntry) {
        self.entries.insert(key, entry);
    }

    /// Delete an entry.
    pub fn delete(&mut self, key: &RequestKey) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Get all keys.
    pub fn keys(&self) -> Vec<&RequestKey> {
        self.entries.keys().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// The set of caches (`caches` global).
#[derive(Debug, Default)]
pub struct CacheStorage {
    caches: HashMap<String, Cache>,
    order: Vec<String>,
}

impl CacheStorage {
    /// Create new cache storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a cache (creates if doesn't exist).
    pub fn open(&mut self, name: &str) -> &mut Cache {
        if !self.caches.contains_key(name) {
            self.order.push(name.to_string());
        }
        self.caches
            .entry(name.to_string())
            .or_insert_with(|| Cache::new(name))
    }

    /// Get an existing cache.
    pub fn get(&self, name: &str) -> Option<&Cache> {
        self.caches.get(name)
    }

    /// Check if cache exists.
    pub fn has(&self, name: &str) -> bool {
        self.caches.contains_key(name)
    }

    /// Delete a cache.
    pub fn delete(&mut self, name: &str) -> bool {
        self.order.retain(|n| n != name);
        self.caches.remove(name).is_some()
    }

    /// Get all cache names in creation order.
    pub fn keys(&self) -> Vec<&str> {
        self.order.iter().map(|s| s.as_str()).collect()
    }

    /// Match across all caches, oldest cache first.
    pub fn match_request(&self, key: &RequestKey) -> Option<&CacheEntry> {
        self.order
            .iter()
            .filter_map(|name| self.caches.get(name))
            .find_map(|cache| cache.match_request(key))
    }
}

/// [`CacheBackend`] over an in-process [`CacheStorage`].
#[derive(Debug, Default)]
pub struct MemoryCacheBackend {
    storage: RwLock<CacheStorage>,
    writes: AtomicU64,
}

impl MemoryCacheBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `put` calls served so far.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }
}

impl CacheBackend for MemoryCacheBackend {
    fn open<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<(), ServiceWorkerError>> {
        Box::pin(async move {
            self.storage.write().await.open(name);
            Ok(())
        })
    }

    fn has<'a>(&'a self, name: &'a str) -> BoxFuture<'a, bool> {
        Box::pin(async move { self.storage.read().await.has(name) })
    }

    fn keys(&self) -> BoxFuture<'_, Vec<String>> {
        Box::pin(async move {
            self.storage
                .read()
                .await
                .keys()
                .into_iter()
                .map(String::from)
                .collect()
        })
    }

    fn delete<'a>(&'a self, name: &'a str) -> BoxFuture<'a, bool> {
        Box::pin(async move { self.storage.write().await.delete(name) })
    }

    fn match_in<'a>(
        &'a self,
        name: &'a str,
        key: &'a RequestKey,
    ) -> BoxFuture<'a, Option<CacheEntry>> {
        Box::pin(async move {
            self.storage
                .read()
                .await
                .get(name)
                .and_then(|cache| cache.match_request(key))
                .cloned()
        })
    }

    fn match_any<'a>(&'a self, key: &'a RequestKey) -> BoxFuture<'a, Option<CacheEntry>> {
        Box::pin(async move { self.storage.read().await.match_request(key).cloned() })
    }

    fn put<'a>(
        &'a self,
        name: &'a str,
        key: RequestKey,
        entry: CacheEntry,
    ) -> BoxFuture<'a, Result<(), ServiceWorkerError>> {
        Box::pin(async move {
            trace!(cache = name, url = %key.url, "Cache put");
            self.storage.write().await.open(name).put(key, entry);
            self.writes.fetch_add(1, Ordering::Relaxed);
            Ok(())
        })
    }

    fn entry_keys<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Vec<RequestKey>> {
        Box::pin(async move {
            self.storage
                .read()
                .await
                .get(name)
                .map(|cache| cache.keys().into_iter().cloned().collect())
                .unwrap_or_default()
        })
    }
}
