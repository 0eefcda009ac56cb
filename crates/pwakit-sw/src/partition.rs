//! Named, versioned cache partitions.
//!
//! A partition is one of three logical buckets. The storage name
//! `<prefix>-<partition>-<version>` is only ever built in
//! [`PartitionRegistry::cache_name`].

use std::fmt;
use std::sync::Arc;

use futures::future::join_all;
use pwakit_net::{Network, Request, Response};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

use crate::cache::{CacheBackend, CacheEntry, RequestKey};
use crate::ServiceWorkerError;

/// Logical cache partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Partition {
    /// Pages, stylesheets, scripts, web manifest.
    Static,
    /// Runtime responses and external CDN assets.
    Dynamic,
    /// Images.
    Images,
}

impl Partition {
    /// All partitions, in the order they are opened at install.
    pub const ALL: [Partition; 3] = [Partition::Static, Partition::Dynamic, Partition::Images];

    pub fn label(&self) -> &'static str {
        match self {
            Partition::Static => "static",
            Partition::Dynamic => "dynamic",
            Partition::Images => "images",
        }
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Cache version string, bumped whenever clients must get fresh content.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheVersion(String);

impl CacheVersion {
    pub fn new(version: impl Into<String>) -> Self {
        Self(version.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Maps partitions of one worker version onto the cache backend.
pub struct PartitionRegistry {
    prefix: String,
    version: CacheVersion,
    backend: Arc<dyn CacheBackend>,
}

impl fmt::Debug for PartitionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PartitionRegistry")
            .field("prefix", &self.prefix)
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

impl PartitionRegistry {
    pub fn new(
        prefix: impl Into<String>,
        version: CacheVersion,
        backend: Arc<dyn CacheBackend>,
    ) -> Self {
        Self {
            prefix: prefix.into(),
            version,
            backend,
        }
    }

    pub fn version(&self) -> &CacheVersion {
        &self.version
    }

    /// Storage name of a partition for the current version.
    pub fn cache_name(&self, partition: Partition) -> String {
        format!("{}-{}-{}", self.prefix, partition.label(), self.version)
    }

    /// Storage names of the current partition triple.
    pub fn current_names(&self) -> Vec<String> {
        Partition::ALL.iter().map(|p| self.cache_name(*p)).collect()
    }

    /// Whether a storage name belongs to the current triple.
    pub fn is_current(&self, cache_name: &str) -> bool {
        Partition::ALL
            .iter()
            .any(|p| self.cache_name(*p) == cache_name)
    }

    /// Every cache name present in storage, current or not.
    pub async fn cache_names(&self) -> Vec<String> {
        self.backend.keys().await
    }

    /// Open (creating if needed) the store for a partition.
    pub async fn open(&self, partition: Partition) -> Result<PartitionHandle, ServiceWorkerError> {
        let name = self.cache_name(partition);
        self.backend.open(&name).await?;
        Ok(PartitionHandle {
            partition,
            name,
            backend: Arc::clone(&self.backend),
        })
    }

    /// Look up a request in one partition only.
    pub async fn match_in(&self, partition: Partition, request: &Request) -> Option<Response> {
        let name = self.cache_name(partition);
        let key = RequestKey::from_request(request);
        self.backend
            .match_in(&name, &key)
            .await
            .map(|entry| entry.to_response())
    }

    /// Look up a request across every cache in storage.
    pub async fn match_any(&self, request: &Request) -> Option<Response> {
        let key = RequestKey::from_request(request);
        self.backend
            .match_any(&key)
            .await
            .map(|entry| entry.to_response())
    }

    /// Look up a request, preferring the runtime copy in the dynamic
    /// partition over an older one stored at install.
    pub async fn match_latest(&self, request: &Request) -> Option<Response> {
        self.match_key_latest(&RequestKey::from_request(request)).await
    }

    /// Look up a GET of `url` the same way as [`match_latest`].
    ///
    /// [`match_latest`]: Self::match_latest
    pub async fn match_url(&self, url: &Url) -> Option<Response> {
        self.match_key_latest(&RequestKey::get(url)).await
    }

    async fn match_key_latest(&self, key: &RequestKey) -> Option<Response> {
        let dynamic = self.cache_name(Partition::Dynamic);
        let entry = match self.backend.match_in(&dynamic, key).await {
            Some(entry) => Some(entry),
            None => self.backend.match_any(key).await,
        };
        entry.map(|entry| entry.to_response())
    }

    /// Store a response snapshot in a partition.
    pub async fn put(
        &self,
        partition: Partition,
        request: &Request,
        response: &Response,
    ) -> Result<(), ServiceWorkerError> {
        self.backend
            .put(
                &self.cache_name(partition),
                RequestKey::from_request(request),
                CacheEntry::from_response(response),
            )
            .await
    }

    /// Delete a partition of the current version.
    pub async fn delete(&self, partition: Partition) -> bool {
        self.backend.delete(&self.cache_name(partition)).await
    }

    /// Delete any cache by storage name.
    pub async fn delete_name(&self, cache_name: &str) -> bool {
        self.backend.delete(cache_name).await
    }
}

/// An opened partition store.
pub struct PartitionHandle {
    partition: Partition,
    name: String,
    backend: Arc<dyn CacheBackend>,
}

impl PartitionHandle {
    pub fn partition(&self) -> Partition {
        self.partition
    }

    /// Storage name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of stored entries.
    pub async fn len(&self) -> usize {
        self.backend.entry_keys(&self.name).await.len()
    }

    /// Fetch one request and store it. Non-2xx responses are an error.
    pub async fn add(
        &self,
        network: &dyn Network,
        request: Request,
    ) -> Result<(), ServiceWorkerError> {
        let response = fetch_ok(network, request.clone()).await?;
        self.store(&request, &response).await
    }

    /// Fetch every request, then store them all. If any fetch fails nothing
    /// is stored.
    pub async fn add_all(
        &self,
        network: &dyn Network,
        requests: Vec<Request>,
    ) -> Result<usize, ServiceWorkerError> {
        let fetches = requests.iter().map(|r| fetch_ok(network, r.clone()));
        let responses = join_all(fetches)
            .await
            .into_iter()
            .collect::<Result<Vec<_>, _>>()?;

        for (request, response) in requests.iter().zip(&responses) {
            self.store(request, response).await?;
        }

        debug!(cache = %self.name, count = responses.len(), "Cached batch");
        Ok(responses.len())
    }

    async fn store(
        &self,
        request: &Request,
        response: &Response,
    ) -> Result<(), ServiceWorkerError> {
        self.backend
            .put(
                &self.name,
                RequestKey::from_request(request),
                CacheEntry::from_response(response),
            )
            .await
    }
}

async fn fetch_ok(network: &dyn Network, request: Request) -> Result<Response, ServiceWorkerError> {
    let url = request.url.clone();
    let response = network.fetch(request).await.map_err(|e| {
        warn!(url = %url, error = %e, "Fetch failed while caching");
        ServiceWorkerError::from(e)
    })?;

    if !response.ok() {
        warn!(
            url = %url,
            status = response.status.as_u16(),
            reason = response.status_text(),
            "Bad status while caching"
        );
        return Err(ServiceWorkerError::BadStatus {
            url: url.to_string(),
            status: response.status.as_u16(),
        });
    }
    Ok(response)
}
