//! Worker configuration

use std::path::Path;

use pwakit_common::RetryConfig;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::manifest::AssetManifest;
use crate::partition::CacheVersion;
use crate::ServiceWorkerError;

/// Service worker configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SwConfig {
    /// Prefix of every cache name
    pub cache_prefix: String,

    /// Cache version; bump to evict the previous version's caches
    pub version: CacheVersion,

    /// Site origin that relative manifest entries resolve against.
    /// Required before a worker can be built.
    pub origin: Option<Url>,

    /// Assets primed at install
    pub manifest: AssetManifest,

    /// Root document served to offline navigations
    pub offline_page: String,

    /// Image served when an image cannot be fetched
    pub fallback_image: String,

    /// Path fragments that mark stylesheets and scripts
    pub static_path_markers: Vec<String>,

    /// Background sync tag that triggers a replay
    pub sync_tag: String,

    /// Replay policy for queued submissions
    pub sync_retry: RetryConfig,

    /// Text sent with the update message after activation
    pub update_message: String,

    /// Push notification presentation
    pub notification: NotificationConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    pub icon: String,
    pub badge: String,
    /// Vibration pattern in milliseconds
    pub vibrate: Vec<u32>,
}

impl Default for SwConfig {
    fn default() -> Self {
        Self {
            cache_prefix: "humanator".to_string(),
            version: CacheVersion::new("v1.2.0"),
            origin: None,
            manifest: AssetManifest::default(),
            offline_page: "/index.html".to_string(),
            fallback_image: "/images/logo/logo.png".to_string(),
            static_path_markers: vec!["/css/".to_string(), "/script/".to_string()],
            sync_tag: "background-sync".to_string(),
            sync_retry: RetryConfig::default(),
            update_message: "Service Worker updated successfully".to_string(),
            notification: NotificationConfig::default(),
        }
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            icon: "/images/logo/logo.png".to_string(),
            badge: "/images/logo/logo.png".to_string(),
            vibrate: vec![100, 50, 100],
        }
    }
}

impl SwConfig {
    /// Parse a JSON config. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, ServiceWorkerError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| ServiceWorkerError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ServiceWorkerError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            ServiceWorkerError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_json(&json)
    }

    /// Same config with another version.
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = CacheVersion::new(version);
        self
    }

    /// Same config with another origin.
    pub fn with_origin(mut self, origin: Url) -> Self {
        self.origin = Some(origin);
        self
    }

    /// Same config with another manifest.
    pub fn with_manifest(mut self, manifest: AssetManifest) -> Self {
        self.manifest = manifest;
        self
    }

    /// Check the fields the worker cannot run without.
    pub fn validate(&self) -> Result<(), ServiceWorkerError> {
        if self.cache_prefix.is_empty() {
            return Err(ServiceWorkerError::Config("cache_prefix is empty".into()));
        }
        if self.version.as_str().is_empty() {
            return Err(ServiceWorkerError::Config("version is empty".into()));
        }
        self.sync_retry
            .validate()
            .map_err(|e| ServiceWorkerError::Config(format!("sync_retry: {e}")))?;

        if let Some(origin) = &self.origin {
            if !matches!(origin.scheme(), "http" | "https") {
                return Err(ServiceWorkerError::Config(format!(
                    "origin must be http(s): {origin}"
                )));
            }
            self.resolve(&self.offline_page)?;
            self.resolve(&self.fallback_image)?;
        }
        Ok(())
    }

    /// The site origin, or a config error if none was given.
    pub fn origin(&self) -> Result<&Url, ServiceWorkerError> {
        self.origin
            .as_ref()
            .ok_or_else(|| ServiceWorkerError::Config("origin is not set".into()))
    }

    /// Resolve a site path against the origin.
    pub fn resolve(&self, path: &str) -> Result<Url, ServiceWorkerError> {
        Ok(self.origin()?.join(path)?)
    }
}
