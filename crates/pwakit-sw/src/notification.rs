//! Push payloads and the notifications they turn into.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::config::NotificationConfig;
use crate::ServiceWorkerError;

/// Expected push body: `{ "title": ..., "body": ... }`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PushPayload {
    pub title: String,
    #[serde(default)]
    pub body: String,
}

impl PushPayload {
    pub fn parse(data: &[u8]) -> Result<Self, ServiceWorkerError> {
        serde_json::from_slice(data).map_err(|e| ServiceWorkerError::InvalidPayload(e.to_string()))
    }
}

/// Extra data attached to a notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationData {
    /// Ms since epoch.
    pub date_of_arrival: u64,
    pub primary_key: u32,
}

/// Options handed to the platform notification API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationOptions {
    pub body: String,
    pub icon: String,
    pub badge: String,
    pub vibrate: Vec<u32>,
    pub data: NotificationData,
}

impl NotificationOptions {
    pub fn for_push(payload: &PushPayload, config: &NotificationConfig) -> Self {
        let date_of_arrival = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();

        Self {
            body: payload.body.clone(),
            icon: config.icon.clone(),
            badge: config.badge.clone(),
            vibrate: config.vibrate.clone(),
            data: NotificationData {
                date_of_arrival,
                primary_key: 1,
            },
        }
    }
}
