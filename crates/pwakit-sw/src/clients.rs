//! Controlled pages and the message channel to them.

use std::sync::atomic::{AtomicU64, Ordering};

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use url::Url;

use crate::lifecycle::ServiceWorkerId;
use crate::ServiceWorkerError;

// ==================== Messages ====================

/// Kind of a worker -> page message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageKind {
    /// A new worker version took control.
    SwUpdated,
    /// A new version finished installing and is waiting.
    UpdateAvailable,
}

/// Message posted to pages, `{ "type": ..., "message": ... }` on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientMessage {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub message: String,
}

impl ClientMessage {
    pub fn updated(message: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::SwUpdated,
            message: message.into(),
        }
    }

    pub fn update_available(message: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::UpdateAvailable,
            message: message.into(),
        }
    }

    /// JSON form as seen by the page.
    pub fn to_json(&self) -> Result<String, ServiceWorkerError> {
        serde_json::to_string(self).map_err(|e| ServiceWorkerError::InvalidPayload(e.to_string()))
    }
}

// ==================== Client ====================

/// Client type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientType {
    #[default]
    Window,
    Worker,
    SharedWorker,
}

/// An open page or worker that the service worker can talk to.
#[derive(Debug, Clone)]
pub struct Client {
    /// Client ID.
    pub id: String,

    /// Client URL.
    pub url: Url,

    /// Client type.
    pub client_type: ClientType,

    /// Whether focused.
    pub focused: bool,

    /// Worker currently controlling this client.
    pub controller: Option<ServiceWorkerId>,

    sender: mpsc::UnboundedSender<ClientMessage>,
}

impl Client {
    /// Create a client and the receiving end of its message channel.
    pub fn connect(
        url: Url,
        client_type: ClientType,
    ) -> (Self, mpsc::UnboundedReceiver<ClientMessage>) {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        let (sender, receiver) = mpsc::unbounded_channel();

        let client = Self {
            id: format!("client-{}", COUNTER.fetch_add(1, Ordering::Relaxed)),
            url,
            client_type,
            focused: false,
            controller: None,
            sender,
        };
        (client, receiver)
    }

    /// Post message to client.
    pub fn post_message(&self, message: &ClientMessage) -> Result<(), ServiceWorkerError> {
        self.sender
            .send(message.clone())
            .map_err(|_| ServiceWorkerError::ClientGone(self.id.clone()))
    }

    /// Focus the client.
    pub fn focus(&mut self) -> Result<(), ServiceWorkerError> {
        if self.client_type != ClientType::Window {
            return Err(ServiceWorkerError::StateError(
                "Can only focus window clients".to_string(),
            ));
        }
        self.focused = true;
        Ok(())
    }
}

// ==================== Clients ====================

/// Options for [`Clients::match_all`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ClientMatchOptions {
    /// Also return clients not controlled by the asking worker.
    pub include_uncontrolled: bool,
    /// Restrict to one type; `None` matches every type.
    pub client_type: Option<ClientType>,
}

/// Result of bringing a window to the front.
#[derive(Debug)]
pub enum WindowOutcome {
    /// An existing window was focused.
    Focused { client_id: String },
    /// A new window was opened; the host owns its message receiver.
    Opened {
        client_id: String,
        messages: mpsc::UnboundedReceiver<ClientMessage>,
    },
}

impl WindowOutcome {
    pub fn client_id(&self) -> &str {
        match self {
            WindowOutcome::Focused { client_id } | WindowOutcome::Opened { client_id, .. } => {
                client_id
            }
        }
    }
}

/// Clients API.
#[derive(Debug, Default)]
pub struct Clients {
    clients: HashMap<String, Client>,
}

impl Clients {
    /// Create new clients manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a client.
    pub fn add(&mut self, client: Client) {
        self.clients.insert(client.id.clone(), client);
    }

    /// Remove a client.
    pub fn remove(&mut self, id: &str) -> Option<Client> {
        self.clients.remove(id)
    }

    /// Get a client by ID.
    pub fn get(&self, id: &str) -> Option<&Client> {
        self.clients.get(id)
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Clients visible to `worker`.
    pub fn match_all(&self, worker: ServiceWorkerId, options: ClientMatchOptions) -> Vec<&Client> {
        self.clients
            .values()
            .filter(|c| options.include_uncontrolled || c.controller == Some(worker))
            .filter(|c| options.client_type.map_or(true, |t| c.client_type == t))
            .collect()
    }

    /// Make `worker` the controller of every client. Returns how many changed
    /// controller.
    pub fn claim(&mut self, worker: ServiceWorkerId) -> usize {
        let mut claimed = 0;
        for client in self.clients.values_mut() {
            if client.controller != Some(worker) {
                client.controller = Some(worker);
                claimed += 1;
            }
        }
        debug!(worker = %worker, claimed, "Claimed clients");
        claimed
    }

    /// Post `message` to every client controlled by `worker`. Returns the
    /// number of clients reached.
    pub fn broadcast(&self, worker: ServiceWorkerId, message: &ClientMessage) -> usize {
        let options = ClientMatchOptions::default();
        let mut delivered = 0;
        for client in self.match_all(worker, options) {
            match client.post_message(message) {
                Ok(()) => delivered += 1,
                Err(e) => warn!(client = %client.id, error = %e, "Dropping message"),
            }
        }
        delivered
    }

    /// Open a new focused window on `url`.
    pub fn open_window(&mut self, url: &Url) -> WindowOutcome {
        let (mut client, messages) = Client::connect(url.clone(), ClientType::Window);
        client.focused = true;
        let client_id = client.id.clone();
        debug!(client = %client_id, url = %url, "Opened window");
        self.add(client);
        WindowOutcome::Opened {
            client_id,
            messages,
        }
    }

    /// Focus the client with `id`.
    pub fn focus(&mut self, id: &str) -> Result<(), ServiceWorkerError> {
        self.clients
            .get_mut(id)
            .ok_or_else(|| ServiceWorkerError::NotFound(id.to_string()))?
            .focus()
    }

    /// Focus a window client showing `url`, or open a new one.
    pub fn focus_or_open(&mut self, url: &Url) -> Result<WindowOutcome, ServiceWorkerError> {
        let existing = self
            .clients
            .values()
            .find(|c| c.client_type == ClientType::Window && &c.url == url)
            .map(|c| c.id.clone());

        match existing {
            Some(client_id) => {
                self.focus(&client_id)?;
                Ok(WindowOutcome::Focused { client_id })
            }
            None => Ok(self.open_window(url)),
        }
    }
}
