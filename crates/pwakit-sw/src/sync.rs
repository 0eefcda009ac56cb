//! Background sync: submissions queued while offline, replayed on sync.

use std::collections::VecDeque;

use pwakit_common::{retry_with_backoff, RetryConfig};
use pwakit_net::{Network, Request};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::ServiceWorkerError;

/// Outcome of one replay pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Submissions accepted by the server.
    pub delivered: usize,
    /// Submissions the server refused (4xx); dropped.
    pub rejected: usize,
    /// Submissions still failing; kept for the next sync.
    pub remaining: usize,
}

/// FIFO of submissions waiting for connectivity.
#[derive(Debug, Default)]
pub struct SyncQueue {
    pending: Mutex<VecDeque<Request>>,
}

impl SyncQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn enqueue(&self, request: Request) {
        debug!(url = %request.url, method = %request.method, "Queued submission");
        self.pending.lock().await.push_back(request);
    }

    pub async fn len(&self) -> usize {
        self.pending.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.pending.lock().await.is_empty()
    }

    /// Send every queued submission, retrying transient failures.
    pub async fn replay(&self, network: &dyn Network, retry: &RetryConfig) -> SyncReport {
        let batch: Vec<Request> = self.pending.lock().await.drain(..).collect();
        let mut report = SyncReport::default();
        let mut still_pending = Vec::new();

        for request in batch {
            let result = retry_with_backoff(
                retry,
                || submit(network, request.clone()),
                ServiceWorkerError::is_retryable,
            )
            .await;

            match result {
                Ok(()) => report.delivered += 1,
                Err(ServiceWorkerError::BadStatus { status, url }) if status < 500 => {
                    warn!(url = %url, status, "Submission rejected, dropping");
                    report.rejected += 1;
                }
                Err(e) => {
                    warn!(url = %request.url, error = %e, "Submission still failing");
                    still_pending.push(request);
                }
            }
        }

        report.remaining = still_pending.len();
        if !still_pending.is_empty() {
            // Keep them ahead of anything queued during the replay.
            let mut pending = self.pending.lock().await;
            for request in still_pending.into_iter().rev() {
                pending.push_front(request);
            }
        }

        info!(
            delivered = report.delivered,
            rejected = report.rejected,
            remaining = report.remaining,
            "Background sync completed"
        );
        report
    }
}

async fn submit(network: &dyn Network, request: Request) -> Result<(), ServiceWorkerError> {
    let url = request.url.to_string();
    let response = network.fetch(request).await?;
    if response.ok() {
        Ok(())
    } else {
        Err(ServiceWorkerError::BadStatus {
            url,
            status: response.status.as_u16(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockNetwork;
    use bytes::Bytes;
    use std::time::Duration;
    use url::Url;

    fn form(path: &str) -> Request {
        let url = Url::parse("https://site.test").unwrap().join(path).unwrap();
        Request::post(url, Bytes::from_static(b"name=Ada"))
    }

    fn fast_retry() -> RetryConfig {
        RetryConfig {
            max_attempts: 2,
            initial_delay: Duration::from_millis(1),
            jitter: false,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_replay_delivers_and_drains() {
        let network = MockNetwork::new();
        network.respond("https://site.test/contact", 200, "thanks");

        let queue = SyncQueue::new();
        queue.enqueue(form("/contact")).await;
        queue.enqueue(form("/contact")).await;

        let report = queue.replay(&network, &fast_retry()).await;
        assert_eq!(report.delivered, 2);
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn test_replay_keeps_transient_failures() {
        let network = MockNetwork::new();
        network.set_offline(true);

        let queue = SyncQueue::new();
        queue.enqueue(form("/contact")).await;

        let report = queue.replay(&network, &fast_retry()).await;
        assert_eq!(report.remaining, 1);
        assert_eq!(queue.len().await, 1);
        assert_eq!(network.calls("https://site.test/contact"), 2);
    }

    #[tokio::test]
    async fn test_replay_drops_rejected() {
        let network = MockNetwork::new();
        network.respond("https://site.test/contact", 422, "");

        let queue = SyncQueue::new();
        queue.enqueue(form("/contact")).await;

        let report = queue.replay(&network, &fast_retry()).await;
        assert_eq!(report.rejected, 1);
        assert!(queue.is_empty().await);
        assert_eq!(network.calls("https://site.test/contact"), 1);
    }
}
