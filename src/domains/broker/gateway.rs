//! The boundary between the kernel and the external message broker.
//!
//! Grounded directly on `kernel/nats.rs`'s `NatsPublisher` trait and its
//! `NatsClientPublisher`/`TestNats` split: a real implementation wrapping
//! `async_nats::Client`, and an in-memory recorder for tests that exposes
//! helper assertions (`was_published_to`, `messages_for_subject`, ...).

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::messages::CrawlRequest;
use crate::error::Result;
use crate::kernel::envelope::{Envelope, Status, CRAWL_WORKER};
use crate::kernel::supervisor::Supervisor;

#[derive(Debug, Clone)]
pub struct PublishedMessage {
    pub subject: String,
    pub payload: Bytes,
}

#[async_trait]
pub trait BrokerGateway: Send + Sync {
    async fn publish_raw(&self, subject: &str, payload: Bytes) -> Result<()>;
}

/// Serialize `message` and publish it, usable against any `dyn
/// BrokerGateway` (the trait itself stays object-safe).
pub async fn publish_json<T: Serialize + Sync>(
    gateway: &(dyn BrokerGateway),
    subject: &str,
    message: &T,
) -> Result<()> {
    let payload = serde_json::to_vec(message).map_err(anyhow::Error::from)?;
    gateway.publish_raw(subject, Bytes::from(payload)).await
}

pub struct NatsBrokerGateway {
    client: async_nats::Client,
}

impl NatsBrokerGateway {
    pub async fn connect(nats_url: &str) -> Result<Self> {
        let client = async_nats::connect(nats_url)
            .await
            .map_err(|e| crate::error::GatheringError::Transport(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl BrokerGateway for NatsBrokerGateway {
    async fn publish_raw(&self, subject: &str, payload: Bytes) -> Result<()> {
        self.client
            .publish(subject.to_string(), payload)
            .await
            .map_err(|e| crate::error::GatheringError::Transport(e.to_string()))?;
        Ok(())
    }
}

/// Subscribe to the inbound project queue and dispatch each message into
/// the supervisor as a `CrawlWorker/crawling` envelope.
///
/// Connection policy: a single long-lived subscription; if the
/// subscription stream ends (connection closed) the loop returns an
/// error so the caller can restart the gateway, mirroring the
/// reference's "on close or blocked, emit an error toward the
/// supervisor" policy.
pub async fn consume_project_queue(
    nats_url: &str,
    subject: &str,
    supervisor: Arc<Supervisor>,
    shutdown: CancellationToken,
) -> Result<()> {
    let client = async_nats::connect(nats_url)
        .await
        .map_err(|e| crate::error::GatheringError::Transport(e.to_string()))?;
    let mut subscriber = client
        .subscribe(subject.to_string())
        .await
        .map_err(|e| crate::error::GatheringError::Transport(e.to_string()))?;

    info!(subject, "subscribed to project queue");

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("broker gateway shutting down");
                return Ok(());
            }
            message = subscriber.next() => {
                let Some(message) = message else {
                    warn!("project queue subscription ended; connection likely closed");
                    return Err(crate::error::GatheringError::Transport("subscription closed".to_string()));
                };
                let request: CrawlRequest = match serde_json::from_slice(&message.payload) {
                    Ok(request) => request,
                    Err(err) => {
                        error!(error = %err, "dropping malformed project_queue message");
                        continue;
                    }
                };
                let envelope = Envelope::to(CRAWL_WORKER, Status::Received, serde_json::to_value(&request).unwrap());
                if let Err(err) = supervisor.dispatch(envelope).await {
                    error!(error = %err, "failed to dispatch crawl request");
                }
            }
        }
    }
}

/// In-memory recorder standing in for the broker in unit and
/// integration tests.
#[derive(Default)]
pub struct TestBroker {
    published: RwLock<Vec<PublishedMessage>>,
}

impl TestBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn published_messages(&self) -> Vec<PublishedMessage> {
        self.published.read().await.clone()
    }

    pub async fn messages_for_subject(&self, subject: &str) -> Vec<PublishedMessage> {
        self.published
            .read()
            .await
            .iter()
            .filter(|m| m.subject == subject)
            .cloned()
            .collect()
    }

    pub async fn was_published_to(&self, subject: &str) -> bool {
        self.published.read().await.iter().any(|m| m.subject == subject)
    }

    pub async fn publish_count(&self) -> usize {
        self.published.read().await.len()
    }
}

#[async_trait]
impl BrokerGateway for TestBroker {
    async fn publish_raw(&self, subject: &str, payload: Bytes) -> Result<()> {
        self.published.write().await.push(PublishedMessage {
            subject: subject.to_string(),
            payload,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::broker::messages::DataGatheredNotice;
    use chrono::Utc;
    use uuid::Uuid;

    #[tokio::test]
    async fn publish_json_is_recorded_and_retrievable_by_subject() {
        let broker = TestBroker::new();
        let notice = DataGatheredNotice {
            project_id: Uuid::new_v4(),
            keyword: "rust".to_string(),
            from: Utc::now(),
            to: Utc::now(),
            record_count: 5,
        };
        publish_json(&broker, "data_gathering_queue", &notice).await.unwrap();

        assert!(broker.was_published_to("data_gathering_queue").await);
        assert_eq!(broker.messages_for_subject("data_gathering_queue").await.len(), 1);
        assert_eq!(broker.publish_count().await, 1);
    }

    #[tokio::test]
    async fn unrelated_subject_not_matched() {
        let broker = TestBroker::new();
        broker.publish_raw("project_queue", Bytes::from_static(b"{}")).await.unwrap();
        assert!(!broker.was_published_to("data_gathering_queue").await);
    }
}
