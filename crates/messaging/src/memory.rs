//! In-memory broker for standalone mode and tests.
//!
//! Uses a tokio broadcast channel: every subscription sees every message
//! published after it was opened.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{RwLock, broadcast};

use crate::{
    BrokerError, BrokerMessage, Result,
    broker::{MessagePublisher, MessageStream, MessageSubscriber, broadcast_stream},
};

/// Channel capacity for broadcast.
const CHANNEL_CAPACITY: usize = 1024;

/// A payload accepted by the broker.
#[derive(Debug, Clone)]
pub struct PublishedRecord {
    pub key: Option<String>,
    pub payload: Vec<u8>,
}

#[derive(Default)]
struct BrokerState {
    published: Vec<PublishedRecord>,
    publish_attempts: usize,
    fail_next: usize,
}

/// In-memory publish/subscribe broker.
#[derive(Clone)]
pub struct InMemoryBroker {
    sender: broadcast::Sender<Arc<Vec<u8>>>,
    state: Arc<RwLock<BrokerState>>,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBroker {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            sender,
            state: Arc::new(RwLock::new(BrokerState::default())),
        }
    }

    /// Makes the next `n` publish calls fail.
    pub async fn fail_next_publishes(&self, n: usize) {
        self.state.write().await.fail_next = n;
    }

    /// Returns every publish call made, including failed ones.
    pub async fn publish_attempts(&self) -> usize {
        self.state.read().await.publish_attempts
    }

    /// Returns the accepted payloads in publish order.
    pub async fn published(&self) -> Vec<PublishedRecord> {
        self.state.read().await.published.clone()
    }

    /// Returns the accepted payloads that decode as broker messages.
    pub async fn published_messages(&self) -> Vec<BrokerMessage> {
        self.state
            .read()
            .await
            .published
            .iter()
            .filter_map(|r| BrokerMessage::decode(&r.payload).ok())
            .collect()
    }

    /// Returns the number of open subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[async_trait]
impl MessagePublisher for InMemoryBroker {
    async fn publish(&self, payload: &[u8], key: Option<&str>) -> Result<()> {
        {
            let mut state = self.state.write().await;
            state.publish_attempts += 1;
            if state.fail_next > 0 {
                state.fail_next -= 1;
                return Err(BrokerError::Publish("simulated broker outage".to_string()));
            }
            state.published.push(PublishedRecord {
                key: key.map(str::to_string),
                payload: payload.to_vec(),
            });
        }

        // No receivers is fine for publish-only use.
        let receivers = self.sender.send(Arc::new(payload.to_vec())).unwrap_or(0);
        tracing::debug!(receivers, key, "published message to channel");
        Ok(())
    }
}

#[async_trait]
impl MessageSubscriber for InMemoryBroker {
    async fn subscribe(&self) -> Result<MessageStream> {
        Ok(broadcast_stream(self.sender.subscribe()))
    }
}
