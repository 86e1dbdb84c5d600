use std::pin::Pin;

use async_trait::async_trait;
use futures_core::Stream;
use futures_util::stream;
use tokio::sync::broadcast;

use crate::Result;

/// A stream of raw message payloads from the broker topic.
pub type MessageStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>>> + Send>>;

/// Sends raw payloads to the broker topic.
#[async_trait]
pub trait MessagePublisher: Send + Sync {
    /// Publishes one payload. Messages with the same key are delivered in
    /// publish order.
    async fn publish(&self, payload: &[u8], key: Option<&str>) -> Result<()>;
}

/// Opens subscriptions on the broker topic.
#[async_trait]
pub trait MessageSubscriber: Send + Sync {
    /// Starts a new subscription.
    ///
    /// The subscription only sees messages published after this call
    /// returns.
    async fn subscribe(&self) -> Result<MessageStream>;
}

/// Adapts a broadcast receiver into a [`MessageStream`].
///
/// Lagged receivers log and keep going; the stream ends when the channel
/// closes.
pub(crate) fn broadcast_stream(
    receiver: broadcast::Receiver<std::sync::Arc<Vec<u8>>>,
) -> MessageStream {
    Box::pin(stream::unfold(receiver, |mut receiver| async move {
        loop {
            match receiver.recv().await {
                Ok(payload) => return Some((Ok(payload.as_ref().clone()), receiver)),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::error!(skipped = n, "subscriber lagged, skipped messages");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }))
}
