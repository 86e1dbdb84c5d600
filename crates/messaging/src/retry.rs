//! Publishing with bounded retry.

use std::sync::Arc;
use std::time::Duration;

use backon::{BackoffBuilder, ExponentialBuilder};

use crate::{BrokerError, BrokerMessage, MessagePublisher, Result};

/// How many times to try a publish and how long to wait in between.
///
/// Delays double after each failed attempt, starting at `base_delay`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: usize, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
        }
    }

    /// Delays to wait before each retry (i.e. after the first attempt).
    fn delays(&self) -> impl Iterator<Item = Duration> {
        ExponentialBuilder::default()
            .with_min_delay(self.base_delay)
            .with_factor(2.0)
            .with_max_times(self.max_attempts.saturating_sub(1))
            .build()
    }
}

/// Wraps a publisher so that transient failures are retried.
#[derive(Clone)]
pub struct RetryPublisher {
    publisher: Arc<dyn MessagePublisher>,
    policy: RetryPolicy,
}

impl RetryPublisher {
    pub fn new(publisher: Arc<dyn MessagePublisher>) -> Self {
        Self::with_policy(publisher, RetryPolicy::default())
    }

    pub fn with_policy(publisher: Arc<dyn MessagePublisher>, policy: RetryPolicy) -> Self {
        Self { publisher, policy }
    }

    /// Encodes `message` once and publishes it, retrying on failure.
    ///
    /// Returns [`BrokerError::RetriesExhausted`] with the last error once
    /// every attempt has failed. Encoding errors are returned immediately.
    #[tracing::instrument(
        name = "broker.publish",
        skip(self, message),
        fields(event_type = message.event_type(), transaction_number = %message.transaction_number())
    )]
    pub async fn publish_with_retry(&self, message: &BrokerMessage, key: Option<&str>) -> Result<()> {
        let payload = message.encode()?;
        let max_attempts = self.policy.max_attempts.max(1);

        let mut last_error = None;
        let mut attempts = 0;

        for (attempt, delay) in std::iter::once(Duration::ZERO)
            .chain(self.policy.delays())
            .enumerate()
        {
            if attempt > 0 {
                metrics::counter!("broker_publish_retries_total").increment(1);
                tokio::time::sleep(delay).await;
            }
            attempts = attempt + 1;

            match self.publisher.publish(&payload, key).await {
                Ok(()) => {
                    tracing::debug!(attempts, "message published");
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(
                        component = "messaging",
                        attempt = attempts,
                        max_attempts,
                        error = %e,
                        "publish failed"
                    );
                    last_error = Some(e);
                }
            }
        }

        Err(BrokerError::RetriesExhausted {
            attempts,
            source: Box::new(
                last_error.unwrap_or_else(|| BrokerError::Publish("no attempt made".to_string())),
            ),
        })
    }
}
