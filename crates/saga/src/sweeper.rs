//! Background expiry of unpaid orders.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use domain::{PaymentStatus, ReservationIntent};
use messaging::RetryPublisher;
use order_store::OrderRepository;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::compensation::restore_stock;
use crate::error::Result;

/// Default time between sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(10);

/// Expires pending orders whose payment deadline has passed and gives their
/// stock back to the catalog.
pub struct ExpirySweeper {
    repository: Arc<dyn OrderRepository>,
    publisher: RetryPublisher,
    interval: Duration,
}

impl ExpirySweeper {
    pub fn new(repository: Arc<dyn OrderRepository>, publisher: RetryPublisher) -> Self {
        Self {
            repository,
            publisher,
            interval: DEFAULT_SWEEP_INTERVAL,
        }
    }

    /// Sets the time between sweeps. A zero interval keeps the current one.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        if interval.is_zero() {
            tracing::warn!("ignoring zero sweep interval");
        } else {
            self.interval = interval;
        }
        self
    }

    /// Runs one sweep and returns the number of orders expired.
    ///
    /// Stops at the first error; the remaining orders are picked up by a later
    /// sweep. An order settled concurrently is skipped without a restore.
    #[tracing::instrument(name = "sweeper.tick", skip(self))]
    pub async fn sweep_once(&self, now: DateTime<Utc>) -> Result<usize> {
        let candidates = self.repository.find_expired_pending(now).await?;
        let mut expired = 0;

        for order in candidates {
            let applied = self
                .repository
                .update_payment_status(order.id, PaymentStatus::Pending, PaymentStatus::Expired, now)
                .await?;
            if !applied {
                tracing::debug!(order_id = %order.id, "order settled concurrently, skipping");
                continue;
            }

            let items = self.repository.get_order_items(order.id).await?;
            let intent = ReservationIntent::from_items(order.transaction_number, &items);
            restore_stock(&self.publisher, &intent, "payment deadline passed").await?;

            metrics::counter!("expiry_sweeper_orders_expired_total").increment(1);
            tracing::info!(
                order_id = %order.id,
                transaction_number = %order.transaction_number,
                "order expired"
            );
            expired += 1;
        }

        Ok(expired)
    }

    /// Runs sweeps on the configured interval until `shutdown` flips to true
    /// or its sender is dropped.
    pub fn spawn(self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            tracing::info!(interval_secs = self.interval.as_secs_f64(), "expiry sweeper started");

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = self.sweep_once(Utc::now()).await {
                            tracing::error!(component = "sweeper", error = %e, "sweep aborted");
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }

            tracing::info!("expiry sweeper stopped");
        })
    }
}
