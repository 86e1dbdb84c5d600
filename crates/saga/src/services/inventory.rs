//! Inventory reservation strategies.
//!
//! Two ways to decrement stock at the catalog before an order is charged:
//! a synchronous batch call guarded by a circuit breaker, or a broker
//! round-trip that waits for the catalog's `stock_updated` reply.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use domain::ReservationIntent;
use messaging::{
    BrokerError, BrokerMessage, ReservationOutcome, RetryPublisher, StockUpdateListener,
};
use thiserror::Error;

use crate::circuit_breaker::{BreakerError, CircuitBreaker};
use crate::services::catalog::{CatalogClient, CatalogError};

/// Default time to wait for a broker reservation reply.
pub const DEFAULT_RESERVATION_TIMEOUT: Duration = Duration::from_secs(120);

/// Why a reservation did not go through.
#[derive(Debug, Error)]
pub enum ReservationError {
    /// The catalog declined; nothing was decremented.
    #[error("Reservation rejected by catalog")]
    Rejected,

    /// No answer in time. The catalog may have applied the request.
    #[error("Reservation timed out")]
    TimedOut,

    /// The breaker refused the call; the catalog was not contacted.
    #[error("Circuit open: {0}")]
    CircuitOpen(String),

    #[error(transparent)]
    Catalog(CatalogError),

    /// The request could not be handed to the broker.
    #[error(transparent)]
    Broker(#[from] BrokerError),
}

impl ReservationError {
    /// True when stock may have been decremented and must be restored.
    pub fn may_have_applied(&self) -> bool {
        matches!(self, ReservationError::TimedOut)
    }
}

/// Reserves stock for a reservation intent.
#[async_trait]
pub trait InventoryReserver: Send + Sync {
    /// Name used in logs and metrics.
    fn strategy(&self) -> &'static str;

    async fn reserve(&self, intent: &ReservationIntent) -> Result<(), ReservationError>;
}

/// Synchronous reservation through the catalog client, guarded by a
/// circuit breaker.
pub struct RpcInventoryReserver {
    catalog: Arc<dyn CatalogClient>,
    breaker: Arc<CircuitBreaker>,
}

impl RpcInventoryReserver {
    pub fn new(catalog: Arc<dyn CatalogClient>, breaker: Arc<CircuitBreaker>) -> Self {
        Self { catalog, breaker }
    }
}

#[async_trait]
impl InventoryReserver for RpcInventoryReserver {
    fn strategy(&self) -> &'static str {
        "rpc"
    }

    #[tracing::instrument(skip(self, intent), fields(transaction_number = %intent.transaction_number))]
    async fn reserve(&self, intent: &ReservationIntent) -> Result<(), ReservationError> {
        let result = self
            .breaker
            .call_classified(self.catalog.update_product_quantity_batch(intent), |e| {
                !e.is_business_rejection()
            })
            .await;

        match result {
            Ok(()) => Ok(()),
            Err(BreakerError::Open(name)) | Err(BreakerError::TooManyRequests(name)) => {
                Err(ReservationError::CircuitOpen(name))
            }
            Err(BreakerError::Inner(CatalogError::InsufficientStock)) => {
                Err(ReservationError::Rejected)
            }
            Err(BreakerError::Inner(e)) if e.is_timeout() => Err(ReservationError::TimedOut),
            Err(BreakerError::Inner(e)) => Err(ReservationError::Catalog(e)),
        }
    }
}

/// Reservation by broker round-trip.
///
/// Publishes `order_created` keyed by the transaction number and waits for
/// the matching `stock_updated` reply.
pub struct BrokerInventoryReserver {
    listener: StockUpdateListener,
    publisher: RetryPublisher,
    timeout: Duration,
}

impl BrokerInventoryReserver {
    pub fn new(listener: StockUpdateListener, publisher: RetryPublisher) -> Self {
        Self::with_timeout(listener, publisher, DEFAULT_RESERVATION_TIMEOUT)
    }

    pub fn with_timeout(
        listener: StockUpdateListener,
        publisher: RetryPublisher,
        timeout: Duration,
    ) -> Self {
        Self {
            listener,
            publisher,
            timeout,
        }
    }
}

#[async_trait]
impl InventoryReserver for BrokerInventoryReserver {
    fn strategy(&self) -> &'static str {
        "broker"
    }

    #[tracing::instrument(skip(self, intent), fields(transaction_number = %intent.transaction_number))]
    async fn reserve(&self, intent: &ReservationIntent) -> Result<(), ReservationError> {
        // Listen before publishing so an immediate reply is not missed.
        let pending = self.listener.watch(intent.transaction_number).await?;

        let key = intent.transaction_number.to_string();
        self.publisher
            .publish_with_retry(&BrokerMessage::OrderCreated(intent.clone()), Some(&key))
            .await?;

        match pending.outcome(self.timeout).await {
            ReservationOutcome::Confirmed => Ok(()),
            ReservationOutcome::Rejected => Err(ReservationError::Rejected),
            ReservationOutcome::TimedOut => Err(ReservationError::TimedOut),
        }
    }
}
