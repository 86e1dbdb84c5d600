//! Correlates `stock_updated` replies with pending reservations.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use common::TransactionNumber;
use futures_util::StreamExt;
use tokio::task::JoinHandle;

use crate::{BrokerError, BrokerMessage, MessageSubscriber, Result};

/// How a reservation round-trip ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReservationOutcome {
    /// The catalog decremented every line.
    Confirmed,
    /// The catalog declined; nothing was decremented.
    Rejected,
    /// No reply arrived in time. The catalog may or may not have applied the
    /// request.
    TimedOut,
}

impl ReservationOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationOutcome::Confirmed => "confirmed",
            ReservationOutcome::Rejected => "rejected",
            ReservationOutcome::TimedOut => "timed_out",
        }
    }
}

type InFlight = Arc<Mutex<HashSet<TransactionNumber>>>;

/// Marks a transaction number as having a listener; released on drop.
struct InFlightClaim {
    in_flight: InFlight,
    transaction_number: TransactionNumber,
}

impl InFlightClaim {
    fn acquire(in_flight: &InFlight, transaction_number: TransactionNumber) -> Result<Self> {
        let inserted = in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(transaction_number);
        if !inserted {
            return Err(BrokerError::DuplicateReservation(transaction_number));
        }
        Ok(Self {
            in_flight: Arc::clone(in_flight),
            transaction_number,
        })
    }
}

impl Drop for InFlightClaim {
    fn drop(&mut self) {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.transaction_number);
    }
}

/// Waits for the catalog's `stock_updated` reply to a reservation request.
///
/// At most one reservation per transaction number may be pending at a time.
#[derive(Clone)]
pub struct StockUpdateListener {
    subscriber: Arc<dyn MessageSubscriber>,
    in_flight: InFlight,
}

impl StockUpdateListener {
    pub fn new(subscriber: Arc<dyn MessageSubscriber>) -> Self {
        Self {
            subscriber,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Returns the number of reservations currently being waited on.
    pub fn pending_count(&self) -> usize {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Starts listening for the reply to `transaction_number`.
    ///
    /// The subscription is open when this returns, so the request may be
    /// published right after without losing a fast reply.
    #[tracing::instrument(skip(self))]
    pub async fn watch(&self, transaction_number: TransactionNumber) -> Result<PendingReservation> {
        let claim = InFlightClaim::acquire(&self.in_flight, transaction_number)?;
        let mut stream = self.subscriber.subscribe().await?;

        let task = tokio::spawn(async move {
            while let Some(item) = stream.next().await {
                let payload = match item {
                    Ok(payload) => payload,
                    Err(e) => {
                        tracing::warn!(component = "messaging", error = %e, "subscription error");
                        continue;
                    }
                };
                match BrokerMessage::decode(&payload) {
                    Ok(BrokerMessage::StockUpdated(update))
                        if update.transaction_number == transaction_number =>
                    {
                        return update.status;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!(
                            component = "messaging",
                            error = %e,
                            "skipping undecodable message"
                        );
                    }
                }
            }
            tracing::debug!(%transaction_number, "subscription closed before reply");
            std::future::pending().await
        });

        Ok(PendingReservation {
            transaction_number,
            task,
            _claim: claim,
        })
    }

    /// Subscribes and waits up to `timeout` for the reply.
    pub async fn await_reservation(
        &self,
        transaction_number: TransactionNumber,
        timeout: Duration,
    ) -> Result<ReservationOutcome> {
        Ok(self.watch(transaction_number).await?.outcome(timeout).await)
    }
}

/// A reservation whose reply is being listened for.
///
/// Dropping it stops the listening task.
pub struct PendingReservation {
    transaction_number: TransactionNumber,
    task: JoinHandle<bool>,
    _claim: InFlightClaim,
}

impl PendingReservation {
    pub fn transaction_number(&self) -> TransactionNumber {
        self.transaction_number
    }

    /// Waits up to `timeout` for the reply.
    #[tracing::instrument(skip(self), fields(transaction_number = %self.transaction_number))]
    pub async fn outcome(mut self, timeout: Duration) -> ReservationOutcome {
        let outcome = tokio::select! {
            joined = &mut self.task => match joined {
                Ok(true) => ReservationOutcome::Confirmed,
                Ok(false) => ReservationOutcome::Rejected,
                Err(e) => {
                    tracing::error!(component = "messaging", error = %e, "listener task failed");
                    ReservationOutcome::TimedOut
                }
            },
            _ = tokio::time::sleep(timeout) => ReservationOutcome::TimedOut,
        };

        metrics::counter!("listener_outcomes_total", "outcome" => outcome.as_str()).increment(1);
        tracing::debug!(outcome = outcome.as_str(), "reservation resolved");
        outcome
    }
}

impl Drop for PendingReservation {
    fn drop(&mut self) {
        self.task.abort();
    }
}
