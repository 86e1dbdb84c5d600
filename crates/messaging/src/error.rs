use common::TransactionNumber;
use thiserror::Error;

/// Errors that can occur when talking to the message broker.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Publish failed: {0}")]
    Publish(String),

    #[error("Subscribe failed: {0}")]
    Subscribe(String),

    /// A message could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A listener is already waiting on this transaction number.
    #[error("Reservation already pending for transaction {0}")]
    DuplicateReservation(TransactionNumber),

    /// Every publish attempt failed.
    #[error("Publish failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: usize,
        source: Box<BrokerError>,
    },
}

/// Result type for broker operations.
pub type Result<T> = std::result::Result<T, BrokerError>;
