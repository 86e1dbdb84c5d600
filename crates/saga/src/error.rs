//! Saga error types.

use common::TransactionNumber;
use domain::{OrderError, PaymentMethodId};
use messaging::BrokerError;
use order_store::StoreError;
use thiserror::Error;

use crate::services::catalog::CatalogError;
use crate::services::payment::PaymentError;

/// Errors that can occur while placing an order or applying a payment
/// notification.
#[derive(Debug, Error)]
pub enum SagaError {
    /// The cart or a stored record failed a domain rule.
    #[error(transparent)]
    Order(#[from] OrderError),

    #[error("Payment method not found: {0}")]
    PaymentMethodNotFound(PaymentMethodId),

    /// No order carries the given transaction number or id.
    #[error("Order not found: {0}")]
    OrderNotFound(String),

    /// The catalog declined the reservation.
    #[error("Insufficient stock for transaction {0}")]
    InsufficientStock(TransactionNumber),

    /// No reservation reply arrived in time.
    #[error("Stock reservation timed out for transaction {0}")]
    ReservationTimedOut(TransactionNumber),

    /// The inventory circuit breaker refused the call.
    #[error("Inventory service unavailable: {0}")]
    CircuitOpen(String),

    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("Payment gateway error: {0}")]
    Payment(#[from] PaymentError),

    /// The gateway answered but did not create the charge.
    #[error("Payment rejected by gateway ({status_code}): {message}")]
    PaymentRejected { status_code: String, message: String },

    /// A notification arrived after the payment deadline.
    #[error("Payment expired for transaction {0}")]
    PaymentExpired(TransactionNumber),

    #[error("Order store error: {0}")]
    Store(#[from] StoreError),

    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),

    /// Stock could not be restored after a failed placement.
    #[error("Failed to restore stock for transaction {transaction_number}: {source}")]
    CompensationFailed {
        transaction_number: TransactionNumber,
        source: BrokerError,
    },
}

/// Broad classification of a [`SagaError`], used by callers to pick a
/// response status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Conflict,
    PaymentExpired,
    BadGateway,
    Timeout,
    BadRequest,
    Internal,
}

impl SagaError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SagaError::Order(e) => match e {
                OrderError::EmptyCart
                | OrderError::InvalidQuantity { .. }
                | OrderError::UnsupportedPaymentMethod(_) => ErrorKind::BadRequest,
                OrderError::ProductNotFound(_) => ErrorKind::NotFound,
                OrderError::InvalidStatusTransition { .. } => ErrorKind::Conflict,
                OrderError::InvalidExpiry(_) => ErrorKind::BadGateway,
                OrderError::UnknownPaymentStatus(_) | OrderError::UnknownMdrType(_) => {
                    ErrorKind::Internal
                }
            },
            SagaError::PaymentMethodNotFound(_) | SagaError::OrderNotFound(_) => {
                ErrorKind::NotFound
            }
            SagaError::InsufficientStock(_) => ErrorKind::Conflict,
            SagaError::ReservationTimedOut(_) => ErrorKind::Timeout,
            SagaError::CircuitOpen(_) => ErrorKind::BadGateway,
            SagaError::Catalog(e) => match e {
                CatalogError::InsufficientStock => ErrorKind::Conflict,
                e if e.is_timeout() => ErrorKind::Timeout,
                _ => ErrorKind::BadGateway,
            },
            SagaError::Payment(e) if e.is_timeout() => ErrorKind::Timeout,
            SagaError::Payment(_) | SagaError::PaymentRejected { .. } => ErrorKind::BadGateway,
            SagaError::PaymentExpired(_) => ErrorKind::PaymentExpired,
            SagaError::Broker(BrokerError::DuplicateReservation(_)) => ErrorKind::Conflict,
            SagaError::Broker(_) => ErrorKind::BadGateway,
            SagaError::Store(_) | SagaError::CompensationFailed { .. } => ErrorKind::Internal,
        }
    }
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;
