//! Messaging layer for the order service.
//!
//! This crate provides:
//! - The broker envelope exchanged with the catalog service
//! - Publisher and subscriber traits with in-memory and Kafka transports
//! - A publisher wrapper that retries with exponential backoff
//! - The listener that correlates stock-update replies with a pending
//!   reservation

pub mod broker;
pub mod error;
#[cfg(feature = "kafka")]
pub mod kafka;
pub mod listener;
pub mod memory;
pub mod message;
pub mod retry;

pub use broker::{MessagePublisher, MessageStream, MessageSubscriber};
pub use error::{BrokerError, Result};
#[cfg(feature = "kafka")]
pub use kafka::{KafkaBroker, KafkaConfig};
pub use listener::{PendingReservation, ReservationOutcome, StockUpdateListener};
pub use memory::InMemoryBroker;
pub use message::{BrokerMessage, StockUpdate};
pub use retry::{RetryPolicy, RetryPublisher};
