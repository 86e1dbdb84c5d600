//! The broker envelope.
//!
//! Every message on the topic is `{"event_type": ..., "data": ...}`. Payloads
//! are decoded once at the transport boundary into [`BrokerMessage`].

use common::TransactionNumber;
use domain::ReservationIntent;
use serde::{Deserialize, Serialize};

use crate::Result;

/// Catalog reply to an `order_created` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockUpdate {
    pub transaction_number: TransactionNumber,
    /// True if every line was decremented, false if nothing was.
    pub status: bool,
}

/// Messages exchanged between the order service and the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event_type", content = "data", rename_all = "snake_case")]
pub enum BrokerMessage {
    /// Reserve stock for a new order.
    OrderCreated(ReservationIntent),
    /// Outcome of a reservation.
    StockUpdated(StockUpdate),
    /// Give previously reserved stock back.
    RestoreProductStock(ReservationIntent),
}

impl BrokerMessage {
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(payload)?)
    }

    /// Returns the wire name of the message type.
    pub fn event_type(&self) -> &'static str {
        match self {
            BrokerMessage::OrderCreated(_) => "order_created",
            BrokerMessage::StockUpdated(_) => "stock_updated",
            BrokerMessage::RestoreProductStock(_) => "restore_product_stock",
        }
    }

    /// Returns the transaction number the message belongs to.
    pub fn transaction_number(&self) -> TransactionNumber {
        match self {
            BrokerMessage::OrderCreated(intent) | BrokerMessage::RestoreProductStock(intent) => {
                intent.transaction_number
            }
            BrokerMessage::StockUpdated(update) => update.transaction_number,
        }
    }
}
