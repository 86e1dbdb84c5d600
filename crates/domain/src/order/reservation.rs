//! Reservation intent: the stock request sent to the catalog, and the payload
//! used to give that stock back.

use common::TransactionNumber;
use serde::{Deserialize, Serialize};

use super::{NewOrderItem, OrderItem, ProductId};

/// A single product/quantity pair within a reservation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationLine {
    pub product_id: ProductId,
    pub quantity: u32,
}

/// Stock reservation for one order placement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationIntent {
    pub transaction_number: TransactionNumber,
    pub order_items: Vec<ReservationLine>,
}

impl ReservationIntent {
    pub fn new(transaction_number: TransactionNumber, order_items: Vec<ReservationLine>) -> Self {
        Self {
            transaction_number,
            order_items,
        }
    }

    /// Builds the intent for items about to be persisted.
    pub fn for_new_items(transaction_number: TransactionNumber, items: &[NewOrderItem]) -> Self {
        Self::new(
            transaction_number,
            items
                .iter()
                .map(|i| ReservationLine {
                    product_id: i.product_id.clone(),
                    quantity: i.quantity,
                })
                .collect(),
        )
    }

    /// Rebuilds the intent from an order's persisted line items.
    pub fn from_items(transaction_number: TransactionNumber, items: &[OrderItem]) -> Self {
        Self::new(
            transaction_number,
            items
                .iter()
                .map(|i| ReservationLine {
                    product_id: i.product_id.clone(),
                    quantity: i.quantity,
                })
                .collect(),
        )
    }

    pub fn total_quantity(&self) -> u64 {
        self.order_items.iter().map(|l| l.quantity as u64).sum()
    }
}
