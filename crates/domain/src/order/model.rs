//! Persisted order records.

use chrono::{DateTime, Utc};
use common::{OrderId, TransactionNumber};
use serde::{Deserialize, Serialize};

use super::{Money, PaymentMethodId, PaymentStatus, ProductId};

/// A placed order as stored by the repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub payment_method_id: PaymentMethodId,
    pub amount: Money,
    pub fee: Money,
    pub transaction_number: TransactionNumber,
    pub payment_status: PaymentStatus,
    pub expired_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Order {
    /// Returns true if the payment deadline is before `now`.
    pub fn is_past_deadline(&self, now: DateTime<Utc>) -> bool {
        self.expired_at < now
    }

    /// Returns true if the expiry sweeper should pick this order up at `now`.
    pub fn is_sweepable(&self, now: DateTime<Utc>) -> bool {
        self.deleted_at.is_none()
            && self.payment_status == PaymentStatus::Pending
            && self.is_past_deadline(now)
    }
}

/// A line item of a placed order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderItem {
    pub id: i64,
    pub order_id: OrderId,
    pub product_id: ProductId,
    pub quantity: u32,
    /// Catalog unit price at the time the order was placed.
    pub unit_amount: Money,
    /// Catalog product name at the time the order was placed.
    pub product_name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl OrderItem {
    /// Returns quantity * unit amount.
    pub fn line_total(&self) -> Money {
        self.unit_amount.multiply(self.quantity)
    }
}

/// Order row to insert; the repository assigns id and timestamps.
#[derive(Debug, Clone, PartialEq)]
pub struct NewOrder {
    pub payment_method_id: PaymentMethodId,
    pub amount: Money,
    pub fee: Money,
    pub transaction_number: TransactionNumber,
    pub expired_at: DateTime<Utc>,
}

/// Line item row to insert alongside a [`NewOrder`].
#[derive(Debug, Clone, PartialEq)]
pub struct NewOrderItem {
    pub product_id: ProductId,
    pub quantity: u32,
    pub unit_amount: Money,
    pub product_name: String,
}

impl NewOrderItem {
    pub fn line_total(&self) -> Money {
        self.unit_amount.multiply(self.quantity)
    }
}
