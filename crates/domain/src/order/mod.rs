//! Order model and the pure rules around it.

mod expiry;
mod model;
mod notification;
mod payment_method;
mod pricing;
mod reservation;
mod status;
mod value_objects;

pub use expiry::{format_gateway_expiry, parse_gateway_expiry};
pub use model::{NewOrder, NewOrderItem, Order, OrderItem};
pub use notification::PaymentNotification;
pub use payment_method::{MdrType, PaymentMethod, PaymentType};
pub use pricing::{CartLine, ProductPrice, order_total, price_cart, validate_cart};
pub use reservation::{ReservationIntent, ReservationLine};
pub use status::PaymentStatus;
pub use value_objects::{Money, PaymentMethodId, ProductId};

use thiserror::Error;

/// Errors that can occur while validating or pricing an order.
#[derive(Debug, Error)]
pub enum OrderError {
    /// Cart has no lines.
    #[error("Order has no items")]
    EmptyCart,

    /// A cart line asked for zero units, or more than a stored line can hold.
    #[error("Invalid quantity for product {product_id} (must be between 1 and 2147483647)")]
    InvalidQuantity { product_id: ProductId },

    /// The catalog has no record of a requested product.
    #[error("Product not found: {0}")]
    ProductNotFound(ProductId),

    /// The payment method maps to no gateway instrument.
    #[error("Unsupported payment method: {0}")]
    UnsupportedPaymentMethod(String),

    #[error("Unknown payment status: {0}")]
    UnknownPaymentStatus(String),

    #[error("Unknown MDR type: {0}")]
    UnknownMdrType(String),

    /// Payment status may not move from `from` to `to`.
    #[error("Invalid status transition: cannot move from {from} to {to}")]
    InvalidStatusTransition {
        from: PaymentStatus,
        to: PaymentStatus,
    },

    /// Gateway expiry could not be parsed.
    #[error("Invalid gateway expiry time: {0}")]
    InvalidExpiry(String),
}
