//! Domain layer for order placement.
//!
//! This crate holds the pure parts of the order service:
//! - Order and line item records, and the payment status state machine
//! - Money in minor units and cart pricing against catalog prices
//! - Payment methods, their fee rules and gateway instruments
//! - Reservation intents shared by the reservation and restore paths
//! - Mapping of gateway payment notifications and expiry timestamps

pub mod order;

pub use order::{
    CartLine, MdrType, Money, NewOrder, NewOrderItem, Order, OrderError, OrderItem,
    PaymentMethod, PaymentMethodId, PaymentNotification, PaymentStatus, PaymentType, ProductId,
    ProductPrice, ReservationIntent, ReservationLine, format_gateway_expiry, order_total,
    parse_gateway_expiry, price_cart, validate_cart,
};
