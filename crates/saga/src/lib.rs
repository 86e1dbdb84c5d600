//! Order placement saga.
//!
//! Placing an order touches three systems that fail independently: the
//! catalog (prices and stock), the payment gateway and local storage. This
//! crate orchestrates them:
//! 1. Price the cart from the catalog
//! 2. Reserve stock (synchronous call behind a circuit breaker, or a broker
//!    round-trip)
//! 3. Charge the gateway
//! 4. Persist the order and its items in one transaction
//!
//! If a step after the reservation fails, the reserved stock is restored by
//! publishing a compensating message. Unpaid orders are expired by the
//! [`ExpirySweeper`], which feeds the same compensation path.

pub mod circuit_breaker;
mod compensation;
pub mod coordinator;
pub mod error;
pub mod services;
pub mod sweeper;

pub use circuit_breaker::{BreakerError, BreakerState, CircuitBreaker, CircuitBreakerSettings};
pub use coordinator::{OrderConfirmation, OrderDetails, OrderSaga, PlaceOrder};
pub use error::{ErrorKind, SagaError};
pub use services::{
    BrokerInventoryReserver, CatalogClient, CatalogError, HttpCatalogClient, InMemoryCatalog,
    InMemoryPaymentGateway, InventoryReserver, MidtransGateway, PaymentError, PaymentGateway,
    ReservationError, RpcInventoryReserver,
};
pub use sweeper::{DEFAULT_SWEEP_INTERVAL, ExpirySweeper};
