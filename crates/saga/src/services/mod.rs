//! Clients for the services the saga talks to, with in-memory implementations.

pub mod catalog;
pub mod inventory;
pub mod payment;

pub use catalog::{CatalogClient, CatalogError, HttpCatalogClient, InMemoryCatalog};
pub use inventory::{
    BrokerInventoryReserver, DEFAULT_RESERVATION_TIMEOUT, InventoryReserver, ReservationError,
    RpcInventoryReserver,
};
pub use payment::{
    ChargeItem, ChargeRequest, ChargeResponse, InMemoryPaymentGateway, MidtransGateway,
    PaymentError, PaymentGateway,
};
