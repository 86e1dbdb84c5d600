//! Catalog service client: product prices and stock reservation.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use common::TransactionNumber;
use domain::{Money, ProductId, ProductPrice, ReservationIntent};
use futures_util::StreamExt;
use messaging::{BrokerMessage, MessagePublisher, MessageSubscriber, StockUpdate};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// Errors returned by a [`CatalogClient`].
#[derive(Debug, Error)]
pub enum CatalogError {
    /// The catalog refused the reservation; nothing was decremented.
    #[error("Insufficient stock")]
    InsufficientStock,

    #[error("Catalog request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The catalog answered with an unexpected status.
    #[error("Catalog returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Catalog unavailable: {0}")]
    Unavailable(String),
}

impl CatalogError {
    /// True for a definitive business answer, as opposed to an infrastructure
    /// failure.
    pub fn is_business_rejection(&self) -> bool {
        matches!(self, CatalogError::InsufficientStock)
    }

    /// True when the request may have reached the catalog without an answer.
    pub fn is_timeout(&self) -> bool {
        matches!(self, CatalogError::Http(e) if e.is_timeout())
    }
}

/// Operations the order service needs from the catalog.
#[async_trait]
pub trait CatalogClient: Send + Sync {
    /// Returns price records for the given ids. Unknown ids are omitted.
    async fn get_product_prices(
        &self,
        product_ids: &[ProductId],
    ) -> Result<Vec<ProductPrice>, CatalogError>;

    /// Decrements stock for every line of `intent`, or for none of them.
    async fn update_product_quantity_batch(
        &self,
        intent: &ReservationIntent,
    ) -> Result<(), CatalogError>;
}

#[derive(Serialize)]
struct PricesRequest<'a> {
    product_ids: &'a [ProductId],
}

#[derive(Deserialize)]
struct PricesResponse {
    data: PricesData,
}

#[derive(Deserialize)]
struct PricesData {
    #[serde(default)]
    records: Vec<PriceRecord>,
}

#[derive(Deserialize)]
struct PriceRecord {
    id: ProductId,
    name: String,
    price: f64,
    #[serde(default)]
    quantity: i64,
}

impl From<PriceRecord> for ProductPrice {
    fn from(record: PriceRecord) -> Self {
        ProductPrice {
            id: record.id,
            name: record.name,
            price: Money::from_decimal(record.price),
            quantity: record.quantity,
        }
    }
}

/// JSON-over-HTTP catalog client.
pub struct HttpCatalogClient {
    client: Client,
    base_url: String,
}

impl HttpCatalogClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, CatalogError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn unexpected(response: reqwest::Response) -> CatalogError {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        CatalogError::Status {
            status,
            body: body.chars().take(200).collect(),
        }
    }
}

#[async_trait]
impl CatalogClient for HttpCatalogClient {
    #[tracing::instrument(skip(self), fields(count = product_ids.len()))]
    async fn get_product_prices(
        &self,
        product_ids: &[ProductId],
    ) -> Result<Vec<ProductPrice>, CatalogError> {
        let response = self
            .client
            .post(self.url("/api/v1/products/prices"))
            .json(&PricesRequest { product_ids })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::unexpected(response).await);
        }

        let body: PricesResponse = response.json().await?;
        Ok(body.data.records.into_iter().map(ProductPrice::from).collect())
    }

    #[tracing::instrument(skip(self, intent), fields(transaction_number = %intent.transaction_number))]
    async fn update_product_quantity_batch(
        &self,
        intent: &ReservationIntent,
    ) -> Result<(), CatalogError> {
        let response = self
            .client
            .post(self.url("/api/v1/products/quantities/batch"))
            .json(intent)
            .send()
            .await?;

        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::CONFLICT => Err(CatalogError::InsufficientStock),
            _ => Err(Self::unexpected(response).await),
        }
    }
}

#[derive(Debug, Clone)]
struct StockRecord {
    name: String,
    price: Money,
    quantity: i64,
}

#[derive(Debug, Default)]
struct CatalogState {
    products: BTreeMap<ProductId, StockRecord>,
    unavailable: bool,
    silent: bool,
    batch_calls: usize,
    restores: usize,
    /// Outcome of every reservation applied, by transaction.
    reserved: HashMap<TransactionNumber, bool>,
    restored: HashSet<TransactionNumber>,
}

impl CatalogState {
    /// Decrements every line or none. Returns false when any line is short.
    ///
    /// A transaction is applied at most once; a redelivered request gets the
    /// first outcome again.
    fn reserve(&mut self, intent: &ReservationIntent) -> bool {
        if let Some(status) = self.reserved.get(&intent.transaction_number) {
            debug!(transaction_number = %intent.transaction_number, "duplicate reservation");
            return *status;
        }
        let status = self.decrement(intent);
        self.reserved.insert(intent.transaction_number, status);
        status
    }

    fn decrement(&mut self, intent: &ReservationIntent) -> bool {
        let mut wanted: BTreeMap<&ProductId, i64> = BTreeMap::new();
        for line in &intent.order_items {
            *wanted.entry(&line.product_id).or_default() += i64::from(line.quantity);
        }

        let enough = wanted.iter().all(|(id, qty)| {
            self.products
                .get(*id)
                .is_some_and(|record| record.quantity >= *qty)
        });
        if !enough {
            return false;
        }

        for line in &intent.order_items {
            if let Some(record) = self.products.get_mut(&line.product_id) {
                record.quantity -= i64::from(line.quantity);
            }
        }
        true
    }

    /// Gives the stock of an applied reservation back, once per transaction.
    /// Returns false when there is nothing to give back.
    fn restore(&mut self, intent: &ReservationIntent) -> bool {
        let txn = intent.transaction_number;
        if self.reserved.get(&txn) != Some(&true) || !self.restored.insert(txn) {
            return false;
        }
        for line in &intent.order_items {
            if let Some(record) = self.products.get_mut(&line.product_id) {
                record.quantity += i64::from(line.quantity);
            }
        }
        self.restores += 1;
        true
    }
}

/// In-memory catalog for standalone mode and tests.
///
/// Answers the synchronous client calls directly and, through
/// [`InMemoryCatalog::serve_broker`], the broker reservation protocol.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCatalog {
    state: Arc<RwLock<CatalogState>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a product with a decimal price and stock on hand.
    pub fn with_product(self, id: &str, name: &str, price: f64, quantity: i64) -> Self {
        self.write().products.insert(
            ProductId::new(id),
            StockRecord {
                name: name.to_string(),
                price: Money::from_decimal(price),
                quantity,
            },
        );
        self
    }

    /// Returns the stock on hand of a product.
    pub fn quantity_of(&self, id: &str) -> Option<i64> {
        self.read()
            .products
            .get(&ProductId::new(id))
            .map(|record| record.quantity)
    }

    /// Makes every client call fail as if the catalog were down.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.write().unavailable = unavailable;
    }

    /// Applies broker reservations without replying to them.
    pub fn set_silent(&self, silent: bool) {
        self.write().silent = silent;
    }

    /// Returns the number of reservation calls that reached the catalog.
    pub fn batch_calls(&self) -> usize {
        self.read().batch_calls
    }

    /// Returns the number of restore messages applied.
    pub fn restore_count(&self) -> usize {
        self.read().restores
    }

    /// Consumes reservation and restore messages from `subscriber` and
    /// replies on `publisher`.
    ///
    /// The subscription is open when this returns.
    pub async fn serve_broker(
        &self,
        subscriber: Arc<dyn MessageSubscriber>,
        publisher: Arc<dyn MessagePublisher>,
    ) -> messaging::Result<JoinHandle<()>> {
        let mut stream = subscriber.subscribe().await?;
        let catalog = self.clone();

        Ok(tokio::spawn(async move {
            while let Some(item) = stream.next().await {
                let message = match item.map(|payload| BrokerMessage::decode(&payload)) {
                    Ok(Ok(message)) => message,
                    Ok(Err(e)) | Err(e) => {
                        warn!(component = "catalog", error = %e, "skipping message");
                        continue;
                    }
                };

                match message {
                    BrokerMessage::OrderCreated(intent) => {
                        let (status, silent) = {
                            let mut state = catalog.write();
                            state.batch_calls += 1;
                            (state.reserve(&intent), state.silent)
                        };
                        debug!(transaction_number = %intent.transaction_number, status, "reservation handled");
                        if silent {
                            continue;
                        }

                        let reply = BrokerMessage::StockUpdated(StockUpdate {
                            transaction_number: intent.transaction_number,
                            status,
                        });
                        let key = intent.transaction_number.to_string();
                        let sent = match reply.encode() {
                            Ok(payload) => publisher.publish(&payload, Some(&key)).await,
                            Err(e) => Err(e),
                        };
                        if let Err(e) = sent {
                            error!(component = "catalog", error = %e, "failed to reply to reservation");
                        }
                    }
                    BrokerMessage::RestoreProductStock(intent) => {
                        let txn = intent.transaction_number;
                        if catalog.write().restore(&intent) {
                            debug!(transaction_number = %txn, "stock restored");
                        } else {
                            debug!(transaction_number = %txn, "restore skipped");
                        }
                    }
                    BrokerMessage::StockUpdated(_) => {}
                }
            }
        }))
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, CatalogState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, CatalogState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl CatalogClient for InMemoryCatalog {
    async fn get_product_prices(
        &self,
        product_ids: &[ProductId],
    ) -> Result<Vec<ProductPrice>, CatalogError> {
        let state = self.read();
        if state.unavailable {
            return Err(CatalogError::Unavailable("catalog is down".to_string()));
        }

        Ok(product_ids
            .iter()
            .filter_map(|id| {
                state.products.get(id).map(|record| ProductPrice {
                    id: id.clone(),
                    name: record.name.clone(),
                    price: record.price,
                    quantity: record.quantity,
                })
            })
            .collect())
    }

    async fn update_product_quantity_batch(
        &self,
        intent: &ReservationIntent,
    ) -> Result<(), CatalogError> {
        let mut state = self.write();
        state.batch_calls += 1;
        if state.unavailable {
            return Err(CatalogError::Unavailable("catalog is down".to_string()));
        }
        if state.reserve(intent) {
            Ok(())
        } else {
            Err(CatalogError::InsufficientStock)
        }
    }
}
