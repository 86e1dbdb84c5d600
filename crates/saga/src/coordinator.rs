//! Order placement saga and payment notification handling.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use common::{OrderId, TransactionNumber};
use domain::{
    CartLine, Money, NewOrder, NewOrderItem, Order, OrderError, OrderItem, PaymentMethod,
    PaymentMethodId, PaymentNotification, PaymentStatus, PaymentType, ProductId,
    ReservationIntent, order_total, parse_gateway_expiry, price_cart, validate_cart,
};
use messaging::RetryPublisher;
use order_store::{OrderRepository, StoreError, with_transaction};
use serde::{Deserialize, Serialize};
use tracing::field;

use crate::compensation::restore_stock;
use crate::error::{Result, SagaError};
use crate::services::{
    CatalogClient, ChargeItem, ChargeRequest, InventoryReserver, PaymentGateway, ReservationError,
};

/// Payment deadline used when the gateway does not send one.
fn default_payment_window() -> chrono::Duration {
    chrono::Duration::minutes(15)
}

/// Request to place an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceOrder {
    pub payment_method_id: PaymentMethodId,
    pub items: Vec<CartLine>,
}

/// Result of a successful placement.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderConfirmation {
    pub order_id: OrderId,
    pub transaction_number: TransactionNumber,
    pub status: PaymentStatus,
    pub amount: Money,
    pub fee: Money,
    pub payment_type: PaymentType,
    /// QR/deeplink URL or virtual account number for the customer.
    pub redemption: Option<String>,
    pub expires_at: DateTime<Utc>,
}

/// An order together with its line items.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderDetails {
    #[serde(flatten)]
    pub order: Order,
    pub items: Vec<OrderItem>,
}

/// Orchestrates order placement across the catalog, the payment gateway and
/// local storage.
///
/// Steps run strictly in sequence:
/// 1. Resolve the payment method and price the cart from the catalog
/// 2. Reserve stock
/// 3. Charge the gateway
/// 4. Persist the order and its items in one transaction
///
/// A failure after step 2 publishes a stock restore for the reservation.
pub struct OrderSaga {
    repository: Arc<dyn OrderRepository>,
    catalog: Arc<dyn CatalogClient>,
    reserver: Arc<dyn InventoryReserver>,
    gateway: Arc<dyn PaymentGateway>,
    publisher: RetryPublisher,
}

impl OrderSaga {
    pub fn new(
        repository: Arc<dyn OrderRepository>,
        catalog: Arc<dyn CatalogClient>,
        reserver: Arc<dyn InventoryReserver>,
        gateway: Arc<dyn PaymentGateway>,
        publisher: RetryPublisher,
    ) -> Self {
        Self {
            repository,
            catalog,
            reserver,
            gateway,
            publisher,
        }
    }

    /// Places an order for the given cart.
    #[tracing::instrument(
        skip(self, command),
        fields(
            payment_method_id = %command.payment_method_id,
            lines = command.items.len(),
            strategy = self.reserver.strategy(),
            transaction_number = field::Empty,
        )
    )]
    pub async fn place_order(&self, command: PlaceOrder) -> Result<OrderConfirmation> {
        metrics::counter!("saga_executions_total").increment(1);
        let started = Instant::now();

        let result = self.execute(command).await;

        let duration = started.elapsed().as_secs_f64();
        metrics::histogram!("saga_duration_seconds").record(duration);
        match &result {
            Ok(confirmation) => {
                metrics::counter!("saga_completed").increment(1);
                tracing::info!(
                    order_id = %confirmation.order_id,
                    amount = %confirmation.amount,
                    duration,
                    "order placed"
                );
            }
            Err(e) => {
                metrics::counter!("saga_failed").increment(1);
                tracing::warn!(error = %e, duration, "order placement failed");
            }
        }
        result
    }

    async fn execute(&self, command: PlaceOrder) -> Result<OrderConfirmation> {
        validate_cart(&command.items)?;

        let transaction_number = TransactionNumber::generate();
        tracing::Span::current().record("transaction_number", field::display(transaction_number));

        let method = self
            .repository
            .get_payment_method(command.payment_method_id)
            .await?
            .ok_or(SagaError::PaymentMethodNotFound(command.payment_method_id))?;
        let payment_type = method.payment_type()?;

        let product_ids: Vec<ProductId> = command
            .items
            .iter()
            .map(|line| line.product_id.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let prices = self.catalog.get_product_prices(&product_ids).await?;
        let items = price_cart(&command.items, &prices)?;
        let amount = order_total(&items);
        let fee = method.fee_for(amount);

        let intent = ReservationIntent::for_new_items(transaction_number, &items);
        if let Err(e) = self.reserver.reserve(&intent).await {
            let restore = e.may_have_applied();
            let cause = reservation_failure(transaction_number, e);
            if restore {
                return Err(self.abort(&intent, cause).await);
            }
            return Err(cause);
        }
        tracing::info!(step = "reserve_inventory", "saga step completed");

        let placed = self
            .charge_and_persist(PendingOrder {
                transaction_number,
                method: &method,
                payment_type,
                amount,
                fee,
                items,
            })
            .await;

        match placed {
            Ok(confirmation) => Ok(confirmation),
            Err(cause) => Err(self.abort(&intent, cause).await),
        }
    }

    async fn charge_and_persist(&self, pending: PendingOrder<'_>) -> Result<OrderConfirmation> {
        let request = ChargeRequest {
            transaction_number: pending.transaction_number,
            payment_type: pending.payment_type,
            gross_amount: pending.amount,
            items: pending.items.iter().map(ChargeItem::from).collect(),
        };
        let response = self.gateway.charge(&request).await?;
        if !response.is_created() {
            return Err(SagaError::PaymentRejected {
                status_code: response.status_code,
                message: response.status_message,
            });
        }
        tracing::info!(
            step = "charge_payment",
            gateway_transaction_id = %response.transaction_id,
            "saga step completed"
        );

        let expires_at = match response.expiry_time.as_deref() {
            Some(raw) => parse_gateway_expiry(raw)?,
            None => Utc::now() + default_payment_window(),
        };

        let new_order = NewOrder {
            payment_method_id: pending.method.id,
            amount: pending.amount,
            fee: pending.fee,
            transaction_number: pending.transaction_number,
            expired_at: expires_at,
        };
        let items: Vec<NewOrderItem> = pending.items;

        let order_id = with_transaction(self.repository.as_ref(), move |tx| {
            Box::pin(async move {
                let id = tx.insert_order(&new_order).await?;
                tx.insert_order_items(id, &items).await?;
                Ok::<_, StoreError>(id)
            })
        })
        .await
        .map_err(|e| {
            // The charge stands; only stock is given back.
            tracing::error!(
                component = "saga",
                gateway_transaction_id = %response.transaction_id,
                error = %e,
                "order not persisted after a successful charge; payment is not refunded"
            );
            SagaError::Store(e)
        })?;

        Ok(OrderConfirmation {
            order_id,
            transaction_number: pending.transaction_number,
            status: PaymentStatus::Pending,
            amount: pending.amount,
            fee: pending.fee,
            payment_type: pending.payment_type,
            redemption: response.redemption,
            expires_at,
        })
    }

    /// Restores the reservation and returns the error to report.
    async fn abort(&self, intent: &ReservationIntent, cause: SagaError) -> SagaError {
        match restore_stock(&self.publisher, intent, &cause.to_string()).await {
            Ok(()) => cause,
            Err(compensation) => compensation,
        }
    }

    /// Applies a payment notification from the gateway.
    ///
    /// Returns the order as it stands after the notification.
    #[tracing::instrument(
        skip(self, notification),
        fields(
            order_id = %notification.order_id,
            transaction_status = %notification.transaction_status,
        )
    )]
    pub async fn handle_payment_notification(
        &self,
        notification: &PaymentNotification,
    ) -> Result<Order> {
        let order = match notification.order_id.parse::<TransactionNumber>() {
            Ok(transaction_number) => {
                self.repository
                    .get_order_by_transaction_number(transaction_number)
                    .await?
            }
            Err(_) => None,
        };
        let Some(order) = order else {
            tracing::info!("notification for unknown transaction");
            return Err(SagaError::OrderNotFound(notification.order_id.clone()));
        };

        let now = Utc::now();
        if order.is_past_deadline(now) {
            return Err(SagaError::PaymentExpired(order.transaction_number));
        }

        let Some(next) = notification.resolved_status() else {
            tracing::debug!("notification carries no status change");
            return Ok(order);
        };
        if next == order.payment_status {
            return Ok(order);
        }
        if !order.payment_status.can_transition_to(next) {
            return Err(OrderError::InvalidStatusTransition {
                from: order.payment_status,
                to: next,
            }
            .into());
        }

        let applied = self
            .repository
            .update_payment_status(order.id, order.payment_status, next, now)
            .await?;

        if applied {
            tracing::info!(from = %order.payment_status, to = %next, "payment status updated");
            if next == PaymentStatus::Expired {
                let items = self.repository.get_order_items(order.id).await?;
                let intent = ReservationIntent::from_items(order.transaction_number, &items);
                restore_stock(&self.publisher, &intent, "payment cancelled by gateway").await?;
            }
        } else {
            tracing::debug!("order status changed concurrently");
        }

        self.repository
            .get_order(order.id)
            .await?
            .ok_or_else(|| SagaError::OrderNotFound(order.id.to_string()))
    }

    /// Returns an order with its line items.
    pub async fn get_order(&self, id: OrderId) -> Result<OrderDetails> {
        let order = self
            .repository
            .get_order(id)
            .await?
            .ok_or_else(|| SagaError::OrderNotFound(id.to_string()))?;
        let items = self.repository.get_order_items(id).await?;
        Ok(OrderDetails { order, items })
    }

    /// Returns all orders, newest first.
    pub async fn list_orders(&self) -> Result<Vec<Order>> {
        Ok(self.repository.list_orders().await?)
    }
}

/// Everything known about an order between reservation and persistence.
struct PendingOrder<'a> {
    transaction_number: TransactionNumber,
    method: &'a PaymentMethod,
    payment_type: PaymentType,
    amount: Money,
    fee: Money,
    items: Vec<NewOrderItem>,
}

fn reservation_failure(transaction_number: TransactionNumber, error: ReservationError) -> SagaError {
    match error {
        ReservationError::Rejected => SagaError::InsufficientStock(transaction_number),
        ReservationError::TimedOut => SagaError::ReservationTimedOut(transaction_number),
        ReservationError::CircuitOpen(name) => SagaError::CircuitOpen(name),
        ReservationError::Catalog(e) => SagaError::Catalog(e),
        ReservationError::Broker(e) => SagaError::Broker(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerSettings};
    use crate::error::ErrorKind;
    use crate::services::{InMemoryCatalog, InMemoryPaymentGateway, RpcInventoryReserver};
    use domain::{MdrType, PaymentMethod};
    use messaging::{BrokerMessage, InMemoryBroker, RetryPolicy};
    use order_store::InMemoryOrderRepository;

    struct Harness {
        saga: OrderSaga,
        repo: InMemoryOrderRepository,
        catalog: InMemoryCatalog,
        gateway: InMemoryPaymentGateway,
        broker: InMemoryBroker,
    }

    async fn harness() -> Harness {
        let repo = InMemoryOrderRepository::seeded().with_payment_method(PaymentMethod {
            id: PaymentMethodId::new(2),
            name: "Cash".to_string(),
            mdr: 0.0,
            mdr_type: MdrType::Fixed,
        });
        let catalog = InMemoryCatalog::new()
            .with_product("P1", "Coffee", 10.0, 10)
            .with_product("P2", "Tea", 7.5, 1);
        let gateway = InMemoryPaymentGateway::new();
        let broker = InMemoryBroker::new();
        catalog
            .serve_broker(Arc::new(broker.clone()), Arc::new(broker.clone()))
            .await
            .unwrap();

        let reserver = RpcInventoryReserver::new(
            Arc::new(catalog.clone()),
            Arc::new(CircuitBreaker::new(CircuitBreakerSettings::new("catalog"))),
        );
        let publisher = RetryPublisher::with_policy(
            Arc::new(broker.clone()),
            RetryPolicy::new(3, Duration::from_millis(10)),
        );

        let saga = OrderSaga::new(
            Arc::new(repo.clone()),
            Arc::new(catalog.clone()),
            Arc::new(reserver),
            Arc::new(gateway.clone()),
            publisher,
        );

        Harness {
            saga,
            repo,
            catalog,
            gateway,
            broker,
        }
    }

    fn qris(items: Vec<CartLine>) -> PlaceOrder {
        PlaceOrder {
            payment_method_id: PaymentMethodId::new(1),
            items,
        }
    }

    async fn restores(broker: &InMemoryBroker) -> Vec<ReservationIntent> {
        broker
            .published_messages()
            .await
            .into_iter()
            .filter_map(|m| match m {
                BrokerMessage::RestoreProductStock(intent) => Some(intent),
                _ => None,
            })
            .collect()
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(30)).await;
    }

    #[tokio::test]
    async fn test_place_order_prices_from_catalog() {
        let h = harness().await;

        let confirmation = h
            .saga
            .place_order(qris(vec![CartLine::new("P1", 2), CartLine::new("P2", 1)]))
            .await
            .unwrap();

        assert_eq!(confirmation.amount, Money::from_cents(2750));
        // 0.7% of 27.50
        assert_eq!(confirmation.fee, Money::from_cents(19));
        assert_eq!(confirmation.status, PaymentStatus::Pending);
        assert_eq!(confirmation.payment_type, PaymentType::Qris);
        assert!(confirmation.redemption.is_some());

        let details = h.saga.get_order(confirmation.order_id).await.unwrap();
        assert_eq!(details.order.transaction_number, confirmation.transaction_number);
        assert_eq!(details.items.len(), 2);
        assert_eq!(details.items[0].product_name, "Coffee");
        assert_eq!(h.catalog.quantity_of("P1"), Some(8));
        assert_eq!(h.catalog.quantity_of("P2"), Some(0));

        let charge = h.gateway.last_charge().unwrap();
        assert_eq!(charge.transaction_number, confirmation.transaction_number);
        assert_eq!(charge.gross_amount, Money::from_cents(2750));
    }

    #[tokio::test]
    async fn test_invalid_cart_is_rejected_before_any_call() {
        let h = harness().await;

        let err = h.saga.place_order(qris(vec![])).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadRequest);

        let err = h
            .saga
            .place_order(qris(vec![CartLine::new("P1", 0)]))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadRequest);
        assert_eq!(h.catalog.batch_calls(), 0);
    }

    #[tokio::test]
    async fn test_unknown_payment_method_reserves_nothing() {
        let h = harness().await;

        let err = h
            .saga
            .place_order(PlaceOrder {
                payment_method_id: PaymentMethodId::new(99),
                items: vec![CartLine::new("P1", 1)],
            })
            .await
            .unwrap_err();

        assert!(matches!(err, SagaError::PaymentMethodNotFound(_)));
        assert_eq!(h.catalog.batch_calls(), 0);
    }

    #[tokio::test]
    async fn test_unsupported_payment_method_is_bad_request() {
        let h = harness().await;

        let err = h
            .saga
            .place_order(PlaceOrder {
                payment_method_id: PaymentMethodId::new(2),
                items: vec![CartLine::new("P1", 1)],
            })
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::BadRequest);
        assert_eq!(h.catalog.batch_calls(), 0);
    }

    #[tokio::test]
    async fn test_unknown_product_fails_before_reservation() {
        let h = harness().await;

        let err = h
            .saga
            .place_order(qris(vec![CartLine::new("P1", 1), CartLine::new("P9", 1)]))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(h.catalog.batch_calls(), 0);
        assert!(restores(&h.broker).await.is_empty());
    }

    #[tokio::test]
    async fn test_insufficient_stock_is_conflict_without_restore() {
        let h = harness().await;

        let err = h
            .saga
            .place_order(qris(vec![CartLine::new("P2", 100)]))
            .await
            .unwrap_err();

        assert!(matches!(err, SagaError::InsufficientStock(_)));
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(h.repo.order_count().await, 0);
        assert_eq!(h.gateway.charge_count(), 0);
        assert!(restores(&h.broker).await.is_empty());
    }

    #[tokio::test]
    async fn test_charge_failure_restores_stock() {
        let h = harness().await;
        h.gateway.set_fail_on_charge(true);

        let err = h
            .saga
            .place_order(qris(vec![CartLine::new("P1", 3)]))
            .await
            .unwrap_err();
        settle().await;

        assert_eq!(err.kind(), ErrorKind::BadGateway);
        assert_eq!(h.repo.order_count().await, 0);
        let restored = restores(&h.broker).await;
        assert_eq!(restored.len(), 1);
        assert_eq!(restored[0].total_quantity(), 3);
        assert_eq!(h.catalog.quantity_of("P1"), Some(10));
    }

    #[tokio::test]
    async fn test_charge_not_created_restores_stock() {
        let h = harness().await;
        h.gateway.set_status_code("406");

        let err = h
            .saga
            .place_order(qris(vec![CartLine::new("P1", 1)]))
            .await
            .unwrap_err();
        settle().await;

        assert!(matches!(err, SagaError::PaymentRejected { ref status_code, .. } if status_code == "406"));
        assert_eq!(h.catalog.quantity_of("P1"), Some(10));
    }

    #[tokio::test]
    async fn test_persistence_failure_restores_stock_and_rolls_back() {
        let h = harness().await;
        h.repo.set_fail_on_insert(true).await;

        let err = h
            .saga
            .place_order(qris(vec![CartLine::new("P1", 2)]))
            .await
            .unwrap_err();
        settle().await;

        assert_eq!(err.kind(), ErrorKind::Internal);
        assert_eq!(h.repo.order_count().await, 0);
        assert_eq!(h.repo.rollback_count().await, 1);
        assert_eq!(h.repo.open_transactions(), 0);
        // Charged but not refunded.
        assert_eq!(h.gateway.charge_count(), 1);
        assert_eq!(h.catalog.quantity_of("P1"), Some(10));
    }

    #[tokio::test]
    async fn test_failed_restore_is_reported() {
        let h = harness().await;
        h.gateway.set_fail_on_charge(true);
        h.broker.fail_next_publishes(3).await;

        let err = h
            .saga
            .place_order(qris(vec![CartLine::new("P1", 4)]))
            .await
            .unwrap_err();

        assert!(matches!(err, SagaError::CompensationFailed { .. }));
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert_eq!(h.catalog.quantity_of("P1"), Some(6));
    }

    fn notification(transaction_number: TransactionNumber, status: &str) -> PaymentNotification {
        PaymentNotification {
            order_id: transaction_number.to_string(),
            transaction_status: status.to_string(),
            fraud_status: "accept".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_settlement_marks_order_paid() {
        let h = harness().await;
        let placed = h
            .saga
            .place_order(qris(vec![CartLine::new("P1", 1)]))
            .await
            .unwrap();

        let order = h
            .saga
            .handle_payment_notification(&notification(placed.transaction_number, "settlement"))
            .await
            .unwrap();

        assert_eq!(order.payment_status, PaymentStatus::Success);
        assert!(order.paid_at.is_some());

        // Repeating the notification changes nothing.
        let again = h
            .saga
            .handle_payment_notification(&notification(placed.transaction_number, "settlement"))
            .await
            .unwrap();
        assert_eq!(again, order);
    }

    #[tokio::test]
    async fn test_pending_notification_is_a_no_op() {
        let h = harness().await;
        let placed = h
            .saga
            .place_order(qris(vec![CartLine::new("P1", 1)]))
            .await
            .unwrap();

        let order = h
            .saga
            .handle_payment_notification(&notification(placed.transaction_number, "pending"))
            .await
            .unwrap();

        assert_eq!(order.payment_status, PaymentStatus::Pending);
    }

    #[tokio::test]
    async fn test_cancel_after_success_is_a_conflict() {
        let h = harness().await;
        let placed = h
            .saga
            .place_order(qris(vec![CartLine::new("P1", 1)]))
            .await
            .unwrap();
        h.saga
            .handle_payment_notification(&notification(placed.transaction_number, "capture"))
            .await
            .unwrap();

        let err = h
            .saga
            .handle_payment_notification(&notification(placed.transaction_number, "cancel"))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn test_gateway_cancel_expires_order_and_restores_stock() {
        let h = harness().await;
        let placed = h
            .saga
            .place_order(qris(vec![CartLine::new("P1", 5)]))
            .await
            .unwrap();
        assert_eq!(h.catalog.quantity_of("P1"), Some(5));

        let order = h
            .saga
            .handle_payment_notification(&notification(placed.transaction_number, "cancel"))
            .await
            .unwrap();
        settle().await;

        assert_eq!(order.payment_status, PaymentStatus::Expired);
        assert_eq!(h.catalog.quantity_of("P1"), Some(10));
    }

    #[tokio::test]
    async fn test_notification_after_deadline_is_rejected() {
        let h = harness().await;
        h.gateway.set_payment_window(chrono::Duration::seconds(-60));
        let placed = h
            .saga
            .place_order(qris(vec![CartLine::new("P1", 1)]))
            .await
            .unwrap();

        let err = h
            .saga
            .handle_payment_notification(&notification(placed.transaction_number, "settlement"))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::PaymentExpired);
    }

    #[tokio::test]
    async fn test_notification_for_unknown_transaction_is_not_found() {
        let h = harness().await;

        for order_id in [TransactionNumber::generate().to_string(), "garbage".to_string()] {
            let err = h
                .saga
                .handle_payment_notification(&PaymentNotification {
                    order_id,
                    transaction_status: "settlement".to_string(),
                    ..Default::default()
                })
                .await
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::NotFound);
        }
    }

    #[tokio::test]
    async fn test_list_orders_newest_first() {
        let h = harness().await;
        let first = h
            .saga
            .place_order(qris(vec![CartLine::new("P1", 1)]))
            .await
            .unwrap();
        let second = h
            .saga
            .place_order(qris(vec![CartLine::new("P1", 1)]))
            .await
            .unwrap();

        let orders = h.saga.list_orders().await.unwrap();
        assert_eq!(orders.len(), 2);
        assert_eq!(orders[0].id, second.order_id);
        assert_eq!(orders[1].id, first.order_id);
    }
}
