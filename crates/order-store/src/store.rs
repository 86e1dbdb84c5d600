use std::panic::AssertUnwindSafe;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{OrderId, TransactionNumber};
use domain::{NewOrder, NewOrderItem, Order, OrderItem, PaymentMethod, PaymentMethodId, PaymentStatus};
use futures_util::FutureExt;
use futures_util::future::BoxFuture;

use crate::{Result, StoreError};

/// Writes that must land together or not at all.
///
/// Obtained from [`OrderRepository::begin`]. Writes are only visible to other
/// readers after [`TransactionScope::commit`]. A scope dropped without commit
/// is rolled back.
#[async_trait]
pub trait TransactionScope: Send {
    /// Inserts an order row and returns its assigned id.
    async fn insert_order(&mut self, order: &NewOrder) -> Result<OrderId>;

    /// Inserts the line items of an order.
    async fn insert_order_items(&mut self, order_id: OrderId, items: &[NewOrderItem])
    -> Result<()>;

    /// Moves an order from `from` to `to` if it is currently in `from`.
    ///
    /// Returns false when the order is missing or in another status.
    async fn update_payment_status(
        &mut self,
        order_id: OrderId,
        from: PaymentStatus,
        to: PaymentStatus,
        at: DateTime<Utc>,
    ) -> Result<bool>;

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;
}

/// Storage for orders, their line items and the payment methods they reference.
///
/// All implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait OrderRepository: Send + Sync {
    /// Opens a new transaction.
    async fn begin(&self) -> Result<Box<dyn TransactionScope>>;

    async fn get_payment_method(&self, id: PaymentMethodId) -> Result<Option<PaymentMethod>>;

    async fn get_order(&self, id: OrderId) -> Result<Option<Order>>;

    async fn get_order_by_transaction_number(
        &self,
        transaction_number: TransactionNumber,
    ) -> Result<Option<Order>>;

    /// Returns the line items of an order in insertion order.
    async fn get_order_items(&self, order_id: OrderId) -> Result<Vec<OrderItem>>;

    /// Returns all live orders, newest first.
    async fn list_orders(&self) -> Result<Vec<Order>>;

    /// Returns live pending orders whose deadline is before `now`, oldest first.
    async fn find_expired_pending(&self, now: DateTime<Utc>) -> Result<Vec<Order>>;

    /// Conditional status transition outside of an explicit transaction.
    ///
    /// Returns false when the order is missing or not in `from`.
    async fn update_payment_status(
        &self,
        order_id: OrderId,
        from: PaymentStatus,
        to: PaymentStatus,
        at: DateTime<Utc>,
    ) -> Result<bool>;
}

/// Runs `work` inside a transaction.
///
/// Commits when `work` returns `Ok`, rolls back when it returns `Err`. If
/// `work` panics the transaction is rolled back and the panic resumed. Helpers
/// called from `work` share the same scope, so nested writes join the
/// enclosing transaction.
///
/// ```ignore
/// let id = with_transaction(repo, move |tx| {
///     Box::pin(async move {
///         let id = tx.insert_order(&order).await?;
///         tx.insert_order_items(id, &items).await?;
///         Ok::<_, StoreError>(id)
///     })
/// })
/// .await?;
/// ```
pub async fn with_transaction<R, T, E, F>(repo: &R, work: F) -> std::result::Result<T, E>
where
    R: OrderRepository + ?Sized,
    E: From<StoreError>,
    F: for<'t> FnOnce(
        &'t mut (dyn TransactionScope + 'static),
    ) -> BoxFuture<'t, std::result::Result<T, E>>,
{
    let mut scope = repo.begin().await?;

    let outcome = AssertUnwindSafe(work(scope.as_mut())).catch_unwind().await;

    match outcome {
        Ok(Ok(value)) => {
            scope.commit().await?;
            Ok(value)
        }
        Ok(Err(err)) => {
            if let Err(rollback_err) = scope.rollback().await {
                tracing::error!(component = "order-store", error = %rollback_err, "rollback failed");
            }
            Err(err)
        }
        Err(panic) => {
            if let Err(rollback_err) = scope.rollback().await {
                tracing::error!(
                    component = "order-store",
                    error = %rollback_err,
                    "rollback after panic failed"
                );
            }
            std::panic::resume_unwind(panic)
        }
    }
}
