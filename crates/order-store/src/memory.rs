use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{OrderId, TransactionNumber};
use domain::{
    MdrType, NewOrder, NewOrderItem, Order, OrderItem, PaymentMethod, PaymentMethodId,
    PaymentStatus,
};
use tokio::sync::RwLock;

use crate::{
    Result, StoreError,
    store::{OrderRepository, TransactionScope},
};

#[derive(Default)]
struct MemoryState {
    orders: BTreeMap<i64, Order>,
    items: Vec<OrderItem>,
    payment_methods: HashMap<i64, PaymentMethod>,
    next_order_id: i64,
    next_item_id: i64,
    fail_on_insert: bool,
    commits: usize,
    rollbacks: usize,
}

impl MemoryState {
    fn allocate_order_id(&mut self) -> i64 {
        self.next_order_id += 1;
        self.next_order_id
    }

    fn allocate_item_id(&mut self) -> i64 {
        self.next_item_id += 1;
        self.next_item_id
    }

    fn apply_status(
        &mut self,
        order_id: OrderId,
        from: PaymentStatus,
        to: PaymentStatus,
        at: DateTime<Utc>,
    ) -> bool {
        match self.orders.get_mut(&order_id.as_i64()) {
            Some(order) if order.deleted_at.is_none() && order.payment_status == from => {
                set_status(order, to, at);
                true
            }
            _ => false,
        }
    }
}

fn set_status(order: &mut Order, to: PaymentStatus, at: DateTime<Utc>) {
    order.payment_status = to;
    order.updated_at = at;
    if to == PaymentStatus::Success {
        order.paid_at = Some(at);
    }
}

/// In-memory order repository for testing and standalone runs.
///
/// Transactions buffer their writes and apply them at commit, so uncommitted
/// rows are invisible to readers and vanish on rollback. Ids are allocated at
/// insert time and are not reused after a rollback.
#[derive(Clone, Default)]
pub struct InMemoryOrderRepository {
    state: Arc<RwLock<MemoryState>>,
    open_transactions: Arc<AtomicUsize>,
}

impl InMemoryOrderRepository {
    /// Creates a new empty repository with no payment methods.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a repository with the default QRIS payment method (id 1).
    pub fn seeded() -> Self {
        Self::new().with_payment_method(PaymentMethod {
            id: PaymentMethodId::new(1),
            name: "QRIS".to_string(),
            mdr: 0.7,
            mdr_type: MdrType::Percentage,
        })
    }

    /// Adds a payment method.
    pub fn with_payment_method(self, method: PaymentMethod) -> Self {
        // Builder runs before the repository is shared, so the lock is free.
        if let Ok(mut state) = self.state.try_write() {
            state.payment_methods.insert(method.id.as_i64(), method);
        }
        self
    }

    /// Makes the next order inserts fail.
    pub async fn set_fail_on_insert(&self, fail: bool) {
        self.state.write().await.fail_on_insert = fail;
    }

    /// Returns the number of committed orders.
    pub async fn order_count(&self) -> usize {
        self.state.read().await.orders.len()
    }

    /// Returns the number of committed line items.
    pub async fn item_count(&self) -> usize {
        self.state.read().await.items.len()
    }

    pub async fn commit_count(&self) -> usize {
        self.state.read().await.commits
    }

    pub async fn rollback_count(&self) -> usize {
        self.state.read().await.rollbacks
    }

    /// Returns the number of transactions begun but not yet finished.
    pub fn open_transactions(&self) -> usize {
        self.open_transactions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OrderRepository for InMemoryOrderRepository {
    async fn begin(&self) -> Result<Box<dyn TransactionScope>> {
        self.open_transactions.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryTransactionScope {
            state: Arc::clone(&self.state),
            guard: OpenGuard(Arc::clone(&self.open_transactions)),
            orders: Vec::new(),
            items: Vec::new(),
            status_updates: Vec::new(),
        }))
    }

    async fn get_payment_method(&self, id: PaymentMethodId) -> Result<Option<PaymentMethod>> {
        Ok(self
            .state
            .read()
            .await
            .payment_methods
            .get(&id.as_i64())
            .cloned())
    }

    async fn get_order(&self, id: OrderId) -> Result<Option<Order>> {
        Ok(self
            .state
            .read()
            .await
            .orders
            .get(&id.as_i64())
            .filter(|o| o.deleted_at.is_none())
            .cloned())
    }

    async fn get_order_by_transaction_number(
        &self,
        transaction_number: TransactionNumber,
    ) -> Result<Option<Order>> {
        Ok(self
            .state
            .read()
            .await
            .orders
            .values()
            .find(|o| o.transaction_number == transaction_number && o.deleted_at.is_none())
            .cloned())
    }

    async fn get_order_items(&self, order_id: OrderId) -> Result<Vec<OrderItem>> {
        Ok(self
            .state
            .read()
            .await
            .items
            .iter()
            .filter(|i| i.order_id == order_id && i.deleted_at.is_none())
            .cloned()
            .collect())
    }

    async fn list_orders(&self) -> Result<Vec<Order>> {
        let state = self.state.read().await;
        let mut orders: Vec<_> = state
            .orders
            .values()
            .filter(|o| o.deleted_at.is_none())
            .cloned()
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(orders)
    }

    async fn find_expired_pending(&self, now: DateTime<Utc>) -> Result<Vec<Order>> {
        let state = self.state.read().await;
        let mut orders: Vec<_> = state
            .orders
            .values()
            .filter(|o| o.is_sweepable(now))
            .cloned()
            .collect();
        orders.sort_by(|a, b| a.expired_at.cmp(&b.expired_at).then(a.id.cmp(&b.id)));
        Ok(orders)
    }

    async fn update_payment_status(
        &self,
        order_id: OrderId,
        from: PaymentStatus,
        to: PaymentStatus,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        Ok(self.state.write().await.apply_status(order_id, from, to, at))
    }
}

struct OpenGuard(Arc<AtomicUsize>);

impl Drop for OpenGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

struct StatusUpdate {
    order_id: OrderId,
    from: PaymentStatus,
    to: PaymentStatus,
    at: DateTime<Utc>,
}

/// Buffered writes of one in-memory transaction.
struct MemoryTransactionScope {
    state: Arc<RwLock<MemoryState>>,
    guard: OpenGuard,
    orders: Vec<Order>,
    items: Vec<OrderItem>,
    status_updates: Vec<StatusUpdate>,
}

#[async_trait]
impl TransactionScope for MemoryTransactionScope {
    async fn insert_order(&mut self, order: &NewOrder) -> Result<OrderId> {
        let mut state = self.state.write().await;
        if state.fail_on_insert {
            return Err(StoreError::Unavailable("simulated insert failure".to_string()));
        }

        let duplicate = state
            .orders
            .values()
            .chain(self.orders.iter())
            .any(|o| o.transaction_number == order.transaction_number);
        if duplicate {
            return Err(StoreError::Unavailable(format!(
                "duplicate transaction number {}",
                order.transaction_number
            )));
        }

        let id = OrderId::new(state.allocate_order_id());
        let now = Utc::now();
        self.orders.push(Order {
            id,
            payment_method_id: order.payment_method_id,
            amount: order.amount,
            fee: order.fee,
            transaction_number: order.transaction_number,
            payment_status: PaymentStatus::Pending,
            expired_at: order.expired_at,
            paid_at: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        });
        Ok(id)
    }

    async fn insert_order_items(
        &mut self,
        order_id: OrderId,
        items: &[NewOrderItem],
    ) -> Result<()> {
        let mut state = self.state.write().await;
        let now = Utc::now();
        for item in items {
            let id = state.allocate_item_id();
            self.items.push(OrderItem {
                id,
                order_id,
                product_id: item.product_id.clone(),
                quantity: item.quantity,
                unit_amount: item.unit_amount,
                product_name: item.product_name.clone(),
                created_at: now,
                updated_at: now,
                deleted_at: None,
            });
        }
        Ok(())
    }

    async fn update_payment_status(
        &mut self,
        order_id: OrderId,
        from: PaymentStatus,
        to: PaymentStatus,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        if let Some(order) = self.orders.iter_mut().find(|o| o.id == order_id) {
            if order.payment_status != from {
                return Ok(false);
            }
            set_status(order, to, at);
            return Ok(true);
        }

        let applies = self
            .state
            .read()
            .await
            .orders
            .get(&order_id.as_i64())
            .is_some_and(|o| o.deleted_at.is_none() && o.payment_status == from);
        if applies {
            self.status_updates.push(StatusUpdate {
                order_id,
                from,
                to,
                at,
            });
        }
        Ok(applies)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let this = *self;
        let mut state = this.state.write().await;
        for order in this.orders {
            state.orders.insert(order.id.as_i64(), order);
        }
        state.items.extend(this.items);
        for update in this.status_updates {
            state.apply_status(update.order_id, update.from, update.to, update.at);
        }
        state.commits += 1;
        drop(this.guard);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.state.write().await.rollbacks += 1;
        Ok(())
    }
}
