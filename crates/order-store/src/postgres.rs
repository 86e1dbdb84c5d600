use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{OrderId, TransactionNumber};
use domain::{
    Money, NewOrder, NewOrderItem, Order, OrderItem, PaymentMethod, PaymentMethodId,
    PaymentStatus, ProductId,
};
use sqlx::{PgPool, Postgres, Row, Transaction, postgres::PgRow};
use uuid::Uuid;

use crate::{
    Result, StoreError,
    store::{OrderRepository, TransactionScope},
};

const ORDER_COLUMNS: &str = "id, payment_method_id, amount_cents, fee_cents, transaction_number, \
     payment_status, expired_at, paid_at, created_at, updated_at, deleted_at";

const UPDATE_STATUS_SQL: &str = r#"
    UPDATE orders
    SET payment_status = $1,
        paid_at = COALESCE($2, paid_at),
        updated_at = $3
    WHERE id = $4 AND payment_status = $5 AND deleted_at IS NULL
"#;

/// PostgreSQL-backed order repository.
#[derive(Clone)]
pub struct PostgresOrderRepository {
    pool: PgPool,
}

impl PostgresOrderRepository {
    /// Creates a new PostgreSQL order repository.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    fn row_to_order(row: PgRow) -> Result<Order> {
        let status: String = row.try_get("payment_status")?;
        Ok(Order {
            id: OrderId::new(row.try_get("id")?),
            payment_method_id: PaymentMethodId::new(row.try_get("payment_method_id")?),
            amount: Money::from_cents(row.try_get("amount_cents")?),
            fee: Money::from_cents(row.try_get("fee_cents")?),
            transaction_number: TransactionNumber::from_uuid(
                row.try_get::<Uuid, _>("transaction_number")?,
            ),
            payment_status: status
                .parse()
                .map_err(|e: domain::OrderError| StoreError::Corrupt(e.to_string()))?,
            expired_at: row.try_get("expired_at")?,
            paid_at: row.try_get("paid_at")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            deleted_at: row.try_get("deleted_at")?,
        })
    }

    fn row_to_item(row: PgRow) -> Result<OrderItem> {
        let quantity: i32 = row.try_get("quantity")?;
        Ok(OrderItem {
            id: row.try_get("id")?,
            order_id: OrderId::new(row.try_get("order_id")?),
            product_id: ProductId::new(row.try_get::<String, _>("product_id")?),
            quantity: u32::try_from(quantity)
                .map_err(|_| StoreError::Corrupt(format!("negative quantity {quantity}")))?,
            unit_amount: Money::from_cents(row.try_get("unit_amount_cents")?),
            product_name: row.try_get("product_name")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            deleted_at: row.try_get("deleted_at")?,
        })
    }

    fn row_to_payment_method(row: PgRow) -> Result<PaymentMethod> {
        let mdr_type: String = row.try_get("mdr_type")?;
        Ok(PaymentMethod {
            id: PaymentMethodId::new(row.try_get("id")?),
            name: row.try_get("name")?,
            mdr: row.try_get("mdr")?,
            mdr_type: mdr_type
                .parse()
                .map_err(|e: domain::OrderError| StoreError::Corrupt(e.to_string()))?,
        })
    }
}

fn paid_at_for(to: PaymentStatus, at: DateTime<Utc>) -> Option<DateTime<Utc>> {
    (to == PaymentStatus::Success).then_some(at)
}

#[async_trait]
impl OrderRepository for PostgresOrderRepository {
    async fn begin(&self) -> Result<Box<dyn TransactionScope>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgTransactionScope { tx }))
    }

    async fn get_payment_method(&self, id: PaymentMethodId) -> Result<Option<PaymentMethod>> {
        let row: Option<PgRow> = sqlx::query(
            r#"
            SELECT id, name, mdr, mdr_type
            FROM payment_methods
            WHERE id = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(id.as_i64())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_payment_method).transpose()
    }

    async fn get_order(&self, id: OrderId) -> Result<Option<Order>> {
        let sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1 AND deleted_at IS NULL");
        let row = sqlx::query(&sql)
            .bind(id.as_i64())
            .fetch_optional(&self.pool)
            .await?;

        row.map(Self::row_to_order).transpose()
    }

    async fn get_order_by_transaction_number(
        &self,
        transaction_number: TransactionNumber,
    ) -> Result<Option<Order>> {
        let sql = format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE transaction_number = $1 AND deleted_at IS NULL"
        );
        let row = sqlx::query(&sql)
            .bind(transaction_number.as_uuid())
            .fetch_optional(&self.pool)
            .await?;

        row.map(Self::row_to_order).transpose()
    }

    async fn get_order_items(&self, order_id: OrderId) -> Result<Vec<OrderItem>> {
        let rows = sqlx::query(
            r#"
            SELECT id, order_id, product_id, quantity, unit_amount_cents, product_name,
                   created_at, updated_at, deleted_at
            FROM order_items
            WHERE order_id = $1 AND deleted_at IS NULL
            ORDER BY id ASC
            "#,
        )
        .bind(order_id.as_i64())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_item).collect()
    }

    async fn list_orders(&self) -> Result<Vec<Order>> {
        let sql = format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE deleted_at IS NULL ORDER BY created_at DESC, id DESC"
        );
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;

        rows.into_iter().map(Self::row_to_order).collect()
    }

    async fn find_expired_pending(&self, now: DateTime<Utc>) -> Result<Vec<Order>> {
        let sql = format!(
            "SELECT {ORDER_COLUMNS} FROM orders \
             WHERE payment_status = 'pending' AND expired_at < $1 AND deleted_at IS NULL \
             ORDER BY expired_at ASC, id ASC"
        );
        let rows = sqlx::query(&sql).bind(now).fetch_all(&self.pool).await?;

        rows.into_iter().map(Self::row_to_order).collect()
    }

    async fn update_payment_status(
        &self,
        order_id: OrderId,
        from: PaymentStatus,
        to: PaymentStatus,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(UPDATE_STATUS_SQL)
            .bind(to.as_str())
            .bind(paid_at_for(to, at))
            .bind(at)
            .bind(order_id.as_i64())
            .bind(from.as_str())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() == 1)
    }
}

/// An open PostgreSQL transaction.
///
/// sqlx rolls the transaction back if this is dropped without commit.
pub struct PgTransactionScope {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl TransactionScope for PgTransactionScope {
    async fn insert_order(&mut self, order: &NewOrder) -> Result<OrderId> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO orders (payment_method_id, amount_cents, fee_cents, transaction_number, payment_status, expired_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id
            "#,
        )
        .bind(order.payment_method_id.as_i64())
        .bind(order.amount.cents())
        .bind(order.fee.cents())
        .bind(order.transaction_number.as_uuid())
        .bind(PaymentStatus::Pending.as_str())
        .bind(order.expired_at)
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(OrderId::new(id))
    }

    async fn insert_order_items(
        &mut self,
        order_id: OrderId,
        items: &[NewOrderItem],
    ) -> Result<()> {
        for item in items {
            let quantity = i32::try_from(item.quantity)
                .map_err(|_| StoreError::Corrupt(format!("quantity {} too large", item.quantity)))?;

            sqlx::query(
                r#"
                INSERT INTO order_items (order_id, product_id, quantity, unit_amount_cents, product_name)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(order_id.as_i64())
            .bind(item.product_id.as_str())
            .bind(quantity)
            .bind(item.unit_amount.cents())
            .bind(&item.product_name)
            .execute(&mut *self.tx)
            .await?;
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
        let result = sqlx::query(UPDATE_STATUS_SQL)
            .bind(to.as_str())
            .bind(paid_at_for(to, at))
            .bind(at)
            .bind(order_id.as_i64())
            .bind(from.as_str())
            .execute(&mut *self.tx)
            .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}
