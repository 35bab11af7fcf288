use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{ActorId, MovementId, NotificationId, ProductId};
use sqlx::{PgPool, Postgres, Row, Transaction, postgres::PgRow};
use uuid::Uuid;

use crate::{
    LedgerError, MovementQuery, NewNotification, NewProduct, Notification, Product, Result,
    StockMovement, StockSummary,
    store::{LedgerStore, LedgerTransaction, NotificationStore},
};

const PRODUCT_COLUMNS: &str =
    "id, name, sku, quantity, minimum_threshold, price_cents, category, created_at, updated_at";
const MOVEMENT_COLUMNS: &str = "id, product_id, delta, reason, actor_id, created_at, notes";

/// PostgreSQL-backed ledger store.
#[derive(Clone)]
pub struct PgLedgerStore {
    pool: PgPool,
    lock_timeout: Duration,
    statement_timeout: Duration,
}

impl PgLedgerStore {
    /// Creates a new PostgreSQL ledger store with default timeouts.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            lock_timeout: Duration::from_secs(5),
            statement_timeout: Duration::from_secs(10),
        }
    }

    /// Sets how long a transaction waits for a row lock before failing.
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Sets the per-statement bound applied inside ledger transactions.
    pub fn with_statement_timeout(mut self, timeout: Duration) -> Self {
        self.statement_timeout = timeout;
        self
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }
}

/// Maps driver errors onto the ledger taxonomy using the SQLSTATE code.
fn classify(err: sqlx::Error) -> LedgerError {
    if let sqlx::Error::Database(db_err) = &err {
        let code = db_err.code().map(|code| code.into_owned());
        match code.as_deref() {
            // lock_not_available, query_canceled (statement_timeout)
            Some("55P03") | Some("57014") => return LedgerError::LockTimeout,
            // unique_violation, check_violation, foreign_key_violation
            Some("23505") | Some("23514") | Some("23503") => {
                return LedgerError::ConstraintViolation(db_err.message().to_string());
            }
            _ => {}
        }
    }

    match err {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            LedgerError::Unavailable(err.to_string())
        }
        other => LedgerError::Database(other),
    }
}

fn row_to_product(row: PgRow) -> Result<Product> {
    Ok(Product {
        id: ProductId::from_uuid(row.try_get::<Uuid, _>("id")?),
        name: row.try_get("name")?,
        sku: row.try_get("sku")?,
        quantity: row.try_get("quantity")?,
        minimum_threshold: row.try_get("minimum_threshold")?,
        price_cents: row.try_get("price_cents")?,
        category: row.try_get("category")?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
        updated_at: row.try_get::<DateTime<Utc>, _>("updated_at")?,
    })
}

fn row_to_movement(row: PgRow) -> Result<StockMovement> {
    let reason: String = row.try_get("reason")?;
    Ok(StockMovement {
        id: MovementId::from_uuid(row.try_get::<Uuid, _>("id")?),
        product_id: ProductId::from_uuid(row.try_get::<Uuid, _>("product_id")?),
        delta: row.try_get("delta")?,
        reason: reason.parse()?,
        actor_id: ActorId::from_uuid(row.try_get::<Uuid, _>("actor_id")?),
        created_at: row.try_get("created_at")?,
        notes: row.try_get("notes")?,
    })
}

fn row_to_notification(row: PgRow) -> Result<Notification> {
    let kind: String = row.try_get("kind")?;
    Ok(Notification {
        id: NotificationId::from_uuid(row.try_get::<Uuid, _>("id")?),
        user_id: ActorId::from_uuid(row.try_get::<Uuid, _>("user_id")?),
        message: row.try_get("message")?,
        kind: kind.parse()?,
        is_read: row.try_get("is_read")?,
        created_at: row.try_get("created_at")?,
    })
}

/// A ledger transaction holding one pooled connection.
///
/// Dropping it without committing rolls back on the connection's next use,
/// which releases the `FOR UPDATE` row locks.
pub struct PgTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl LedgerTransaction for PgTransaction {
    async fn lock_product(&mut self, product_id: ProductId) -> Result<Option<Product>> {
        let sql = format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE id = $1 FOR UPDATE");
        let row = sqlx::query(&sql)
            .bind(product_id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(classify)?;

        row.map(row_to_product).transpose()
    }

    async fn update_quantity(&mut self, product_id: ProductId, quantity: i64) -> Result<()> {
        let result =
            sqlx::query("UPDATE products SET quantity = $1, updated_at = NOW() WHERE id = $2")
                .bind(quantity)
                .bind(product_id.as_uuid())
                .execute(&mut *self.tx)
                .await
                .map_err(classify)?;

        if result.rows_affected() == 0 {
            return Err(LedgerError::ProductNotFound(product_id));
        }
        Ok(())
    }

    async fn append_movement(&mut self, movement: &StockMovement) -> Result<()> {
        movement.validate()?;

        sqlx::query(
            r#"
            INSERT INTO stock_movements (id, product_id, delta, reason, actor_id, created_at, notes)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(movement.id.as_uuid())
        .bind(movement.product_id.as_uuid())
        .bind(movement.delta)
        .bind(movement.reason.as_str())
        .bind(movement.actor_id.as_uuid())
        .bind(movement.created_at)
        .bind(&movement.notes)
        .execute(&mut *self.tx)
        .await
        .map_err(classify)?;

        Ok(())
    }

    async fn commit(self) -> Result<()> {
        self.tx.commit().await.map_err(classify)
    }

    async fn rollback(self) -> Result<()> {
        self.tx.rollback().await.map_err(classify)
    }
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    type Transaction = PgTransaction;

    #[tracing::instrument(skip(self))]
    async fn begin(&self) -> Result<PgTransaction> {
        let mut tx = self.pool.begin().await.map_err(classify)?;

        // Scoped to this transaction only.
        sqlx::query("SELECT set_config('lock_timeout', $1, true), set_config('statement_timeout', $2, true)")
            .bind(format!("{}ms", self.lock_timeout.as_millis()))
            .bind(format!("{}ms", self.statement_timeout.as_millis()))
            .execute(&mut *tx)
            .await
            .map_err(classify)?;

        Ok(PgTransaction { tx })
    }

    async fn insert_product(&self, product: NewProduct) -> Result<Product> {
        product.validate()?;

        let sql = format!(
            r#"
            INSERT INTO products (id, name, sku, quantity, minimum_threshold, price_cents, category)
            VALUES ($1, $2, $3, 0, $4, $5, $6)
            RETURNING {PRODUCT_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(Uuid::new_v4())
            .bind(&product.name)
            .bind(&product.sku)
            .bind(product.minimum_threshold)
            .bind(product.price_cents)
            .bind(&product.category)
            .fetch_one(&self.pool)
            .await
            .map_err(classify)?;

        row_to_product(row)
    }

    async fn get_product(&self, product_id: ProductId) -> Result<Option<Product>> {
        let sql = format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(product_id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(classify)?;

        row.map(row_to_product).transpose()
    }

    async fn get_movement(&self, movement_id: MovementId) -> Result<Option<StockMovement>> {
        let sql = format!("SELECT {MOVEMENT_COLUMNS} FROM stock_movements WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(movement_id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(classify)?;

        row.map(row_to_movement).transpose()
    }

    async fn list_movements(&self, query: MovementQuery) -> Result<Vec<StockMovement>> {
        let mut sql = format!("SELECT {MOVEMENT_COLUMNS} FROM stock_movements WHERE 1=1");
        let mut param_count = 0;

        // Build dynamic query
        if query.product_id.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND product_id = ${param_count}"));
        }
        if query.reason.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND reason = ${param_count}"));
        }
        if query.from_timestamp.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND created_at >= ${param_count}"));
        }
        if query.to_timestamp.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND created_at <= ${param_count}"));
        }

        sql.push_str(" ORDER BY created_at DESC, seq DESC");

        if query.limit.is_some() {
            param_count += 1;
            sql.push_str(&format!(" LIMIT ${param_count}"));
        }
        if query.offset.is_some() {
            param_count += 1;
            sql.push_str(&format!(" OFFSET ${param_count}"));
        }

        let mut sqlx_query = sqlx::query(&sql);

        if let Some(id) = query.product_id {
            sqlx_query = sqlx_query.bind(id.as_uuid());
        }
        if let Some(reason) = query.reason {
            sqlx_query = sqlx_query.bind(reason.as_str());
        }
        if let Some(from_ts) = query.from_timestamp {
            sqlx_query = sqlx_query.bind(from_ts);
        }
        if let Some(to_ts) = query.to_timestamp {
            sqlx_query = sqlx_query.bind(to_ts);
        }
        if let Some(limit) = query.limit {
            sqlx_query = sqlx_query.bind(limit as i64);
        }
        if let Some(offset) = query.offset {
            sqlx_query = sqlx_query.bind(offset as i64);
        }

        let rows = sqlx_query.fetch_all(&self.pool).await.map_err(classify)?;
        rows.into_iter().map(row_to_movement).collect()
    }

    async fn low_stock_products(&self) -> Result<Vec<Product>> {
        let sql = format!(
            r#"
            SELECT {PRODUCT_COLUMNS}
            FROM products
            WHERE quantity <= minimum_threshold AND minimum_threshold > 0
            ORDER BY quantity ASC, name ASC
            "#
        );
        let rows = sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(classify)?;

        rows.into_iter().map(row_to_product).collect()
    }

    async fn stock_summary(&self) -> Result<StockSummary> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) AS total_products,
                COUNT(*) FILTER (WHERE quantity <= minimum_threshold AND minimum_threshold > 0) AS low_stock_count,
                COUNT(*) FILTER (WHERE quantity = 0) AS out_of_stock_count
            FROM products
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .map_err(classify)?;

        Ok(StockSummary {
            total_products: row.try_get("total_products")?,
            low_stock_count: row.try_get("low_stock_count")?,
            out_of_stock_count: row.try_get("out_of_stock_count")?,
        })
    }
}

#[async_trait]
impl NotificationStore for PgLedgerStore {
    async fn create_notification(&self, notification: NewNotification) -> Result<Notification> {
        let row = sqlx::query(
            r#"
            INSERT INTO notifications (id, user_id, message, kind, is_read)
            VALUES ($1, $2, $3, $4, false)
            RETURNING id, user_id, message, kind, is_read, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(notification.user_id.as_uuid())
        .bind(&notification.message)
        .bind(notification.kind.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(classify)?;

        row_to_notification(row)
    }

    async fn unread_notifications(
        &self,
        user_id: ActorId,
        limit: usize,
    ) -> Result<Vec<Notification>> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, message, kind, is_read, created_at
            FROM notifications
            WHERE user_id = $1 AND is_read = false
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(user_id.as_uuid())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(classify)?;

        rows.into_iter().map(row_to_notification).collect()
    }

    async fn mark_notification_read(
        &self,
        notification_id: NotificationId,
        user_id: ActorId,
    ) -> Result<bool> {
        let result =
            sqlx::query("UPDATE notifications SET is_read = true WHERE id = $1 AND user_id = $2")
                .bind(notification_id.as_uuid())
                .bind(user_id.as_uuid())
                .execute(&self.pool)
                .await
                .map_err(classify)?;

        Ok(result.rows_affected() > 0)
    }
}
