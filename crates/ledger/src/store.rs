use async_trait::async_trait;
use common::{ActorId, MovementId, NotificationId, ProductId};

use crate::{
    MovementQuery, NewNotification, NewProduct, Notification, Product, Result, StockMovement,
    StockSummary,
};

/// A unit of work against the ledger.
///
/// Writes are only visible to other readers after [`commit`](Self::commit)
/// succeeds. Dropping a transaction without committing rolls it back and
/// releases every row lock it holds.
#[async_trait]
pub trait LedgerTransaction: Send {
    /// Acquires an exclusive lock on the product row and returns its current
    /// state, or `None` if the product does not exist.
    ///
    /// Blocks while another transaction holds the same row, up to the store's
    /// lock timeout.
    async fn lock_product(&mut self, product_id: ProductId) -> Result<Option<Product>>;

    /// Stages a new quantity for a product row locked by this transaction.
    async fn update_quantity(&mut self, product_id: ProductId, quantity: i64) -> Result<()>;

    /// Stages a movement row.
    async fn append_movement(&mut self, movement: &StockMovement) -> Result<()>;

    /// Makes every staged write durable and visible, then releases the locks.
    async fn commit(self) -> Result<()>;

    /// Discards every staged write and releases the locks.
    async fn rollback(self) -> Result<()>;
}

/// Core trait for ledger store implementations.
///
/// All implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait LedgerStore: Send + Sync {
    type Transaction: LedgerTransaction + 'static;

    /// Opens a new transaction.
    async fn begin(&self) -> Result<Self::Transaction>;

    /// Inserts a product at quantity zero. SKUs are unique.
    async fn insert_product(&self, product: NewProduct) -> Result<Product>;

    /// Reads a product without locking it.
    async fn get_product(&self, product_id: ProductId) -> Result<Option<Product>>;

    async fn get_movement(&self, movement_id: MovementId) -> Result<Option<StockMovement>>;

    /// Lists movements matching the query, newest first.
    async fn list_movements(&self, query: MovementQuery) -> Result<Vec<StockMovement>>;

    /// Products at or below a non-zero minimum threshold.
    async fn low_stock_products(&self) -> Result<Vec<Product>>;

    async fn stock_summary(&self) -> Result<StockSummary>;
}

/// Extension trait providing convenience methods for ledger stores.
#[async_trait]
pub trait LedgerStoreExt: LedgerStore {
    /// Returns the sum of every movement delta recorded for a product.
    async fn movement_total(&self, product_id: ProductId) -> Result<i64> {
        let movements = self
            .list_movements(MovementQuery::for_product(product_id))
            .await?;
        Ok(movements.iter().map(|m| m.delta).sum())
    }

    /// Counts the movements recorded for a product.
    async fn movement_count(&self, product_id: ProductId) -> Result<usize> {
        Ok(self
            .list_movements(MovementQuery::for_product(product_id))
            .await?
            .len())
    }
}

impl<T: LedgerStore + ?Sized> LedgerStoreExt for T {}

/// Storage for notifications produced from low-stock alerts.
#[async_trait]
pub trait NotificationStore: Send + Sync {
    async fn create_notification(&self, notification: NewNotification) -> Result<Notification>;

    /// Unread notifications for a user, newest first.
    async fn unread_notifications(&self, user_id: ActorId, limit: usize)
    -> Result<Vec<Notification>>;

    /// Marks a notification as read. Returns false if no notification with
    /// that ID belongs to the user.
    async fn mark_notification_read(
        &self,
        notification_id: NotificationId,
        user_id: ActorId,
    ) -> Result<bool>;
}
