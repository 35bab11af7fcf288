use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use common::{ActorId, MovementId, NotificationId, ProductId};
use tokio::sync::{OwnedMutexGuard, RwLock};

use crate::{
    LedgerError, MovementQuery, NewNotification, NewProduct, Notification, Product, Result,
    StockMovement, StockSummary,
    store::{LedgerStore, LedgerTransaction, NotificationStore},
};

/// Default bound on how long a transaction waits for a row lock.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Default)]
struct LedgerState {
    products: HashMap<ProductId, Product>,
    movements: Vec<StockMovement>,
    notifications: Vec<Notification>,
}

#[derive(Debug, Default)]
struct Faults {
    unavailable: AtomicBool,
    fail_next_commit: AtomicBool,
}

/// In-memory ledger store for tests and single-process deployments.
///
/// Each product row has its own async mutex that plays the role of a
/// `SELECT ... FOR UPDATE` lock: a transaction holds the owned guard until it
/// commits, rolls back, or is dropped. Writes are staged inside the
/// transaction and applied under one write lock at commit, so readers never
/// observe a quantity without its movement.
#[derive(Clone)]
pub struct InMemoryLedgerStore {
    state: Arc<RwLock<LedgerState>>,
    row_locks: Arc<Mutex<HashMap<ProductId, Arc<tokio::sync::Mutex<()>>>>>,
    faults: Arc<Faults>,
    lock_timeout: Duration,
}

impl Default for InMemoryLedgerStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryLedgerStore {
    /// Creates a new empty in-memory ledger.
    pub fn new() -> Self {
        Self::with_lock_timeout(DEFAULT_LOCK_TIMEOUT)
    }

    pub fn with_lock_timeout(lock_timeout: Duration) -> Self {
        Self {
            state: Arc::new(RwLock::new(LedgerState::default())),
            row_locks: Arc::new(Mutex::new(HashMap::new())),
            faults: Arc::new(Faults::default()),
            lock_timeout,
        }
    }

    /// Makes `begin` fail as if the database were unreachable.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.faults.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Makes the next commit fail. The failed transaction's writes are discarded.
    pub fn fail_next_commit(&self) {
        self.faults.fail_next_commit.store(true, Ordering::SeqCst);
    }

    /// Returns the total number of movements stored.
    pub async fn total_movements(&self) -> usize {
        self.state.read().await.movements.len()
    }

    fn row_lock(&self, product_id: ProductId) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .row_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        locks.entry(product_id).or_default().clone()
    }

    /// Drops the lock entry for a product that turned out not to exist,
    /// unless another transaction is still waiting on it.
    fn forget_row_lock(&self, product_id: ProductId) {
        let mut locks = self
            .row_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if locks
            .get(&product_id)
            .is_some_and(|row| Arc::strong_count(row) == 1)
        {
            locks.remove(&product_id);
        }
    }
}

/// Transaction over an [`InMemoryLedgerStore`].
pub struct InMemoryTransaction {
    store: InMemoryLedgerStore,
    locks: HashMap<ProductId, OwnedMutexGuard<()>>,
    quantities: HashMap<ProductId, i64>,
    movements: Vec<StockMovement>,
}

#[async_trait]
impl LedgerTransaction for InMemoryTransaction {
    async fn lock_product(&mut self, product_id: ProductId) -> Result<Option<Product>> {
        if !self.locks.contains_key(&product_id) {
            let row = self.store.row_lock(product_id);
            let guard = tokio::time::timeout(self.store.lock_timeout, row.lock_owned())
                .await
                .map_err(|_| LedgerError::LockTimeout)?;
            self.locks.insert(product_id, guard);
        }

        let state = self.store.state.read().await;
        let Some(mut product) = state.products.get(&product_id).cloned() else {
            drop(state);
            self.locks.remove(&product_id);
            self.store.forget_row_lock(product_id);
            return Ok(None);
        };
        if let Some(&staged) = self.quantities.get(&product_id) {
            product.quantity = staged;
        }
        Ok(Some(product))
    }

    async fn update_quantity(&mut self, product_id: ProductId, quantity: i64) -> Result<()> {
        if !self.locks.contains_key(&product_id) {
            return Err(LedgerError::RowNotLocked(product_id));
        }
        self.quantities.insert(product_id, quantity);
        Ok(())
    }

    async fn append_movement(&mut self, movement: &StockMovement) -> Result<()> {
        movement.validate()?;
        self.movements.push(movement.clone());
        Ok(())
    }

    async fn commit(self) -> Result<()> {
        if self.store.faults.fail_next_commit.swap(false, Ordering::SeqCst) {
            return Err(LedgerError::Unavailable(
                "connection lost during commit".to_string(),
            ));
        }

        let mut state = self.store.state.write().await;

        // Validate everything before applying anything.
        for (product_id, quantity) in &self.quantities {
            if !state.products.contains_key(product_id) {
                return Err(LedgerError::ProductNotFound(*product_id));
            }
            if *quantity < 0 {
                return Err(LedgerError::ConstraintViolation(format!(
                    "quantity for product {product_id} must be >= 0"
                )));
            }
        }
        for movement in &self.movements {
            if !state.products.contains_key(&movement.product_id) {
                return Err(LedgerError::ProductNotFound(movement.product_id));
            }
        }

        let now = Utc::now();
        for (product_id, quantity) in &self.quantities {
            if let Some(product) = state.products.get_mut(product_id) {
                product.quantity = *quantity;
                product.updated_at = now;
            }
        }
        state.movements.extend(self.movements);
        drop(state);

        // Row locks release here, after the writes are visible.
        drop(self.locks);
        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    type Transaction = InMemoryTransaction;

    async fn begin(&self) -> Result<InMemoryTransaction> {
        if self.faults.unavailable.load(Ordering::SeqCst) {
            return Err(LedgerError::Unavailable("store is unreachable".to_string()));
        }
        Ok(InMemoryTransaction {
            store: self.clone(),
            locks: HashMap::new(),
            quantities: HashMap::new(),
            movements: Vec::new(),
        })
    }

    async fn insert_product(&self, product: NewProduct) -> Result<Product> {
        product.validate()?;

        let mut state = self.state.write().await;
        if state.products.values().any(|p| p.sku == product.sku) {
            return Err(LedgerError::ConstraintViolation(format!(
                "sku {} already exists",
                product.sku
            )));
        }

        let now = Utc::now();
        let product = Product {
            id: ProductId::new(),
            name: product.name,
            sku: product.sku,
            quantity: 0,
            minimum_threshold: product.minimum_threshold,
            price_cents: product.price_cents,
            category: product.category,
            created_at: now,
            updated_at: now,
        };
        state.products.insert(product.id, product.clone());
        Ok(product)
    }

    async fn get_product(&self, product_id: ProductId) -> Result<Option<Product>> {
        Ok(self.state.read().await.products.get(&product_id).cloned())
    }

    async fn get_movement(&self, movement_id: MovementId) -> Result<Option<StockMovement>> {
        let state = self.state.read().await;
        Ok(state
            .movements
            .iter()
            .find(|m| m.id == movement_id)
            .cloned())
    }

    async fn list_movements(&self, query: MovementQuery) -> Result<Vec<StockMovement>> {
        let state = self.state.read().await;
        // Reverse insertion order first so equal timestamps stay newest first.
        let mut movements: Vec<_> = state
            .movements
            .iter()
            .rev()
            .filter(|m| query.matches(m))
            .cloned()
            .collect();
        movements.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let offset = query.offset.unwrap_or(0);
        let movements = movements.into_iter().skip(offset);
        Ok(match query.limit {
            Some(limit) => movements.take(limit).collect(),
            None => movements.collect(),
        })
    }

    async fn low_stock_products(&self) -> Result<Vec<Product>> {
        let state = self.state.read().await;
        let mut products: Vec<_> = state
            .products
            .values()
            .filter(|p| p.is_low_stock())
            .cloned()
            .collect();
        products.sort_by(|a, b| a.quantity.cmp(&b.quantity).then(a.name.cmp(&b.name)));
        Ok(products)
    }

    async fn stock_summary(&self) -> Result<StockSummary> {
        let state = self.state.read().await;
        let products = state.products.values();
        Ok(StockSummary {
            total_products: state.products.len() as i64,
            low_stock_count: products.clone().filter(|p| p.is_low_stock()).count() as i64,
            out_of_stock_count: products.filter(|p| p.is_out_of_stock()).count() as i64,
        })
    }
}

#[async_trait]
impl NotificationStore for InMemoryLedgerStore {
    async fn create_notification(&self, notification: NewNotification) -> Result<Notification> {
        if self.faults.unavailable.load(Ordering::SeqCst) {
            return Err(LedgerError::Unavailable("store is unreachable".to_string()));
        }
        let notification = Notification {
            id: NotificationId::new(),
            user_id: notification.user_id,
            message: notification.message,
            kind: notification.kind,
            is_read: false,
            created_at: Utc::now(),
        };
        self.state
            .write()
            .await
            .notifications
            .push(notification.clone());
        Ok(notification)
    }

    async fn unread_notifications(
        &self,
        user_id: ActorId,
        limit: usize,
    ) -> Result<Vec<Notification>> {
        let state = self.state.read().await;
        let mut unread: Vec<_> = state
            .notifications
            .iter()
            .rev()
            .filter(|n| n.user_id == user_id && !n.is_read)
            .cloned()
            .collect();
        unread.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        unread.truncate(limit);
        Ok(unread)
    }

    async fn mark_notification_read(
        &self,
        notification_id: NotificationId,
        user_id: ActorId,
    ) -> Result<bool> {
        let mut state = self.state.write().await;
        match state
            .notifications
            .iter_mut()
            .find(|n| n.id == notification_id && n.user_id == user_id)
        {
            Some(notification) => {
                notification.is_read = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MovementReason;

    async fn seed(store: &InMemoryLedgerStore, quantity: i64) -> Product {
        let product = store
            .insert_product(NewProduct::new("Widget", "SKU-001").minimum_threshold(10))
            .await
            .unwrap();
        if quantity != 0 {
            let mut tx = store.begin().await.unwrap();
            tx.lock_product(product.id).await.unwrap().unwrap();
            tx.update_quantity(product.id, quantity).await.unwrap();
            tx.append_movement(&StockMovement::new(
                product.id,
                quantity,
                MovementReason::Purchase,
                ActorId::new(),
                None,
            ))
            .await
            .unwrap();
            tx.commit().await.unwrap();
        }
        store.get_product(product.id).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn insert_product_starts_at_zero() {
        let store = InMemoryLedgerStore::new();
        let product = store
            .insert_product(NewProduct::new("Widget", "SKU-001"))
            .await
            .unwrap();
        assert_eq!(product.quantity, 0);
        assert_eq!(
            store.get_product(product.id).await.unwrap(),
            Some(product)
        );
    }

    #[tokio::test]
    async fn duplicate_sku_is_rejected() {
        let store = InMemoryLedgerStore::new();
        store
            .insert_product(NewProduct::new("Widget", "SKU-001"))
            .await
            .unwrap();
        let result = store
            .insert_product(NewProduct::new("Other", "SKU-001"))
            .await;
        assert!(matches!(result, Err(LedgerError::ConstraintViolation(_))));
    }

    #[tokio::test]
    async fn commit_applies_quantity_and_movement_together() {
        let store = InMemoryLedgerStore::new();
        let product = seed(&store, 12).await;

        assert_eq!(product.quantity, 12);
        assert_eq!(store.total_movements().await, 1);
    }

    #[tokio::test]
    async fn staged_writes_are_invisible_until_commit() {
        let store = InMemoryLedgerStore::new();
        let product = seed(&store, 12).await;

        let mut tx = store.begin().await.unwrap();
        tx.lock_product(product.id).await.unwrap();
        tx.update_quantity(product.id, 7).await.unwrap();
        tx.append_movement(&StockMovement::new(
            product.id,
            -5,
            MovementReason::Sale,
            ActorId::new(),
            None,
        ))
        .await
        .unwrap();

        let seen = store.get_product(product.id).await.unwrap().unwrap();
        assert_eq!(seen.quantity, 12);
        assert_eq!(store.total_movements().await, 1);

        tx.rollback().await.unwrap();
        let seen = store.get_product(product.id).await.unwrap().unwrap();
        assert_eq!(seen.quantity, 12);
        assert_eq!(store.total_movements().await, 1);
    }

    #[tokio::test]
    async fn negative_quantity_is_rejected_at_commit() {
        let store = InMemoryLedgerStore::new();
        let product = seed(&store, 3).await;

        let mut tx = store.begin().await.unwrap();
        tx.lock_product(product.id).await.unwrap();
        tx.update_quantity(product.id, -1).await.unwrap();
        let result = tx.commit().await;

        assert!(matches!(result, Err(LedgerError::ConstraintViolation(_))));
        let seen = store.get_product(product.id).await.unwrap().unwrap();
        assert_eq!(seen.quantity, 3);
    }

    #[tokio::test]
    async fn update_without_lock_is_rejected() {
        let store = InMemoryLedgerStore::new();
        let product = seed(&store, 3).await;

        let mut tx = store.begin().await.unwrap();
        let result = tx.update_quantity(product.id, 1).await;
        assert!(matches!(result, Err(LedgerError::RowNotLocked(_))));
    }

    #[tokio::test]
    async fn second_locker_times_out_while_row_is_held() {
        let store = InMemoryLedgerStore::with_lock_timeout(Duration::from_millis(50));
        let product = seed(&store, 3).await;

        let mut holder = store.begin().await.unwrap();
        holder.lock_product(product.id).await.unwrap();

        let mut waiter = store.begin().await.unwrap();
        let result = waiter.lock_product(product.id).await;
        assert!(matches!(result, Err(LedgerError::LockTimeout)));

        drop(holder);
        assert!(waiter.lock_product(product.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn different_rows_lock_independently() {
        let store = InMemoryLedgerStore::with_lock_timeout(Duration::from_millis(50));
        let a = seed(&store, 3).await;
        let b = store
            .insert_product(NewProduct::new("Gadget", "SKU-002"))
            .await
            .unwrap();

        let mut first = store.begin().await.unwrap();
        first.lock_product(a.id).await.unwrap();

        let mut second = store.begin().await.unwrap();
        assert!(second.lock_product(b.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn locking_missing_product_returns_none() {
        let store = InMemoryLedgerStore::new();
        let mut tx = store.begin().await.unwrap();
        assert!(tx.lock_product(ProductId::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn missing_product_lookups_leave_no_row_locks() {
        let store = InMemoryLedgerStore::new();
        let product = seed(&store, 3).await;

        let mut tx = store.begin().await.unwrap();
        for _ in 0..1_000 {
            assert!(tx.lock_product(ProductId::new()).await.unwrap().is_none());
        }
        tx.lock_product(product.id).await.unwrap();

        let locks = store.row_locks.lock().unwrap();
        assert_eq!(locks.len(), 1);
        assert!(locks.contains_key(&product.id));
    }

    #[tokio::test]
    async fn injected_commit_failure_discards_writes() {
        let store = InMemoryLedgerStore::new();
        let product = seed(&store, 5).await;
        store.fail_next_commit();

        let mut tx = store.begin().await.unwrap();
        tx.lock_product(product.id).await.unwrap();
        tx.update_quantity(product.id, 4).await.unwrap();
        tx.append_movement(&StockMovement::new(
            product.id,
            -1,
            MovementReason::Damage,
            ActorId::new(),
            None,
        ))
        .await
        .unwrap();
        assert!(matches!(
            tx.commit().await,
            Err(LedgerError::Unavailable(_))
        ));

        let seen = store.get_product(product.id).await.unwrap().unwrap();
        assert_eq!(seen.quantity, 5);
        assert_eq!(store.total_movements().await, 1);
    }

    #[tokio::test]
    async fn unavailable_store_refuses_begin() {
        let store = InMemoryLedgerStore::new();
        store.set_unavailable(true);
        assert!(matches!(
            store.begin().await,
            Err(LedgerError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn low_stock_and_summary() {
        let store = InMemoryLedgerStore::new();
        seed(&store, 4).await;
        store
            .insert_product(NewProduct::new("Untracked", "SKU-009"))
            .await
            .unwrap();

        let low = store.low_stock_products().await.unwrap();
        assert_eq!(low.len(), 1);
        assert_eq!(low[0].sku, "SKU-001");

        let summary = store.stock_summary().await.unwrap();
        assert_eq!(summary.total_products, 2);
        assert_eq!(summary.low_stock_count, 1);
        assert_eq!(summary.out_of_stock_count, 1);
    }

    #[tokio::test]
    async fn notifications_unread_and_mark_read() {
        let store = InMemoryLedgerStore::new();
        let user = ActorId::new();
        let first = store
            .create_notification(NewNotification::low_stock(user, "first"))
            .await
            .unwrap();
        store
            .create_notification(NewNotification::low_stock(user, "second"))
            .await
            .unwrap();
        store
            .create_notification(NewNotification::low_stock(ActorId::new(), "other"))
            .await
            .unwrap();

        let unread = store.unread_notifications(user, 10).await.unwrap();
        assert_eq!(unread.len(), 2);
        assert_eq!(unread[0].message, "second");

        assert!(store.mark_notification_read(first.id, user).await.unwrap());
        assert!(
            !store
                .mark_notification_read(first.id, ActorId::new())
                .await
                .unwrap()
        );
        assert_eq!(store.unread_notifications(user, 10).await.unwrap().len(), 1);
    }
}
