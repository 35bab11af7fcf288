//! Stock mutation engine.
//!
//! Every quantity change goes through [`StockMutationEngine::apply_stock_change`]:
//!
//! 1. begin a transaction and lock the product row (bounded by
//!    [`EngineConfig::acquire_timeout`]),
//! 2. reject the change if it would take the quantity below zero,
//! 3. write the new quantity and append the movement in the same transaction,
//! 4. commit, then publish a [`StockChanged`] to every registered sink.
//!
//! Publication for one product follows commit order: a per-product gate is
//! taken while the row lock is still held and released only after every sink
//! has seen the event.
//!
//! Steps 1 and 2 run in the caller's future, so dropping it before the lock
//! is taken (or before the check passes) leaves no trace. Steps 3 and 4 run
//! in a spawned task that always finishes with a commit or a rollback, even
//! if the caller stops waiting.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use common::{Actor, MovementId, ProductId};
use ledger::{
    LedgerError, LedgerStore, LedgerStoreExt, LedgerTransaction, MovementReason, NewProduct,
    Product, StockMovement,
};
use serde::{Deserialize, Serialize};
use tokio::sync::OwnedMutexGuard;
use tracing::Instrument;

use crate::error::{Result, StockError};
use crate::event::{StockChanged, StockEventSink};

/// Note recorded on the movement that carries a new product's opening stock.
pub const INITIAL_STOCK_NOTE: &str = "Initial stock";

/// Engine settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Upper bound on opening the transaction and acquiring the row lock.
    pub acquire_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            acquire_timeout: Duration::from_secs(10),
        }
    }
}

/// A requested quantity change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockChange {
    pub product_id: ProductId,
    /// Signed change; positive adds stock, negative removes it. Never zero.
    pub delta: i64,
    pub reason: MovementReason,
    pub actor: Actor,
    pub notes: Option<String>,
}

impl StockChange {
    pub fn new(product_id: ProductId, delta: i64, reason: MovementReason, actor: Actor) -> Self {
        Self {
            product_id,
            delta,
            reason,
            actor,
            notes: None,
        }
    }

    pub fn notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }
}

/// Result of a committed change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockChangeOutcome {
    pub new_quantity: i64,
    pub movement_id: MovementId,
}

/// Comparison between a product's stored quantity and the sum of its movements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayCheck {
    pub product_id: ProductId,
    pub stored_quantity: i64,
    pub movement_total: i64,
    pub movement_count: usize,
}

impl ReplayCheck {
    pub fn is_consistent(&self) -> bool {
        self.stored_quantity == self.movement_total
    }
}

/// Per-product publish gates. Entries are only created for products whose
/// row lock was acquired, so the map is bounded by the product table.
#[derive(Default)]
struct PublishOrder {
    gates: Mutex<HashMap<ProductId, Arc<tokio::sync::Mutex<()>>>>,
}

impl PublishOrder {
    async fn enter(&self, product_id: ProductId) -> OwnedMutexGuard<()> {
        let gate = {
            let mut gates = self.gates.lock().unwrap_or_else(PoisonError::into_inner);
            gates.entry(product_id).or_default().clone()
        };
        gate.lock_owned().await
    }
}

/// Applies stock changes against a [`LedgerStore`] and publishes the
/// committed results.
pub struct StockMutationEngine<S: LedgerStore> {
    store: Arc<S>,
    config: EngineConfig,
    sinks: Vec<Arc<dyn StockEventSink>>,
    publish_order: Arc<PublishOrder>,
}

impl<S: LedgerStore> Clone for StockMutationEngine<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            config: self.config,
            sinks: self.sinks.clone(),
            publish_order: Arc::clone(&self.publish_order),
        }
    }
}

impl<S: LedgerStore + 'static> StockMutationEngine<S> {
    pub fn new(store: S) -> Self {
        Self::with_config(store, EngineConfig::default())
    }

    pub fn with_config(store: S, config: EngineConfig) -> Self {
        Self {
            store: Arc::new(store),
            config,
            sinks: Vec::new(),
            publish_order: Arc::default(),
        }
    }

    /// Registers a sink that receives every committed change.
    pub fn with_sink(mut self, sink: Arc<dyn StockEventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Returns a reference to the underlying ledger store.
    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> EngineConfig {
        self.config
    }

    /// Applies a signed quantity change to one product.
    ///
    /// At most one movement is committed per call. A failed call leaves the
    /// quantity and the movement log untouched.
    #[tracing::instrument(
        skip(self, change),
        fields(
            product_id = %change.product_id,
            delta = change.delta,
            reason = %change.reason,
            actor_id = %change.actor.id,
        )
    )]
    pub async fn apply_stock_change(&self, change: StockChange) -> Result<StockChangeOutcome> {
        let started = Instant::now();
        let result = self.execute(change).await;

        let outcome = match &result {
            Ok(_) => "committed",
            Err(err) => err.outcome(),
        };
        metrics::counter!("stock_mutations_total", "outcome" => outcome).increment(1);
        metrics::histogram!("stock_mutation_duration_seconds")
            .record(started.elapsed().as_secs_f64());

        match &result {
            Ok(committed) => tracing::info!(
                new_quantity = committed.new_quantity,
                movement_id = %committed.movement_id,
                "stock change committed"
            ),
            Err(err @ StockError::Storage(_)) => {
                tracing::warn!(error = %err, "stock change failed")
            }
            Err(err) => tracing::debug!(error = %err, "stock change rejected"),
        }
        result
    }

    async fn execute(&self, change: StockChange) -> Result<StockChangeOutcome> {
        if change.delta == 0 {
            return Err(StockError::InvalidChange(
                "delta must not be zero".to_string(),
            ));
        }

        let (tx, product) = tokio::time::timeout(
            self.config.acquire_timeout,
            self.acquire(change.product_id),
        )
        .await
        .map_err(|_| StockError::Storage(LedgerError::LockTimeout))??;

        let Some(new_quantity) = product.quantity.checked_add(change.delta) else {
            abandon(tx).await;
            return Err(StockError::InvalidChange(format!(
                "delta {} overflows quantity {}",
                change.delta, product.quantity
            )));
        };
        if new_quantity < 0 {
            abandon(tx).await;
            return Err(StockError::InsufficientStock {
                product_id: product.id,
                available: product.quantity,
                requested: change.delta.saturating_neg(),
            });
        }

        let sinks = self.sinks.clone();
        let publish_order = Arc::clone(&self.publish_order);
        tokio::spawn(
            write_and_commit(tx, product, change, new_quantity, sinks, publish_order)
                .instrument(tracing::Span::current()),
        )
        .await
        .map_err(|err| {
            StockError::Storage(LedgerError::Unavailable(format!(
                "mutation task aborted: {err}"
            )))
        })?
    }

    /// Opens a transaction and locks the product row.
    async fn acquire(&self, product_id: ProductId) -> Result<(S::Transaction, Product)> {
        let mut tx = self.store.begin().await?;
        match tx.lock_product(product_id).await? {
            Some(product) => Ok((tx, product)),
            None => {
                abandon(tx).await;
                Err(StockError::NotFound(product_id))
            }
        }
    }

    /// Inserts a product and records its opening stock as a purchase
    /// movement, so the movement log accounts for every unit from the start.
    ///
    /// The insert and the opening movement commit separately. If the movement
    /// fails, the product stays at quantity 0 with an empty log and the error
    /// is returned; a retry of the same request then fails on the duplicate
    /// SKU, so the opening stock has to be applied as a `purchase` change.
    #[tracing::instrument(skip(self, product, actor), fields(sku = %product.sku))]
    pub async fn create_product(
        &self,
        product: NewProduct,
        initial_stock: i64,
        actor: Actor,
    ) -> Result<Product> {
        if initial_stock < 0 {
            return Err(StockError::InvalidChange(
                "initial stock must be >= 0".to_string(),
            ));
        }

        let product = self
            .store
            .insert_product(product)
            .await
            .map_err(|err| match err {
                LedgerError::ConstraintViolation(msg) => StockError::InvalidChange(msg),
                other => other.into(),
            })?;

        if initial_stock == 0 {
            return Ok(product);
        }

        if let Err(err) = self
            .apply_stock_change(
                StockChange::new(product.id, initial_stock, MovementReason::Purchase, actor)
                    .notes(INITIAL_STOCK_NOTE),
            )
            .await
        {
            tracing::warn!(
                product_id = %product.id,
                initial_stock,
                error = %err,
                "product created without its opening stock"
            );
            return Err(err);
        }

        self.store
            .get_product(product.id)
            .await?
            .ok_or(StockError::NotFound(product.id))
    }

    /// Compares a product's quantity with the sum of its movements.
    ///
    /// The row lock is held while the movements are summed, so no mutation
    /// of this product can commit in between.
    #[tracing::instrument(skip(self))]
    pub async fn verify_replay(&self, product_id: ProductId) -> Result<ReplayCheck> {
        let (tx, product) = self.acquire(product_id).await?;

        let totals = async {
            let movement_total = self.store.movement_total(product_id).await?;
            let movement_count = self.store.movement_count(product_id).await?;
            Ok::<_, LedgerError>((movement_total, movement_count))
        }
        .await;
        abandon(tx).await;
        let (movement_total, movement_count) = totals?;

        let check = ReplayCheck {
            product_id,
            stored_quantity: product.quantity,
            movement_total,
            movement_count,
        };
        if !check.is_consistent() {
            tracing::error!(
                stored_quantity = check.stored_quantity,
                movement_total = check.movement_total,
                "quantity does not match movement log"
            );
        }
        Ok(check)
    }
}

/// Writes the change, commits, then publishes it. Dropping the transaction
/// on an early return rolls it back.
///
/// The publish gate is entered before commit releases the row lock, so the
/// next writer of this product cannot publish ahead of this one.
async fn write_and_commit<T: LedgerTransaction>(
    mut tx: T,
    product: Product,
    change: StockChange,
    new_quantity: i64,
    sinks: Vec<Arc<dyn StockEventSink>>,
    publish_order: Arc<PublishOrder>,
) -> Result<StockChangeOutcome> {
    let movement = StockMovement::new(
        product.id,
        change.delta,
        change.reason,
        change.actor.id,
        change.notes,
    );

    tx.update_quantity(product.id, new_quantity).await?;
    tx.append_movement(&movement).await?;
    let gate = publish_order.enter(product.id).await;
    tx.commit().await?;

    let event = StockChanged {
        product_id: product.id,
        product_name: product.name,
        movement_id: movement.id,
        previous_quantity: product.quantity,
        new_quantity,
        delta: movement.delta,
        reason: movement.reason,
        actor_id: movement.actor_id,
        minimum_threshold: product.minimum_threshold,
        timestamp: movement.created_at,
    };
    for sink in &sinks {
        sink.publish(&event);
    }
    drop(gate);

    Ok(StockChangeOutcome {
        new_quantity,
        movement_id: movement.id,
    })
}

async fn abandon<T: LedgerTransaction>(tx: T) {
    if let Err(err) = tx.rollback().await {
        tracing::warn!(error = %err, "rollback failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::ActorId;
    use ledger::InMemoryLedgerStore;

    #[derive(Default)]
    struct RecordingSink {
        events: Mutex<Vec<StockChanged>>,
    }

    impl StockEventSink for RecordingSink {
        fn publish(&self, event: &StockChanged) {
            self.events.lock().unwrap().push(event.clone());
        }
    }

    async fn engine_with_product(
        initial: i64,
        threshold: i64,
    ) -> (
        StockMutationEngine<InMemoryLedgerStore>,
        Arc<RecordingSink>,
        Product,
    ) {
        let sink = Arc::new(RecordingSink::default());
        let engine = StockMutationEngine::new(InMemoryLedgerStore::new()).with_sink(sink.clone());
        let product = engine
            .create_product(
                NewProduct::new("Widget", "SKU-001").minimum_threshold(threshold),
                initial,
                Actor::staff(ActorId::new()),
            )
            .await
            .unwrap();
        sink.events.lock().unwrap().clear();
        (engine, sink, product)
    }

    #[tokio::test]
    async fn test_apply_decrement() {
        let (engine, sink, product) = engine_with_product(12, 10).await;
        let actor = Actor::staff(ActorId::new());

        let outcome = engine
            .apply_stock_change(StockChange::new(
                product.id,
                -5,
                MovementReason::Sale,
                actor,
            ))
            .await
            .unwrap();

        assert_eq!(outcome.new_quantity, 7);
        let events = sink.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].previous_quantity, 12);
        assert_eq!(events[0].new_quantity, 7);
        assert_eq!(events[0].movement_id, outcome.movement_id);
        assert_eq!(events[0].actor_id, actor.id);
    }

    #[tokio::test]
    async fn test_insufficient_stock_emits_nothing() {
        let (engine, sink, product) = engine_with_product(3, 0).await;

        let result = engine
            .apply_stock_change(StockChange::new(
                product.id,
                -4,
                MovementReason::Sale,
                Actor::staff(ActorId::new()),
            ))
            .await;

        assert!(matches!(
            result,
            Err(StockError::InsufficientStock {
                available: 3,
                requested: 4,
                ..
            })
        ));
        assert!(sink.events.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_zero_delta_is_invalid() {
        let (engine, _, product) = engine_with_product(3, 0).await;
        let result = engine
            .apply_stock_change(StockChange::new(
                product.id,
                0,
                MovementReason::Adjustment,
                Actor::admin(ActorId::new()),
            ))
            .await;
        assert!(matches!(result, Err(StockError::InvalidChange(_))));
    }

    #[tokio::test]
    async fn test_unknown_product() {
        let engine = StockMutationEngine::new(InMemoryLedgerStore::new());
        let result = engine
            .apply_stock_change(StockChange::new(
                ProductId::new(),
                1,
                MovementReason::Purchase,
                Actor::staff(ActorId::new()),
            ))
            .await;
        assert!(matches!(result, Err(StockError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_overflow_is_invalid() {
        let (engine, _, product) = engine_with_product(1, 0).await;
        let result = engine
            .apply_stock_change(StockChange::new(
                product.id,
                i64::MAX,
                MovementReason::Purchase,
                Actor::staff(ActorId::new()),
            ))
            .await;
        assert!(matches!(result, Err(StockError::InvalidChange(_))));
    }

    #[tokio::test]
    async fn test_create_product_records_initial_stock() {
        let (engine, _, product) = engine_with_product(25, 5).await;
        assert_eq!(product.quantity, 25);

        let movements = engine
            .store()
            .list_movements(ledger::MovementQuery::for_product(product.id))
            .await
            .unwrap();
        assert_eq!(movements.len(), 1);
        assert_eq!(movements[0].reason, MovementReason::Purchase);
        assert_eq!(movements[0].notes.as_deref(), Some(INITIAL_STOCK_NOTE));
    }

    #[tokio::test]
    async fn test_create_product_without_stock_has_no_movement() {
        let (engine, _, product) = engine_with_product(0, 5).await;
        let check = engine.verify_replay(product.id).await.unwrap();
        assert_eq!(check.movement_count, 0);
        assert!(check.is_consistent());
    }

    #[tokio::test]
    async fn test_create_product_rejects_negative_stock_and_duplicates() {
        let (engine, _, _) = engine_with_product(0, 0).await;
        let actor = Actor::admin(ActorId::new());

        let negative = engine
            .create_product(NewProduct::new("Gadget", "SKU-002"), -1, actor)
            .await;
        assert!(matches!(negative, Err(StockError::InvalidChange(_))));

        let duplicate = engine
            .create_product(NewProduct::new("Widget 2", "SKU-001"), 0, actor)
            .await;
        assert!(matches!(duplicate, Err(StockError::InvalidChange(_))));
    }

    #[tokio::test]
    async fn test_verify_replay_after_mutations() {
        let (engine, _, product) = engine_with_product(10, 0).await;
        let actor = Actor::staff(ActorId::new());
        for delta in [-3, 5, -12] {
            engine
                .apply_stock_change(StockChange::new(
                    product.id,
                    delta,
                    MovementReason::Adjustment,
                    actor,
                ))
                .await
                .unwrap();
        }

        let check = engine.verify_replay(product.id).await.unwrap();
        assert_eq!(check.stored_quantity, 0);
        assert_eq!(check.movement_total, 0);
        assert_eq!(check.movement_count, 4);
        assert!(check.is_consistent());
    }

    #[tokio::test]
    async fn test_acquire_timeout_is_a_storage_error() {
        let store = InMemoryLedgerStore::new();
        let engine = StockMutationEngine::with_config(
            store.clone(),
            EngineConfig {
                acquire_timeout: Duration::from_millis(50),
            },
        );
        let product = engine
            .create_product(NewProduct::new("Widget", "SKU-001"), 5, Actor::staff(ActorId::new()))
            .await
            .unwrap();

        let mut holder = store.begin().await.unwrap();
        holder.lock_product(product.id).await.unwrap();

        let result = engine
            .apply_stock_change(StockChange::new(
                product.id,
                -1,
                MovementReason::Sale,
                Actor::staff(ActorId::new()),
            ))
            .await;
        let err = result.unwrap_err();
        assert!(err.is_retryable());
        assert!(matches!(err, StockError::Storage(LedgerError::LockTimeout)));

        drop(holder);
        assert_eq!(store.total_movements().await, 1);
    }
}
