//! Stock mutation engine against PostgreSQL.
//!
//! These tests use a shared PostgreSQL container, so the row lock is the
//! database's `SELECT ... FOR UPDATE`. Run with:
//!
//! ```bash
//! cargo test -p domain --test postgres_integration -- --test-threads=1
//! ```

use std::sync::Arc;
use std::time::Duration;

use common::{Actor, ActorId};
use domain::{StockChange, StockError, StockMutationEngine};
use ledger::{LedgerStore, LedgerStoreExt, MovementReason, NewProduct, PgLedgerStore, Product};
use serial_test::serial;
use sqlx::PgPool;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

/// Shared container info - container stays alive for all tests
struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();

            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();

            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            let temp_pool = PgPool::connect(&connection_string).await.unwrap();
            PgLedgerStore::new(temp_pool.clone())
                .run_migrations()
                .await
                .unwrap();
            temp_pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

/// Engine over a fresh pool with cleared tables
async fn get_test_engine() -> StockMutationEngine<PgLedgerStore> {
    let info = get_container_info().await;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(10)
        .connect(&info.connection_string)
        .await
        .unwrap();

    sqlx::query("TRUNCATE TABLE stock_movements, notifications, products")
        .execute(&pool)
        .await
        .unwrap();

    StockMutationEngine::new(PgLedgerStore::new(pool).with_lock_timeout(Duration::from_secs(2)))
}

async fn seed(engine: &StockMutationEngine<PgLedgerStore>, quantity: i64) -> Product {
    engine
        .create_product(
            NewProduct::new("Widget", "SKU-001"),
            quantity,
            Actor::admin(ActorId::new()),
        )
        .await
        .unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[serial]
async fn competing_decrements_only_one_wins() {
    let engine = get_test_engine().await;
    let product = seed(&engine, 10).await;
    let actor = Actor::staff(ActorId::new());

    let handles: Vec<_> = (0..2)
        .map(|_| {
            let engine = engine.clone();
            let change = StockChange::new(product.id, -8, MovementReason::Sale, actor);
            tokio::spawn(async move { engine.apply_stock_change(change).await })
        })
        .collect();

    let mut committed = Vec::new();
    let mut refused = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(outcome) => committed.push(outcome),
            Err(StockError::InsufficientStock {
                available,
                requested,
                ..
            }) => {
                assert_eq!(available, 2);
                assert_eq!(requested, 8);
                refused += 1;
            }
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!(committed.len(), 1);
    assert_eq!(committed[0].new_quantity, 2);
    assert_eq!(refused, 1);

    let stored = engine.store().get_product(product.id).await.unwrap().unwrap();
    assert_eq!(stored.quantity, 2);
    assert_eq!(engine.store().movement_count(product.id).await.unwrap(), 2);
    assert!(engine.verify_replay(product.id).await.unwrap().is_consistent());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[serial]
async fn concurrent_changes_keep_quantity_and_log_in_step() {
    let engine = get_test_engine().await;
    let product = seed(&engine, 20).await;
    let actor = Actor::staff(ActorId::new());

    let handles: Vec<_> = (0..30)
        .map(|i| {
            let engine = engine.clone();
            let delta = if i % 3 == 0 { 2 } else { -3 };
            let change = StockChange::new(product.id, delta, MovementReason::Adjustment, actor);
            tokio::spawn(async move { (delta, engine.apply_stock_change(change).await) })
        })
        .collect();

    let mut committed_sum = 0;
    for handle in handles {
        let (delta, result) = handle.await.unwrap();
        match result {
            Ok(outcome) => {
                assert!(outcome.new_quantity >= 0);
                committed_sum += delta;
            }
            Err(StockError::InsufficientStock { .. }) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    let stored = engine.store().get_product(product.id).await.unwrap().unwrap();
    assert_eq!(stored.quantity, 20 + committed_sum);
    assert!(engine.verify_replay(product.id).await.unwrap().is_consistent());
}
