//! PostgreSQL integration tests
//!
//! These tests use a shared PostgreSQL container for efficiency.
//! Run with:
//!
//! ```bash
//! cargo test -p ledger --test postgres_integration -- --test-threads=1
//! ```

use std::sync::Arc;
use std::time::Duration;

use ledger::{
    ActorId, LedgerError, LedgerStore, LedgerStoreExt, LedgerTransaction, MovementQuery,
    MovementReason, NewNotification, NewProduct, NotificationStore, PgLedgerStore, Product,
    StockMovement,
};
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

/// Global shared container
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

            sqlx::raw_sql(include_str!(
                "../../../migrations/001_create_ledger_tables.sql"
            ))
            .execute(&temp_pool)
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

/// Get a fresh store with its own pool and cleared tables
async fn get_test_store() -> PgLedgerStore {
    let info = get_container_info().await;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&info.connection_string)
        .await
        .unwrap();

    sqlx::query("TRUNCATE TABLE stock_movements, notifications, products")
        .execute(&pool)
        .await
        .unwrap();

    PgLedgerStore::new(pool).with_lock_timeout(Duration::from_millis(200))
}

async fn create_product(store: &PgLedgerStore, sku: &str, threshold: i64) -> Product {
    store
        .insert_product(
            NewProduct::new("Widget", sku)
                .minimum_threshold(threshold)
                .price_cents(1299),
        )
        .await
        .unwrap()
}

async fn apply(store: &PgLedgerStore, product: &Product, delta: i64, reason: MovementReason) {
    let mut tx = store.begin().await.unwrap();
    let current = tx.lock_product(product.id).await.unwrap().unwrap();
    tx.update_quantity(product.id, current.quantity + delta)
        .await
        .unwrap();
    tx.append_movement(&StockMovement::new(
        product.id,
        delta,
        reason,
        ActorId::new(),
        None,
    ))
    .await
    .unwrap();
    tx.commit().await.unwrap();
}

#[tokio::test]
#[serial]
async fn insert_and_get_product() {
    let store = get_test_store().await;
    let product = create_product(&store, "SKU-001", 10).await;

    assert_eq!(product.quantity, 0);
    let loaded = store.get_product(product.id).await.unwrap().unwrap();
    assert_eq!(loaded.sku, "SKU-001");
    assert_eq!(loaded.minimum_threshold, 10);
    assert_eq!(loaded.price_cents, 1299);
}

#[tokio::test]
#[serial]
async fn duplicate_sku_is_a_constraint_violation() {
    let store = get_test_store().await;
    create_product(&store, "SKU-001", 0).await;

    let result = store.insert_product(NewProduct::new("Other", "SKU-001")).await;
    assert!(matches!(result, Err(LedgerError::ConstraintViolation(_))));
}

#[tokio::test]
#[serial]
async fn committed_transaction_writes_quantity_and_movement() {
    let store = get_test_store().await;
    let product = create_product(&store, "SKU-001", 10).await;

    apply(&store, &product, 12, MovementReason::Purchase).await;
    apply(&store, &product, -5, MovementReason::Sale).await;

    let loaded = store.get_product(product.id).await.unwrap().unwrap();
    assert_eq!(loaded.quantity, 7);
    assert_eq!(store.movement_total(product.id).await.unwrap(), 7);

    let movements = store
        .list_movements(MovementQuery::for_product(product.id))
        .await
        .unwrap();
    assert_eq!(movements.len(), 2);
    assert_eq!(movements[0].delta, -5);
    assert_eq!(movements[0].reason, MovementReason::Sale);
}

#[tokio::test]
#[serial]
async fn rolled_back_transaction_leaves_no_trace() {
    let store = get_test_store().await;
    let product = create_product(&store, "SKU-001", 0).await;
    apply(&store, &product, 4, MovementReason::Purchase).await;

    let mut tx = store.begin().await.unwrap();
    tx.lock_product(product.id).await.unwrap();
    tx.update_quantity(product.id, 1).await.unwrap();
    tx.append_movement(&StockMovement::new(
        product.id,
        -3,
        MovementReason::Damage,
        ActorId::new(),
        None,
    ))
    .await
    .unwrap();
    tx.rollback().await.unwrap();

    let loaded = store.get_product(product.id).await.unwrap().unwrap();
    assert_eq!(loaded.quantity, 4);
    assert_eq!(store.movement_count(product.id).await.unwrap(), 1);
}

#[tokio::test]
#[serial]
async fn negative_quantity_is_rejected_by_schema() {
    let store = get_test_store().await;
    let product = create_product(&store, "SKU-001", 0).await;

    let mut tx = store.begin().await.unwrap();
    tx.lock_product(product.id).await.unwrap();
    let result = tx.update_quantity(product.id, -1).await;

    assert!(matches!(result, Err(LedgerError::ConstraintViolation(_))));
}

#[tokio::test]
#[serial]
async fn second_locker_times_out_while_row_is_held() {
    let store = get_test_store().await;
    let product = create_product(&store, "SKU-001", 0).await;

    let mut holder = store.begin().await.unwrap();
    holder.lock_product(product.id).await.unwrap();

    let mut waiter = store.begin().await.unwrap();
    let result = waiter.lock_product(product.id).await;
    assert!(matches!(result, Err(LedgerError::LockTimeout)));

    holder.rollback().await.unwrap();
}

#[tokio::test]
#[serial]
async fn movements_are_append_only() {
    let store = get_test_store().await;
    let product = create_product(&store, "SKU-001", 0).await;
    apply(&store, &product, 3, MovementReason::Purchase).await;

    let update = sqlx::query("UPDATE stock_movements SET delta = 100")
        .execute(store.pool())
        .await;
    assert!(update.is_err());

    let delete = sqlx::query("DELETE FROM stock_movements")
        .execute(store.pool())
        .await;
    assert!(delete.is_err());
}

#[tokio::test]
#[serial]
async fn movement_query_filters_and_pages() {
    let store = get_test_store().await;
    let product = create_product(&store, "SKU-001", 0).await;
    apply(&store, &product, 10, MovementReason::Purchase).await;
    apply(&store, &product, -1, MovementReason::Sale).await;
    apply(&store, &product, -2, MovementReason::Sale).await;

    let sales = store
        .list_movements(MovementQuery::for_product(product.id).reason(MovementReason::Sale))
        .await
        .unwrap();
    assert_eq!(sales.len(), 2);

    let page = store
        .list_movements(MovementQuery::for_product(product.id).limit(1).offset(1))
        .await
        .unwrap();
    assert_eq!(page.len(), 1);
    assert_eq!(page[0].delta, -1);

    let by_id = store.get_movement(page[0].id).await.unwrap().unwrap();
    assert_eq!(by_id, page[0]);
}

#[tokio::test]
#[serial]
async fn low_stock_products_and_summary() {
    let store = get_test_store().await;
    let low = create_product(&store, "SKU-001", 10).await;
    apply(&store, &low, 4, MovementReason::Purchase).await;
    let healthy = create_product(&store, "SKU-002", 2).await;
    apply(&store, &healthy, 50, MovementReason::Purchase).await;
    create_product(&store, "SKU-003", 0).await;

    let products = store.low_stock_products().await.unwrap();
    assert_eq!(products.len(), 1);
    assert_eq!(products[0].id, low.id);

    let summary = store.stock_summary().await.unwrap();
    assert_eq!(summary.total_products, 3);
    assert_eq!(summary.low_stock_count, 1);
    assert_eq!(summary.out_of_stock_count, 1);
}

#[tokio::test]
#[serial]
async fn notifications_round_trip() {
    let store = get_test_store().await;
    let user = ActorId::new();

    let created = store
        .create_notification(NewNotification::low_stock(user, "Product 'Widget' stock is low (7 remaining)"))
        .await
        .unwrap();
    assert!(!created.is_read);

    let unread = store.unread_notifications(user, 10).await.unwrap();
    assert_eq!(unread.len(), 1);
    assert_eq!(unread[0].id, created.id);

    assert!(store.mark_notification_read(created.id, user).await.unwrap());
    assert!(store.unread_notifications(user, 10).await.unwrap().is_empty());
}
