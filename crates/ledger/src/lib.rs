//! Ledger store: durable product quantities plus the append-only movement log.
//!
//! The store exposes transactional primitives (begin, lock-for-update, write,
//! append, commit, rollback) through [`LedgerStore`] and [`LedgerTransaction`].
//! Invariants that belong to the storage boundary (`quantity >= 0`,
//! `delta != 0`, a closed set of movement reasons) are enforced here as well
//! as in the mutation engine.

pub mod error;
pub mod memory;
pub mod model;
pub mod postgres;
pub mod query;
pub mod store;

pub use common::{ActorId, MovementId, NotificationId, ProductId};
pub use error::{LedgerError, Result};
pub use memory::{InMemoryLedgerStore, InMemoryTransaction};
pub use model::{
    MovementReason, NewNotification, NewProduct, Notification, NotificationKind, Product,
    StockMovement, StockSummary,
};
pub use postgres::{PgLedgerStore, PgTransaction};
pub use query::MovementQuery;
pub use store::{LedgerStore, LedgerStoreExt, LedgerTransaction, NotificationStore};
