//! Events emitted after a stock mutation commits.

use chrono::{DateTime, Utc};
use common::{ActorId, MovementId, ProductId};
use ledger::MovementReason;
use serde::{Deserialize, Serialize};

/// A committed quantity change. Emitted exactly once per successful
/// mutation, never for a failed one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockChanged {
    pub product_id: ProductId,
    pub product_name: String,
    pub movement_id: MovementId,
    /// Quantity read under the row lock, before the change.
    pub previous_quantity: i64,
    pub new_quantity: i64,
    pub delta: i64,
    pub reason: MovementReason,
    pub actor_id: ActorId,
    pub minimum_threshold: i64,
    pub timestamp: DateTime<Utc>,
}

/// Receiver of committed stock changes.
///
/// `publish` is called from the mutation path after commit and must not
/// block: implementations hand the event off to a queue and return.
pub trait StockEventSink: Send + Sync {
    fn publish(&self, event: &StockChanged);
}
