//! Low-stock alert derivation.
//!
//! Alerts fire on the transition into low stock, not on every mutation while
//! stock stays low. A product whose threshold is zero never alerts.

use chrono::{DateTime, Utc};
use common::{ActorId, ProductId};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::event::{StockChanged, StockEventSink};

/// How urgent a low-stock condition is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    High,
    Critical,
}

impl Severity {
    /// `Critical` when nothing is left, `High` otherwise.
    pub fn for_quantity(quantity: i64) -> Self {
        if quantity == 0 {
            Severity::Critical
        } else {
            Severity::High
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a mutation left a product relative to its threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LowStockTransition {
    /// Crossed from above the threshold to at-or-below it.
    Entered,
    /// Was already low and still is.
    StillLow,
    /// Was low and is now above the threshold.
    Cleared,
    /// Above the threshold, or alerting is disabled.
    Healthy,
}

impl LowStockTransition {
    /// Classifies a change. Without a previous quantity the product is
    /// treated as having been healthy.
    pub fn classify(previous_quantity: Option<i64>, new_quantity: i64, threshold: i64) -> Self {
        if threshold <= 0 {
            return LowStockTransition::Healthy;
        }
        let was_low = previous_quantity.is_some_and(|q| q <= threshold);
        let is_low = new_quantity <= threshold;
        match (was_low, is_low) {
            (false, true) => LowStockTransition::Entered,
            (true, true) => LowStockTransition::StillLow,
            (true, false) => LowStockTransition::Cleared,
            (false, false) => LowStockTransition::Healthy,
        }
    }
}

/// A product that has just entered low stock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LowStockAlert {
    pub product_id: ProductId,
    pub severity: Severity,
    pub quantity: i64,
    pub threshold: i64,
}

/// Returns an alert only if this change entered low stock.
pub fn derive_alert(
    product_id: ProductId,
    new_quantity: i64,
    threshold: i64,
    previous_quantity: Option<i64>,
) -> Option<LowStockAlert> {
    match LowStockTransition::classify(previous_quantity, new_quantity, threshold) {
        LowStockTransition::Entered => Some(LowStockAlert {
            product_id,
            severity: Severity::for_quantity(new_quantity),
            quantity: new_quantity,
            threshold,
        }),
        _ => None,
    }
}

/// An alert together with the context the notification collaborator needs
/// to address and phrase it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RaisedAlert {
    pub alert: LowStockAlert,
    pub product_name: String,
    pub actor_id: ActorId,
    pub raised_at: DateTime<Utc>,
}

/// Sink that derives alerts from committed changes and queues them for the
/// notification collaborator.
///
/// Alerts are rare (one per threshold crossing), so the queue is unbounded
/// and publishing never drops one.
#[derive(Debug, Clone)]
pub struct AlertDeriver {
    tx: mpsc::UnboundedSender<RaisedAlert>,
}

impl AlertDeriver {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<RaisedAlert>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl StockEventSink for AlertDeriver {
    fn publish(&self, event: &StockChanged) {
        let Some(alert) = derive_alert(
            event.product_id,
            event.new_quantity,
            event.minimum_threshold,
            Some(event.previous_quantity),
        ) else {
            return;
        };

        metrics::counter!("stock_alerts_total", "severity" => alert.severity.as_str())
            .increment(1);
        tracing::info!(
            product_id = %alert.product_id,
            severity = %alert.severity,
            quantity = alert.quantity,
            threshold = alert.threshold,
            "low stock alert raised"
        );

        let raised = RaisedAlert {
            alert,
            product_name: event.product_name.clone(),
            actor_id: event.actor_id,
            raised_at: event.timestamp,
        };
        if self.tx.send(raised).is_err() {
            tracing::warn!(product_id = %event.product_id, "alert receiver dropped");
        }
    }
}
