//! JSON messages pushed to connected clients.
//!
//! Every message is an object with a `type` tag and a `timestamp`:
//!
//! ```json
//! {"type":"stock_change","product_id":"…","new_stock":7,"delta":-5,"actor_id":"…","timestamp":"…"}
//! ```

use chrono::{DateTime, Utc};
use common::{ActorId, NotificationId, ProductId};
use domain::{Severity, StockChanged};
use ledger::{Notification, NotificationKind, Product, StockSummary};
use serde::{Deserialize, Serialize};

use crate::Result;

/// One low-stock product in a `stock_update` snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LowStockEntry {
    pub id: ProductId,
    pub name: String,
    pub sku: String,
    pub stock: i64,
    pub minimum_threshold: i64,
    pub severity: Severity,
}

impl From<&Product> for LowStockEntry {
    fn from(product: &Product) -> Self {
        Self {
            id: product.id,
            name: product.name.clone(),
            sku: product.sku.clone(),
            stock: product.quantity,
            minimum_threshold: product.minimum_threshold,
            severity: Severity::for_quantity(product.quantity),
        }
    }
}

/// One unread notification in a `notifications` snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationEntry {
    pub id: NotificationId,
    pub message: String,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub created_at: DateTime<Utc>,
}

impl From<&Notification> for NotificationEntry {
    fn from(notification: &Notification) -> Self {
        Self {
            id: notification.id,
            message: notification.message.clone(),
            kind: notification.kind,
            created_at: notification.created_at,
        }
    }
}

/// Aggregate counters sent in a `system_status` message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemStatus {
    pub total_products: i64,
    pub low_stock_count: i64,
    pub out_of_stock_count: i64,
    pub connected_clients: usize,
    pub server_time: DateTime<Utc>,
}

/// Messages delivered to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireEvent {
    /// A committed quantity change.
    StockChange {
        product_id: ProductId,
        new_stock: i64,
        delta: i64,
        actor_id: ActorId,
        timestamp: DateTime<Utc>,
    },

    /// A notification addressed to one user.
    Notification {
        user_id: ActorId,
        message: String,
        notif_type: NotificationKind,
        timestamp: DateTime<Utc>,
    },

    /// Aggregate counters.
    SystemStatus {
        data: SystemStatus,
        timestamp: DateTime<Utc>,
    },

    /// Current low-stock products, pushed on connect.
    StockUpdate {
        data: Vec<LowStockEntry>,
        message: String,
        timestamp: DateTime<Utc>,
    },

    /// Unread notifications for the connecting user, pushed on connect.
    Notifications {
        data: Vec<NotificationEntry>,
        timestamp: DateTime<Utc>,
    },
}

impl WireEvent {
    pub fn stock_change(event: &StockChanged) -> Self {
        WireEvent::StockChange {
            product_id: event.product_id,
            new_stock: event.new_quantity,
            delta: event.delta,
            actor_id: event.actor_id,
            timestamp: event.timestamp,
        }
    }

    pub fn notification(notification: &Notification) -> Self {
        WireEvent::Notification {
            user_id: notification.user_id,
            message: notification.message.clone(),
            notif_type: notification.kind,
            timestamp: notification.created_at,
        }
    }

    pub fn system_status(summary: StockSummary, connected_clients: usize) -> Self {
        let now = Utc::now();
        WireEvent::SystemStatus {
            data: SystemStatus {
                total_products: summary.total_products,
                low_stock_count: summary.low_stock_count,
                out_of_stock_count: summary.out_of_stock_count,
                connected_clients,
                server_time: now,
            },
            timestamp: now,
        }
    }

    pub fn stock_update(products: &[Product]) -> Self {
        WireEvent::StockUpdate {
            data: products.iter().map(LowStockEntry::from).collect(),
            message: "Low stock alerts".to_string(),
            timestamp: Utc::now(),
        }
    }

    pub fn notifications(notifications: &[Notification]) -> Self {
        WireEvent::Notifications {
            data: notifications.iter().map(NotificationEntry::from).collect(),
            timestamp: Utc::now(),
        }
    }

    /// The value of the `type` tag.
    pub fn event_type(&self) -> &'static str {
        match self {
            WireEvent::StockChange { .. } => "stock_change",
            WireEvent::Notification { .. } => "notification",
            WireEvent::SystemStatus { .. } => "system_status",
            WireEvent::StockUpdate { .. } => "stock_update",
            WireEvent::Notifications { .. } => "notifications",
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
