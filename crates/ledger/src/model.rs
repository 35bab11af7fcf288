use std::str::FromStr;

use chrono::{DateTime, Utc};
use common::{ActorId, MovementId, NotificationId, ProductId};
use serde::{Deserialize, Serialize};

use crate::LedgerError;

/// A product row. `quantity` is only ever changed through a locked
/// transaction that also appends a [`StockMovement`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub sku: String,
    pub quantity: i64,
    pub minimum_threshold: i64,
    pub price_cents: i64,
    pub category: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Product {
    /// Returns true if the product is at or below its low-stock threshold.
    ///
    /// A threshold of zero disables low-stock tracking for the product.
    pub fn is_low_stock(&self) -> bool {
        self.minimum_threshold > 0 && self.quantity <= self.minimum_threshold
    }

    /// Returns true if no units remain.
    pub fn is_out_of_stock(&self) -> bool {
        self.quantity == 0
    }
}

/// Fields needed to insert a product. New products always start at
/// quantity zero; opening stock is recorded as a movement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewProduct {
    pub name: String,
    pub sku: String,
    pub minimum_threshold: i64,
    pub price_cents: i64,
    pub category: String,
}

impl NewProduct {
    pub fn new(name: impl Into<String>, sku: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sku: sku.into(),
            minimum_threshold: 0,
            price_cents: 0,
            category: "uncategorized".to_string(),
        }
    }

    pub fn minimum_threshold(mut self, threshold: i64) -> Self {
        self.minimum_threshold = threshold;
        self
    }

    pub fn price_cents(mut self, price_cents: i64) -> Self {
        self.price_cents = price_cents;
        self
    }

    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    /// Checks the column constraints the products table enforces.
    pub fn validate(&self) -> crate::Result<()> {
        if self.name.trim().is_empty() {
            return Err(LedgerError::ConstraintViolation(
                "product name must not be empty".to_string(),
            ));
        }
        if self.sku.trim().is_empty() {
            return Err(LedgerError::ConstraintViolation(
                "product sku must not be empty".to_string(),
            ));
        }
        if self.minimum_threshold < 0 {
            return Err(LedgerError::ConstraintViolation(
                "minimum_threshold must be >= 0".to_string(),
            ));
        }
        if self.price_cents < 0 {
            return Err(LedgerError::ConstraintViolation(
                "price must be >= 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Why a movement happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MovementReason {
    Purchase,
    Sale,
    Adjustment,
    Return,
    Damage,
    Transfer,
}

impl MovementReason {
    pub const ALL: [MovementReason; 6] = [
        MovementReason::Purchase,
        MovementReason::Sale,
        MovementReason::Adjustment,
        MovementReason::Return,
        MovementReason::Damage,
        MovementReason::Transfer,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MovementReason::Purchase => "purchase",
            MovementReason::Sale => "sale",
            MovementReason::Adjustment => "adjustment",
            MovementReason::Return => "return",
            MovementReason::Damage => "damage",
            MovementReason::Transfer => "transfer",
        }
    }
}

impl std::fmt::Display for MovementReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MovementReason {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MovementReason::ALL
            .into_iter()
            .find(|reason| reason.as_str() == s)
            .ok_or_else(|| LedgerError::Decode(format!("unknown movement reason: {s}")))
    }
}

/// One immutable signed quantity change. Never updated or deleted once
/// written; the sum of all deltas for a product equals its quantity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockMovement {
    pub id: MovementId,
    pub product_id: ProductId,
    pub delta: i64,
    pub reason: MovementReason,
    pub actor_id: ActorId,
    pub created_at: DateTime<Utc>,
    pub notes: Option<String>,
}

impl StockMovement {
    pub fn new(
        product_id: ProductId,
        delta: i64,
        reason: MovementReason,
        actor_id: ActorId,
        notes: Option<String>,
    ) -> Self {
        Self {
            id: MovementId::new(),
            product_id,
            delta,
            reason,
            actor_id,
            created_at: Utc::now(),
            notes,
        }
    }

    /// Checks the column constraints the movements table enforces.
    pub fn validate(&self) -> crate::Result<()> {
        if self.delta == 0 {
            return Err(LedgerError::ConstraintViolation(
                "movement delta must not be zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Kind of a persisted notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    LowStock,
    System,
    User,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::LowStock => "low_stock",
            NotificationKind::System => "system",
            NotificationKind::User => "user",
        }
    }
}

impl FromStr for NotificationKind {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low_stock" => Ok(NotificationKind::LowStock),
            "system" => Ok(NotificationKind::System),
            "user" => Ok(NotificationKind::User),
            other => Err(LedgerError::Decode(format!(
                "unknown notification kind: {other}"
            ))),
        }
    }
}

/// A notification addressed to one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub id: NotificationId,
    pub user_id: ActorId,
    pub message: String,
    pub kind: NotificationKind,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewNotification {
    pub user_id: ActorId,
    pub message: String,
    pub kind: NotificationKind,
}

impl NewNotification {
    pub fn low_stock(user_id: ActorId, message: impl Into<String>) -> Self {
        Self {
            user_id,
            message: message.into(),
            kind: NotificationKind::LowStock,
        }
    }
}

/// Aggregate counters over the products table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockSummary {
    pub total_products: i64,
    pub low_stock_count: i64,
    pub out_of_stock_count: i64,
}
