//! Domain layer for the inventory ledger.
//!
//! This crate provides:
//! - [`StockMutationEngine`], the only path through which product quantities change
//! - low-stock alert derivation ([`derive_alert`], [`AlertDeriver`])
//! - the [`StockChanged`] event and the [`StockEventSink`] seam that carries it
//!   to the alert deriver and the broadcast hub

pub mod alert;
pub mod engine;
pub mod error;
pub mod event;

pub use alert::{
    AlertDeriver, LowStockAlert, LowStockTransition, RaisedAlert, Severity, derive_alert,
};
pub use engine::{
    EngineConfig, INITIAL_STOCK_NOTE, ReplayCheck, StockChange, StockChangeOutcome,
    StockMutationEngine,
};
pub use error::{Result, StockError};
pub use event::{StockChanged, StockEventSink};
