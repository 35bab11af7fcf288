//! Shared types for the inventory ledger workspace.

pub mod types;

pub use types::{
    Actor, ActorId, MovementId, NotificationId, ParseRoleError, ProductId, Role, SessionId,
};
