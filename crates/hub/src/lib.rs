//! Real-time fan-out of stock events to connected clients.
//!
//! - [`Hub`] owns the registry of connected sessions; [`HubHandle`] is the
//!   only way to reach it
//! - [`ClientSession`] bridges one transport connection and the hub
//! - [`WireEvent`] is the JSON protocol spoken to clients
//! - [`NotificationDispatcher`] persists low-stock alerts and broadcasts them

pub mod error;
pub mod hub;
pub mod message;
pub mod notifier;
pub mod session;
pub mod transport;

pub use error::{HubError, Result};
pub use hub::{Hub, HubConfig, HubHandle, HubStats, Payload};
pub use message::{LowStockEntry, NotificationEntry, SystemStatus, WireEvent};
pub use notifier::{NotificationDispatcher, low_stock_message};
pub use session::{ClientSession, LoopExit, SessionConfig, SessionState};
pub use transport::{ChannelPeer, Frame, FrameSink, FrameStream, channel_transport};
