//! Notification fan-out
//!
//! - **broker**: connection registry with per-connection filtering and bounded outboxes
//! - **listener**: the process-wide database change listener feeding the broker

pub mod broker;
pub mod listener;

pub use broker::{Broker, Filter, Outbound, Subscription};
pub use listener::ChangeListener;
