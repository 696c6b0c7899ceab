//! Connection manager for the real-time channel
//!
//! This module provides:
//! - `ConnectionState`, the observable lifecycle state
//! - `ConnectionManager`, which owns at most one transport handle and routes
//!   inbound frames to the event dispatcher

mod manager;
mod state;

pub use manager::{ConnectionManager, ConnectionOptions, USER_OFFLINE_EVENT, USER_ONLINE_EVENT};
pub use state::ConnectionState;
