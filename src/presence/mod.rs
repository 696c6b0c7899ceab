//! Presence roster and the reconciler that keeps it in sync
//!
//! This module provides:
//! - `PresenceRecord` / `PresenceStatus` types and the wire payloads
//! - `Roster`, the id-keyed map with shared `Arc` entries
//! - `PresenceReconciler`, the dispatcher handlers that mutate the roster

mod reconciler;
mod roster;
mod types;

pub use reconciler::{reconcile_removal, reconcile_status, PresenceReconciler};
pub use roster::{Roster, RosterChange, StatusCounts};
pub use types::{EntityDeleted, PresenceRecord, PresenceStatus, StatusChange};
