use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::broadcast;

use crate::metrics::ROSTER_SIZE;

use super::{PresenceRecord, PresenceStatus, StatusChange};

const CHANGE_CHANNEL_CAPACITY: usize = 256;

/// Change notification published after every roster mutation
#[derive(Debug, Clone)]
pub enum RosterChange {
    Upserted(Arc<PresenceRecord>),
    Removed(String),
    Seeded { count: usize },
}

/// Per-status subject counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub total: usize,
    pub online: usize,
    pub away: usize,
    pub offline: usize,
}

/// Subject id -> presence record.
///
/// Entries are `Arc`s: an update swaps the one entry it touches and every
/// other entry keeps its allocation, so readers holding earlier `Arc`s are
/// never affected and no whole-map copy happens.
pub struct Roster {
    entries: DashMap<String, Arc<PresenceRecord>>,
    changes: broadcast::Sender<RosterChange>,
}

impl Roster {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            entries: DashMap::new(),
            changes,
        }
    }

    /// Replace the whole roster with a snapshot. Later duplicates win.
    pub fn seed(&self, records: impl IntoIterator<Item = PresenceRecord>) -> usize {
        self.entries.clear();
        for record in records {
            self.entries.insert(record.id.clone(), Arc::new(record));
        }

        let count = self.entries.len();
        ROSTER_SIZE.set(count as i64);
        tracing::info!(count = count, "Roster seeded from snapshot");
        self.publish(RosterChange::Seeded { count });
        count
    }

    /// Merge a status delta into the entry for `change.user_id`.
    ///
    /// Returns false when the delta leaves the entry unchanged; the existing
    /// allocation is kept in that case.
    pub fn apply_status(&self, change: &StatusChange) -> bool {
        let updated = match self.entries.entry(change.user_id.clone()) {
            Entry::Occupied(mut occupied) => {
                let current = occupied.get();
                let last_active_at = change
                    .last_active
                    .clone()
                    .or_else(|| current.last_active_at.clone());

                if current.status == change.status && current.last_active_at == last_active_at {
                    return false;
                }

                let next = Arc::new(PresenceRecord {
                    status: change.status,
                    last_active_at,
                    ..PresenceRecord::clone(current)
                });
                occupied.insert(next.clone());
                next
            }
            Entry::Vacant(vacant) => {
                let record = Arc::new(PresenceRecord {
                    last_active_at: change.last_active.clone(),
                    ..PresenceRecord::new(change.user_id.clone(), change.status)
                });
                vacant.insert(record.clone());
                record
            }
        };

        ROSTER_SIZE.set(self.entries.len() as i64);
        tracing::debug!(
            subject_id = %updated.id,
            status = %updated.status,
            "Roster entry updated"
        );
        self.publish(RosterChange::Upserted(updated));
        true
    }

    pub fn remove(&self, id: &str) -> Option<Arc<PresenceRecord>> {
        let (_, removed) = self.entries.remove(id)?;

        ROSTER_SIZE.set(self.entries.len() as i64);
        tracing::debug!(subject_id = %id, "Roster entry removed");
        self.publish(RosterChange::Removed(id.to_string()));
        Some(removed)
    }

    pub fn get(&self, id: &str) -> Option<Arc<PresenceRecord>> {
        self.entries.get(id).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All entries sorted by subject id
    pub fn snapshot(&self) -> Vec<Arc<PresenceRecord>> {
        let mut records: Vec<_> = self
            .entries
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        records.sort_by(|a, b| a.id.cmp(&b.id));
        records
    }

    pub fn counts(&self) -> StatusCounts {
        let mut counts = StatusCounts::default();
        for entry in self.entries.iter() {
            counts.total += 1;
            match entry.value().status {
                PresenceStatus::Online => counts.online += 1,
                PresenceStatus::Away => counts.away += 1,
                PresenceStatus::Offline => counts.offline += 1,
            }
        }
        counts
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RosterChange> {
        self.changes.subscribe()
    }

    fn publish(&self, change: RosterChange) {
        // No subscribers is fine
        let _ = self.changes.send(change);
    }
}

impl Default for Roster {
    fn default() -> Self {
        Self::new()
    }
}
