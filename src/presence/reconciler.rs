use std::sync::Arc;

use anyhow::Context;

use crate::events::{Envelope, EventDispatcher, EventType, HandlerId};

use super::{EntityDeleted, Roster, StatusChange};

/// Apply a `USER_STATUS_CHANGE` envelope to the roster.
///
/// Returns whether the roster changed.
pub fn reconcile_status(roster: &Roster, envelope: &Envelope) -> anyhow::Result<bool> {
    let change: StatusChange = envelope
        .payload_as()
        .context("invalid status change payload")?;

    Ok(roster.apply_status(&change))
}

/// Apply an `ENTITY_DELETED` envelope to the roster.
///
/// Only deletions of subjects touch the roster; other entity types are ignored.
pub fn reconcile_removal(roster: &Roster, envelope: &Envelope) -> anyhow::Result<bool> {
    let deleted: EntityDeleted = envelope
        .payload_as()
        .context("invalid entity deleted payload")?;

    if !deleted.is_subject() {
        tracing::trace!(entity_type = %deleted.entity_type, "Ignoring non-subject deletion");
        return Ok(false);
    }

    Ok(roster.remove(&deleted.id).is_some())
}

/// Keeps a [`Roster`] in sync with the presence events of a dispatcher
pub struct PresenceReconciler {
    roster: Arc<Roster>,
    registrations: Vec<HandlerId>,
}

impl PresenceReconciler {
    /// Register roster handlers on the dispatcher
    pub fn attach(roster: Arc<Roster>, dispatcher: &EventDispatcher) -> Self {
        let status_roster = roster.clone();
        let status_id = dispatcher.register(EventType::StatusChange, move |envelope| {
            reconcile_status(&status_roster, envelope).map(|_| ())
        });

        let removal_roster = roster.clone();
        let removal_id = dispatcher.register(EventType::EntityDeleted, move |envelope| {
            reconcile_removal(&removal_roster, envelope).map(|_| ())
        });

        tracing::debug!("Presence reconciler attached");

        Self {
            roster,
            registrations: vec![status_id, removal_id],
        }
    }

    /// Remove the roster handlers. The roster keeps its last state.
    pub fn detach(self, dispatcher: &EventDispatcher) {
        for id in self.registrations {
            dispatcher.unregister(id);
        }
        tracing::debug!("Presence reconciler detached");
    }

    pub fn roster(&self) -> &Arc<Roster> {
        &self.roster
    }
}
