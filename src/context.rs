//! Composition root for one realtime session
//!
//! `RealtimeContext::create` wires the dispatcher, the roster and its
//! reconciler, and the connection manager for an explicit `Session`.
//! `teardown` undoes it; nothing here lives in a global.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::config::RealtimeConfig;
use crate::connection::{ConnectionManager, ConnectionOptions, ConnectionState};
use crate::error::Result;
use crate::events::EventDispatcher;
use crate::presence::{PresenceReconciler, Roster};
use crate::session::Session;
use crate::snapshot::RosterSource;
use crate::transport::{Connector, ReconnectPolicy};

pub struct RealtimeContext {
    session: Session,
    dispatcher: Arc<EventDispatcher>,
    roster: Arc<Roster>,
    reconciler: Mutex<Option<PresenceReconciler>>,
    connection: Arc<ConnectionManager>,
}

impl RealtimeContext {
    /// Build the context. Does not connect.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn create(
        config: &RealtimeConfig,
        session: Session,
        connector: Arc<dyn Connector>,
    ) -> Result<Self> {
        let dispatcher = Arc::new(EventDispatcher::new());
        let roster = Arc::new(Roster::new());
        let reconciler = PresenceReconciler::attach(roster.clone(), &dispatcher);

        let options = ConnectionOptions {
            url: session.realtime_url(&config.url)?,
            subject_id: session.subject_id().to_string(),
            policy: ReconnectPolicy::from(config),
        };
        let connection = ConnectionManager::new(options, connector, dispatcher.clone());

        tracing::info!(subject_id = %session.subject_id(), "Realtime context created");

        Ok(Self {
            session,
            dispatcher,
            roster,
            reconciler: Mutex::new(Some(reconciler)),
            connection,
        })
    }

    /// Seed the roster from a snapshot source. Returns the number of entries.
    pub async fn load_snapshot(&self, source: &dyn RosterSource) -> Result<usize> {
        let records = source.fetch().await?;
        Ok(self.roster.seed(records))
    }

    pub fn connect(&self) {
        self.connection.connect();
    }

    pub fn disconnect(&self) {
        self.connection.disconnect();
    }

    /// Disconnect, stop reacting to the channel and detach the reconciler.
    /// The roster keeps its last state.
    pub fn teardown(&self) {
        self.connection.teardown();
        self.detach_reconciler();
    }

    /// Like [`teardown`](Self::teardown), waiting up to `timeout` for the
    /// transport to close
    pub async fn shutdown(&self, timeout: Duration) {
        self.connection.shutdown(timeout).await;
        self.detach_reconciler();
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn dispatcher(&self) -> &Arc<EventDispatcher> {
        &self.dispatcher
    }

    pub fn roster(&self) -> &Arc<Roster> {
        &self.roster
    }

    pub fn connection(&self) -> &Arc<ConnectionManager> {
        &self.connection
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    fn detach_reconciler(&self) {
        let reconciler = self
            .reconciler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(reconciler) = reconciler {
            reconciler.detach(&self.dispatcher);
        }
    }
}
