use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use serde::Serialize;
use smallvec::SmallVec;

use crate::metrics::EnvelopeMetrics;

use super::{Envelope, EventType};

/// Result returned by envelope handlers
pub type HandlerResult = anyhow::Result<()>;

type Handler = Arc<dyn Fn(&Envelope) -> HandlerResult + Send + Sync>;

/// Token returned by [`EventDispatcher::register`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct HandlerId(u64);

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "handler-{}", self.0)
    }
}

struct Registration {
    id: HandlerId,
    handler: Handler,
}

/// Outcome of dispatching one envelope
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    /// Handlers that returned `Ok`
    pub handled: usize,
    /// Handlers that returned an error or panicked
    pub failed: usize,
}

/// Statistics for the event dispatcher
#[derive(Debug, Default)]
pub struct DispatcherStats {
    pub received: AtomicU64,
    pub dispatched: AtomicU64,
    pub unknown_type: AtomicU64,
    pub malformed: AtomicU64,
    pub handler_failures: AtomicU64,
}

impl DispatcherStats {
    pub fn snapshot(&self) -> DispatcherStatsSnapshot {
        DispatcherStatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            dispatched: self.dispatched.load(Ordering::Relaxed),
            unknown_type: self.unknown_type.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            handler_failures: self.handler_failures.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of dispatcher statistics
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispatcherStatsSnapshot {
    pub received: u64,
    pub dispatched: u64,
    pub unknown_type: u64,
    pub malformed: u64,
    pub handler_failures: u64,
}

/// Routes inbound envelopes to the handlers registered for their type.
///
/// Handlers for one type run synchronously in registration order on the
/// dispatching task. A failing handler is logged and skipped; the rest still
/// run. Envelopes are never reordered, batched or deduplicated.
pub struct EventDispatcher {
    handlers: RwLock<HashMap<EventType, Vec<Registration>>>,
    next_id: AtomicU64,
    stats: DispatcherStats,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            stats: DispatcherStats::default(),
        }
    }

    /// Register a handler for one event type
    pub fn register<F>(&self, event_type: EventType, handler: F) -> HandlerId
    where
        F: Fn(&Envelope) -> HandlerResult + Send + Sync + 'static,
    {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));

        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(event_type)
            .or_default()
            .push(Registration {
                id,
                handler: Arc::new(handler),
            });

        tracing::debug!(handler_id = %id, event_type = %event_type, "Handler registered");
        id
    }

    /// Remove a handler. Returns false if it was not registered.
    pub fn unregister(&self, id: HandlerId) -> bool {
        let mut handlers = self.handlers.write().unwrap_or_else(PoisonError::into_inner);

        for registrations in handlers.values_mut() {
            if let Some(pos) = registrations.iter().position(|r| r.id == id) {
                registrations.remove(pos);
                tracing::debug!(handler_id = %id, "Handler unregistered");
                return true;
            }
        }

        false
    }

    pub fn handler_count(&self, event_type: EventType) -> usize {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&event_type)
            .map_or(0, Vec::len)
    }

    pub fn stats(&self) -> DispatcherStatsSnapshot {
        self.stats.snapshot()
    }

    /// Parse a raw text frame and dispatch it.
    ///
    /// Malformed frames are logged and dropped; `None` is returned for them.
    pub fn dispatch_text(&self, text: &str) -> Option<DispatchReport> {
        match Envelope::parse(text) {
            Ok(envelope) => Some(self.dispatch(&envelope)),
            Err(e) => {
                self.stats.malformed.fetch_add(1, Ordering::Relaxed);
                EnvelopeMetrics::record_malformed();
                tracing::warn!(error = %e, "Dropping malformed envelope");
                None
            }
        }
    }

    /// Invoke every handler registered for the envelope's type
    #[tracing::instrument(
        name = "dispatcher.dispatch",
        skip(self, envelope),
        fields(event_type = %envelope.event_type)
    )]
    pub fn dispatch(&self, envelope: &Envelope) -> DispatchReport {
        self.stats.received.fetch_add(1, Ordering::Relaxed);

        let Some(kind) = envelope.kind() else {
            self.stats.unknown_type.fetch_add(1, Ordering::Relaxed);
            EnvelopeMetrics::record_unknown_type();
            tracing::debug!(event_type = %envelope.event_type, "No handler for envelope type, dropping");
            return DispatchReport::default();
        };
        EnvelopeMetrics::record_received(kind.as_str());

        // Handlers run outside the lock so they may register or unregister.
        let handlers: SmallVec<[(HandlerId, Handler); 4]> = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&kind)
            .map(|registrations| {
                registrations
                    .iter()
                    .map(|r| (r.id, r.handler.clone()))
                    .collect()
            })
            .unwrap_or_default();

        if handlers.is_empty() {
            tracing::debug!(event_type = %kind, "No handler registered, dropping");
            return DispatchReport::default();
        }

        self.stats.dispatched.fetch_add(1, Ordering::Relaxed);
        let mut report = DispatchReport::default();

        for (id, handler) in handlers {
            match panic::catch_unwind(AssertUnwindSafe(|| handler(envelope))) {
                Ok(Ok(())) => report.handled += 1,
                Ok(Err(e)) => {
                    report.failed += 1;
                    self.record_failure();
                    tracing::warn!(handler_id = %id, error = %e, "Handler failed");
                }
                Err(panic) => {
                    report.failed += 1;
                    self.record_failure();
                    tracing::warn!(
                        handler_id = %id,
                        panic = %panic_message(panic.as_ref()),
                        "Handler panicked"
                    );
                }
            }
        }

        report
    }

    fn record_failure(&self) {
        self.stats.handler_failures.fetch_add(1, Ordering::Relaxed);
        EnvelopeMetrics::record_handler_failure();
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&'static str>() {
        *s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}
