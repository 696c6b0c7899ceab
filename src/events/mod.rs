//! Typed envelopes and their dispatch to registered handlers.

mod dispatcher;
mod envelope;

pub use dispatcher::{
    DispatchReport, DispatcherStats, DispatcherStatsSnapshot, EventDispatcher, HandlerId,
    HandlerResult,
};
pub use envelope::{Envelope, EventType, OutboundEnvelope};
