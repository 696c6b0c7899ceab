// Infrastructure (shared components)
pub mod config;
pub mod error;
pub mod metrics;
pub mod telemetry;

// Real-time channel
pub mod connection;
pub mod events;
pub mod presence;
pub mod transport;

// Session and composition
pub mod context;
pub mod session;
pub mod snapshot;

// Voice capture capabilities
pub mod speech;

// Status surface
pub mod api;
pub mod server;
