//! API layer - read-only status endpoints.

mod metrics;
mod routes;
mod status;

pub use metrics::prometheus_metrics;
pub use routes::api_routes;
pub use status::{get_roster_entry, health, list_roster, status};
