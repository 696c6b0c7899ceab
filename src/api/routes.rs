use axum::{routing::get, Router};

use crate::server::AppState;

use super::metrics::prometheus_metrics;
use super::status::{get_roster_entry, health, list_roster, status};

pub fn api_routes() -> Router<AppState> {
    Router::new()
        // Health & status
        .route("/health", get(health))
        .route("/status", get(status))
        // Roster
        .route("/roster", get(list_roster))
        .route("/roster/{id}", get(get_roster_entry))
        // Prometheus
        .route("/metrics", get(prometheus_metrics))
}
