//! Health, connection status and roster endpoints.

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;

use crate::connection::ConnectionState;
use crate::error::AppError;
use crate::events::DispatcherStatsSnapshot;
use crate::presence::{PresenceRecord, StatusCounts};
use crate::server::AppState;
use crate::transport::ConnectionId;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub subject_id: String,
    pub connection: ConnectionStatus,
    pub roster: StatusCounts,
    pub dispatcher: DispatcherStatsSnapshot,
}

#[derive(Debug, Serialize)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_connection: Option<ConnectionId>,
}

/// GET /health
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
    })
}

/// GET /status
pub async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    let context = &state.context;
    let connection = context.connection();

    Json(StatusResponse {
        subject_id: context.session().subject_id().to_string(),
        connection: ConnectionStatus {
            state: connection.state(),
            active_connection: connection.active_connection(),
        },
        roster: context.roster().counts(),
        dispatcher: context.dispatcher().stats(),
    })
}

/// GET /roster - all entries sorted by id
pub async fn list_roster(State(state): State<AppState>) -> Json<Vec<PresenceRecord>> {
    let records = state
        .context
        .roster()
        .snapshot()
        .iter()
        .map(|record| PresenceRecord::clone(record))
        .collect();

    Json(records)
}

/// GET /roster/{id}
pub async fn get_roster_entry(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<PresenceRecord>, AppError> {
    let record = state
        .context
        .roster()
        .get(&id)
        .ok_or_else(|| AppError::NotFound(format!("subject {} is not in the roster", id)))?;

    Ok(Json(PresenceRecord::clone(&record)))
}
