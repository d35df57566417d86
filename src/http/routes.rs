//! HTTP route definitions

use axum::{
    extract::State,
    http::{Method, StatusCode},
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use serde::Serialize;
use std::time::Duration;
use tower_http::{cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer};
use tracing::info;
use uuid::Uuid;

use crate::app::AppState;
use crate::game::MatchPhase;
use crate::host::HostInput;
use crate::util::time::uptime_secs;
use crate::ws::handler::ws_handler;

/// Build the application router
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS]);

    Router::new()
        .route("/health", get(health_handler))
        .route("/ws", get(ws_handler))
        .route("/room", post(open_room_handler))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(10)))
        .layer(cors)
        .with_state(state)
}

// ============================================================================
// Health endpoint
// ============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
    generation: u64,
    match_id: Uuid,
    phase: MatchPhase,
    roster_size: usize,
    capacity: usize,
    join_code: Option<String>,
    live_connections: usize,
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let host = state.host.status();

    Json(HealthResponse {
        status: "ok",
        uptime_secs: uptime_secs(),
        generation: host.generation,
        match_id: host.match_id,
        phase: host.phase,
        roster_size: host.roster_size,
        capacity: state.config.max_players,
        join_code: state.relay.current_code().map(|code| code.to_string()),
        live_connections: state.relay.live_connections(),
    })
}

// ============================================================================
// Room endpoint
// ============================================================================

#[derive(Serialize)]
struct OpenRoomResponse {
    status: &'static str,
    message: String,
}

/// Ask the host to open a room. The code arrives on the health endpoint and
/// over the socket once the host has processed the request.
async fn open_room_handler(
    State(state): State<AppState>,
) -> Result<Json<OpenRoomResponse>, AppError> {
    if state.relay.current_code().is_some() {
        return Err(AppError::Conflict("A room is already open".to_string()));
    }

    state
        .host
        .input_tx
        .send(HostInput::OpenRoom)
        .await
        .map_err(|_| AppError::Unavailable("Host loop is not running".to_string()))?;

    info!("Room requested over HTTP");
    Ok(Json(OpenRoomResponse {
        status: "requested",
        message: "Room creation queued".to_string(),
    }))
}

// ============================================================================
// Error handling
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match &self {
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            AppError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg.clone()),
        };

        let body = serde_json::json!({
            "error": message
        });

        (status, Json(body)).into_response()
    }
}
