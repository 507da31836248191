//! Signaling Session Machine
//!
//! The WebSocket control plane: connection lifecycle, authentication,
//! resumable sessions, heartbeats, group operations and WebRTC signaling
//! forwarding.

pub mod broadcasts;
pub mod error;
mod handler;
mod heartbeat;
mod rate_limit;
mod session;

use axum::extract::{State, WebSocketUpgrade};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use gv_protocol::ServerMessage;
use tower_http::trace::TraceLayer;
use tracing::info;
use uuid::Uuid;

pub use error::SignalError;
pub use heartbeat::spawn_heartbeat_monitor;
pub use rate_limit::OpRateLimiter;
pub use session::{new_resume_token, ClientSession, CloseCommand, ResumableSession, SessionManager};

use crate::state::AppState;

/// Build the signaling router: the voice WebSocket and a health probe.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/voice", get(voice_ws_handler))
        .route("/healthz", get(healthz))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

/// WebSocket upgrade, gated on the Origin allowlist.
async fn voice_ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Response {
    let allowed = match headers.get(header::ORIGIN).and_then(|v| v.to_str().ok()) {
        Some(origin) => state.config.origin_allowed(origin),
        // Only a wildcard allowlist admits clients without an Origin.
        None => state.config.allowed_origins.iter().any(|o| o == "*"),
    };
    if !allowed {
        return (StatusCode::FORBIDDEN, "Origin not allowed").into_response();
    }

    ws.on_upgrade(move |socket| handler::handle_socket(socket, state))
}

/// Plugin-driven notification that a player's in-game session appeared.
/// Clears the pending flag and re-announces the player.
pub fn activate_pending(state: &AppState, player_id: Uuid) {
    let Some(session) = state.sessions.get(player_id) else {
        return;
    };
    if !session.is_pending() {
        return;
    }
    session
        .pending_game
        .store(false, std::sync::atomic::Ordering::Relaxed);
    *session.pending_deadline.write().expect("pending lock") = None;
    session.send(ServerMessage::GameSessionReady {});
    broadcasts::broadcast_all(state, &broadcasts::player_list_message(state));
    info!(client_id = %player_id, "Pending game session activated");
}
