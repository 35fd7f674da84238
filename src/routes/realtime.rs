//! Realtime WebSocket route.
//!
//! `GET /v1/realtime` upgrades to a WebSocket speaking the OpenAI
//! Realtime event protocol. After the upgrade the server sends
//! `session.created`; the client streams `input_audio_buffer.append`
//! events (base64 PCM16) and receives transcription deltas and
//! completions.

use std::sync::Arc;

use axum::{routing::get, Router};
use tower_http::trace::TraceLayer;

use crate::handlers::realtime::realtime_handler;
use crate::state::AppState;

pub fn create_realtime_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/v1/realtime", get(realtime_handler))
        .layer(TraceLayer::new_for_http())
}
