//! Realtime WebSocket handler.
//!
//! Owns the per-connection driver task: it accepts the upgrade, spawns
//! the single writer task that serializes all outbound frames, runs the
//! blocking read loop through the session engine, and cleans up on every
//! exit path.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Extension,
};
use futures::{SinkExt, StreamExt};
use tokio::select;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::core::events::{EventSender, ServerEvent};
use crate::core::session::{ids, SessionEngine};
use crate::middleware::ClientIp;
use crate::state::AppState;

/// Outbound event queue depth per connection.
const CHANNEL_BUFFER_SIZE: usize = 256;

/// Maximum WebSocket frame and message size (10 MB).
const MAX_WS_FRAME_SIZE: usize = 10 * 1024 * 1024;

/// How often the driver loop checks for expiry while idle.
const EXPIRY_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Sessions idle longer than this are closed even before their TTL.
const IDLE_TIMEOUT: Duration = Duration::from_secs(300);

/// Default PCM sample rate for new sessions.
const DEFAULT_SAMPLE_RATE: u32 = 16_000;

pub async fn realtime_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    client_ip: Option<Extension<ClientIp>>,
) -> Response {
    // Missing Origin means a same-origin (non-browser) client; allow it.
    let client_ip = client_ip.map(|Extension(ClientIp(ip))| ip);

    if let Some(origin) = headers.get("origin").and_then(|v| v.to_str().ok()) {
        if !state.config.is_origin_allowed(origin) {
            warn!(origin, "rejecting connection from disallowed origin");
            if let Some(ip) = client_ip {
                state.limiter.remove_connection(ip);
            }
            return (StatusCode::FORBIDDEN, "Origin not allowed").into_response();
        }
    }
    ws.max_frame_size(MAX_WS_FRAME_SIZE)
        .max_message_size(MAX_WS_FRAME_SIZE)
        .on_upgrade(move |socket| handle_socket(socket, state, client_ip))
}

async fn handle_socket(
    socket: WebSocket,
    state: Arc<AppState>,
    client_ip: Option<std::net::IpAddr>,
) {
    let (mut socket_tx, mut socket_rx) = socket.split();
    let (event_tx, mut event_rx) = mpsc::channel::<ServerEvent>(CHANNEL_BUFFER_SIZE);

    // Single writer task: every outbound frame from the session task and
    // its transcription children funnels through here.
    let writer_task = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            let json = match serde_json::to_string(&event) {
                Ok(json) => json,
                Err(e) => {
                    error!(error = %e, "failed to serialize outbound event");
                    continue;
                }
            };
            if let Err(e) = socket_tx.send(Message::Text(json.into())).await {
                debug!(error = %e, "outbound write failed, client gone");
                break;
            }
        }
    });

    let session_id = ids::session_id();
    let conversation_id = ids::conversation_id();
    let session_state = state.sessions.create_transcription_session(
        &session_id,
        &conversation_id,
        &state.config.asr.default_model,
        &state.config.default_language(),
        DEFAULT_SAMPLE_RATE,
        state.config.audio.max_buffer_size,
    );
    info!(session_id = %session_id, "realtime session established");

    let mut engine = SessionEngine::new(
        session_state.clone(),
        state.sessions.clone(),
        state.vads.clone(),
        state.registry.clone(),
        EventSender::new(event_tx),
        state.config.audio.transcription_timeout,
    );
    engine.send_session_created().await;

    let expires_at = session_state.config_snapshot().expires_at;

    loop {
        select! {
            message = socket_rx.next() => {
                match message {
                    Some(Ok(Message::Text(text))) => {
                        engine.process_message(text.as_bytes()).await;
                    }
                    Some(Ok(Message::Binary(data))) => {
                        // The protocol is JSON text frames; binary frames
                        // go through the same decode path and error out.
                        engine.process_message(&data).await;
                    }
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                    Some(Ok(Message::Close(_))) => {
                        debug!(session_id = %session_id, "close frame received");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(session_id = %session_id, error = %e, "websocket read error");
                        break;
                    }
                    None => {
                        debug!(session_id = %session_id, "connection closed by client");
                        break;
                    }
                }
            }
            _ = tokio::time::sleep(EXPIRY_CHECK_INTERVAL) => {
                if session_state.idle_for() > IDLE_TIMEOUT {
                    info!(session_id = %session_id, "closing idle session");
                    break;
                }
                if let Some(expires_at) = expires_at {
                    let now = SystemTime::now()
                        .duration_since(UNIX_EPOCH)
                        .map(|d| d.as_secs() as i64)
                        .unwrap_or(0);
                    if now >= expires_at {
                        info!(session_id = %session_id, "session TTL expired");
                        break;
                    }
                }
            }
        }
    }

    // Cleanup runs on every exit path, abrupt transport failure included.
    engine.shutdown();
    writer_task.abort();
    if let Some(ip) = client_ip {
        state.limiter.remove_connection(ip);
    }
    info!(session_id = %session_id, "realtime connection terminated");
}
