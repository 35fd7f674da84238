//! Transcription pipeline.
//!
//! One pipeline run decodes one committed audio segment: it resolves the
//! provider through the model registry, streams delta events while chunks
//! arrive, and finishes with exactly one `completed` or `failed` event for
//! the item. Several runs may be in flight per session; each runs in its
//! own task and the per-item event order is preserved by the shared
//! outbound channel.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::core::asr::registry::AsrModelRegistry;
use crate::core::asr::AsrError;
use crate::core::events::{codes, ErrorDetail, EventSender, ServerPayload};
use crate::core::session::{SessionState, TranscriptionSettings};

/// This gateway always writes the transcript into content part 0;
/// multi-part audio items are not produced.
const CONTENT_INDEX: u32 = 0;

pub struct TranscriptionJob {
    pub state: Arc<SessionState>,
    pub events: EventSender,
    pub registry: Arc<AsrModelRegistry>,
    pub item_id: String,
    pub audio: Vec<u8>,
    pub timeout: Duration,
}

/// Effective transcription settings: the session's, with the registry
/// defaults filling any gaps.
fn resolve_settings(state: &SessionState, registry: &AsrModelRegistry) -> TranscriptionSettings {
    let mut settings = state
        .config_snapshot()
        .transcription()
        .cloned()
        .unwrap_or_default();

    if settings.model.is_empty() {
        settings.model = registry.default_model().unwrap_or_default();
    }
    if settings.language.is_empty() {
        settings.language = registry
            .model_languages(&settings.model)
            .ok()
            .and_then(|languages| languages.first().cloned())
            .unwrap_or_default();
    }
    settings
}

fn resolution_error(err: &AsrError) -> ErrorDetail {
    match err {
        AsrError::InvalidModel { .. } | AsrError::UnsupportedLanguage { .. } => {
            ErrorDetail::invalid_request(err.code(), err.to_string(), None)
        }
        _ => ErrorDetail::server_error(err.code(), err.to_string()),
    }
}

pub async fn run(job: TranscriptionJob) {
    let TranscriptionJob {
        state,
        events,
        registry,
        item_id,
        audio,
        timeout,
    } = job;

    let settings = resolve_settings(&state, &registry);
    debug!(
        session_id = %state.id,
        item_id = %item_id,
        model = %settings.model,
        language = %settings.language,
        bytes = audio.len(),
        "starting transcription"
    );

    let provider = match registry.get_model(&settings.model, &settings.language) {
        Ok(provider) => provider,
        Err(e) => {
            warn!(session_id = %state.id, item_id = %item_id, error = %e, "provider resolution failed");
            events
                .send(ServerPayload::TranscriptionFailed {
                    item_id,
                    content_index: CONTENT_INDEX,
                    error: resolution_error(&e),
                })
                .await;
            return;
        }
    };

    let deadline = Instant::now() + timeout;

    let mut chunks = match provider.transcribe(audio, &settings).await {
        Ok(chunks) => chunks,
        Err(e) => {
            events
                .send(ServerPayload::TranscriptionFailed {
                    item_id,
                    content_index: CONTENT_INDEX,
                    error: ErrorDetail::transcription_error(
                        codes::TRANSCRIPTION_FAILED,
                        e.to_string(),
                    ),
                })
                .await;
            return;
        }
    };

    let mut full_transcript = String::new();
    loop {
        match tokio::time::timeout_at(deadline, chunks.recv()).await {
            // Deadline hit: abandon the chunk stream. Dropping the
            // receiver signals the provider to release its resources.
            Err(_) => {
                warn!(session_id = %state.id, item_id = %item_id, "transcription timed out");
                events
                    .send(ServerPayload::TranscriptionFailed {
                        item_id,
                        content_index: CONTENT_INDEX,
                        error: ErrorDetail::transcription_error(
                            codes::TRANSCRIPTION_TIMEOUT,
                            "Transcription timed out",
                        ),
                    })
                    .await;
                return;
            }
            // End of stream.
            Ok(None) => break,
            Ok(Some(chunk)) => {
                full_transcript.push_str(&chunk.text);
                if !chunk.text.is_empty() {
                    events
                        .send(ServerPayload::TranscriptionDelta {
                            item_id: item_id.clone(),
                            content_index: CONTENT_INDEX,
                            delta: chunk.text,
                        })
                        .await;
                }
            }
        }
    }

    state
        .conversation
        .lock()
        .set_transcript(&item_id, &full_transcript);

    info!(
        session_id = %state.id,
        item_id = %item_id,
        transcript = %full_transcript,
        "transcription completed"
    );
    events
        .send(ServerPayload::TranscriptionCompleted {
            item_id,
            content_index: CONTENT_INDEX,
            transcript: full_transcript,
            usage: None,
        })
        .await;
}
