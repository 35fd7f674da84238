//! Per-session event dispatch.
//!
//! One engine exists per accepted connection. It decodes inbound frames,
//! enforces per-event preconditions, drives the audio buffer and the VAD
//! segmenter, and spawns transcription tasks for committed segments.
//! Everything it emits goes through the shared [`EventSender`], so frames
//! from the session task and its children never interleave on the wire.

use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use tokio::task::JoinSet;
use tracing::{debug, info};

use super::{ids, SessionManager, SessionState};
use crate::core::asr::registry::AsrModelRegistry;
use crate::core::conversation::{ContentPart, Item};
use crate::core::events::{
    codes, decode, ClientEvent, ErrorDetail, EventSender, ResponseOverrides, ServerPayload,
};
use crate::core::response::{Response, TokenDetails, Usage};
use crate::core::session::Session;
use crate::core::transcription::{self, TranscriptionJob};
use crate::core::vad::{VadConfig, VadEvent, VadRegistry};

/// Canned assistant text for the placeholder response flow.
const PLACEHOLDER_RESPONSE_TEXT: &str = "This is a mock response from the speech-to-text API.";

pub struct SessionEngine {
    state: Arc<SessionState>,
    manager: Arc<SessionManager>,
    vads: Arc<VadRegistry>,
    registry: Arc<AsrModelRegistry>,
    events: EventSender,
    /// Child transcription tasks; aborted wholesale on shutdown.
    tasks: JoinSet<()>,
    transcription_timeout: Duration,
    /// Item ID allocated at speech start and reused through the commit
    /// flow of the same utterance.
    current_speech_item: Option<String>,
}

impl SessionEngine {
    pub fn new(
        state: Arc<SessionState>,
        manager: Arc<SessionManager>,
        vads: Arc<VadRegistry>,
        registry: Arc<AsrModelRegistry>,
        events: EventSender,
        transcription_timeout: Duration,
    ) -> Self {
        Self {
            state,
            manager,
            vads,
            registry,
            events,
            tasks: JoinSet::new(),
            transcription_timeout,
            current_speech_item: None,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.state.id
    }

    /// Announces the session to the client. First event on every
    /// connection.
    pub async fn send_session_created(&self) {
        self.events
            .send(ServerPayload::SessionCreated {
                session: self.state.config_snapshot(),
            })
            .await;
    }

    /// Decodes and dispatches one inbound frame. Failures are reported to
    /// the client; they never end the session.
    pub async fn process_message(&mut self, raw: &[u8]) {
        self.state.touch();

        let event = match decode(raw) {
            Ok(event) => event,
            Err(e) => {
                debug!(session_id = %self.state.id, code = e.code, "rejecting inbound event");
                self.events
                    .send_error(
                        ErrorDetail::invalid_request(e.code, e.message, e.param)
                            .for_client_event(&e.event_id),
                    )
                    .await;
                return;
            }
        };

        debug!(session_id = %self.state.id, event = event.kind(), "received event");

        match event {
            ClientEvent::SessionUpdate { event_id, session } => {
                self.handle_session_update(&event_id, session).await;
            }
            ClientEvent::AppendAudio { event_id, audio } => {
                self.handle_append(&event_id, &audio).await;
            }
            ClientEvent::CommitAudio { event_id } => {
                self.handle_commit(&event_id).await;
            }
            ClientEvent::ClearAudio { .. } => {
                self.state.audio_buffer.clear();
                self.events.send(ServerPayload::AudioCleared).await;
            }
            ClientEvent::CreateItem {
                item,
                previous_item_id,
                ..
            } => {
                self.handle_item_create(item, previous_item_id).await;
            }
            ClientEvent::RetrieveItem { event_id, item_id } => {
                self.handle_item_retrieve(&event_id, &item_id).await;
            }
            ClientEvent::TruncateItem {
                event_id,
                item_id,
                content_index,
                audio_end_ms,
            } => {
                self.handle_item_truncate(&event_id, &item_id, content_index, audio_end_ms)
                    .await;
            }
            ClientEvent::DeleteItem { event_id, item_id } => {
                self.handle_item_delete(&event_id, &item_id).await;
            }
            ClientEvent::CreateResponse { response, .. } => {
                self.handle_response_create(response).await;
            }
            ClientEvent::CancelResponse { event_id } => {
                self.handle_response_cancel(&event_id).await;
            }
        }
    }

    /// Cancels in-flight transcriptions, closes the session's segmenter
    /// and removes the session record. Runs on every exit path.
    pub fn shutdown(mut self) {
        self.tasks.abort_all();
        self.vads.remove(&self.state.id);
        self.manager.delete(&self.state.id);
        info!(session_id = %self.state.id, "session closed");
    }

    async fn handle_session_update(&mut self, event_id: &str, updates: Session) {
        let Some(merged) = self.manager.update_session(&self.state.id, updates) else {
            self.events
                .send_error(
                    ErrorDetail::server_error(
                        codes::SESSION_UPDATE_FAILED,
                        format!("session not found: {}", self.state.id),
                    )
                    .for_client_event(event_id),
                )
                .await;
            return;
        };

        // A new turn_detection block reconfigures the live segmenter.
        if let Some(td) = merged.turn_detection() {
            if let Some(vad) = self.vads.get(&self.state.id) {
                vad.configure(VadConfig::from_turn_detection(td, merged.sample_rate()));
            }
        }

        self.events
            .send(ServerPayload::SessionUpdated { session: merged })
            .await;
    }

    async fn handle_append(&mut self, event_id: &str, audio_b64: &str) {
        let audio = match BASE64.decode(audio_b64) {
            Ok(audio) => audio,
            Err(_) => {
                self.events
                    .send_error(
                        ErrorDetail::invalid_request(
                            codes::INVALID_AUDIO,
                            "Invalid base64 audio data",
                            Some("audio"),
                        )
                        .for_client_event(event_id),
                    )
                    .await;
                return;
            }
        };

        if let Err(e) = self.state.audio_buffer.append(&audio) {
            self.events
                .send_error(
                    ErrorDetail::invalid_request(
                        codes::BUFFER_FULL,
                        format!("Audio buffer size limit exceeded (max {} bytes)", e.cap),
                        Some("audio"),
                    )
                    .for_client_event(event_id),
                )
                .await;
            return;
        }
        debug!(
            session_id = %self.state.id,
            total = self.state.audio_buffer.size(),
            "appended audio to buffer"
        );

        // No acknowledgement for successful appends.
        let config = self.state.config_snapshot();
        if config.vad_enabled() {
            let vad = self.get_or_create_vad(&config);
            vad.process_audio(&audio);
            let events = vad.drain();
            self.process_vad_events(events).await;
        }
    }

    fn get_or_create_vad(&self, config: &Session) -> Arc<crate::core::vad::EnergyVad> {
        let vad_config = config
            .turn_detection()
            .map(|td| VadConfig::from_turn_detection(td, config.sample_rate()))
            .unwrap_or_default();
        self.vads.get_or_create(&self.state.id, vad_config)
    }

    async fn process_vad_events(&mut self, events: Vec<VadEvent>) {
        for event in events {
            match event {
                VadEvent::SpeechStarted { start_ms } => {
                    let item_id = ids::item_id();
                    self.current_speech_item = Some(item_id.clone());
                    self.state.audio_buffer.set_speech_timings(start_ms, 0);

                    info!(session_id = %self.state.id, start_ms, item_id = %item_id, "speech started");
                    self.events
                        .send(ServerPayload::SpeechStarted {
                            audio_start_ms: start_ms,
                            item_id,
                        })
                        .await;
                }
                VadEvent::SpeechStopped {
                    start_ms,
                    end_ms,
                    audio,
                } => {
                    let item_id = self
                        .current_speech_item
                        .take()
                        .unwrap_or_else(ids::item_id);
                    self.state.audio_buffer.set_speech_timings(start_ms, end_ms);

                    info!(session_id = %self.state.id, end_ms, item_id = %item_id, "speech stopped");
                    self.events
                        .send(ServerPayload::SpeechStopped {
                            audio_end_ms: end_ms,
                            item_id: item_id.clone(),
                        })
                        .await;

                    if !audio.is_empty() {
                        self.commit_and_transcribe(item_id, audio).await;
                    }
                }
                VadEvent::Timeout { end_ms } => {
                    self.events
                        .send(ServerPayload::TimeoutTriggered {
                            audio_start_ms: 0,
                            audio_end_ms: end_ms,
                            item_id: ids::item_id(),
                        })
                        .await;
                }
            }
        }
    }

    async fn handle_commit(&mut self, event_id: &str) {
        if self.state.audio_buffer.is_empty() {
            self.events
                .send_error(
                    ErrorDetail::invalid_request(
                        codes::EMPTY_BUFFER,
                        "Audio buffer is empty",
                        None,
                    )
                    .for_client_event(event_id),
                )
                .await;
            return;
        }

        let audio = self.state.audio_buffer.commit();

        // With turn detection on, reset the segmenter's pending segment:
        // the snapshot above already contains those bytes, and leaving
        // them queued would transcribe the utterance twice.
        if let Some(vad) = self.vads.get(&self.state.id) {
            vad.force_commit();
        }

        let item_id = self
            .current_speech_item
            .take()
            .unwrap_or_else(ids::item_id);
        self.commit_and_transcribe(item_id, audio).await;
        self.state.audio_buffer.clear();
    }

    /// Shared tail of the explicit-commit and VAD auto-commit flows:
    /// materialize the user item, announce it, then hand the segment to a
    /// transcription task. `committed` precedes `created` precedes any
    /// transcription event because the spawn happens after both sends.
    async fn commit_and_transcribe(&mut self, item_id: String, audio: Vec<u8>) {
        let item = Item::user_audio(&item_id, BASE64.encode(&audio));

        let previous_item_id = {
            let mut conversation = self.state.conversation.lock();
            let previous = conversation.last_item_id();
            conversation.add_item(item.clone());
            previous
        };

        self.events
            .send(ServerPayload::AudioCommitted {
                item_id: item_id.clone(),
                previous_item_id: previous_item_id.clone(),
            })
            .await;
        self.events
            .send(ServerPayload::ItemCreated {
                item,
                previous_item_id,
            })
            .await;

        self.tasks.spawn(transcription::run(TranscriptionJob {
            state: self.state.clone(),
            events: self.events.clone(),
            registry: self.registry.clone(),
            item_id,
            audio,
            timeout: self.transcription_timeout,
        }));
    }

    async fn handle_item_create(&mut self, mut item: Item, previous_item_id: Option<String>) {
        if item.id.is_empty() {
            item.id = ids::item_id();
        }
        item.object = "realtime.item".to_string();
        item.status = "completed".to_string();

        // Positional insertion after `previous_item_id` is accepted on the
        // wire but items always append to the tail.
        self.state.conversation.lock().add_item(item.clone());

        self.events
            .send(ServerPayload::ItemCreated {
                item,
                previous_item_id,
            })
            .await;
    }

    async fn handle_item_retrieve(&mut self, event_id: &str, item_id: &str) {
        let item = self.state.conversation.lock().get_item(item_id).cloned();
        match item {
            Some(item) => {
                self.events
                    .send(ServerPayload::ItemRetrieved { item })
                    .await;
            }
            None => {
                self.send_item_not_found(event_id, item_id).await;
            }
        }
    }

    async fn handle_item_truncate(
        &mut self,
        event_id: &str,
        item_id: &str,
        content_index: u32,
        audio_end_ms: u64,
    ) {
        if self.state.conversation.lock().get_item(item_id).is_none() {
            self.send_item_not_found(event_id, item_id).await;
            return;
        }

        // Stored content is left as-is; the event is advisory.
        self.events
            .send(ServerPayload::ItemTruncated {
                item_id: item_id.to_string(),
                content_index,
                audio_end_ms,
            })
            .await;
    }

    async fn handle_item_delete(&mut self, event_id: &str, item_id: &str) {
        if !self.state.conversation.lock().delete_item(item_id) {
            self.send_item_not_found(event_id, item_id).await;
            return;
        }

        self.events
            .send(ServerPayload::ItemDeleted {
                item_id: item_id.to_string(),
            })
            .await;
    }

    async fn send_item_not_found(&self, event_id: &str, item_id: &str) {
        self.events
            .send_error(
                ErrorDetail::invalid_request(
                    codes::ITEM_NOT_FOUND,
                    format!("Item not found: {item_id}"),
                    None,
                )
                .for_client_event(event_id),
            )
            .await;
    }

    async fn handle_response_create(&mut self, overrides: Option<ResponseOverrides>) {
        let config = self.state.config_snapshot();
        let conversation_id = self.state.conversation.lock().id.clone();

        let mut modalities = config.output_modalities.clone();
        if let Some(overrides) = &overrides {
            if !overrides.output_modalities.is_empty() {
                modalities = overrides.output_modalities.clone();
            }
        }

        let response_id = ids::response_id();
        let mut response = Response::new(response_id.clone(), conversation_id, modalities);

        self.events
            .send(ServerPayload::ResponseCreated {
                response: response.clone(),
            })
            .await;

        let assistant_item_id = ids::item_id();
        let mut assistant_item = Item::message(&assistant_item_id, "assistant");

        self.events
            .send(ServerPayload::ResponseOutputItemAdded {
                response_id: response_id.clone(),
                output_index: 0,
                item: assistant_item.clone(),
            })
            .await;
        self.events
            .send(ServerPayload::ResponseContentPartAdded {
                response_id: response_id.clone(),
                item_id: assistant_item_id.clone(),
                content_index: 0,
                output_index: 0,
                part: ContentPart {
                    kind: "text".to_string(),
                    ..Default::default()
                },
            })
            .await;
        self.events
            .send(ServerPayload::ResponseTextDelta {
                response_id: response_id.clone(),
                item_id: assistant_item_id.clone(),
                content_index: 0,
                output_index: 0,
                delta: PLACEHOLDER_RESPONSE_TEXT.to_string(),
            })
            .await;
        self.events
            .send(ServerPayload::ResponseTextDone {
                response_id: response_id.clone(),
                item_id: assistant_item_id.clone(),
                content_index: 0,
                output_index: 0,
                text: PLACEHOLDER_RESPONSE_TEXT.to_string(),
            })
            .await;

        assistant_item.status = "completed".to_string();
        assistant_item.content = vec![ContentPart {
            kind: "text".to_string(),
            text: PLACEHOLDER_RESPONSE_TEXT.to_string(),
            ..Default::default()
        }];

        self.events
            .send(ServerPayload::ResponseOutputItemDone {
                response_id: response_id.clone(),
                output_index: 0,
                item: assistant_item.clone(),
            })
            .await;

        response.status = "completed".to_string();
        response.output = vec![assistant_item.clone()];
        response.usage = Some(Usage {
            total_tokens: 50,
            input_tokens: 20,
            output_tokens: 30,
            input_token_details: Some(TokenDetails {
                text_tokens: 10,
                audio_tokens: 10,
            }),
            output_token_details: Some(TokenDetails {
                text_tokens: 30,
                audio_tokens: 0,
            }),
        });

        *self.state.current_response.lock() = Some(response.clone());

        self.events
            .send(ServerPayload::ResponseDone { response })
            .await;

        self.state.conversation.lock().add_item(assistant_item);
    }

    async fn handle_response_cancel(&mut self, event_id: &str) {
        let response = self.state.current_response.lock().take();
        let Some(mut response) = response else {
            self.events
                .send_error(
                    ErrorDetail::invalid_request(
                        codes::NO_ACTIVE_RESPONSE,
                        "No active response to cancel",
                        None,
                    )
                    .for_client_event(event_id),
                )
                .await;
            return;
        };

        response.status = "cancelled".to_string();
        self.events
            .send(ServerPayload::ResponseDone { response })
            .await;
    }
}

impl ClientEvent {
    /// Wire name of the event, for logging.
    fn kind(&self) -> &'static str {
        match self {
            ClientEvent::SessionUpdate { .. } => "session.update",
            ClientEvent::AppendAudio { .. } => "input_audio_buffer.append",
            ClientEvent::CommitAudio { .. } => "input_audio_buffer.commit",
            ClientEvent::ClearAudio { .. } => "input_audio_buffer.clear",
            ClientEvent::CreateItem { .. } => "conversation.item.create",
            ClientEvent::RetrieveItem { .. } => "conversation.item.retrieve",
            ClientEvent::TruncateItem { .. } => "conversation.item.truncate",
            ClientEvent::DeleteItem { .. } => "conversation.item.delete",
            ClientEvent::CreateResponse { .. } => "response.create",
            ClientEvent::CancelResponse { .. } => "response.cancel",
        }
    }
}
