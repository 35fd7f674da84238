//! Session lifecycle and configuration updates.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};

use super::model::Session;
use crate::core::audio::AudioBuffer;
use crate::core::conversation::Conversation;
use crate::core::response::Response;

/// Runtime state owned by one connection. The conversation, buffer and
/// response are serialized by their own internal locks; the session record
/// itself is never shared across connections.
pub struct SessionState {
    pub id: String,
    pub config: Mutex<Session>,
    pub conversation: Mutex<Conversation>,
    pub audio_buffer: AudioBuffer,
    pub current_response: Mutex<Option<Response>>,
    pub created_at: Instant,
    last_activity: Mutex<Instant>,
}

impl SessionState {
    pub fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        self.last_activity.lock().elapsed()
    }

    pub fn config_snapshot(&self) -> Session {
        self.config.lock().clone()
    }
}

/// Registry of live sessions by ID. Guards are held only for map access,
/// never across I/O.
#[derive(Default)]
pub struct SessionManager {
    sessions: RwLock<HashMap<String, Arc<SessionState>>>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a transcription session with the given defaults and the
    /// configured audio buffer cap.
    pub fn create_transcription_session(
        &self,
        session_id: &str,
        conversation_id: &str,
        model: &str,
        language: &str,
        sample_rate: u32,
        buffer_cap: usize,
    ) -> Arc<SessionState> {
        let state = Arc::new(SessionState {
            id: session_id.to_string(),
            config: Mutex::new(Session::new_transcription(
                session_id,
                model,
                language,
                sample_rate,
            )),
            conversation: Mutex::new(Conversation::new(conversation_id)),
            audio_buffer: AudioBuffer::with_cap(buffer_cap),
            current_response: Mutex::new(None),
            created_at: Instant::now(),
            last_activity: Mutex::new(Instant::now()),
        });

        self.sessions
            .write()
            .insert(session_id.to_string(), state.clone());
        state
    }

    pub fn get(&self, session_id: &str) -> Option<Arc<SessionState>> {
        let state = self.sessions.read().get(session_id).cloned();
        if let Some(state) = &state {
            state.touch();
        }
        state
    }

    /// Deep-merges a partial update into the session config and returns
    /// the merged snapshot. `None` when the session does not exist.
    pub fn update_session(&self, session_id: &str, updates: Session) -> Option<Session> {
        let state = self.sessions.read().get(session_id).cloned()?;
        let mut config = state.config.lock();
        merge_session(&mut config, updates);
        state.touch();
        Some(config.clone())
    }

    pub fn delete(&self, session_id: &str) {
        self.sessions.write().remove(session_id);
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }
}

/// Non-empty fields of `updates` override `config`; the audio input
/// sub-config merges field-by-field, and transcription settings merge
/// per-field so a language-only update keeps the model.
fn merge_session(config: &mut Session, updates: Session) {
    if !updates.kind.is_empty() {
        config.kind = updates.kind;
    }
    if !updates.output_modalities.is_empty() {
        config.output_modalities = updates.output_modalities;
    }
    if !updates.include.is_empty() {
        config.include = updates.include;
    }

    let Some(updates_audio) = updates.audio else {
        return;
    };
    let audio = config.audio.get_or_insert_with(Default::default);

    let Some(updates_input) = updates_audio.input else {
        return;
    };
    let input = audio.input.get_or_insert_with(Default::default);

    if updates_input.format.is_some() {
        input.format = updates_input.format;
    }
    if let Some(updates_transcription) = updates_input.transcription {
        let transcription = input.transcription.get_or_insert_with(Default::default);
        if !updates_transcription.model.is_empty() {
            transcription.model = updates_transcription.model;
        }
        if !updates_transcription.language.is_empty() {
            transcription.language = updates_transcription.language;
        }
        if !updates_transcription.prompt.is_empty() {
            transcription.prompt = updates_transcription.prompt;
        }
    }
    if updates_input.noise_reduction.is_some() {
        input.noise_reduction = updates_input.noise_reduction;
    }
    if updates_input.turn_detection.is_some() {
        input.turn_detection = updates_input.turn_detection;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::session::TurnDetection;

    fn manager_with_session() -> (SessionManager, Arc<SessionState>) {
        let manager = SessionManager::new();
        let state = manager.create_transcription_session(
            "sess_1",
            "conv_1",
            "zipformer",
            "id",
            16_000,
            1024,
        );
        (manager, state)
    }

    #[test]
    fn test_create_and_get() {
        let (manager, state) = manager_with_session();
        assert_eq!(manager.len(), 1);
        assert_eq!(state.audio_buffer.cap(), 1024);

        let fetched = manager.get("sess_1").unwrap();
        assert_eq!(fetched.id, "sess_1");
        assert!(manager.get("sess_other").is_none());
    }

    #[test]
    fn test_delete() {
        let (manager, _state) = manager_with_session();
        manager.delete("sess_1");
        assert!(manager.is_empty());
        assert!(manager.get("sess_1").is_none());
    }

    #[test]
    fn test_language_update_preserves_model() {
        let (manager, _state) = manager_with_session();

        let updates: Session = serde_json::from_str(
            r#"{"audio":{"input":{"transcription":{"language":"en"}}}}"#,
        )
        .unwrap();
        let merged = manager.update_session("sess_1", updates).unwrap();

        let transcription = merged.transcription().unwrap();
        assert_eq!(transcription.language, "en");
        assert_eq!(transcription.model, "zipformer");
        // Untouched sub-configs survive.
        assert!(merged.turn_detection().is_some());
        assert_eq!(merged.sample_rate(), 16_000);
    }

    #[test]
    fn test_turn_detection_replaces_wholesale() {
        let (manager, _state) = manager_with_session();

        let updates = Session {
            audio: Some(crate::core::session::AudioConfig {
                input: Some(crate::core::session::AudioInput {
                    turn_detection: Some(TurnDetection {
                        threshold: 0.8,
                        silence_duration_ms: 200,
                        ..Default::default()
                    }),
                    ..Default::default()
                }),
            }),
            ..Default::default()
        };
        let merged = manager.update_session("sess_1", updates).unwrap();

        let td = merged.turn_detection().unwrap();
        assert_eq!(td.threshold, 0.8);
        assert_eq!(td.silence_duration_ms, 200);
    }

    #[test]
    fn test_empty_update_changes_nothing() {
        let (manager, _state) = manager_with_session();
        let before = manager.get("sess_1").unwrap().config_snapshot();
        let merged = manager
            .update_session("sess_1", Session::default())
            .unwrap();

        assert_eq!(merged.kind, before.kind);
        assert_eq!(merged.model, before.model);
        assert_eq!(
            merged.transcription().unwrap().language,
            before.transcription().unwrap().language
        );
    }

    #[test]
    fn test_update_missing_session() {
        let manager = SessionManager::new();
        assert!(manager.update_session("nope", Session::default()).is_none());
    }

    #[test]
    fn test_modalities_update() {
        let (manager, _state) = manager_with_session();
        let updates = Session {
            output_modalities: vec!["text".to_string(), "audio".to_string()],
            ..Default::default()
        };
        let merged = manager.update_session("sess_1", updates).unwrap();
        assert_eq!(merged.output_modalities.len(), 2);
    }
}
