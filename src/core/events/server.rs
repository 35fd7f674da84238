//! Outbound server event encoding.

use serde::Serialize;

use super::error_types;
use crate::core::conversation::{ContentPart, Item};
use crate::core::response::{Response, Usage};
use crate::core::session::{ids, Session};

/// One outbound frame. The payload enum supplies the `type` tag; every
/// event carries a freshly generated server `event_id`.
#[derive(Debug, Clone, Serialize)]
pub struct ServerEvent {
    pub event_id: String,
    #[serde(flatten)]
    pub payload: ServerPayload,
}

impl ServerEvent {
    pub fn new(payload: ServerPayload) -> Self {
        Self {
            event_id: ids::event_id(),
            payload,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ServerPayload {
    #[serde(rename = "session.created")]
    SessionCreated { session: Session },

    #[serde(rename = "session.updated")]
    SessionUpdated { session: Session },

    #[serde(rename = "error")]
    Error { error: ErrorDetail },

    #[serde(rename = "input_audio_buffer.committed")]
    AudioCommitted {
        item_id: String,
        previous_item_id: Option<String>,
    },

    #[serde(rename = "input_audio_buffer.cleared")]
    AudioCleared,

    #[serde(rename = "input_audio_buffer.speech_started")]
    SpeechStarted { audio_start_ms: u64, item_id: String },

    #[serde(rename = "input_audio_buffer.speech_stopped")]
    SpeechStopped { audio_end_ms: u64, item_id: String },

    #[serde(rename = "input_audio_buffer.timeout_triggered")]
    TimeoutTriggered {
        audio_start_ms: u64,
        audio_end_ms: u64,
        item_id: String,
    },

    #[serde(rename = "conversation.item.created")]
    ItemCreated {
        item: Item,
        previous_item_id: Option<String>,
    },

    #[serde(rename = "conversation.item.retrieved")]
    ItemRetrieved { item: Item },

    #[serde(rename = "conversation.item.deleted")]
    ItemDeleted { item_id: String },

    #[serde(rename = "conversation.item.truncated")]
    ItemTruncated {
        item_id: String,
        content_index: u32,
        audio_end_ms: u64,
    },

    #[serde(rename = "conversation.item.input_audio_transcription.delta")]
    TranscriptionDelta {
        item_id: String,
        content_index: u32,
        delta: String,
    },

    #[serde(rename = "conversation.item.input_audio_transcription.completed")]
    TranscriptionCompleted {
        item_id: String,
        content_index: u32,
        transcript: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        usage: Option<Usage>,
    },

    #[serde(rename = "conversation.item.input_audio_transcription.failed")]
    TranscriptionFailed {
        item_id: String,
        content_index: u32,
        error: ErrorDetail,
    },

    #[serde(rename = "response.created")]
    ResponseCreated { response: Response },

    #[serde(rename = "response.output_item.added")]
    ResponseOutputItemAdded {
        response_id: String,
        output_index: u32,
        item: Item,
    },

    #[serde(rename = "response.content_part.added")]
    ResponseContentPartAdded {
        response_id: String,
        item_id: String,
        content_index: u32,
        output_index: u32,
        part: ContentPart,
    },

    #[serde(rename = "response.output_text.delta")]
    ResponseTextDelta {
        response_id: String,
        item_id: String,
        content_index: u32,
        output_index: u32,
        delta: String,
    },

    #[serde(rename = "response.output_text.done")]
    ResponseTextDone {
        response_id: String,
        item_id: String,
        content_index: u32,
        output_index: u32,
        text: String,
    },

    #[serde(rename = "response.output_item.done")]
    ResponseOutputItemDone {
        response_id: String,
        output_index: u32,
        item: Item,
    },

    #[serde(rename = "response.done")]
    ResponseDone { response: Response },
}

/// Error payload shared by `error` events and transcription failures.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorDetail {
    /// `"invalid_request_error"`, `"server_error"`, or
    /// `"transcription_error"`.
    #[serde(rename = "type")]
    pub kind: String,
    pub code: String,
    pub message: String,
    pub param: Option<String>,
    /// Echo of the originating client event ID, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
}

impl ErrorDetail {
    pub fn new(
        kind: &str,
        code: &str,
        message: impl Into<String>,
        param: Option<&str>,
    ) -> Self {
        Self {
            kind: kind.to_string(),
            code: code.to_string(),
            message: message.into(),
            param: param.map(str::to_string),
            event_id: None,
        }
    }

    pub fn invalid_request(code: &str, message: impl Into<String>, param: Option<&str>) -> Self {
        Self::new(error_types::INVALID_REQUEST, code, message, param)
    }

    pub fn server_error(code: &str, message: impl Into<String>) -> Self {
        Self::new(error_types::SERVER_ERROR, code, message, None)
    }

    pub fn transcription_error(code: &str, message: impl Into<String>) -> Self {
        Self::new(error_types::TRANSCRIPTION_ERROR, code, message, None)
    }

    /// Attaches the originating client event ID for correlation.
    pub fn for_client_event(mut self, client_event_id: &str) -> Self {
        if !client_event_id.is_empty() {
            self.event_id = Some(client_event_id.to_string());
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::events::codes;

    #[test]
    fn test_session_created_serialization() {
        let session = Session::new_transcription("sess_1", "zipformer", "id", 16_000);
        let event = ServerEvent::new(ServerPayload::SessionCreated { session });
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["type"], "session.created");
        assert!(json["event_id"].as_str().unwrap().starts_with("evt_"));
        assert_eq!(json["session"]["id"], "sess_1");
        assert_eq!(json["session"]["type"], "transcription");
        assert_eq!(
            json["session"]["audio"]["input"]["turn_detection"]["type"],
            "server_vad"
        );
    }

    #[test]
    fn test_error_serialization_echoes_client_event_id() {
        let detail = ErrorDetail::invalid_request(codes::BUFFER_FULL, "too big", Some("audio"))
            .for_client_event("evt_client");
        let event = ServerEvent::new(ServerPayload::Error { error: detail });
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["type"], "error");
        assert_eq!(json["error"]["type"], "invalid_request_error");
        assert_eq!(json["error"]["code"], "buffer_full");
        assert_eq!(json["error"]["param"], "audio");
        assert_eq!(json["error"]["event_id"], "evt_client");
    }

    #[test]
    fn test_error_without_client_event_id() {
        let detail = ErrorDetail::invalid_request(codes::INVALID_JSON, "bad", None)
            .for_client_event("");
        let json = serde_json::to_value(&detail).unwrap();

        assert_eq!(json["param"], serde_json::Value::Null);
        assert!(json.get("event_id").is_none());
    }

    #[test]
    fn test_cleared_event_has_only_tag() {
        let event = ServerEvent::new(ServerPayload::AudioCleared);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "input_audio_buffer.cleared");
    }

    #[test]
    fn test_transcription_delta_shape() {
        let event = ServerEvent::new(ServerPayload::TranscriptionDelta {
            item_id: "item_1".to_string(),
            content_index: 0,
            delta: "Hello".to_string(),
        });
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(
            json["type"],
            "conversation.item.input_audio_transcription.delta"
        );
        assert_eq!(json["item_id"], "item_1");
        assert_eq!(json["content_index"], 0);
        assert_eq!(json["delta"], "Hello");
    }

    #[test]
    fn test_committed_serializes_null_previous_item() {
        let event = ServerEvent::new(ServerPayload::AudioCommitted {
            item_id: "item_1".to_string(),
            previous_item_id: None,
        });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["previous_item_id"], serde_json::Value::Null);
    }
}
