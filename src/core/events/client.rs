//! Inbound client event decoding.

use serde::Deserialize;
use serde_json::Value;

use super::codes;
use crate::core::conversation::Item;
use crate::core::session::Session;

/// A decoded client event. Each variant carries the client `event_id` so
/// handlers can echo it back on failure.
#[derive(Debug)]
pub enum ClientEvent {
    SessionUpdate {
        event_id: String,
        session: Session,
    },
    AppendAudio {
        event_id: String,
        /// Base64-encoded PCM16, still undecoded.
        audio: String,
    },
    CommitAudio {
        event_id: String,
    },
    ClearAudio {
        event_id: String,
    },
    CreateItem {
        event_id: String,
        item: Item,
        previous_item_id: Option<String>,
    },
    RetrieveItem {
        event_id: String,
        item_id: String,
    },
    TruncateItem {
        event_id: String,
        item_id: String,
        content_index: u32,
        audio_end_ms: u64,
    },
    DeleteItem {
        event_id: String,
        item_id: String,
    },
    CreateResponse {
        event_id: String,
        response: Option<ResponseOverrides>,
    },
    CancelResponse {
        event_id: String,
    },
}

impl ClientEvent {
    pub fn event_id(&self) -> &str {
        match self {
            ClientEvent::SessionUpdate { event_id, .. }
            | ClientEvent::AppendAudio { event_id, .. }
            | ClientEvent::CommitAudio { event_id }
            | ClientEvent::ClearAudio { event_id }
            | ClientEvent::CreateItem { event_id, .. }
            | ClientEvent::RetrieveItem { event_id, .. }
            | ClientEvent::TruncateItem { event_id, .. }
            | ClientEvent::DeleteItem { event_id, .. }
            | ClientEvent::CreateResponse { event_id, .. }
            | ClientEvent::CancelResponse { event_id } => event_id,
        }
    }
}

/// Overrides the client may attach to `response.create`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ResponseOverrides {
    pub output_modalities: Vec<String>,
    pub instructions: String,
    pub metadata: Option<Value>,
}

/// A decode failure, carrying everything the dispatcher needs to build
/// the outbound `error` event. Decoding failures never end the session.
#[derive(Debug, Clone)]
pub struct DecodeError {
    /// Client event ID, when the envelope was readable.
    pub event_id: String,
    pub code: &'static str,
    pub message: String,
    pub param: Option<&'static str>,
}

impl DecodeError {
    fn invalid_json(event_id: String, detail: impl std::fmt::Display) -> Self {
        Self {
            event_id,
            code: codes::INVALID_JSON,
            message: format!("Failed to parse message: {detail}"),
            param: None,
        }
    }

    fn missing_field(event_id: String, field: &'static str) -> Self {
        Self {
            event_id,
            code: codes::MISSING_FIELD,
            message: format!("{field} field is required"),
            param: Some(field),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Envelope {
    event_id: String,
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SessionUpdatePayload {
    session: Option<Session>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct AppendPayload {
    audio: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ItemCreatePayload {
    item: Option<Item>,
    previous_item_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ItemRefPayload {
    item_id: String,
    content_index: u32,
    audio_end_ms: u64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ResponseCreatePayload {
    response: Option<ResponseOverrides>,
}

fn parse<T: serde::de::DeserializeOwned>(
    value: Value,
    event_id: &str,
) -> Result<T, DecodeError> {
    serde_json::from_value(value).map_err(|e| DecodeError::invalid_json(event_id.to_string(), e))
}

/// Decodes one inbound frame into a typed client event.
pub fn decode(raw: &[u8]) -> Result<ClientEvent, DecodeError> {
    let value: Value = serde_json::from_slice(raw)
        .map_err(|e| DecodeError::invalid_json(String::new(), e))?;

    let envelope: Envelope = serde_json::from_value(value.clone())
        .map_err(|e| DecodeError::invalid_json(String::new(), e))?;
    let event_id = envelope.event_id;

    match envelope.kind.as_str() {
        "session.update" => {
            let payload: SessionUpdatePayload = parse(value, &event_id)?;
            let session = payload
                .session
                .ok_or_else(|| DecodeError::missing_field(event_id.clone(), "session"))?;
            Ok(ClientEvent::SessionUpdate { event_id, session })
        }
        "input_audio_buffer.append" => {
            let payload: AppendPayload = parse(value, &event_id)?;
            if payload.audio.is_empty() {
                return Err(DecodeError::missing_field(event_id, "audio"));
            }
            Ok(ClientEvent::AppendAudio {
                event_id,
                audio: payload.audio,
            })
        }
        "input_audio_buffer.commit" => Ok(ClientEvent::CommitAudio { event_id }),
        "input_audio_buffer.clear" => Ok(ClientEvent::ClearAudio { event_id }),
        "conversation.item.create" => {
            let payload: ItemCreatePayload = parse(value, &event_id)?;
            let item = payload
                .item
                .ok_or_else(|| DecodeError::missing_field(event_id.clone(), "item"))?;
            Ok(ClientEvent::CreateItem {
                event_id,
                item,
                previous_item_id: payload.previous_item_id,
            })
        }
        "conversation.item.retrieve" => {
            let payload: ItemRefPayload = parse(value, &event_id)?;
            if payload.item_id.is_empty() {
                return Err(DecodeError::missing_field(event_id, "item_id"));
            }
            Ok(ClientEvent::RetrieveItem {
                event_id,
                item_id: payload.item_id,
            })
        }
        "conversation.item.truncate" => {
            let payload: ItemRefPayload = parse(value, &event_id)?;
            if payload.item_id.is_empty() {
                return Err(DecodeError::missing_field(event_id, "item_id"));
            }
            Ok(ClientEvent::TruncateItem {
                event_id,
                item_id: payload.item_id,
                content_index: payload.content_index,
                audio_end_ms: payload.audio_end_ms,
            })
        }
        "conversation.item.delete" => {
            let payload: ItemRefPayload = parse(value, &event_id)?;
            if payload.item_id.is_empty() {
                return Err(DecodeError::missing_field(event_id, "item_id"));
            }
            Ok(ClientEvent::DeleteItem {
                event_id,
                item_id: payload.item_id,
            })
        }
        "response.create" => {
            let payload: ResponseCreatePayload = parse(value, &event_id)?;
            Ok(ClientEvent::CreateResponse {
                event_id,
                response: payload.response,
            })
        }
        "response.cancel" => Ok(ClientEvent::CancelResponse { event_id }),
        other => Err(DecodeError {
            message: format!("Unknown event type: {other}"),
            event_id,
            code: codes::UNKNOWN_EVENT_TYPE,
            param: None,
        }),
    }
}
