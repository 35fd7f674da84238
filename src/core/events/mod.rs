//! Wire protocol event codec.
//!
//! Every frame on the wire is one JSON object with a `type` string and an
//! `event_id` string. Client events decode in two phases (envelope first,
//! then the typed payload) so that unknown types and malformed payloads
//! produce precise `error` events instead of tearing the session down.

mod client;
mod sender;
mod server;

pub use client::{decode, ClientEvent, DecodeError, ResponseOverrides};
pub use sender::EventSender;
pub use server::{ErrorDetail, ServerEvent, ServerPayload};

/// Wire-visible error type tags.
pub mod error_types {
    pub const INVALID_REQUEST: &str = "invalid_request_error";
    pub const SERVER_ERROR: &str = "server_error";
    pub const TRANSCRIPTION_ERROR: &str = "transcription_error";
}

/// Wire-visible error codes.
pub mod codes {
    pub const INVALID_JSON: &str = "invalid_json";
    pub const MISSING_FIELD: &str = "missing_field";
    pub const INVALID_AUDIO: &str = "invalid_audio";
    pub const BUFFER_FULL: &str = "buffer_full";
    pub const EMPTY_BUFFER: &str = "empty_buffer";
    pub const UNKNOWN_EVENT_TYPE: &str = "unknown_event_type";
    pub const ITEM_NOT_FOUND: &str = "item_not_found";
    pub const NO_ACTIVE_RESPONSE: &str = "no_active_response";
    pub const SESSION_UPDATE_FAILED: &str = "session_update_failed";
    pub const TRANSCRIPTION_FAILED: &str = "transcription_failed";
    pub const TRANSCRIPTION_TIMEOUT: &str = "transcription_timeout";
}
