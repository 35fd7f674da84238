//! Placeholder response model.
//!
//! The gateway is transcription-focused; `response.create` produces a
//! deterministic canned assistant message so that Realtime clients which
//! probe the response surface keep working.

use serde::Serialize;

use crate::core::conversation::Item;

/// A model response tracked by the session. At most one response is
/// current at any time.
#[derive(Debug, Clone, Serialize)]
pub struct Response {
    /// Always `"realtime.response"`.
    pub object: String,
    pub id: String,
    /// `"in_progress"`, `"completed"`, or `"cancelled"`.
    pub status: String,
    pub status_details: Option<serde_json::Value>,
    pub output: Vec<Item>,
    pub conversation_id: String,
    pub output_modalities: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    pub metadata: Option<serde_json::Value>,
    pub created_at: i64,
}

impl Response {
    pub fn new(response_id: String, conversation_id: String, modalities: Vec<String>) -> Self {
        Self {
            object: "realtime.response".to_string(),
            id: response_id,
            status: "in_progress".to_string(),
            status_details: None,
            output: Vec::new(),
            conversation_id,
            output_modalities: modalities,
            usage: None,
            metadata: None,
            created_at: unix_now(),
        }
    }
}

/// Token usage attached to a finished response.
#[derive(Debug, Clone, Serialize)]
pub struct Usage {
    pub total_tokens: u32,
    pub input_tokens: u32,
    pub output_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_token_details: Option<TokenDetails>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_token_details: Option<TokenDetails>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TokenDetails {
    pub text_tokens: u32,
    pub audio_tokens: u32,
}

fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_response() {
        let response = Response::new(
            "resp_1".to_string(),
            "conv_1".to_string(),
            vec!["text".to_string()],
        );

        assert_eq!(response.object, "realtime.response");
        assert_eq!(response.status, "in_progress");
        assert_eq!(response.conversation_id, "conv_1");
        assert!(response.output.is_empty());
        assert!(response.created_at > 0);
    }
}
