//! Session configuration as it appears on the wire.
//!
//! The same struct serves as the full session payload inside
//! `session.created`/`session.updated` and as the partial payload of
//! `session.update`; absent fields deserialize to their empty values and
//! are treated as "not provided" by the merge in the session manager.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Sessions expire one hour after creation.
const SESSION_TTL_SECS: i64 = 3600;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Session {
    /// `"realtime"` or `"transcription"`.
    #[serde(rename = "type", skip_serializing_if = "String::is_empty")]
    pub kind: String,
    /// Always `"realtime.session"`.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub object: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub model: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub output_modalities: Vec<String>,
    /// Unix timestamp after which the session is closed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio: Option<AudioConfig>,
    /// Extra payload fields requested by the client, e.g.
    /// `"item.input_audio_transcription.logprobs"`.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub include: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<AudioInput>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioInput {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<AudioFormat>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcription: Option<TranscriptionSettings>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub noise_reduction: Option<NoiseReduction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub turn_detection: Option<TurnDetection>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioFormat {
    /// `"audio/pcm"`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Sample rate in Hz (16000 or 24000).
    pub rate: u32,
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self {
            kind: "audio/pcm".to_string(),
            rate: 16_000,
        }
    }
}

/// Transcription settings carried in `audio.input.transcription`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscriptionSettings {
    pub model: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub language: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub prompt: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NoiseReduction {
    /// `"near_field"` or `"far_field"`.
    #[serde(rename = "type")]
    pub kind: String,
}

/// Server-side turn detection (VAD) settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TurnDetection {
    /// `"server_vad"`, or empty to disable.
    #[serde(rename = "type")]
    pub kind: String,
    /// Activation threshold, 0.0 to 1.0.
    pub threshold: f32,
    /// Audio to reach back and include before speech start.
    pub prefix_padding_ms: u32,
    /// Silence duration that ends a turn.
    pub silence_duration_ms: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idle_timeout_ms: Option<u32>,
    pub create_response: bool,
    pub interrupt_response: bool,
}

impl Default for TurnDetection {
    fn default() -> Self {
        Self {
            kind: "server_vad".to_string(),
            threshold: 0.5,
            prefix_padding_ms: 300,
            silence_duration_ms: 500,
            idle_timeout_ms: None,
            create_response: false,
            interrupt_response: false,
        }
    }
}

impl Session {
    /// Default configuration for a transcription (STT) session.
    pub fn new_transcription(
        session_id: impl Into<String>,
        model: impl Into<String>,
        language: impl Into<String>,
        sample_rate: u32,
    ) -> Self {
        let model = model.into();
        let expires_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0)
            + SESSION_TTL_SECS;

        Self {
            kind: "transcription".to_string(),
            object: "realtime.session".to_string(),
            id: session_id.into(),
            model: model.clone(),
            output_modalities: vec!["text".to_string()],
            expires_at: Some(expires_at),
            audio: Some(AudioConfig {
                input: Some(AudioInput {
                    format: Some(AudioFormat {
                        kind: "audio/pcm".to_string(),
                        rate: sample_rate,
                    }),
                    transcription: Some(TranscriptionSettings {
                        model,
                        language: language.into(),
                        prompt: String::new(),
                    }),
                    noise_reduction: Some(NoiseReduction {
                        kind: "near_field".to_string(),
                    }),
                    turn_detection: Some(TurnDetection::default()),
                }),
            }),
            include: Vec::new(),
        }
    }

    pub fn input(&self) -> Option<&AudioInput> {
        self.audio.as_ref().and_then(|a| a.input.as_ref())
    }

    pub fn turn_detection(&self) -> Option<&TurnDetection> {
        self.input().and_then(|i| i.turn_detection.as_ref())
    }

    pub fn transcription(&self) -> Option<&TranscriptionSettings> {
        self.input().and_then(|i| i.transcription.as_ref())
    }

    /// Declared input sample rate, defaulting to 16 kHz.
    pub fn sample_rate(&self) -> u32 {
        self.input()
            .and_then(|i| i.format.as_ref())
            .map(|f| f.rate)
            .unwrap_or(16_000)
    }

    /// Whether server-side turn detection is active.
    pub fn vad_enabled(&self) -> bool {
        self.turn_detection().is_some_and(|td| !td.kind.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transcription_session_defaults() {
        let session = Session::new_transcription("sess_1", "zipformer", "id", 16_000);

        assert_eq!(session.kind, "transcription");
        assert_eq!(session.object, "realtime.session");
        assert_eq!(session.output_modalities, vec!["text"]);
        assert!(session.expires_at.unwrap() > 0);
        assert_eq!(session.sample_rate(), 16_000);
        assert!(session.vad_enabled());

        let transcription = session.transcription().unwrap();
        assert_eq!(transcription.model, "zipformer");
        assert_eq!(transcription.language, "id");
    }

    #[test]
    fn test_default_turn_detection() {
        let td = TurnDetection::default();
        assert_eq!(td.kind, "server_vad");
        assert_eq!(td.threshold, 0.5);
        assert_eq!(td.prefix_padding_ms, 300);
        assert_eq!(td.silence_duration_ms, 500);
        assert!(td.idle_timeout_ms.is_none());
    }

    #[test]
    fn test_partial_update_deserialization() {
        let json = r#"{"audio":{"input":{"transcription":{"language":"en"}}}}"#;
        let partial: Session = serde_json::from_str(json).unwrap();

        assert!(partial.kind.is_empty());
        assert!(partial.model.is_empty());
        let transcription = partial.transcription().unwrap();
        assert!(transcription.model.is_empty());
        assert_eq!(transcription.language, "en");
    }

    #[test]
    fn test_vad_disabled_by_empty_type() {
        let json = r#"{"audio":{"input":{"turn_detection":{"type":""}}}}"#;
        let partial: Session = serde_json::from_str(json).unwrap();
        assert!(!partial.vad_enabled());
    }
}
