//! ASR provider abstraction.
//!
//! Backends are interchangeable behind one capability set; recognizer
//! handles are concurrency-safe, reusable across sessions, and owned by
//! the registry for the lifetime of the process.

pub mod mock;
pub mod registry;
pub mod transducer;
pub mod whisper;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::core::session::TranscriptionSettings;

/// Capacity of provider chunk channels.
pub const CHUNK_CHANNEL_SIZE: usize = 32;

/// An incremental piece of a transcription. Producers emit an ordered
/// stream; the last chunk has `is_final = true` even when empty.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TranscriptionChunk {
    pub text: String,
    pub is_final: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logprobs: Option<Vec<Logprob>>,
}

/// Per-token log probability attached to a chunk.
#[derive(Debug, Clone, Serialize)]
pub struct Logprob {
    pub token: String,
    pub logprob: f64,
}

/// ASR failure taxonomy. Registry resolution errors and provider runtime
/// errors both surface through this type.
#[derive(Debug, Clone, Error)]
pub enum AsrError {
    #[error("ASR configuration not available")]
    ConfigurationUnavailable,
    #[error("model '{model}' not found. Available models: {available:?}")]
    InvalidModel {
        model: String,
        available: Vec<String>,
    },
    #[error("language '{language}' is not supported by model '{model}'. Supported languages: {supported:?}")]
    UnsupportedLanguage {
        model: String,
        language: String,
        supported: Vec<String>,
    },
    #[error("unsupported provider type: {0}")]
    ProviderNotConfigured(String),
    #[error("failed to initialize provider: {0}")]
    ProviderInitializationFailed(String),
    #[error("transcription failed: {0}")]
    TranscriptionFailed(String),
}

impl AsrError {
    /// The wire-visible error code for this failure.
    pub fn code(&self) -> &'static str {
        match self {
            AsrError::ConfigurationUnavailable => "configuration_unavailable",
            AsrError::InvalidModel { .. } => "invalid_model",
            AsrError::UnsupportedLanguage { .. } => "unsupported_language",
            AsrError::ProviderNotConfigured(_) => "provider_not_configured",
            AsrError::ProviderInitializationFailed(_) => "provider_initialization_failed",
            AsrError::TranscriptionFailed(_) => "transcription_failed",
        }
    }
}

/// A speech-to-text backend.
///
/// `transcribe` decodes one complete segment, streaming chunks through the
/// returned channel and closing it after the final chunk. Implementations
/// must observe cancellation of the receiver (the consumer dropping it or
/// its deadline expiring) and release their resources.
#[async_trait]
pub trait AsrProvider: Send + Sync {
    /// Decode one audio segment (PCM16 little-endian mono).
    async fn transcribe(
        &self,
        audio: Vec<u8>,
        config: &TranscriptionSettings,
    ) -> Result<mpsc::Receiver<TranscriptionChunk>, AsrError>;

    /// Streaming decode: feed audio through the returned sink; results
    /// arrive on the returned stream. Closing the sink finalizes decoding.
    async fn transcribe_stream(
        &self,
        config: &TranscriptionSettings,
    ) -> Result<(mpsc::Sender<Vec<u8>>, mpsc::Receiver<TranscriptionChunk>), AsrError>;

    fn supported_models(&self) -> Vec<String>;

    fn supported_languages(&self) -> Vec<String>;

    /// Releases backend resources. Idempotent.
    async fn close(&self) -> Result<(), AsrError>;
}

impl std::fmt::Debug for dyn AsrProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("dyn AsrProvider")
            .field("supported_models", &self.supported_models())
            .finish()
    }
}

/// Converts PCM16 little-endian bytes to normalized f32 samples.
pub fn pcm16_to_f32(data: &[u8]) -> Vec<f32> {
    data.chunks_exact(2)
        .map(|chunk| f32::from(i16::from_le_bytes([chunk[0], chunk[1]])) / 32768.0)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(
            AsrError::ConfigurationUnavailable.code(),
            "configuration_unavailable"
        );
        assert_eq!(
            AsrError::InvalidModel {
                model: "m".into(),
                available: vec![]
            }
            .code(),
            "invalid_model"
        );
        assert_eq!(
            AsrError::ProviderNotConfigured("x".into()).code(),
            "provider_not_configured"
        );
    }

    #[test]
    fn test_pcm16_conversion() {
        let bytes = [
            0x00, 0x00, // 0
            0x00, 0x80, // -32768
            0xFF, 0x7F, // 32767
        ];
        let samples = pcm16_to_f32(&bytes);
        assert_eq!(samples.len(), 3);
        assert_eq!(samples[0], 0.0);
        assert_eq!(samples[1], -1.0);
        assert!((samples[2] - 0.99997).abs() < 1e-4);
    }

    #[test]
    fn test_final_chunk_default() {
        let chunk = TranscriptionChunk::default();
        assert!(!chunk.is_final);
        assert!(chunk.text.is_empty());
        assert!(chunk.start_ms.is_none());
    }
}
