//! Deterministic scripted backend for tests and local development.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{AsrError, AsrProvider, TranscriptionChunk, CHUNK_CHANNEL_SIZE};
use crate::core::session::TranscriptionSettings;

const DEFAULT_SCRIPT: &[&str] = &["Hello", ", this is", " a test", " transcription", "."];

/// Emits a fixed chunk script regardless of the audio content.
pub struct MockProvider {
    initial_delay: Duration,
    chunk_delay: Duration,
    script: Vec<String>,
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MockProvider {
    pub fn new() -> Self {
        Self {
            initial_delay: Duration::from_millis(100),
            chunk_delay: Duration::from_millis(50),
            script: DEFAULT_SCRIPT.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// A mock with no artificial latency, for tests.
    pub fn immediate() -> Self {
        Self {
            initial_delay: Duration::ZERO,
            chunk_delay: Duration::ZERO,
            ..Self::new()
        }
    }

    pub fn with_script(mut self, script: Vec<String>) -> Self {
        self.script = script;
        self
    }

    pub fn with_delays(mut self, initial: Duration, chunk: Duration) -> Self {
        self.initial_delay = initial;
        self.chunk_delay = chunk;
        self
    }

    /// The transcript the script concatenates to.
    pub fn full_transcript(&self) -> String {
        self.script.concat()
    }
}

#[async_trait]
impl AsrProvider for MockProvider {
    async fn transcribe(
        &self,
        _audio: Vec<u8>,
        _config: &TranscriptionSettings,
    ) -> Result<mpsc::Receiver<TranscriptionChunk>, AsrError> {
        let (tx, rx) = mpsc::channel(self.script.len().max(1));
        let script = self.script.clone();
        let initial_delay = self.initial_delay;
        let chunk_delay = self.chunk_delay;

        tokio::spawn(async move {
            tokio::time::sleep(initial_delay).await;

            let count = script.len();
            for (i, text) in script.into_iter().enumerate() {
                let is_last = i + 1 == count;
                let chunk = TranscriptionChunk {
                    text,
                    is_final: is_last,
                    start_ms: Some(i as u64 * 100),
                    end_ms: Some((i as u64 + 1) * 100),
                    logprobs: None,
                };
                if tx.send(chunk).await.is_err() {
                    // Consumer gone (deadline or disconnect).
                    return;
                }
                if !is_last {
                    tokio::time::sleep(chunk_delay).await;
                }
            }
        });

        Ok(rx)
    }

    async fn transcribe_stream(
        &self,
        _config: &TranscriptionSettings,
    ) -> Result<(mpsc::Sender<Vec<u8>>, mpsc::Receiver<TranscriptionChunk>), AsrError> {
        let (audio_tx, mut audio_rx) = mpsc::channel::<Vec<u8>>(CHUNK_CHANNEL_SIZE);
        let (result_tx, result_rx) = mpsc::channel(CHUNK_CHANNEL_SIZE);
        let script = self.script.clone();
        let chunk_delay = self.chunk_delay;

        tokio::spawn(async move {
            let mut received = 0usize;
            while let Some(audio) = audio_rx.recv().await {
                received += audio.len();
            }
            if received == 0 {
                let _ = result_tx
                    .send(TranscriptionChunk {
                        is_final: true,
                        ..Default::default()
                    })
                    .await;
                return;
            }

            let count = script.len();
            for (i, text) in script.into_iter().enumerate() {
                let is_last = i + 1 == count;
                if result_tx
                    .send(TranscriptionChunk {
                        text,
                        is_final: is_last,
                        start_ms: Some(i as u64 * 200),
                        end_ms: Some((i as u64 + 1) * 200),
                        logprobs: None,
                    })
                    .await
                    .is_err()
                {
                    return;
                }
                if !is_last {
                    tokio::time::sleep(chunk_delay).await;
                }
            }
        });

        Ok((audio_tx, result_rx))
    }

    fn supported_models(&self) -> Vec<String> {
        vec!["mock-whisper".to_string(), "mock-transcribe".to_string()]
    }

    fn supported_languages(&self) -> Vec<String> {
        ["en", "es", "fr", "de", "ja", "zh", "id"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    async fn close(&self) -> Result<(), AsrError> {
        Ok(())
    }
}
