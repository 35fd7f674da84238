//! Batch recognizer over whisper.cpp.
//!
//! Requires the `whisper` feature (and cmake at build time). Without the
//! feature, construction reports an initialization failure so deployments
//! fall back to another configured backend.

use std::sync::Arc;

use super::{AsrError, AsrProvider};
use crate::config::{AsrSettings, ModelSettings};

/// Registry creator for the `whisper` provider type.
#[cfg(not(feature = "whisper"))]
pub fn create(
    _settings: &AsrSettings,
    _model_name: &str,
    _model_config: &ModelSettings,
) -> Result<Arc<dyn AsrProvider>, AsrError> {
    Err(AsrError::ProviderInitializationFailed(
        "built without whisper support; enable the `whisper` feature".to_string(),
    ))
}

#[cfg(feature = "whisper")]
pub fn create(
    settings: &AsrSettings,
    model_name: &str,
    model_config: &ModelSettings,
) -> Result<Arc<dyn AsrProvider>, AsrError> {
    let recognizer = imp::WhisperRecognizer::new(settings, model_name, model_config)?;
    Ok(Arc::new(recognizer))
}

#[cfg(feature = "whisper")]
mod imp {
    use std::path::PathBuf;
    use std::sync::{Arc, Once};

    use async_trait::async_trait;
    use tokio::sync::mpsc;
    use tracing::{info, warn};
    use whisper_rs::{
        install_logging_hooks, FullParams, SamplingStrategy, WhisperContext,
        WhisperContextParameters,
    };

    use crate::config::{AsrSettings, ModelSettings};
    use crate::core::asr::{
        pcm16_to_f32, AsrError, AsrProvider, Logprob, TranscriptionChunk, CHUNK_CHANNEL_SIZE,
    };
    use crate::core::session::TranscriptionSettings;

    // Route whisper.cpp's own logging through tracing, once per process.
    static LOGGING_HOOKS: Once = Once::new();

    pub struct WhisperRecognizer {
        context: Arc<WhisperContext>,
        model_name: String,
        languages: Vec<String>,
        default_language: String,
        num_threads: usize,
    }

    impl WhisperRecognizer {
        pub fn new(
            settings: &AsrSettings,
            model_name: &str,
            model_config: &ModelSettings,
        ) -> Result<Self, AsrError> {
            if model_config.languages.is_empty() {
                return Err(AsrError::ProviderInitializationFailed(
                    "languages is required in whisper model config".to_string(),
                ));
            }

            LOGGING_HOOKS.call_once(install_logging_hooks);

            let model_path = PathBuf::from(&settings.models_dir).join(model_name);
            let path_str = model_path.to_str().ok_or_else(|| {
                AsrError::ProviderInitializationFailed("invalid UTF-8 in model path".to_string())
            })?;

            info!(model = model_name, path = %model_path.display(), "loading whisper model");
            let context =
                WhisperContext::new_with_params(path_str, WhisperContextParameters::default())
                    .map_err(|e| {
                        AsrError::ProviderInitializationFailed(format!(
                            "failed to load whisper model: {e}"
                        ))
                    })?;

            Ok(Self {
                context: Arc::new(context),
                model_name: model_name.to_string(),
                languages: model_config.languages.clone(),
                default_language: model_config.languages[0].clone(),
                num_threads: settings.num_threads,
            })
        }

        fn effective_language(&self, config: &TranscriptionSettings) -> String {
            if config.language.is_empty() {
                self.default_language.clone()
            } else {
                config.language.clone()
            }
        }
    }

    fn decode_segment(
        context: &WhisperContext,
        samples: &[f32],
        language: &str,
        num_threads: usize,
        tx: &mpsc::Sender<TranscriptionChunk>,
    ) -> Result<(), AsrError> {
        let mut state = context.create_state().map_err(|e| {
            AsrError::TranscriptionFailed(format!("failed to create whisper state: {e}"))
        })?;

        let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });
        params.set_language(Some(language));
        params.set_n_threads(num_threads as i32);
        params.set_print_special(false);
        params.set_print_progress(false);
        params.set_print_realtime(false);
        params.set_print_timestamps(false);

        state
            .full(params, samples)
            .map_err(|e| AsrError::TranscriptionFailed(format!("whisper inference failed: {e}")))?;

        let segments: Vec<_> = state.as_iter().collect();
        if segments.is_empty() {
            let _ = tx.blocking_send(TranscriptionChunk {
                is_final: true,
                ..Default::default()
            });
            return Ok(());
        }

        let count = segments.len();
        for (i, segment) in segments.iter().enumerate() {
            let text = match segment.to_str_lossy() {
                Ok(text) => text.to_string(),
                Err(_) => continue,
            };

            let mut logprobs = Vec::new();
            for t in 0..segment.n_tokens() {
                if let Some(token) = segment.get_token(t) {
                    if let Ok(token_text) = token.to_str_lossy() {
                        if token_text.is_empty() || token_text.starts_with("<|") {
                            continue;
                        }
                        logprobs.push(Logprob {
                            token: token_text.into_owned(),
                            logprob: f64::from(token.token_probability()).max(1e-10).ln(),
                        });
                    }
                }
            }

            let chunk = TranscriptionChunk {
                text,
                is_final: i + 1 == count,
                // Segment timestamps are in centiseconds.
                start_ms: Some(segment.start_timestamp().max(0) as u64 * 10),
                end_ms: Some(segment.end_timestamp().max(0) as u64 * 10),
                logprobs: (!logprobs.is_empty()).then_some(logprobs),
            };
            if tx.blocking_send(chunk).is_err() {
                // Consumer gone (deadline or disconnect).
                return Ok(());
            }
        }

        Ok(())
    }

    #[async_trait]
    impl AsrProvider for WhisperRecognizer {
        async fn transcribe(
            &self,
            audio: Vec<u8>,
            config: &TranscriptionSettings,
        ) -> Result<mpsc::Receiver<TranscriptionChunk>, AsrError> {
            if audio.is_empty() {
                return Err(AsrError::TranscriptionFailed(
                    "audio data is empty".to_string(),
                ));
            }

            let (tx, rx) = mpsc::channel(CHUNK_CHANNEL_SIZE);
            let context = self.context.clone();
            let language = self.effective_language(config);
            let num_threads = self.num_threads;

            tokio::task::spawn_blocking(move || {
                let samples = pcm16_to_f32(&audio);
                if let Err(e) = decode_segment(&context, &samples, &language, num_threads, &tx) {
                    warn!(error = %e, "whisper decode failed");
                }
            });

            Ok(rx)
        }

        async fn transcribe_stream(
            &self,
            config: &TranscriptionSettings,
        ) -> Result<(mpsc::Sender<Vec<u8>>, mpsc::Receiver<TranscriptionChunk>), AsrError>
        {
            let (audio_tx, mut audio_rx) = mpsc::channel::<Vec<u8>>(CHUNK_CHANNEL_SIZE);
            let (result_tx, result_rx) = mpsc::channel(CHUNK_CHANNEL_SIZE);
            let context = self.context.clone();
            let language = self.effective_language(config);
            let num_threads = self.num_threads;

            // Whisper decodes whole utterances; buffer until the sink closes.
            tokio::spawn(async move {
                let mut buffered = Vec::new();
                while let Some(audio) = audio_rx.recv().await {
                    buffered.extend_from_slice(&audio);
                }

                let _ = tokio::task::spawn_blocking(move || {
                    let samples = pcm16_to_f32(&buffered);
                    if let Err(e) =
                        decode_segment(&context, &samples, &language, num_threads, &result_tx)
                    {
                        warn!(error = %e, "whisper stream decode failed");
                    }
                })
                .await;
            });

            Ok((audio_tx, result_rx))
        }

        fn supported_models(&self) -> Vec<String> {
            vec![self.model_name.clone()]
        }

        fn supported_languages(&self) -> Vec<String> {
            self.languages.clone()
        }

        async fn close(&self) -> Result<(), AsrError> {
            // The context frees itself when the last handle drops.
            Ok(())
        }
    }
}

#[cfg(all(test, not(feature = "whisper")))]
mod tests {
    use super::*;

    #[test]
    fn test_create_without_feature_fails_cleanly() {
        let err = create(
            &AsrSettings::default(),
            "ggml-base.bin",
            &ModelSettings::default(),
        )
        .unwrap_err();
        assert!(matches!(err, AsrError::ProviderInitializationFailed(_)));
        assert_eq!(err.code(), "provider_initialization_failed");
    }
}
