//! Streaming transducer recognizer over ONNX Runtime.
//!
//! Loads the encoder/decoder/joiner graphs and token table named in the
//! model config and runs greedy search over log-mel fbank features.
//! Requires the `transducer` feature; without it, construction reports an
//! initialization failure.

use std::sync::Arc;

use super::{AsrError, AsrProvider};
use crate::config::{AsrSettings, ModelSettings};

/// Registry creator for the `transducer` provider type.
#[cfg(not(feature = "transducer"))]
pub fn create(
    _settings: &AsrSettings,
    _model_name: &str,
    _model_config: &ModelSettings,
) -> Result<Arc<dyn AsrProvider>, AsrError> {
    Err(AsrError::ProviderInitializationFailed(
        "built without transducer support; enable the `transducer` feature".to_string(),
    ))
}

#[cfg(feature = "transducer")]
pub fn create(
    settings: &AsrSettings,
    model_name: &str,
    model_config: &ModelSettings,
) -> Result<Arc<dyn AsrProvider>, AsrError> {
    let recognizer = imp::TransducerRecognizer::new(settings, model_name, model_config)?;
    Ok(Arc::new(recognizer))
}

#[cfg(feature = "transducer")]
mod imp {
    use std::path::{Path, PathBuf};
    use std::sync::Arc;

    use async_trait::async_trait;
    use ort::session::builder::{GraphOptimizationLevel, SessionBuilder};
    use ort::session::Session;
    use ort::value::Value;
    use parking_lot::Mutex;
    use tokio::sync::mpsc;
    use tracing::{info, warn};

    use crate::config::{AsrSettings, ModelSettings};
    use crate::core::asr::{
        pcm16_to_f32, AsrError, AsrProvider, TranscriptionChunk, CHUNK_CHANNEL_SIZE,
    };
    use crate::core::session::TranscriptionSettings;

    /// The transducer models are trained on 16 kHz audio.
    const MODEL_SAMPLE_RATE: usize = 16_000;
    /// Silence padded before the segment (0.3 s).
    const LEFT_PADDING: usize = 4_800;
    /// Silence padded after the segment (0.6 s).
    const RIGHT_PADDING: usize = 9_600;
    /// Decoder context length of the transducer.
    const CONTEXT_SIZE: usize = 2;
    const BLANK_ID: i64 = 0;

    /// In streaming mode, re-decode after this much new audio.
    const STREAM_DECODE_STEP: usize = MODEL_SAMPLE_RATE; // 1 s

    struct Graphs {
        encoder: Session,
        decoder: Session,
        joiner: Session,
    }

    struct Inner {
        /// Decoding is serialized per recognizer; the handle itself is
        /// shared freely across sessions.
        graphs: Mutex<Graphs>,
        tokens: Vec<String>,
    }

    pub struct TransducerRecognizer {
        inner: Arc<Inner>,
        model_name: String,
        languages: Vec<String>,
    }

    impl TransducerRecognizer {
        pub fn new(
            settings: &AsrSettings,
            model_name: &str,
            model_config: &ModelSettings,
        ) -> Result<Self, AsrError> {
            for (field, value) in [
                ("encoder", &model_config.encoder),
                ("decoder", &model_config.decoder),
                ("joiner", &model_config.joiner),
                ("tokens", &model_config.tokens),
            ] {
                if value.is_empty() {
                    return Err(AsrError::ProviderInitializationFailed(format!(
                        "{field} is required in transducer model config"
                    )));
                }
            }
            if model_config.languages.is_empty() {
                return Err(AsrError::ProviderInitializationFailed(
                    "languages is required in transducer model config".to_string(),
                ));
            }

            let model_dir = PathBuf::from(&settings.models_dir).join(model_name);
            info!(
                model = model_name,
                dir = %model_dir.display(),
                threads = settings.num_threads,
                "initializing transducer recognizer"
            );

            let graphs = Graphs {
                encoder: build_session(&model_dir.join(&model_config.encoder), settings.num_threads)?,
                decoder: build_session(&model_dir.join(&model_config.decoder), settings.num_threads)?,
                joiner: build_session(&model_dir.join(&model_config.joiner), settings.num_threads)?,
            };
            let tokens = load_tokens(&model_dir.join(&model_config.tokens))?;

            Ok(Self {
                inner: Arc::new(Inner { graphs: Mutex::new(graphs), tokens }),
                model_name: model_name.to_string(),
                languages: model_config.languages.clone(),
            })
        }
    }

    fn build_session(path: &Path, num_threads: usize) -> Result<Session, AsrError> {
        let init_err =
            |e: ort::Error| AsrError::ProviderInitializationFailed(format!("{}: {e}", path.display()));

        SessionBuilder::new()
            .map_err(init_err)?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(init_err)?
            .with_intra_threads(num_threads)
            .map_err(init_err)?
            .with_inter_threads(1)
            .map_err(init_err)?
            .commit_from_file(path)
            .map_err(init_err)
    }

    /// Token table: one `<token> <id>` pair per line.
    fn load_tokens(path: &Path) -> Result<Vec<String>, AsrError> {
        let data = std::fs::read_to_string(path).map_err(|e| {
            AsrError::ProviderInitializationFailed(format!("{}: {e}", path.display()))
        })?;

        let mut table: Vec<(usize, String)> = Vec::new();
        for line in data.lines() {
            let mut parts = line.rsplitn(2, char::is_whitespace);
            let id = parts
                .next()
                .and_then(|id| id.parse::<usize>().ok())
                .ok_or_else(|| {
                    AsrError::ProviderInitializationFailed(format!(
                        "malformed token table line: {line:?}"
                    ))
                })?;
            let token = parts.next().unwrap_or_default().to_string();
            table.push((id, token));
        }

        let size = table.iter().map(|(id, _)| id + 1).max().unwrap_or(0);
        let mut tokens = vec![String::new(); size];
        for (id, token) in table {
            tokens[id] = token;
        }
        Ok(tokens)
    }

    impl Inner {
        /// Greedy transducer search over one padded sample buffer.
        fn decode(&self, samples: &[f32]) -> Result<String, AsrError> {
            let run_err = |e: ort::Error| AsrError::TranscriptionFailed(e.to_string());

            let features = fbank::compute(samples);
            let num_frames = features.len() / fbank::N_MELS;
            if num_frames == 0 {
                return Ok(String::new());
            }

            let mut graphs = self.graphs.lock();

            // Encoder: features -> frame embeddings.
            let x: Value = Value::from_array(([1usize, num_frames, fbank::N_MELS], features))
                .map_err(run_err)?
                .into();
            let x_lens: Value = Value::from_array(([1usize], vec![num_frames as i64]))
                .map_err(run_err)?
                .into();

            let input_names: Vec<String> = graphs
                .encoder
                .inputs
                .iter()
                .map(|input| input.name.clone())
                .collect();
            let first_output = graphs.encoder.outputs[0].name.clone();

            let mut encoder_inputs: Vec<(&str, Value)> = vec![(input_names[0].as_str(), x)];
            if input_names.len() > 1 {
                encoder_inputs.push((input_names[1].as_str(), x_lens));
            }

            let encoder_outputs = graphs.encoder.run(encoder_inputs).map_err(run_err)?;
            let (enc_shape, enc_data) = encoder_outputs
                .get(first_output.as_str())
                .ok_or_else(|| AsrError::TranscriptionFailed("no encoder output".to_string()))?
                .try_extract_tensor::<f32>()
                .map_err(run_err)?;

            let enc_frames = enc_shape[1] as usize;
            let enc_dim = enc_shape[2] as usize;
            let enc_data = enc_data.to_vec();
            drop(encoder_outputs);

            // Greedy search: one decoder refresh per emitted token.
            let mut hyp: Vec<i64> = vec![BLANK_ID; CONTEXT_SIZE];
            let mut decoder_out = self.run_decoder(&mut graphs, &hyp)?;
            let mut emitted: Vec<usize> = Vec::new();

            for t in 0..enc_frames {
                let frame = &enc_data[t * enc_dim..(t + 1) * enc_dim];
                let logits = self.run_joiner(&mut graphs, frame, &decoder_out)?;

                let (best_id, _) = logits
                    .iter()
                    .enumerate()
                    .fold((0usize, f32::NEG_INFINITY), |acc, (i, &v)| {
                        if v > acc.1 { (i, v) } else { acc }
                    });

                if best_id as i64 != BLANK_ID {
                    emitted.push(best_id);
                    hyp.push(best_id as i64);
                    let context = hyp[hyp.len() - CONTEXT_SIZE..].to_vec();
                    decoder_out = self.run_decoder(&mut graphs, &context)?;
                }
            }

            let mut text = String::new();
            for id in emitted {
                if let Some(token) = self.tokens.get(id) {
                    text.push_str(&token.replace('\u{2581}', " "));
                }
            }
            Ok(text.trim().to_string())
        }

        fn run_decoder(&self, graphs: &mut Graphs, context: &[i64]) -> Result<Vec<f32>, AsrError> {
            let run_err = |e: ort::Error| AsrError::TranscriptionFailed(e.to_string());

            let y: Value = Value::from_array(([1usize, context.len()], context.to_vec()))
                .map_err(run_err)?
                .into();
            let input_name = graphs.decoder.inputs[0].name.clone();
            let output_name = graphs.decoder.outputs[0].name.clone();

            let outputs = graphs
                .decoder
                .run(vec![(input_name.as_str(), y)])
                .map_err(run_err)?;
            let (_, data) = outputs
                .get(output_name.as_str())
                .ok_or_else(|| AsrError::TranscriptionFailed("no decoder output".to_string()))?
                .try_extract_tensor::<f32>()
                .map_err(run_err)?;
            Ok(data.to_vec())
        }

        fn run_joiner(
            &self,
            graphs: &mut Graphs,
            encoder_frame: &[f32],
            decoder_out: &[f32],
        ) -> Result<Vec<f32>, AsrError> {
            let run_err = |e: ort::Error| AsrError::TranscriptionFailed(e.to_string());

            let enc: Value =
                Value::from_array(([1usize, encoder_frame.len()], encoder_frame.to_vec()))
                    .map_err(run_err)?
                    .into();
            let dec: Value = Value::from_array(([1usize, decoder_out.len()], decoder_out.to_vec()))
                .map_err(run_err)?
                .into();

            let enc_name = graphs.joiner.inputs[0].name.clone();
            let dec_name = graphs.joiner.inputs[1].name.clone();
            let output_name = graphs.joiner.outputs[0].name.clone();

            let outputs = graphs
                .joiner
                .run(vec![(enc_name.as_str(), enc), (dec_name.as_str(), dec)])
                .map_err(run_err)?;
            let (_, data) = outputs
                .get(output_name.as_str())
                .ok_or_else(|| AsrError::TranscriptionFailed("no joiner output".to_string()))?
                .try_extract_tensor::<f32>()
                .map_err(run_err)?;
            Ok(data.to_vec())
        }
    }

    fn padded_samples(audio: &[u8]) -> Vec<f32> {
        let samples = pcm16_to_f32(audio);
        let mut padded = Vec::with_capacity(LEFT_PADDING + samples.len() + RIGHT_PADDING);
        padded.extend(std::iter::repeat(0.0).take(LEFT_PADDING));
        padded.extend_from_slice(&samples);
        padded.extend(std::iter::repeat(0.0).take(RIGHT_PADDING));
        padded
    }

    #[async_trait]
    impl AsrProvider for TransducerRecognizer {
        async fn transcribe(
            &self,
            audio: Vec<u8>,
            _config: &TranscriptionSettings,
        ) -> Result<mpsc::Receiver<TranscriptionChunk>, AsrError> {
            if audio.is_empty() {
                return Err(AsrError::TranscriptionFailed(
                    "audio data is empty".to_string(),
                ));
            }

            let (tx, rx) = mpsc::channel(CHUNK_CHANNEL_SIZE);
            let inner = self.inner.clone();

            tokio::task::spawn_blocking(move || {
                let samples = padded_samples(&audio);
                let end_ms = (audio.len() / 2 * 1000 / MODEL_SAMPLE_RATE) as u64;
                match inner.decode(&samples) {
                    Ok(text) => {
                        let _ = tx.blocking_send(TranscriptionChunk {
                            text,
                            is_final: true,
                            start_ms: Some(0),
                            end_ms: Some(end_ms),
                            logprobs: None,
                        });
                    }
                    Err(e) => warn!(error = %e, "transducer decode failed"),
                }
            });

            Ok(rx)
        }

        async fn transcribe_stream(
            &self,
            _config: &TranscriptionSettings,
        ) -> Result<(mpsc::Sender<Vec<u8>>, mpsc::Receiver<TranscriptionChunk>), AsrError>
        {
            let (audio_tx, mut audio_rx) = mpsc::channel::<Vec<u8>>(CHUNK_CHANNEL_SIZE);
            let (result_tx, result_rx) = mpsc::channel(CHUNK_CHANNEL_SIZE);
            let inner = self.inner.clone();

            tokio::spawn(async move {
                let mut buffered: Vec<u8> = Vec::new();
                let mut decoded_upto = 0usize;
                let mut last_text = String::new();

                loop {
                    match audio_rx.recv().await {
                        Some(audio) => {
                            buffered.extend_from_slice(&audio);
                            if buffered.len() / 2 < decoded_upto + STREAM_DECODE_STEP {
                                continue;
                            }
                            decoded_upto = buffered.len() / 2;

                            let inner = inner.clone();
                            let snapshot = buffered.clone();
                            let text = tokio::task::spawn_blocking(move || {
                                inner.decode(&padded_samples(&snapshot))
                            })
                            .await;

                            if let Ok(Ok(text)) = text {
                                if text.len() > last_text.len() && text.starts_with(&last_text) {
                                    let delta = text[last_text.len()..].to_string();
                                    last_text = text;
                                    if result_tx
                                        .send(TranscriptionChunk {
                                            text: delta,
                                            is_final: false,
                                            ..Default::default()
                                        })
                                        .await
                                        .is_err()
                                    {
                                        return;
                                    }
                                }
                            }
                        }
                        None => {
                            // Sink closed: final decode over everything.
                            let inner = inner.clone();
                            let snapshot = buffered.clone();
                            let text = tokio::task::spawn_blocking(move || {
                                inner.decode(&padded_samples(&snapshot))
                            })
                            .await;

                            let final_text = match text {
                                Ok(Ok(text)) if text.len() > last_text.len() => {
                                    text[last_text.len()..].to_string()
                                }
                                _ => String::new(),
                            };
                            let _ = result_tx
                                .send(TranscriptionChunk {
                                    text: final_text,
                                    is_final: true,
                                    ..Default::default()
                                })
                                .await;
                            return;
                        }
                    }
                }
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
            info!(model = %self.model_name, "transducer recognizer closed");
            Ok(())
        }
    }

    /// Log-mel filterbank features: 25 ms Hann windows, 10 ms shift,
    /// 80 mel bins over 20 Hz – 7.6 kHz.
    mod fbank {
        pub const N_MELS: usize = 80;
        const FRAME_LEN: usize = 400;
        const FRAME_SHIFT: usize = 160;
        const N_FFT: usize = 512;
        const N_BINS: usize = N_FFT / 2 + 1;
        const SAMPLE_RATE: f32 = 16_000.0;
        const MEL_LOW_HZ: f32 = 20.0;
        const MEL_HIGH_HZ: f32 = 7_600.0;

        fn hz_to_mel(hz: f32) -> f32 {
            1127.0 * (1.0 + hz / 700.0).ln()
        }

        /// Triangular mel filters as (start_bin, weights).
        fn mel_filters() -> Vec<(usize, Vec<f32>)> {
            let mel_low = hz_to_mel(MEL_LOW_HZ);
            let mel_high = hz_to_mel(MEL_HIGH_HZ);
            let centers: Vec<f32> = (0..N_MELS + 2)
                .map(|i| mel_low + (mel_high - mel_low) * i as f32 / (N_MELS + 1) as f32)
                .collect();

            let bin_mel: Vec<f32> = (0..N_BINS)
                .map(|k| hz_to_mel(k as f32 * SAMPLE_RATE / N_FFT as f32))
                .collect();

            (0..N_MELS)
                .map(|m| {
                    let (left, center, right) = (centers[m], centers[m + 1], centers[m + 2]);
                    let mut start = None;
                    let mut weights = Vec::new();
                    for (k, &mel) in bin_mel.iter().enumerate() {
                        let weight = if mel > left && mel < center {
                            (mel - left) / (center - left)
                        } else if mel >= center && mel < right {
                            (right - mel) / (right - center)
                        } else {
                            continue;
                        };
                        if start.is_none() {
                            start = Some(k);
                        }
                        weights.push(weight);
                    }
                    (start.unwrap_or(0), weights)
                })
                .collect()
        }

        /// Returns frames flattened as `[num_frames * N_MELS]`.
        pub fn compute(samples: &[f32]) -> Vec<f32> {
            if samples.len() < FRAME_LEN {
                return Vec::new();
            }

            let filters = mel_filters();
            let window: Vec<f32> = (0..FRAME_LEN)
                .map(|n| {
                    0.5 - 0.5
                        * (2.0 * std::f32::consts::PI * n as f32 / (FRAME_LEN - 1) as f32).cos()
                })
                .collect();

            let num_frames = (samples.len() - FRAME_LEN) / FRAME_SHIFT + 1;
            let mut features = Vec::with_capacity(num_frames * N_MELS);

            let mut windowed = [0.0f32; FRAME_LEN];
            for frame in 0..num_frames {
                let start = frame * FRAME_SHIFT;
                for n in 0..FRAME_LEN {
                    windowed[n] = samples[start + n] * window[n];
                }

                let power = power_spectrum(&windowed);
                for (start_bin, weights) in &filters {
                    let mut energy = 0.0f32;
                    for (i, &weight) in weights.iter().enumerate() {
                        energy += weight * power[start_bin + i];
                    }
                    features.push(energy.max(1e-10).ln());
                }
            }

            features
        }

        fn power_spectrum(frame: &[f32; FRAME_LEN]) -> [f32; N_BINS] {
            let mut power = [0.0f32; N_BINS];
            for (k, slot) in power.iter_mut().enumerate() {
                let mut re = 0.0f32;
                let mut im = 0.0f32;
                let step = -2.0 * std::f32::consts::PI * k as f32 / N_FFT as f32;
                for (n, &x) in frame.iter().enumerate() {
                    let angle = step * n as f32;
                    re += x * angle.cos();
                    im += x * angle.sin();
                }
                *slot = re * re + im * im;
            }
            power
        }

        #[cfg(test)]
        mod tests {
            use super::*;

            #[test]
            fn test_frame_count() {
                let samples = vec![0.0f32; 16_000];
                let features = compute(&samples);
                let frames = features.len() / N_MELS;
                assert_eq!(frames, (16_000 - FRAME_LEN) / FRAME_SHIFT + 1);
            }

            #[test]
            fn test_short_input_yields_no_frames() {
                assert!(compute(&[0.0f32; 100]).is_empty());
            }

            #[test]
            fn test_tone_concentrates_energy() {
                // A 1 kHz tone should put more energy in its mel bin than
                // in the top bins.
                let samples: Vec<f32> = (0..FRAME_LEN * 2)
                    .map(|n| (2.0 * std::f32::consts::PI * 1000.0 * n as f32 / SAMPLE_RATE).sin())
                    .collect();
                let features = compute(&samples);
                let frame = &features[..N_MELS];
                let peak = frame.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
                assert!(peak > frame[N_MELS - 1]);
            }
        }
    }
}

#[cfg(all(test, not(feature = "transducer")))]
mod tests {
    use super::*;

    #[test]
    fn test_create_without_feature_fails_cleanly() {
        let err = create(
            &AsrSettings::default(),
            "zipformer",
            &ModelSettings::default(),
        )
        .unwrap_err();
        assert!(matches!(err, AsrError::ProviderInitializationFailed(_)));
    }
}
