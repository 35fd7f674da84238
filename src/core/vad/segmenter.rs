//! Energy-based speech segmenter.

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

use super::config::VadConfig;

/// Capacity of the segmenter event queue. Events are dropped, never
/// blocked on, when the consumer falls behind.
const EVENT_QUEUE_SIZE: usize = 16;

/// An event produced by the segmenter. Timestamps are audio time in
/// milliseconds, counted from the first byte the segmenter saw.
#[derive(Debug, Clone)]
pub enum VadEvent {
    SpeechStarted {
        start_ms: u64,
    },
    SpeechStopped {
        start_ms: u64,
        end_ms: u64,
        /// Everything fed since speech started, bridging silence included.
        audio: Vec<u8>,
    },
    Timeout {
        end_ms: u64,
    },
}

#[derive(Debug)]
struct VadState {
    config: VadConfig,
    is_speaking: bool,
    silence_ms: u64,
    segment: Vec<u8>,
    start_ms: u64,
    current_ms: u64,
    timeout_fired: bool,
}

/// RMS-threshold voice activity detector over PCM16 little-endian mono.
///
/// `process_audio` is synchronous and never blocks; emitted events land in
/// a bounded queue drained by the session task via [`EnergyVad::drain`].
pub struct EnergyVad {
    state: Mutex<VadState>,
    events_tx: mpsc::Sender<VadEvent>,
    events_rx: Mutex<mpsc::Receiver<VadEvent>>,
    closed: AtomicBool,
}

impl EnergyVad {
    pub fn new(config: VadConfig) -> Self {
        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE_SIZE);
        Self {
            state: Mutex::new(VadState {
                config,
                is_speaking: false,
                silence_ms: 0,
                segment: Vec::new(),
                start_ms: 0,
                current_ms: 0,
                timeout_fired: false,
            }),
            events_tx,
            events_rx: Mutex::new(events_rx),
            closed: AtomicBool::new(false),
        }
    }

    /// Feed one chunk of PCM16 little-endian mono audio.
    pub fn process_audio(&self, audio: &[u8]) {
        if audio.is_empty() || self.closed.load(Ordering::Acquire) {
            return;
        }

        let mut state = self.state.lock();

        let energy = rms_energy(audio);
        let energy_threshold = energy_threshold(state.config.threshold);

        let samples = audio.len() / 2;
        let chunk_ms = (samples as u64 * 1000) / u64::from(state.config.sample_rate.max(1));

        let was_speaking = state.is_speaking;

        if energy > energy_threshold {
            state.silence_ms = 0;
            state.timeout_fired = false;

            if !state.is_speaking {
                state.is_speaking = true;
                state.start_ms = state.current_ms;

                let prefix_start = state
                    .start_ms
                    .saturating_sub(u64::from(state.config.prefix_padding_ms));
                self.emit(VadEvent::SpeechStarted {
                    start_ms: prefix_start,
                });
            }

            state.segment.extend_from_slice(audio);
        } else if state.is_speaking {
            state.silence_ms += chunk_ms;
            // Keep accumulating: this may just be a pause in speech.
            state.segment.extend_from_slice(audio);

            if state.silence_ms >= u64::from(state.config.silence_duration_ms) {
                state.is_speaking = false;
                let segment = std::mem::take(&mut state.segment);
                debug!(
                    start_ms = state.start_ms,
                    end_ms = state.current_ms,
                    bytes = segment.len(),
                    "speech segment closed"
                );
                self.emit(VadEvent::SpeechStopped {
                    start_ms: state.start_ms,
                    end_ms: state.current_ms,
                    audio: segment,
                });
            }
        }

        state.current_ms += chunk_ms;

        let idle_timeout = u64::from(state.config.idle_timeout_ms);
        if idle_timeout > 0
            && !was_speaking
            && !state.is_speaking
            && !state.timeout_fired
            && state.current_ms >= idle_timeout
        {
            state.timeout_fired = true;
            self.emit(VadEvent::Timeout {
                end_ms: state.current_ms,
            });
        }
    }

    /// Drains every queued event without blocking.
    pub fn drain(&self) -> Vec<VadEvent> {
        let mut rx = self.events_rx.lock();
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    /// Synchronously closes the current segment, if any, returning a
    /// synthetic stop event and resetting the speaker state. Used when the
    /// client commits the buffer explicitly while turn detection is on.
    pub fn force_commit(&self) -> Option<VadEvent> {
        let mut state = self.state.lock();
        if state.segment.is_empty() {
            return None;
        }

        let segment = std::mem::take(&mut state.segment);
        let event = VadEvent::SpeechStopped {
            start_ms: state.start_ms,
            end_ms: state.current_ms,
            audio: segment,
        };
        state.is_speaking = false;
        state.silence_ms = 0;
        state.start_ms = state.current_ms;
        Some(event)
    }

    /// Replaces the configuration; accumulated state is kept.
    pub fn configure(&self, config: VadConfig) {
        self.state.lock().config = config;
    }

    /// Clears segment, clocks and speaker flag.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.is_speaking = false;
        state.silence_ms = 0;
        state.segment.clear();
        state.start_ms = 0;
        state.current_ms = 0;
        state.timeout_fired = false;
    }

    /// Idempotent. Events emitted after close are silently discarded.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub fn is_speaking(&self) -> bool {
        self.state.lock().is_speaking
    }

    pub fn current_ms(&self) -> u64 {
        self.state.lock().current_ms
    }

    fn emit(&self, event: VadEvent) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        // Queue full: drop the event rather than stall the audio path.
        let _ = self.events_tx.try_send(event);
    }
}

/// Heuristic mapping from the 0–1 threshold parameter to an RMS level on
/// 16-bit samples. 1.0 maps to full scale, which no input exceeds.
fn energy_threshold(threshold: f32) -> f64 {
    if threshold >= 1.0 {
        f64::from(u16::MAX / 2 + 1)
    } else {
        f64::from(threshold) * 1000.0
    }
}

/// RMS energy of PCM16 little-endian samples.
fn rms_energy(audio: &[u8]) -> f64 {
    let samples = audio.len() / 2;
    if samples == 0 {
        return 0.0;
    }

    let mut sum_squares = 0.0f64;
    for chunk in audio.chunks_exact(2) {
        let sample = i16::from_le_bytes([chunk[0], chunk[1]]);
        sum_squares += f64::from(sample) * f64::from(sample);
    }
    (sum_squares / samples as f64).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    fn silence(ms: u64, rate: u32) -> Vec<u8> {
        vec![0u8; (ms * u64::from(rate) / 1000) as usize * 2]
    }

    fn tone(ms: u64, amplitude: i16, rate: u32) -> Vec<u8> {
        let samples = (ms * u64::from(rate) / 1000) as usize;
        let mut out = Vec::with_capacity(samples * 2);
        for i in 0..samples {
            let t = i as f32 / rate as f32;
            let sample = (amplitude as f32 * (2.0 * PI * 440.0 * t).sin()) as i16;
            out.extend_from_slice(&sample.to_le_bytes());
        }
        out
    }

    fn feed_chunked(vad: &EnergyVad, audio: &[u8], chunk_ms: u64, rate: u32) {
        let chunk_bytes = (chunk_ms * u64::from(rate) / 1000) as usize * 2;
        for chunk in audio.chunks(chunk_bytes) {
            vad.process_audio(chunk);
        }
    }

    #[test]
    fn test_rms_energy() {
        assert_eq!(rms_energy(&[]), 0.0);
        assert_eq!(rms_energy(&silence(100, 16_000)), 0.0);
        let loud = tone(100, 16_000, 16_000);
        assert!(rms_energy(&loud) > 1000.0);
    }

    #[test]
    fn test_silence_emits_nothing() {
        let vad = EnergyVad::new(VadConfig::default());
        feed_chunked(&vad, &silence(2000, 16_000), 100, 16_000);
        assert!(vad.drain().is_empty());
        assert_eq!(vad.current_ms(), 2000);
    }

    #[test]
    fn test_tone_segmentation() {
        let vad = EnergyVad::new(VadConfig::default());
        let rate = 16_000;

        feed_chunked(&vad, &silence(300, rate), 100, rate);
        feed_chunked(&vad, &tone(1000, 8000, rate), 100, rate);
        feed_chunked(&vad, &silence(800, rate), 100, rate);

        let events = vad.drain();
        assert_eq!(events.len(), 2);

        match &events[0] {
            VadEvent::SpeechStarted { start_ms } => {
                // 300ms in, minus 300ms prefix padding.
                assert_eq!(*start_ms, 0);
            }
            other => panic!("expected SpeechStarted, got {other:?}"),
        }

        match &events[1] {
            VadEvent::SpeechStopped {
                start_ms,
                end_ms,
                audio,
            } => {
                assert_eq!(*start_ms, 300);
                assert!(*end_ms - *start_ms >= 1000);
                // Segment holds the tone plus the bridging silence that
                // accumulated before the stop fired.
                let silence_bytes = (500 * rate as usize / 1000) * 2;
                let tone_bytes = (1000 * rate as usize / 1000) * 2;
                assert_eq!(audio.len(), tone_bytes + silence_bytes);
            }
            other => panic!("expected SpeechStopped, got {other:?}"),
        }
        assert!(!vad.is_speaking());
    }

    #[test]
    fn test_prefix_padding_floors_at_zero() {
        let vad = EnergyVad::new(VadConfig::default());
        // Speech from the very first chunk.
        feed_chunked(&vad, &tone(200, 8000, 16_000), 100, 16_000);

        match &vad.drain()[0] {
            VadEvent::SpeechStarted { start_ms } => assert_eq!(*start_ms, 0),
            other => panic!("expected SpeechStarted, got {other:?}"),
        }
    }

    #[test]
    fn test_threshold_one_never_starts() {
        let config = VadConfig {
            threshold: 1.0,
            ..VadConfig::default()
        };
        let vad = EnergyVad::new(config);

        // Full-scale square wave, the loudest possible input.
        let mut loud = Vec::new();
        for _ in 0..16_000 {
            loud.extend_from_slice(&i16::MIN.to_le_bytes());
        }
        feed_chunked(&vad, &loud, 100, 16_000);

        assert!(vad.drain().is_empty());
        assert!(!vad.is_speaking());
    }

    #[test]
    fn test_short_pause_bridges_segments() {
        let vad = EnergyVad::new(VadConfig::default());
        let rate = 16_000;

        feed_chunked(&vad, &tone(400, 8000, rate), 100, rate);
        // 200ms pause, below the 500ms silence threshold.
        feed_chunked(&vad, &silence(200, rate), 100, rate);
        feed_chunked(&vad, &tone(400, 8000, rate), 100, rate);
        feed_chunked(&vad, &silence(600, rate), 100, rate);

        let events = vad.drain();
        // One utterance, not two.
        assert_eq!(events.len(), 2);
        match &events[1] {
            VadEvent::SpeechStopped { audio, .. } => {
                let expected_ms = 400 + 200 + 400 + 500;
                assert_eq!(audio.len(), (expected_ms * rate as usize / 1000) * 2);
            }
            other => panic!("expected SpeechStopped, got {other:?}"),
        }
    }

    #[test]
    fn test_force_commit() {
        let vad = EnergyVad::new(VadConfig::default());
        feed_chunked(&vad, &tone(300, 8000, 16_000), 100, 16_000);
        vad.drain();

        let event = vad.force_commit().expect("segment should be pending");
        match event {
            VadEvent::SpeechStopped { audio, .. } => {
                assert_eq!(audio.len(), (300 * 16_000 / 1000) * 2);
            }
            other => panic!("expected SpeechStopped, got {other:?}"),
        }
        assert!(!vad.is_speaking());
        assert!(vad.force_commit().is_none());
    }

    #[test]
    fn test_idle_timeout_fires_once() {
        let config = VadConfig {
            idle_timeout_ms: 500,
            ..VadConfig::default()
        };
        let vad = EnergyVad::new(config);
        feed_chunked(&vad, &silence(2000, 16_000), 100, 16_000);

        let timeouts = vad
            .drain()
            .into_iter()
            .filter(|e| matches!(e, VadEvent::Timeout { .. }))
            .count();
        assert_eq!(timeouts, 1);
    }

    #[test]
    fn test_close_is_idempotent_and_silences_events() {
        let vad = EnergyVad::new(VadConfig::default());
        vad.close();
        vad.close();

        feed_chunked(&vad, &tone(500, 8000, 16_000), 100, 16_000);
        assert!(vad.drain().is_empty());
    }

    #[test]
    fn test_reset_clears_clock_and_segment() {
        let vad = EnergyVad::new(VadConfig::default());
        feed_chunked(&vad, &tone(300, 8000, 16_000), 100, 16_000);
        vad.reset();

        assert_eq!(vad.current_ms(), 0);
        assert!(!vad.is_speaking());
        assert!(vad.force_commit().is_none());
    }
}
