//! VAD configuration types.

use crate::core::session::TurnDetection;

/// Configuration for the energy-based segmenter, derived from the
/// session's `turn_detection` settings.
#[derive(Debug, Clone)]
pub struct VadConfig {
    /// `"server_vad"`, or empty for manual turn detection.
    pub kind: String,
    /// Speech threshold, 0.0 to 1.0.
    pub threshold: f32,
    /// Audio to reach back and include before speech start (ms).
    pub prefix_padding_ms: u32,
    /// Silence duration that ends an utterance (ms).
    pub silence_duration_ms: u32,
    /// Fires a timeout event when no speech has been detected for this
    /// long. 0 disables the timeout.
    pub idle_timeout_ms: u32,
    /// Sample rate of the PCM input (Hz).
    pub sample_rate: u32,
    /// Mono input is assumed.
    pub channels: u32,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            kind: "server_vad".to_string(),
            threshold: 0.5,
            prefix_padding_ms: 300,
            silence_duration_ms: 500,
            idle_timeout_ms: 0,
            sample_rate: 16_000,
            channels: 1,
        }
    }
}

impl VadConfig {
    pub fn from_turn_detection(td: &TurnDetection, sample_rate: u32) -> Self {
        Self {
            kind: td.kind.clone(),
            threshold: td.threshold,
            prefix_padding_ms: td.prefix_padding_ms,
            silence_duration_ms: td.silence_duration_ms,
            idle_timeout_ms: td.idle_timeout_ms.unwrap_or(0),
            sample_rate,
            channels: 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = VadConfig::default();
        assert_eq!(config.kind, "server_vad");
        assert_eq!(config.threshold, 0.5);
        assert_eq!(config.silence_duration_ms, 500);
        assert_eq!(config.sample_rate, 16_000);
        assert_eq!(config.idle_timeout_ms, 0);
    }

    #[test]
    fn test_from_turn_detection() {
        let td = TurnDetection {
            kind: "server_vad".to_string(),
            threshold: 0.7,
            prefix_padding_ms: 200,
            silence_duration_ms: 400,
            idle_timeout_ms: Some(5000),
            create_response: false,
            interrupt_response: false,
        };
        let config = VadConfig::from_turn_detection(&td, 24_000);

        assert_eq!(config.threshold, 0.7);
        assert_eq!(config.prefix_padding_ms, 200);
        assert_eq!(config.silence_duration_ms, 400);
        assert_eq!(config.idle_timeout_ms, 5000);
        assert_eq!(config.sample_rate, 24_000);
    }
}
