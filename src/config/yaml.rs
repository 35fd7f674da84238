//! YAML configuration file structure.
//!
//! All fields are optional so a partial file is valid; only non-empty
//! values override what the environment provided.
//!
//! ```yaml
//! server:
//!   port: 8080
//!   allowed_origins:
//!     - "https://app.example"
//! auth:
//!   api_keys:
//!     - "sk-local-dev"
//! audio:
//!   provider: transducer
//!   max_audio_buffer_size: 15728640
//!   transcription_timeout_seconds: 30
//! rate:
//!   max_connections_per_ip: 10
//!   requests_per_second: 100
//!   burst_size: 50
//!   cleanup_interval_seconds: 60
//! asr:
//!   provider: cpu
//!   num_threads: 4
//!   models_dir: ./models
//!   default_model: zipformer
//!   models:
//!     zipformer:
//!       provider: transducer
//!       encoder: encoder.onnx
//!       decoder: decoder.onnx
//!       joiner: joiner.onnx
//!       tokens: tokens.txt
//!       languages: [id, en]
//! ```

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use super::{AsrSettings, Config, ConfigError};

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct YamlConfig {
    pub server: ServerYaml,
    pub auth: AuthYaml,
    pub audio: AudioYaml,
    pub rate: RateYaml,
    pub asr: Option<AsrSettings>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ServerYaml {
    pub port: Option<u16>,
    pub allowed_origins: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct AuthYaml {
    pub api_keys: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct AudioYaml {
    pub provider: Option<String>,
    pub max_audio_buffer_size: Option<usize>,
    pub transcription_timeout_seconds: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RateYaml {
    pub max_connections_per_ip: Option<u32>,
    pub requests_per_second: Option<u32>,
    pub burst_size: Option<u32>,
    pub cleanup_interval_seconds: Option<u64>,
}

impl YamlConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let data = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&data)?)
    }

    /// Overrides non-empty values onto an environment-derived config.
    pub fn apply(self, config: &mut Config) {
        if let Some(port) = self.server.port {
            config.server.port = port;
        }
        if !self.server.allowed_origins.is_empty() {
            config.server.allowed_origins = self.server.allowed_origins;
        }

        if !self.auth.api_keys.is_empty() {
            config.auth.api_keys = self.auth.api_keys;
        }

        if let Some(provider) = self.audio.provider.filter(|p| !p.is_empty()) {
            config.audio.provider = provider;
        }
        if let Some(size) = self.audio.max_audio_buffer_size.filter(|s| *s > 0) {
            config.audio.max_buffer_size = size;
        }
        if let Some(secs) = self.audio.transcription_timeout_seconds.filter(|s| *s > 0) {
            config.audio.transcription_timeout = Duration::from_secs(secs);
        }

        if let Some(n) = self.rate.max_connections_per_ip.filter(|n| *n > 0) {
            config.rate.max_connections_per_ip = n;
        }
        if let Some(n) = self.rate.requests_per_second.filter(|n| *n > 0) {
            config.rate.requests_per_second = n;
        }
        if let Some(n) = self.rate.burst_size.filter(|n| *n > 0) {
            config.rate.burst_size = n;
        }
        if let Some(secs) = self.rate.cleanup_interval_seconds.filter(|s| *s > 0) {
            config.rate.cleanup_interval = Duration::from_secs(secs);
        }

        if let Some(mut asr) = self.asr {
            if asr.provider.is_empty() {
                asr.provider = "cpu".to_string();
            }
            if asr.num_threads == 0 {
                asr.num_threads = 4;
            }
            if asr.models_dir.is_empty() {
                asr.models_dir = "./models".to_string();
            }
            config.asr = asr;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_yaml_keeps_defaults() {
        let yaml: YamlConfig = serde_yaml::from_str("{}").unwrap();
        let mut config = Config::default();
        yaml.apply(&mut config);

        assert_eq!(config.server.port, 8080);
        assert_eq!(config.rate.burst_size, 50);
        assert!(config.asr.models.is_empty());
    }

    #[test]
    fn test_partial_section() {
        let yaml: YamlConfig = serde_yaml::from_str("rate:\n  burst_size: 5\n").unwrap();
        let mut config = Config::default();
        yaml.apply(&mut config);

        assert_eq!(config.rate.burst_size, 5);
        assert_eq!(config.rate.requests_per_second, 100);
    }

    #[test]
    fn test_asr_defaults_filled_in() {
        let yaml: YamlConfig =
            serde_yaml::from_str("asr:\n  default_model: zipformer\n").unwrap();
        let mut config = Config::default();
        yaml.apply(&mut config);

        assert_eq!(config.asr.provider, "cpu");
        assert_eq!(config.asr.num_threads, 4);
        assert_eq!(config.asr.models_dir, "./models");
        assert_eq!(config.asr.default_model, "zipformer");
    }
}
