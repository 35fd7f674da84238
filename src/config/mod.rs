//! Configuration loading.
//!
//! Values come from environment variables with the `GRIBE_` prefix, with
//! built-in defaults; an optional YAML file (selected with `--config`)
//! overrides the environment for non-empty values. The `asr` section is
//! YAML-only apart from the provider choice.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

mod yaml;

pub use yaml::YamlConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_yaml::Error),
}

/// Complete gateway configuration.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub server: ServerSettings,
    pub auth: AuthSettings,
    pub audio: AudioSettings,
    pub rate: RateSettings,
    pub asr: AsrSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub port: u16,
    /// Empty means any origin is allowed.
    pub allowed_origins: Vec<String>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            port: 8080,
            allowed_origins: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct AuthSettings {
    /// Empty means no authentication required.
    pub api_keys: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct AudioSettings {
    /// Default ASR provider type used when a model does not name one.
    pub provider: String,
    /// Cap on the per-session audio buffer in bytes.
    pub max_buffer_size: usize,
    /// Per-segment transcription deadline.
    pub transcription_timeout: Duration,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            provider: "transducer".to_string(),
            max_buffer_size: 15 * 1024 * 1024,
            transcription_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RateSettings {
    pub max_connections_per_ip: u32,
    pub requests_per_second: u32,
    pub burst_size: u32,
    pub cleanup_interval: Duration,
}

impl Default for RateSettings {
    fn default() -> Self {
        Self {
            max_connections_per_ip: 10,
            requests_per_second: 100,
            burst_size: 50,
            cleanup_interval: Duration::from_secs(60),
        }
    }
}

/// ASR model catalogue, normally supplied by the YAML file.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AsrSettings {
    /// Compute provider passed to backends, `"cpu"` or `"gpu"`.
    pub provider: String,
    pub num_threads: usize,
    pub models_dir: String,
    pub default_model: String,
    pub models: HashMap<String, ModelSettings>,
}

impl Default for AsrSettings {
    fn default() -> Self {
        Self {
            provider: "cpu".to_string(),
            num_threads: 4,
            models_dir: "./models".to_string(),
            default_model: String::new(),
            models: HashMap::new(),
        }
    }
}

/// One configured recognizer model.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ModelSettings {
    /// Provider type tag: `"transducer"`, `"whisper"`, or `"mock"`.
    pub provider: String,
    pub encoder: String,
    pub decoder: String,
    pub joiner: String,
    pub tokens: String,
    pub languages: Vec<String>,
}

impl Config {
    /// Loads configuration from environment variables and defaults.
    pub fn from_env() -> Self {
        Self {
            server: ServerSettings {
                port: env_parse("GRIBE_PORT", 8080),
                allowed_origins: env_list("GRIBE_ALLOWED_ORIGINS"),
            },
            auth: AuthSettings {
                api_keys: env_list("GRIBE_API_KEYS"),
            },
            audio: AudioSettings {
                provider: env_string("GRIBE_ASR_PROVIDER", "transducer"),
                max_buffer_size: env_parse("GRIBE_MAX_AUDIO_BUFFER_SIZE", 15 * 1024 * 1024),
                transcription_timeout: Duration::from_secs(env_parse(
                    "GRIBE_TRANSCRIPTION_TIMEOUT_SECONDS",
                    30,
                )),
            },
            rate: RateSettings {
                max_connections_per_ip: env_parse("GRIBE_MAX_CONNECTIONS_PER_IP", 10),
                requests_per_second: env_parse("GRIBE_REQUESTS_PER_SECOND", 100),
                burst_size: env_parse("GRIBE_RATE_BURST_SIZE", 50),
                cleanup_interval: Duration::from_secs(env_parse("GRIBE_RATE_CLEANUP_SECONDS", 60)),
            },
            asr: AsrSettings::default(),
        }
    }

    /// Loads from the environment, then overrides with non-empty values
    /// from the YAML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::from_env();
        let yaml = YamlConfig::load(path)?;
        yaml.apply(&mut config);
        Ok(config)
    }

    pub fn address(&self) -> String {
        format!("0.0.0.0:{}", self.server.port)
    }

    /// Empty allow-list means any origin; missing `Origin` headers are
    /// checked by the caller.
    pub fn is_origin_allowed(&self, origin: &str) -> bool {
        if self.server.allowed_origins.is_empty() {
            return true;
        }
        self.server
            .allowed_origins
            .iter()
            .any(|allowed| allowed == "*" || allowed == origin)
    }

    /// Empty key list means authentication is disabled.
    pub fn is_api_key_valid(&self, api_key: &str) -> bool {
        if self.auth.api_keys.is_empty() {
            return true;
        }
        self.auth.api_keys.iter().any(|key| key == api_key)
    }

    /// Default language for new sessions: the first language of the
    /// default model, falling back to `"en"`.
    pub fn default_language(&self) -> String {
        self.asr
            .models
            .get(&self.asr.default_model)
            .and_then(|m| m.languages.first().cloned())
            .unwrap_or_else(|| "en".to_string())
    }
}

fn env_string(key: &str, default: &str) -> String {
    match std::env::var(key) {
        Ok(value) if !value.is_empty() => value,
        _ => default.to_string(),
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Comma-separated list, entries trimmed, empties dropped.
fn env_list(key: &str) -> Vec<String> {
    std::env::var(key)
        .map(|value| {
            value
                .split(',')
                .map(str::trim)
                .filter(|part| !part.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.audio.max_buffer_size, 15 * 1024 * 1024);
        assert_eq!(config.audio.transcription_timeout, Duration::from_secs(30));
        assert_eq!(config.rate.max_connections_per_ip, 10);
        assert_eq!(config.asr.num_threads, 4);
        assert_eq!(config.asr.models_dir, "./models");
    }

    #[test]
    fn test_origin_allowed() {
        let mut config = Config::default();
        assert!(config.is_origin_allowed("https://anywhere.example"));

        config.server.allowed_origins = vec!["https://app.example".to_string()];
        assert!(config.is_origin_allowed("https://app.example"));
        assert!(!config.is_origin_allowed("https://evil.example"));

        config.server.allowed_origins = vec!["*".to_string()];
        assert!(config.is_origin_allowed("https://evil.example"));
    }

    #[test]
    fn test_api_key_validation() {
        let mut config = Config::default();
        // No keys configured: everything passes.
        assert!(config.is_api_key_valid(""));
        assert!(config.is_api_key_valid("anything"));

        config.auth.api_keys = vec!["secret-1".to_string(), "secret-2".to_string()];
        assert!(config.is_api_key_valid("secret-2"));
        assert!(!config.is_api_key_valid(""));
        assert!(!config.is_api_key_valid("wrong"));
    }

    #[test]
    fn test_yaml_overrides_env_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
server:
  port: 9090
  allowed_origins:
    - "https://app.example"
audio:
  max_audio_buffer_size: 1048576
asr:
  provider: cpu
  num_threads: 2
  models_dir: /opt/models
  default_model: zipformer
  models:
    zipformer:
      provider: transducer
      encoder: encoder.onnx
      decoder: decoder.onnx
      joiner: joiner.onnx
      tokens: tokens.txt
      languages: [id, en]
"#
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.server.allowed_origins, vec!["https://app.example"]);
        assert_eq!(config.audio.max_buffer_size, 1048576);
        // Unset YAML values keep their env/default values.
        assert_eq!(config.rate.requests_per_second, 100);
        assert_eq!(config.asr.default_model, "zipformer");
        assert_eq!(config.asr.models["zipformer"].languages, vec!["id", "en"]);
        assert_eq!(config.default_language(), "id");
    }

    #[test]
    fn test_missing_yaml_file_errors() {
        assert!(Config::from_file(Path::new("/nonexistent/gribe.yaml")).is_err());
    }

    #[test]
    fn test_default_language_fallback() {
        let config = Config::default();
        assert_eq!(config.default_language(), "en");
    }

    #[test]
    fn test_env_list_parsing() {
        std::env::set_var("GRIBE_TEST_LIST", "a, b ,,c");
        assert_eq!(env_list("GRIBE_TEST_LIST"), vec!["a", "b", "c"]);
        std::env::remove_var("GRIBE_TEST_LIST");
        assert!(env_list("GRIBE_TEST_LIST").is_empty());
    }
}
