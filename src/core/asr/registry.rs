//! Process-wide ASR model registry.
//!
//! Recognizer construction is expensive (model file loads, compute-graph
//! initialization), so the registry loads each configured model lazily on
//! first request, at most once per model name, and shares the handle
//! across sessions for the lifetime of the process.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{info, warn};

use super::{mock::MockProvider, transducer, whisper, AsrError, AsrProvider};
use crate::config::{AsrSettings, ModelSettings};

/// Constructs a provider for one configured model. Creators run under the
/// registry write guard and must not block on I/O other than model loads.
pub type ProviderCreator = Box<
    dyn Fn(&AsrSettings, &str, &ModelSettings) -> Result<Arc<dyn AsrProvider>, AsrError>
        + Send
        + Sync,
>;

pub struct AsrModelRegistry {
    settings: Option<AsrSettings>,
    loaded: RwLock<HashMap<String, Arc<dyn AsrProvider>>>,
    creators: RwLock<HashMap<String, ProviderCreator>>,
}

impl AsrModelRegistry {
    /// A registry over the configured model catalogue, with the built-in
    /// provider types registered.
    pub fn new(settings: AsrSettings) -> Self {
        let registry = Self {
            settings: Some(settings),
            loaded: RwLock::new(HashMap::new()),
            creators: RwLock::new(HashMap::new()),
        };
        registry.register_provider_type("transducer", Box::new(transducer::create));
        registry.register_provider_type("whisper", Box::new(whisper::create));
        registry.register_provider_type("mock", Box::new(|_, _, _| Ok(Arc::new(MockProvider::new()))));
        registry
    }

    /// A registry without configuration; every lookup fails with
    /// `configuration_unavailable`.
    pub fn unconfigured() -> Self {
        Self {
            settings: None,
            loaded: RwLock::new(HashMap::new()),
            creators: RwLock::new(HashMap::new()),
        }
    }

    /// Registers (or replaces) a creator for a provider type tag.
    pub fn register_provider_type(&self, type_tag: &str, creator: ProviderCreator) {
        self.creators.write().insert(type_tag.to_string(), creator);
    }

    /// Resolves `(model, language)` to a provider handle, loading the
    /// model on first use. Construction failures are not cached, so a
    /// later request may retry.
    pub fn get_model(
        &self,
        model_name: &str,
        language: &str,
    ) -> Result<Arc<dyn AsrProvider>, AsrError> {
        let settings = self
            .settings
            .as_ref()
            .ok_or(AsrError::ConfigurationUnavailable)?;

        let model_config =
            settings
                .models
                .get(model_name)
                .ok_or_else(|| AsrError::InvalidModel {
                    model: model_name.to_string(),
                    available: self.available_models(),
                })?;

        if language.is_empty() {
            return Err(AsrError::UnsupportedLanguage {
                model: model_name.to_string(),
                language: String::new(),
                supported: model_config.languages.clone(),
            });
        }
        if !model_config.languages.iter().any(|l| l == language) {
            return Err(AsrError::UnsupportedLanguage {
                model: model_name.to_string(),
                language: language.to_string(),
                supported: model_config.languages.clone(),
            });
        }

        if let Some(provider) = self.loaded.read().get(model_name) {
            return Ok(provider.clone());
        }

        let mut loaded = self.loaded.write();
        // Another task may have won the race while we waited.
        if let Some(provider) = loaded.get(model_name) {
            info!(model = model_name, "reusing already loaded model");
            return Ok(provider.clone());
        }

        if model_config.provider.is_empty() {
            return Err(AsrError::ProviderNotConfigured(format!(
                "model '{model_name}' does not specify a provider type"
            )));
        }

        let creators = self.creators.read();
        let creator = creators
            .get(&model_config.provider)
            .ok_or_else(|| AsrError::ProviderNotConfigured(model_config.provider.clone()))?;

        info!(
            model = model_name,
            provider = %model_config.provider,
            "loading model"
        );
        let provider = creator(settings, model_name, model_config)?;
        loaded.insert(model_name.to_string(), provider.clone());
        info!(model = model_name, "model loaded and cached");

        Ok(provider)
    }

    /// Configured default model name, if any.
    pub fn default_model(&self) -> Option<String> {
        self.settings
            .as_ref()
            .map(|s| s.default_model.clone())
            .filter(|m| !m.is_empty())
    }

    pub fn available_models(&self) -> Vec<String> {
        self.settings
            .as_ref()
            .map(|s| s.models.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn model_languages(&self, model_name: &str) -> Result<Vec<String>, AsrError> {
        let settings = self
            .settings
            .as_ref()
            .ok_or(AsrError::ConfigurationUnavailable)?;
        settings
            .models
            .get(model_name)
            .map(|m| m.languages.clone())
            .ok_or_else(|| AsrError::InvalidModel {
                model: model_name.to_string(),
                available: self.available_models(),
            })
    }

    pub fn is_model_loaded(&self, model_name: &str) -> bool {
        self.loaded.read().contains_key(model_name)
    }

    pub fn loaded_models(&self) -> Vec<String> {
        self.loaded.read().keys().cloned().collect()
    }

    /// Closes every loaded provider and clears the cache. Individual close
    /// errors are logged; the last one is returned.
    pub async fn close(&self) -> Result<(), AsrError> {
        let providers: Vec<(String, Arc<dyn AsrProvider>)> =
            self.loaded.write().drain().collect();

        let mut last_err = None;
        for (name, provider) in providers {
            if let Err(e) = provider.close().await {
                warn!(model = %name, error = %e, "failed to close model");
                last_err = Some(e);
            }
        }

        match last_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
