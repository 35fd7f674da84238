//! Process-wide application state.

use std::sync::Arc;

use crate::config::Config;
use crate::core::asr::registry::AsrModelRegistry;
use crate::core::session::SessionManager;
use crate::core::vad::VadRegistry;
use crate::middleware::RateLimiter;

/// Shared state handed to every route and middleware. Sessions, segmenters
/// and recognizer handles all hang off this.
pub struct AppState {
    pub config: Config,
    pub sessions: Arc<SessionManager>,
    pub vads: Arc<VadRegistry>,
    pub registry: Arc<AsrModelRegistry>,
    pub limiter: Arc<RateLimiter>,
}

impl AppState {
    pub fn new(config: Config) -> Arc<Self> {
        let registry = Arc::new(AsrModelRegistry::new(config.asr.clone()));
        let limiter = Arc::new(RateLimiter::new(config.rate.clone()));

        Arc::new(Self {
            config,
            sessions: Arc::new(SessionManager::new()),
            vads: Arc::new(VadRegistry::new()),
            registry,
            limiter,
        })
    }

    /// Releases process-wide resources on shutdown.
    pub async fn close(&self) {
        self.limiter.close();
        if let Err(e) = self.registry.close().await {
            tracing::warn!(error = %e, "failed to close ASR registry cleanly");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_state() {
        let state = AppState::new(Config::default());
        assert!(state.sessions.is_empty());
        assert!(state.vads.is_empty());
        assert!(state.registry.available_models().is_empty());
    }
}
