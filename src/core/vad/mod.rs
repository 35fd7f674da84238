//! Voice activity detection.
//!
//! The segmenter classifies the inbound PCM stream into speech and
//! silence, accumulating each utterance into a segment that is handed to
//! transcription when the speaker stops.

mod config;
mod segmenter;

pub use config::VadConfig;
pub use segmenter::{EnergyVad, VadEvent};

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

/// Per-session segmenter map. Entries are created on the first audio
/// append with turn detection enabled and removed (and closed) when the
/// session ends.
#[derive(Default)]
pub struct VadRegistry {
    map: RwLock<HashMap<String, Arc<EnergyVad>>>,
}

impl VadRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, session_id: &str) -> Option<Arc<EnergyVad>> {
        self.map.read().get(session_id).cloned()
    }

    pub fn get_or_create(&self, session_id: &str, config: VadConfig) -> Arc<EnergyVad> {
        if let Some(vad) = self.get(session_id) {
            return vad;
        }
        let mut map = self.map.write();
        map.entry(session_id.to_string())
            .or_insert_with(|| Arc::new(EnergyVad::new(config)))
            .clone()
    }

    /// Closes and removes the session's segmenter, if present.
    pub fn remove(&self, session_id: &str) {
        if let Some(vad) = self.map.write().remove(session_id) {
            vad.close();
        }
    }

    pub fn len(&self) -> usize {
        self.map.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.read().is_empty()
    }
}

#[cfg(test)]
mod registry_tests {
    use super::*;

    #[test]
    fn test_get_or_create_returns_same_instance() {
        let registry = VadRegistry::new();
        let a = registry.get_or_create("sess_1", VadConfig::default());
        let b = registry.get_or_create("sess_1", VadConfig::default());
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_remove_closes_segmenter() {
        let registry = VadRegistry::new();
        let vad = registry.get_or_create("sess_1", VadConfig::default());
        registry.remove("sess_1");

        assert!(registry.is_empty());
        // Closed: further audio produces no events.
        vad.process_audio(&[0x00, 0x40, 0x00, 0x40]);
        assert!(vad.drain().is_empty());
    }
}
