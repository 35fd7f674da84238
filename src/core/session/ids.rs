//! ID generation for sessions, conversations, items, responses and events.
//!
//! UUIDs keep IDs globally unique across restarts; the 12-hex-char suffix
//! matches what the Realtime protocol clients expect to see.

use uuid::Uuid;

fn short_uuid() -> String {
    Uuid::new_v4().simple().to_string()[..12].to_string()
}

pub fn session_id() -> String {
    format!("sess_{}", short_uuid())
}

pub fn conversation_id() -> String {
    format!("conv_{}", short_uuid())
}

pub fn item_id() -> String {
    format!("item_{}", short_uuid())
}

pub fn response_id() -> String {
    format!("resp_{}", short_uuid())
}

pub fn event_id() -> String {
    format!("evt_{}", short_uuid())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_id_prefixes() {
        assert!(session_id().starts_with("sess_"));
        assert!(conversation_id().starts_with("conv_"));
        assert!(item_id().starts_with("item_"));
        assert!(response_id().starts_with("resp_"));
        assert!(event_id().starts_with("evt_"));
    }

    #[test]
    fn test_suffix_is_non_empty_hex() {
        let id = item_id();
        let suffix = id.strip_prefix("item_").unwrap();
        assert_eq!(suffix.len(), 12);
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_ids_are_unique() {
        let ids: HashSet<String> = (0..10_000).map(|_| event_id()).collect();
        assert_eq!(ids.len(), 10_000);
    }
}
