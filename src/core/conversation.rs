//! Conversation history: an ordered sequence of items plus an ID lookup.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A single entry in the conversation: a user input (audio or text) or an
/// assistant output.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Item {
    pub id: String,
    /// Always `"realtime.item"` once stored.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub object: String,
    /// `"message"` or `"function_call"`.
    #[serde(rename = "type", skip_serializing_if = "String::is_empty")]
    pub kind: String,
    /// `"in_progress"` or `"completed"`.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub status: String,
    /// `"user"`, `"assistant"`, or `"system"`.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub role: String,
    pub content: Vec<ContentPart>,
}

/// Content within an item.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ContentPart {
    /// `"input_text"`, `"input_audio"`, or `"text"`.
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub text: String,
    /// Base64-encoded PCM for input audio parts.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub audio: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub transcript: String,
    /// `"pcm16"` for audio parts.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub format: String,
}

impl Item {
    /// An empty in-progress message item.
    pub fn message(id: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            object: "realtime.item".to_string(),
            kind: "message".to_string(),
            status: "in_progress".to_string(),
            role: role.into(),
            content: Vec::new(),
        }
    }

    /// A completed user item holding one base64 input-audio content part.
    pub fn user_audio(id: impl Into<String>, audio_b64: String) -> Self {
        let mut item = Self::message(id, "user");
        item.status = "completed".to_string();
        item.content = vec![ContentPart {
            kind: "input_audio".to_string(),
            audio: audio_b64,
            format: "pcm16".to_string(),
            ..Default::default()
        }];
        item
    }
}

/// Ordered conversation state. Insertion appends to the order; deletion
/// removes from both the map and the order, preserving the relative order
/// of the survivors.
#[derive(Debug, Default)]
pub struct Conversation {
    pub id: String,
    items: HashMap<String, Item>,
    order: Vec<String>,
}

impl Conversation {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            items: HashMap::new(),
            order: Vec::new(),
        }
    }

    /// The item currently at the tail of the order, if any.
    pub fn last_item_id(&self) -> Option<String> {
        self.order.last().cloned()
    }

    pub fn add_item(&mut self, item: Item) {
        self.order.push(item.id.clone());
        self.items.insert(item.id.clone(), item);
    }

    pub fn get_item(&self, item_id: &str) -> Option<&Item> {
        self.items.get(item_id)
    }

    /// Returns `false` when the item does not exist.
    pub fn delete_item(&mut self, item_id: &str) -> bool {
        if self.items.remove(item_id).is_none() {
            return false;
        }
        self.order.retain(|id| id != item_id);
        true
    }

    /// Patches the transcript onto the first content part of an item.
    pub fn set_transcript(&mut self, item_id: &str, transcript: &str) {
        if let Some(item) = self.items.get_mut(item_id) {
            if let Some(part) = item.content.first_mut() {
                part.transcript = transcript.to_string();
            }
        }
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_and_get_item() {
        let mut conv = Conversation::new("conv_1");
        conv.add_item(Item::message("item_a", "user"));

        assert_eq!(conv.len(), 1);
        assert_eq!(conv.get_item("item_a").unwrap().role, "user");
        assert_eq!(conv.last_item_id().as_deref(), Some("item_a"));
    }

    #[test]
    fn test_delete_preserves_survivor_order() {
        let mut conv = Conversation::new("conv_1");
        conv.add_item(Item::message("a", "user"));
        conv.add_item(Item::message("b", "assistant"));
        conv.add_item(Item::message("c", "user"));

        assert!(conv.delete_item("b"));
        assert_eq!(conv.len(), 2);
        assert!(conv.get_item("b").is_none());
        assert_eq!(conv.last_item_id().as_deref(), Some("c"));
    }

    #[test]
    fn test_delete_missing_item() {
        let mut conv = Conversation::new("conv_1");
        assert!(!conv.delete_item("nope"));
    }

    #[test]
    fn test_set_transcript_patches_first_part() {
        let mut conv = Conversation::new("conv_1");
        conv.add_item(Item::user_audio("item_a", "AAAA".to_string()));
        conv.set_transcript("item_a", "hello world");

        let item = conv.get_item("item_a").unwrap();
        assert_eq!(item.content[0].transcript, "hello world");
        assert_eq!(item.content[0].format, "pcm16");
    }

    #[test]
    fn test_user_audio_item_shape() {
        let item = Item::user_audio("item_a", "QUJD".to_string());
        assert_eq!(item.status, "completed");
        assert_eq!(item.kind, "message");
        assert_eq!(item.content.len(), 1);
        assert_eq!(item.content[0].kind, "input_audio");
    }
}
