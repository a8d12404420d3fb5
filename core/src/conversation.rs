//! The conversation tree spoken by the upstream chat backend.
//!
//! Messages form a tree keyed by id, with `history.currentId` pointing at
//! the active leaf. The upstream contract uses camelCase field names, so the
//! structs here carry explicit renames.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One node of the conversation tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageNode {
    pub id: String,
    pub role: String,
    pub content: String,
    #[serde(rename = "parentId")]
    pub parent_id: Option<String>,
    #[serde(rename = "childrenIds", default)]
    pub children_ids: Vec<String>,
    pub timestamp: i64,
}

impl MessageNode {
    pub fn new(role: &str, content: &str, parent_id: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role: role.to_string(),
            content: content.to_string(),
            parent_id,
            children_ids: Vec::new(),
            timestamp: chrono::Utc::now().timestamp(),
        }
    }
}

/// Tree index plus the active-leaf pointer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct History {
    #[serde(default)]
    pub messages: HashMap<String, MessageNode>,
    #[serde(rename = "currentId")]
    pub current_id: Option<String>,
}

/// Full conversation state as exchanged with the upstream backend. The flat
/// `messages` array mirrors the tree nodes in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub messages: Vec<MessageNode>,
    #[serde(default)]
    pub history: History,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

impl ConversationState {
    /// Builds the opening state for a new conversation: a single user node
    /// as the root and active leaf.
    pub fn opening(prompt: &str) -> Self {
        let user = MessageNode::new("user", prompt, None);
        let mut history = History::default();
        history.current_id = Some(user.id.clone());
        history.messages.insert(user.id.clone(), user.clone());
        Self {
            id: None,
            messages: vec![user],
            history,
            timestamp: Some(chrono::Utc::now().timestamp_millis()),
        }
    }

    /// Appends a node as a child of `parent_id` (or as a root when `None`),
    /// links it into the parent's children, and advances the active leaf.
    /// Returns the new node's id.
    pub fn append_child(&mut self, role: &str, content: &str, parent_id: Option<String>) -> String {
        let node = MessageNode::new(role, content, parent_id.clone());
        let id = node.id.clone();
        if let Some(parent) = parent_id.as_ref().and_then(|p| self.history.messages.get_mut(p)) {
            parent.children_ids.push(id.clone());
        }
        // Keep the flat mirror in sync with the parent link just updated.
        if let Some(parent_id) = &parent_id {
            if let Some(mirror) = self.messages.iter_mut().find(|m| &m.id == parent_id) {
                mirror.children_ids.push(id.clone());
            }
        }
        self.messages.push(node.clone());
        self.history.messages.insert(id.clone(), node);
        self.history.current_id = Some(id.clone());
        id
    }

    /// Sets the content of an existing node in both the tree and the mirror.
    pub fn set_content(&mut self, id: &str, content: &str) {
        if let Some(node) = self.history.messages.get_mut(id) {
            node.content = content.to_string();
        }
        if let Some(mirror) = self.messages.iter_mut().find(|m| m.id == id) {
            mirror.content = content.to_string();
        }
    }
}
