//! Page-update messages.

use serde::{Deserialize, Serialize};

/// What a page update does to its target element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamAction {
    Append,
    Prepend,
    Replace,
    Update,
    Remove,
    Before,
    After,
}

/// A structured page update published on a stream. How a message is
/// rendered for the browser is up to the registered message handler;
/// `data` carries whatever the renderer needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamMessage {
    pub action: StreamAction,
    pub target: String,
    /// CSS selector form of the target, when addressing several
    /// elements at once.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub targets: String,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub data: serde_json::Value,
}

impl StreamMessage {
    /// Create a message for a single target element.
    #[must_use]
    pub fn new(action: StreamAction, target: impl Into<String>) -> Self {
        Self {
            action,
            target: target.into(),
            targets: String::new(),
            data: serde_json::Value::Null,
        }
    }

    /// Attach renderer data to the message.
    #[must_use]
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }
}
