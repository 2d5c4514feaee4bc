use serde::{Deserialize, Serialize};
use std::pin::Pin;

/// A boxed async stream, used for model token streaming.
pub type BoxStream<'a, T> = Pin<Box<dyn futures_core::Stream<Item = T> + Send + 'a>>;

/// A single chunk emitted by a streaming language backend.
///
/// `text` is already valid UTF-8 from the backend's point of view; the
/// dispatcher still re-buffers at byte level for tokenizers that emit
/// partial multi-byte sequences.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenChunk {
    pub text: String,
    /// True while the token belongs to a `<think>…</think>` block.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub thinking: bool,
}

impl TokenChunk {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            thinking: false,
        }
    }
}

/// A chat message (role + content), the unit of conversation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<serde_json::Value>,
}

impl ChatMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
            tool_calls: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new("system", content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new("user", content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new("assistant", content)
    }

    pub fn is_system(&self) -> bool {
        self.role == "system"
    }
}
