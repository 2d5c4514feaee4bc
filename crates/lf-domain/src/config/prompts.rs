use serde::{Deserialize, Serialize};

/// One message inside a prompt set.  Content may contain `{{var}}` template
/// markers resolved per request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptMessage {
    pub role: String,
    pub content: String,
}

/// A named, ordered list of role/content messages prepended to a
/// conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptSet {
    pub name: String,
    #[serde(default)]
    pub messages: Vec<PromptMessage>,
}
