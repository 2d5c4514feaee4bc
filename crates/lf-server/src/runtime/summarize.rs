//! Context summarization: compacts older conversation history into a single
//! summary message when the history would exceed the model's context
//! budget.
//!
//! The summarization model comes from the shared model cache, so concurrent
//! summarizations share one instance.

use std::sync::Arc;

use lf_domain::stream::ChatMessage;
use lf_domain::Result;
use lf_models::adapter::{GenerateOptions, LanguageBackend};

/// Default number of recent exchanges (user + assistant pairs) preserved.
pub const DEFAULT_KEEP_RECENT: usize = 4;

const SUMMARIZE_PROMPT: &str = "Summarize the following conversation concisely, preserving:\n\
- Key facts and decisions made\n\
- Important context the assistant needs to remember\n\
- Any commitments or action items\n\
- Technical details that may be referenced later\n\n\
Be concise but complete. Write in third person (e.g., \"The user asked about X. \
The assistant explained Y.\").\n\nConversation:\n";

/// Split non-system messages into `(to_summarize, to_keep)` for a given
/// `keep_recent` exchange count.
///
/// `keep_recent == 0` means summarize everything and keep nothing; this is
/// an explicit branch because negative-index slicing idioms get the zero
/// case exactly backwards.
pub fn split_history(
    messages: &[ChatMessage],
    keep_recent: usize,
) -> (Vec<ChatMessage>, Vec<ChatMessage>, Vec<ChatMessage>) {
    let system: Vec<ChatMessage> = messages.iter().filter(|m| m.is_system()).cloned().collect();
    let other: Vec<ChatMessage> = messages.iter().filter(|m| !m.is_system()).cloned().collect();

    // Each kept exchange is a user + assistant pair.
    let keep_count = keep_recent * 2;
    let (to_summarize, to_keep) = if keep_count == 0 {
        (other, Vec::new())
    } else if other.len() <= keep_count {
        (Vec::new(), other)
    } else {
        let split = other.len() - keep_count;
        let to_keep = other[split..].to_vec();
        let mut to_summarize = other;
        to_summarize.truncate(split);
        (to_summarize, to_keep)
    };

    (system, to_summarize, to_keep)
}

/// Render messages for the summarization prompt, truncating very long
/// entries so the prompt stays bounded.
fn format_for_summary(messages: &[ChatMessage]) -> String {
    let mut parts = Vec::with_capacity(messages.len());
    for msg in messages {
        if msg.content.is_empty() {
            continue;
        }
        let role_label = match msg.role.as_str() {
            "user" => "User",
            "assistant" => "Assistant",
            "tool" => "Tool Result",
            other => other,
        };
        let content: String = if msg.content.len() > 1000 {
            let cut = floor_char_boundary(&msg.content, 1000);
            format!("{}...", &msg.content[..cut])
        } else {
            msg.content.clone()
        };
        parts.push(format!("{role_label}: {content}"));
    }
    parts.join("\n\n")
}

fn floor_char_boundary(s: &str, mut index: usize) -> usize {
    while index > 0 && !s.is_char_boundary(index) {
        index -= 1;
    }
    index
}

/// Compact a conversation: summarize the older messages, keep the recent
/// ones, and return `system + [summary] + recent`.
///
/// Returns the input unchanged when there is nothing to summarize.
pub async fn summarize_history(
    model: &Arc<dyn LanguageBackend>,
    messages: &[ChatMessage],
    keep_recent: usize,
) -> Result<Vec<ChatMessage>> {
    let (system, to_summarize, to_keep) = split_history(messages, keep_recent);
    if to_summarize.is_empty() {
        return Ok(messages.to_vec());
    }

    tracing::info!(
        summarizing = to_summarize.len(),
        keeping = to_keep.len(),
        "compacting conversation history"
    );

    let prompt = format!("{SUMMARIZE_PROMPT}{}", format_for_summary(&to_summarize));
    let opts = GenerateOptions {
        max_tokens: Some(512),
        temperature: Some(0.3),
        ..Default::default()
    };
    let summary = model.generate(&[ChatMessage::user(prompt)], &opts).await?;

    let mut out = system;
    out.push(ChatMessage::system(format!(
        "[Conversation Summary]\n{}",
        summary.trim()
    )));
    out.extend(to_keep);
    Ok(out)
}

/// Rough context estimate used to decide when to compact: four characters
/// per token.
pub fn estimated_tokens(messages: &[ChatMessage]) -> usize {
    messages.iter().map(|m| m.content.len() / 4 + 4).sum()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
