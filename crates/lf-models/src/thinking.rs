//! Reasoning-model support: `<think>…</think>` parsing, the soft-switch
//! control injection, and thinking-budget enforcement for streaming.

use std::sync::OnceLock;

use regex::Regex;

use lf_domain::stream::ChatMessage;

pub const THINK_OPEN: &str = "<think>";
pub const THINK_CLOSE: &str = "</think>";

/// Parsed response from a thinking model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedThinkingResponse {
    /// Content inside `<think>…</think>`, if any.
    pub thinking: Option<String>,
    /// Final answer: content after `</think>`, or the full response when no
    /// thinking block is present.
    pub content: String,
    /// False when the thinking block was never closed.
    pub thinking_complete: bool,
}

fn think_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?is)^<think>\s*(.*?)\s*</think>\s*(.*)$").expect("think pattern is valid")
    })
}

fn stray_close_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?i)</think>\s*").expect("close pattern is valid"))
}

/// Split a finished response into thinking and answer parts.  Handles the
/// case where the model ran out of budget mid-thought (no closing tag), and
/// strips stray `</think>` tags emitted without a matching open (models in
/// `/no_think` mode output an empty think block or bare closing tags).
pub fn parse_thinking_response(response: &str) -> ParsedThinkingResponse {
    if let Some(caps) = think_pattern().captures(response) {
        return ParsedThinkingResponse {
            thinking: Some(caps[1].trim().to_owned()),
            content: caps[2].trim().to_owned(),
            thinking_complete: true,
        };
    }

    if let Some(rest) = response.strip_prefix(THINK_OPEN) {
        return ParsedThinkingResponse {
            thinking: Some(rest.trim().to_owned()),
            content: String::new(),
            thinking_complete: false,
        };
    }

    if let std::borrow::Cow::Owned(cleaned) = stray_close_pattern().replace_all(response, "") {
        return ParsedThinkingResponse {
            thinking: None,
            content: cleaned.trim().to_owned(),
            thinking_complete: true,
        };
    }

    ParsedThinkingResponse {
        thinking: None,
        content: response.trim().to_owned(),
        thinking_complete: true,
    }
}

/// Inject the soft-switch control (`/think` or `/no_think`) into the last
/// user message.  Thinking is off unless the caller explicitly enabled it,
/// so responses stay predictable by default.
pub fn inject_thinking_control(
    mut messages: Vec<ChatMessage>,
    enable_thinking: bool,
) -> Vec<ChatMessage> {
    let switch = if enable_thinking { "/think" } else { "/no_think" };
    if let Some(last_user) = messages.iter_mut().rev().find(|m| m.role == "user") {
        if !last_user.content.contains("/think") && !last_user.content.contains("/no_think") {
            last_user.content = format!("{} {switch}", last_user.content);
        }
    }
    messages
}

/// Decision produced by the budget for each streamed token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetDecision {
    /// Emit the token unchanged.
    Emit,
    /// Budget exhausted: emit the forced `</think>` close instead of the
    /// token, then drop further thinking tokens.
    ForceClose,
    /// Thinking token after the forced close: drop it.
    Suppress,
}

/// Tracks tokens emitted inside a `<think>` block and forces the closing
/// sequence once the budget is reached.  The backend applies this to its
/// logits/stream layer: after [`BudgetDecision::ForceClose`] every
/// non-`</think>` continuation inside the block is suppressed.
#[derive(Debug)]
pub struct ThinkingBudget {
    budget: usize,
    spent: usize,
    in_think: bool,
    forced_close: bool,
}

impl ThinkingBudget {
    pub fn new(budget: usize) -> Self {
        Self {
            budget,
            spent: 0,
            in_think: false,
            forced_close: false,
        }
    }

    pub fn spent(&self) -> usize {
        self.spent
    }

    /// Observe the next token and decide what to do with it.
    pub fn observe(&mut self, token: &str) -> BudgetDecision {
        if token.contains(THINK_OPEN) {
            self.in_think = true;
            return BudgetDecision::Emit;
        }
        if token.contains(THINK_CLOSE) {
            self.in_think = false;
            // The model closed the block itself; a forced close already
            // emitted the tag, so drop the duplicate.
            return if self.forced_close {
                self.forced_close = false;
                BudgetDecision::Suppress
            } else {
                BudgetDecision::Emit
            };
        }

        if !self.in_think {
            return BudgetDecision::Emit;
        }
        if self.forced_close {
            return BudgetDecision::Suppress;
        }

        self.spent += 1;
        if self.spent >= self.budget {
            self.forced_close = true;
            return BudgetDecision::ForceClose;
        }
        BudgetDecision::Emit
    }
}
