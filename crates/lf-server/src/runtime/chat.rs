//! Chat turn orchestration: locate the session, resolve prompt templates,
//! inject RAG context, compact history when needed, and run the model.

use std::sync::Arc;

use serde::Deserialize;

use crate::runtime::summarize::{estimated_tokens, summarize_history, DEFAULT_KEEP_RECENT};
use crate::state::AppState;
use lf_domain::config::ProjectConfig;
use lf_domain::stream::ChatMessage;
use lf_domain::template;
use lf_domain::{Error, Result};
use lf_models::adapter::GenerateOptions;
use lf_models::thinking::inject_thinking_control;
use lf_models::ModelHandle;
use lf_rag::RetrievalRequest;
use lf_sessions::{AgentState, HistoryStore, SessionRecord};

/// Chat completion request body (OpenAI-compatible, with platform
/// extensions).
#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub model: Option<String>,
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub top_p: Option<f32>,
    #[serde(default)]
    pub stop: Option<Vec<String>>,
    #[serde(default)]
    pub stream: bool,
    /// Thinking mode is off unless explicitly requested.
    #[serde(default)]
    pub think: bool,
    #[serde(default)]
    pub thinking_budget: Option<usize>,
    #[serde(default)]
    pub rag_enabled: bool,
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default)]
    pub rag_top_k: Option<usize>,
    #[serde(default)]
    pub rag_score_threshold: Option<f32>,
    /// Template variables for the project's prompt set.
    #[serde(default)]
    pub variables: Option<serde_json::Map<String, serde_json::Value>>,
    /// Tool definitions, accepted for API compatibility.  Recorded on the
    /// session but not executed server-side.
    #[serde(default)]
    pub tools: Option<serde_json::Value>,
}

/// Everything needed to run the model for one turn.
#[derive(Debug)]
pub struct PreparedTurn {
    pub session_id: String,
    pub record: SessionRecord,
    pub model_wire_id: String,
    pub handle: Arc<ModelHandle>,
    pub messages: Vec<ChatMessage>,
    pub opts: GenerateOptions,
}

/// Build the full turn: session, prompts, RAG context, compaction, model.
///
/// The caller must already hold the session's turn lock.
pub async fn prepare_turn(
    state: &AppState,
    namespace: &str,
    project: &str,
    config: &ProjectConfig,
    session_id: Option<&str>,
    request: &ChatRequest,
) -> Result<(PreparedTurn, HistoryStore)> {
    if request.messages.is_empty() {
        return Err(Error::InvalidArgument("messages must not be empty".into()));
    }

    let history_store = state.history_store(namespace, project)?;
    let (session_id, record, _is_new) = state.sessions.get_or_create(
        &history_store,
        namespace,
        project,
        session_id,
        AgentState::default,
    )?;

    // Conversation = stored history + this request's messages.
    let mut messages = record.agent_state.history.clone();
    messages.extend(request.messages.iter().cloned());

    // Project prompt set, template-resolved, prepended when the
    // conversation carries no system prompt of its own.
    if !messages.iter().any(ChatMessage::is_system) {
        if let Some(prompt_set) = config.prompts.first() {
            let variables = request.variables.clone().unwrap_or_default();
            let mut prelude = Vec::with_capacity(prompt_set.messages.len());
            for prompt in &prompt_set.messages {
                let content = template::resolve(&prompt.content, &variables)
                    .map_err(|e| Error::InvalidArgument(e.to_string()))?;
                prelude.push(ChatMessage::new(&prompt.role, content));
            }
            prelude.extend(messages);
            messages = prelude;
        }
    }

    // RAG context, injected as a system message ahead of the last user turn.
    if request.rag_enabled {
        if let Some(context) = retrieve_context(state, namespace, project, config, request).await? {
            let insert_at = messages
                .iter()
                .rposition(|m| m.role == "user")
                .unwrap_or(messages.len());
            messages.insert(
                insert_at,
                ChatMessage::system(format!(
                    "Use the following retrieved context to answer:\n\n{context}"
                )),
            );
        }
    }

    // Load the model (cache-aware) and compact history when the
    // conversation would not fit its context window.
    let (model_wire_id, handle) = state.language_model(config, request.model.as_deref()).await?;

    let context_budget = config
        .runtime
        .model(request.model.as_deref().unwrap_or_default())
        .or_else(|| config.runtime.default_model_record())
        .and_then(|m| m.context_window)
        .unwrap_or(4096) as usize;
    if estimated_tokens(&messages) + request.max_tokens.unwrap_or(512) as usize > context_budget {
        let language = handle.as_language()?;
        messages = summarize_history(language, &messages, DEFAULT_KEEP_RECENT).await?;
    }

    // Thinking soft switch and token budgets.
    let messages = inject_thinking_control(messages, request.think);
    let answer_tokens = request.max_tokens.unwrap_or(512);
    let (max_tokens, thinking_budget) = if request.think {
        let thinking = request.thinking_budget.unwrap_or(1024);
        (answer_tokens + thinking as u32, Some(thinking))
    } else {
        (answer_tokens, None)
    };

    let opts = GenerateOptions {
        max_tokens: Some(max_tokens),
        temperature: Some(request.temperature.unwrap_or(0.7)),
        top_p: request.top_p,
        stop: request.stop.clone().unwrap_or_default(),
        thinking_budget,
    };

    Ok((
        PreparedTurn {
            session_id,
            record,
            model_wire_id,
            handle,
            messages,
            opts,
        },
        history_store,
    ))
}

/// Persist the finished turn: request messages plus the assistant reply go
/// into the session history.
pub fn commit_turn(
    state: &AppState,
    history_store: &HistoryStore,
    mut record: SessionRecord,
    request: &ChatRequest,
    assistant_reply: &str,
) -> Result<()> {
    record
        .agent_state
        .history
        .extend(request.messages.iter().cloned());
    record
        .agent_state
        .history
        .push(ChatMessage::assistant(assistant_reply));
    if let Some(model) = &request.model {
        record.agent_state.model = Some(model.clone());
    }
    state.sessions.commit_turn(history_store, record)?;
    Ok(())
}

/// Fetch and format RAG context for the request's last user message.
async fn retrieve_context(
    state: &AppState,
    namespace: &str,
    project: &str,
    config: &ProjectConfig,
    request: &ChatRequest,
) -> Result<Option<String>> {
    let db = match request.database.as_deref() {
        Some(name) => config
            .rag
            .database(name)
            .ok_or_else(|| Error::NotFound(format!("database \"{name}\"")))?,
        None => match config.rag.databases.first() {
            Some(db) => db,
            None => {
                return Err(Error::InvalidArgument(
                    "rag_enabled but the project has no databases".into(),
                ));
            }
        },
    };

    let query = request
        .messages
        .iter()
        .rev()
        .find(|m| m.role == "user")
        .map(|m| m.content.clone())
        .unwrap_or_default();
    if query.trim().is_empty() {
        return Ok(None);
    }

    let engine = state
        .retrieval_engine(namespace, project, config, db)
        .await?;
    let (_, retrieval) =
        lf_rag::resolver::resolve_database_strategies(db, &config.components)?;
    let hits = engine
        .retrieve(
            &retrieval,
            &RetrievalRequest {
                query,
                top_k: request.rag_top_k,
                score_threshold: request.rag_score_threshold,
                filters: None,
            },
        )
        .await?;

    if hits.is_empty() {
        return Ok(None);
    }

    let context = hits
        .iter()
        .enumerate()
        .map(|(i, hit)| format!("[{}] {}", i + 1, hit.content))
        .collect::<Vec<_>>()
        .join("\n\n");
    Ok(Some(context))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
