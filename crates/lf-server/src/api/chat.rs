//! Chat completions — sync or SSE streaming, OpenAI-compatible.
//!
//! `POST /v1/projects/{ns}/{id}/chat/completions`
//!
//! The `X-Session-ID` header correlates turns with a session; when absent a
//! fresh UUID is minted and echoed back on the response.

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Json, Response};
use futures_util::StreamExt;

use super::ApiError;
use crate::events::{EventBuilder, EventStatus};
use crate::runtime::chat::{commit_turn, prepare_turn, ChatRequest};
use crate::state::AppState;
use crate::streaming::{completion_id, CompletionChunk};
use lf_models::thinking::parse_thinking_response;
use lf_sessions::session_key;

pub const SESSION_HEADER: &str = "x-session-id";

pub async fn completions(
    State(state): State<AppState>,
    Path((namespace, project)): Path<(String, String)>,
    headers: HeaderMap,
    Json(request): Json<ChatRequest>,
) -> Response {
    let config = match state.projects.get(&namespace, &project) {
        Ok(c) => c,
        Err(e) => return ApiError(e).into_response(),
    };

    // Session correlation: the header wins, otherwise mint an id.
    let session_id = headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    // Serialise turns within the session.
    let key = session_key(&namespace, &project, &session_id);
    let turn_permit = state.sessions.acquire_turn(&key).await;

    let mut event = EventBuilder::new(
        "inference",
        &uuid::Uuid::new_v4().to_string(),
        &namespace,
        &project,
        &config.config_hash(),
    );

    let (turn, history_store) = match prepare_turn(
        &state,
        &namespace,
        &project,
        &config,
        Some(&session_id),
        &request,
    )
    .await
    {
        Ok(prepared) => prepared,
        Err(e) => {
            let record = event.finish(EventStatus::Failed, Some(e.to_string()));
            if let Err(log_err) = state.events.append(&record) {
                tracing::warn!(error = %log_err, "failed to append event record");
            }
            return ApiError(e).into_response();
        }
    };
    event.record(
        "turn_prepared",
        serde_json::json!({
            "model": turn.model_wire_id,
            "messages": turn.messages.len(),
            "rag_enabled": request.rag_enabled,
        }),
    );

    if request.stream {
        stream_response(
            state,
            request,
            turn,
            history_store,
            event,
            session_id,
            turn_permit,
        )
    } else {
        sync_response(
            state,
            request,
            turn,
            history_store,
            event,
            session_id,
            turn_permit,
        )
        .await
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Non-streaming
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn sync_response(
    state: AppState,
    request: ChatRequest,
    turn: crate::runtime::chat::PreparedTurn,
    history_store: lf_sessions::HistoryStore,
    mut event: EventBuilder,
    session_id: String,
    _turn_permit: tokio::sync::OwnedMutexGuard<()>,
) -> Response {
    let language = match turn.handle.as_language() {
        Ok(l) => l,
        Err(e) => return ApiError(e).into_response(),
    };

    let raw = match language.generate(&turn.messages, &turn.opts).await {
        Ok(text) => text,
        Err(e) => {
            let record = event.finish(EventStatus::Failed, Some(e.to_string()));
            if let Err(log_err) = state.events.append(&record) {
                tracing::warn!(error = %log_err, "failed to append event record");
            }
            return ApiError(e).into_response();
        }
    };

    let parsed = parse_thinking_response(&raw);
    event.record(
        "generation_done",
        serde_json::json!({"chars": parsed.content.len()}),
    );

    if let Err(e) = commit_turn(&state, &history_store, turn.record, &request, &parsed.content) {
        tracing::warn!(error = %e, "failed to persist session history");
    }

    let mut body = serde_json::json!({
        "id": completion_id(),
        "object": "chat.completion",
        "created": chrono::Utc::now().timestamp(),
        "model": turn.model_wire_id,
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": parsed.content},
            "finish_reason": "stop",
        }],
        "usage": {
            "prompt_tokens": 0,
            "completion_tokens": 0,
            "total_tokens": 0,
        },
    });
    if let Some(thinking) = parsed.thinking {
        if !thinking.is_empty() {
            body["thinking"] = serde_json::json!({"content": thinking});
        }
    }

    let record = event.finish(EventStatus::Completed, None);
    if let Err(e) = state.events.append(&record) {
        tracing::warn!(error = %e, "failed to append event record");
    }

    with_session_header(Json(body).into_response(), &session_id)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Streaming (SSE)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn stream_response(
    state: AppState,
    request: ChatRequest,
    turn: crate::runtime::chat::PreparedTurn,
    history_store: lf_sessions::HistoryStore,
    mut event: EventBuilder,
    session_id: String,
    turn_permit: tokio::sync::OwnedMutexGuard<()>,
) -> Response {
    let id = completion_id();
    let created = chrono::Utc::now().timestamp();
    let model = turn.model_wire_id.clone();

    let stream = async_stream::stream! {
        // The permit lives inside the stream so the session stays locked
        // until the stream finishes or the client disconnects.
        let _permit = turn_permit;

        let language = match turn.handle.as_language() {
            Ok(l) => l.clone(),
            Err(e) => {
                yield Ok::<_, std::convert::Infallible>(
                    Event::default().data(serde_json::json!({"error": e.to_string()}).to_string()),
                );
                return;
            }
        };

        yield Ok(Event::default().data(
            serde_json::to_string(&CompletionChunk::initial(&id, created, &model))
                .unwrap_or_default(),
        ));

        let mut tokens = language.generate_stream(&turn.messages, &turn.opts);
        let mut full_text = String::new();
        let mut failed = false;

        while let Some(item) = tokens.next().await {
            match item {
                Ok(chunk) => {
                    event.first_token();
                    full_text.push_str(&chunk.text);
                    yield Ok(Event::default().data(
                        serde_json::to_string(&CompletionChunk::token(
                            &id, created, &model, &chunk.text,
                        ))
                        .unwrap_or_default(),
                    ));
                    // One token per frame; yield so the frame flushes
                    // instead of coalescing with the next.
                    tokio::task::yield_now().await;
                }
                Err(e) => {
                    failed = true;
                    tracing::warn!(error = %e, "stream generation failed");
                    yield Ok(Event::default().data(
                        serde_json::json!({"error": "generation failed"}).to_string(),
                    ));
                    break;
                }
            }
        }

        if !failed {
            let parsed = parse_thinking_response(&full_text);
            if let Err(e) = commit_turn(&state, &history_store, turn.record, &request, &parsed.content) {
                tracing::warn!(error = %e, "failed to persist session history");
            }
            yield Ok(Event::default().data(
                serde_json::to_string(&CompletionChunk::done(&id, created, &model))
                    .unwrap_or_default(),
            ));
            yield Ok(Event::default().data("[DONE]"));
        }

        let status = if failed { EventStatus::Failed } else { EventStatus::Completed };
        let record = event.finish(status, None);
        if let Err(e) = state.events.append(&record) {
            tracing::warn!(error = %e, "failed to append event record");
        }
    };

    let response = Sse::new(stream)
        .keep_alive(KeepAlive::default())
        .into_response();
    with_session_header(response, &session_id)
}

fn with_session_header(mut response: Response, session_id: &str) -> Response {
    if let Ok(value) = axum::http::HeaderValue::from_str(session_id) {
        response.headers_mut().insert(SESSION_HEADER, value);
    }
    response
}
