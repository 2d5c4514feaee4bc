//! End-to-end API tests over the full router with stub backends — project
//! CRUD, dataset upload, ingestion via the task broker, retrieval, chat,
//! and event logs, all without external services.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use tower::ServiceExt;

use lf_server::api::build_router;
use lf_server::backends::StubBackendFactory;
use lf_server::state::AppState;

use lf_domain::config::{ProjectConfig, ServerConfig};

const PROJECT_YAML: &str = r#"
name: demo
namespace: default
runtime:
  models:
    - name: chat
      model: "stub/chat-model:Q4_K_M"
      context_window: 4096
  default_model: chat
components:
  embedding_strategies:
    default_embed:
      model: "stub/embedder"
      dimension: 8
  retrieval_strategies:
    default_retrieval:
      mode: similarity
      top_k: 3
  data_processing_strategies:
    docs:
      parsers:
        - type: text
          config:
            chunk_size: 64
            chunk_overlap: 8
  defaults:
    embedding_strategy: default_embed
    retrieval_strategy: default_retrieval
rag:
  databases:
    - name: main
      embedding_strategy: default_embed
      retrieval_strategy: default_retrieval
datasets:
  - name: corpus
    database: main
    data_processing_strategy: docs
"#;

fn test_app() -> (tempfile::TempDir, Router) {
    let tmp = tempfile::TempDir::new().unwrap();
    let config = ServerConfig {
        data_root: tmp.path().to_path_buf(),
        ..Default::default()
    };
    let state = AppState::new(config, Arc::new(StubBackendFactory));
    let router = build_router(state);
    (tmp, router)
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null)
    };
    (status, json)
}

fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get_request(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn create_demo_project(router: &Router) {
    let config: ProjectConfig = serde_yaml::from_str(PROJECT_YAML).unwrap();
    let (status, _) = send(
        router,
        json_request(
            "POST",
            "/v1/projects/default",
            serde_json::to_value(&config).unwrap(),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
}

fn multipart_upload(uri: &str, filename: &str, data: &[u8]) -> Request<Body> {
    let boundary = "lf-test-boundary";
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
    body.extend_from_slice(
        format!(
            "Content-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\n\
             Content-Type: text/plain\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

    Request::builder()
        .method("POST")
        .uri(uri)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={boundary}"),
        )
        .body(Body::from(body))
        .unwrap()
}

async fn wait_for_task(router: &Router, task_id: &str) -> serde_json::Value {
    for _ in 0..100 {
        let (status, body) = send(
            router,
            get_request(&format!("/v1/projects/default/demo/tasks/{task_id}")),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let state = body["state"].as_str().unwrap_or_default().to_owned();
        if ["success", "failure", "revoked"].contains(&state.as_str()) {
            return body;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    panic!("task {task_id} never reached a terminal state");
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Projects
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn project_crud_lifecycle() {
    let (_tmp, router) = test_app();

    // Empty namespace.
    let (status, body) = send(&router, get_request("/v1/projects/default")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["projects"].as_array().unwrap().len(), 0);

    create_demo_project(&router).await;

    // Listed and readable.
    let (_, body) = send(&router, get_request("/v1/projects/default")).await;
    assert_eq!(body["projects"][0], "demo");
    let (status, body) = send(&router, get_request("/v1/projects/default/demo")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "demo");

    // Duplicate create conflicts.
    let config: ProjectConfig = serde_yaml::from_str(PROJECT_YAML).unwrap();
    let (status, _) = send(
        &router,
        json_request(
            "POST",
            "/v1/projects/default",
            serde_json::to_value(&config).unwrap(),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    // Delete, then 404.
    let (status, _) = send(
        &router,
        Request::builder()
            .method("DELETE")
            .uri("/v1/projects/default/demo")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = send(&router, get_request("/v1/projects/default/demo")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn unknown_project_is_404_and_traversal_names_rejected() {
    let (_tmp, router) = test_app();
    let (status, _) = send(&router, get_request("/v1/projects/default/ghost")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&router, get_request("/v1/projects/default/%2E%2E")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Datasets & ingestion
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn upload_ingest_query_round_trip() {
    let (_tmp, router) = test_app();
    create_demo_project(&router).await;

    // Upload a text file.
    let (status, body) = send(
        &router,
        multipart_upload(
            "/v1/projects/default/demo/datasets/corpus/files",
            "notes.txt",
            b"rust ownership is strict. borrowing rules apply. lifetimes matter here.",
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let file = &body["files"][0];
    assert_eq!(file["original_filename"], "notes.txt");
    let hash = file["hash"].as_str().unwrap().to_owned();
    assert!(file["resolved_filename"]
        .as_str()
        .unwrap()
        .starts_with("notes_"));

    // Ingest.
    let (status, body) = send(
        &router,
        json_request(
            "POST",
            "/v1/projects/default/demo/datasets/corpus/process",
            serde_json::json!({}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let task_id = body["task_id"].as_str().unwrap().to_owned();

    let task = wait_for_task(&router, &task_id).await;
    assert_eq!(task["state"], "success");

    // Stats show stored chunks.
    let (status, body) = send(&router, get_request("/v1/projects/default/demo/rag/stats")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["databases"]["main"]["chunks"].as_u64().unwrap() > 0);

    // Query returns results.
    let (status, body) = send(
        &router,
        json_request(
            "POST",
            "/v1/projects/default/demo/rag/query",
            serde_json::json!({"database": "main", "query": "rust ownership", "top_k": 2}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["total_results"].as_u64().unwrap() > 0);

    // Batch query keeps order.
    let (status, body) = send(
        &router,
        json_request(
            "POST",
            "/v1/projects/default/demo/rag/query",
            serde_json::json!({"database": "main", "queries": ["rust", "lifetimes"]}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["batches"].as_array().unwrap().len(), 2);
    assert_eq!(body["batches"][0]["query"], "rust");

    // Delete the file; its store entries stay (deletion is the ingest
    // cleanup's job, not the blob store's).
    let (status, body) = send(
        &router,
        Request::builder()
            .method("DELETE")
            .uri(format!(
                "/v1/projects/default/demo/datasets/corpus/files?hash={hash}"
            ))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["deleted"]["hash"], hash.as_str());
}

#[tokio::test]
async fn oversized_upload_is_413() {
    let tmp = tempfile::TempDir::new().unwrap();
    let config = ServerConfig {
        data_root: tmp.path().to_path_buf(),
        max_upload_bytes: 64,
        ..Default::default()
    };
    let state = AppState::new(config, Arc::new(StubBackendFactory));
    let router = build_router(state);
    create_demo_project(&router).await;

    // Exactly at the limit: accepted.
    let (status, _) = send(
        &router,
        multipart_upload(
            "/v1/projects/default/demo/datasets/corpus/files",
            "ok.txt",
            &[b'a'; 64],
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    // One byte over: 413.
    let (status, _) = send(
        &router,
        multipart_upload(
            "/v1/projects/default/demo/datasets/corpus/files",
            "big.txt",
            &[b'a'; 65],
        ),
    )
    .await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Chat
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn chat_completion_echoes_and_mints_session() {
    let (_tmp, router) = test_app();
    create_demo_project(&router).await;

    let request = json_request(
        "POST",
        "/v1/projects/default/demo/chat/completions",
        serde_json::json!({
            "messages": [{"role": "user", "content": "hello there"}],
        }),
    );
    let response = router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // A session id was minted and echoed.
    let session_id = response
        .headers()
        .get("x-session-id")
        .and_then(|v| v.to_str().ok())
        .unwrap()
        .to_owned();
    assert!(uuid::Uuid::parse_str(&session_id).is_ok());

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["object"], "chat.completion");
    let content = body["choices"][0]["message"]["content"].as_str().unwrap();
    assert!(content.contains("hello there"));

    // Second turn on the same session sees prior history persisted.
    let request = Request::builder()
        .method("POST")
        .uri("/v1/projects/default/demo/chat/completions")
        .header(header::CONTENT_TYPE, "application/json")
        .header("x-session-id", &session_id)
        .body(Body::from(
            serde_json::json!({
                "messages": [{"role": "user", "content": "again"}],
            })
            .to_string(),
        ))
        .unwrap();
    let (status, _) = send(&router, request).await;
    assert_eq!(status, StatusCode::OK);

    let history = std::fs::read_to_string(
        _tmp.path()
            .join("default/demo/sessions")
            .join(&session_id)
            .join("history.json"),
    )
    .unwrap();
    assert!(history.contains("hello there"));
    assert!(history.contains("again"));
}

#[tokio::test]
async fn chat_streaming_emits_openai_chunks_and_done() {
    let (_tmp, router) = test_app();
    create_demo_project(&router).await;

    let request = json_request(
        "POST",
        "/v1/projects/default/demo/chat/completions",
        serde_json::json!({
            "messages": [{"role": "user", "content": "stream me"}],
            "stream": true,
        }),
    );
    let response = router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .unwrap()
        .to_str()
        .unwrap()
        .to_owned();
    assert!(content_type.starts_with("text/event-stream"));

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();

    assert!(text.contains("chat.completion.chunk"));
    assert!(text.contains("\"finish_reason\":\"stop\""));
    assert!(text.trim_end().ends_with("data: [DONE]"));

    // The streamed deltas reassemble the full echo.
    let mut reassembled = String::new();
    for line in text.lines() {
        if let Some(data) = line.strip_prefix("data: ") {
            if data == "[DONE]" {
                continue;
            }
            if let Ok(chunk) = serde_json::from_str::<serde_json::Value>(data) {
                if let Some(delta) = chunk["choices"][0]["delta"]["content"].as_str() {
                    reassembled.push_str(delta);
                }
            }
        }
    }
    assert!(reassembled.contains("stream me"));
}

#[tokio::test]
async fn chat_records_event_log() {
    let (_tmp, router) = test_app();
    create_demo_project(&router).await;

    let (status, _) = send(
        &router,
        json_request(
            "POST",
            "/v1/projects/default/demo/chat/completions",
            serde_json::json!({"messages": [{"role": "user", "content": "hi"}]}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(
        &router,
        get_request("/v1/projects/default/demo/event_logs?type=inference"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 1);
    let event_id = body["events"][0]["event_id"].as_str().unwrap().to_owned();
    assert!(event_id.starts_with("evt_inference_"));
    assert_eq!(body["events"][0]["status"], "completed");

    // Detail includes sub-events.
    let (status, body) = send(
        &router,
        get_request(&format!(
            "/v1/projects/default/demo/event_logs/{event_id}"
        )),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(!body["events"].as_array().unwrap().is_empty());
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Databases & tasks
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn database_creation_rules() {
    let (_tmp, router) = test_app();
    create_demo_project(&router).await;

    // By reference.
    let (status, body) = send(
        &router,
        json_request(
            "POST",
            "/v1/projects/default/demo/rag/databases",
            serde_json::json!({"name": "aux", "embedding_strategy": "default_embed"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["database"]["name"], "aux");
    assert_eq!(body["database"]["distance_metric"], "cosine");

    // Duplicate name conflicts.
    let (status, _) = send(
        &router,
        json_request(
            "POST",
            "/v1/projects/default/demo/rag/databases",
            serde_json::json!({"name": "aux"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    // Reference + inline for the same slot is rejected.
    let (status, _) = send(
        &router,
        json_request(
            "POST",
            "/v1/projects/default/demo/rag/databases",
            serde_json::json!({
                "name": "bad",
                "embedding_strategy": "default_embed",
                "embedding": {"model": "stub/other"},
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, body) = send(&router, get_request("/v1/projects/default/demo/rag/databases")).await;
    assert_eq!(body["databases"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn unknown_task_is_404_and_bad_id_is_400() {
    let (_tmp, router) = test_app();
    create_demo_project(&router).await;

    let random = uuid::Uuid::new_v4();
    let (status, _) = send(
        &router,
        get_request(&format!("/v1/projects/default/demo/tasks/{random}")),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(
        &router,
        get_request("/v1/projects/default/demo/tasks/not-a-uuid"),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn healthz_reports_components() {
    let (_tmp, router) = test_app();
    let (status, body) = send(&router, get_request("/healthz")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["models_cached"], 0);
}
