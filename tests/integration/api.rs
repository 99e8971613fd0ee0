//! API integration tests.
//!
//! These tests drive the router with `oneshot` requests against a scripted
//! `graphrag`.

use crate::common::{FAKE_GRAPHRAG, scripted_gateway};
use graphgate::api::{build_router, create_api_state};
use graphgate::testing::populate_input;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use std::time::Duration;
use tempfile::TempDir;
use tower::ServiceExt;

/// Create a router over a fresh KB root.
fn create_test_router(script: &str) -> (TempDir, Router) {
    let dir = TempDir::new().unwrap();
    let gateway = scripted_gateway(dir.path(), script, 4);
    (dir, build_router(create_api_state(gateway)))
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).unwrap()
    };
    (status, json)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn chat(model: &str, folder: &str, stream: bool) -> Value {
    json!({
        "model": model,
        "query": "who founded the company?",
        "stream": stream,
        "query_options": {
            "query_type": "global",
            "selected_folder": folder
        }
    })
}

/// Test: Health endpoint responds with status ok.
#[tokio::test]
async fn test_health_endpoint() {
    let (_dir, router) = create_test_router(FAKE_GRAPHRAG);

    let (status, json) = send(&router, get("/v1/health")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert!(json["version"].is_string());
}

/// Test: Init creates the knowledge base, which is then listed.
#[tokio::test]
async fn test_init_then_list() {
    let (dir, router) = create_test_router(FAKE_GRAPHRAG);

    let (status, json) = send(&router, post("/v1/init", json!({ "root": "kb1" }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "success");
    assert!(dir.path().join("kb1/input").is_dir());
    assert!(dir.path().join("kb1/.env").is_file());

    let (status, json) = send(&router, get("/v1/list_knowledge_bases")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json, json!(["kb1"]));

    let (status, json) = send(&router, get("/v1/show_uploaded_files/kb1")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json, json!([]));
}

/// Test: Initialising an existing knowledge base conflicts.
#[tokio::test]
async fn test_init_existing_conflicts() {
    let (_dir, router) = create_test_router(FAKE_GRAPHRAG);

    send(&router, post("/v1/init", json!({ "root": "kb1" }))).await;
    let (status, json) = send(&router, post("/v1/init", json!({ "root": "kb1" }))).await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["code"], "CONFLICT");
}

/// Test: A failing init reports the program's diagnostics.
#[tokio::test]
async fn test_init_failure_is_internal_error() {
    let (_dir, router) = create_test_router("echo 'graphrag: not configured' >&2; exit 1");

    let (status, json) = send(&router, post("/v1/init", json!({ "root": "kb1" }))).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json["error"], "graphrag: not configured");
}

/// Test: Knowledge base names with path separators are rejected.
#[tokio::test]
async fn test_init_rejects_path_traversal() {
    let (_dir, router) = create_test_router(FAKE_GRAPHRAG);

    let (status, _) = send(&router, post("/v1/init", json!({ "root": "../escape" }))).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}

/// Test: Uploaded files are listed in name order.
#[tokio::test]
async fn test_show_uploaded_files_sorted() {
    let dir = TempDir::new().unwrap();
    let gateway = scripted_gateway(dir.path(), FAKE_GRAPHRAG, 4);
    populate_input(
        gateway.knowledge_bases(),
        "kb1",
        &[("b.txt", "b"), ("a.txt", "a"), ("c.md", "c")],
    )
    .unwrap();
    let router = build_router(create_api_state(gateway));

    let (status, json) = send(&router, get("/v1/show_uploaded_files/kb1")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json, json!(["a.txt", "b.txt", "c.md"]));
}

/// Test: Listing the files of a missing knowledge base is a 404.
#[tokio::test]
async fn test_show_uploaded_files_missing_kb() {
    let (_dir, router) = create_test_router(FAKE_GRAPHRAG);

    let (status, json) = send(&router, get("/v1/show_uploaded_files/nope")).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["code"], "NOT_FOUND");
}

/// Test: A buffered chat completion carries the whole answer.
#[tokio::test]
async fn test_chat_completion_buffered() {
    let (_dir, router) = create_test_router(FAKE_GRAPHRAG);
    send(&router, post("/v1/init", json!({ "root": "kb1" }))).await;

    let (status, json) = send(
        &router,
        post("/v1/chat/completions", chat("graphrag-global", "kb1", false)),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["object"], "chat.completion");
    assert_eq!(json["model"], "graphrag-global");
    assert!(json["id"].as_str().unwrap().starts_with("chatcmpl-"));
    assert_eq!(
        json["choices"][0]["message"]["content"],
        "answer: who founded the company?\nsources: 2"
    );
    assert_eq!(json["choices"][0]["finish_reason"], "stop");
}

/// Test: Models outside the graphrag family are rejected.
#[tokio::test]
async fn test_chat_completion_rejects_model() {
    let (_dir, router) = create_test_router(FAKE_GRAPHRAG);

    let (status, json) = send(
        &router,
        post("/v1/chat/completions", chat("gpt-4o", "kb1", false)),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"].as_str().unwrap().contains("gpt-4o"));
}

/// Test: Querying a knowledge base that does not exist is a bad request.
#[tokio::test]
async fn test_chat_completion_unknown_folder() {
    let (_dir, router) = create_test_router(FAKE_GRAPHRAG);

    let (status, _) = send(
        &router,
        post("/v1/chat/completions", chat("graphrag-local", "missing", false)),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}

/// Test: A failing query surfaces the diagnostic output as a 500.
#[tokio::test]
async fn test_chat_completion_failure() {
    let script = r#"
case "$1" in
  init) exit 0 ;;
  query) echo "partial"; echo "index not found" >&2; exit 1 ;;
esac
"#;
    let (_dir, router) = create_test_router(script);
    send(&router, post("/v1/init", json!({ "root": "kb1" }))).await;

    let (status, json) = send(
        &router,
        post("/v1/chat/completions", chat("graphrag-global", "kb1", false)),
    )
    .await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json["error"], "index not found");
}

/// Test: Index without input documents is rejected before any task exists.
#[tokio::test]
async fn test_index_requires_input() {
    let (_dir, router) = create_test_router(FAKE_GRAPHRAG);
    send(&router, post("/v1/init", json!({ "root": "kb1" }))).await;

    let (status, json) = send(&router, post("/v1/index", json!({ "root": "kb1" }))).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"].as_str().unwrap().contains("is empty"));
}

/// Test: An accepted index job is reported as running, then succeeded.
#[tokio::test]
async fn test_index_and_poll_status() {
    let dir = TempDir::new().unwrap();
    let gateway = scripted_gateway(dir.path(), FAKE_GRAPHRAG, 4);
    populate_input(gateway.knowledge_bases(), "kb1", &[("doc.txt", "hello")]).unwrap();
    let router = build_router(create_api_state(gateway));

    let (status, json) = send(&router, post("/v1/index", json!({ "root": "kb1" }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "started");
    let task_id = json["task_id"].as_str().unwrap().to_string();

    let uri = format!("/v1/index_status/{}", task_id);
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    let json = loop {
        let (status, json) = send(&router, get(&uri)).await;
        assert_eq!(status, StatusCode::OK);
        if json["status"] != "running" || tokio::time::Instant::now() > deadline {
            break json;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    };

    assert_eq!(json["task_id"], task_id);
    assert_eq!(json["status"], "succeeded");
    assert_eq!(json["error"], Value::Null);
    let logs = json["logs"].as_array().unwrap();
    assert!(logs.iter().any(|l| l == "loading documents"));
    assert!(json["duration_ms"].is_u64());
}

/// Test: Unknown and malformed task ids both report `unknown`.
#[tokio::test]
async fn test_index_status_unknown() {
    let (_dir, router) = create_test_router(FAKE_GRAPHRAG);

    for id in ["0b7e5a1c9f0d4c2e8a6b3d5f7e9c1a2b", "not-a-task"] {
        let (status, json) = send(&router, get(&format!("/v1/index_status/{}", id))).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "unknown");
        assert_eq!(json["task_id"], id);
    }
}

/// Test: Index overrides are written into the knowledge base before the run.
#[tokio::test]
async fn test_index_applies_settings_overrides() {
    let dir = TempDir::new().unwrap();
    let gateway = scripted_gateway(dir.path(), FAKE_GRAPHRAG, 4);
    let router = build_router(create_api_state(gateway.clone()));
    send(&router, post("/v1/init", json!({ "root": "kb1" }))).await;
    populate_input(gateway.knowledge_bases(), "kb1", &[("doc.txt", "hello")]).unwrap();

    let (status, _) = send(
        &router,
        post(
            "/v1/index",
            json!({
                "root": "kb1",
                "api_key": "sk-test",
                "llm_model": "mistral",
                "embed_api_base": "http://localhost:11434/v1"
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let env = std::fs::read_to_string(dir.path().join("kb1/.env")).unwrap();
    assert!(env.contains("# graphrag"));
    assert!(env.contains("GRAPHRAG_API_KEY=sk-test"));

    let settings: serde_yaml::Value =
        serde_yaml::from_str(&std::fs::read_to_string(dir.path().join("kb1/settings.yaml")).unwrap())
            .unwrap();
    assert_eq!(settings["llm"]["model"].as_str(), Some("mistral"));
    assert_eq!(
        settings["embeddings"]["llm"]["api_base"].as_str(),
        Some("http://localhost:11434/v1")
    );

    gateway.shutdown().await;
}

/// Test: An API key override needs an existing `.env` file.
#[tokio::test]
async fn test_index_api_key_without_env_file() {
    let dir = TempDir::new().unwrap();
    let gateway = scripted_gateway(dir.path(), FAKE_GRAPHRAG, 4);
    populate_input(gateway.knowledge_bases(), "kb1", &[("doc.txt", "hello")]).unwrap();
    let router = build_router(create_api_state(gateway.clone()));

    let (status, _) = send(
        &router,
        post("/v1/index", json!({ "root": "kb1", "api_key": "sk-test" })),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(gateway.registry().is_empty());
}

fn upload(root: &str, filename: &str, content: &str) -> Request<Body> {
    let boundary = "graphgate-test-boundary";
    let body = format!(
        "--{b}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{f}\"\r\n\
         Content-Type: text/plain\r\n\r\n{c}\r\n--{b}--\r\n",
        b = boundary,
        f = filename,
        c = content
    );
    Request::builder()
        .method("POST")
        .uri(format!("/v1/upload/?root_path={}", root))
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", boundary),
        )
        .body(Body::from(body))
        .unwrap()
}

/// Test: An uploaded text file lands in the input directory and is listed.
#[tokio::test]
async fn test_upload_then_show_files() {
    let (dir, router) = create_test_router(FAKE_GRAPHRAG);
    send(&router, post("/v1/init", json!({ "root": "kb1" }))).await;

    let (status, json) = send(&router, upload("kb1", "notes.txt", "alpha beta")).await;

    assert_eq!(status, StatusCode::OK);
    assert!(json["message"].as_str().unwrap().contains("notes.txt"));
    assert_eq!(
        std::fs::read_to_string(dir.path().join("kb1/input/notes.txt")).unwrap(),
        "alpha beta"
    );
    let (_, json) = send(&router, get("/v1/show_uploaded_files/kb1")).await;
    assert_eq!(json, json!(["notes.txt"]));
}

/// Test: Only text files can be uploaded.
#[tokio::test]
async fn test_upload_rejects_non_text_file() {
    let (dir, router) = create_test_router(FAKE_GRAPHRAG);
    send(&router, post("/v1/init", json!({ "root": "kb1" }))).await;

    let (status, json) = send(&router, upload("kb1", "report.pdf", "x")).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"].as_str().unwrap().contains(".txt"));
    assert!(!dir.path().join("kb1/input/report.pdf").exists());
}

/// Test: Uploading into a knowledge base without an input directory fails.
#[tokio::test]
async fn test_upload_without_input_dir() {
    let (_dir, router) = create_test_router(FAKE_GRAPHRAG);

    let (status, json) = send(&router, upload("missing", "doc.txt", "x")).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"].as_str().unwrap().contains("does not exist"));
}
