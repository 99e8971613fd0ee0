//! Incremental query tests.
//!
//! These tests verify the event stream of a streamed query, both from the
//! gateway directly and as server-sent events over HTTP.

use crate::common::{FAKE_GRAPHRAG, scripted_gateway};
use graphgate::api::{build_router, create_api_state};
use graphgate::{Gateway, InitRequest, QueryRequest, StreamEvent};

use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use futures::StreamExt;
use http_body_util::BodyExt;
use serde_json::{Value, json};
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;
use tower::ServiceExt;

fn gateway_with_kb(root: &Path, script: &str) -> Gateway {
    let gateway = scripted_gateway(root, script, 2);
    gateway.knowledge_bases().create("kb1").unwrap();
    gateway
}

/// Test: Each primary line becomes a delta, in order, followed by `Done`.
#[tokio::test]
async fn test_stream_yields_lines_in_order() {
    let dir = TempDir::new().unwrap();
    let gateway = gateway_with_kb(
        dir.path(),
        r#"echo "The answer"; echo "progress" >&2; echo "is 42""#,
    );

    let events: Vec<StreamEvent> = gateway
        .query_stream(&QueryRequest::new("kb1", "what?", "local"))
        .await
        .unwrap()
        .collect()
        .await;

    assert_eq!(
        events,
        vec![
            StreamEvent::Delta("The answer".to_string()),
            StreamEvent::Delta("is 42".to_string()),
            StreamEvent::Done,
        ]
    );
}

/// Test: The gateway always asks graphrag to stream.
#[tokio::test]
async fn test_stream_passes_streaming_flag() {
    let dir = TempDir::new().unwrap();
    let script = r#"for a in "$@"; do [ "$a" = --streaming ] && echo streaming; done; exit 0"#;
    let gateway = gateway_with_kb(dir.path(), script);

    let mut events = gateway
        .query_stream(&QueryRequest::new("kb1", "what?", "global"))
        .await
        .unwrap();

    assert_eq!(
        events.next_event().await,
        Some(StreamEvent::Delta("streaming".to_string()))
    );
    assert_eq!(events.next_event().await, Some(StreamEvent::Done));
}

/// Test: A failing query ends with an error event, then `Done`.
#[tokio::test]
async fn test_stream_failure_ends_with_error() {
    let dir = TempDir::new().unwrap();
    let gateway = gateway_with_kb(
        dir.path(),
        r#"echo "partial"; echo "rate limited" >&2; exit 1"#,
    );

    let events: Vec<StreamEvent> = gateway
        .query_stream(&QueryRequest::new("kb1", "what?", "global"))
        .await
        .unwrap()
        .collect()
        .await;

    assert_eq!(
        events,
        vec![
            StreamEvent::Delta("partial".to_string()),
            StreamEvent::Error("rate limited".to_string()),
            StreamEvent::Done,
        ]
    );
}

/// Test: Dropping the stream stops the query and frees its slot.
#[tokio::test]
async fn test_dropped_stream_releases_capacity() {
    let dir = TempDir::new().unwrap();
    let script = r#"case "$1" in init) exit 0 ;; *) echo first; sleep 30 ;; esac"#;
    let gateway = scripted_gateway(dir.path(), script, 1);
    gateway.knowledge_bases().create("kb1").unwrap();

    let mut events = gateway
        .query_stream(&QueryRequest::new("kb1", "what?", "global"))
        .await
        .unwrap();
    assert_eq!(
        events.next_event().await,
        Some(StreamEvent::Delta("first".to_string()))
    );
    drop(events);

    // With a single slot, init can only run once the streamed query is gone.
    let init_request = InitRequest::new("kb2");
    let init = gateway.init(&init_request);
    tokio::time::timeout(Duration::from_secs(5), init)
        .await
        .expect("slot was not released")
        .unwrap();
}

/// Test: A streamed chat completion is sent as server-sent events.
#[tokio::test]
async fn test_sse_chat_completion() {
    let dir = TempDir::new().unwrap();
    let gateway = gateway_with_kb(dir.path(), FAKE_GRAPHRAG);
    let router = build_router(create_api_state(gateway));

    let body = json!({
        "model": "graphrag-local",
        "query": "who?",
        "stream": true,
        "query_options": { "query_type": "local", "selected_folder": "kb1" }
    });
    let request = Request::builder()
        .method("POST")
        .uri("/v1/chat/completions")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();

    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(
        response.headers()[header::CONTENT_TYPE]
            .to_str()
            .unwrap()
            .starts_with("text/event-stream")
    );

    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    let data: Vec<&str> = text
        .lines()
        .filter_map(|l| l.strip_prefix("data:"))
        .map(str::trim_start)
        .collect();

    assert_eq!(data.len(), 3);
    assert_eq!(data[2], "[DONE]");

    let chunks: Vec<Value> = data[..2]
        .iter()
        .map(|d| serde_json::from_str(d).unwrap())
        .collect();
    assert_eq!(chunks[0]["object"], "chat.completion.chunk");
    assert_eq!(chunks[0]["model"], "graphrag-local");
    assert_eq!(chunks[0]["choices"][0]["delta"]["content"], "answer: who?");
    assert_eq!(chunks[1]["choices"][0]["delta"]["content"], "sources: 2");
    assert_eq!(chunks[0]["id"], chunks[1]["id"]);
}

/// Test: A failed streamed completion carries an error event before `[DONE]`.
#[tokio::test]
async fn test_sse_chat_completion_error_event() {
    let dir = TempDir::new().unwrap();
    let gateway = gateway_with_kb(dir.path(), "echo 'model not found' >&2; exit 2");
    let router = build_router(create_api_state(gateway));

    let body = json!({
        "model": "graphrag-global",
        "query": "who?",
        "stream": true,
        "query_options": { "query_type": "global", "selected_folder": "kb1" }
    });
    let request = Request::builder()
        .method("POST")
        .uri("/v1/chat/completions")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();

    let response = router.oneshot(request).await.unwrap();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    let data: Vec<&str> = text
        .lines()
        .filter_map(|l| l.strip_prefix("data:"))
        .map(str::trim_start)
        .collect();

    assert_eq!(data.len(), 2);
    let error: Value = serde_json::from_str(data[0]).unwrap();
    assert_eq!(error["error"]["message"], "model not found");
    assert_eq!(error["error"]["type"], "graphrag_error");
    assert_eq!(data[1], "[DONE]");
}
