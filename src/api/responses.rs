//! API response types.

use serde::Serialize;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

use crate::registry::{TaskSnapshot, TaskStatus};

/// Seconds since the Unix epoch, as used in completion objects.
pub(crate) fn unix_seconds(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Fresh completion identifier, `chatcmpl-<32 hex digits>`.
pub(crate) fn completion_id() -> String {
    format!("chatcmpl-{}", Uuid::new_v4().simple())
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

impl Default for HealthResponse {
    fn default() -> Self {
        Self {
            status: "ok",
            version: env!("CARGO_PKG_VERSION"),
        }
    }
}

/// A chat message in a completion.
#[derive(Debug, Serialize)]
pub struct ChatMessage {
    pub role: &'static str,
    pub content: String,
}

#[derive(Debug, Serialize)]
pub struct ChatChoice {
    pub index: u32,
    pub message: ChatMessage,
    pub finish_reason: Option<&'static str>,
}

/// Token accounting. `graphrag` does not report usage, so this is zeroed.
#[derive(Debug, Default, Serialize)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

/// Non-streamed answer in the OpenAI `chat.completion` shape.
#[derive(Debug, Serialize)]
pub struct ChatCompletionResponse {
    pub id: String,
    pub object: &'static str,
    pub created: u64,
    pub model: String,
    pub choices: Vec<ChatChoice>,
    pub usage: Usage,
}

impl ChatCompletionResponse {
    pub fn new(model: impl Into<String>, content: String) -> Self {
        Self {
            id: completion_id(),
            object: "chat.completion",
            created: unix_seconds(SystemTime::now()),
            model: model.into(),
            choices: vec![ChatChoice {
                index: 0,
                message: ChatMessage {
                    role: "assistant",
                    content,
                },
                finish_reason: Some("stop"),
            }],
            usage: Usage::default(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ChunkDelta {
    pub content: String,
}

#[derive(Debug, Serialize)]
pub struct ChunkChoice {
    pub index: u32,
    pub delta: ChunkDelta,
    pub finish_reason: Option<&'static str>,
}

/// One streamed line in the OpenAI `chat.completion.chunk` shape.
#[derive(Debug, Serialize)]
pub struct ChatCompletionChunk<'a> {
    pub id: &'a str,
    pub object: &'static str,
    pub created: u64,
    pub model: &'a str,
    pub choices: Vec<ChunkChoice>,
}

impl<'a> ChatCompletionChunk<'a> {
    pub fn new(id: &'a str, created: u64, model: &'a str, content: String) -> Self {
        Self {
            id,
            object: "chat.completion.chunk",
            created,
            model,
            choices: vec![ChunkChoice {
                index: 0,
                delta: ChunkDelta { content },
                finish_reason: None,
            }],
        }
    }
}

#[derive(Debug, Serialize)]
pub struct StreamErrorDetail {
    pub message: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
}

/// Failure event sent on a stream before `[DONE]`.
#[derive(Debug, Serialize)]
pub struct StreamErrorEvent {
    pub error: StreamErrorDetail,
}

impl StreamErrorEvent {
    pub fn new(message: String) -> Self {
        Self {
            error: StreamErrorDetail {
                message,
                kind: "graphrag_error",
            },
        }
    }
}

/// Response to an accepted index job.
#[derive(Debug, Serialize)]
pub struct IndexStartedResponse {
    pub status: &'static str,
    pub task_id: String,
    pub message: String,
}

/// Status of an index job.
#[derive(Debug, Serialize)]
pub struct IndexStatusResponse {
    pub task_id: String,
    pub status: &'static str,
    pub error: Option<String>,
    /// Most recent output lines of the job.
    pub logs: Vec<String>,
    /// Unix seconds.
    pub started_at: Option<u64>,
    pub ended_at: Option<u64>,
    pub duration_ms: Option<u64>,
}

impl IndexStatusResponse {
    /// Status for an id the registry has never seen.
    pub fn unknown(task_id: impl Into<String>) -> Self {
        Self::bare(task_id, &TaskStatus::Unknown)
    }

    fn bare(task_id: impl Into<String>, status: &TaskStatus) -> Self {
        Self {
            task_id: task_id.into(),
            status: status.as_str(),
            error: status.error().map(str::to_string),
            logs: Vec::new(),
            started_at: None,
            ended_at: None,
            duration_ms: None,
        }
    }
}

impl From<TaskSnapshot> for IndexStatusResponse {
    fn from(snapshot: TaskSnapshot) -> Self {
        Self {
            logs: snapshot.recent_output,
            started_at: Some(unix_seconds(snapshot.started_at)),
            ended_at: snapshot.ended_at.map(unix_seconds),
            duration_ms: snapshot.duration.map(|d| d.as_millis() as u64),
            ..Self::bare(snapshot.id.to_string(), &snapshot.status)
        }
    }
}

/// Response carrying a human-readable message.
#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

/// Generic status response.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
}
