//! API request handlers.

use axum::{
    Json,
    extract::{Multipart, Path, Query, State},
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
};
use futures::StreamExt;
use serde::Deserialize;
use std::time::SystemTime;

use crate::core::job::{IndexRequest, InitRequest, QueryRequest};
use crate::core::types::TaskId;
use crate::execution::StreamEvent;
use crate::gateway::Gateway;

use super::errors::ApiError;
use super::responses::{
    ChatCompletionChunk, ChatCompletionResponse, HealthResponse, IndexStartedResponse,
    IndexStatusResponse, MessageResponse, StatusResponse, StreamErrorEvent, completion_id,
    unix_seconds,
};

/// Model names routed to graphrag start with this prefix.
pub const MODEL_PREFIX: &str = "graphrag-";

/// Shared application state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub gateway: Gateway,
}

/// Search options of a chat completion request.
#[derive(Debug, Deserialize)]
pub struct QueryOptions {
    /// Search method, e.g. `global` or `local`.
    pub query_type: String,
    #[serde(default = "default_community_level")]
    pub community_level: Option<u32>,
    /// Knowledge base to query.
    #[serde(default)]
    pub selected_folder: Option<String>,
}

fn default_community_level() -> Option<u32> {
    Some(2)
}

/// Body of `POST /v1/chat/completions`.
#[derive(Debug, Deserialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub query: String,
    // Ignored: graphrag reads sampling parameters from settings.yaml.
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub query_options: Option<QueryOptions>,
}

impl ChatCompletionRequest {
    /// Check routing rules and build the query job.
    pub fn to_query(&self) -> Result<QueryRequest, ApiError> {
        if !self.model.starts_with(MODEL_PREFIX) {
            return Err(ApiError::BadRequest(format!(
                "invalid model specified: {}",
                self.model
            )));
        }
        let (options, folder) = self
            .query_options
            .as_ref()
            .and_then(|o| {
                o.selected_folder
                    .as_deref()
                    .filter(|f| !f.is_empty())
                    .map(|f| (o, f))
            })
            .ok_or_else(|| {
                ApiError::BadRequest("selected folder is required for graphrag queries".to_string())
            })?;

        let mut query = QueryRequest::new(folder, self.query.as_str(), options.query_type.as_str());
        query.streaming = self.stream;
        query.community_level = options.community_level;
        Ok(query)
    }
}

/// Health check endpoint.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse::default())
}

/// Answer a query, either as one JSON completion or as a server-sent stream.
pub async fn chat_completions(
    State(state): State<ApiState>,
    Json(req): Json<ChatCompletionRequest>,
) -> Result<Response, ApiError> {
    let query = req.to_query()?;
    tracing::info!(model = %req.model, kb = %query.root, stream = req.stream, "chat completion");

    if !req.stream {
        let answer = state.gateway.query(&query).await?;
        return Ok(Json(ChatCompletionResponse::new(req.model, answer)).into_response());
    }

    let events = state.gateway.query_stream(&query).await?;
    let id = completion_id();
    let created = unix_seconds(SystemTime::now());
    let model = req.model;

    let sse = events.map(move |event| match event {
        StreamEvent::Delta(text) => {
            Event::default().json_data(ChatCompletionChunk::new(&id, created, &model, text))
        }
        StreamEvent::Error(reason) => {
            tracing::warn!(error = %reason, "streamed query failed");
            Event::default().json_data(StreamErrorEvent::new(reason))
        }
        StreamEvent::Done => Ok(Event::default().data("[DONE]")),
    });

    Ok(Sse::new(sse).keep_alive(KeepAlive::default()).into_response())
}

/// Validate an index request and start it in the background.
pub async fn start_indexing(
    State(state): State<ApiState>,
    Json(req): Json<IndexRequest>,
) -> Result<Json<IndexStartedResponse>, ApiError> {
    let task_id = state.gateway.submit_index(&req)?;
    Ok(Json(IndexStartedResponse {
        status: "started",
        task_id: task_id.to_string(),
        message: "Indexing process has been started in the background".to_string(),
    }))
}

/// Report the status of an index job. Malformed ids are `unknown`.
pub async fn index_status(
    State(state): State<ApiState>,
    Path(task_id): Path<String>,
) -> Json<IndexStatusResponse> {
    let snapshot = TaskId::parse(&task_id)
        .ok()
        .and_then(|id| state.gateway.index_snapshot(&id));

    Json(match snapshot {
        Some(snapshot) => IndexStatusResponse::from(snapshot),
        None => IndexStatusResponse::unknown(task_id),
    })
}

/// Create a knowledge base and run `graphrag init` in it.
pub async fn init(
    State(state): State<ApiState>,
    Json(req): Json<InitRequest>,
) -> Result<Json<StatusResponse>, ApiError> {
    tracing::info!(kb = %req.root, "init request");
    state.gateway.init(&req).await?;
    Ok(Json(StatusResponse { status: "success" }))
}

/// Query parameters of `POST /v1/upload/`.
#[derive(Debug, Deserialize)]
pub struct UploadParams {
    /// Knowledge base receiving the file.
    pub root_path: String,
}

/// Store the multipart `file` field in a knowledge base's input directory.
pub async fn upload(
    State(state): State<ApiState>,
    Query(params): Query<UploadParams>,
    mut multipart: Multipart,
) -> Result<Json<MessageResponse>, ApiError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("invalid multipart body: {}", e)))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field.file_name().unwrap_or_default().to_string();
        let content = field
            .bytes()
            .await
            .map_err(|e| ApiError::BadRequest(format!("failed to read upload: {}", e)))?;

        state
            .gateway
            .upload_input_file(&params.root_path, &filename, &content)?;
        return Ok(Json(MessageResponse {
            message: format!("file {} uploaded", filename),
        }));
    }

    Err(ApiError::BadRequest("no file was uploaded".to_string()))
}

/// List knowledge base names.
pub async fn list_knowledge_bases(
    State(state): State<ApiState>,
) -> Result<Json<Vec<String>>, ApiError> {
    Ok(Json(state.gateway.list_knowledge_bases()?))
}

/// List the documents in a knowledge base's input directory.
pub async fn show_uploaded_files(
    State(state): State<ApiState>,
    Path(kb_name): Path<String>,
) -> Result<Json<Vec<String>>, ApiError> {
    state
        .gateway
        .list_input_files(&kb_name)?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("knowledge base not found: {}", kb_name)))
}
