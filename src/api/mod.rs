//! HTTP API module for the graphgate service.
//!
//! Provides an OpenAI-style chat completion endpoint backed by `graphrag
//! query`, plus endpoints for creating, filling, indexing and inspecting
//! knowledge bases.

mod errors;
mod handlers;
mod responses;

pub use errors::{ApiError, ErrorResponse};
pub use handlers::{ApiState, ChatCompletionRequest, MODEL_PREFIX, QueryOptions, UploadParams};
pub use responses::*;

use axum::{
    Router,
    routing::{get, post},
};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::ServerConfig;
use crate::gateway::Gateway;

/// Configuration for the API server.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Host to bind to.
    pub host: String,
    /// Port to bind to.
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8012,
        }
    }
}

impl From<&ServerConfig> for ApiConfig {
    fn from(server: &ServerConfig) -> Self {
        Self::new(server.host.as_str(), server.port)
    }
}

impl ApiConfig {
    /// Create a new API config with custom host and port.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Get the socket address.
    pub fn socket_addr(&self) -> std::io::Result<SocketAddr> {
        format!("{}:{}", self.host, self.port).parse().map_err(|e| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("invalid socket address '{}:{}': {}", self.host, self.port, e),
            )
        })
    }
}

/// Build the API router with all endpoints.
pub fn build_router(state: ApiState) -> Router {
    Router::new()
        // Health check
        .route("/v1/health", get(handlers::health))
        // Queries
        .route("/v1/chat/completions", post(handlers::chat_completions))
        // Indexing
        .route("/v1/index", post(handlers::start_indexing))
        .route("/v1/index_status/{task_id}", get(handlers::index_status))
        // Knowledge bases
        .route("/v1/init", post(handlers::init))
        .route("/v1/upload/", post(handlers::upload))
        .route("/v1/upload", post(handlers::upload))
        .route(
            "/v1/list_knowledge_bases",
            get(handlers::list_knowledge_bases),
        )
        .route(
            "/v1/show_uploaded_files/{kb_name}",
            get(handlers::show_uploaded_files),
        )
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Create the API state from a gateway.
pub fn create_api_state(gateway: Gateway) -> ApiState {
    ApiState { gateway }
}

/// Start the API server.
///
/// This function spawns the server and returns a handle to the task.
/// The server runs until the task is aborted or the process exits.
pub async fn start_server(
    config: ApiConfig,
    state: ApiState,
) -> std::io::Result<tokio::task::JoinHandle<()>> {
    let router = build_router(state);
    let addr = config.socket_addr()?;

    let listener = TcpListener::bind(addr).await?;
    tracing::info!("API server listening on http://{}", addr);

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            tracing::error!("API server error: {}", e);
        }
    });

    Ok(handle)
}
