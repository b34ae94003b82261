//! Server setup and startup.
//!
//! [`CodriverServer`] composes the Axum router, registers all routes, and
//! starts the HTTP listener.

use std::sync::Arc;

use axum::Router;
use axum::http::{HeaderValue, Method};
use axum::routing::{get, post};
use tower_http::cors::CorsLayer;

use codriver_agent::{LlmApi, LoopConfig, MemoryConfig, PermissionBroker, ToolBackend};

use crate::ServerConfig;
use crate::api;
use crate::state::AppState;

/// The Codriver session-controller server.
pub struct CodriverServer {
    config: ServerConfig,
    state: Arc<AppState>,
}

impl CodriverServer {
    /// Create a new server.
    pub fn new(
        config: ServerConfig,
        llm: Arc<dyn LlmApi>,
        tools: Arc<dyn ToolBackend>,
        broker: Arc<PermissionBroker>,
        loop_config: LoopConfig,
        memory_config: MemoryConfig,
    ) -> Self {
        let state = Arc::new(AppState::new(llm, tools, broker, loop_config, memory_config));
        Self { config, state }
    }

    /// Return the `host:port` string this server will bind to.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.config.bind_addr, self.config.port)
    }

    /// Build the Axum router with all routes registered.
    pub fn router(&self) -> Router {
        let cors = CorsLayer::new()
            .allow_origin("*".parse::<HeaderValue>().unwrap())
            .allow_methods([Method::GET, Method::POST])
            .allow_headers(tower_http::cors::Any);

        Router::new()
            .route("/", get(api::root))
            .route("/stream", post(api::stream))
            .route("/permission", post(api::permission))
            .route("/reset", post(api::reset))
            .route("/sanitize", post(api::sanitize))
            .route("/health", get(api::health).post(api::health))
            .layer(cors)
            .with_state(Arc::clone(&self.state))
    }

    /// Start the server and block until it is shut down.
    ///
    /// # Errors
    ///
    /// Returns an error if the TCP listener cannot be bound.
    pub async fn start(self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let addr = self.addr();
        let router = self.router();

        tracing::info!(addr = %addr, "starting codriver server");

        let listener = tokio::net::TcpListener::bind(&addr).await?;
        axum::serve(listener, router).await?;

        Ok(())
    }
}
