//! HTTP session controller for Codriver.
//!
//! Exposes the agent runtime over HTTP:
//!
//! - `POST /stream` -- run the agent loop for a query, emitting a
//!   `text/event-stream` of typed event frames.
//! - `POST /permission` -- resolve a pending permission request.
//! - `POST /reset` -- tear down and rebuild the session.
//! - `POST /sanitize` -- rewrite duplicate tool-use identifiers.
//! - `GET|POST /health` -- liveness and session status.

pub mod api;
pub mod context;
pub mod server;
pub mod state;

pub use context::{ActiveFileContext, PermissionResponse, QueryRequest, SystemInfo};
pub use server::CodriverServer;
pub use state::AppState;

/// Server bind configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// The address to bind the HTTP server to.
    pub bind_addr: String,
    /// The port to listen on.
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1".into(),
            port: 5001,
        }
    }
}

impl ServerConfig {
    /// Load overrides from `CODRIVER_BIND_ADDR` and `CODRIVER_PORT`.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(addr) = std::env::var("CODRIVER_BIND_ADDR") {
            config.bind_addr = addr;
        }
        if let Some(port) = std::env::var("CODRIVER_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            config.port = port;
        }
        config
    }
}
