//! Tool dispatch for Codriver.
//!
//! This crate is the bridge between the agent loop and the external tool
//! backend: it owns the tool schemas exposed to the LLM, routes each typed
//! invocation to its HTTP endpoint, screens terminal commands against the
//! dangerous-command tables, and normalizes backend responses into bounded
//! text payloads.
//!
//! ## Modules
//!
//! - [`dispatch`] -- the [`HttpToolBackend`] dispatcher.
//! - [`schemas`] -- tool definitions (names, descriptions, JSON Schemas).
//! - [`safety`] -- the shell command safety filter.
//! - [`endpoints`] -- environment-driven endpoint configuration.
//! - [`error`] -- tool error types.

pub mod dispatch;
pub mod endpoints;
pub mod error;
pub mod safety;
pub mod schemas;

pub use dispatch::{
    BATCH_PAYLOAD_LIMIT, HttpToolBackend, STREAMING_PAYLOAD_LIMIT, render_payload,
    truncate_payload,
};
pub use endpoints::ToolEndpoints;
pub use error::{Result, ToolError};
pub use schemas::tool_definitions;
