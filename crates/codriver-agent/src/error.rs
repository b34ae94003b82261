//! Agent error types.
//!
//! All agent subsystems surface errors through [`AgentError`].  Each variant
//! carries enough context for callers to decide how to handle the failure.

/// Unified error type for the agent runtime.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    // -- LLM errors ----------------------------------------------------------
    /// An HTTP request to the LLM provider failed.
    #[error("llm request failed: {reason}")]
    LlmRequestFailed { reason: String },

    /// The provider returned a non-success status code.
    #[error("llm provider returned {status}: {body}")]
    LlmStatus { status: u16, body: String },

    /// The streaming connection was interrupted or produced invalid data.
    #[error("llm stream error: {reason}")]
    LlmStreamError { reason: String },

    /// The provider response could not be parsed into the expected shape.
    #[error("llm response parse error: {reason}")]
    LlmParseFailed { reason: String },

    /// The API key is missing.
    #[error("missing api key for provider: {provider}")]
    MissingApiKey { provider: String },

    // -- Loop errors ---------------------------------------------------------
    /// The agent loop exceeded its maximum recursion depth.
    #[error("maximum tool call depth reached ({max_depth})")]
    DepthExceeded { max_depth: u32 },

    /// A tool invocation failed.
    #[error("tool execution failed for `{tool_name}`: {reason}")]
    ToolExecutionFailed { tool_name: String, reason: String },

    // -- Permission errors ---------------------------------------------------
    /// A permission id was not found or already resolved.
    #[error("permission request not found or expired: {permission_id}")]
    PermissionUnknown { permission_id: String },

    // -- Memory errors -------------------------------------------------------
    /// The summarization call produced no usable summary.
    #[error("summarization failed: {reason}")]
    SummarizationFailed { reason: String },

    // -- Serialization -------------------------------------------------------
    /// JSON serialization or deserialization failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    // -- Generic -------------------------------------------------------------
    /// Catch-all for unexpected internal errors.  Prefer a typed variant
    /// whenever possible.
    #[error("internal agent error: {0}")]
    Internal(String),
}

/// Convenience alias used throughout the agent crate.
pub type Result<T> = std::result::Result<T, AgentError>;

impl From<reqwest::Error> for AgentError {
    fn from(err: reqwest::Error) -> Self {
        Self::LlmRequestFailed {
            reason: err.to_string(),
        }
    }
}
