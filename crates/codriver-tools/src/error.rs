//! Tool dispatch error types.

/// Unified error type for the tool dispatch layer.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    /// The requested tool is not in the routing table.
    #[error("unknown tool: {tool_name}")]
    UnknownTool { tool_name: String },

    /// The parameters supplied to a tool are invalid.
    #[error("invalid parameters for tool `{tool_name}`: {reason}")]
    InvalidParams { tool_name: String, reason: String },

    /// The backend returned a non-success status code.
    #[error("backend returned {status} for `{tool_name}`: {body}")]
    BackendStatus {
        tool_name: String,
        status: u16,
        body: String,
    },

    /// The HTTP request to the backend failed outright.
    #[error("backend request failed for `{tool_name}`: {reason}")]
    BackendRequest { tool_name: String, reason: String },

    /// JSON serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Catch-all for unexpected internal errors.
    #[error("internal tool error: {0}")]
    Internal(String),
}

/// Convenience alias used throughout the tools crate.
pub type Result<T> = std::result::Result<T, ToolError>;
