//! HTTP tool dispatcher.
//!
//! Routes typed tool invocations to their backend endpoints, injects the
//! session workspace path where the caller omitted it, screens terminal
//! commands, and normalizes backend JSON into bounded text payloads.

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use std::time::Duration;

use codriver_agent::{
    AgentError, SessionContext, ToolBackend, ToolDefinition, Result as AgentResult,
};

use crate::endpoints::ToolEndpoints;
use crate::error::{Result, ToolError};
use crate::safety;
use crate::schemas;

/// Truncation limit for payloads flowing back into the streaming loop.
pub const STREAMING_PAYLOAD_LIMIT: usize = 8_000;

/// Truncation limit for non-streaming (batch) callers.
pub const BATCH_PAYLOAD_LIMIT: usize = 32_000;

/// Tools that receive the session workspace path when the model omitted it.
const WORKSPACE_PATH_TOOLS: &[&str] = &[
    "run_terminal_command",
    "search_and_replace",
    "search_files",
    "list_directory",
    "read_file",
    "delete_file",
];

/// HTTP dispatcher for the external tool surface.
pub struct HttpToolBackend {
    endpoints: ToolEndpoints,
    http: reqwest::Client,
}

impl HttpToolBackend {
    /// Create a dispatcher with one shared pooled client.
    pub fn new(endpoints: ToolEndpoints) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(60))
            .timeout(Duration::from_secs(300))
            .build()
            .map_err(|e| ToolError::Internal(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { endpoints, http })
    }

    /// POST a payload to a backend endpoint and return the parsed JSON.
    async fn post(&self, tool_name: &str, url: &str, payload: &Value) -> Result<Value> {
        tracing::debug!(tool = tool_name, url, "dispatching tool call");

        let resp = self
            .http
            .post(url)
            .json(payload)
            .send()
            .await
            .map_err(|e| ToolError::BackendRequest {
                tool_name: tool_name.to_owned(),
                reason: e.to_string(),
            })?;

        let status = resp.status();
        let body = resp.text().await.map_err(|e| ToolError::BackendRequest {
            tool_name: tool_name.to_owned(),
            reason: format!("failed to read response body: {e}"),
        })?;

        if !status.is_success() {
            return Err(ToolError::BackendStatus {
                tool_name: tool_name.to_owned(),
                status: status.as_u16(),
                body,
            });
        }

        serde_json::from_str(&body).map_err(ToolError::Serialization)
    }

    /// Route one invocation to its endpoint and return the raw backend JSON.
    async fn route(&self, tool_name: &str, input: &Value, ctx: &SessionContext) -> Result<Value> {
        match tool_name {
            "read_file" | "list_directory" | "search_and_replace" | "grep_search"
            | "delete_file" => {
                let url = match tool_name {
                    "read_file" => &self.endpoints.read_file,
                    "list_directory" => &self.endpoints.list_directory,
                    "search_and_replace" => &self.endpoints.search_and_replace,
                    "grep_search" => &self.endpoints.grep_search,
                    _ => &self.endpoints.delete_file,
                };
                self.post(tool_name, url, input).await
            }

            "run_terminal_command" => {
                // The backend expects `cmd` rather than `command`.
                let mut payload = Map::new();
                payload.insert("cmd".into(), input["command"].clone());
                payload.insert(
                    "is_background".into(),
                    Value::Bool(input["is_background"].as_bool().unwrap_or(false)),
                );
                copy_fields(input, &mut payload, &["workspace_path", "explanation"]);
                self.post(
                    tool_name,
                    &self.endpoints.run_terminal_command,
                    &Value::Object(payload),
                )
                .await
            }

            "search_files" => {
                // The backend names the fuzzy query `pattern`.
                let mut payload = Map::new();
                payload.insert("pattern".into(), input["query"].clone());
                copy_fields(input, &mut payload, &["workspace_path", "explanation"]);
                self.post(tool_name, &self.endpoints.search_files, &Value::Object(payload))
                    .await
            }

            "codebase_search" => {
                // Two-hop: resolve chunk metadata first, then fetch content
                // with the metadata response forwarded verbatim.
                let payload = json!({
                    "query": input["query"],
                    "explanation": input["explanation"],
                    "hashed_workspace_path": ctx.hashed_workspace_path,
                    "git_branch": ctx.git_branch,
                });
                let metadata = self
                    .post(tool_name, &self.endpoints.codebase_search_metadata, &payload)
                    .await?;
                self.post(tool_name, &self.endpoints.codebase_search, &metadata)
                    .await
            }

            "edit_file" | "reapply" => {
                let url = if tool_name == "edit_file" {
                    &self.endpoints.edit_file
                } else {
                    &self.endpoints.reapply
                };
                let payload = json!({
                    "filePath": input["target_file_path"],
                    "codeSnippet": input["code_snippet"],
                });
                self.post(tool_name, url, &payload).await
            }

            "web_search" => {
                let mut payload = Map::new();
                payload.insert("search_term".into(), input["search_term"].clone());
                payload.insert(
                    "target_urls".into(),
                    input.get("target_urls").cloned().unwrap_or_else(|| json!([])),
                );
                copy_fields(input, &mut payload, &["explanation"]);
                self.post(tool_name, &self.endpoints.web_search, &Value::Object(payload))
                    .await
            }

            other => Err(ToolError::UnknownTool {
                tool_name: other.to_owned(),
            }),
        }
    }
}

#[async_trait]
impl ToolBackend for HttpToolBackend {
    fn definitions(&self) -> Vec<ToolDefinition> {
        schemas::tool_definitions()
    }

    fn pre_screen(&self, tool_name: &str, input: &Value) -> Option<String> {
        if tool_name != "run_terminal_command" {
            return None;
        }
        let command = input["command"].as_str().unwrap_or_default();
        safety::check_command(command).map(|reason| safety::rejection_payload(&reason))
    }

    async fn dispatch(
        &self,
        tool_name: &str,
        input: Value,
        ctx: &SessionContext,
    ) -> AgentResult<String> {
        let input = inject_context(tool_name, input, ctx);

        let response = self
            .route(tool_name, &input, ctx)
            .await
            .map_err(|e| AgentError::ToolExecutionFailed {
                tool_name: tool_name.to_owned(),
                reason: e.to_string(),
            })?;

        Ok(truncate_payload(
            &render_payload(&response),
            STREAMING_PAYLOAD_LIMIT,
        ))
    }
}

// ---------------------------------------------------------------------------
// Context injection
// ---------------------------------------------------------------------------

/// Inject the session workspace path for tools that expect it, and resolve
/// `list_directory`'s `"."` to the workspace root.
fn inject_context(tool_name: &str, mut input: Value, ctx: &SessionContext) -> Value {
    if ctx.workspace_path.is_empty() {
        return input;
    }

    let Some(map) = input.as_object_mut() else {
        return input;
    };

    if WORKSPACE_PATH_TOOLS.contains(&tool_name) && !map.contains_key("workspace_path") {
        map.insert(
            "workspace_path".into(),
            Value::String(ctx.workspace_path.clone()),
        );
        tracing::debug!(tool = tool_name, "injected workspace_path");
    }

    if tool_name == "list_directory" && map.get("dir_path").and_then(Value::as_str) == Some(".") {
        map.insert("dir_path".into(), Value::String(ctx.workspace_path.clone()));
    }

    input
}

/// Copy optional fields from the input into the outgoing payload when present.
fn copy_fields(input: &Value, payload: &mut Map<String, Value>, fields: &[&str]) {
    for field in fields {
        if let Some(value) = input.get(*field) {
            if !value.is_null() {
                payload.insert((*field).to_owned(), value.clone());
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Normalization
// ---------------------------------------------------------------------------

/// Render a backend JSON response into a text payload: strings pass through,
/// arrays join with newlines, objects pretty-print.
pub fn render_payload(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .map(render_payload)
            .collect::<Vec<_>>()
            .join("\n"),
        Value::Null => String::new(),
        other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
    }
}

/// Truncate a payload to `limit` characters, appending a marker that records
/// the original length.
pub fn truncate_payload(payload: &str, limit: usize) -> String {
    if payload.len() <= limit {
        return payload.to_owned();
    }

    let mut cut = limit;
    while !payload.is_char_boundary(cut) {
        cut -= 1;
    }

    format!(
        "{}\n[Content truncated from {} to {} characters]",
        &payload[..cut],
        payload.len(),
        limit
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
