//! The agent loop.
//!
//! Drives one user request to completion: stream an LLM turn, re-emit its
//! events outbound, execute any requested tools (gated on permission for
//! terminal commands), feed results back into memory, and repeat until the
//! model stops calling tools or the depth bound is hit.
//!
//! Faults never propagate out of the loop once streaming has begun; they are
//! projected into `error`-tagged events.  Every run terminates the outbound
//! stream with exactly one `final_response` or `error` event.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;
use crate::events::{AgentEvent, EventKind, EventSender};
use crate::llm::client::LlmApi;
use crate::llm::types::{StreamDelta, StreamEvent, ToolDefinition, TurnRequest};
use crate::memory::ConversationMemory;
use crate::permission::{PermissionBroker, PermissionOutcome};

// ---------------------------------------------------------------------------
// Tool backend trait
// ---------------------------------------------------------------------------

/// Per-session context injected into tool dispatches.
#[derive(Debug, Clone, Default)]
pub struct SessionContext {
    /// Absolute path of the active workspace.
    pub workspace_path: String,

    /// Hashed workspace path, used by the indexing backend.
    pub hashed_workspace_path: String,

    /// Current git branch of the workspace.
    pub git_branch: String,
}

/// The seam between the agent loop and the external tool surface.
///
/// The HTTP dispatcher in `codriver-tools` is the production implementation;
/// tests substitute recording stubs.
#[async_trait]
pub trait ToolBackend: Send + Sync {
    /// Tool definitions exposed to the LLM.
    fn definitions(&self) -> Vec<ToolDefinition>;

    /// Screen an invocation before permission is requested or anything is
    /// dispatched.  A `Some` return is the rejection payload; the invocation
    /// never reaches the backend.
    fn pre_screen(&self, _tool_name: &str, _input: &Value) -> Option<String> {
        None
    }

    /// Execute a tool and return its normalized text payload.
    async fn dispatch(
        &self,
        tool_name: &str,
        input: Value,
        ctx: &SessionContext,
    ) -> Result<String>;
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Configuration for the agent loop.
#[derive(Debug, Clone)]
pub struct LoopConfig {
    /// Maximum loop depth (LLM turns per request).
    pub max_depth: u32,

    /// Soft quota on tool calls per session; crossing it asks the user to
    /// confirm continuation instead of looping further.
    pub tool_call_quota: u64,

    /// Model for agent turns; empty selects the client default.
    pub model: String,

    /// Model for memory summarization.
    pub summary_model: String,

    /// Max tokens per turn.
    pub max_tokens: u32,

    /// Thinking budget per turn.
    pub thinking_budget: u32,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_depth: 50,
            tool_call_quota: 25,
            model: String::new(),
            summary_model: "claude-3-5-haiku-latest".to_owned(),
            max_tokens: 3000,
            thinking_budget: 2500,
        }
    }
}

impl LoopConfig {
    /// Load overrides from `AGENT_MAX_DEPTH` and
    /// `MAX_TOOL_CALLS_PER_SESSION`.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(depth) = std::env::var("AGENT_MAX_DEPTH")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            config.max_depth = depth;
        }
        if let Some(quota) = std::env::var("MAX_TOOL_CALLS_PER_SESSION")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            config.tool_call_quota = quota;
        }
        if let Ok(model) = std::env::var("LLM_SUMMARY_MODEL") {
            config.summary_model = model;
        }
        config
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// One workspace's agent session: memory plus the collaborators the loop
/// needs.  A session has at most one loop invocation in flight at a time;
/// the HTTP surface enforces that.
pub struct AgentSession {
    /// Conversation memory, exclusively owned by this session.
    pub memory: ConversationMemory,

    /// Context injected into tool dispatches.
    pub context: SessionContext,

    llm: Arc<dyn LlmApi>,
    tools: Arc<dyn ToolBackend>,
    broker: Arc<PermissionBroker>,
    config: LoopConfig,
}

/// How a loop run terminated, used to uphold the terminal-event guarantee.
enum Terminal {
    /// A `final_response` was emitted.
    Final,
    /// An `error` was emitted.
    Error,
    /// Nothing terminal was emitted (consumer disconnected mid-run).
    None,
}

impl AgentSession {
    /// Create a session.
    pub fn new(
        llm: Arc<dyn LlmApi>,
        tools: Arc<dyn ToolBackend>,
        broker: Arc<PermissionBroker>,
        memory: ConversationMemory,
        context: SessionContext,
        config: LoopConfig,
    ) -> Self {
        Self {
            memory,
            context,
            llm,
            tools,
            broker,
            config,
        }
    }

    /// The loop configuration.
    pub fn config(&self) -> &LoopConfig {
        &self.config
    }

    /// Run the agent loop for the current memory state, emitting events
    /// until a terminal event has been sent.
    pub async fn run(&mut self, events: &EventSender) {
        let terminal = self.run_loop(events).await;

        // A child iteration that ended without a terminal event still owes
        // the consumer one.
        if matches!(terminal, Terminal::None) && !events.is_closed() {
            events.emit(AgentEvent::new(
                EventKind::FinalResponse,
                "All tasks completed successfully.",
            ));
        }
    }

    async fn run_loop(&mut self, events: &EventSender) -> Terminal {
        let tool_definitions = self.tools.definitions();

        for depth in 0..self.config.max_depth {
            tracing::debug!(depth, "agent loop iteration");

            if events.is_closed() {
                tracing::info!("event consumer disconnected, stopping loop");
                return Terminal::None;
            }

            // Soft quota: ask the user before burning more tool calls.
            if self.memory.total_tool_calls() >= self.config.tool_call_quota {
                let prompt = format!(
                    "I've made {} tool calls to process your request. Would you like me to continue?",
                    self.memory.total_tool_calls()
                );
                events.emit(
                    AgentEvent::new(EventKind::FinalResponse, prompt)
                        .with_meta("requires_user_response", true),
                );
                return Terminal::Final;
            }

            // Summarize before the call so the replay fits the budget.
            self.memory
                .summarize_if_needed(self.llm.as_ref(), &self.config.summary_model)
                .await;

            let (system, messages) = self.memory.replay();
            let mut request = TurnRequest::new(system, messages, tool_definitions.clone());
            request.model = self.config.model.clone();
            request.max_tokens = self.config.max_tokens;
            request.thinking_budget = self.config.thinking_budget;

            // Stream the turn, re-emitting provider events as they arrive.
            let outbound = events.clone();
            let mut on_event = move |event: StreamEvent| {
                forward_stream_event(&outbound, &event);
            };

            let turn = match self.llm.stream_turn(&request, &mut on_event).await {
                Ok(turn) => turn,
                Err(e) => {
                    tracing::error!(error = %e, depth, "llm turn failed");
                    events.emit(AgentEvent::new(EventKind::Error, e.to_string()));
                    return Terminal::Error;
                }
            };

            // Store the turn (duplicate tool ids are renamed on append) and
            // work from the stored copy so dispatches use the live ids.
            self.memory.add_assistant_message(turn.message);
            let stored = self
                .memory
                .messages()
                .last()
                .cloned()
                .expect("assistant message just appended");

            let tool_uses: Vec<(String, String, Value)> = stored
                .tool_uses()
                .into_iter()
                .map(|(id, name, input)| (id.to_owned(), name.to_owned(), input.clone()))
                .collect();

            if tool_uses.is_empty() {
                let text = stored.text();
                let content = if text.is_empty() {
                    "Task completed successfully.".to_owned()
                } else {
                    text
                };
                events.emit(AgentEvent::new(EventKind::FinalResponse, content));
                return Terminal::Final;
            }

            for (tool_use_id, tool_name, input) in tool_uses {
                self.execute_tool(events, &tool_use_id, &tool_name, input)
                    .await;
            }
        }

        tracing::warn!(max_depth = self.config.max_depth, "maximum loop depth reached");
        events.emit(AgentEvent::new(
            EventKind::Error,
            "Maximum tool call depth reached. Stopping to prevent infinite loops.",
        ));
        Terminal::Error
    }

    /// Run one tool call: screening, permission gating, dispatch, and the
    /// memory/event bookkeeping around it.  Failures become error-flagged
    /// tool results; the loop always continues.
    async fn execute_tool(
        &mut self,
        events: &EventSender,
        tool_use_id: &str,
        tool_name: &str,
        input: Value,
    ) {
        let friendly = friendly_tool_name(tool_name);

        events.emit(
            AgentEvent::new(EventKind::ToolExecution, format!("Running {friendly}..."))
                .with_meta("tool_name", tool_name)
                .with_meta("friendly_name", friendly)
                .with_meta("tool_use_id", tool_use_id)
                .with_meta("tool_arguments", input.clone())
                .with_meta("status", "executing"),
        );

        // Safety screening comes before everything else; a blocked command
        // never asks for permission and never reaches the backend.
        if let Some(rejection) = self.tools.pre_screen(tool_name, &input) {
            tracing::warn!(tool = tool_name, "invocation blocked by safety screen");
            events.emit(
                AgentEvent::new(EventKind::ToolResult, rejection.clone())
                    .with_meta("tool_name", tool_name)
                    .with_meta("tool_use_id", tool_use_id)
                    .with_meta("error", true)
                    .with_meta("blocked", true),
            );
            self.memory.record_tool_call(tool_name, &input, &rejection);
            self.memory.add_tool_result(tool_use_id, rejection);
            return;
        }

        // Terminal commands require explicit user consent.
        if tool_name == "run_terminal_command" {
            let command = input["command"].as_str().unwrap_or_default().to_owned();
            let is_background = input["is_background"].as_bool().unwrap_or(false);
            let permission_id = PermissionBroker::new_permission_id(tool_use_id);

            events.emit(
                AgentEvent::new(
                    EventKind::PermissionRequest,
                    format!("Permission required to run command: {command}"),
                )
                .with_meta("requires_permission", true)
                .with_meta("command", command.clone())
                .with_meta("permission_id", permission_id.clone())
                .with_meta("tool_name", tool_name)
                .with_meta("is_background", is_background),
            );

            match self.broker.await_decision(&permission_id).await {
                PermissionOutcome::Granted => {
                    tracing::info!(command = %command, "permission granted");
                }
                PermissionOutcome::Denied => {
                    let denial = "Permission denied by user";
                    events.emit(
                        AgentEvent::new(EventKind::ToolResult, denial)
                            .with_meta("tool_name", tool_name)
                            .with_meta("tool_use_id", tool_use_id)
                            .with_meta("error", true)
                            .with_meta("permission_denied", true),
                    );
                    self.memory.record_tool_call(tool_name, &input, denial);
                    self.memory.add_tool_result(tool_use_id, denial);
                    return;
                }
                PermissionOutcome::TimedOut => {
                    let timeout = "Permission request timed out";
                    events.emit(
                        AgentEvent::new(EventKind::ToolResult, timeout)
                            .with_meta("tool_name", tool_name)
                            .with_meta("tool_use_id", tool_use_id)
                            .with_meta("error", true)
                            .with_meta("timeout", true),
                    );
                    self.memory.record_tool_call(tool_name, &input, timeout);
                    self.memory.add_tool_result(tool_use_id, timeout);
                    return;
                }
            }
        }

        match self
            .tools
            .dispatch(tool_name, input.clone(), &self.context)
            .await
        {
            Ok(payload) => {
                events.emit(
                    AgentEvent::new(EventKind::ToolResult, payload.clone())
                        .with_meta("tool_name", tool_name)
                        .with_meta("friendly_name", friendly)
                        .with_meta("tool_use_id", tool_use_id)
                        .with_meta("result_length", payload.len() as u64),
                );
                self.memory.record_tool_call(tool_name, &input, &payload);
                self.memory.add_tool_result(tool_use_id, payload);
            }
            Err(e) => {
                let error_message = format!("Error calling tool {tool_name}: {e}");
                tracing::warn!(tool = tool_name, error = %e, "tool dispatch failed");
                events.emit(
                    AgentEvent::new(EventKind::ToolResult, error_message.clone())
                        .with_meta("tool_name", tool_name)
                        .with_meta("tool_use_id", tool_use_id)
                        .with_meta("error", true),
                );
                self.memory
                    .record_tool_call(tool_name, &input, &format!("ERROR: {e}"));
                self.memory.add_tool_result(tool_use_id, error_message);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Event mapping
// ---------------------------------------------------------------------------

/// Map one provider stream event onto the outbound vocabulary.
fn forward_stream_event(events: &EventSender, event: &StreamEvent) {
    match event {
        StreamEvent::ContentBlockStart {
            content_type, name, ..
        } if content_type == "tool_use" => {
            let tool_name = name.clone().unwrap_or_default();
            let friendly = friendly_tool_name(&tool_name);
            events.emit(
                AgentEvent::new(EventKind::ToolSelection, format!("Using: {friendly}"))
                    .with_meta("tool_name", tool_name)
                    .with_meta("friendly_name", friendly),
            );
        }

        StreamEvent::ContentBlockDelta { delta, .. } => match delta {
            StreamDelta::ThinkingDelta(t) if !t.trim().is_empty() => {
                events.emit(AgentEvent::new(EventKind::Thinking, t.clone()));
            }
            StreamDelta::TextDelta(t) if !t.is_empty() => {
                events.emit(AgentEvent::new(EventKind::AssistantResponse, t.clone()));
            }
            StreamDelta::InputJsonDelta(_) => {
                events.emit(
                    AgentEvent::new(EventKind::ToolExecution, ".")
                        .with_meta("status", "preparing"),
                );
            }
            _ => {}
        },

        // Signature deltas, block stops, and message bookkeeping have no
        // outbound projection.
        _ => {}
    }
}

/// User-facing names for tools, used in progress events.
fn friendly_tool_name(tool_name: &str) -> &'static str {
    match tool_name {
        "list_directory" => "listing files",
        "read_file" => "reading file",
        "edit_file" => "editing file",
        "reapply" => "re-applying edit",
        "search_and_replace" => "modifying file",
        "search_files" => "searching files",
        "grep_search" => "searching text",
        "codebase_search" => "searching codebase",
        "run_terminal_command" => "running command",
        "web_search" => "searching the web",
        "delete_file" => "deleting file",
        _ => "working",
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loop_config_defaults() {
        let config = LoopConfig::default();
        assert_eq!(config.max_depth, 50);
        assert_eq!(config.tool_call_quota, 25);
        assert_eq!(config.thinking_budget, 2500);
    }

    #[test]
    fn friendly_names_cover_tool_surface() {
        assert_eq!(friendly_tool_name("read_file"), "reading file");
        assert_eq!(friendly_tool_name("run_terminal_command"), "running command");
        assert_eq!(friendly_tool_name("not_a_tool"), "working");
    }
}
