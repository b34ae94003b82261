//! Wire types for the LLM provider.
//!
//! These types mirror the Anthropic Messages API shapes: a conversation is a
//! list of user/assistant messages whose content is an ordered list of tagged
//! blocks, plus a separate cache-marked system prompt.  The [`super::client`]
//! module serializes them onto the wire; [`crate::memory`] stores them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

/// The role of a conversation message.
///
/// The system prompt is not a message role here; the provider expects it as a
/// separate top-level field and it is cached independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Input from the human user (including tool results fed back).
    User,
    /// Output from the LLM.
    Assistant,
}

/// One unit of content inside a message.
///
/// Assistant messages contain `Thinking`, `Text`, and `ToolUse` blocks; user
/// messages contain `Text` and `ToolResult` blocks.  The serde tag matches
/// the provider wire format exactly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    /// Internal reasoning text plus the signature that authenticates it.
    ///
    /// Both fields must be replayed to the provider byte-for-byte; the pair
    /// is atomic and never stored or sent with only one half.
    Thinking { thinking: String, signature: String },

    /// User-visible output text.
    Text { text: String },

    /// A tool invocation requested by the model.
    ToolUse { id: String, name: String, input: Value },

    /// The result of a tool invocation, referencing the originating
    /// [`ContentBlock::ToolUse`] by id.  Appears only in user messages.
    ToolResult { tool_use_id: String, content: String },
}

impl ContentBlock {
    /// The tool-use id if this block is a `ToolUse`.
    pub fn tool_use_id(&self) -> Option<&str> {
        match self {
            Self::ToolUse { id, .. } => Some(id),
            _ => None,
        }
    }

    /// The referenced tool-use id if this block is a `ToolResult`.
    pub fn result_ref(&self) -> Option<&str> {
        match self {
            Self::ToolResult { tool_use_id, .. } => Some(tool_use_id),
            _ => None,
        }
    }
}

/// A single message in the conversation log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Who produced this message.
    pub role: Role,

    /// Ordered content blocks.
    pub content: Vec<ContentBlock>,

    /// Wall-clock append time, used for summarization ordering.  Stripped
    /// from the wire representation.
    #[serde(skip, default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    /// Create a user message with a single text block.
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: vec![ContentBlock::Text { text: text.into() }],
            timestamp: Utc::now(),
        }
    }

    /// Create a user message carrying one tool result.
    pub fn tool_result(tool_use_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: vec![ContentBlock::ToolResult {
                tool_use_id: tool_use_id.into(),
                content: content.into(),
            }],
            timestamp: Utc::now(),
        }
    }

    /// Create an assistant message from reassembled content blocks.
    pub fn assistant(content: Vec<ContentBlock>) -> Self {
        Self {
            role: Role::Assistant,
            content,
            timestamp: Utc::now(),
        }
    }

    /// Concatenated text of all `Text` blocks.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }

    /// All tool-use blocks in declared order.
    pub fn tool_uses(&self) -> Vec<(&str, &str, &Value)> {
        self.content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::ToolUse { id, name, input } => {
                    Some((id.as_str(), name.as_str(), input))
                }
                _ => None,
            })
            .collect()
    }

    /// Whether this message contains at least one tool-use block.
    pub fn has_tool_use(&self) -> bool {
        self.content
            .iter()
            .any(|b| matches!(b, ContentBlock::ToolUse { .. }))
    }
}

// ---------------------------------------------------------------------------
// System prompt
// ---------------------------------------------------------------------------

/// The cached system prompt.
///
/// Serialized as a single text block with an ephemeral cache-control marker
/// so the provider can reuse the cached prefix across turns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemPrompt {
    /// The full prompt text.  Immutable after session initialization.
    pub text: String,
}

impl SystemPrompt {
    /// Create a new system prompt.
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    /// Render as the provider's `system` field: a block array with the
    /// ephemeral cache marker.
    pub fn to_wire(&self) -> Value {
        json!([{
            "type": "text",
            "text": self.text,
            "cache_control": {"type": "ephemeral"},
        }])
    }
}

// ---------------------------------------------------------------------------
// Tool definitions
// ---------------------------------------------------------------------------

/// A tool definition exposed to the LLM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Unique tool name.
    pub name: String,

    /// Human-readable description of what the tool does.
    pub description: String,

    /// JSON Schema describing the tool's input parameters.
    pub input_schema: Value,
}

// ---------------------------------------------------------------------------
// Turn request
// ---------------------------------------------------------------------------

/// One full completion request: system prompt, replayed conversation, and the
/// tool surface.
#[derive(Debug, Clone)]
pub struct TurnRequest {
    /// Model identifier; empty means the client default.
    pub model: String,

    /// Cache-marked system prompt, if any.
    pub system: Option<SystemPrompt>,

    /// The conversation to replay, in order.
    pub messages: Vec<ChatMessage>,

    /// Tool definitions the model may invoke.
    pub tools: Vec<ToolDefinition>,

    /// Maximum tokens the model may generate this turn.
    pub max_tokens: u32,

    /// Thinking budget in tokens; 0 disables extended thinking.
    pub thinking_budget: u32,
}

impl TurnRequest {
    /// A plain request with the client's default model and budgets.
    pub fn new(
        system: Option<SystemPrompt>,
        messages: Vec<ChatMessage>,
        tools: Vec<ToolDefinition>,
    ) -> Self {
        Self {
            model: String::new(),
            system,
            messages,
            tools,
            max_tokens: 3000,
            thinking_budget: 2500,
        }
    }
}

// ---------------------------------------------------------------------------
// Streaming events
// ---------------------------------------------------------------------------

/// Events decoded from the provider's SSE stream.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// Stream opened; carries the message id and initial usage counters.
    MessageStart {
        message_id: String,
        usage: Usage,
    },

    /// A new content block started at `index`.
    ContentBlockStart {
        index: u32,
        /// `"thinking"`, `"text"`, or `"tool_use"`.
        content_type: String,
        /// For tool_use blocks: the tool call id.
        id: Option<String>,
        /// For tool_use blocks: the tool name.
        name: Option<String>,
    },

    /// An incremental delta for the block at `index`.
    ContentBlockDelta { index: u32, delta: StreamDelta },

    /// The block at `index` finished streaming.
    ContentBlockStop { index: u32 },

    /// Updated stop reason / usage for the overall message.
    MessageDelta {
        stop_reason: Option<String>,
        usage: Usage,
    },

    /// The stream terminated normally.
    MessageStop,

    /// Keepalive; no payload.
    Ping,
}

/// Delta kinds inside a streaming content block.
#[derive(Debug, Clone)]
pub enum StreamDelta {
    /// A chunk of reasoning text.
    ThinkingDelta(String),

    /// A chunk of the reasoning signature.
    SignatureDelta(String),

    /// A chunk of output text.
    TextDelta(String),

    /// A chunk of JSON for a tool-use input.
    InputJsonDelta(String),
}

// ---------------------------------------------------------------------------
// Usage
// ---------------------------------------------------------------------------

/// Token usage reported by the provider.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub cache_creation_input_tokens: u64,
    #[serde(default)]
    pub cache_read_input_tokens: u64,
}

impl Usage {
    /// Sum of all token counters.
    pub fn total(&self) -> u64 {
        self.input_tokens
            + self.output_tokens
            + self.cache_creation_input_tokens
            + self.cache_read_input_tokens
    }

    /// Merge counters from a later usage report, keeping nonzero values.
    pub fn merge(&mut self, other: &Usage) {
        if other.input_tokens > 0 {
            self.input_tokens = other.input_tokens;
        }
        if other.output_tokens > 0 {
            self.output_tokens = other.output_tokens;
        }
        if other.cache_creation_input_tokens > 0 {
            self.cache_creation_input_tokens = other.cache_creation_input_tokens;
        }
        if other.cache_read_input_tokens > 0 {
            self.cache_read_input_tokens = other.cache_read_input_tokens;
        }
    }
}

/// A completed assistant turn: the reassembled message plus final usage.
#[derive(Debug, Clone)]
pub struct AssistantTurn {
    /// Provider-assigned message id.
    pub message_id: String,

    /// The fully reassembled assistant message.
    pub message: ChatMessage,

    /// Stop reason reported by the provider, if any.
    pub stop_reason: Option<String>,

    /// Final usage counters.
    pub usage: Usage,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_block_wire_tags() {
        let block = ContentBlock::ToolUse {
            id: "toolu_01".into(),
            name: "read_file".into(),
            input: json!({"file_path": "/w/a.py"}),
        };
        let v = serde_json::to_value(&block).unwrap();
        assert_eq!(v["type"], "tool_use");
        assert_eq!(v["id"], "toolu_01");
        assert_eq!(v["input"]["file_path"], "/w/a.py");

        let result = ContentBlock::ToolResult {
            tool_use_id: "toolu_01".into(),
            content: "ok".into(),
        };
        let v = serde_json::to_value(&result).unwrap();
        assert_eq!(v["type"], "tool_result");
        assert_eq!(v["tool_use_id"], "toolu_01");
    }

    #[test]
    fn thinking_block_round_trips_signature() {
        let block = ContentBlock::Thinking {
            thinking: "considering the diff".into(),
            signature: "sig_abc123".into(),
        };
        let v = serde_json::to_value(&block).unwrap();
        let back: ContentBlock = serde_json::from_value(v).unwrap();
        assert_eq!(back, block);
    }

    #[test]
    fn message_timestamp_not_serialized() {
        let msg = ChatMessage::user_text("hello");
        let v = serde_json::to_value(&msg).unwrap();
        assert!(v.get("timestamp").is_none());
        assert_eq!(v["role"], "user");
        assert_eq!(v["content"][0]["text"], "hello");
    }

    #[test]
    fn system_prompt_carries_cache_marker() {
        let prompt = SystemPrompt::new("You are Codriver.");
        let wire = prompt.to_wire();
        assert_eq!(wire[0]["type"], "text");
        assert_eq!(wire[0]["cache_control"]["type"], "ephemeral");
    }

    #[test]
    fn tool_uses_in_declared_order() {
        let msg = ChatMessage::assistant(vec![
            ContentBlock::Text { text: "on it".into() },
            ContentBlock::ToolUse {
                id: "tu_1".into(),
                name: "read_file".into(),
                input: json!({}),
            },
            ContentBlock::ToolUse {
                id: "tu_2".into(),
                name: "grep_search".into(),
                input: json!({}),
            },
        ]);
        let uses = msg.tool_uses();
        assert_eq!(uses.len(), 2);
        assert_eq!(uses[0].0, "tu_1");
        assert_eq!(uses[1].1, "grep_search");
        assert!(msg.has_tool_use());
    }

    #[test]
    fn usage_merge_keeps_nonzero() {
        let mut usage = Usage {
            input_tokens: 100,
            ..Usage::default()
        };
        usage.merge(&Usage {
            output_tokens: 42,
            ..Usage::default()
        });
        assert_eq!(usage.input_tokens, 100);
        assert_eq!(usage.output_tokens, 42);
        assert_eq!(usage.total(), 142);
    }
}
