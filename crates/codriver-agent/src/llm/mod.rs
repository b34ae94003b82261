//! LLM provider integration: wire types, SSE parsing, and the streaming
//! client.

pub mod client;
pub mod streaming;
pub mod types;

pub use client::{CompletionOutcome, LlmApi, LlmClient, LlmConfig};
pub use streaming::SseParser;
pub use types::{
    AssistantTurn, ChatMessage, ContentBlock, Role, StreamDelta, StreamEvent, SystemPrompt,
    ToolDefinition, TurnRequest, Usage,
};
