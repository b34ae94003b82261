//! Agent runtime for Codriver.
//!
//! This crate implements the core of the coding-assistant runtime: the loop
//! that drives an LLM against a workspace with tools, the streaming client
//! that talks to the provider, the bounded self-summarizing conversation
//! memory, and the permission broker that gates dangerous operations.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐  events   ┌────────────┐  HTTP/SSE  ┌──────────┐
//! │ Agent loop │──────────>│ Session    │───────────>│  Caller  │
//! │ (runtime)  │           │ controller │            └──────────┘
//! └─────┬──────┘           └────────────┘
//!       │ turns                 │ consent
//! ┌─────┴──────┐          ┌─────┴──────┐
//! │ LLM client │          │ Permission │
//! │ (SSE)      │          │ broker     │
//! └─────┬──────┘          └────────────┘
//!       │ replay shape
//! ┌─────┴──────┐
//! │  Memory    │── summarizer (secondary model)
//! └────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`llm`] -- provider wire types, SSE parsing, streaming client.
//! - [`memory`] -- token-counted conversation log with summarization.
//! - [`runtime`] -- the agent loop and the tool-backend trait.
//! - [`permission`] -- consent rendezvous for terminal commands.
//! - [`events`] -- the outbound event vocabulary and channel.
//! - [`telemetry`] -- LLM usage records and sinks.
//! - [`error`] -- agent error types.

pub mod error;
pub mod events;
pub mod llm;
pub mod memory;
pub mod permission;
pub mod runtime;
pub mod telemetry;

// Re-export the most commonly used types at the crate root.
pub use error::{AgentError, Result};
pub use events::{AgentEvent, EventKind, EventSender};
pub use llm::{
    AssistantTurn, ChatMessage, CompletionOutcome, ContentBlock, LlmApi, LlmClient, LlmConfig,
    Role, StreamDelta, StreamEvent, SystemPrompt, ToolDefinition, TurnRequest, Usage,
};
pub use memory::{ConversationMemory, MemoryConfig, ToolCallRecord};
pub use permission::{PermissionBroker, PermissionOutcome};
pub use runtime::{AgentSession, LoopConfig, SessionContext, ToolBackend};
pub use telemetry::{TracingUsageSink, UsageRecord, UsageSink};
