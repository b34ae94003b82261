//! Shared application state.
//!
//! [`AppState`] is wrapped in an `Arc` and shared across all request
//! handlers.  The agent session lives behind an async mutex: the `/stream`
//! handler takes an owned lock for the full run, which both serializes a
//! session's loop invocations and lets concurrent stream requests be
//! rejected instead of interleaved.

use std::sync::Arc;

use tokio::sync::Mutex;

use codriver_agent::{
    AgentSession, ConversationMemory, LlmApi, LoopConfig, MemoryConfig, PermissionBroker,
    SessionContext, ToolBackend,
};

/// Shared state accessible from every handler.
pub struct AppState {
    /// The LLM provider client.
    pub llm: Arc<dyn LlmApi>,

    /// The tool dispatch backend.
    pub tools: Arc<dyn ToolBackend>,

    /// Process-wide permission rendezvous.
    pub broker: Arc<PermissionBroker>,

    /// The per-workspace agent session; `None` until the first stream
    /// request arrives.
    pub session: Arc<Mutex<Option<AgentSession>>>,

    /// Loop configuration applied to new sessions.
    pub loop_config: LoopConfig,

    /// Memory configuration applied to new sessions.
    pub memory_config: MemoryConfig,
}

impl AppState {
    /// Create state with no session yet.
    pub fn new(
        llm: Arc<dyn LlmApi>,
        tools: Arc<dyn ToolBackend>,
        broker: Arc<PermissionBroker>,
        loop_config: LoopConfig,
        memory_config: MemoryConfig,
    ) -> Self {
        Self {
            llm,
            tools,
            broker,
            session: Arc::new(Mutex::new(None)),
            loop_config,
            memory_config,
        }
    }

    /// Build a fresh agent session for the given context.
    pub fn build_session(&self, context: SessionContext) -> AgentSession {
        AgentSession::new(
            Arc::clone(&self.llm),
            Arc::clone(&self.tools),
            Arc::clone(&self.broker),
            ConversationMemory::new(self.memory_config.clone()),
            context,
            self.loop_config.clone(),
        )
    }
}
