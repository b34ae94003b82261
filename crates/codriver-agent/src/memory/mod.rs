//! Conversation memory.
//!
//! Token-counted ordered message log with a one-time cached system prompt,
//! duplicate tool-id resolution, and automatic summarization of older
//! messages once the token ceiling is crossed.
//!
//! Invariants maintained here:
//!
//! - every tool-use block kept in memory is paired with a following
//!   tool-result referencing the same id,
//! - no two live tool-use identifiers collide (the newer occurrence is
//!   renamed),
//! - the running token counter always equals the recomputed sum over system
//!   prompt, summary, and messages,
//! - thinking blocks are stored with their signatures intact.

pub mod summarizer;
pub mod tokens;

use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::llm::client::LlmApi;
use crate::llm::types::{ChatMessage, ContentBlock, Role, SystemPrompt};
use tokens::TokenCounter;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Configuration for conversation memory.
#[derive(Debug, Clone)]
pub struct MemoryConfig {
    /// Token ceiling that triggers summarization.
    pub token_ceiling: usize,

    /// Number of most-recent messages preserved verbatim across a
    /// summarization pass.
    pub keep_recent: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            token_ceiling: 100_000,
            keep_recent: 5,
        }
    }
}

impl MemoryConfig {
    /// Load overrides from `CONTEXT_TOKEN_CEILING`.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(ceiling) = std::env::var("CONTEXT_TOKEN_CEILING")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            config.token_ceiling = ceiling;
        }
        config
    }
}

// ---------------------------------------------------------------------------
// Tool-call records
// ---------------------------------------------------------------------------

/// Observability record for one tool invocation.  Never replayed to the LLM.
#[derive(Debug, Clone)]
pub struct ToolCallRecord {
    /// Tool name.
    pub tool: String,

    /// The input the tool was invoked with.
    pub arguments: Value,

    /// Result text truncated to 200 characters.
    pub result_summary: String,

    /// When the call completed.
    pub timestamp: DateTime<Utc>,

    /// False when the result text marks a failure.
    pub success: bool,
}

/// Length cap for [`ToolCallRecord::result_summary`].
const RESULT_SUMMARY_LEN: usize = 200;

// ---------------------------------------------------------------------------
// Memory
// ---------------------------------------------------------------------------

/// The conversation memory for one session.
pub struct ConversationMemory {
    config: MemoryConfig,
    counter: TokenCounter,

    /// Cached system prompt; written once per session initialization.
    system_prompt: Option<SystemPrompt>,

    /// Rolling summary of messages removed by summarization.
    summary: Option<String>,

    /// Live messages, append-only between summarization passes.
    messages: Vec<ChatMessage>,

    /// Running token counter over prompt + summary + messages.
    token_count: usize,

    /// Accumulated tool-call records.
    tool_calls: Vec<ToolCallRecord>,

    /// Total tool invocations this session.
    total_tool_calls: u64,
}

impl ConversationMemory {
    /// Create empty memory with the given configuration.
    pub fn new(config: MemoryConfig) -> Self {
        Self {
            config,
            counter: TokenCounter::new(),
            system_prompt: None,
            summary: None,
            messages: Vec::new(),
            token_count: 0,
            tool_calls: Vec::new(),
            total_tool_calls: 0,
        }
    }

    // -----------------------------------------------------------------------
    // System prompt
    // -----------------------------------------------------------------------

    /// Install the cached system prompt.
    ///
    /// Context updates arrive as a fresh prompt text; the prompt is replaced
    /// wholesale rather than mutated, and the token counter is recomputed.
    pub fn initialize_system_prompt(&mut self, text: impl Into<String>) {
        self.system_prompt = Some(SystemPrompt::new(text));
        self.recompute_token_count();
        tracing::info!(tokens = self.token_count, "system prompt initialized");
    }

    // -----------------------------------------------------------------------
    // Appends
    // -----------------------------------------------------------------------

    /// Append a user text message.
    pub fn add_user_message(&mut self, text: impl Into<String>) {
        self.push_message(ChatMessage::user_text(text));
    }

    /// Append an assistant message, renaming any tool-use ids that collide
    /// with ids already present in memory.
    ///
    /// Returns the renames performed as `(old_id, new_id)` pairs so the
    /// caller can dispatch tools under the live ids.
    pub fn add_assistant_message(&mut self, mut message: ChatMessage) -> Vec<(String, String)> {
        let existing = self.known_tool_use_ids();
        let mut renames = Vec::new();

        for block in &mut message.content {
            if let ContentBlock::ToolUse { id, .. } = block
                && existing.contains(id)
            {
                let fresh = fresh_tool_id();
                tracing::warn!(old = %id, new = %fresh, "duplicate tool_use id renamed");
                renames.push((std::mem::replace(id, fresh.clone()), fresh));
            }
        }

        self.push_message(message);
        renames
    }

    /// Append a tool-result user message.
    ///
    /// If an earlier tool-result already references `tool_use_id`, the new
    /// result is renamed to a fresh id before append.  Returns the id the
    /// result was stored under.
    pub fn add_tool_result(
        &mut self,
        tool_use_id: impl Into<String>,
        content: impl Into<String>,
    ) -> String {
        let mut id = tool_use_id.into();

        let duplicate = self.messages.iter().any(|m| {
            m.role == Role::User && m.content.iter().any(|b| b.result_ref() == Some(id.as_str()))
        });
        if duplicate {
            let fresh = fresh_tool_id();
            tracing::warn!(old = %id, new = %fresh, "duplicate tool_result id renamed");
            id = fresh;
        }

        self.push_message(ChatMessage::tool_result(id.clone(), content));
        id
    }

    /// Record one tool invocation for observability.
    pub fn record_tool_call(&mut self, tool: &str, arguments: &Value, result: &str) {
        let result_summary = if result.len() > RESULT_SUMMARY_LEN {
            let mut cut = RESULT_SUMMARY_LEN;
            while !result.is_char_boundary(cut) {
                cut -= 1;
            }
            format!("{}...", &result[..cut])
        } else {
            result.to_owned()
        };

        self.tool_calls.push(ToolCallRecord {
            tool: tool.to_owned(),
            arguments: arguments.clone(),
            result_summary,
            timestamp: Utc::now(),
            success: !result.starts_with("ERROR:"),
        });
        self.total_tool_calls += 1;
    }

    fn push_message(&mut self, message: ChatMessage) {
        self.token_count += self.counter.count_message(&message);
        self.messages.push(message);
    }

    // -----------------------------------------------------------------------
    // Summarization
    // -----------------------------------------------------------------------

    /// Whether the token counter has crossed the ceiling.
    pub fn needs_summarization(&self) -> bool {
        self.token_count > self.config.token_ceiling
    }

    /// Summarize older messages if the ceiling has been crossed.
    ///
    /// Failure is logged and swallowed; memory keeps growing until the next
    /// trigger.
    pub async fn summarize_if_needed(&mut self, llm: &dyn LlmApi, model: &str) {
        if !self.needs_summarization() {
            return;
        }

        tracing::info!(
            tokens = self.token_count,
            ceiling = self.config.token_ceiling,
            "token ceiling exceeded, summarizing"
        );

        if let Err(e) = self.summarize(llm, model).await {
            tracing::warn!(error = %e, "summarization failed, continuing with full memory");
        }
    }

    async fn summarize(&mut self, llm: &dyn LlmApi, model: &str) -> crate::error::Result<()> {
        let Some(cut) = self.safe_cut_point() else {
            tracing::debug!("too few messages to summarize");
            return Ok(());
        };

        let transcript = summarizer::render_transcript(&self.messages[..cut]);
        let new_summary = summarizer::generate_summary(llm, model, &transcript).await?;

        self.summary = Some(match self.summary.take() {
            Some(prior) => format!("{prior}\n\n--- NEW SUMMARY ---\n\n{new_summary}"),
            None => new_summary,
        });

        self.messages.drain(..cut);
        self.recompute_token_count();

        tracing::info!(
            tokens = self.token_count,
            kept = self.messages.len(),
            "summarization complete"
        );
        Ok(())
    }

    /// Find the summarization cut point: everything before the cut is
    /// summarized, the tail is kept.
    ///
    /// Starts at `len - keep_recent` and shifts earlier while the tail would
    /// contain a tool-result whose tool-use lies before the cut, so pairing
    /// survives the partition.  Returns `None` when nothing can be cut.
    fn safe_cut_point(&self) -> Option<usize> {
        if self.messages.len() <= self.config.keep_recent {
            return None;
        }

        let mut cut = self.messages.len() - self.config.keep_recent;
        while cut > 0 && !tail_is_self_contained(&self.messages[cut..]) {
            cut -= 1;
        }

        (cut > 0).then_some(cut)
    }

    fn recompute_token_count(&mut self) {
        let mut total = 0;
        if let Some(ref prompt) = self.system_prompt {
            total += self.counter.count(&prompt.text);
        }
        if let Some(ref summary) = self.summary {
            total += self.counter.count(summary);
        }
        for msg in &self.messages {
            total += self.counter.count_message(msg);
        }
        self.token_count = total;
    }

    // -----------------------------------------------------------------------
    // Replay
    // -----------------------------------------------------------------------

    /// Produce the replay shape for an LLM call: the cached system prompt and
    /// the message list, with the summary (if any) injected as a synthetic
    /// leading user message.
    pub fn replay(&self) -> (Option<SystemPrompt>, Vec<ChatMessage>) {
        let mut messages = Vec::with_capacity(self.messages.len() + 1);

        if let Some(ref summary) = self.summary {
            messages.push(ChatMessage::user_text(format!(
                "<CONVERSATION_SUMMARY>\n{summary}\n</CONVERSATION_SUMMARY>"
            )));
        }

        messages.extend(self.messages.iter().cloned());
        (self.system_prompt.clone(), messages)
    }

    // -----------------------------------------------------------------------
    // Sanitization
    // -----------------------------------------------------------------------

    /// Walk the log and rename any tool-use ids that collide with an earlier
    /// occurrence.  Returns the number of rewrites performed.
    pub fn sanitize(&mut self) -> usize {
        let mut seen = std::collections::HashSet::new();
        let mut rewrites = 0;

        for msg in &mut self.messages {
            if msg.role != Role::Assistant {
                continue;
            }
            for block in &mut msg.content {
                if let ContentBlock::ToolUse { id, .. } = block {
                    if seen.contains(id.as_str()) {
                        let fresh = fresh_tool_id();
                        tracing::info!(old = %id, new = %fresh, "sanitize: rewrote duplicate tool id");
                        *id = fresh;
                        rewrites += 1;
                    }
                    seen.insert(id.clone());
                }
            }
        }

        rewrites
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    /// Current running token count.
    pub fn token_count(&self) -> usize {
        self.token_count
    }

    /// Number of live messages.
    pub fn message_count(&self) -> usize {
        self.messages.len()
    }

    /// Whether a rolling summary exists.
    pub fn has_summary(&self) -> bool {
        self.summary.is_some()
    }

    /// Total tool invocations recorded this session.
    pub fn total_tool_calls(&self) -> u64 {
        self.total_tool_calls
    }

    /// Accumulated tool-call records.
    pub fn tool_call_records(&self) -> &[ToolCallRecord] {
        &self.tool_calls
    }

    /// Direct read access to the live messages (tests and diagnostics).
    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    fn known_tool_use_ids(&self) -> std::collections::HashSet<String> {
        self.messages
            .iter()
            .flat_map(|m| m.content.iter())
            .filter_map(|b| b.tool_use_id().map(str::to_owned))
            .collect()
    }
}

/// Every tool-result in `tail` references a tool-use that is also in `tail`.
fn tail_is_self_contained(tail: &[ChatMessage]) -> bool {
    let use_ids: std::collections::HashSet<&str> = tail
        .iter()
        .flat_map(|m| m.content.iter())
        .filter_map(ContentBlock::tool_use_id)
        .collect();

    tail.iter()
        .flat_map(|m| m.content.iter())
        .filter_map(ContentBlock::result_ref)
        .all(|id| use_ids.contains(id))
}

/// Generate a fresh unique tool id.
fn fresh_tool_id() -> String {
    format!("unique_{}", &Uuid::new_v4().simple().to_string()[..8])
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;

    use crate::error::Result;
    use crate::llm::client::{CompletionOutcome, LlmApi};
    use crate::llm::types::{AssistantTurn, StreamEvent, TurnRequest, Usage};

    /// Stub provider whose summarizer returns a fixed string.
    struct StubSummarizer;

    #[async_trait]
    impl LlmApi for StubSummarizer {
        async fn stream_turn(
            &self,
            _request: &TurnRequest,
            _on_event: &mut (dyn FnMut(StreamEvent) + Send),
        ) -> Result<AssistantTurn> {
            unreachable!("memory tests never stream")
        }

        async fn complete_text(
            &self,
            _model: &str,
            _system: &str,
            _prompt: &str,
            _max_tokens: u32,
            _request_type: &str,
        ) -> Result<CompletionOutcome> {
            Ok(CompletionOutcome {
                text: "the user asked about parsers; files were read".into(),
                request_id: "stub".into(),
                usage: Usage::default(),
            })
        }
    }

    fn small_memory(ceiling: usize) -> ConversationMemory {
        ConversationMemory::new(MemoryConfig {
            token_ceiling: ceiling,
            keep_recent: 5,
        })
    }

    fn assistant_with_tool(id: &str, name: &str) -> ChatMessage {
        ChatMessage::assistant(vec![ContentBlock::ToolUse {
            id: id.into(),
            name: name.into(),
            input: json!({}),
        }])
    }

    #[test]
    fn token_counter_matches_recomputed_sum() {
        let mut memory = small_memory(100_000);
        memory.initialize_system_prompt("You are Codriver.");
        memory.add_user_message("hello");
        memory.add_assistant_message(ChatMessage::assistant(vec![ContentBlock::Text {
            text: "hi there".into(),
        }]));

        let running = memory.token_count();
        memory.recompute_token_count();
        assert_eq!(memory.token_count(), running);
    }

    #[test]
    fn system_prompt_reinit_recounts_everything() {
        let mut memory = small_memory(100_000);
        memory.initialize_system_prompt("short");
        memory.add_user_message("a user message with some words in it");
        let before = memory.token_count();

        memory.initialize_system_prompt("a considerably longer system prompt with more tokens");
        assert!(memory.token_count() > before);
    }

    #[test]
    fn duplicate_assistant_tool_id_renamed() {
        let mut memory = small_memory(100_000);
        memory.add_assistant_message(assistant_with_tool("tu_1", "read_file"));
        memory.add_tool_result("tu_1", "contents");

        let renames = memory.add_assistant_message(assistant_with_tool("tu_1", "read_file"));
        assert_eq!(renames.len(), 1);
        assert_eq!(renames[0].0, "tu_1");
        assert!(renames[0].1.starts_with("unique_"));

        // The stored message carries the new id.
        let last = memory.messages().last().unwrap();
        assert_eq!(last.tool_uses()[0].0, renames[0].1);
    }

    #[test]
    fn duplicate_tool_result_id_renamed() {
        let mut memory = small_memory(100_000);
        let first = memory.add_tool_result("tu_9", "one");
        assert_eq!(first, "tu_9");

        let second = memory.add_tool_result("tu_9", "two");
        assert_ne!(second, "tu_9");
        assert!(second.starts_with("unique_"));
    }

    #[test]
    fn replay_wraps_summary_and_strips_timestamps() {
        let mut memory = small_memory(100_000);
        memory.initialize_system_prompt("prompt");
        memory.summary = Some("earlier context".into());
        memory.add_user_message("now");

        let (system, messages) = memory.replay();
        assert!(system.is_some());
        assert_eq!(messages.len(), 2);
        match &messages[0].content[0] {
            ContentBlock::Text { text } => {
                assert!(text.starts_with("<CONVERSATION_SUMMARY>"));
                assert!(text.contains("earlier context"));
                assert!(text.ends_with("</CONVERSATION_SUMMARY>"));
            }
            other => panic!("unexpected block: {other:?}"),
        }

        // serde skips timestamps on the wire.
        let wire = serde_json::to_value(&messages[1]).unwrap();
        assert!(wire.get("timestamp").is_none());
    }

    #[test]
    fn safe_cut_respects_tool_pairing() {
        let mut memory = small_memory(100_000);
        // 4 padding messages, then a tool pair straddling the naive cut.
        for i in 0..4 {
            memory.add_user_message(format!("padding {i}"));
        }
        memory.add_assistant_message(assistant_with_tool("tu_pair", "read_file"));
        memory.add_tool_result("tu_pair", "data");
        for i in 0..3 {
            memory.add_user_message(format!("tail {i}"));
        }

        // 9 messages, keep_recent = 5 -> naive cut at 4 would put the
        // tool-use in the head and its result in the tail.
        let cut = memory.safe_cut_point().unwrap();
        assert!(cut <= 4);
        assert!(tail_is_self_contained(&memory.messages()[cut..]));
    }

    #[test]
    fn reasoning_signature_survives_memory_round_trip() {
        let mut memory = small_memory(100_000);
        let original = ChatMessage::assistant(vec![ContentBlock::Thinking {
            thinking: "step by step".into(),
            signature: "3q2+7w==".into(),
        }]);
        memory.add_assistant_message(original.clone());

        let (_, messages) = memory.replay();
        assert_eq!(messages[0].content, original.content);
    }

    #[test]
    fn record_tool_call_truncates_and_flags_errors() {
        let mut memory = small_memory(100_000);
        let long_result = "x".repeat(500);
        memory.record_tool_call("read_file", &json!({"file_path": "/w"}), &long_result);
        memory.record_tool_call("run_terminal_command", &json!({}), "ERROR: boom");

        let records = memory.tool_call_records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].result_summary.len(), RESULT_SUMMARY_LEN + 3);
        assert!(records[0].success);
        assert!(!records[1].success);
        assert_eq!(memory.total_tool_calls(), 2);
    }

    #[test]
    fn sanitize_rewrites_later_duplicates_only() {
        let mut memory = small_memory(100_000);
        // Bypass append-time renaming to simulate a corrupted log.
        memory.messages.push(assistant_with_tool("tu_x", "a"));
        memory.messages.push(assistant_with_tool("tu_x", "b"));
        memory.messages.push(assistant_with_tool("tu_y", "c"));

        let rewrites = memory.sanitize();
        assert_eq!(rewrites, 1);
        assert_eq!(memory.messages()[0].tool_uses()[0].0, "tu_x");
        assert_ne!(memory.messages()[1].tool_uses()[0].0, "tu_x");
        assert_eq!(memory.messages()[2].tool_uses()[0].0, "tu_y");
    }

    #[tokio::test]
    async fn summarization_replaces_head_with_summary() {
        let mut memory = small_memory(1); // trigger immediately
        memory.initialize_system_prompt("prompt");
        for i in 0..12 {
            memory.add_user_message(format!("message number {i} with several words"));
        }
        assert!(memory.needs_summarization());

        memory.summarize_if_needed(&StubSummarizer, "summary-model").await;

        assert!(memory.has_summary());
        assert_eq!(memory.message_count(), 5);

        // Counter equals the recomputed sum after the pass.
        let running = memory.token_count();
        memory.recompute_token_count();
        assert_eq!(memory.token_count(), running);
    }

    #[tokio::test]
    async fn second_summarization_concatenates() {
        let mut memory = small_memory(1);
        memory.summary = Some("first pass".into());
        for i in 0..12 {
            memory.add_user_message(format!("more chatter {i}"));
        }

        memory.summarize_if_needed(&StubSummarizer, "summary-model").await;

        let (_, messages) = memory.replay();
        match &messages[0].content[0] {
            ContentBlock::Text { text } => {
                assert!(text.contains("first pass"));
                assert!(text.contains("--- NEW SUMMARY ---"));
            }
            other => panic!("unexpected block: {other:?}"),
        }
    }

    #[tokio::test]
    async fn below_ceiling_never_summarizes() {
        let mut memory = small_memory(1_000_000);
        memory.add_user_message("tiny");
        memory.summarize_if_needed(&StubSummarizer, "summary-model").await;
        assert!(!memory.has_summary());
        assert_eq!(memory.message_count(), 1);
    }
}
