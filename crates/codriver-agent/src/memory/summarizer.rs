//! Conversation summarization via a secondary LLM.
//!
//! When memory crosses its token ceiling, the older prefix of the
//! conversation is rendered into a compact transcript and a smaller model
//! produces a summary to replace it.

use crate::error::{AgentError, Result};
use crate::llm::client::LlmApi;
use crate::llm::types::{ChatMessage, ContentBlock, Role};

/// Fixed system prompt for the summarization model.
pub const SUMMARIZATION_PROMPT: &str = "\
You are a conversation summarizer for a coding assistant. Summarize the \
transcript you are given, preserving: the user's goals and requests, files \
and paths that were read or modified, commands that were run and their \
outcomes, decisions made, and any unresolved problems. Be factual and \
concise. Do not invent details.";

/// Maximum tokens for the summary response.
const SUMMARY_MAX_TOKENS: u32 = 3000;

/// Render a slice of messages into the transcript format consumed by the
/// summarizer: one `[HH:MM:SS] Role: text` line per message, with tool
/// activity collapsed into markers.
pub fn render_transcript(messages: &[ChatMessage]) -> String {
    let mut lines = Vec::with_capacity(messages.len());

    for msg in messages {
        let role = match msg.role {
            Role::User => "User",
            Role::Assistant => "Assistant",
        };
        let text = render_blocks(&msg.content);
        if text.is_empty() {
            continue;
        }
        lines.push(format!(
            "[{}] {}: {}",
            msg.timestamp.format("%H:%M:%S"),
            role,
            text
        ));
    }

    lines.join("\n")
}

/// Flatten content blocks into transcript text.  Thinking blocks are omitted;
/// tool activity is reduced to markers.
fn render_blocks(blocks: &[ContentBlock]) -> String {
    let mut parts = Vec::new();
    for block in blocks {
        match block {
            ContentBlock::Text { text } => parts.push(text.clone()),
            ContentBlock::ToolUse { name, .. } => parts.push(format!("[Used tool: {name}]")),
            ContentBlock::ToolResult { .. } => parts.push("[Tool result received]".to_owned()),
            ContentBlock::Thinking { .. } => {}
        }
    }
    parts.join(" ")
}

/// Ask the summarization model to compress the given transcript.
pub async fn generate_summary(
    llm: &dyn LlmApi,
    model: &str,
    transcript: &str,
) -> Result<String> {
    tracing::debug!(model = %model, transcript_len = transcript.len(), "requesting memory summary");

    let outcome = llm
        .complete_text(
            model,
            SUMMARIZATION_PROMPT,
            transcript,
            SUMMARY_MAX_TOKENS,
            "memory_summarization",
        )
        .await?;

    if outcome.text.trim().is_empty() {
        return Err(AgentError::SummarizationFailed {
            reason: "summarizer returned empty text".into(),
        });
    }

    tracing::debug!(summary_len = outcome.text.len(), "memory summary generated");
    Ok(outcome.text)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
