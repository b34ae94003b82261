//! Streaming LLM client for the Anthropic-style Messages API.
//!
//! [`LlmClient`] opens one pooled HTTP connection per process, streams SSE
//! events, re-emits each provider event to the caller as it arrives, and
//! reassembles the content blocks into a complete assistant message.  Usage
//! is logged through the configured [`UsageSink`] on every completed call.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue};
use serde_json::{Value, json};

use crate::error::{AgentError, Result};
use crate::llm::streaming::SseParser;
use crate::llm::types::{
    AssistantTurn, ChatMessage, ContentBlock, StreamDelta, StreamEvent, TurnRequest, Usage,
};
use crate::telemetry::{UsageRecord, UsageSink, record_usage};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Default provider base URL.
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";

/// Provider API version header value.
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Beta header enabling interleaved thinking blocks.
const ANTHROPIC_BETA: &str = "interleaved-thinking-2025-05-14";

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Configuration for connecting to the LLM provider.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// API key for authentication.
    pub api_key: String,
    /// Base URL for the API.
    pub base_url: String,
    /// Default model for agent turns.
    pub model: String,
    /// Smaller model used for memory summarization.
    pub summary_model: String,
    /// Connection timeout.
    pub connect_timeout: Duration,
    /// Overall request timeout (covers the full stream read).
    pub read_timeout: Duration,
}

impl LlmConfig {
    /// Create a configuration for the given key and model with defaults for
    /// everything else.
    pub fn anthropic(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_owned(),
            model: model.into(),
            summary_model: "claude-3-5-haiku-latest".to_owned(),
            connect_timeout: Duration::from_secs(60),
            read_timeout: Duration::from_secs(300),
        }
    }

    /// Load from `LLM_API_KEY`, `LLM_BASE_URL`, `LLM_MODEL`, and
    /// `LLM_SUMMARY_MODEL`.
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("LLM_API_KEY").map_err(|_| AgentError::MissingApiKey {
            provider: "anthropic".into(),
        })?;
        let model = std::env::var("LLM_MODEL")
            .unwrap_or_else(|_| "claude-sonnet-4-20250514".to_owned());
        let mut config = Self::anthropic(api_key, model);
        if let Ok(base_url) = std::env::var("LLM_BASE_URL") {
            config.base_url = base_url;
        }
        if let Ok(summary_model) = std::env::var("LLM_SUMMARY_MODEL") {
            config.summary_model = summary_model;
        }
        Ok(config)
    }
}

// ---------------------------------------------------------------------------
// Provider trait
// ---------------------------------------------------------------------------

/// Outcome of a non-streaming completion call.
#[derive(Debug, Clone)]
pub struct CompletionOutcome {
    /// Concatenated output text.
    pub text: String,
    /// Provider-assigned request id.
    pub request_id: String,
    /// Token usage for the call.
    pub usage: Usage,
}

/// The provider seam used by the agent loop and the summarizer.
///
/// [`LlmClient`] is the production implementation; tests substitute scripted
/// stubs.
#[async_trait]
pub trait LlmApi: Send + Sync {
    /// Stream one completion turn, invoking `on_event` for every provider
    /// event as it arrives, and return the reassembled assistant message.
    async fn stream_turn(
        &self,
        request: &TurnRequest,
        on_event: &mut (dyn FnMut(StreamEvent) + Send),
    ) -> Result<AssistantTurn>;

    /// Run a non-streaming text completion (used for summarization).
    async fn complete_text(
        &self,
        model: &str,
        system: &str,
        prompt: &str,
        max_tokens: u32,
        request_type: &str,
    ) -> Result<CompletionOutcome>;
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// HTTP client for the provider's Messages API.
pub struct LlmClient {
    config: LlmConfig,
    http: reqwest::Client,
    usage_sink: Arc<dyn UsageSink>,
}

impl LlmClient {
    /// Create a new client with the given configuration and usage sink.
    pub fn new(config: LlmConfig, usage_sink: Arc<dyn UsageSink>) -> Result<Self> {
        if config.api_key.is_empty() {
            return Err(AgentError::MissingApiKey {
                provider: "anthropic".into(),
            });
        }

        let http = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.read_timeout)
            .build()
            .map_err(|e| AgentError::LlmRequestFailed {
                reason: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            config,
            http,
            usage_sink,
        })
    }

    /// The configured default model.
    pub fn default_model(&self) -> &str {
        &self.config.model
    }

    /// The configured summarization model.
    pub fn summary_model(&self) -> &str {
        &self.config.summary_model
    }

    // -----------------------------------------------------------------------
    // Internal: request building
    // -----------------------------------------------------------------------

    /// Build the JSON body for a streaming turn.
    fn build_turn_body(&self, request: &TurnRequest) -> Value {
        let model = if request.model.is_empty() {
            &self.config.model
        } else {
            &request.model
        };

        let tools: Vec<Value> = request
            .tools
            .iter()
            .map(|t| {
                json!({
                    "name": t.name,
                    "description": t.description,
                    "input_schema": t.input_schema,
                })
            })
            .collect();

        let mut body = json!({
            "model": model,
            "max_tokens": request.max_tokens,
            "tools": tools,
            "messages": request.messages,
            "stream": true,
        });

        if let Some(ref system) = request.system {
            body["system"] = system.to_wire();
        }

        if request.thinking_budget > 0 {
            body["thinking"] = json!({
                "type": "enabled",
                "budget_tokens": request.thinking_budget,
            });
        }

        body
    }

    /// Common provider headers.
    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-api-key",
            HeaderValue::from_str(&self.config.api_key).map_err(|e| {
                AgentError::LlmRequestFailed {
                    reason: format!("invalid API key header: {e}"),
                }
            })?,
        );
        headers.insert(
            "anthropic-version",
            HeaderValue::from_static(ANTHROPIC_VERSION),
        );
        headers.insert("anthropic-beta", HeaderValue::from_static(ANTHROPIC_BETA));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(headers)
    }

    /// Send a POST to `/v1/messages`.
    async fn send_request(&self, body: &Value) -> Result<reqwest::Response> {
        let url = format!("{}/v1/messages", self.config.base_url);
        tracing::debug!(url = %url, model = %body["model"], "sending LLM request");

        self.http
            .post(&url)
            .headers(self.headers()?)
            .json(body)
            .send()
            .await
            .map_err(|e| AgentError::LlmRequestFailed {
                reason: e.to_string(),
            })
    }
}

#[async_trait]
impl LlmApi for LlmClient {
    async fn stream_turn(
        &self,
        request: &TurnRequest,
        on_event: &mut (dyn FnMut(StreamEvent) + Send),
    ) -> Result<AssistantTurn> {
        let body = self.build_turn_body(request);
        let model = body["model"].as_str().unwrap_or_default().to_owned();
        let start = Instant::now();

        let resp = self.send_request(&body).await?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(AgentError::LlmStatus {
                status: status.as_u16(),
                body: text,
            });
        }

        let mut parser = SseParser::new();
        let mut assembler = BlockAssembler::new();
        let mut byte_stream = resp.bytes_stream();

        // Buffer for partial lines that span chunk boundaries.
        let mut line_buffer = String::new();

        while let Some(chunk_result) = byte_stream.next().await {
            let chunk = chunk_result.map_err(|e| AgentError::LlmStreamError {
                reason: format!("stream read error: {e}"),
            })?;

            let text = std::str::from_utf8(&chunk).map_err(|e| AgentError::LlmStreamError {
                reason: format!("invalid UTF-8 in stream: {e}"),
            })?;

            line_buffer.push_str(text);

            // Process complete lines.  SSE lines are delimited by `\n`.
            while let Some(newline_pos) = line_buffer.find('\n') {
                let line = line_buffer[..newline_pos].to_owned();
                line_buffer.drain(..=newline_pos);

                let Some(event) = parser.parse_line(&line) else {
                    continue;
                };

                assembler.apply(&event);
                let done = matches!(event, StreamEvent::MessageStop);
                on_event(event);

                if done {
                    let turn = assembler.finish()?;

                    record_usage(
                        Arc::clone(&self.usage_sink),
                        UsageRecord::new(
                            "anthropic",
                            &model,
                            &turn.message_id,
                            "chat_streaming",
                            &turn.usage,
                            start.elapsed().as_secs_f64(),
                        ),
                    );

                    return Ok(turn);
                }
            }
        }

        // The connection dropped before message_stop; partial state is lost.
        Err(AgentError::LlmStreamError {
            reason: "stream ended before message_stop".into(),
        })
    }

    async fn complete_text(
        &self,
        model: &str,
        system: &str,
        prompt: &str,
        max_tokens: u32,
        request_type: &str,
    ) -> Result<CompletionOutcome> {
        let body = json!({
            "model": model,
            "max_tokens": max_tokens,
            "system": system,
            "messages": [{"role": "user", "content": prompt}],
        });

        let start = Instant::now();
        let resp = self.send_request(&body).await?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| AgentError::LlmRequestFailed {
                reason: format!("failed to read response body: {e}"),
            })?;

        if !status.is_success() {
            return Err(AgentError::LlmStatus {
                status: status.as_u16(),
                body: text,
            });
        }

        let v: Value = serde_json::from_str(&text).map_err(|e| AgentError::LlmParseFailed {
            reason: format!("invalid JSON response: {e}"),
        })?;

        let output: String = v["content"]
            .as_array()
            .map(|blocks| {
                blocks
                    .iter()
                    .filter_map(|b| match b["type"].as_str() {
                        Some("text") => b["text"].as_str(),
                        _ => None,
                    })
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        let usage = Usage {
            input_tokens: v["usage"]["input_tokens"].as_u64().unwrap_or(0),
            output_tokens: v["usage"]["output_tokens"].as_u64().unwrap_or(0),
            cache_creation_input_tokens: v["usage"]["cache_creation_input_tokens"]
                .as_u64()
                .unwrap_or(0),
            cache_read_input_tokens: v["usage"]["cache_read_input_tokens"].as_u64().unwrap_or(0),
        };
        let request_id = v["id"].as_str().unwrap_or("unknown").to_owned();

        record_usage(
            Arc::clone(&self.usage_sink),
            UsageRecord::new(
                "anthropic",
                model,
                &request_id,
                request_type,
                &usage,
                start.elapsed().as_secs_f64(),
            ),
        );

        Ok(CompletionOutcome {
            text: output,
            request_id,
            usage,
        })
    }
}

// ---------------------------------------------------------------------------
// Block reassembly
// ---------------------------------------------------------------------------

/// An in-progress content block being assembled from streaming deltas.
#[derive(Debug, Default)]
struct PartialBlock {
    content_type: String,
    id: Option<String>,
    name: Option<String>,
    thinking: String,
    signature: String,
    text: String,
    /// Scratch accumulator for tool-use input JSON; parsed and dropped at
    /// `content_block_stop`.
    input_json: String,
}

/// Reassembles provider stream events into a complete [`AssistantTurn`].
#[derive(Debug, Default)]
pub struct BlockAssembler {
    message_id: String,
    open: BTreeMap<u32, PartialBlock>,
    completed: Vec<ContentBlock>,
    stop_reason: Option<String>,
    usage: Usage,
}

impl BlockAssembler {
    /// Create a fresh assembler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one stream event.
    pub fn apply(&mut self, event: &StreamEvent) {
        match event {
            StreamEvent::MessageStart { message_id, usage } => {
                self.message_id = message_id.clone();
                self.usage.merge(usage);
            }

            StreamEvent::ContentBlockStart {
                index,
                content_type,
                id,
                name,
            } => {
                self.open.insert(
                    *index,
                    PartialBlock {
                        content_type: content_type.clone(),
                        id: id.clone(),
                        name: name.clone(),
                        ..PartialBlock::default()
                    },
                );
            }

            StreamEvent::ContentBlockDelta { index, delta } => {
                let Some(block) = self.open.get_mut(index) else {
                    tracing::warn!(index, "delta for unknown content block");
                    return;
                };
                match delta {
                    StreamDelta::ThinkingDelta(t) => block.thinking.push_str(t),
                    StreamDelta::SignatureDelta(s) => block.signature.push_str(s),
                    StreamDelta::TextDelta(t) => block.text.push_str(t),
                    StreamDelta::InputJsonDelta(j) => block.input_json.push_str(j),
                }
            }

            StreamEvent::ContentBlockStop { index } => {
                if let Some(block) = self.open.remove(index) {
                    if let Some(completed) = finalize_block(block) {
                        self.completed.push(completed);
                    }
                }
            }

            StreamEvent::MessageDelta { stop_reason, usage } => {
                if stop_reason.is_some() {
                    self.stop_reason = stop_reason.clone();
                }
                self.usage.merge(usage);
            }

            StreamEvent::MessageStop | StreamEvent::Ping => {}
        }
    }

    /// Consume the assembler and produce the completed turn.
    pub fn finish(mut self) -> crate::error::Result<AssistantTurn> {
        // Any block still open at message_stop is finalized as-is.
        let open = std::mem::take(&mut self.open);
        for (_, block) in open {
            if let Some(completed) = finalize_block(block) {
                self.completed.push(completed);
            }
        }

        Ok(AssistantTurn {
            message_id: if self.message_id.is_empty() {
                "unknown".to_owned()
            } else {
                self.message_id
            },
            message: ChatMessage::assistant(self.completed),
            stop_reason: self.stop_reason,
            usage: self.usage,
        })
    }
}

/// Convert a finished partial block into a content block.
///
/// Tool-use inputs parse the accumulated JSON; an empty or malformed
/// accumulator yields an empty object rather than failing the stream.
fn finalize_block(block: PartialBlock) -> Option<ContentBlock> {
    match block.content_type.as_str() {
        "thinking" => Some(ContentBlock::Thinking {
            thinking: block.thinking,
            signature: block.signature,
        }),
        "text" => Some(ContentBlock::Text { text: block.text }),
        "tool_use" => {
            let name = block.name.unwrap_or_default();
            let input = if block.input_json.trim().is_empty() {
                Value::Object(Default::default())
            } else {
                match serde_json::from_str(block.input_json.trim()) {
                    Ok(v) => v,
                    Err(e) => {
                        tracing::warn!(
                            tool = %name,
                            error = %e,
                            "failed to parse tool input JSON, using empty object"
                        );
                        Value::Object(Default::default())
                    }
                }
            };
            Some(ContentBlock::ToolUse {
                id: block.id.unwrap_or_default(),
                name,
                input,
            })
        }
        other => {
            tracing::warn!(content_type = other, "dropping unknown content block type");
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::types::SystemPrompt;
    use crate::telemetry::TracingUsageSink;

    fn test_client() -> LlmClient {
        LlmClient::new(
            LlmConfig::anthropic("test-key", "claude-sonnet-4-20250514"),
            Arc::new(TracingUsageSink),
        )
        .unwrap()
    }

    #[test]
    fn empty_api_key_returns_error() {
        let result = LlmClient::new(
            LlmConfig::anthropic("", "claude-sonnet-4-20250514"),
            Arc::new(TracingUsageSink),
        );
        assert!(result.is_err());
    }

    #[test]
    fn build_turn_body_shape() {
        let client = test_client();
        let request = TurnRequest::new(
            Some(SystemPrompt::new("You are Codriver.")),
            vec![ChatMessage::user_text("Hello")],
            vec![crate::llm::types::ToolDefinition {
                name: "read_file".into(),
                description: "Read a file".into(),
                input_schema: json!({"type": "object"}),
            }],
        );

        let body = client.build_turn_body(&request);
        assert_eq!(body["model"], "claude-sonnet-4-20250514");
        assert_eq!(body["stream"], true);
        assert_eq!(body["thinking"]["type"], "enabled");
        assert_eq!(body["thinking"]["budget_tokens"], 2500);
        assert_eq!(body["system"][0]["cache_control"]["type"], "ephemeral");
        assert_eq!(body["tools"][0]["name"], "read_file");
        assert_eq!(body["messages"][0]["role"], "user");
        assert!(body["messages"][0].get("timestamp").is_none());
    }

    #[test]
    fn build_turn_body_zero_thinking_budget_omits_thinking() {
        let client = test_client();
        let mut request = TurnRequest::new(None, vec![ChatMessage::user_text("hi")], vec![]);
        request.thinking_budget = 0;
        let body = client.build_turn_body(&request);
        assert!(body.get("thinking").is_none());
    }

    #[test]
    fn assembler_reassembles_mixed_blocks() {
        let mut assembler = BlockAssembler::new();

        assembler.apply(&StreamEvent::MessageStart {
            message_id: "msg_01".into(),
            usage: Usage {
                input_tokens: 12,
                ..Usage::default()
            },
        });

        // Thinking block with signature.
        assembler.apply(&StreamEvent::ContentBlockStart {
            index: 0,
            content_type: "thinking".into(),
            id: None,
            name: None,
        });
        assembler.apply(&StreamEvent::ContentBlockDelta {
            index: 0,
            delta: StreamDelta::ThinkingDelta("let me check".into()),
        });
        assembler.apply(&StreamEvent::ContentBlockDelta {
            index: 0,
            delta: StreamDelta::SignatureDelta("c2lnbmF0dXJl".into()),
        });
        assembler.apply(&StreamEvent::ContentBlockStop { index: 0 });

        // Tool-use block with streamed JSON input.
        assembler.apply(&StreamEvent::ContentBlockStart {
            index: 1,
            content_type: "tool_use".into(),
            id: Some("toolu_01".into()),
            name: Some("read_file".into()),
        });
        assembler.apply(&StreamEvent::ContentBlockDelta {
            index: 1,
            delta: StreamDelta::InputJsonDelta(r#"{"file_path":"#.into()),
        });
        assembler.apply(&StreamEvent::ContentBlockDelta {
            index: 1,
            delta: StreamDelta::InputJsonDelta(r#""/w/a.py"}"#.into()),
        });
        assembler.apply(&StreamEvent::ContentBlockStop { index: 1 });

        assembler.apply(&StreamEvent::MessageDelta {
            stop_reason: Some("tool_use".into()),
            usage: Usage {
                output_tokens: 30,
                ..Usage::default()
            },
        });
        assembler.apply(&StreamEvent::MessageStop);

        let turn = assembler.finish().unwrap();
        assert_eq!(turn.message_id, "msg_01");
        assert_eq!(turn.stop_reason.as_deref(), Some("tool_use"));
        assert_eq!(turn.usage.input_tokens, 12);
        assert_eq!(turn.usage.output_tokens, 30);
        assert_eq!(turn.message.content.len(), 2);

        match &turn.message.content[0] {
            ContentBlock::Thinking {
                thinking,
                signature,
            } => {
                assert_eq!(thinking, "let me check");
                assert_eq!(signature, "c2lnbmF0dXJl");
            }
            other => panic!("unexpected block: {other:?}"),
        }

        match &turn.message.content[1] {
            ContentBlock::ToolUse { id, name, input } => {
                assert_eq!(id, "toolu_01");
                assert_eq!(name, "read_file");
                assert_eq!(input["file_path"], "/w/a.py");
            }
            other => panic!("unexpected block: {other:?}"),
        }
    }

    #[test]
    fn assembler_malformed_tool_input_becomes_empty_object() {
        let mut assembler = BlockAssembler::new();
        assembler.apply(&StreamEvent::ContentBlockStart {
            index: 0,
            content_type: "tool_use".into(),
            id: Some("toolu_01".into()),
            name: Some("grep_search".into()),
        });
        assembler.apply(&StreamEvent::ContentBlockDelta {
            index: 0,
            delta: StreamDelta::InputJsonDelta(r#"{"query": unterminated"#.into()),
        });
        assembler.apply(&StreamEvent::ContentBlockStop { index: 0 });

        let turn = assembler.finish().unwrap();
        match &turn.message.content[0] {
            ContentBlock::ToolUse { input, .. } => {
                assert_eq!(input, &Value::Object(Default::default()));
            }
            other => panic!("unexpected block: {other:?}"),
        }
    }

    #[test]
    fn assembler_empty_tool_input_becomes_empty_object() {
        let mut assembler = BlockAssembler::new();
        assembler.apply(&StreamEvent::ContentBlockStart {
            index: 0,
            content_type: "tool_use".into(),
            id: Some("toolu_02".into()),
            name: Some("list_directory".into()),
        });
        assembler.apply(&StreamEvent::ContentBlockStop { index: 0 });

        let turn = assembler.finish().unwrap();
        match &turn.message.content[0] {
            ContentBlock::ToolUse { input, .. } => {
                assert_eq!(input, &Value::Object(Default::default()));
            }
            other => panic!("unexpected block: {other:?}"),
        }
    }
}
