//! SSE stream parser for the provider's Messages API.
//!
//! The provider sends `event:` and `data:` lines in standard SSE format.
//! This module parses those lines into typed [`StreamEvent`] values that the
//! client reassembly layer consumes.

use serde_json::Value;

use crate::llm::types::{StreamDelta, StreamEvent, Usage};

/// Parses raw SSE lines from the provider stream.
///
/// Accumulates partial state across calls because SSE events span multiple
/// lines (`event:` followed by `data:`).
#[derive(Debug, Default)]
pub struct SseParser {
    /// The most recently seen `event:` type.
    current_event_type: Option<String>,
}

impl SseParser {
    /// Create a new parser.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a single line from the SSE stream.
    ///
    /// Returns `Some(event)` when a complete event has been parsed, `None`
    /// for comment lines, blank lines, the `event:` prefix line (which just
    /// sets internal state for the next `data:` line), and malformed data
    /// lines (logged and skipped so one bad line does not kill the stream).
    pub fn parse_line(&mut self, line: &str) -> Option<StreamEvent> {
        let line = line.trim_end();

        // SSE comment lines start with `:`.
        if line.starts_with(':') || line.is_empty() {
            return None;
        }

        // `event: <type>` — stash the type for the next `data:` line.
        if let Some(event_type) = line.strip_prefix("event: ") {
            self.current_event_type = Some(event_type.to_owned());
            return None;
        }

        // `data: <json>` — combine with the stashed event type.
        if let Some(data) = line.strip_prefix("data: ") {
            let event_type = self
                .current_event_type
                .take()
                .unwrap_or_else(|| "unknown".into());

            let v: Value = match serde_json::from_str(data) {
                Ok(v) => v,
                Err(e) => {
                    tracing::warn!(error = %e, "skipping malformed SSE data line");
                    return None;
                }
            };

            return self.parse_event(&event_type, &v);
        }

        tracing::trace!(line, "ignoring unrecognised SSE line");
        None
    }

    /// Parse a (event_type, data) pair into a [`StreamEvent`].
    fn parse_event(&self, event_type: &str, v: &Value) -> Option<StreamEvent> {
        match event_type {
            "message_start" => {
                let message = &v["message"];
                Some(StreamEvent::MessageStart {
                    message_id: json_string(message, "id"),
                    usage: parse_usage(&message["usage"]),
                })
            }

            "content_block_start" => {
                let index = v["index"].as_u64().unwrap_or(0) as u32;
                let block = &v["content_block"];
                Some(StreamEvent::ContentBlockStart {
                    index,
                    content_type: json_string(block, "type"),
                    id: block["id"].as_str().map(String::from),
                    name: block["name"].as_str().map(String::from),
                })
            }

            "content_block_delta" => {
                let index = v["index"].as_u64().unwrap_or(0) as u32;
                let delta_obj = &v["delta"];

                let delta = match delta_obj["type"].as_str().unwrap_or_default() {
                    "thinking_delta" => {
                        StreamDelta::ThinkingDelta(json_string(delta_obj, "thinking"))
                    }
                    "signature_delta" => {
                        StreamDelta::SignatureDelta(json_string(delta_obj, "signature"))
                    }
                    "text_delta" => StreamDelta::TextDelta(json_string(delta_obj, "text")),
                    "input_json_delta" => {
                        StreamDelta::InputJsonDelta(json_string(delta_obj, "partial_json"))
                    }
                    other => {
                        tracing::warn!(delta_type = other, "unknown delta type");
                        return None;
                    }
                };

                Some(StreamEvent::ContentBlockDelta { index, delta })
            }

            "content_block_stop" => {
                let index = v["index"].as_u64().unwrap_or(0) as u32;
                Some(StreamEvent::ContentBlockStop { index })
            }

            "message_delta" => Some(StreamEvent::MessageDelta {
                stop_reason: v["delta"]["stop_reason"].as_str().map(String::from),
                usage: parse_usage(&v["usage"]),
            }),

            "message_stop" => Some(StreamEvent::MessageStop),

            "ping" => Some(StreamEvent::Ping),

            _ => {
                tracing::trace!(event_type, "ignoring unknown SSE event type");
                None
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Extract a string field from a JSON value, returning an empty string if
/// missing.
fn json_string(v: &Value, field: &str) -> String {
    v[field].as_str().unwrap_or_default().to_owned()
}

/// Parse a usage object, tolerating missing fields.
fn parse_usage(v: &Value) -> Usage {
    Usage {
        input_tokens: v["input_tokens"].as_u64().unwrap_or(0),
        output_tokens: v["output_tokens"].as_u64().unwrap_or(0),
        cache_creation_input_tokens: v["cache_creation_input_tokens"].as_u64().unwrap_or(0),
        cache_read_input_tokens: v["cache_read_input_tokens"].as_u64().unwrap_or(0),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
