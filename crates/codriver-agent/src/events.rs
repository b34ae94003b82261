//! Outbound streaming events.
//!
//! Every observable step of a session — reasoning deltas, text deltas, tool
//! activity, permission requests, terminal outcomes — is projected into an
//! [`AgentEvent`] and pushed onto an unbounded channel that the HTTP surface
//! drains into the SSE response.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

/// Tag of an outbound event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Reasoning text (streamed incrementally).
    Thinking,
    /// Output text (streamed incrementally).
    AssistantResponse,
    /// The model selected a tool (emitted at tool-use block start).
    ToolSelection,
    /// Tool execution progress.
    ToolExecution,
    /// A tool produced a result (or an error payload).
    ToolResult,
    /// The user must grant or deny a dangerous operation.
    PermissionRequest,
    /// Terminal event: the final answer for this request.
    FinalResponse,
    /// Terminal event: the request failed.
    Error,
}

/// One outbound event frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentEvent {
    /// Event tag.
    #[serde(rename = "type")]
    pub event: EventKind,

    /// Event payload text.
    pub content: String,

    /// Event-specific metadata.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, Value>,

    /// Unix timestamp in seconds.
    pub timestamp: f64,
}

impl AgentEvent {
    /// Build an event stamped with the current time.
    pub fn new(event: EventKind, content: impl Into<String>) -> Self {
        Self {
            event,
            content: content.into(),
            metadata: HashMap::new(),
            timestamp: chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0,
        }
    }

    /// Attach a metadata entry.
    pub fn with_meta(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_owned(), value.into());
        self
    }
}

/// Sender half of the outbound event channel.
///
/// Sends never block; a closed channel (client disconnect) is surfaced so
/// the loop can observe cancellation at its next emission.
#[derive(Clone)]
pub struct EventSender {
    tx: mpsc::UnboundedSender<AgentEvent>,
}

impl EventSender {
    /// Create a channel pair.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<AgentEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Emit one event.  Returns `false` if the consumer is gone.
    pub fn emit(&self, event: AgentEvent) -> bool {
        self.tx.send(event).is_ok()
    }

    /// Whether the consumer has disconnected.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_serializes_with_type_tag() {
        let event = AgentEvent::new(EventKind::ToolResult, "done")
            .with_meta("tool_name", "read_file")
            .with_meta("error", false);

        let v = serde_json::to_value(&event).unwrap();
        assert_eq!(v["type"], "tool_result");
        assert_eq!(v["content"], "done");
        assert_eq!(v["metadata"]["tool_name"], "read_file");
        assert!(v["timestamp"].as_f64().unwrap() > 0.0);
    }

    #[test]
    fn empty_metadata_omitted() {
        let event = AgentEvent::new(EventKind::Thinking, "…");
        let v = serde_json::to_value(&event).unwrap();
        assert!(v.get("metadata").is_none());
    }

    #[tokio::test]
    async fn channel_delivers_in_order() {
        let (tx, mut rx) = EventSender::channel();
        assert!(tx.emit(AgentEvent::new(EventKind::Thinking, "a")));
        assert!(tx.emit(AgentEvent::new(EventKind::FinalResponse, "b")));

        assert_eq!(rx.recv().await.unwrap().content, "a");
        assert_eq!(rx.recv().await.unwrap().content, "b");
    }

    #[tokio::test]
    async fn closed_channel_reports_disconnect() {
        let (tx, rx) = EventSender::channel();
        drop(rx);
        assert!(tx.is_closed());
        assert!(!tx.emit(AgentEvent::new(EventKind::Error, "gone")));
    }
}
