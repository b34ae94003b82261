//! End-to-end tests for the HTTP surface.
//!
//! The router runs on an ephemeral port with a scripted LLM and a recording
//! tool backend, and a real HTTP client consumes the SSE stream.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use codriver_agent::{
    AssistantTurn, ChatMessage, CompletionOutcome, ContentBlock, LlmApi, LoopConfig, MemoryConfig,
    PermissionBroker, Result, SessionContext, StreamDelta, StreamEvent, ToolBackend,
    ToolDefinition, TurnRequest, Usage,
};
use codriver_server::{CodriverServer, ServerConfig};

// ---------------------------------------------------------------------------
// Stubs
// ---------------------------------------------------------------------------

/// Scripted provider: first turn calls read_file, second turn answers.
struct ScriptedLlm {
    turns: Mutex<Vec<Vec<ContentBlock>>>,
    /// Captured system prompt of the most recent turn.
    last_system: Mutex<Option<String>>,
}

impl ScriptedLlm {
    fn tool_then_text() -> Self {
        Self {
            turns: Mutex::new(vec![
                vec![ContentBlock::Text {
                    text: "Done.".into(),
                }],
                vec![ContentBlock::ToolUse {
                    id: "tu_http".into(),
                    name: "read_file".into(),
                    input: json!({"file_path": "src/main.rs", "explanation": "inspect"}),
                }],
            ]),
            last_system: Mutex::new(None),
        }
    }
}

#[async_trait]
impl LlmApi for ScriptedLlm {
    async fn stream_turn(
        &self,
        request: &TurnRequest,
        on_event: &mut (dyn FnMut(StreamEvent) + Send),
    ) -> Result<AssistantTurn> {
        *self.last_system.lock().unwrap() =
            request.system.as_ref().map(|s| s.text.clone());

        let blocks = self.turns.lock().unwrap().pop().unwrap_or_default();

        for (index, block) in blocks.iter().enumerate() {
            let index = index as u32;
            match block {
                ContentBlock::Text { text } => {
                    on_event(StreamEvent::ContentBlockStart {
                        index,
                        content_type: "text".into(),
                        id: None,
                        name: None,
                    });
                    on_event(StreamEvent::ContentBlockDelta {
                        index,
                        delta: StreamDelta::TextDelta(text.clone()),
                    });
                }
                ContentBlock::ToolUse { id, name, .. } => {
                    on_event(StreamEvent::ContentBlockStart {
                        index,
                        content_type: "tool_use".into(),
                        id: Some(id.clone()),
                        name: Some(name.clone()),
                    });
                }
                _ => {}
            }
            on_event(StreamEvent::ContentBlockStop { index });
        }
        on_event(StreamEvent::MessageStop);

        Ok(AssistantTurn {
            message_id: "msg_http".into(),
            message: ChatMessage::assistant(blocks),
            stop_reason: Some("end_turn".into()),
            usage: Usage::default(),
        })
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
            text: "summary".into(),
            request_id: "stub".into(),
            usage: Usage::default(),
        })
    }
}

#[derive(Default)]
struct RecordingBackend {
    calls: Mutex<Vec<(String, Value)>>,
}

#[async_trait]
impl ToolBackend for RecordingBackend {
    fn definitions(&self) -> Vec<ToolDefinition> {
        vec![ToolDefinition {
            name: "read_file".into(),
            description: "Read a file".into(),
            input_schema: json!({"type": "object"}),
        }]
    }

    async fn dispatch(
        &self,
        tool_name: &str,
        input: Value,
        _ctx: &SessionContext,
    ) -> Result<String> {
        self.calls
            .lock()
            .unwrap()
            .push((tool_name.to_owned(), input));
        Ok("fn main() {}".into())
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

async fn spawn_server(llm: Arc<ScriptedLlm>, backend: Arc<RecordingBackend>) -> SocketAddr {
    let broker = Arc::new(PermissionBroker::with_timeout(Duration::from_millis(200)));
    let server = CodriverServer::new(
        ServerConfig::default(),
        llm as Arc<dyn LlmApi>,
        backend as Arc<dyn ToolBackend>,
        broker,
        LoopConfig::default(),
        MemoryConfig::default(),
    );

    let router = server.router();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

fn stream_body() -> Value {
    json!({
        "query": "what does main do?",
        "workspace_path": "/w/project",
        "hashed_workspace_path": "deadbeef",
        "git_branch": "main",
        "system_info": {"platform": "linux", "osVersion": "6.8"},
    })
}

/// Parse `data: <json>` SSE frames out of a response body.
fn parse_frames(body: &str) -> Vec<Value> {
    body.lines()
        .filter_map(|line| line.strip_prefix("data: "))
        .filter_map(|data| serde_json::from_str(data).ok())
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn stream_runs_loop_and_frames_events() {
    let llm = Arc::new(ScriptedLlm::tool_then_text());
    let backend = Arc::new(RecordingBackend::default());
    let addr = spawn_server(Arc::clone(&llm), Arc::clone(&backend)).await;

    let client = reqwest::Client::new();
    let resp = client
        .post(format!("http://{addr}/stream"))
        .json(&stream_body())
        .send()
        .await
        .unwrap();

    assert!(resp.status().is_success());
    let content_type = resp
        .headers()
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap()
        .to_owned();
    assert!(content_type.starts_with("text/event-stream"));

    let body = resp.text().await.unwrap();
    let frames = parse_frames(&body);
    assert!(!frames.is_empty());

    let types: Vec<&str> = frames
        .iter()
        .filter_map(|f| f["type"].as_str())
        .collect();
    assert!(types.contains(&"tool_selection"));
    assert!(types.contains(&"tool_execution"));
    assert!(types.contains(&"tool_result"));
    assert_eq!(*types.last().unwrap(), "final_response");

    // Every frame carries a timestamp.
    for frame in &frames {
        assert!(frame["timestamp"].as_f64().is_some());
    }

    // The backend received the dispatch.
    assert_eq!(backend.calls.lock().unwrap().len(), 1);

    // The system prompt was rebuilt from the request context.
    let system = llm.last_system.lock().unwrap().clone().unwrap();
    assert!(system.contains("Workspace path: /w/project"));
    assert!(system.contains("Platform: linux 6.8"));
}

#[tokio::test]
async fn empty_query_is_rejected_before_streaming() {
    let addr = spawn_server(
        Arc::new(ScriptedLlm::tool_then_text()),
        Arc::new(RecordingBackend::default()),
    )
    .await;

    let client = reqwest::Client::new();
    let resp = client
        .post(format!("http://{addr}/stream"))
        .json(&json!({"query": "  ", "workspace_path": "/w"}))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status().as_u16(), 422);
}

#[tokio::test]
async fn unknown_permission_id_returns_404() {
    let addr = spawn_server(
        Arc::new(ScriptedLlm::tool_then_text()),
        Arc::new(RecordingBackend::default()),
    )
    .await;

    let client = reqwest::Client::new();
    let resp = client
        .post(format!("http://{addr}/permission"))
        .json(&json!({"permission_id": "perm_missing", "granted": true}))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status().as_u16(), 404);
}

#[tokio::test]
async fn health_reports_session_lifecycle() {
    let llm = Arc::new(ScriptedLlm::tool_then_text());
    let addr = spawn_server(llm, Arc::new(RecordingBackend::default())).await;
    let client = reqwest::Client::new();

    let before: Value = client
        .get(format!("http://{addr}/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(before["status"], "healthy");
    assert_eq!(before["session_initialized"], false);
    assert_eq!(before["ready_for_requests"], true);

    // Run one stream to initialize the session.
    let _ = client
        .post(format!("http://{addr}/stream"))
        .json(&stream_body())
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();

    let after: Value = client
        .get(format!("http://{addr}/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(after["session_initialized"], true);
}

#[tokio::test]
async fn sanitize_requires_session_then_reports() {
    let llm = Arc::new(ScriptedLlm::tool_then_text());
    let addr = spawn_server(llm, Arc::new(RecordingBackend::default())).await;
    let client = reqwest::Client::new();

    let uninitialized = client
        .post(format!("http://{addr}/sanitize"))
        .send()
        .await
        .unwrap();
    assert_eq!(uninitialized.status().as_u16(), 400);

    let _ = client
        .post(format!("http://{addr}/stream"))
        .json(&stream_body())
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();

    let sanitized: Value = client
        .post(format!("http://{addr}/sanitize"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(sanitized["status"], "success");
}

#[tokio::test]
async fn reset_rebuilds_session() {
    let llm = Arc::new(ScriptedLlm::tool_then_text());
    let addr = spawn_server(llm, Arc::new(RecordingBackend::default())).await;
    let client = reqwest::Client::new();

    let _ = client
        .post(format!("http://{addr}/stream"))
        .json(&stream_body())
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();

    let reset: Value = client
        .post(format!("http://{addr}/reset"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(reset["status"], "success");

    // Session still exists (workspace preserved), so sanitize succeeds.
    let sanitized = client
        .post(format!("http://{addr}/sanitize"))
        .send()
        .await
        .unwrap();
    assert_eq!(sanitized.status().as_u16(), 200);
}
