//! HTTP route handlers.
//!
//! The `/stream` handler owns the session lock for the lifetime of the run:
//! one in-flight loop per session, with concurrent stream requests rejected
//! as 409.  All other endpoints are quick lock-and-release operations.

use std::convert::Infallible;
use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use futures::StreamExt;
use serde_json::json;
use tokio_stream::wrappers::UnboundedReceiverStream;

use codriver_agent::EventSender;

use crate::context::{PermissionResponse, QueryRequest, build_system_prompt};
use crate::state::AppState;

// ---------------------------------------------------------------------------
// POST /stream
// ---------------------------------------------------------------------------

/// Run the agent loop for one query, streaming events as SSE frames.
pub async fn stream(
    State(state): State<Arc<AppState>>,
    Json(request): Json<QueryRequest>,
) -> Response {
    if request.query.trim().is_empty() {
        return (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(json!({"detail": "query must not be empty"})),
        )
            .into_response();
    }
    if request.workspace_path.trim().is_empty() {
        return (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(json!({"detail": "workspace_path must not be empty"})),
        )
            .into_response();
    }

    // One in-flight run per session.  The owned guard travels into the run
    // task and releases the session when the stream completes.
    let Ok(mut guard) = Arc::clone(&state.session).try_lock_owned() else {
        return (
            StatusCode::CONFLICT,
            Json(json!({"detail": "a stream is already in progress for this session"})),
        )
            .into_response();
    };

    tracing::info!(
        workspace = %request.workspace_path,
        branch = %request.git_branch,
        query_len = request.query.len(),
        "stream request received"
    );

    {
        let context = request.session_context();
        if guard.is_none() {
            *guard = Some(state.build_session(context.clone()));
        }

        let session = guard.as_mut().expect("session initialized above");
        session.context = context;

        // Context updates re-initialize the cached prompt rather than
        // mutating it in place.
        let prompt = build_system_prompt(
            &request.workspace_path,
            request.system_info.as_ref(),
            request.active_file_context.as_ref(),
            request.context_mentions.as_deref(),
        );
        session.memory.initialize_system_prompt(prompt);
        session.memory.add_user_message(&request.query);
    }

    let (tx, rx) = EventSender::channel();

    tokio::spawn(async move {
        let session = guard.as_mut().expect("session initialized above");
        session.run(&tx).await;
        tracing::info!("stream run completed");
        // `guard` drops here, releasing the session.
    });

    let sse_stream = UnboundedReceiverStream::new(rx).map(|event| {
        let data = serde_json::to_string(&event).unwrap_or_else(|e| {
            tracing::error!(error = %e, "failed to serialize outbound event");
            json!({"type": "error", "content": "event serialization failed"}).to_string()
        });
        Ok::<_, Infallible>(Event::default().data(data))
    });

    Sse::new(sse_stream)
        .keep_alive(KeepAlive::default())
        .into_response()
}

// ---------------------------------------------------------------------------
// POST /permission
// ---------------------------------------------------------------------------

/// Resolve a pending permission request.
pub async fn permission(
    State(state): State<Arc<AppState>>,
    Json(response): Json<PermissionResponse>,
) -> Response {
    match state.broker.resolve(&response.permission_id, response.granted) {
        Ok(()) => {
            let verdict = if response.granted { "granted" } else { "denied" };
            (
                StatusCode::OK,
                Json(json!({
                    "status": "success",
                    "message": format!("Permission {verdict}"),
                })),
            )
                .into_response()
        }
        Err(_) => (
            StatusCode::NOT_FOUND,
            Json(json!({"detail": "Permission request not found or expired"})),
        )
            .into_response(),
    }
}

// ---------------------------------------------------------------------------
// POST /reset
// ---------------------------------------------------------------------------

/// Tear down the session, preserving only the workspace context for the
/// replacement.
pub async fn reset(State(state): State<Arc<AppState>>) -> Response {
    let Ok(mut guard) = state.session.try_lock() else {
        return (
            StatusCode::CONFLICT,
            Json(json!({"detail": "cannot reset while a stream is in progress"})),
        )
            .into_response();
    };

    let preserved = guard.take().map(|session| session.context);
    *guard = preserved.map(|context| state.build_session(context));

    tracing::info!(rebuilt = guard.is_some(), "session reset");
    (
        StatusCode::OK,
        Json(json!({"status": "success", "message": "Agent reset successfully"})),
    )
        .into_response()
}

// ---------------------------------------------------------------------------
// POST /sanitize
// ---------------------------------------------------------------------------

/// Rewrite duplicate tool-use identifiers in the conversation log.
pub async fn sanitize(State(state): State<Arc<AppState>>) -> Response {
    let Ok(mut guard) = state.session.try_lock() else {
        return (
            StatusCode::CONFLICT,
            Json(json!({"detail": "cannot sanitize while a stream is in progress"})),
        )
            .into_response();
    };

    let Some(session) = guard.as_mut() else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"detail": "Agent not initialized"})),
        )
            .into_response();
    };

    let rewrites = session.memory.sanitize();
    (
        StatusCode::OK,
        Json(json!({
            "status": "success",
            "message": format!("Conversation sanitized. Rewrote {rewrites} duplicate tool ids."),
        })),
    )
        .into_response()
}

// ---------------------------------------------------------------------------
// /health and /
// ---------------------------------------------------------------------------

/// Liveness and session status.
pub async fn health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    // A held lock means a stream is in flight, which implies a session.
    let session_initialized = match state.session.try_lock() {
        Ok(guard) => guard.is_some(),
        Err(_) => true,
    };

    Json(json!({
        "status": "healthy",
        "streaming": true,
        "session_initialized": session_initialized,
        "ready_for_requests": true,
    }))
}

/// Root banner.
pub async fn root() -> Json<serde_json::Value> {
    Json(json!({
        "message": "Codriver streaming API is running",
        "streaming": true,
    }))
}
