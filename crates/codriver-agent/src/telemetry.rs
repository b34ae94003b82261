//! LLM usage telemetry.
//!
//! Every completed provider call produces one [`UsageRecord`].  Records are
//! handed to a [`UsageSink`] in a spawned task; the sink is fire-and-forget
//! and a failing sink never blocks or fails the caller.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::llm::types::Usage;

/// A single LLM usage record.
#[derive(Debug, Clone, Serialize)]
pub struct UsageRecord {
    /// Provider name (e.g. `"anthropic"`).
    pub provider: String,

    /// Model identifier used for the request.
    pub model: String,

    /// Provider-assigned request id, `"unknown"` if absent.
    pub request_id: String,

    /// What kind of call produced this record (`"chat_streaming"`,
    /// `"memory_summarization"`).
    pub request_type: String,

    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_creation_input_tokens: u64,
    pub cache_read_input_tokens: u64,
    pub total_tokens: u64,

    /// Wall-clock duration of the call in seconds.
    pub duration_secs: f64,

    pub created_at: DateTime<Utc>,
}

impl UsageRecord {
    /// Build a record from a usage report.
    pub fn new(
        provider: impl Into<String>,
        model: impl Into<String>,
        request_id: impl Into<String>,
        request_type: impl Into<String>,
        usage: &Usage,
        duration_secs: f64,
    ) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            request_id: request_id.into(),
            request_type: request_type.into(),
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
            cache_creation_input_tokens: usage.cache_creation_input_tokens,
            cache_read_input_tokens: usage.cache_read_input_tokens,
            total_tokens: usage.total(),
            duration_secs,
            created_at: Utc::now(),
        }
    }
}

/// Destination for usage records.
///
/// Implementations may write to a database, an HTTP collector, or a log.
/// Errors are reported via `Result` but callers swallow them with a warning.
#[async_trait]
pub trait UsageSink: Send + Sync {
    /// Persist one usage record.
    async fn record(&self, record: UsageRecord) -> Result<(), String>;
}

/// Default sink that emits records as structured log events.
#[derive(Debug, Default)]
pub struct TracingUsageSink;

#[async_trait]
impl UsageSink for TracingUsageSink {
    async fn record(&self, record: UsageRecord) -> Result<(), String> {
        tracing::info!(
            provider = %record.provider,
            model = %record.model,
            request_id = %record.request_id,
            request_type = %record.request_type,
            input_tokens = record.input_tokens,
            output_tokens = record.output_tokens,
            cache_creation_input_tokens = record.cache_creation_input_tokens,
            cache_read_input_tokens = record.cache_read_input_tokens,
            total_tokens = record.total_tokens,
            duration_secs = record.duration_secs,
            "llm usage"
        );
        Ok(())
    }
}

/// Hand a record to the sink without waiting for it.  Sink failures are
/// logged and dropped.
pub fn record_usage(sink: Arc<dyn UsageSink>, record: UsageRecord) {
    tokio::spawn(async move {
        if let Err(e) = sink.record(record).await {
            tracing::warn!(error = %e, "failed to record llm usage");
        }
    });
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_totals_all_counters() {
        let usage = Usage {
            input_tokens: 100,
            output_tokens: 50,
            cache_creation_input_tokens: 7,
            cache_read_input_tokens: 512,
        };
        let record = UsageRecord::new("anthropic", "model-x", "msg_01", "chat_streaming", &usage, 1.5);
        assert_eq!(record.total_tokens, 669);
        assert_eq!(record.request_type, "chat_streaming");
    }

    #[tokio::test]
    async fn tracing_sink_accepts_records() {
        let sink = TracingUsageSink;
        let usage = Usage::default();
        let record = UsageRecord::new("anthropic", "m", "id", "chat_streaming", &usage, 0.0);
        assert!(sink.record(record).await.is_ok());
    }
}
