//! Permission broker.
//!
//! Dangerous tool executions are gated on explicit user consent.  The broker
//! is a keyed rendezvous: the agent loop registers a freshly generated
//! permission id and waits; the HTTP surface resolves it with the user's
//! decision.  Every entry is removed on resolution or timeout.

use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::error::{AgentError, Result};

/// Default wait before an unanswered request is treated as denied.
pub const DEFAULT_PERMISSION_TIMEOUT: Duration = Duration::from_secs(60);

/// The outcome of a permission wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionOutcome {
    /// The user granted the request.
    Granted,
    /// The user denied the request.
    Denied,
    /// No response arrived before the deadline.
    TimedOut,
}

/// Process-wide rendezvous for pending permission requests.
///
/// At most one resolution per id; the first resolver wins and later attempts
/// get [`AgentError::PermissionUnknown`].
pub struct PermissionBroker {
    pending: DashMap<String, oneshot::Sender<bool>>,
    timeout: Duration,
}

impl PermissionBroker {
    /// Create a broker with the default timeout.
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_PERMISSION_TIMEOUT)
    }

    /// Create a broker with an explicit timeout.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            pending: DashMap::new(),
            timeout,
        }
    }

    /// Load the timeout from `PERMISSION_TIMEOUT_SECONDS`.
    pub fn from_env() -> Self {
        let timeout = std::env::var("PERMISSION_TIMEOUT_SECONDS")
            .ok()
            .and_then(|v| v.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_PERMISSION_TIMEOUT);
        Self::with_timeout(timeout)
    }

    /// Generate a fresh permission id tied to a tool-use id.
    pub fn new_permission_id(tool_use_id: &str) -> String {
        format!(
            "perm_{tool_use_id}_{}",
            &Uuid::new_v4().simple().to_string()[..8]
        )
    }

    /// Register a pending request and return the receiver half.
    fn register(&self, permission_id: &str) -> oneshot::Receiver<bool> {
        let (tx, rx) = oneshot::channel();
        self.pending.insert(permission_id.to_owned(), tx);
        rx
    }

    /// Resolve a pending request with the user's decision.
    ///
    /// Errors if the id is unknown or was already resolved.
    pub fn resolve(&self, permission_id: &str, granted: bool) -> Result<()> {
        let (_, tx) = self.pending.remove(permission_id).ok_or_else(|| {
            AgentError::PermissionUnknown {
                permission_id: permission_id.to_owned(),
            }
        })?;

        // A dropped receiver means the waiter already timed out; treat that
        // the same as an unknown id so the caller gets a 404.
        tx.send(granted).map_err(|_| AgentError::PermissionUnknown {
            permission_id: permission_id.to_owned(),
        })
    }

    /// Register `permission_id` and block until it is resolved or the
    /// timeout elapses.  The entry is always removed before returning.
    pub async fn await_decision(&self, permission_id: &str) -> PermissionOutcome {
        let rx = self.register(permission_id);

        let outcome = match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(true)) => PermissionOutcome::Granted,
            Ok(Ok(false)) => PermissionOutcome::Denied,
            // Sender dropped without resolving.
            Ok(Err(_)) => PermissionOutcome::Denied,
            Err(_) => PermissionOutcome::TimedOut,
        };

        self.pending.remove(permission_id);
        outcome
    }

    /// Number of unresolved requests (diagnostics).
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

impl Default for PermissionBroker {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn grant_resolves_waiter() {
        let broker = Arc::new(PermissionBroker::with_timeout(Duration::from_secs(5)));

        let waiter = {
            let broker = Arc::clone(&broker);
            tokio::spawn(async move { broker.await_decision("perm_1").await })
        };

        // Give the waiter a moment to register.
        tokio::time::sleep(Duration::from_millis(20)).await;
        broker.resolve("perm_1", true).unwrap();

        assert_eq!(waiter.await.unwrap(), PermissionOutcome::Granted);
        assert_eq!(broker.pending_count(), 0);
    }

    #[tokio::test]
    async fn deny_resolves_waiter() {
        let broker = Arc::new(PermissionBroker::with_timeout(Duration::from_secs(5)));

        let waiter = {
            let broker = Arc::clone(&broker);
            tokio::spawn(async move { broker.await_decision("perm_2").await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        broker.resolve("perm_2", false).unwrap();

        assert_eq!(waiter.await.unwrap(), PermissionOutcome::Denied);
    }

    #[tokio::test]
    async fn timeout_denies_and_clears_entry() {
        let broker = PermissionBroker::with_timeout(Duration::from_millis(30));
        let outcome = broker.await_decision("perm_3").await;
        assert_eq!(outcome, PermissionOutcome::TimedOut);
        assert_eq!(broker.pending_count(), 0);
    }

    #[tokio::test]
    async fn unknown_id_errors() {
        let broker = PermissionBroker::new();
        assert!(broker.resolve("perm_missing", true).is_err());
    }

    #[tokio::test]
    async fn second_resolution_errors() {
        let broker = Arc::new(PermissionBroker::with_timeout(Duration::from_secs(5)));

        let waiter = {
            let broker = Arc::clone(&broker);
            tokio::spawn(async move { broker.await_decision("perm_4").await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        broker.resolve("perm_4", true).unwrap();
        assert!(broker.resolve("perm_4", false).is_err());

        assert_eq!(waiter.await.unwrap(), PermissionOutcome::Granted);
    }

    #[test]
    fn permission_ids_are_unique() {
        let a = PermissionBroker::new_permission_id("tu_1");
        let b = PermissionBroker::new_permission_id("tu_1");
        assert_ne!(a, b);
        assert!(a.starts_with("perm_tu_1_"));
    }
}
