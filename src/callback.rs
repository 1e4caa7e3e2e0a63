//! Callback coordinator: routes inbound webhook deliveries to suspended
//! node executions.
//!
//! A node that issues an asynchronous remote request registers the remote
//! job id here, then waits. When the remote service delivers its webhook,
//! `handle` looks the id up, runs the registered handler, and wakes the
//! waiter with the handler's result. At most one delivery matters per
//! registration; anything after the entry is gone is logged and dropped.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde_json::Value;
use tokio::sync::{Mutex, oneshot};

use crate::error::{CallbackError, NodeError};

/// Transforms a raw webhook payload into the waiter's result.
pub type CallbackHandler =
    Arc<dyn Fn(Value) -> BoxFuture<'static, Result<Value, NodeError>> + Send + Sync>;

type WaitResult = Result<Value, CallbackError>;

struct PendingEntry {
    handler: CallbackHandler,
    /// Taken by `handle` on delivery; a second delivery finds None.
    tx: Option<oneshot::Sender<WaitResult>>,
    /// Taken by `wait`; stays here when the delivery beats the waiter so
    /// the result is not lost.
    rx: Option<oneshot::Receiver<WaitResult>>,
    registered_at: DateTime<Utc>,
}

/// Process-wide registry of pending callback waits, keyed by remote job id.
pub struct CallbackCoordinator {
    pending: Mutex<HashMap<String, PendingEntry>>,
}

impl Default for CallbackCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl CallbackCoordinator {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Register a handler for a job id.
    ///
    /// Fails if a registration for the same id already exists.
    pub async fn register(
        &self,
        job_id: impl Into<String>,
        handler: CallbackHandler,
    ) -> Result<(), CallbackError> {
        let job_id = job_id.into();
        let mut pending = self.pending.lock().await;
        if pending.contains_key(&job_id) {
            return Err(CallbackError::DuplicateRegistration(job_id));
        }

        let (tx, rx) = oneshot::channel();
        pending.insert(
            job_id,
            PendingEntry {
                handler,
                tx: Some(tx),
                rx: Some(rx),
                registered_at: Utc::now(),
            },
        );
        Ok(())
    }

    /// Wait until the callback for `job_id` is delivered, the timeout
    /// elapses, or the registration is cancelled via `unregister`.
    ///
    /// On any terminal outcome the entry is removed; later deliveries for
    /// the same id are discarded with a warning.
    pub async fn wait(&self, job_id: &str, timeout: Option<Duration>) -> WaitResult {
        let rx = {
            let mut pending = self.pending.lock().await;
            let entry = pending
                .get_mut(job_id)
                .ok_or_else(|| CallbackError::NotRegistered(job_id.to_string()))?;
            entry
                .rx
                .take()
                .ok_or_else(|| CallbackError::NotRegistered(job_id.to_string()))?
        };

        let outcome = match timeout {
            Some(limit) => match tokio::time::timeout(limit, rx).await {
                Ok(received) => received,
                Err(_) => {
                    self.remove(job_id).await;
                    return Err(CallbackError::Timeout(limit));
                }
            },
            None => rx.await,
        };

        // Drop the entry shell left behind when the delivery arrived first.
        self.remove(job_id).await;

        match outcome {
            Ok(result) => result,
            // Sender dropped without a value: the registration was cancelled.
            Err(_) => Err(CallbackError::Cancelled),
        }
    }

    /// Dispatch an inbound webhook payload to the matching waiter.
    ///
    /// Returns true when a registration consumed the delivery. Unknown ids
    /// are logged and dropped.
    pub async fn handle(&self, payload: Value) -> bool {
        let Some(job_id) = payload.get("id").and_then(Value::as_str).map(String::from) else {
            tracing::error!("Received callback without a job id");
            return false;
        };

        let (handler, tx, registered_at) = {
            let mut pending = self.pending.lock().await;
            let Some(entry) = pending.get_mut(&job_id) else {
                tracing::warn!(job_id = %job_id, "No pending callback for delivery, discarding");
                return false;
            };
            let Some(tx) = entry.tx.take() else {
                tracing::warn!(job_id = %job_id, "Callback already delivered, discarding");
                return false;
            };
            let handler = Arc::clone(&entry.handler);
            let registered_at = entry.registered_at;
            // With a waiter already listening, the entry has served its
            // purpose; otherwise it stays so `wait` can pick up the result.
            if entry.rx.is_none() {
                pending.remove(&job_id);
            }
            (handler, tx, registered_at)
        };

        tracing::debug!(
            job_id = %job_id,
            waited = %(Utc::now() - registered_at),
            "Dispatching callback"
        );

        let result = match handler(payload).await {
            Ok(value) => Ok(value),
            Err(e) => {
                tracing::error!(job_id = %job_id, "Callback handler failed: {}", e);
                Err(CallbackError::HandlerFailed(e.to_string()))
            }
        };

        // The waiter may already be gone (timed out between lookup and send).
        if tx.send(result).is_err() {
            tracing::warn!(job_id = %job_id, "Callback waiter gone, result dropped");
        }
        true
    }

    /// Cancel a pending registration. The waiter, if any, observes
    /// `CallbackError::Cancelled`.
    pub async fn unregister(&self, job_id: &str) {
        self.remove(job_id).await;
    }

    /// Number of registrations currently waiting.
    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }

    async fn remove(&self, job_id: &str) {
        let mut pending = self.pending.lock().await;
        pending.remove(job_id);
    }
}
