//! Lifecycle management for workflow executions.
//!
//! Each execution runs as a detached, cancellable task. Completion (or
//! failure, or cancellation) is reported to an optional webhook URL; results
//! are retained in memory for the status endpoint.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use serde_json::json;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::client::ServiceClient;
use crate::error::{GraphError, WorkflowError};
use crate::workflow::definition::GraphDefinition;
use crate::workflow::executor::{NodeResults, WorkflowExecutor};
use crate::workflow::graph::WorkflowGraph;
use crate::workflow::node::ExecutionEnv;

struct ActiveTask {
    cancel: CancellationToken,
    results: Arc<RwLock<NodeResults>>,
}

struct FinishedTask {
    status: &'static str,
    results: NodeResults,
    error: Option<String>,
}

type ActiveTasks = Arc<Mutex<HashMap<String, ActiveTask>>>;
type FinishedTasks = Arc<Mutex<HashMap<String, FinishedTask>>>;

/// Status snapshot of a workflow task.
#[derive(Debug, Serialize)]
pub struct TaskReport {
    pub status: String,
    pub result: NodeResults,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Owns all running and finished workflow tasks.
pub struct WorkflowManager {
    env: Arc<ExecutionEnv>,
    active: ActiveTasks,
    finished: FinishedTasks,
}

impl WorkflowManager {
    pub fn new(env: Arc<ExecutionEnv>) -> Self {
        Self {
            env,
            active: Arc::new(Mutex::new(HashMap::new())),
            finished: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn env(&self) -> Arc<ExecutionEnv> {
        Arc::clone(&self.env)
    }

    /// Launch a workflow execution as a detached task.
    ///
    /// Graph construction happens eagerly so invalid definitions are
    /// rejected before anything is spawned. When `webhook_url` is given, a
    /// `{task_id, status, result?, error?}` payload is posted there on any
    /// terminal outcome.
    pub async fn execute(
        &self,
        definition: &GraphDefinition,
        webhook_url: Option<String>,
        task_id: Option<String>,
    ) -> Result<String, GraphError> {
        let graph = WorkflowGraph::from_definition(&self.env.registry, definition)?;
        let task_id = task_id.unwrap_or_else(|| Uuid::new_v4().to_string());

        let executor = WorkflowExecutor::new(graph, Arc::clone(&self.env), Some(task_id.clone()));
        let results = executor.results_handle();
        let cancel = CancellationToken::new();

        // Register before spawning so a fast task can't finish (and try to
        // clear its entry) before it exists.
        self.active.lock().await.insert(
            task_id.clone(),
            ActiveTask {
                cancel: cancel.clone(),
                results,
            },
        );

        tokio::spawn(run_to_completion(
            task_id.clone(),
            executor,
            webhook_url,
            cancel,
            self.env.client.clone(),
            Arc::clone(&self.active),
            Arc::clone(&self.finished),
        ));

        info!(task_id = %task_id, "Workflow task accepted");
        Ok(task_id)
    }

    /// Cancel a running workflow. Returns false when no active task has
    /// this id.
    pub async fn cancel(&self, task_id: &str) -> bool {
        let active = self.active.lock().await;
        match active.get(task_id) {
            Some(task) => {
                warn!(task_id = %task_id, "Cancelling workflow task");
                task.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Status of a task: `running`, `completed`, `error`, `cancelled`, or
    /// `not_found`. Partial results are visible while running.
    pub async fn status(&self, task_id: &str) -> TaskReport {
        if let Some(task) = self.active.lock().await.get(task_id) {
            return TaskReport {
                status: "running".to_string(),
                result: task.results.read().await.clone(),
                error: None,
            };
        }

        if let Some(done) = self.finished.lock().await.get(task_id) {
            return TaskReport {
                status: done.status.to_string(),
                result: done.results.clone(),
                error: done.error.clone(),
            };
        }

        TaskReport {
            status: "not_found".to_string(),
            result: NodeResults::new(),
            error: None,
        }
    }

    /// Number of currently running workflow tasks.
    pub async fn active_count(&self) -> usize {
        self.active.lock().await.len()
    }
}

/// Drive one execution to a terminal state, notify the webhook, and move
/// the bookkeeping from active to finished.
async fn run_to_completion(
    task_id: String,
    executor: WorkflowExecutor,
    webhook_url: Option<String>,
    cancel: CancellationToken,
    client: ServiceClient,
    active: ActiveTasks,
    finished: FinishedTasks,
) {
    let results_handle = executor.results_handle();
    let outcome = executor.execute(cancel).await;

    let (status, results, error): (&'static str, NodeResults, Option<String>) = match outcome {
        Ok(results) => ("completed", results, None),
        Err(WorkflowError::Cancelled) => ("cancelled", results_handle.read().await.clone(), None),
        Err(e) => {
            error!(task_id = %task_id, error = %e, "workflow_failed");
            (
                "error",
                results_handle.read().await.clone(),
                Some(e.to_string()),
            )
        }
    };

    if let Some(url) = &webhook_url {
        let mut payload = json!({
            "task_id": task_id,
            "status": status,
        });
        if status == "completed" {
            payload["result"] = serde_json::to_value(&results).unwrap_or(serde_json::Value::Null);
        }
        if let Some(err) = &error {
            payload["error"] = json!(err);
        }
        client.post_webhook(url, &payload).await;
    }

    finished.lock().await.insert(
        task_id.clone(),
        FinishedTask {
            status,
            results,
            error,
        },
    );
    active.lock().await.remove(&task_id);

    info!(task_id = %task_id, status = %status, "Workflow task finished");
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::workflow::testing::test_env;

    fn manager() -> WorkflowManager {
        WorkflowManager::new(test_env())
    }

    async fn wait_for_terminal(manager: &WorkflowManager, task_id: &str) -> TaskReport {
        for _ in 0..100 {
            let report = manager.status(task_id).await;
            if report.status != "running" {
                return report;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("task did not reach a terminal state");
    }

    #[tokio::test]
    async fn execute_reports_completed_with_results() {
        let manager = manager();
        let def: GraphDefinition = serde_json::from_value(json!({
            "nodes": [{"id": "a", "type": "TextInputNode", "input_values": {"text": "hi"}}],
            "connections": []
        }))
        .unwrap();

        let task_id = manager.execute(&def, None, None).await.unwrap();
        let report = wait_for_terminal(&manager, &task_id).await;
        assert_eq!(report.status, "completed");
        assert_eq!(report.result["a"]["text"], json!("hi"));
    }

    #[tokio::test]
    async fn invalid_definition_is_rejected_before_spawn() {
        let manager = manager();
        let def: GraphDefinition = serde_json::from_value(json!({
            "nodes": [{"id": "a", "type": "NoSuchNode"}],
            "connections": []
        }))
        .unwrap();

        assert!(manager.execute(&def, None, None).await.is_err());
        assert_eq!(manager.active_count().await, 0);
    }

    #[tokio::test]
    async fn failing_workflow_reports_error() {
        let manager = manager();
        let def: GraphDefinition = serde_json::from_value(json!({
            "nodes": [{"id": "a", "type": "TextStripNode"}],
            "connections": []
        }))
        .unwrap();

        let task_id = manager.execute(&def, None, None).await.unwrap();
        let report = wait_for_terminal(&manager, &task_id).await;
        assert_eq!(report.status, "error");
        assert!(report.error.is_some());
    }

    #[tokio::test]
    async fn unknown_task_reports_not_found() {
        let manager = manager();
        assert_eq!(manager.status("nope").await.status, "not_found");
        assert!(!manager.cancel("nope").await);
    }
}
