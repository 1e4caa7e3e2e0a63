//! Workflow executor: runs a graph's nodes in topological order.
//!
//! Skip propagation: a node whose wired inputs include a `Null` from any
//! upstream connection is not executed; all of its declared outputs are
//! recorded as `Null`, so dead branches stay dead transitively. Node types
//! registered as null-tolerant (MergeNode, PassThroughNode) are exempt and
//! are the only behaviors allowed to observe `Null` inputs.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::{NodeError, WorkflowError};
use crate::workflow::graph::WorkflowGraph;
use crate::workflow::node::{ExecutionEnv, JsonMap, NodeContext, apply_required_defaults};

/// Per-node output maps keyed by node id.
pub type NodeResults = HashMap<String, JsonMap>;

/// Executes one workflow graph. Single use.
pub struct WorkflowExecutor {
    graph: WorkflowGraph,
    env: Arc<ExecutionEnv>,
    task_id: Option<String>,
    results: Arc<RwLock<NodeResults>>,
}

impl WorkflowExecutor {
    pub fn new(graph: WorkflowGraph, env: Arc<ExecutionEnv>, task_id: Option<String>) -> Self {
        Self {
            graph,
            env,
            task_id,
            results: Arc::new(RwLock::new(NodeResults::new())),
        }
    }

    /// Shared handle to the (partial) results, readable while running.
    pub fn results_handle(&self) -> Arc<RwLock<NodeResults>> {
        Arc::clone(&self.results)
    }

    /// Run the whole graph. The first node failure aborts the execution;
    /// cancellation is observed between nodes and inside suspending nodes
    /// via the token.
    pub async fn execute(&self, cancel: CancellationToken) -> Result<NodeResults, WorkflowError> {
        let order = self.graph.execution_order()?;

        info!(
            task_id = self.task_id.as_deref().unwrap_or("-"),
            node_count = order.len(),
            "workflow_started"
        );

        for node_id in &order {
            if cancel.is_cancelled() {
                warn!(node_id = %node_id, "Workflow cancelled before node execution");
                return Err(WorkflowError::Cancelled);
            }
            self.execute_node(node_id, &cancel).await?;
        }

        info!(
            task_id = self.task_id.as_deref().unwrap_or("-"),
            "workflow_completed"
        );
        Ok(self.results.read().await.clone())
    }

    async fn execute_node(
        &self,
        node_id: &str,
        cancel: &CancellationToken,
    ) -> Result<(), WorkflowError> {
        let node = self
            .graph
            .node(node_id)
            .expect("execution order refers to graph nodes");

        // Wire inputs from upstream results, noting any dead upstream.
        let mut inputs = node.input_values.clone();
        let mut dead_upstream = false;
        {
            let results = self.results.read().await;
            for conn in self.graph.connections_into(node_id) {
                let upstream = results.get(&conn.from_node).ok_or_else(|| {
                    WorkflowError::NodeFailed {
                        node_id: node_id.to_string(),
                        source: NodeError::MissingUpstream(conn.from_node.clone()),
                    }
                })?;
                let value = upstream.get(&conn.from_port).cloned().unwrap_or(Value::Null);
                if value.is_null() {
                    dead_upstream = true;
                }
                inputs.insert(conn.to_port.clone(), value);
            }
        }

        if dead_upstream && !node.null_tolerant {
            info!(node_id = %node_id, "Skipping node, upstream delivered no value");
            let empty: JsonMap = node
                .schema
                .outputs
                .iter()
                .map(|p| (p.name.clone(), Value::Null))
                .collect();
            self.results.write().await.insert(node_id.to_string(), empty);
            return Ok(());
        }

        apply_required_defaults(&node.schema, &mut inputs).map_err(|source| {
            WorkflowError::NodeFailed {
                node_id: node_id.to_string(),
                source,
            }
        })?;

        let ctx = NodeContext {
            node_id: node_id.to_string(),
            task_id: self.task_id.clone(),
            env: Arc::clone(&self.env),
            cancel: cancel.clone(),
        };

        info!(node_id = %node_id, node_type = %node.type_name, "node_started");

        match node.behavior().process(&inputs, &ctx).await {
            Ok(mut outputs) => {
                for port in &node.schema.outputs {
                    outputs.entry(port.name.clone()).or_insert(Value::Null);
                }
                info!(node_id = %node_id, "node_completed");
                self.results
                    .write()
                    .await
                    .insert(node_id.to_string(), outputs);
                Ok(())
            }
            Err(NodeError::Cancelled) => {
                warn!(node_id = %node_id, "Node cancelled");
                Err(WorkflowError::Cancelled)
            }
            Err(source) => {
                error!(node_id = %node_id, error = %source, "node_failed");
                Err(WorkflowError::NodeFailed {
                    node_id: node_id.to_string(),
                    source,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::workflow::definition::GraphDefinition;
    use crate::workflow::testing::test_env;

    async fn run(def: serde_json::Value) -> Result<NodeResults, WorkflowError> {
        let env = test_env();
        let definition: GraphDefinition = serde_json::from_value(def).unwrap();
        let graph = WorkflowGraph::from_definition(&env.registry, &definition).unwrap();
        let executor = WorkflowExecutor::new(graph, env, None);
        executor.execute(CancellationToken::new()).await
    }

    #[tokio::test]
    async fn basic_chain_propagates_values() {
        let results = run(json!({
            "nodes": [
                {"id": "a", "type": "TextInputNode", "input_values": {"text": "hello"}},
                {"id": "b", "type": "TextStripNode"}
            ],
            "connections": [
                {"from_node": "a", "from_port": "text", "to_node": "b", "to_port": "text"}
            ]
        }))
        .await
        .unwrap();

        assert_eq!(results["a"]["text"], json!("hello"));
        assert_eq!(results["b"]["text"], json!("hello"));
    }

    #[tokio::test]
    async fn zero_connection_graph_runs_every_node_once() {
        let results = run(json!({
            "nodes": [
                {"id": "a", "type": "TextInputNode", "input_values": {"text": "1"}},
                {"id": "b", "type": "TextInputNode", "input_values": {"text": "2"}}
            ],
            "connections": []
        }))
        .await
        .unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results["a"]["text"], json!("1"));
        assert_eq!(results["b"]["text"], json!("2"));
    }

    #[tokio::test]
    async fn missing_required_input_fails_node() {
        let err = run(json!({
            "nodes": [{"id": "a", "type": "TextStripNode"}],
            "connections": []
        }))
        .await
        .unwrap_err();

        assert!(matches!(
            err,
            WorkflowError::NodeFailed {
                source: NodeError::MissingRequiredInput(_),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn skipped_node_records_null_for_every_output() {
        // Switch routes nothing to output_1; the strip node downstream of it
        // must be skipped with all outputs null.
        let results = run(json!({
            "nodes": [
                {"id": "sw", "type": "SwitchNode", "input_values": {
                    "data": {"score": 10},
                    "rules": [{"field": "score", "operator": "greater", "value": 80, "output_index": 0}]
                }},
                {"id": "strip", "type": "TextStripNode"}
            ],
            "connections": [
                {"from_node": "sw", "from_port": "output_1", "to_node": "strip", "to_port": "text"}
            ]
        }))
        .await
        .unwrap();

        assert_eq!(results["strip"]["text"], Value::Null);
    }

    #[tokio::test]
    async fn node_failure_aborts_remaining_nodes() {
        let err = run(json!({
            "nodes": [
                {"id": "a", "type": "MathOperationNode", "input_values": {"a": 1, "b": 0, "operation": "divide"}},
                {"id": "b", "type": "TypeConvertNode", "input_values": {"from_type": "float", "to_type": "text"}}
            ],
            "connections": [
                {"from_node": "a", "from_port": "result", "to_node": "b", "to_port": "value"}
            ]
        }))
        .await
        .unwrap_err();

        assert!(matches!(err, WorkflowError::NodeFailed { node_id, .. } if node_id == "a"));
    }

    #[tokio::test]
    async fn pre_cancelled_token_cancels_before_first_node() {
        let env = test_env();
        let definition: GraphDefinition = serde_json::from_value(json!({
            "nodes": [{"id": "a", "type": "TextInputNode", "input_values": {"text": "x"}}],
            "connections": []
        }))
        .unwrap();
        let graph = WorkflowGraph::from_definition(&env.registry, &definition).unwrap();
        let executor = WorkflowExecutor::new(graph, env, None);

        let token = CancellationToken::new();
        token.cancel();
        let err = executor.execute(token).await.unwrap_err();
        assert!(matches!(err, WorkflowError::Cancelled));
    }
}
