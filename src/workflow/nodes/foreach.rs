//! ForEach nodes: dynamic multiplication of work across a list.
//!
//! `SimpleForEachNode` runs one fresh node instance per item;
//! `ForEachNode` runs a fresh embedded sub-workflow per item. Both collect
//! `{results, success_count, error_count, errors}`, optionally in parallel.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use serde_json::{Value, json};
use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::error::NodeError;
use crate::registry::NodeRegistration;
use crate::workflow::definition::GraphDefinition;
use crate::workflow::executor::WorkflowExecutor;
use crate::workflow::graph::WorkflowGraph;
use crate::workflow::node::{
    JsonMap, NodeBehavior, NodeContext, NodeSchema, apply_required_defaults, opt_bool, opt_str,
    opt_u64, req_array, req_str,
};
use crate::workflow::port::Port;

pub(super) fn registrations() -> Vec<NodeRegistration> {
    vec![
        NodeRegistration {
            type_name: "SimpleForEachNode",
            category: "control",
            null_tolerant: false,
            schema: NodeSchema::new()
                .input(Port::required("items", "array").with_tooltip("Items to iterate over"))
                .input(
                    Port::required("node_type", "string")
                        .with_tooltip("Node type executed once per item"),
                )
                .input(Port::optional("item_port_name", "string").with_default("text"))
                .input(Port::optional("result_port_name", "string").with_default("result"))
                .input(Port::optional("node_config", "object").with_default(json!({})))
                .input(Port::optional("parallel", "boolean").with_default(false))
                .input(Port::optional("continue_on_error", "boolean").with_default(true))
                .input(
                    Port::optional("max_workers", "number")
                        .with_tooltip("Concurrency bound for parallel mode"),
                )
                .output(Port::out("results", "array"))
                .output(Port::out("success_count", "number"))
                .output(Port::out("error_count", "number"))
                .output(Port::out("errors", "array")),
            construct: || Arc::new(SimpleForEach),
        },
        NodeRegistration {
            type_name: "ForEachNode",
            category: "control",
            null_tolerant: false,
            schema: NodeSchema::new()
                .input(Port::required("items", "array"))
                .input(
                    Port::required("sub_workflow", "object")
                        .with_tooltip("Embedded workflow definition run once per item"),
                )
                .input(
                    Port::required("result_node_id", "string")
                        .with_tooltip("Sub-workflow node whose output is collected"),
                )
                .input(Port::optional("result_port_name", "string").with_default("result"))
                .input(Port::optional("parallel", "boolean").with_default(false))
                .input(Port::optional("continue_on_error", "boolean").with_default(true))
                .input(Port::optional("max_iterations", "number"))
                .output(Port::out("results", "array"))
                .output(Port::out("item_value", "any"))
                .output(Port::out("current_index", "number"))
                .output(Port::out("total_count", "number"))
                .output(Port::out("success_count", "number"))
                .output(Port::out("error_count", "number"))
                .output(Port::out("errors", "array")),
            construct: || Arc::new(ForEach),
        },
    ]
}

/// Outcome of one iteration, kept in item order.
struct Iteration {
    index: usize,
    item: Value,
    outcome: Result<Value, String>,
}

/// Fold per-iteration outcomes into the shared output shape.
fn collect(iterations: Vec<Iteration>) -> JsonMap {
    let mut results = Vec::new();
    let mut errors = Vec::new();
    for iteration in &iterations {
        match &iteration.outcome {
            Ok(value) => results.push(value.clone()),
            Err(message) => errors.push(json!({
                "index": iteration.index,
                "item": iteration.item,
                "error": message,
            })),
        }
    }

    let mut out = JsonMap::new();
    out.insert("success_count".to_string(), json!(results.len()));
    out.insert("error_count".to_string(), json!(errors.len()));
    out.insert("results".to_string(), Value::Array(results));
    out.insert("errors".to_string(), Value::Array(errors));
    out
}

struct SimpleForEach;

impl SimpleForEach {
    async fn run_item(
        ctx: &NodeContext,
        item: Value,
        index: usize,
        node_type: &str,
        item_port: &str,
        result_port: &str,
        node_config: &JsonMap,
    ) -> Iteration {
        let outcome = Self::try_item(ctx, &item, node_type, item_port, result_port, node_config)
            .await
            .map_err(|e| e.to_string());
        if let Err(error) = &outcome {
            warn!(index, error = %error, "SimpleForEach iteration failed");
        }
        Iteration {
            index,
            item,
            outcome,
        }
    }

    async fn try_item(
        ctx: &NodeContext,
        item: &Value,
        node_type: &str,
        item_port: &str,
        result_port: &str,
        node_config: &JsonMap,
    ) -> Result<Value, NodeError> {
        let node = ctx
            .env
            .registry
            .create(node_type, None)
            .map_err(|e| NodeError::ExecutionFailed(e.to_string()))?;

        let mut inputs = node.input_values.clone();
        inputs.insert(item_port.to_string(), item.clone());
        for (key, value) in node_config {
            if node.schema.input_port(key).is_some() {
                inputs.insert(key.clone(), value.clone());
            }
        }
        apply_required_defaults(&node.schema, &mut inputs)?;

        let child_ctx = NodeContext {
            node_id: node.id.clone(),
            task_id: ctx.task_id.clone(),
            env: Arc::clone(&ctx.env),
            cancel: ctx.cancel.clone(),
        };
        let outputs = node.behavior().process(&inputs, &child_ctx).await?;

        outputs.get(result_port).cloned().ok_or_else(|| {
            let available: Vec<&str> = outputs.keys().map(String::as_str).collect();
            NodeError::ExecutionFailed(format!(
                "result port '{}' not found; available ports: {}",
                result_port,
                available.join(", ")
            ))
        })
    }
}

#[async_trait]
impl NodeBehavior for SimpleForEach {
    async fn process(&self, inputs: &JsonMap, ctx: &NodeContext) -> Result<JsonMap, NodeError> {
        let items = req_array(inputs, "items")?.clone();
        let node_type = req_str(inputs, "node_type")?.to_string();
        let item_port = opt_str(inputs, "item_port_name").unwrap_or("text").to_string();
        let result_port = opt_str(inputs, "result_port_name").unwrap_or("result").to_string();
        let node_config = match inputs.get("node_config") {
            Some(Value::Object(map)) => map.clone(),
            _ => JsonMap::new(),
        };
        let parallel = opt_bool(inputs, "parallel").unwrap_or(false);
        let continue_on_error = opt_bool(inputs, "continue_on_error").unwrap_or(true);
        let max_workers = opt_u64(inputs, "max_workers").unwrap_or(0) as usize;

        info!(
            count = items.len(),
            node_type = %node_type,
            parallel,
            "SimpleForEach starting"
        );

        let iterations = if parallel {
            let semaphore = (max_workers > 0).then(|| Arc::new(Semaphore::new(max_workers)));
            let futures = items.into_iter().enumerate().map(|(index, item)| {
                let semaphore = semaphore.clone();
                let node_type = node_type.clone();
                let item_port = item_port.clone();
                let result_port = result_port.clone();
                let node_config = node_config.clone();
                async move {
                    let _permit = match &semaphore {
                        Some(s) => s.acquire().await.ok(),
                        None => None,
                    };
                    Self::run_item(
                        ctx,
                        item,
                        index,
                        &node_type,
                        &item_port,
                        &result_port,
                        &node_config,
                    )
                    .await
                }
            });
            join_all(futures).await
        } else {
            let mut iterations = Vec::new();
            for (index, item) in items.into_iter().enumerate() {
                let iteration = Self::run_item(
                    ctx,
                    item,
                    index,
                    &node_type,
                    &item_port,
                    &result_port,
                    &node_config,
                )
                .await;
                let failed = iteration.outcome.is_err();
                iterations.push(iteration);
                if failed && !continue_on_error {
                    warn!(index, "SimpleForEach stopping on first error");
                    break;
                }
            }
            iterations
        };

        if ctx.cancel.is_cancelled() {
            return Err(NodeError::Cancelled);
        }

        let out = collect(iterations);
        info!(
            succeeded = out["success_count"].as_u64().unwrap_or(0),
            failed = out["error_count"].as_u64().unwrap_or(0),
            "SimpleForEach finished"
        );
        Ok(out)
    }
}

struct ForEach;

impl ForEach {
    async fn run_iteration(
        ctx: &NodeContext,
        definition: &GraphDefinition,
        item: Value,
        index: usize,
        result_node_id: &str,
        result_port: &str,
    ) -> Iteration {
        let outcome = Self::try_iteration(ctx, definition, &item, index, result_node_id, result_port)
            .await
            .map_err(|e| e.to_string());
        if let Err(error) = &outcome {
            warn!(index, error = %error, "ForEach iteration failed");
        }
        Iteration {
            index,
            item,
            outcome,
        }
    }

    async fn try_iteration(
        ctx: &NodeContext,
        definition: &GraphDefinition,
        item: &Value,
        index: usize,
        result_node_id: &str,
        result_port: &str,
    ) -> Result<Value, NodeError> {
        let mut graph = WorkflowGraph::from_definition(&ctx.env.registry, definition)
            .map_err(|e| NodeError::ExecutionFailed(e.to_string()))?;

        graph.seed_nodes_with_port("foreach_item", item);
        graph.seed_nodes_with_port("foreach_index", &json!(index));

        let executor =
            WorkflowExecutor::new(graph, Arc::clone(&ctx.env), ctx.task_id.clone());
        let results = executor
            .execute(ctx.cancel.child_token())
            .await
            .map_err(|e| NodeError::ExecutionFailed(e.to_string()))?;

        let node_results = results.get(result_node_id).ok_or_else(|| {
            NodeError::ExecutionFailed(format!(
                "result node '{result_node_id}' not found in sub-workflow results"
            ))
        })?;
        node_results.get(result_port).cloned().ok_or_else(|| {
            NodeError::ExecutionFailed(format!(
                "result port '{result_port}' not found on node '{result_node_id}'"
            ))
        })
    }
}

#[async_trait]
impl NodeBehavior for ForEach {
    async fn process(&self, inputs: &JsonMap, ctx: &NodeContext) -> Result<JsonMap, NodeError> {
        let mut items = req_array(inputs, "items")?.clone();
        let definition: GraphDefinition = inputs
            .get("sub_workflow")
            .cloned()
            .ok_or_else(|| NodeError::MissingRequiredInput("sub_workflow".to_string()))
            .and_then(|raw| {
                serde_json::from_value(raw).map_err(|e| NodeError::InvalidInput {
                    port: "sub_workflow".to_string(),
                    reason: e.to_string(),
                })
            })?;
        let result_node_id = req_str(inputs, "result_node_id")?.to_string();
        let result_port = opt_str(inputs, "result_port_name").unwrap_or("result").to_string();
        let parallel = opt_bool(inputs, "parallel").unwrap_or(false);
        let continue_on_error = opt_bool(inputs, "continue_on_error").unwrap_or(true);

        if let Some(max) = opt_u64(inputs, "max_iterations") {
            items.truncate(max as usize);
        }

        info!(count = items.len(), parallel, "ForEach starting");

        let total = items.len();
        let last_item = items.last().cloned().unwrap_or(Value::Null);

        let iterations = if parallel {
            let futures = items.into_iter().enumerate().map(|(index, item)| {
                let definition = &definition;
                let result_node_id = result_node_id.clone();
                let result_port = result_port.clone();
                async move {
                    Self::run_iteration(ctx, definition, item, index, &result_node_id, &result_port)
                        .await
                }
            });
            join_all(futures).await
        } else {
            let mut iterations = Vec::new();
            for (index, item) in items.into_iter().enumerate() {
                let iteration = Self::run_iteration(
                    ctx,
                    &definition,
                    item,
                    index,
                    &result_node_id,
                    &result_port,
                )
                .await;
                let failed = iteration.outcome.is_err();
                iterations.push(iteration);
                if failed && !continue_on_error {
                    warn!(index, "ForEach stopping on first error");
                    break;
                }
            }
            iterations
        };

        if ctx.cancel.is_cancelled() {
            return Err(NodeError::Cancelled);
        }

        let mut out = collect(iterations);
        out.insert("item_value".to_string(), last_item);
        out.insert(
            "current_index".to_string(),
            json!(total as i64 - 1),
        );
        out.insert("total_count".to_string(), json!(total));
        info!(
            succeeded = out["success_count"].as_u64().unwrap_or(0),
            failed = out["error_count"].as_u64().unwrap_or(0),
            "ForEach finished"
        );
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::workflow::testing::test_env;

    async fn run(type_name: &str, inputs: serde_json::Value) -> Result<JsonMap, NodeError> {
        let env = test_env();
        let node = env.registry.create(type_name, None).unwrap();
        let ctx = NodeContext {
            node_id: node.id.clone(),
            task_id: None,
            env: Arc::clone(&env),
            cancel: tokio_util::sync::CancellationToken::new(),
        };
        let Value::Object(inputs) = inputs else { panic!("inputs must be an object") };
        node.behavior().process(&inputs, &ctx).await
    }

    #[tokio::test]
    async fn simple_foreach_parallel_preserves_item_order() {
        let out = run(
            "SimpleForEachNode",
            json!({
                "items": ["  a  ", "  b  ", "  c  "],
                "node_type": "TextStripNode",
                "item_port_name": "text",
                "result_port_name": "text",
                "parallel": true
            }),
        )
        .await
        .unwrap();

        assert_eq!(out["results"], json!(["a", "b", "c"]));
        assert_eq!(out["success_count"], json!(3));
        assert_eq!(out["error_count"], json!(0));
        assert_eq!(out["errors"], json!([]));
    }

    #[tokio::test]
    async fn simple_foreach_empty_items_runs_nothing() {
        let out = run(
            "SimpleForEachNode",
            json!({"items": [], "node_type": "TextStripNode", "result_port_name": "text"}),
        )
        .await
        .unwrap();

        assert_eq!(out["results"], json!([]));
        assert_eq!(out["success_count"], json!(0));
        assert_eq!(out["error_count"], json!(0));
        assert_eq!(out["errors"], json!([]));
    }

    #[tokio::test]
    async fn simple_foreach_unknown_node_type_fails_each_iteration() {
        let out = run(
            "SimpleForEachNode",
            json!({"items": ["x", "y"], "node_type": "NoSuchNode"}),
        )
        .await
        .unwrap();

        assert_eq!(out["success_count"], json!(0));
        assert_eq!(out["error_count"], json!(2));
    }

    #[tokio::test]
    async fn simple_foreach_sequential_stops_on_first_error() {
        // Non-numeric items make every iteration fail; sequential mode
        // without continue_on_error stops after the first.
        let out = run(
            "SimpleForEachNode",
            json!({
                "items": ["x", "y", "z"],
                "node_type": "IntInputNode",
                "item_port_name": "value",
                "result_port_name": "value",
                "continue_on_error": false
            }),
        )
        .await
        .unwrap();

        assert_eq!(out["error_count"], json!(1));
        assert_eq!(out["success_count"], json!(0));
    }

    #[tokio::test]
    async fn simple_foreach_max_workers_bounds_concurrency() {
        let out = run(
            "SimpleForEachNode",
            json!({
                "items": [" 1 ", " 2 ", " 3 ", " 4 "],
                "node_type": "TextStripNode",
                "result_port_name": "text",
                "parallel": true,
                "max_workers": 2
            }),
        )
        .await
        .unwrap();

        assert_eq!(out["results"], json!(["1", "2", "3", "4"]));
    }

    #[tokio::test]
    async fn foreach_runs_sub_workflow_per_item() {
        let out = run(
            "ForEachNode",
            json!({
                "items": ["  one  ", "  two  "],
                "sub_workflow": {
                    "nodes": [
                        {"id": "entry", "type": "ForEachItemNode"},
                        {"id": "strip", "type": "TextStripNode"}
                    ],
                    "connections": [
                        {"from_node": "entry", "from_port": "item", "to_node": "strip", "to_port": "text"}
                    ]
                },
                "result_node_id": "strip",
                "result_port_name": "text"
            }),
        )
        .await
        .unwrap();

        assert_eq!(out["results"], json!(["one", "two"]));
        assert_eq!(out["success_count"], json!(2));
        assert_eq!(out["total_count"], json!(2));
        assert_eq!(out["current_index"], json!(1));
    }

    #[tokio::test]
    async fn foreach_empty_items_reports_zero_counts() {
        let out = run(
            "ForEachNode",
            json!({
                "items": [],
                "sub_workflow": {"nodes": [], "connections": []},
                "result_node_id": "strip"
            }),
        )
        .await
        .unwrap();

        assert_eq!(out["results"], json!([]));
        assert_eq!(out["success_count"], json!(0));
        assert_eq!(out["error_count"], json!(0));
        assert_eq!(out["current_index"], json!(-1));
        assert_eq!(out["total_count"], json!(0));
    }

    #[tokio::test]
    async fn foreach_max_iterations_truncates() {
        let out = run(
            "ForEachNode",
            json!({
                "items": ["a", "b", "c", "d"],
                "sub_workflow": {
                    "nodes": [{"id": "entry", "type": "ForEachItemNode"}],
                    "connections": []
                },
                "result_node_id": "entry",
                "result_port_name": "item",
                "max_iterations": 2
            }),
        )
        .await
        .unwrap();

        assert_eq!(out["results"], json!(["a", "b"]));
        assert_eq!(out["total_count"], json!(2));
    }
}
