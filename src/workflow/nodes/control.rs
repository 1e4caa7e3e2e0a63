//! Flow-control nodes: conditional routing, branch merging, gated
//! pass-through.
//!
//! SwitchNode emits `Null` on every output it does not activate; the
//! executor's skip propagation then keeps dead branches from running.
//! MergeNode and PassThroughNode are registered null-tolerant and are the
//! only node types that get to look at those `Null` values.

use std::sync::Arc;

use async_trait::async_trait;
use regex::Regex;
use serde_json::{Value, json};
use tracing::warn;

use crate::error::NodeError;
use crate::registry::NodeRegistration;
use crate::workflow::node::{JsonMap, NodeBehavior, NodeContext, NodeSchema, opt_str, opt_u64};
use crate::workflow::nodes::{display_string, is_truthy};
use crate::workflow::port::Port;

/// Fixed output arity of SwitchNode (`output_0` .. `output_3`), plus
/// `fallback`.
pub const SWITCH_OUTPUTS: usize = 4;

/// Maximum MergeNode arity; the effective arity is the seeded
/// `input_count` (default 3).
pub const MERGE_MAX_INPUTS: usize = 8;

pub(super) fn registrations() -> Vec<NodeRegistration> {
    vec![
        NodeRegistration {
            type_name: "SwitchNode",
            category: "control",
            null_tolerant: false,
            schema: {
                let mut schema = NodeSchema::new()
                    .input(Port::required("data", "any").with_tooltip("Data to route"))
                    .input(
                        Port::required("rules", "array")
                            .with_default(json!([]))
                            .with_tooltip("Routing rules"),
                    )
                    .input(
                        Port::optional("mode", "string")
                            .with_default("first_match")
                            .with_options([json!("first_match"), json!("all_matches")]),
                    );
                for i in 0..SWITCH_OUTPUTS {
                    schema = schema.output(Port::out(format!("output_{i}"), "any"));
                }
                schema.output(
                    Port::out("fallback", "any").with_tooltip("Activated when no rule matches"),
                )
            },
            construct: || Arc::new(Switch),
        },
        NodeRegistration {
            type_name: "MergeNode",
            category: "control",
            null_tolerant: true,
            schema: {
                let mut schema = NodeSchema::new()
                    .input(Port::optional("input_count", "number").with_default(3));
                for i in 0..MERGE_MAX_INPUTS {
                    schema = schema.input(Port::optional(format!("input_{i}"), "any"));
                }
                schema
                    .output(Port::out("output", "any"))
                    .output(Port::out("selected_index", "number"))
                    .output(Port::out("has_result", "boolean"))
            },
            construct: || Arc::new(Merge),
        },
        NodeRegistration {
            type_name: "PassThroughNode",
            category: "control",
            null_tolerant: true,
            schema: NodeSchema::new()
                .input(Port::required("data", "any").with_tooltip("Data to forward"))
                .input(
                    Port::optional("control", "any")
                        .with_tooltip("Forward only while this signal is non-null"),
                )
                .input(Port::optional("pass_on_empty", "boolean").with_default(false))
                .output(Port::out("output", "any")),
            construct: || Arc::new(PassThrough),
        },
        NodeRegistration {
            type_name: "ForEachItemNode",
            category: "control",
            null_tolerant: false,
            schema: NodeSchema::new()
                .input(
                    Port::required("foreach_item", "any")
                        .with_tooltip("Current item injected by a ForEach loop"),
                )
                .input(Port::optional("foreach_index", "number").with_default(0))
                .output(Port::out("item", "any"))
                .output(Port::out("index", "number")),
            construct: || Arc::new(ForEachItem),
        },
    ]
}

/// One routing rule of a SwitchNode.
struct SwitchRule {
    field: String,
    operator: String,
    value: Value,
    output_index: usize,
}

struct Switch;

impl Switch {
    fn parse_rules(raw: &Value) -> Vec<SwitchRule> {
        // A JSON string is accepted and parsed first.
        let parsed;
        let rules = match raw {
            Value::String(s) => match serde_json::from_str::<Value>(s) {
                Ok(value) => {
                    parsed = value;
                    &parsed
                }
                Err(e) => {
                    warn!("SwitchNode: rules string is not valid JSON: {}", e);
                    return Vec::new();
                }
            },
            other => other,
        };

        let Value::Array(items) = rules else {
            warn!("SwitchNode: rules must be an array");
            return Vec::new();
        };

        items
            .iter()
            .enumerate()
            .filter_map(|(i, item)| {
                let Value::Object(rule) = item else {
                    warn!("SwitchNode: rule {} is not an object, skipping", i);
                    return None;
                };
                Some(SwitchRule {
                    field: rule.get("field").and_then(Value::as_str).unwrap_or("").to_string(),
                    operator: rule
                        .get("operator")
                        .and_then(Value::as_str)
                        .unwrap_or("equals")
                        .to_string(),
                    value: rule.get("value").cloned().unwrap_or(Value::Null),
                    output_index: rule
                        .get("output_index")
                        .and_then(Value::as_u64)
                        .map(|n| n as usize)
                        .unwrap_or(i % SWITCH_OUTPUTS),
                })
            })
            .collect()
    }

    /// Dotted-path lookup with numeric indices for arrays. Missing keys
    /// yield `Null`.
    fn nested_value<'a>(data: &'a Value, path: &str) -> &'a Value {
        let mut current = data;
        for key in path.split('.') {
            current = match current {
                Value::Object(map) => map.get(key).unwrap_or(&Value::Null),
                Value::Array(items) => match key.parse::<usize>() {
                    Ok(index) => items.get(index).unwrap_or(&Value::Null),
                    Err(_) => &Value::Null,
                },
                _ => &Value::Null,
            };
        }
        current
    }

    fn numbers(a: &Value, b: &Value) -> Option<(f64, f64)> {
        Some((a.as_f64()?, b.as_f64()?))
    }

    fn evaluate(rule: &SwitchRule, data: &Value) -> bool {
        let field_value = Self::nested_value(data, &rule.field);
        let expected = &rule.value;

        match rule.operator.as_str() {
            "equals" => field_value == expected,
            "not_equals" => field_value != expected,
            "greater" => Self::numbers(field_value, expected).is_some_and(|(a, b)| a > b),
            "greater_equal" => Self::numbers(field_value, expected).is_some_and(|(a, b)| a >= b),
            "less" => Self::numbers(field_value, expected).is_some_and(|(a, b)| a < b),
            "less_equal" => Self::numbers(field_value, expected).is_some_and(|(a, b)| a <= b),
            "contains" => display_string(field_value).contains(&display_string(expected)),
            "not_contains" => !display_string(field_value).contains(&display_string(expected)),
            "starts_with" => display_string(field_value).starts_with(&display_string(expected)),
            "ends_with" => display_string(field_value).ends_with(&display_string(expected)),
            "regex" => match Regex::new(&display_string(expected)) {
                Ok(re) => re.is_match(&display_string(field_value)),
                Err(e) => {
                    warn!("SwitchNode: invalid regex in rule: {}", e);
                    false
                }
            },
            "is_empty" => !is_truthy(field_value),
            "is_not_empty" => is_truthy(field_value),
            other => {
                warn!("SwitchNode: unsupported operator '{}'", other);
                false
            }
        }
    }
}

#[async_trait]
impl NodeBehavior for Switch {
    async fn process(&self, inputs: &JsonMap, _ctx: &NodeContext) -> Result<JsonMap, NodeError> {
        let data = inputs
            .get("data")
            .cloned()
            .ok_or_else(|| NodeError::MissingRequiredInput("data".to_string()))?;
        let rules_raw = inputs.get("rules").cloned().unwrap_or(json!([]));
        let mode = opt_str(inputs, "mode").unwrap_or("first_match");

        let rules = Self::parse_rules(&rules_raw);

        // Null marks a branch that must not run downstream.
        let mut outputs = JsonMap::new();
        for i in 0..SWITCH_OUTPUTS {
            outputs.insert(format!("output_{i}"), Value::Null);
        }
        outputs.insert("fallback".to_string(), Value::Null);

        let mut matched = false;
        for rule in &rules {
            if !Self::evaluate(rule, &data) {
                continue;
            }
            let key = format!("output_{}", rule.output_index);
            if !outputs.contains_key(&key) {
                warn!("SwitchNode: rule targets unknown output index {}", rule.output_index);
                continue;
            }
            outputs.insert(key, data.clone());
            matched = true;
            if mode == "first_match" {
                break;
            }
        }

        if !matched {
            outputs.insert("fallback".to_string(), data);
        }

        Ok(outputs)
    }
}

struct Merge;

#[async_trait]
impl NodeBehavior for Merge {
    async fn process(&self, inputs: &JsonMap, _ctx: &NodeContext) -> Result<JsonMap, NodeError> {
        let count = opt_u64(inputs, "input_count")
            .map(|n| n as usize)
            .unwrap_or(3)
            .min(MERGE_MAX_INPUTS);

        let mut selected: Option<(usize, Value)> = None;
        for i in 0..count {
            if let Some(value) = inputs.get(&format!("input_{i}")) {
                if !value.is_null() {
                    selected = Some((i, value.clone()));
                    break;
                }
            }
        }

        let mut out = JsonMap::new();
        match selected {
            Some((index, value)) => {
                out.insert("output".to_string(), value);
                out.insert("selected_index".to_string(), json!(index));
                out.insert("has_result".to_string(), json!(true));
            }
            None => {
                out.insert("output".to_string(), Value::Null);
                out.insert("selected_index".to_string(), json!(-1));
                out.insert("has_result".to_string(), json!(false));
            }
        }
        Ok(out)
    }
}

struct PassThrough;

#[async_trait]
impl NodeBehavior for PassThrough {
    async fn process(&self, inputs: &JsonMap, _ctx: &NodeContext) -> Result<JsonMap, NodeError> {
        let data = inputs
            .get("data")
            .cloned()
            .ok_or_else(|| NodeError::MissingRequiredInput("data".to_string()))?;
        let control_present = inputs.get("control").is_some_and(|v| !v.is_null());
        let pass_on_empty = inputs
            .get("pass_on_empty")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        let mut out = JsonMap::new();
        if control_present || pass_on_empty {
            out.insert("output".to_string(), data);
        } else {
            out.insert("output".to_string(), Value::Null);
        }
        Ok(out)
    }
}

struct ForEachItem;

#[async_trait]
impl NodeBehavior for ForEachItem {
    async fn process(&self, inputs: &JsonMap, _ctx: &NodeContext) -> Result<JsonMap, NodeError> {
        let item = inputs
            .get("foreach_item")
            .cloned()
            .ok_or_else(|| NodeError::MissingRequiredInput("foreach_item".to_string()))?;
        let index = inputs.get("foreach_index").cloned().unwrap_or(json!(0));

        let mut out = JsonMap::new();
        out.insert("item".to_string(), item);
        out.insert("index".to_string(), index);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::workflow::testing::test_env;

    async fn run(type_name: &str, inputs: serde_json::Value) -> JsonMap {
        let env = test_env();
        let node = env.registry.create(type_name, None).unwrap();
        let ctx = NodeContext {
            node_id: node.id.clone(),
            task_id: None,
            env: Arc::clone(&env),
            cancel: tokio_util::sync::CancellationToken::new(),
        };
        let Value::Object(inputs) = inputs else { panic!("inputs must be an object") };
        node.behavior().process(&inputs, &ctx).await.unwrap()
    }

    #[tokio::test]
    async fn switch_first_match_routes_once() {
        let out = run(
            "SwitchNode",
            json!({
                "data": {"score": 95},
                "rules": [
                    {"field": "score", "operator": "greater", "value": 80, "output_index": 0},
                    {"field": "score", "operator": "greater", "value": 50, "output_index": 1}
                ],
                "mode": "first_match"
            }),
        )
        .await;

        assert_eq!(out["output_0"], json!({"score": 95}));
        assert_eq!(out["output_1"], Value::Null);
        assert_eq!(out["fallback"], Value::Null);
    }

    #[tokio::test]
    async fn switch_all_matches_routes_every_hit() {
        let out = run(
            "SwitchNode",
            json!({
                "data": {"score": 95},
                "rules": [
                    {"field": "score", "operator": "greater", "value": 80, "output_index": 0},
                    {"field": "score", "operator": "greater", "value": 50, "output_index": 1}
                ],
                "mode": "all_matches"
            }),
        )
        .await;

        assert_eq!(out["output_0"], json!({"score": 95}));
        assert_eq!(out["output_1"], json!({"score": 95}));
    }

    #[tokio::test]
    async fn switch_without_match_uses_fallback() {
        let out = run(
            "SwitchNode",
            json!({
                "data": {"score": 10},
                "rules": [{"field": "score", "operator": "greater", "value": 80, "output_index": 0}]
            }),
        )
        .await;

        assert_eq!(out["output_0"], Value::Null);
        assert_eq!(out["fallback"], json!({"score": 10}));
    }

    #[tokio::test]
    async fn switch_resolves_dotted_paths_and_array_indices() {
        let out = run(
            "SwitchNode",
            json!({
                "data": {"items": [{"name": "first"}, {"name": "second"}]},
                "rules": [{"field": "items.1.name", "operator": "equals", "value": "second", "output_index": 2}]
            }),
        )
        .await;

        assert_eq!(out["output_2"], json!({"items": [{"name": "first"}, {"name": "second"}]}));
    }

    #[tokio::test]
    async fn switch_missing_field_yields_null_and_no_match() {
        let out = run(
            "SwitchNode",
            json!({
                "data": {"a": 1},
                "rules": [{"field": "b.c", "operator": "is_not_empty", "output_index": 0}]
            }),
        )
        .await;

        assert_eq!(out["output_0"], Value::Null);
        assert_eq!(out["fallback"], json!({"a": 1}));
    }

    #[tokio::test]
    async fn switch_string_operators() {
        let out = run(
            "SwitchNode",
            json!({
                "data": {"name": "workflow-42"},
                "rules": [
                    {"field": "name", "operator": "starts_with", "value": "workflow", "output_index": 0},
                    {"field": "name", "operator": "regex", "value": "\\d+$", "output_index": 1}
                ],
                "mode": "all_matches"
            }),
        )
        .await;

        assert_eq!(out["output_0"], json!({"name": "workflow-42"}));
        assert_eq!(out["output_1"], json!({"name": "workflow-42"}));
    }

    #[tokio::test]
    async fn merge_selects_first_non_null() {
        let out = run(
            "MergeNode",
            json!({"input_count": 3, "input_0": null, "input_1": {"v": 1}, "input_2": {"v": 2}}),
        )
        .await;

        assert_eq!(out["output"], json!({"v": 1}));
        assert_eq!(out["selected_index"], json!(1));
        assert_eq!(out["has_result"], json!(true));
    }

    #[tokio::test]
    async fn merge_with_all_null_reports_no_result() {
        let out = run(
            "MergeNode",
            json!({"input_count": 2, "input_0": null, "input_1": null}),
        )
        .await;

        assert_eq!(out["output"], Value::Null);
        assert_eq!(out["selected_index"], json!(-1));
        assert_eq!(out["has_result"], json!(false));
    }

    #[tokio::test]
    async fn pass_through_gates_on_control() {
        let out = run("PassThroughNode", json!({"data": "payload", "control": "go"})).await;
        assert_eq!(out["output"], json!("payload"));

        let out = run("PassThroughNode", json!({"data": "payload", "control": null})).await;
        assert_eq!(out["output"], Value::Null);

        let out = run(
            "PassThroughNode",
            json!({"data": "payload", "control": null, "pass_on_empty": true}),
        )
        .await;
        assert_eq!(out["output"], json!("payload"));
    }
}
