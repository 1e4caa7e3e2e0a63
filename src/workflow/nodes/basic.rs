//! Basic value nodes: inputs, numeric validation, math, type conversion.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Number, Value, json};

use crate::error::NodeError;
use crate::registry::NodeRegistration;
use crate::workflow::node::{JsonMap, NodeBehavior, NodeContext, NodeSchema, req_str, type_label};
use crate::workflow::nodes::{display_string, is_truthy};
use crate::workflow::port::Port;

pub(super) fn registrations() -> Vec<NodeRegistration> {
    vec![
        NodeRegistration {
            type_name: "TextInputNode",
            category: "basic_types",
            null_tolerant: false,
            schema: NodeSchema::new()
                .input(
                    Port::required("text", "string")
                        .with_tooltip("Text content passed through unchanged"),
                )
                .output(Port::out("text", "string")),
            construct: || Arc::new(TextInput),
        },
        NodeRegistration {
            type_name: "IntInputNode",
            category: "basic_types",
            null_tolerant: false,
            schema: NodeSchema::new()
                .input(Port::required("value", "number").with_default(0))
                .output(Port::out("value", "number")),
            construct: || Arc::new(IntInput),
        },
        NodeRegistration {
            type_name: "FloatInputNode",
            category: "basic_types",
            null_tolerant: false,
            schema: NodeSchema::new()
                .input(Port::required("value", "number").with_default(0.0))
                .output(Port::out("value", "number")),
            construct: || Arc::new(FloatInput),
        },
        NodeRegistration {
            type_name: "BoolInputNode",
            category: "basic_types",
            null_tolerant: false,
            schema: NodeSchema::new()
                .input(Port::required("value", "boolean").with_default(false))
                .output(Port::out("value", "boolean")),
            construct: || Arc::new(BoolInput),
        },
        NodeRegistration {
            type_name: "MathOperationNode",
            category: "basic_types",
            null_tolerant: false,
            schema: NodeSchema::new()
                .input(Port::required("a", "number").with_default(0))
                .input(Port::required("b", "number").with_default(0))
                .input(
                    Port::required("operation", "string")
                        .with_default("add")
                        .with_options([json!("add"), json!("subtract"), json!("multiply"), json!("divide")]),
                )
                .output(Port::out("result", "number")),
            construct: || Arc::new(MathOperation),
        },
        NodeRegistration {
            type_name: "TypeConvertNode",
            category: "basic_types",
            null_tolerant: false,
            schema: NodeSchema::new()
                .input(Port::required("value", "any"))
                .input(
                    Port::required("from_type", "string")
                        .with_default("text")
                        .with_options([json!("float"), json!("int"), json!("text")]),
                )
                .input(
                    Port::required("to_type", "string")
                        .with_default("text")
                        .with_options([json!("float"), json!("int"), json!("text")]),
                )
                .output(Port::out("value", "any")),
            construct: || Arc::new(TypeConvert),
        },
    ]
}

/// Coerce a value to an integer the way loose workflow inputs expect.
pub(crate) fn coerce_i64(value: &Value, port: &str) -> Result<i64, NodeError> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .ok_or_else(|| invalid(port, value)),
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .or_else(|_| s.trim().parse::<f64>().map(|f| f as i64))
            .map_err(|_| invalid(port, value)),
        Value::Bool(b) => Ok(i64::from(*b)),
        _ => Err(invalid(port, value)),
    }
}

/// Coerce a value to a float.
pub(crate) fn coerce_f64(value: &Value, port: &str) -> Result<f64, NodeError> {
    match value {
        Value::Number(n) => n.as_f64().ok_or_else(|| invalid(port, value)),
        Value::String(s) => s.trim().parse::<f64>().map_err(|_| invalid(port, value)),
        Value::Bool(b) => Ok(f64::from(u8::from(*b))),
        _ => Err(invalid(port, value)),
    }
}

/// Whole floats come back as integers for cleaner output.
pub(crate) fn number_value(value: f64) -> Value {
    if value.fract() == 0.0 && value.is_finite() && value.abs() < i64::MAX as f64 {
        Value::Number(Number::from(value as i64))
    } else {
        Number::from_f64(value).map(Value::Number).unwrap_or(Value::Null)
    }
}

fn invalid(port: &str, value: &Value) -> NodeError {
    NodeError::InvalidInput {
        port: port.to_string(),
        reason: format!("cannot convert {} to a number", type_label(value)),
    }
}

struct TextInput;

#[async_trait]
impl NodeBehavior for TextInput {
    async fn process(&self, inputs: &JsonMap, _ctx: &NodeContext) -> Result<JsonMap, NodeError> {
        let text = inputs
            .get("text")
            .cloned()
            .ok_or_else(|| NodeError::MissingRequiredInput("text".to_string()))?;
        let mut out = JsonMap::new();
        out.insert("text".to_string(), text);
        Ok(out)
    }
}

struct IntInput;

#[async_trait]
impl NodeBehavior for IntInput {
    async fn process(&self, inputs: &JsonMap, _ctx: &NodeContext) -> Result<JsonMap, NodeError> {
        let value = inputs
            .get("value")
            .ok_or_else(|| NodeError::MissingRequiredInput("value".to_string()))?;
        let mut out = JsonMap::new();
        out.insert("value".to_string(), json!(coerce_i64(value, "value")?));
        Ok(out)
    }
}

struct FloatInput;

#[async_trait]
impl NodeBehavior for FloatInput {
    async fn process(&self, inputs: &JsonMap, _ctx: &NodeContext) -> Result<JsonMap, NodeError> {
        let value = inputs
            .get("value")
            .ok_or_else(|| NodeError::MissingRequiredInput("value".to_string()))?;
        let mut out = JsonMap::new();
        out.insert("value".to_string(), json!(coerce_f64(value, "value")?));
        Ok(out)
    }
}

struct BoolInput;

#[async_trait]
impl NodeBehavior for BoolInput {
    async fn process(&self, inputs: &JsonMap, _ctx: &NodeContext) -> Result<JsonMap, NodeError> {
        let value = inputs
            .get("value")
            .ok_or_else(|| NodeError::MissingRequiredInput("value".to_string()))?;
        let mut out = JsonMap::new();
        out.insert("value".to_string(), json!(is_truthy(value)));
        Ok(out)
    }
}

struct MathOperation;

#[async_trait]
impl NodeBehavior for MathOperation {
    async fn process(&self, inputs: &JsonMap, _ctx: &NodeContext) -> Result<JsonMap, NodeError> {
        let a = coerce_f64(inputs.get("a").unwrap_or(&json!(0)), "a")?;
        let b = coerce_f64(inputs.get("b").unwrap_or(&json!(0)), "b")?;
        let operation = req_str(inputs, "operation")?;

        let result = match operation {
            "add" => a + b,
            "subtract" => a - b,
            "multiply" => a * b,
            "divide" => {
                if b == 0.0 {
                    return Err(NodeError::InvalidInput {
                        port: "b".to_string(),
                        reason: "division by zero".to_string(),
                    });
                }
                a / b
            }
            other => {
                return Err(NodeError::InvalidInput {
                    port: "operation".to_string(),
                    reason: format!("unsupported operation '{other}'"),
                });
            }
        };

        let mut out = JsonMap::new();
        out.insert("result".to_string(), number_value(result));
        Ok(out)
    }
}

struct TypeConvert;

#[async_trait]
impl NodeBehavior for TypeConvert {
    async fn process(&self, inputs: &JsonMap, _ctx: &NodeContext) -> Result<JsonMap, NodeError> {
        let value = inputs
            .get("value")
            .ok_or_else(|| NodeError::MissingRequiredInput("value".to_string()))?;
        let from_type = req_str(inputs, "from_type")?;
        let to_type = req_str(inputs, "to_type")?;

        for (port, ty) in [("from_type", from_type), ("to_type", to_type)] {
            if !matches!(ty, "float" | "int" | "text") {
                return Err(NodeError::InvalidInput {
                    port: port.to_string(),
                    reason: format!("'{ty}' is not one of float, int, text"),
                });
            }
        }

        let converted = if from_type == to_type {
            value.clone()
        } else {
            match to_type {
                "int" => json!(coerce_i64(value, "value")?),
                "float" => json!(coerce_f64(value, "value")?),
                _ => Value::String(display_string(value)),
            }
        };

        let mut out = JsonMap::new();
        out.insert("value".to_string(), converted);
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
    async fn text_input_passes_through() {
        let out = run("TextInputNode", json!({"text": "hello"})).await.unwrap();
        assert_eq!(out["text"], json!("hello"));
    }

    #[tokio::test]
    async fn int_input_coerces_strings() {
        let out = run("IntInputNode", json!({"value": "42"})).await.unwrap();
        assert_eq!(out["value"], json!(42));

        let err = run("IntInputNode", json!({"value": "abc"})).await.unwrap_err();
        assert!(matches!(err, NodeError::InvalidInput { .. }));
    }

    #[tokio::test]
    async fn math_divide_by_zero_fails() {
        let out = run(
            "MathOperationNode",
            json!({"a": 6, "b": 2, "operation": "divide"}),
        )
        .await
        .unwrap();
        assert_eq!(out["result"], json!(3));

        let err = run(
            "MathOperationNode",
            json!({"a": 6, "b": 0, "operation": "divide"}),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, NodeError::InvalidInput { .. }));
    }

    #[tokio::test]
    async fn type_convert_round_trips() {
        let out = run(
            "TypeConvertNode",
            json!({"value": "3.5", "from_type": "text", "to_type": "float"}),
        )
        .await
        .unwrap();
        assert_eq!(out["value"], json!(3.5));

        let out = run(
            "TypeConvertNode",
            json!({"value": 7, "from_type": "int", "to_type": "text"}),
        )
        .await
        .unwrap();
        assert_eq!(out["value"], json!("7"));
    }
}
