//! Nodes that assemble generation request payloads.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::error::NodeError;
use crate::registry::NodeRegistration;
use crate::workflow::node::{JsonMap, NodeBehavior, NodeContext, NodeSchema, req_str};
use crate::workflow::port::Port;

const INPUT_TYPES: [&str; 3] = ["image", "audio", "video"];

/// Arity of ConcatModelRequestInputNode.
const CONCAT_INPUTS: usize = 4;

pub(super) fn registrations() -> Vec<NodeRegistration> {
    vec![
        NodeRegistration {
            type_name: "ModelRequestInputNode",
            category: "model-request",
            null_tolerant: false,
            schema: NodeSchema::new()
                .input(Port::optional("url", "string").with_tooltip("Single input URL"))
                .input(Port::optional("urls", "array").with_tooltip("Batch of input URLs"))
                .input(
                    Port::required("type", "string")
                        .with_options(INPUT_TYPES.iter().map(|t| json!(t))),
                )
                .output(Port::out("input_list", "array")),
            construct: || Arc::new(ModelRequestInput),
        },
        NodeRegistration {
            type_name: "ConcatModelRequestInputNode",
            category: "model-request",
            null_tolerant: false,
            schema: {
                let mut schema = NodeSchema::new();
                for i in 0..CONCAT_INPUTS {
                    schema = schema.input(Port::optional(format!("input_{i}"), "array"));
                }
                schema.output(Port::out("input_list", "array"))
            },
            construct: || Arc::new(ConcatModelRequestInput),
        },
        NodeRegistration {
            type_name: "ModelRequestOptionNode",
            category: "model-request",
            null_tolerant: false,
            schema: NodeSchema::new()
                .input(Port::optional("prompt", "string").with_default(""))
                .input(Port::optional("audio_prompt", "string").with_default(""))
                .input(Port::optional("negative_prompt", "string").with_default(""))
                .input(Port::optional("width", "number").with_default(768))
                .input(Port::optional("height", "number").with_default(768))
                .input(Port::optional("batch_size", "number").with_default(1))
                .input(Port::optional("seed", "number"))
                .input(Port::optional("output_format", "string"))
                .input(Port::optional("extra_options", "object").with_default(json!({})))
                .output(Port::out("options", "object")),
            construct: || Arc::new(ModelRequestOption),
        },
        NodeRegistration {
            type_name: "ModelRequestNode",
            category: "model-request",
            null_tolerant: false,
            schema: NodeSchema::new()
                .input(Port::required("input_list", "array"))
                .input(Port::required("options", "object"))
                .output(Port::out("request", "object")),
            construct: || Arc::new(ModelRequest),
        },
    ]
}

/// Validate one `{type, url}` entry.
fn validate_entry(entry: &Value) -> Result<(), NodeError> {
    let invalid = |reason: String| NodeError::InvalidInput {
        port: "input_list".to_string(),
        reason,
    };
    let Value::Object(map) = entry else {
        return Err(invalid("each input item must be an object".to_string()));
    };
    let ty = map
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| invalid("each input item needs a 'type' field".to_string()))?;
    if !INPUT_TYPES.contains(&ty) {
        return Err(invalid(format!(
            "input type must be one of {INPUT_TYPES:?}, got '{ty}'"
        )));
    }
    let url = map
        .get("url")
        .and_then(Value::as_str)
        .ok_or_else(|| invalid("each input item needs a 'url' field".to_string()))?;
    if url.is_empty() {
        return Err(invalid("input URL must not be empty".to_string()));
    }
    Ok(())
}

struct ModelRequestInput;

#[async_trait]
impl NodeBehavior for ModelRequestInput {
    async fn process(&self, inputs: &JsonMap, _ctx: &NodeContext) -> Result<JsonMap, NodeError> {
        let input_type = req_str(inputs, "type")?;
        if !INPUT_TYPES.contains(&input_type) {
            return Err(NodeError::InvalidInput {
                port: "type".to_string(),
                reason: format!("must be one of {INPUT_TYPES:?}"),
            });
        }

        let url = inputs.get("url").and_then(Value::as_str).filter(|u| !u.is_empty());
        let urls = inputs.get("urls").and_then(Value::as_array);

        let input_list: Vec<Value> = match (url, urls) {
            (Some(_), Some(_)) => {
                return Err(NodeError::InvalidInput {
                    port: "urls".to_string(),
                    reason: "provide either 'url' or 'urls', not both".to_string(),
                });
            }
            (Some(url), None) => vec![json!({"type": input_type, "url": url})],
            (None, Some(urls)) if !urls.is_empty() => urls
                .iter()
                .map(|u| match u.as_str() {
                    Some(u) if !u.is_empty() => Ok(json!({"type": input_type, "url": u})),
                    _ => Err(NodeError::InvalidInput {
                        port: "urls".to_string(),
                        reason: "every URL must be a non-empty string".to_string(),
                    }),
                })
                .collect::<Result<_, _>>()?,
            _ => {
                return Err(NodeError::InvalidInput {
                    port: "url".to_string(),
                    reason: "either 'url' or a non-empty 'urls' is required".to_string(),
                });
            }
        };

        let mut out = JsonMap::new();
        out.insert("input_list".to_string(), Value::Array(input_list));
        Ok(out)
    }
}

struct ConcatModelRequestInput;

#[async_trait]
impl NodeBehavior for ConcatModelRequestInput {
    async fn process(&self, inputs: &JsonMap, _ctx: &NodeContext) -> Result<JsonMap, NodeError> {
        let mut combined = Vec::new();
        for i in 0..CONCAT_INPUTS {
            if let Some(Value::Array(items)) = inputs.get(&format!("input_{i}")) {
                combined.extend(items.iter().cloned());
            }
        }
        if combined.is_empty() {
            return Err(NodeError::ExecutionFailed(
                "no input lists to concatenate".to_string(),
            ));
        }

        let mut out = JsonMap::new();
        out.insert("input_list".to_string(), Value::Array(combined));
        Ok(out)
    }
}

struct ModelRequestOption;

#[async_trait]
impl NodeBehavior for ModelRequestOption {
    async fn process(&self, inputs: &JsonMap, _ctx: &NodeContext) -> Result<JsonMap, NodeError> {
        let mut options = JsonMap::new();
        options.insert(
            "prompt".to_string(),
            inputs.get("prompt").cloned().unwrap_or(json!("")),
        );
        options.insert(
            "audio_prompt".to_string(),
            inputs.get("audio_prompt").cloned().unwrap_or(json!("")),
        );
        options.insert(
            "negative_prompt".to_string(),
            inputs.get("negative_prompt").cloned().unwrap_or(json!("")),
        );
        options.insert(
            "width".to_string(),
            inputs.get("width").cloned().unwrap_or(json!(768)),
        );
        options.insert(
            "height".to_string(),
            inputs.get("height").cloned().unwrap_or(json!(768)),
        );
        options.insert(
            "batch_size".to_string(),
            inputs.get("batch_size").cloned().unwrap_or(json!(1)),
        );

        if let Some(seed) = inputs.get("seed").filter(|v| !v.is_null()) {
            options.insert("seed".to_string(), seed.clone());
        }
        if let Some(format) = inputs.get("output_format").filter(|v| !v.is_null()) {
            options.insert("output_format".to_string(), format.clone());
        }
        if let Some(Value::Object(extra)) = inputs.get("extra_options") {
            for (key, value) in extra {
                options.insert(key.clone(), value.clone());
            }
        }

        let mut out = JsonMap::new();
        out.insert("options".to_string(), Value::Object(options));
        Ok(out)
    }
}

struct ModelRequest;

#[async_trait]
impl NodeBehavior for ModelRequest {
    async fn process(&self, inputs: &JsonMap, _ctx: &NodeContext) -> Result<JsonMap, NodeError> {
        let input_list = inputs
            .get("input_list")
            .cloned()
            .ok_or_else(|| NodeError::MissingRequiredInput("input_list".to_string()))?;
        if let Value::Array(items) = &input_list {
            for item in items {
                validate_entry(item)?;
            }
        }
        let options = inputs
            .get("options")
            .cloned()
            .ok_or_else(|| NodeError::MissingRequiredInput("options".to_string()))?;

        let mut out = JsonMap::new();
        out.insert(
            "request".to_string(),
            json!({"input": input_list, "options": options}),
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
    async fn single_url_becomes_one_entry() {
        let out = run(
            "ModelRequestInputNode",
            json!({"type": "image", "url": "http://files/a.png"}),
        )
        .await
        .unwrap();
        assert_eq!(
            out["input_list"],
            json!([{"type": "image", "url": "http://files/a.png"}])
        );
    }

    #[tokio::test]
    async fn url_and_urls_are_mutually_exclusive() {
        let err = run(
            "ModelRequestInputNode",
            json!({"type": "image", "url": "a", "urls": ["b"]}),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, NodeError::InvalidInput { .. }));
    }

    #[tokio::test]
    async fn concat_merges_in_port_order() {
        let out = run(
            "ConcatModelRequestInputNode",
            json!({
                "input_0": [{"type": "image", "url": "a"}],
                "input_1": [{"type": "audio", "url": "b"}]
            }),
        )
        .await
        .unwrap();
        assert_eq!(
            out["input_list"],
            json!([{"type": "image", "url": "a"}, {"type": "audio", "url": "b"}])
        );
    }

    #[tokio::test]
    async fn options_merge_extras_over_basics() {
        let out = run(
            "ModelRequestOptionNode",
            json!({"prompt": "p", "extra_options": {"cfg": 7, "width": 1024}}),
        )
        .await
        .unwrap();
        let options = &out["options"];
        assert_eq!(options["prompt"], json!("p"));
        assert_eq!(options["cfg"], json!(7));
        assert_eq!(options["width"], json!(1024));
        assert!(options.get("seed").is_none());
    }

    #[tokio::test]
    async fn request_combines_inputs_and_options() {
        let out = run(
            "ModelRequestNode",
            json!({
                "input_list": [{"type": "video", "url": "v"}],
                "options": {"prompt": "p"}
            }),
        )
        .await
        .unwrap();
        assert_eq!(
            out["request"],
            json!({"input": [{"type": "video", "url": "v"}], "options": {"prompt": "p"}})
        );
    }
}
