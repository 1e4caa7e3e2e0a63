//! Text processing nodes.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::error::NodeError;
use crate::registry::NodeRegistration;
use crate::workflow::node::{JsonMap, NodeBehavior, NodeContext, NodeSchema, opt_str, opt_u64};
use crate::workflow::nodes::display_string;
use crate::workflow::port::Port;

pub(super) fn registrations() -> Vec<NodeRegistration> {
    vec![
        NodeRegistration {
            type_name: "TextStripNode",
            category: "text_process",
            null_tolerant: false,
            schema: NodeSchema::new()
                .input(Port::required("text", "string").with_tooltip("Text to strip"))
                .output(Port::out("text", "string")),
            construct: || Arc::new(TextStrip),
        },
        NodeRegistration {
            type_name: "TextRemoveEmptyLinesNode",
            category: "text_process",
            null_tolerant: false,
            schema: NodeSchema::new()
                .input(Port::required("text", "string"))
                .output(Port::out("text", "string")),
            construct: || Arc::new(TextRemoveEmptyLines),
        },
        NodeRegistration {
            type_name: "TextSplitNode",
            category: "text_process",
            null_tolerant: false,
            schema: NodeSchema::new()
                .input(Port::required("text", "string"))
                .input(Port::optional("delimiter", "string").with_default("\n"))
                .input(
                    Port::optional("max_splits", "number")
                        .with_tooltip("Maximum number of segments to create (default: unlimited)"),
                )
                .output(Port::out("segments", "array"))
                .output(Port::out("count", "number")),
            construct: || Arc::new(TextSplit),
        },
        NodeRegistration {
            type_name: "TextRepeatNode",
            category: "text_process",
            null_tolerant: false,
            schema: NodeSchema::new()
                .input(Port::required("text", "string"))
                .input(Port::optional("repeat_count", "number").with_default(1))
                .output(Port::out("list", "array")),
            construct: || Arc::new(TextRepeat),
        },
        NodeRegistration {
            type_name: "TextCombinerNode",
            category: "text_process",
            null_tolerant: false,
            schema: NodeSchema::new()
                .input(
                    Port::required("prompt", "string")
                        .with_tooltip("Template with variables like {text_a}, {text_b}, {text_c}"),
                )
                .input(Port::optional("text_a", "string").with_default(""))
                .input(Port::optional("text_b", "string").with_default(""))
                .input(Port::optional("text_c", "string").with_default(""))
                .output(Port::out("combined_text", "string"))
                .output(Port::out("used_variables", "object")),
            construct: || Arc::new(TextCombiner),
        },
        NodeRegistration {
            type_name: "TextToDictNode",
            category: "text_process",
            null_tolerant: false,
            schema: NodeSchema::new()
                .input(Port::required("text", "string"))
                .input(
                    Port::optional("format", "string")
                        .with_default("json")
                        .with_options([json!("json"), json!("key_value")]),
                )
                .input(Port::optional("separator", "string").with_default("\n"))
                .input(Port::optional("key_value_delimiter", "string").with_default(":"))
                .output(Port::out("dict", "any")),
            construct: || Arc::new(TextToDict),
        },
        NodeRegistration {
            type_name: "TextToListNode",
            category: "text_process",
            null_tolerant: false,
            schema: NodeSchema::new()
                .input(Port::required("text", "string"))
                .input(
                    Port::optional("format", "string")
                        .with_default("json")
                        .with_options([json!("json"), json!("delimited")]),
                )
                .input(Port::optional("delimiter", "string").with_default(","))
                .input(Port::optional("trim_items", "boolean").with_default(true))
                .input(Port::optional("skip_empty", "boolean").with_default(true))
                .output(Port::out("list", "any")),
            construct: || Arc::new(TextToList),
        },
        NodeRegistration {
            type_name: "TextReplaceNode",
            category: "text_process",
            null_tolerant: false,
            schema: NodeSchema::new()
                .input(Port::required("text", "string"))
                .input(Port::required("old_text", "string"))
                .input(Port::optional("new_text", "string"))
                .input(
                    Port::optional("count", "number")
                        .with_tooltip("Maximum replacements; -1 or absent for unlimited"),
                )
                .input(
                    Port::optional("direction", "string")
                        .with_options([json!("all"), json!("start"), json!("end")]),
                )
                .output(Port::out("replaced_text", "string"))
                .output(Port::out("replacement_count", "number")),
            construct: || Arc::new(TextReplace),
        },
    ]
}

fn text_input(inputs: &JsonMap, name: &str) -> Result<String, NodeError> {
    inputs
        .get(name)
        .map(display_string)
        .ok_or_else(|| NodeError::MissingRequiredInput(name.to_string()))
}

struct TextStrip;

#[async_trait]
impl NodeBehavior for TextStrip {
    async fn process(&self, inputs: &JsonMap, _ctx: &NodeContext) -> Result<JsonMap, NodeError> {
        let text = text_input(inputs, "text")?;
        let mut out = JsonMap::new();
        out.insert("text".to_string(), json!(text.trim()));
        Ok(out)
    }
}

struct TextRemoveEmptyLines;

#[async_trait]
impl NodeBehavior for TextRemoveEmptyLines {
    async fn process(&self, inputs: &JsonMap, _ctx: &NodeContext) -> Result<JsonMap, NodeError> {
        let text = text_input(inputs, "text")?;
        let cleaned: Vec<&str> = text.lines().filter(|line| !line.trim().is_empty()).collect();
        let mut out = JsonMap::new();
        out.insert("text".to_string(), json!(cleaned.join("\n")));
        Ok(out)
    }
}

struct TextSplit;

#[async_trait]
impl NodeBehavior for TextSplit {
    async fn process(&self, inputs: &JsonMap, _ctx: &NodeContext) -> Result<JsonMap, NodeError> {
        let text = text_input(inputs, "text")?;
        let delimiter = opt_str(inputs, "delimiter").unwrap_or("\n").to_string();
        if delimiter.is_empty() {
            return Err(NodeError::InvalidInput {
                port: "delimiter".to_string(),
                reason: "delimiter must not be empty".to_string(),
            });
        }

        // max_splits bounds the number of resulting segments, not the
        // number of cuts; zero means unlimited.
        let segments: Vec<Value> = match opt_u64(inputs, "max_splits") {
            Some(max) if max > 0 => text
                .splitn(max as usize, &delimiter)
                .map(|s| json!(s))
                .collect(),
            _ => text.split(&delimiter).map(|s| json!(s)).collect(),
        };

        let mut out = JsonMap::new();
        out.insert("count".to_string(), json!(segments.len()));
        out.insert("segments".to_string(), Value::Array(segments));
        Ok(out)
    }
}

struct TextRepeat;

#[async_trait]
impl NodeBehavior for TextRepeat {
    async fn process(&self, inputs: &JsonMap, _ctx: &NodeContext) -> Result<JsonMap, NodeError> {
        let text = text_input(inputs, "text")?;
        let count = opt_u64(inputs, "repeat_count").unwrap_or(1);
        let list: Vec<Value> = (0..count).map(|_| json!(text)).collect();
        let mut out = JsonMap::new();
        out.insert("list".to_string(), Value::Array(list));
        Ok(out)
    }
}

struct TextCombiner;

#[async_trait]
impl NodeBehavior for TextCombiner {
    async fn process(&self, inputs: &JsonMap, _ctx: &NodeContext) -> Result<JsonMap, NodeError> {
        let prompt = text_input(inputs, "prompt")?;

        let mut combined = prompt.clone();
        let mut used = JsonMap::new();
        for name in ["text_a", "text_b", "text_c"] {
            let placeholder = format!("{{{name}}}");
            let present = prompt.contains(&placeholder);
            used.insert(name.to_string(), json!(present));
            if present {
                let value = inputs.get(name).map(display_string).unwrap_or_default();
                combined = combined.replace(&placeholder, &value);
            }
        }

        let mut out = JsonMap::new();
        out.insert("combined_text".to_string(), json!(combined));
        out.insert("used_variables".to_string(), Value::Object(used));
        Ok(out)
    }
}

struct TextToDict;

#[async_trait]
impl NodeBehavior for TextToDict {
    async fn process(&self, inputs: &JsonMap, _ctx: &NodeContext) -> Result<JsonMap, NodeError> {
        let text = text_input(inputs, "text")?;
        let format = opt_str(inputs, "format").unwrap_or("json");

        let dict = match format {
            "json" => match serde_json::from_str::<Value>(&text) {
                Ok(Value::Object(map)) => Value::Object(map),
                Ok(_) => {
                    return Err(NodeError::InvalidInput {
                        port: "text".to_string(),
                        reason: "JSON text must represent an object".to_string(),
                    });
                }
                Err(e) => {
                    return Err(NodeError::InvalidInput {
                        port: "text".to_string(),
                        reason: format!("invalid JSON: {e}"),
                    });
                }
            },
            "key_value" => {
                let separator = opt_str(inputs, "separator").unwrap_or("\n").to_string();
                let delimiter = opt_str(inputs, "key_value_delimiter").unwrap_or(":").to_string();

                let mut map = JsonMap::new();
                for line in text.split(&separator) {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    let Some((key, value)) = line.split_once(&delimiter) else {
                        return Err(NodeError::InvalidInput {
                            port: "text".to_string(),
                            reason: format!("line '{line}' does not contain delimiter '{delimiter}'"),
                        });
                    };
                    // Values that parse as JSON become nested structures.
                    let value = value.trim();
                    let parsed = serde_json::from_str::<Value>(value)
                        .unwrap_or_else(|_| json!(value));
                    map.insert(key.trim().to_string(), parsed);
                }
                Value::Object(map)
            }
            other => {
                return Err(NodeError::InvalidInput {
                    port: "format".to_string(),
                    reason: format!("unsupported format '{other}'"),
                });
            }
        };

        let mut out = JsonMap::new();
        out.insert("dict".to_string(), dict);
        Ok(out)
    }
}

struct TextToList;

#[async_trait]
impl NodeBehavior for TextToList {
    async fn process(&self, inputs: &JsonMap, _ctx: &NodeContext) -> Result<JsonMap, NodeError> {
        let text = text_input(inputs, "text")?;
        let format = opt_str(inputs, "format").unwrap_or("json");

        let list = match format {
            "json" => match serde_json::from_str::<Value>(&text) {
                Ok(Value::Array(items)) => Value::Array(items),
                Ok(_) => {
                    return Err(NodeError::InvalidInput {
                        port: "text".to_string(),
                        reason: "JSON text must represent an array".to_string(),
                    });
                }
                Err(e) => {
                    return Err(NodeError::InvalidInput {
                        port: "text".to_string(),
                        reason: format!("invalid JSON: {e}"),
                    });
                }
            },
            "delimited" => {
                let delimiter = opt_str(inputs, "delimiter").unwrap_or(",").to_string();
                let trim_items = inputs
                    .get("trim_items")
                    .and_then(Value::as_bool)
                    .unwrap_or(true);
                let skip_empty = inputs
                    .get("skip_empty")
                    .and_then(Value::as_bool)
                    .unwrap_or(true);

                let mut items = Vec::new();
                for raw in text.split(&delimiter) {
                    let item = if trim_items { raw.trim() } else { raw };
                    if skip_empty && item.is_empty() {
                        continue;
                    }
                    let parsed =
                        serde_json::from_str::<Value>(item).unwrap_or_else(|_| json!(item));
                    items.push(parsed);
                }
                Value::Array(items)
            }
            other => {
                return Err(NodeError::InvalidInput {
                    port: "format".to_string(),
                    reason: format!("unsupported format '{other}'"),
                });
            }
        };

        let mut out = JsonMap::new();
        out.insert("list".to_string(), list);
        Ok(out)
    }
}

struct TextReplace;

#[async_trait]
impl NodeBehavior for TextReplace {
    async fn process(&self, inputs: &JsonMap, _ctx: &NodeContext) -> Result<JsonMap, NodeError> {
        let text = text_input(inputs, "text")?;
        let old_text = text_input(inputs, "old_text")?;
        let new_text = inputs.get("new_text").map(display_string).unwrap_or_default();
        let count = inputs
            .get("count")
            .and_then(Value::as_i64)
            .unwrap_or(-1);
        let direction = opt_str(inputs, "direction").unwrap_or("all").to_lowercase();

        if !matches!(direction.as_str(), "all" | "start" | "end") {
            return Err(NodeError::InvalidInput {
                port: "direction".to_string(),
                reason: "direction must be 'all', 'start', or 'end'".to_string(),
            });
        }

        if old_text.is_empty() {
            let mut out = JsonMap::new();
            out.insert("replaced_text".to_string(), json!(text));
            out.insert("replacement_count".to_string(), json!(0));
            return Ok(out);
        }

        let total = text.matches(&old_text).count();

        // An unlimited count always replaces everything left-to-right,
        // whatever the direction says.
        let (replaced, made) = if direction == "end" && count >= 0 {
            // At most one replacement per occurrence in the original
            // text, even when new_text reintroduces the needle.
            let cap = total.min(count as usize);
            let mut replaced = text.clone();
            let mut made = 0usize;
            while made < cap {
                match replaced.rfind(&old_text) {
                    Some(pos) => {
                        replaced.replace_range(pos..pos + old_text.len(), &new_text);
                        made += 1;
                    }
                    None => break,
                }
            }
            (replaced, made)
        } else {
            // "all" and "start" replace left-to-right.
            let limit = if count < 0 { total } else { count as usize };
            let made = total.min(limit);
            (text.replacen(&old_text, &new_text, made), made)
        };

        let mut out = JsonMap::new();
        out.insert("replaced_text".to_string(), json!(replaced));
        out.insert("replacement_count".to_string(), json!(made));
        Ok(out)
    }
}
