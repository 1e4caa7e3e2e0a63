//! List and dictionary processing nodes.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::error::NodeError;
use crate::registry::NodeRegistration;
use crate::workflow::node::{
    JsonMap, NodeBehavior, NodeContext, NodeSchema, req_array, req_object, req_str,
};
use crate::workflow::port::Port;

pub(super) fn registrations() -> Vec<NodeRegistration> {
    vec![
        NodeRegistration {
            type_name: "ListCreateNode",
            category: "list_process",
            null_tolerant: false,
            schema: {
                let mut schema = NodeSchema::new();
                for i in 1..=5 {
                    schema = schema.input(Port::optional(format!("value_{i}"), "any"));
                }
                schema
                    .output(Port::out("result", "array"))
                    .output(Port::out("length", "number"))
            },
            construct: || Arc::new(ListCreate),
        },
        NodeRegistration {
            type_name: "ListConcatNode",
            category: "list_process",
            null_tolerant: false,
            schema: NodeSchema::new()
                .input(Port::required("list_a", "array"))
                .input(Port::required("list_b", "array"))
                .output(Port::out("result", "array"))
                .output(Port::out("length", "number")),
            construct: || Arc::new(ListConcat),
        },
        NodeRegistration {
            type_name: "ListAppendNode",
            category: "list_process",
            null_tolerant: false,
            schema: NodeSchema::new()
                .input(Port::required("list", "array"))
                .input(Port::required("value", "any"))
                .output(Port::out("result", "array"))
                .output(Port::out("length", "number")),
            construct: || Arc::new(ListAppend),
        },
        NodeRegistration {
            type_name: "ListLengthNode",
            category: "list_process",
            null_tolerant: false,
            schema: NodeSchema::new()
                .input(Port::required("list", "array"))
                .output(Port::out("length", "number"))
                .output(Port::out("is_empty", "boolean")),
            construct: || Arc::new(ListLength),
        },
        NodeRegistration {
            type_name: "ListIndexNode",
            category: "list_process",
            null_tolerant: false,
            schema: NodeSchema::new()
                .input(Port::required("list", "array"))
                .input(
                    Port::required("index", "number")
                        .with_default(0)
                        .with_tooltip("Supports negative indices"),
                )
                .output(Port::out("value", "any"))
                .output(Port::out("exists", "boolean")),
            construct: || Arc::new(ListIndex),
        },
        NodeRegistration {
            type_name: "DictCreateNode",
            category: "dict_process",
            null_tolerant: false,
            schema: NodeSchema::new()
                .input(Port::optional("initial_data", "object"))
                .output(Port::out("dict", "object")),
            construct: || Arc::new(DictCreate),
        },
        NodeRegistration {
            type_name: "DictAddNode",
            category: "dict_process",
            null_tolerant: false,
            schema: NodeSchema::new()
                .input(Port::required("dict", "object"))
                .input(Port::required("key", "string"))
                .input(Port::required("value", "any"))
                .output(Port::out("updated_dict", "object")),
            construct: || Arc::new(DictAdd),
        },
        NodeRegistration {
            type_name: "DictGetNode",
            category: "dict_process",
            null_tolerant: false,
            schema: NodeSchema::new()
                .input(Port::required("dict", "object"))
                .input(Port::required("key", "string"))
                .input(Port::optional("default_value", "any"))
                .output(Port::out("value", "any"))
                .output(Port::out("exists", "boolean")),
            construct: || Arc::new(DictGet),
        },
        NodeRegistration {
            type_name: "DictMergeNode",
            category: "dict_process",
            null_tolerant: false,
            schema: NodeSchema::new()
                .input(Port::required("dict1", "object"))
                .input(Port::required("dict2", "object"))
                .input(Port::optional("dict3", "object"))
                .input(Port::optional("overwrite", "boolean"))
                .output(Port::out("merged_dict", "object")),
            construct: || Arc::new(DictMerge),
        },
    ]
}

struct ListCreate;

#[async_trait]
impl NodeBehavior for ListCreate {
    async fn process(&self, inputs: &JsonMap, _ctx: &NodeContext) -> Result<JsonMap, NodeError> {
        let mut result = Vec::new();
        for i in 1..=5 {
            if let Some(value) = inputs.get(&format!("value_{i}")) {
                if !value.is_null() {
                    result.push(value.clone());
                }
            }
        }

        let mut out = JsonMap::new();
        out.insert("length".to_string(), json!(result.len()));
        out.insert("result".to_string(), Value::Array(result));
        Ok(out)
    }
}

struct ListConcat;

#[async_trait]
impl NodeBehavior for ListConcat {
    async fn process(&self, inputs: &JsonMap, _ctx: &NodeContext) -> Result<JsonMap, NodeError> {
        let mut result = req_array(inputs, "list_a")?.clone();
        result.extend(req_array(inputs, "list_b")?.iter().cloned());

        let mut out = JsonMap::new();
        out.insert("length".to_string(), json!(result.len()));
        out.insert("result".to_string(), Value::Array(result));
        Ok(out)
    }
}

struct ListAppend;

#[async_trait]
impl NodeBehavior for ListAppend {
    async fn process(&self, inputs: &JsonMap, _ctx: &NodeContext) -> Result<JsonMap, NodeError> {
        let mut result = req_array(inputs, "list")?.clone();
        let value = inputs
            .get("value")
            .cloned()
            .ok_or_else(|| NodeError::MissingRequiredInput("value".to_string()))?;
        result.push(value);

        let mut out = JsonMap::new();
        out.insert("length".to_string(), json!(result.len()));
        out.insert("result".to_string(), Value::Array(result));
        Ok(out)
    }
}

struct ListLength;

#[async_trait]
impl NodeBehavior for ListLength {
    async fn process(&self, inputs: &JsonMap, _ctx: &NodeContext) -> Result<JsonMap, NodeError> {
        let list = req_array(inputs, "list")?;
        let mut out = JsonMap::new();
        out.insert("length".to_string(), json!(list.len()));
        out.insert("is_empty".to_string(), json!(list.is_empty()));
        Ok(out)
    }
}

struct ListIndex;

#[async_trait]
impl NodeBehavior for ListIndex {
    async fn process(&self, inputs: &JsonMap, _ctx: &NodeContext) -> Result<JsonMap, NodeError> {
        let list = req_array(inputs, "list")?;
        let index = inputs.get("index").and_then(Value::as_i64).unwrap_or(0);

        let actual = if index < 0 { list.len() as i64 + index } else { index };

        let mut out = JsonMap::new();
        if actual < 0 || actual >= list.len() as i64 {
            out.insert("value".to_string(), Value::Null);
            out.insert("exists".to_string(), json!(false));
        } else {
            out.insert("value".to_string(), list[actual as usize].clone());
            out.insert("exists".to_string(), json!(true));
        }
        Ok(out)
    }
}

struct DictCreate;

#[async_trait]
impl NodeBehavior for DictCreate {
    async fn process(&self, inputs: &JsonMap, _ctx: &NodeContext) -> Result<JsonMap, NodeError> {
        let dict = match inputs.get("initial_data") {
            Some(Value::Object(map)) => map.clone(),
            _ => JsonMap::new(),
        };
        let mut out = JsonMap::new();
        out.insert("dict".to_string(), Value::Object(dict));
        Ok(out)
    }
}

struct DictAdd;

#[async_trait]
impl NodeBehavior for DictAdd {
    async fn process(&self, inputs: &JsonMap, _ctx: &NodeContext) -> Result<JsonMap, NodeError> {
        let mut dict = req_object(inputs, "dict")?.clone();
        let key = req_str(inputs, "key")?.to_string();
        let value = inputs
            .get("value")
            .cloned()
            .ok_or_else(|| NodeError::MissingRequiredInput("value".to_string()))?;
        dict.insert(key, value);

        let mut out = JsonMap::new();
        out.insert("updated_dict".to_string(), Value::Object(dict));
        Ok(out)
    }
}

struct DictGet;

#[async_trait]
impl NodeBehavior for DictGet {
    async fn process(&self, inputs: &JsonMap, _ctx: &NodeContext) -> Result<JsonMap, NodeError> {
        let dict = req_object(inputs, "dict")?;
        let key = req_str(inputs, "key")?;
        let exists = dict.contains_key(key);
        let value = if exists {
            dict[key].clone()
        } else {
            inputs.get("default_value").cloned().unwrap_or(Value::Null)
        };

        let mut out = JsonMap::new();
        out.insert("value".to_string(), value);
        out.insert("exists".to_string(), json!(exists));
        Ok(out)
    }
}

struct DictMerge;

#[async_trait]
impl NodeBehavior for DictMerge {
    async fn process(&self, inputs: &JsonMap, _ctx: &NodeContext) -> Result<JsonMap, NodeError> {
        let overwrite = inputs
            .get("overwrite")
            .and_then(Value::as_bool)
            .unwrap_or(true);

        let mut merged = req_object(inputs, "dict1")?.clone();
        let mut merge_in = |other: &JsonMap| {
            for (key, value) in other {
                if overwrite || !merged.contains_key(key) {
                    merged.insert(key.clone(), value.clone());
                }
            }
        };

        merge_in(req_object(inputs, "dict2")?);
        if let Some(Value::Object(third)) = inputs.get("dict3") {
            merge_in(third);
        }

        let mut out = JsonMap::new();
        out.insert("merged_dict".to_string(), Value::Object(merged));
        Ok(out)
    }
}
