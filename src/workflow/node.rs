//! Node schema, node instances, and the behavior trait node types implement.
//!
//! A node type publishes a static [`NodeSchema`] through its registration, so
//! the catalog can be enumerated without instantiating anything. Behaviors
//! are stateless: the executor hands each invocation its effective inputs
//! and a context carrying the shared execution environment.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::callback::CallbackCoordinator;
use crate::client::ServiceClient;
use crate::error::NodeError;
use crate::registry::NodeRegistry;
use crate::workflow::port::Port;

/// JSON object map used for node inputs and outputs.
pub type JsonMap = serde_json::Map<String, Value>;

/// Static port schema of a node type.
#[derive(Debug, Clone, Default)]
pub struct NodeSchema {
    pub inputs: Vec<Port>,
    pub outputs: Vec<Port>,
}

impl NodeSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn input(mut self, port: Port) -> Self {
        self.inputs.push(port);
        self
    }

    pub fn output(mut self, port: Port) -> Self {
        self.outputs.push(port);
        self
    }

    pub fn input_port(&self, name: &str) -> Option<&Port> {
        self.inputs.iter().find(|p| p.name == name)
    }

    pub fn output_port(&self, name: &str) -> Option<&Port> {
        self.outputs.iter().find(|p| p.name == name)
    }
}

/// Shared services available to every node during one workflow execution.
pub struct ExecutionEnv {
    pub registry: Arc<NodeRegistry>,
    pub coordinator: Arc<CallbackCoordinator>,
    pub client: ServiceClient,
}

/// Per-invocation context handed to a node's behavior.
pub struct NodeContext {
    pub node_id: String,
    /// Job id of the owning job, when the workflow runs on behalf of one.
    pub task_id: Option<String>,
    pub env: Arc<ExecutionEnv>,
    pub cancel: CancellationToken,
}

/// The processing function of a node type.
///
/// Returns a map from output-port name to value; ports the behavior leaves
/// out are recorded as `Null` by the executor.
#[async_trait]
pub trait NodeBehavior: Send + Sync {
    async fn process(&self, inputs: &JsonMap, ctx: &NodeContext) -> Result<JsonMap, NodeError>;
}

/// A node bound into one workflow execution. Never reused across runs.
pub struct NodeInstance {
    pub id: String,
    pub type_name: String,
    pub category: String,
    pub null_tolerant: bool,
    pub schema: NodeSchema,
    pub input_values: JsonMap,
    behavior: Arc<dyn NodeBehavior>,
}

impl std::fmt::Debug for NodeInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeInstance")
            .field("id", &self.id)
            .field("type_name", &self.type_name)
            .field("category", &self.category)
            .field("null_tolerant", &self.null_tolerant)
            .field("schema", &self.schema)
            .field("input_values", &self.input_values)
            .finish()
    }
}

impl NodeInstance {
    pub fn new(
        id: String,
        type_name: String,
        category: String,
        null_tolerant: bool,
        schema: NodeSchema,
        behavior: Arc<dyn NodeBehavior>,
    ) -> Self {
        Self {
            id,
            type_name,
            category,
            null_tolerant,
            schema,
            input_values: JsonMap::new(),
            behavior,
        }
    }

    pub fn behavior(&self) -> Arc<dyn NodeBehavior> {
        Arc::clone(&self.behavior)
    }
}

/// Substitute defaults for required inputs that are absent, and fail on
/// required inputs with no value and no default.
///
/// Presence is what counts: a wired `Null` satisfies a required port (the
/// skip predicate has already dealt with nulls for non-tolerant nodes).
pub fn apply_required_defaults(schema: &NodeSchema, inputs: &mut JsonMap) -> Result<(), NodeError> {
    for port in &schema.inputs {
        if !port.required || inputs.contains_key(&port.name) {
            continue;
        }
        match &port.default {
            Some(default) if !default.is_null() => {
                inputs.insert(port.name.clone(), default.clone());
            }
            _ => return Err(NodeError::MissingRequiredInput(port.name.clone())),
        }
    }
    Ok(())
}

// -- Input accessors --
//
// Read-time fallbacks for optional ports, mirroring how behaviors consume
// their input maps.

pub fn req_str<'a>(inputs: &'a JsonMap, name: &str) -> Result<&'a str, NodeError> {
    match inputs.get(name) {
        Some(Value::String(s)) => Ok(s),
        Some(other) => Err(NodeError::InvalidInput {
            port: name.to_string(),
            reason: format!("expected a string, got {}", type_label(other)),
        }),
        None => Err(NodeError::MissingRequiredInput(name.to_string())),
    }
}

pub fn opt_str<'a>(inputs: &'a JsonMap, name: &str) -> Option<&'a str> {
    inputs.get(name).and_then(Value::as_str)
}

pub fn req_array<'a>(inputs: &'a JsonMap, name: &str) -> Result<&'a Vec<Value>, NodeError> {
    match inputs.get(name) {
        Some(Value::Array(items)) => Ok(items),
        Some(other) => Err(NodeError::InvalidInput {
            port: name.to_string(),
            reason: format!("expected an array, got {}", type_label(other)),
        }),
        None => Err(NodeError::MissingRequiredInput(name.to_string())),
    }
}

pub fn req_object<'a>(inputs: &'a JsonMap, name: &str) -> Result<&'a JsonMap, NodeError> {
    match inputs.get(name) {
        Some(Value::Object(map)) => Ok(map),
        Some(other) => Err(NodeError::InvalidInput {
            port: name.to_string(),
            reason: format!("expected an object, got {}", type_label(other)),
        }),
        None => Err(NodeError::MissingRequiredInput(name.to_string())),
    }
}

pub fn req_f64(inputs: &JsonMap, name: &str) -> Result<f64, NodeError> {
    match inputs.get(name) {
        Some(value) => value.as_f64().ok_or_else(|| NodeError::InvalidInput {
            port: name.to_string(),
            reason: format!("expected a number, got {}", type_label(value)),
        }),
        None => Err(NodeError::MissingRequiredInput(name.to_string())),
    }
}

pub fn opt_f64(inputs: &JsonMap, name: &str) -> Option<f64> {
    inputs.get(name).and_then(Value::as_f64)
}

pub fn opt_u64(inputs: &JsonMap, name: &str) -> Option<u64> {
    inputs.get(name).and_then(Value::as_u64)
}

pub fn opt_bool(inputs: &JsonMap, name: &str) -> Option<bool> {
    inputs.get(name).and_then(Value::as_bool)
}

pub fn type_label(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
