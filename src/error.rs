//! Error types shared across the service.
//!
//! Each subsystem has its own enum; the HTTP layer maps them onto status
//! codes in `server::routes`.

use std::time::Duration;

use thiserror::Error;

/// Error type for node registry lookups.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("unknown node type '{0}'")]
    UnknownNodeType(String),
}

/// Errors raised while building a workflow graph from a definition.
///
/// Construction is transactional: any of these aborts the whole graph.
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("unknown node type '{0}'")]
    UnknownNodeType(String),

    #[error("duplicate node id '{0}'")]
    DuplicateNodeId(String),

    #[error("source node '{0}' does not exist in the graph")]
    MissingSourceNode(String),

    #[error("target node '{0}' does not exist in the graph")]
    MissingTargetNode(String),

    #[error("output port '{port}' not found on node '{node}'")]
    MissingOutputPort { node: String, port: String },

    #[error("input port '{port}' not found on node '{node}'")]
    MissingInputPort { node: String, port: String },

    #[error(
        "incompatible port types: {from_node}.{from_port} ({from_type}) -> {to_node}.{to_port} ({to_type})"
    )]
    IncompatiblePorts {
        from_node: String,
        from_port: String,
        from_type: String,
        to_node: String,
        to_port: String,
        to_type: String,
    },

    #[error("workflow graph contains a cycle through node '{0}'")]
    Cycle(String),

    #[error("invalid workflow definition: {0}")]
    InvalidDefinition(String),
}

/// Errors produced while executing a single node.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("required input '{0}' is missing")]
    MissingRequiredInput(String),

    #[error("invalid input '{port}': {reason}")]
    InvalidInput { port: String, reason: String },

    #[error("upstream node '{0}' has no recorded result")]
    MissingUpstream(String),

    #[error("remote service returned status {status}: {body}")]
    RemoteService { status: u16, body: String },

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("timed out waiting for callback for remote job '{0}'")]
    CallbackTimeout(String),

    #[error("callback handling failed: {0}")]
    CallbackFailed(String),

    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    #[error("cancelled")]
    Cancelled,
}

/// Errors surfaced by a whole workflow execution.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("node '{node_id}' failed: {source}")]
    NodeFailed {
        node_id: String,
        #[source]
        source: NodeError,
    },

    #[error("workflow cancelled")]
    Cancelled,
}

/// Errors from the callback coordinator.
#[derive(Debug, Error)]
pub enum CallbackError {
    #[error("a callback is already registered for job '{0}'")]
    DuplicateRegistration(String),

    #[error("no pending callback registered for job '{0}'")]
    NotRegistered(String),

    #[error("timed out after {0:?} waiting for callback")]
    Timeout(Duration),

    #[error("callback wait cancelled")]
    Cancelled,

    #[error("callback handler failed: {0}")]
    HandlerFailed(String),
}

/// Errors from the job lifecycle layer.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("job '{0}' not found")]
    NotFound(String),

    #[error("cannot transition job out of terminal state '{0}'")]
    InvalidTransition(String),

    #[error("model catalog error: {0}")]
    Catalog(String),

    #[error(transparent)]
    Workflow(#[from] WorkflowError),

    #[error(transparent)]
    Graph(#[from] GraphError),
}

/// Errors while loading service configuration at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("default model '{0}' not found in configurations")]
    MissingDefaultModel(String),

    #[error("invalid setting {name}: {reason}")]
    InvalidSetting { name: String, reason: String },
}
