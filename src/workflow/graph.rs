//! Workflow graph construction and topological ordering.

use std::collections::HashMap;

use serde_json::Value;

use crate::error::GraphError;
use crate::registry::NodeRegistry;
use crate::workflow::definition::{ConnectionSpec, GraphDefinition};
use crate::workflow::node::NodeInstance;
use crate::workflow::port::ports_compatible;

/// A DAG of node instances and typed connections, built for one execution.
#[derive(Debug)]
pub struct WorkflowGraph {
    nodes: HashMap<String, NodeInstance>,
    insertion_order: Vec<String>,
    connections: Vec<ConnectionSpec>,
}

impl WorkflowGraph {
    /// Build a graph from a wire-format definition.
    ///
    /// Construction is transactional: the first invalid node, connection
    /// endpoint, or port-type mismatch aborts with no partial state.
    pub fn from_definition(
        registry: &NodeRegistry,
        definition: &GraphDefinition,
    ) -> Result<Self, GraphError> {
        let mut nodes = HashMap::new();
        let mut insertion_order = Vec::with_capacity(definition.nodes.len());

        for spec in &definition.nodes {
            let mut node = registry
                .create(&spec.type_name, spec.id.clone())
                .map_err(|_| GraphError::UnknownNodeType(spec.type_name.clone()))?;
            node.input_values.extend(spec.input_values.clone().into_iter());

            if nodes.contains_key(&node.id) {
                return Err(GraphError::DuplicateNodeId(node.id));
            }
            insertion_order.push(node.id.clone());
            nodes.insert(node.id.clone(), node);
        }

        let mut connections = Vec::with_capacity(definition.connections.len());
        for conn in &definition.connections {
            let source = nodes
                .get(&conn.from_node)
                .ok_or_else(|| GraphError::MissingSourceNode(conn.from_node.clone()))?;
            let target = nodes
                .get(&conn.to_node)
                .ok_or_else(|| GraphError::MissingTargetNode(conn.to_node.clone()))?;

            let from_port = source.schema.output_port(&conn.from_port).ok_or_else(|| {
                GraphError::MissingOutputPort {
                    node: conn.from_node.clone(),
                    port: conn.from_port.clone(),
                }
            })?;
            let to_port = target.schema.input_port(&conn.to_port).ok_or_else(|| {
                GraphError::MissingInputPort {
                    node: conn.to_node.clone(),
                    port: conn.to_port.clone(),
                }
            })?;

            if !ports_compatible(&from_port.port_type, &to_port.port_type) {
                return Err(GraphError::IncompatiblePorts {
                    from_node: conn.from_node.clone(),
                    from_port: conn.from_port.clone(),
                    from_type: from_port.port_type.clone(),
                    to_node: conn.to_node.clone(),
                    to_port: conn.to_port.clone(),
                    to_type: to_port.port_type.clone(),
                });
            }

            connections.push(conn.clone());
        }

        Ok(Self {
            nodes,
            insertion_order,
            connections,
        })
    }

    pub fn node(&self, id: &str) -> Option<&NodeInstance> {
        self.nodes.get(id)
    }

    pub fn connections(&self) -> &[ConnectionSpec] {
        &self.connections
    }

    /// Connections feeding the given node, in definition order.
    pub fn connections_into<'a>(
        &'a self,
        node_id: &'a str,
    ) -> impl Iterator<Item = &'a ConnectionSpec> {
        self.connections.iter().filter(move |c| c.to_node == node_id)
    }

    /// Seed an input value on every node that declares the named input port.
    ///
    /// Used by ForEach to inject the current item into sub-workflow nodes.
    pub fn seed_nodes_with_port(&mut self, port: &str, value: &Value) {
        for node in self.nodes.values_mut() {
            if node.schema.input_port(port).is_some() {
                node.input_values.insert(port.to_string(), value.clone());
            }
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Compute the execution order: a depth-first post-order over input
    /// edges, with ties broken by node insertion order.
    ///
    /// Iterative on an explicit stack so graph depth is bounded by memory,
    /// not the call stack. A back-edge is reported as a cycle.
    pub fn execution_order(&self) -> Result<Vec<String>, GraphError> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Visiting,
            Done,
        }

        // Input adjacency in connection order.
        let mut inputs: HashMap<&str, Vec<&str>> = HashMap::new();
        for conn in &self.connections {
            inputs
                .entry(conn.to_node.as_str())
                .or_default()
                .push(conn.from_node.as_str());
        }

        let mut marks: HashMap<&str, Mark> = HashMap::with_capacity(self.nodes.len());
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack: Vec<(&str, usize)> = Vec::new();

        for root in &self.insertion_order {
            if marks.contains_key(root.as_str()) {
                continue;
            }
            marks.insert(root.as_str(), Mark::Visiting);
            stack.push((root.as_str(), 0));

            while let Some((node, next_dep)) = stack.last_mut() {
                let deps: &[&str] = inputs.get(node).map(Vec::as_slice).unwrap_or(&[]);
                if *next_dep < deps.len() {
                    let dep = deps[*next_dep];
                    *next_dep += 1;
                    match marks.get(dep) {
                        Some(Mark::Done) => {}
                        Some(Mark::Visiting) => {
                            return Err(GraphError::Cycle(dep.to_string()));
                        }
                        None => {
                            marks.insert(dep, Mark::Visiting);
                            stack.push((dep, 0));
                        }
                    }
                } else {
                    let finished = *node;
                    marks.insert(finished, Mark::Done);
                    order.push(finished.to_string());
                    stack.pop();
                }
            }
        }

        Ok(order)
    }
}
