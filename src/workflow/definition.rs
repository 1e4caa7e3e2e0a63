//! Serde types for the wire-format graph definition.

use serde::{Deserialize, Serialize};

use crate::workflow::node::JsonMap;

/// A workflow definition as submitted over the API or embedded in a model
/// template.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphDefinition {
    #[serde(default)]
    pub nodes: Vec<NodeSpec>,
    #[serde(default)]
    pub connections: Vec<ConnectionSpec>,
}

impl GraphDefinition {
    /// Seed an input value on a node spec, if the node exists.
    pub fn seed_input(
        &mut self,
        node_id: &str,
        input_key: &str,
        value: serde_json::Value,
    ) -> bool {
        match self.nodes.iter_mut().find(|n| n.id.as_deref() == Some(node_id)) {
            Some(node) => {
                node.input_values.insert(input_key.to_string(), value);
                true
            }
            None => false,
        }
    }
}

/// One node in a graph definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSpec {
    /// Node id; a fresh UUID is assigned when absent.
    #[serde(default)]
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default)]
    pub input_values: JsonMap,
}

/// A directed edge between two node ports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionSpec {
    pub from_node: String,
    pub from_port: String,
    pub to_node: String,
    pub to_port: String,
}

impl ConnectionSpec {
    pub fn new(
        from_node: impl Into<String>,
        from_port: impl Into<String>,
        to_node: impl Into<String>,
        to_port: impl Into<String>,
    ) -> Self {
        Self {
            from_node: from_node.into(),
            from_port: from_port.into(),
            to_node: to_node.into(),
            to_port: to_port.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    #[test]
    fn parses_wire_format() {
        let raw = json!({
            "nodes": [
                {"id": "a", "type": "TextInputNode", "input_values": {"text": "hello"}},
                {"id": "b", "type": "TextStripNode"}
            ],
            "connections": [
                {"from_node": "a", "from_port": "text", "to_node": "b", "to_port": "text"}
            ]
        });

        let def: GraphDefinition = serde_json::from_value(raw).unwrap();
        assert_eq!(def.nodes.len(), 2);
        assert_eq!(def.nodes[0].input_values.get("text"), Some(&json!("hello")));
        assert_eq!(
            def.connections,
            vec![ConnectionSpec::new("a", "text", "b", "text")]
        );
    }

    #[test]
    fn seeding_targets_existing_nodes_only() {
        let mut def: GraphDefinition = serde_json::from_value(json!({
            "nodes": [{"id": "a", "type": "TextInputNode"}],
            "connections": []
        }))
        .unwrap();

        assert!(def.seed_input("a", "text", json!("seeded")));
        assert!(!def.seed_input("ghost", "text", json!("lost")));
        assert_eq!(def.nodes[0].input_values.get("text"), Some(&json!("seeded")));
    }
}
