//! Catalog of node types.
//!
//! Each type registers a static schema and a nullary constructor. The
//! registry is built once at startup and shared read-only afterwards, so the
//! HTTP surface can enumerate the catalog without instantiating nodes and
//! the engine can construct instances by type name.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::Serialize;
use uuid::Uuid;

use crate::error::RegistryError;
use crate::workflow::node::{NodeBehavior, NodeInstance, NodeSchema};
use crate::workflow::port::Port;

/// Registration record for one node type.
pub struct NodeRegistration {
    pub type_name: &'static str,
    pub category: &'static str,
    /// Exempt from skip propagation: the node runs even when an upstream
    /// connection delivers `Null`, and is allowed to observe that value.
    pub null_tolerant: bool,
    pub schema: NodeSchema,
    pub construct: fn() -> Arc<dyn NodeBehavior>,
}

/// The node type catalog.
pub struct NodeRegistry {
    nodes: HashMap<String, NodeRegistration>,
    insertion_order: Vec<String>,
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeRegistry {
    /// An empty registry. Most callers want [`NodeRegistry::builtin`].
    pub fn new() -> Self {
        Self {
            nodes: HashMap::new(),
            insertion_order: Vec::new(),
        }
    }

    /// A registry pre-populated with the built-in node catalog.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        crate::workflow::nodes::register_builtins(&mut registry);
        registry
    }

    /// Register a node type. Re-registering a name replaces the earlier
    /// entry with a warning.
    pub fn register(&mut self, registration: NodeRegistration) {
        let name = registration.type_name.to_string();
        if self.nodes.insert(name.clone(), registration).is_some() {
            tracing::warn!(type_name = %name, "Replacing existing node type registration");
        } else {
            self.insertion_order.push(name);
        }
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.nodes.contains_key(type_name)
    }

    pub fn get(&self, type_name: &str) -> Option<&NodeRegistration> {
        self.nodes.get(type_name)
    }

    /// Construct a fresh node instance of the named type.
    pub fn create(
        &self,
        type_name: &str,
        id: Option<String>,
    ) -> Result<NodeInstance, RegistryError> {
        let registration = self
            .nodes
            .get(type_name)
            .ok_or_else(|| RegistryError::UnknownNodeType(type_name.to_string()))?;

        Ok(NodeInstance::new(
            id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            registration.type_name.to_string(),
            registration.category.to_string(),
            registration.null_tolerant,
            registration.schema.clone(),
            (registration.construct)(),
        ))
    }

    /// Static descriptors for every registered type, in registration order.
    pub fn descriptors(&self) -> Vec<NodeDescriptor> {
        self.insertion_order
            .iter()
            .filter_map(|name| self.nodes.get(name))
            .map(NodeDescriptor::from)
            .collect()
    }

    /// Registered type names grouped by category.
    pub fn categories(&self) -> BTreeMap<String, Vec<String>> {
        let mut categories: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for name in &self.insertion_order {
            if let Some(reg) = self.nodes.get(name) {
                categories
                    .entry(reg.category.to_string())
                    .or_default()
                    .push(name.clone());
            }
        }
        categories
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Serializable description of a node type for the catalog endpoint.
#[derive(Debug, Serialize)]
pub struct NodeDescriptor {
    pub name: String,
    pub category: String,
    pub input_ports: BTreeMap<String, Port>,
    pub output_ports: BTreeMap<String, Port>,
}

impl From<&NodeRegistration> for NodeDescriptor {
    fn from(reg: &NodeRegistration) -> Self {
        Self {
            name: reg.type_name.to_string(),
            category: reg.category.to_string(),
            input_ports: reg
                .schema
                .inputs
                .iter()
                .map(|p| (p.name.clone(), p.clone()))
                .collect(),
            output_ports: reg
                .schema
                .outputs
                .iter()
                .map(|p| (p.name.clone(), p.clone()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_unknown_type_fails() {
        let registry = NodeRegistry::builtin();
        let err = registry.create("NoSuchNode", None).unwrap_err();
        assert!(matches!(err, RegistryError::UnknownNodeType(_)));
    }

    #[test]
    fn create_assigns_uuid_when_id_absent() {
        let registry = NodeRegistry::builtin();
        let node = registry.create("TextInputNode", None).unwrap();
        assert!(Uuid::parse_str(&node.id).is_ok());

        let node = registry.create("TextInputNode", Some("n1".to_string())).unwrap();
        assert_eq!(node.id, "n1");
    }

    #[test]
    fn builtin_catalog_enumerates_without_instantiation() {
        let registry = NodeRegistry::builtin();
        let descriptors = registry.descriptors();
        assert!(!descriptors.is_empty());

        let switch = descriptors
            .iter()
            .find(|d| d.name == "SwitchNode")
            .expect("SwitchNode registered");
        assert!(switch.input_ports.contains_key("data"));
        assert!(switch.output_ports.contains_key("fallback"));
    }

    #[test]
    fn null_tolerance_is_a_type_property() {
        let registry = NodeRegistry::builtin();
        assert!(registry.create("MergeNode", None).unwrap().null_tolerant);
        assert!(registry.create("PassThroughNode", None).unwrap().null_tolerant);
        assert!(!registry.create("TextStripNode", None).unwrap().null_tolerant);
    }
}
