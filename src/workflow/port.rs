//! Typed ports and the port-type compatibility rule.

use serde::Serialize;
use serde_json::Value;

/// An input or output port on a node.
///
/// `port_type` is a symbolic tag used for compatibility checking at graph
/// construction time; it never coerces runtime values.
#[derive(Debug, Clone, Serialize)]
pub struct Port {
    pub name: String,
    pub port_type: String,
    pub required: bool,
    #[serde(rename = "default_value", skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tooltip: Option<String>,
}

impl Port {
    /// A required input port.
    pub fn required(name: impl Into<String>, port_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            port_type: port_type.into(),
            required: true,
            default: None,
            options: None,
            tooltip: None,
        }
    }

    /// An optional input port.
    pub fn optional(name: impl Into<String>, port_type: impl Into<String>) -> Self {
        Self {
            required: false,
            ..Self::required(name, port_type)
        }
    }

    /// An output port.
    pub fn out(name: impl Into<String>, port_type: impl Into<String>) -> Self {
        Self::required(name, port_type)
    }

    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn with_options(mut self, options: impl IntoIterator<Item = Value>) -> Self {
        self.options = Some(options.into_iter().collect());
        self
    }

    pub fn with_tooltip(mut self, tooltip: impl Into<String>) -> Self {
        self.tooltip = Some(tooltip.into());
        self
    }
}

/// Whether a producer port of `from_type` may feed a consumer port of
/// `to_type`.
///
/// `any` connects to and from everything. `object` may feed a more specific
/// consumer (a loosely typed producer feeding a stricter consumer) but not
/// the reverse. Everything else must match exactly.
pub fn ports_compatible(from_type: &str, to_type: &str) -> bool {
    if from_type == to_type {
        return true;
    }
    if from_type == "any" || to_type == "any" {
        return true;
    }
    from_type == "object"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_types_connect() {
        assert!(ports_compatible("string", "string"));
        assert!(ports_compatible("array", "array"));
    }

    #[test]
    fn any_connects_both_directions() {
        assert!(ports_compatible("any", "number"));
        assert!(ports_compatible("number", "any"));
    }

    #[test]
    fn object_feeds_specific_but_not_reverse() {
        assert!(ports_compatible("object", "array"));
        assert!(ports_compatible("object", "string"));
        assert!(!ports_compatible("array", "object"));
        assert!(!ports_compatible("string", "object"));
    }

    #[test]
    fn mismatched_types_rejected() {
        assert!(!ports_compatible("string", "number"));
        assert!(!ports_compatible("boolean", "array"));
    }
}
