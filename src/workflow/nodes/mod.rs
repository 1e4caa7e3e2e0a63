//! Built-in node catalog.

pub mod basic;
pub mod collections;
pub mod control;
pub mod foreach;
pub mod model_request;
pub mod service;
pub mod text;

use serde_json::Value;

use crate::registry::NodeRegistry;

/// Register every built-in node type.
pub fn register_builtins(registry: &mut NodeRegistry) {
    for registration in basic::registrations() {
        registry.register(registration);
    }
    for registration in text::registrations() {
        registry.register(registration);
    }
    for registration in collections::registrations() {
        registry.register(registration);
    }
    for registration in control::registrations() {
        registry.register(registration);
    }
    for registration in foreach::registrations() {
        registry.register(registration);
    }
    for registration in model_request::registrations() {
        registry.register(registration);
    }
    for registration in service::registrations() {
        registry.register(registration);
    }
}

/// Render a value the way a template or comparison wants to see it:
/// strings bare, everything else as compact JSON.
pub(crate) fn display_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Python-style truthiness: null, false, zero, and empty containers are
/// falsy.
pub(crate) fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}
