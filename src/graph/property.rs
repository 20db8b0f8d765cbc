//! Property value types for the per-node property bag
//!
//! Property names are free-form; values are a closed set of variants so the
//! bag stays dynamically keyed without resorting to `Any`.

use super::types::NodeId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Property value type
///
/// Supports:
/// - String
/// - Integer (i64)
/// - Float (f64)
/// - Boolean
/// - Bytes (opaque binary payloads)
/// - DateTime (Unix milliseconds)
/// - Node (a reference to another node in the same graph)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PropertyValue {
    String(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Bytes(Vec<u8>),
    DateTime(i64),
    Node(NodeId),
}

impl PropertyValue {
    /// Get string value if this is a string
    pub fn as_string(&self) -> Option<&str> {
        match self {
            PropertyValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Get integer value if this is an integer
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            PropertyValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Get float value if this is a float
    pub fn as_float(&self) -> Option<f64> {
        match self {
            PropertyValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Get boolean value if this is a boolean
    pub fn as_boolean(&self) -> Option<bool> {
        match self {
            PropertyValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            PropertyValue::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_datetime(&self) -> Option<i64> {
        match self {
            PropertyValue::DateTime(dt) => Some(*dt),
            _ => None,
        }
    }

    /// Get the referenced node if this is a node reference
    pub fn as_node(&self) -> Option<NodeId> {
        match self {
            PropertyValue::Node(id) => Some(*id),
            _ => None,
        }
    }

    /// Get type name as string
    pub fn type_name(&self) -> &'static str {
        match self {
            PropertyValue::String(_) => "String",
            PropertyValue::Integer(_) => "Integer",
            PropertyValue::Float(_) => "Float",
            PropertyValue::Boolean(_) => "Boolean",
            PropertyValue::Bytes(_) => "Bytes",
            PropertyValue::DateTime(_) => "DateTime",
            PropertyValue::Node(_) => "Node",
        }
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::String(s) => write!(f, "\"{}\"", s),
            PropertyValue::Integer(i) => write!(f, "{}", i),
            PropertyValue::Float(fl) => write!(f, "{}", fl),
            PropertyValue::Boolean(b) => write!(f, "{}", b),
            PropertyValue::Bytes(b) => write!(f, "Bytes({})", b.len()),
            PropertyValue::DateTime(dt) => write!(f, "DateTime({})", dt),
            PropertyValue::Node(id) => write!(f, "Node({})", id),
        }
    }
}

// Convenience conversions
impl From<String> for PropertyValue {
    fn from(s: String) -> Self {
        PropertyValue::String(s)
    }
}

impl From<&str> for PropertyValue {
    fn from(s: &str) -> Self {
        PropertyValue::String(s.to_string())
    }
}

impl From<i64> for PropertyValue {
    fn from(i: i64) -> Self {
        PropertyValue::Integer(i)
    }
}

impl From<i32> for PropertyValue {
    fn from(i: i32) -> Self {
        PropertyValue::Integer(i as i64)
    }
}

impl From<u32> for PropertyValue {
    fn from(i: u32) -> Self {
        PropertyValue::Integer(i as i64)
    }
}

impl From<f64> for PropertyValue {
    fn from(f: f64) -> Self {
        PropertyValue::Float(f)
    }
}

impl From<bool> for PropertyValue {
    fn from(b: bool) -> Self {
        PropertyValue::Boolean(b)
    }
}

impl From<Vec<u8>> for PropertyValue {
    fn from(bytes: Vec<u8>) -> Self {
        PropertyValue::Bytes(bytes)
    }
}

impl From<&[u8]> for PropertyValue {
    fn from(bytes: &[u8]) -> Self {
        PropertyValue::Bytes(bytes.to_vec())
    }
}

impl From<DateTime<Utc>> for PropertyValue {
    fn from(dt: DateTime<Utc>) -> Self {
        PropertyValue::DateTime(dt.timestamp_millis())
    }
}

impl From<NodeId> for PropertyValue {
    fn from(id: NodeId) -> Self {
        PropertyValue::Node(id)
    }
}

/// Floats compare by bit pattern, so NaN equals itself and re-setting a
/// stored value is always a no-op
impl PartialEq for PropertyValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (PropertyValue::String(a), PropertyValue::String(b)) => a == b,
            (PropertyValue::Integer(a), PropertyValue::Integer(b)) => a == b,
            (PropertyValue::Float(a), PropertyValue::Float(b)) => a.to_bits() == b.to_bits(),
            (PropertyValue::Boolean(a), PropertyValue::Boolean(b)) => a == b,
            (PropertyValue::Bytes(a), PropertyValue::Bytes(b)) => a == b,
            (PropertyValue::DateTime(a), PropertyValue::DateTime(b)) => a == b,
            (PropertyValue::Node(a), PropertyValue::Node(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for PropertyValue {}

/// Property map owned by a single node; at most one value per name
pub type PropertyMap = BTreeMap<String, PropertyValue>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_property_value_types() {
        assert_eq!(PropertyValue::String("test".to_string()).type_name(), "String");
        assert_eq!(PropertyValue::Integer(42).type_name(), "Integer");
        assert_eq!(PropertyValue::Float(3.5).type_name(), "Float");
        assert_eq!(PropertyValue::Boolean(true).type_name(), "Boolean");
        assert_eq!(PropertyValue::Bytes(vec![1, 2]).type_name(), "Bytes");
        assert_eq!(PropertyValue::DateTime(1234567890).type_name(), "DateTime");
        assert_eq!(PropertyValue::Node(NodeId::new()).type_name(), "Node");
    }

    #[test]
    fn test_property_value_conversions() {
        let string_prop: PropertyValue = "hello".into();
        assert_eq!(string_prop.as_string(), Some("hello"));

        let int_prop: PropertyValue = 111.into();
        assert_eq!(int_prop.as_integer(), Some(111));
        assert_eq!(int_prop.as_float(), None);

        let float_prop: PropertyValue = 2.5.into();
        assert_eq!(float_prop.as_float(), Some(2.5));

        let bool_prop: PropertyValue = false.into();
        assert_eq!(bool_prop.as_boolean(), Some(false));

        let bytes_prop: PropertyValue = (&b"abc"[..]).into();
        assert_eq!(bytes_prop.as_bytes(), Some(&b"abc"[..]));

        let id = NodeId::new();
        let node_prop: PropertyValue = id.into();
        assert_eq!(node_prop.as_node(), Some(id));
    }

    #[test]
    fn test_float_equality_is_bitwise() {
        assert_eq!(PropertyValue::Float(f64::NAN), PropertyValue::Float(f64::NAN));
        assert_ne!(PropertyValue::Float(0.0), PropertyValue::Float(-0.0));
        assert_ne!(PropertyValue::Float(1.0), PropertyValue::Integer(1));
        assert_eq!(PropertyValue::from(2.5), PropertyValue::Float(2.5));
    }

    #[test]
    fn test_datetime_conversion_uses_millis() {
        let now = Utc::now();
        let prop: PropertyValue = now.into();
        assert_eq!(prop.as_datetime(), Some(now.timestamp_millis()));
    }

    #[test]
    fn test_display() {
        assert_eq!(PropertyValue::from("x").to_string(), "\"x\"");
        assert_eq!(PropertyValue::from(7i64).to_string(), "7");
        assert_eq!(PropertyValue::Bytes(vec![0; 4]).to_string(), "Bytes(4)");
    }

    #[test]
    fn test_property_map_replaces_by_name() {
        let mut props = PropertyMap::new();
        props.insert("P".to_string(), 111.into());
        props.insert("P".to_string(), 222.into());
        assert_eq!(props.len(), 1);
        assert_eq!(props.get("P").and_then(|v| v.as_integer()), Some(222));
    }
}
