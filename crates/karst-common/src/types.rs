//! Attribute type tags for indexed columns.

use serde::{Deserialize, Serialize};

/// Type tag for the indexed attribute, persisted in the index meta page.
///
/// Only 32-bit signed integers are supported; the node layouts and key
/// comparisons are specialized to them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum AttrType {
    /// 32-bit signed integer.
    Int = 1,
}

impl AttrType {
    /// Returns the wire value stored in the meta page.
    pub fn as_i32(&self) -> i32 {
        *self as i32
    }

    /// Decodes a wire value, or None if it names no known type.
    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            1 => Some(AttrType::Int),
            _ => None,
        }
    }

    /// Returns the byte width of a key of this type.
    pub fn key_size(&self) -> usize {
        match self {
            AttrType::Int => 4,
        }
    }
}

impl std::fmt::Display for AttrType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttrType::Int => write!(f, "Int"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attr_type_wire_value() {
        assert_eq!(AttrType::Int.as_i32(), 1);
    }

    #[test]
    fn test_attr_type_from_i32() {
        assert_eq!(AttrType::from_i32(1), Some(AttrType::Int));
        assert_eq!(AttrType::from_i32(0), None);
        assert_eq!(AttrType::from_i32(99), None);
    }

    #[test]
    fn test_attr_type_key_size() {
        assert_eq!(AttrType::Int.key_size(), 4);
    }

    #[test]
    fn test_attr_type_display() {
        assert_eq!(AttrType::Int.to_string(), "Int");
    }

    #[test]
    fn test_attr_type_serde_roundtrip() {
        let serialized = serde_json::to_string(&AttrType::Int).unwrap();
        let deserialized: AttrType = serde_json::from_str(&serialized).unwrap();
        assert_eq!(deserialized, AttrType::Int);
    }
}
