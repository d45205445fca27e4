//! Opaque stream elements.
//!
//! Buffers move [`Item`]s between blobs and drain data captures them, along
//! with worker field values, without interpreting them.

use serde::{Deserialize, Serialize};

/// A single value flowing through the stream graph or captured as worker state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub enum Item {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
}

impl Item {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Item::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Item::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Item::Float(v) => Some(*v),
            Item::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Item::Text(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Item::Bytes(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Item::Null)
    }
}

impl From<bool> for Item {
    fn from(v: bool) -> Self {
        Item::Bool(v)
    }
}

impl From<i64> for Item {
    fn from(v: i64) -> Self {
        Item::Int(v)
    }
}

impl From<i32> for Item {
    fn from(v: i32) -> Self {
        Item::Int(v as i64)
    }
}

impl From<f64> for Item {
    fn from(v: f64) -> Self {
        Item::Float(v)
    }
}

impl From<&str> for Item {
    fn from(v: &str) -> Self {
        Item::Text(v.to_string())
    }
}

impl From<String> for Item {
    fn from(v: String) -> Self {
        Item::Text(v)
    }
}

impl From<Vec<u8>> for Item {
    fn from(v: Vec<u8>) -> Self {
        Item::Bytes(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accessors() {
        assert_eq!(Item::from(3).as_int(), Some(3));
        assert_eq!(Item::from(3).as_float(), Some(3.0));
        assert_eq!(Item::from("abc").as_str(), Some("abc"));
        assert_eq!(Item::from(true).as_bool(), Some(true));
        assert_eq!(Item::from(vec![1u8, 2]).as_bytes(), Some(&[1u8, 2][..]));
        assert!(Item::default().is_null());
        assert_eq!(Item::from(1.5).as_int(), None);
    }

    #[test]
    fn test_json_shape() {
        let json = serde_json::to_string(&Item::Int(4)).unwrap();
        assert_eq!(json, r#"{"Int":4}"#);
        let back: Item = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Item::Int(4));
    }
}
