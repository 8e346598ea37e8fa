//! Scalar and value types held by graph slots

use serde::{Deserialize, Serialize};
use std::fmt;

/// Arena slot of a composite node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle(pub(crate) u32);

impl Handle {
    /// Slot index inside the owning graph
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Leaf value; never assigned a node id
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl Scalar {
    pub fn is_null(&self) -> bool {
        matches!(self, Scalar::Null)
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Scalar::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Scalar::Float(v) => Some(*v),
            Scalar::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Scalar::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Scalar::Str(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Null => write!(f, "None"),
            Scalar::Bool(v) => write!(f, "{}", v),
            Scalar::Int(v) => write!(f, "{}", v),
            Scalar::Float(v) => write!(f, "{:?}", v),
            Scalar::Str(v) => write!(f, "{:?}", v),
        }
    }
}

macro_rules! scalar_from {
    ($($ty:ty => $variant:ident as $cast:ty),* $(,)?) => {
        $(
            impl From<$ty> for Scalar {
                fn from(value: $ty) -> Self {
                    Scalar::$variant(value as $cast)
                }
            }
        )*
    };
}

scalar_from! {
    i32 => Int as i64,
    i64 => Int as i64,
    u32 => Int as i64,
    f64 => Float as f64,
}

impl From<bool> for Scalar {
    fn from(value: bool) -> Self {
        Scalar::Bool(value)
    }
}

impl From<&str> for Scalar {
    fn from(value: &str) -> Self {
        Scalar::Str(value.to_string())
    }
}

impl From<String> for Scalar {
    fn from(value: String) -> Self {
        Scalar::Str(value)
    }
}

impl From<()> for Scalar {
    fn from(_: ()) -> Self {
        Scalar::Null
    }
}

/// Contents of a field, slot or entry in a live graph
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Scalar(Scalar),
    Ref(Handle),
}

impl Value {
    pub const NULL: Value = Value::Scalar(Scalar::Null);

    pub fn as_scalar(&self) -> Option<&Scalar> {
        match self {
            Value::Scalar(s) => Some(s),
            Value::Ref(_) => None,
        }
    }

    pub fn as_handle(&self) -> Option<Handle> {
        match self {
            Value::Ref(h) => Some(*h),
            Value::Scalar(_) => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        self.as_scalar().and_then(Scalar::as_int)
    }

    pub fn as_float(&self) -> Option<f64> {
        self.as_scalar().and_then(Scalar::as_float)
    }

    pub fn as_bool(&self) -> Option<bool> {
        self.as_scalar().and_then(Scalar::as_bool)
    }

    pub fn as_str(&self) -> Option<&str> {
        self.as_scalar().and_then(Scalar::as_str)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Scalar(Scalar::Null))
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::NULL
    }
}

impl From<Handle> for Value {
    fn from(handle: Handle) -> Self {
        Value::Ref(handle)
    }
}

impl From<Scalar> for Value {
    fn from(value: Scalar) -> Self {
        Value::Scalar(value)
    }
}

macro_rules! value_from_scalar {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(value: $ty) -> Self {
                    Value::Scalar(Scalar::from(value))
                }
            }
        )*
    };
}

value_from_scalar!(i32, i64, u32, f64, bool, &str, String, ());

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_json_shapes() {
        assert_eq!(serde_json::to_string(&Scalar::Null).unwrap(), "null");
        assert_eq!(serde_json::to_string(&Scalar::Int(3)).unwrap(), "3");
        assert_eq!(serde_json::to_string(&Scalar::from("a")).unwrap(), "\"a\"");

        let parsed: Scalar = serde_json::from_str("1.5").unwrap();
        assert_eq!(parsed, Scalar::Float(1.5));
        let parsed: Scalar = serde_json::from_str("7").unwrap();
        assert_eq!(parsed, Scalar::Int(7));
        let parsed: Scalar = serde_json::from_str("true").unwrap();
        assert_eq!(parsed, Scalar::Bool(true));
        let parsed: Scalar = serde_json::from_str("null").unwrap();
        assert_eq!(parsed, Scalar::Null);
    }

    #[test]
    fn test_value_conversions() {
        assert_eq!(Value::from(5).as_int(), Some(5));
        assert_eq!(Value::from("x").as_str(), Some("x"));
        assert_eq!(Value::from(Handle(2)).as_handle(), Some(Handle(2)));
        assert!(Value::default().is_null());
        assert_eq!(Value::from(2).as_float(), Some(2.0));
    }
}
