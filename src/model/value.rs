//! Tagged argument values
//!
//! Every fact argument, rule constant, and query argument is one of three
//! variants. Values of different variants never compare equal and are never
//! coerced into one another during evaluation.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use serde::{Deserialize, Serialize, Serializer};

/// Declared column types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    /// Opaque identifier (card ids)
    Id,
    /// UTF-8 string
    String,
    /// Finite 64-bit float
    Number,
}

impl ValueType {
    /// Returns the type name for error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            ValueType::Id => "id",
            ValueType::String => "string",
            ValueType::Number => "number",
        }
    }

    /// Parses a type name as written in rule declarations
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "id" => Some(ValueType::Id),
            "string" => Some(ValueType::String),
            "number" => Some(ValueType::Number),
            _ => None,
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.type_name())
    }
}

/// A single argument value
#[derive(Debug, Clone)]
pub enum Value {
    Str(Arc<str>),
    Num(f64),
    Id(Arc<str>),
}

impl Value {
    pub fn str(s: impl AsRef<str>) -> Self {
        Value::Str(Arc::from(s.as_ref()))
    }

    pub fn id(s: impl AsRef<str>) -> Self {
        Value::Id(Arc::from(s.as_ref()))
    }

    /// Creates a number, rejecting NaN and infinities.
    pub fn num(n: f64) -> Option<Self> {
        if n.is_finite() {
            Some(Value::Num(n))
        } else {
            None
        }
    }

    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Str(_) => ValueType::String,
            Value::Num(_) => ValueType::Number,
            Value::Id(_) => ValueType::Id,
        }
    }

    /// Text of a string or identifier
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Str(s) | Value::Id(s) => Some(s),
            Value::Num(_) => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Num(n) => Some(*n),
            _ => None,
        }
    }

    /// Orders two values of the same variant; `None` across variants.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Num(a), Value::Num(b)) => a.partial_cmp(b),
            (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
            (Value::Id(a), Value::Id(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// Re-tags a string constant as an identifier, leaving other values alone.
    pub fn into_id(self) -> Value {
        match self {
            Value::Str(s) => Value::Id(s),
            other => other,
        }
    }

    fn canonical_bits(n: f64) -> u64 {
        if n == 0.0 {
            0
        } else {
            n.to_bits()
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Id(a), Value::Id(b)) => a == b,
            (Value::Num(a), Value::Num(b)) => Self::canonical_bits(*a) == Self::canonical_bits(*b),
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Value::Str(s) => {
                0u8.hash(state);
                s.hash(state);
            }
            Value::Num(n) => {
                1u8.hash(state);
                Self::canonical_bits(*n).hash(state);
            }
            Value::Id(s) => {
                2u8.hash(state);
                s.hash(state);
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Str(s) => write!(f, "{:?}", s),
            Value::Num(n) => write!(f, "{}", n),
            Value::Id(s) => write!(f, "{}", s),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Str(s) | Value::Id(s) => serializer.serialize_str(s),
            Value::Num(n) => serializer.serialize_f64(*n),
        }
    }
}
