//! Untyped field values and coercion into typed configuration fields.
//!
//! Values arrive from three places with different representations: process
//! environment (always strings), the distributed store (strings or endpoint
//! lists) and the secret store (arbitrary JSON). `RawValue` carries any of
//! them; `Coerce` turns one into the static type of a configuration field.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use crate::config::registry::FieldError;
use crate::remote::ServiceAddress;

/// A value before it is assigned to a typed field.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum RawValue {
    Bool(bool),
    Int(i64),
    Str(String),
    Addresses(Vec<ServiceAddress>),
    Map(BTreeMap<String, String>),
    Json(serde_json::Value),
}

impl RawValue {
    /// Empty string or JSON null.
    pub fn is_empty(&self) -> bool {
        match self {
            RawValue::Str(s) => s.is_empty(),
            RawValue::Json(v) => v.is_null(),
            _ => false,
        }
    }

    /// True for payloads that are not scalars and not endpoint lists.
    pub fn is_structured(&self) -> bool {
        match self {
            RawValue::Map(_) => true,
            RawValue::Json(v) => v.is_object() || v.is_array(),
            _ => false,
        }
    }

    /// Canonical encoded form used to compare values across cycles.
    pub fn encode(&self) -> Vec<u8> {
        // Serializing these variants cannot fail: map keys are strings.
        serde_json::to_vec(self).unwrap_or_default()
    }

    pub fn kind(&self) -> &'static str {
        match self {
            RawValue::Bool(_) => "bool",
            RawValue::Int(_) => "integer",
            RawValue::Str(_) => "string",
            RawValue::Addresses(_) => "address list",
            RawValue::Map(_) => "map",
            RawValue::Json(_) => "json",
        }
    }
}

impl fmt::Display for RawValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RawValue::Bool(b) => write!(f, "{}", b),
            RawValue::Int(i) => write!(f, "{}", i),
            RawValue::Str(s) => f.write_str(s),
            RawValue::Json(serde_json::Value::String(s)) => f.write_str(s),
            other => f.write_str(&String::from_utf8_lossy(&other.encode())),
        }
    }
}

impl From<bool> for RawValue {
    fn from(v: bool) -> Self {
        RawValue::Bool(v)
    }
}

impl From<String> for RawValue {
    fn from(v: String) -> Self {
        RawValue::Str(v)
    }
}

impl From<&str> for RawValue {
    fn from(v: &str) -> Self {
        RawValue::Str(v.to_string())
    }
}

impl From<Vec<ServiceAddress>> for RawValue {
    fn from(v: Vec<ServiceAddress>) -> Self {
        RawValue::Addresses(v)
    }
}

impl From<BTreeMap<String, String>> for RawValue {
    fn from(v: BTreeMap<String, String>) -> Self {
        RawValue::Map(v)
    }
}

macro_rules! raw_from_int {
    ($($t:ty),*) => {
        $(
            impl From<$t> for RawValue {
                fn from(v: $t) -> Self {
                    RawValue::Int(i64::from(v))
                }
            }
        )*
    };
}

raw_from_int!(i32, i64, u16, u32);

impl From<serde_json::Value> for RawValue {
    /// Scalars collapse to their native variant so a secret `"5"` and a
    /// secret `5` coerce the same way.
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Bool(b) => RawValue::Bool(b),
            serde_json::Value::String(s) => RawValue::Str(s),
            serde_json::Value::Number(n) if n.is_i64() => match n.as_i64() {
                Some(i) => RawValue::Int(i),
                None => RawValue::Json(serde_json::Value::Number(n)),
            },
            other => RawValue::Json(other),
        }
    }
}

/// Conversion of a `RawValue` into a field's static type.
pub trait Coerce: Sized {
    fn coerce(raw: RawValue) -> Result<Self, FieldError>;
}

fn mismatch(expected: &'static str, raw: &RawValue) -> FieldError {
    FieldError::TypeMismatch {
        expected,
        found: raw.to_string(),
    }
}

impl Coerce for bool {
    fn coerce(raw: RawValue) -> Result<Self, FieldError> {
        match raw {
            RawValue::Bool(b) => Ok(b),
            RawValue::Str(s) => Ok(s == "true" || s == "1"),
            RawValue::Int(i) => Ok(i == 1),
            other => Err(mismatch("bool", &other)),
        }
    }
}

impl Coerce for String {
    fn coerce(raw: RawValue) -> Result<Self, FieldError> {
        match raw {
            RawValue::Str(s) => Ok(s),
            RawValue::Bool(_) | RawValue::Int(_) => Ok(raw.to_string()),
            RawValue::Json(serde_json::Value::String(s)) => Ok(s),
            RawValue::Json(serde_json::Value::Number(n)) => Ok(n.to_string()),
            other => Err(mismatch("string", &other)),
        }
    }
}

macro_rules! coerce_int {
    ($($t:ty),*) => {
        $(
            impl Coerce for $t {
                fn coerce(raw: RawValue) -> Result<Self, FieldError> {
                    let wide = match &raw {
                        RawValue::Int(i) => *i,
                        RawValue::Str(s) => s
                            .trim()
                            .parse::<i64>()
                            .map_err(|_| mismatch(stringify!($t), &raw))?,
                        _ => return Err(mismatch(stringify!($t), &raw)),
                    };
                    <$t>::try_from(wide).map_err(|_| mismatch(stringify!($t), &raw))
                }
            }
        )*
    };
}

coerce_int!(i32, i64, u16, u32);

impl Coerce for Vec<ServiceAddress> {
    fn coerce(raw: RawValue) -> Result<Self, FieldError> {
        match raw {
            RawValue::Addresses(addrs) => Ok(addrs),
            other => Err(mismatch("address list", &other)),
        }
    }
}

impl Coerce for BTreeMap<String, String> {
    fn coerce(raw: RawValue) -> Result<Self, FieldError> {
        match raw {
            RawValue::Map(m) => Ok(m),
            RawValue::Json(v @ serde_json::Value::Object(_)) => {
                serde_json::from_value(v.clone()).map_err(|_| mismatch("map", &RawValue::Json(v)))
            }
            RawValue::Str(s) => {
                serde_json::from_str(&s).map_err(|_| mismatch("map", &RawValue::Str(s.clone())))
            }
            other => Err(mismatch("map", &other)),
        }
    }
}
