//! Runtime values passed into and out of mapped statements.
//!
//! [`Value`] is the universal currency of the engine: caller parameters,
//! template bindings, driver rows, and hydrated results are all expressed
//! with it. Associative values keep insertion order, matching the ordered
//! semantics the dynamic `foreach` node and `select_map` rely on.

use indexmap::IndexMap;
use std::collections::BTreeMap;

/// A parameter map used during rendering and execution. Keys are property
/// names, values are caller-supplied input.
pub type ParamsMap = BTreeMap<String, Value>;

/// An instance of a registered application type, produced by object-mode
/// hydration and accepted as a statement parameter.
///
/// Construction rules (constructor parameters, defaults, read-only
/// properties) live in the type's registered adapter, not here.
#[derive(Debug, Clone, PartialEq)]
pub struct Instance {
    /// Registered type name.
    pub type_name: String,
    /// Property values in assignment order.
    pub properties: IndexMap<String, Value>,
}

impl Instance {
    /// Creates an empty instance of the named type.
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            properties: IndexMap::new(),
        }
    }

    /// Reads a property without consulting registered getters.
    #[must_use]
    pub fn property(&self, name: &str) -> Option<&Value> {
        self.properties.get(name)
    }
}

/// A case of a registered enum type. Backed enums round-trip through their
/// backing scalar, unbacked ones through the case name; both directions are
/// the enum type handler's job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumValue {
    pub enum_name: String,
    pub case: String,
}

/// Represents a runtime value, supporting both primitive and composite
/// structures.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    DateTime(chrono::NaiveDateTime),
    Array(Vec<Value>),
    Object(IndexMap<String, Value>),
    Instance(Instance),
    Enum(EnumValue),
}

impl Value {
    /// Checks whether the value is considered "empty".
    ///
    /// - `Null` is always empty.
    /// - `Array` and `Object` are empty when they hold no elements.
    /// - Other variants are never empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Null => true,
            Self::Array(array) => array.is_empty(),
            Self::Object(object) => object.is_empty(),
            Self::Bool(_)
            | Self::Int(_)
            | Self::Float(_)
            | Self::Str(_)
            | Self::DateTime(_)
            | Self::Instance(_)
            | Self::Enum(_) => false,
        }
    }

    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Standard truth test: non-null, non-empty string, non-empty
    /// sequence, non-zero number, `true`.
    #[must_use]
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Null => false,
            Self::Bool(b) => *b,
            Self::Int(n) => *n != 0,
            Self::Float(n) => *n != 0.0,
            Self::Str(s) => !s.is_empty(),
            Self::Array(array) => !array.is_empty(),
            Self::Object(object) => !object.is_empty(),
            Self::DateTime(_) | Self::Instance(_) | Self::Enum(_) => true,
        }
    }

    /// Whether the value is a scalar (usable as a `select_map` key).
    #[must_use]
    pub const fn is_scalar(&self) -> bool {
        matches!(
            self,
            Self::Bool(_) | Self::Int(_) | Self::Float(_) | Self::Str(_)
        )
    }

    /// The string form used by `${...}` substitution and discriminator
    /// lookup. Composite values render as JSON, which keeps them printable
    /// in diagnostics.
    #[must_use]
    pub fn to_text(&self) -> String {
        match self {
            Self::Null => String::new(),
            Self::Bool(b) => b.to_string(),
            Self::Int(n) => n.to_string(),
            Self::Float(n) => n.to_string(),
            Self::Str(s) => s.clone(),
            Self::DateTime(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
            Self::Enum(e) => e.case.clone(),
            Self::Array(_) | Self::Object(_) | Self::Instance(_) => {
                serde_json::to_string(self).unwrap_or_default()
            }
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}
impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Int(i64::from(n))
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Float(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<chrono::NaiveDateTime> for Value {
    fn from(dt: chrono::NaiveDateTime) -> Self {
        Value::DateTime(dt)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::Array(items.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}

impl serde::Serialize for Value {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeMap;
        match self {
            Self::Null => serializer.serialize_unit(),
            Self::Bool(b) => serializer.serialize_bool(*b),
            Self::Int(n) => serializer.serialize_i64(*n),
            Self::Float(n) => serializer.serialize_f64(*n),
            Self::Str(s) => serializer.serialize_str(s),
            Self::DateTime(dt) => {
                serializer.serialize_str(&dt.format("%Y-%m-%d %H:%M:%S").to_string())
            }
            Self::Enum(e) => serializer.serialize_str(&e.case),
            Self::Array(array) => serializer.collect_seq(array),
            Self::Object(object) => serializer.collect_map(object),
            Self::Instance(instance) => {
                let mut map = serializer.serialize_map(Some(instance.properties.len()))?;
                for (key, value) in &instance.properties {
                    map.serialize_entry(key, value)?;
                }
                map.end()
            }
        }
    }
}

/// Converts a decoded JSON document into a [`Value`] tree. JSON objects
/// become ordered associative values.
#[must_use]
pub fn from_json(json: serde_json::Value) -> Value {
    match json {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(b),
        serde_json::Value::Number(n) => n
            .as_i64()
            .map_or_else(|| Value::Float(n.as_f64().unwrap_or(f64::NAN)), Value::Int),
        serde_json::Value::String(s) => Value::Str(s),
        serde_json::Value::Array(items) => Value::Array(items.into_iter().map(from_json).collect()),
        serde_json::Value::Object(entries) => Value::Object(
            entries
                .into_iter()
                .map(|(key, value)| (key, from_json(value)))
                .collect(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truthiness() {
        assert!(!Value::Null.is_truthy());
        assert!(!Value::Int(0).is_truthy());
        assert!(!Value::Str(String::new()).is_truthy());
        assert!(!Value::Array(vec![]).is_truthy());
        assert!(Value::Int(-1).is_truthy());
        assert!(Value::Str("0".into()).is_truthy());
        assert!(Value::Array(vec![Value::Null]).is_truthy());
    }

    #[test]
    fn test_to_text() {
        assert_eq!(Value::Null.to_text(), "");
        assert_eq!(Value::Int(42).to_text(), "42");
        assert_eq!(Value::Str("users".into()).to_text(), "users");
        assert_eq!(
            Value::Enum(EnumValue {
                enum_name: "Status".into(),
                case: "Active".into()
            })
            .to_text(),
            "Active"
        );
    }

    #[test]
    fn test_json_round_trip() {
        let json: serde_json::Value =
            serde_json::from_str(r#"{"a": 1, "b": [true, null], "c": {"d": "x"}}"#).unwrap();
        let value = from_json(json.clone());
        let encoded: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&value).unwrap()).unwrap();
        assert_eq!(json, encoded);
    }
}
