//! Per-logical-type value marshaling.
//!
//! A [`TypeHandler`] owns both directions of a logical type: writing a
//! runtime value into a prepared statement and reading a column back out
//! of a row. Handlers are looked up by case-insensitive name or by the
//! runtime shape of a value; unknown names fall back to the string
//! handler, which preserves raw input as far as reasonably possible.

use crate::driver::{PreparedStatement, Row};
use crate::error::{Error, Result};
use crate::param_value::{from_json, EnumValue, Value};
use dashmap::DashMap;
use std::sync::Arc;

/// Converts values between the engine and the driver for one logical
/// type.
pub trait TypeHandler: Send + Sync {
    /// Converts a non-null runtime value into its driver representation.
    fn to_sql(&self, value: &Value) -> Result<Value>;

    /// Converts a non-null column value into its runtime representation.
    fn from_sql(&self, value: &Value) -> Result<Value>;

    /// Writes `value` into the statement at `index`. Null binds as SQL
    /// NULL.
    fn bind(
        &self,
        stmt: &mut dyn PreparedStatement,
        index: usize,
        value: &Value,
        sql_type: Option<&str>,
    ) -> Result<()> {
        if value.is_null() {
            stmt.bind_null(index, sql_type)
        } else {
            stmt.bind_value(index, self.to_sql(value)?)
        }
    }

    /// Reads the named column of a row.
    fn result(&self, row: &Row, column: &str) -> Result<Value> {
        match row.get(column) {
            None => Err(Error::conversion(format!("column `{column}` not found"))),
            Some(Value::Null) => Ok(Value::Null),
            Some(value) => self.from_sql(value),
        }
    }

    /// Reads a column of a row by position.
    fn result_at(&self, row: &Row, index: usize) -> Result<Value> {
        match row.get_index(index) {
            None => Err(Error::conversion(format!("column #{index} not found"))),
            Some(Value::Null) => Ok(Value::Null),
            Some(value) => self.from_sql(value),
        }
    }
}

// Primitive coercion rules shared with scalar hydration.

/// Integer coercion: numeric strings parse, floats truncate, booleans map
/// to 0/1, anything non-numeric yields zero.
#[must_use]
pub fn coerce_int(value: &Value) -> i64 {
    match value {
        Value::Int(n) => *n,
        Value::Float(n) => *n as i64,
        Value::Bool(b) => i64::from(*b),
        Value::Str(s) => s
            .trim()
            .parse::<i64>()
            .ok()
            .or_else(|| s.trim().parse::<f64>().ok().map(|f| f as i64))
            .unwrap_or(0),
        _ => 0,
    }
}

/// Float coercion with the same fallback-to-zero rule.
#[must_use]
pub fn coerce_float(value: &Value) -> f64 {
    match value {
        Value::Float(n) => *n,
        Value::Int(n) => *n as f64,
        Value::Bool(b) => f64::from(u8::from(*b)),
        Value::Str(s) => s.trim().parse::<f64>().unwrap_or(0.0),
        _ => 0.0,
    }
}

/// Boolean coercion: the textual forms `true|false|yes|no|on|off|t|y|1|0`
/// (case-insensitive), plus any non-zero number.
#[must_use]
pub fn coerce_bool(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Int(n) => *n != 0,
        Value::Float(n) => *n != 0.0,
        Value::Str(s) => matches!(
            s.trim().to_ascii_lowercase().as_str(),
            "true" | "yes" | "on" | "t" | "y" | "1"
        ),
        _ => false,
    }
}

struct IntegerTypeHandler;

impl TypeHandler for IntegerTypeHandler {
    fn to_sql(&self, value: &Value) -> Result<Value> {
        Ok(Value::Int(coerce_int(value)))
    }

    fn from_sql(&self, value: &Value) -> Result<Value> {
        Ok(Value::Int(coerce_int(value)))
    }
}

struct FloatTypeHandler;

impl TypeHandler for FloatTypeHandler {
    fn to_sql(&self, value: &Value) -> Result<Value> {
        Ok(Value::Float(coerce_float(value)))
    }

    fn from_sql(&self, value: &Value) -> Result<Value> {
        Ok(Value::Float(coerce_float(value)))
    }
}

struct StringTypeHandler;

impl TypeHandler for StringTypeHandler {
    fn to_sql(&self, value: &Value) -> Result<Value> {
        Ok(match value {
            Value::Str(_) => value.clone(),
            other => Value::Str(other.to_text()),
        })
    }

    fn from_sql(&self, value: &Value) -> Result<Value> {
        // The fallback handler: keep whatever the driver produced when it
        // is already string-shaped, stringify otherwise.
        Ok(match value {
            Value::Str(_) => value.clone(),
            other => Value::Str(other.to_text()),
        })
    }
}

struct BooleanTypeHandler;

impl TypeHandler for BooleanTypeHandler {
    fn to_sql(&self, value: &Value) -> Result<Value> {
        Ok(Value::Bool(coerce_bool(value)))
    }

    fn from_sql(&self, value: &Value) -> Result<Value> {
        Ok(Value::Bool(coerce_bool(value)))
    }
}

struct JsonTypeHandler;

impl TypeHandler for JsonTypeHandler {
    fn to_sql(&self, value: &Value) -> Result<Value> {
        Ok(match value {
            Value::Str(_) => value.clone(),
            other => Value::Str(serde_json::to_string(other)?),
        })
    }

    fn from_sql(&self, value: &Value) -> Result<Value> {
        match value {
            Value::Str(text) => Ok(from_json(serde_json::from_str(text)?)),
            Value::Array(_) | Value::Object(_) => Ok(value.clone()),
            other => Err(Error::conversion(format!(
                "cannot decode {other:?} as JSON"
            ))),
        }
    }
}

/// Bi-directional date-time marshaling with a configurable textual
/// format. Distinct registrations may carry distinct formats.
pub struct DateTimeTypeHandler {
    format: String,
}

impl DateTimeTypeHandler {
    #[must_use]
    pub fn new(format: impl Into<String>) -> Self {
        Self {
            format: format.into(),
        }
    }
}

impl Default for DateTimeTypeHandler {
    fn default() -> Self {
        Self::new("%Y-%m-%d %H:%M:%S")
    }
}

impl TypeHandler for DateTimeTypeHandler {
    fn to_sql(&self, value: &Value) -> Result<Value> {
        match value {
            Value::DateTime(dt) => Ok(Value::Str(dt.format(&self.format).to_string())),
            Value::Str(_) => Ok(value.clone()),
            other => Err(Error::conversion(format!(
                "cannot bind {other:?} as a date-time"
            ))),
        }
    }

    fn from_sql(&self, value: &Value) -> Result<Value> {
        match value {
            Value::DateTime(_) => Ok(value.clone()),
            Value::Str(text) => Ok(Value::DateTime(chrono::NaiveDateTime::parse_from_str(
                text,
                &self.format,
            )?)),
            other => Err(Error::conversion(format!(
                "cannot read {other:?} as a date-time"
            ))),
        }
    }
}

/// One case of a registered enum type.
#[derive(Debug, Clone, PartialEq)]
pub struct EnumCase {
    pub name: String,
    /// Backing scalar for backed enums; `None` for unbacked cases.
    pub backing: Option<Value>,
}

/// Declarative shape of an application enum.
#[derive(Debug, Clone, PartialEq)]
pub struct EnumDef {
    pub name: String,
    pub cases: Vec<EnumCase>,
}

impl EnumDef {
    /// An unbacked enum: cases round-trip through their names.
    pub fn unbacked(
        name: impl Into<String>,
        cases: impl IntoIterator<Item = &'static str>,
    ) -> Self {
        Self {
            name: name.into(),
            cases: cases
                .into_iter()
                .map(|case| EnumCase {
                    name: case.to_owned(),
                    backing: None,
                })
                .collect(),
        }
    }

    /// A backed enum: cases round-trip through their backing scalar.
    pub fn backed(
        name: impl Into<String>,
        cases: impl IntoIterator<Item = (&'static str, Value)>,
    ) -> Self {
        Self {
            name: name.into(),
            cases: cases
                .into_iter()
                .map(|(case, backing)| EnumCase {
                    name: case.to_owned(),
                    backing: Some(backing),
                })
                .collect(),
        }
    }

    fn case_named(&self, name: &str) -> Option<&EnumCase> {
        self.cases.iter().find(|case| case.name == name)
    }

    fn case_backed_by(&self, value: &Value) -> Option<&EnumCase> {
        self.cases.iter().find(|case| {
            case.backing
                .as_ref()
                .is_some_and(|backing| backing == value || backing.to_text() == value.to_text())
        })
    }
}

struct EnumTypeHandler {
    def: EnumDef,
}

impl EnumTypeHandler {
    fn invalid(&self, value: &Value) -> Error {
        Error::InvalidEnumValue {
            enum_name: self.def.name.clone(),
            value: value.to_text(),
        }
    }
}

impl TypeHandler for EnumTypeHandler {
    fn to_sql(&self, value: &Value) -> Result<Value> {
        let case = match value {
            Value::Enum(e) => self.def.case_named(&e.case),
            Value::Str(s) => self.def.case_named(s),
            other => self.def.case_backed_by(other),
        }
        .ok_or_else(|| self.invalid(value))?;
        Ok(match &case.backing {
            Some(backing) => backing.clone(),
            None => Value::Str(case.name.clone()),
        })
    }

    fn from_sql(&self, value: &Value) -> Result<Value> {
        let case = if self.def.cases.iter().any(|c| c.backing.is_some()) {
            self.def.case_backed_by(value)
        } else {
            self.def.case_named(&value.to_text())
        }
        .ok_or_else(|| self.invalid(value))?;
        Ok(Value::Enum(EnumValue {
            enum_name: self.def.name.clone(),
            case: case.name.clone(),
        }))
    }
}

/// Shared lookup from case-insensitive type name to handler.
pub struct TypeHandlerRegistry {
    handlers: DashMap<String, Arc<dyn TypeHandler>>,
    fallback: Arc<dyn TypeHandler>,
}

impl Default for TypeHandlerRegistry {
    fn default() -> Self {
        let registry = Self {
            handlers: DashMap::new(),
            fallback: Arc::new(StringTypeHandler),
        };
        registry.register("int", Arc::new(IntegerTypeHandler));
        registry.register("integer", Arc::new(IntegerTypeHandler));
        registry.register("float", Arc::new(FloatTypeHandler));
        registry.register("double", Arc::new(FloatTypeHandler));
        registry.register("string", Arc::new(StringTypeHandler));
        registry.register("bool", Arc::new(BooleanTypeHandler));
        registry.register("boolean", Arc::new(BooleanTypeHandler));
        registry.register("json", Arc::new(JsonTypeHandler));
        registry.register("datetime", Arc::new(DateTimeTypeHandler::default()));
        registry.register(
            "datetime_immutable",
            Arc::new(DateTimeTypeHandler::default()),
        );
        registry
    }
}

impl TypeHandlerRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, name: &str, handler: Arc<dyn TypeHandler>) {
        self.handlers.insert(name.to_ascii_lowercase(), handler);
    }

    /// Registers the enum handler for `def` under the enum's name.
    pub fn register_enum(&self, def: EnumDef) {
        let name = def.name.clone();
        self.register(&name, Arc::new(EnumTypeHandler { def }));
    }

    /// Resolves a handler by name; unknown names fall back to the string
    /// handler.
    #[must_use]
    pub fn resolve(&self, name: &str) -> Arc<dyn TypeHandler> {
        self.handlers
            .get(&name.to_ascii_lowercase())
            .map_or_else(|| Arc::clone(&self.fallback), |entry| Arc::clone(entry.value()))
    }

    /// Whether a handler is registered under `name`.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(&name.to_ascii_lowercase())
    }

    /// Picks a handler by runtime value: registered type identity first
    /// (instances and enums), then primitive kind, then the fallback.
    #[must_use]
    pub fn for_value(&self, value: &Value) -> Arc<dyn TypeHandler> {
        let name = match value {
            Value::Instance(instance) => Some(instance.type_name.as_str()),
            Value::Enum(e) => Some(e.enum_name.as_str()),
            Value::Int(_) => Some("int"),
            Value::Float(_) => Some("float"),
            Value::Bool(_) => Some("bool"),
            Value::Str(_) => Some("string"),
            Value::DateTime(_) => Some("datetime"),
            Value::Array(_) | Value::Object(_) => Some("json"),
            Value::Null => None,
        };
        match name {
            Some(name) if self.contains(name) => self.resolve(name),
            _ => Arc::clone(&self.fallback),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn row(column: &str, value: Value) -> Row {
        Row::new().with(column, value)
    }

    #[test]
    fn test_integer_coercion() {
        let registry = TypeHandlerRegistry::new();
        let handler = registry.resolve("INT");
        assert_eq!(
            handler.result(&row("n", Value::Str("42".into())), "n").unwrap(),
            Value::Int(42)
        );
        assert_eq!(
            handler.result(&row("n", Value::Str("oops".into())), "n").unwrap(),
            Value::Int(0)
        );
        assert_eq!(
            handler.result(&row("n", Value::Float(3.9)), "n").unwrap(),
            Value::Int(3)
        );
    }

    #[test]
    fn test_boolean_coercion_tokens() {
        for text in ["yes", "On", "T", "1", "TRUE", "y"] {
            assert!(coerce_bool(&Value::Str(text.into())), "{text}");
        }
        for text in ["no", "off", "f", "0", "false", "n", "whatever"] {
            assert!(!coerce_bool(&Value::Str(text.into())), "{text}");
        }
        assert!(coerce_bool(&Value::Int(-3)));
        assert!(!coerce_bool(&Value::Int(0)));
    }

    #[test]
    fn test_null_binds_as_null() {
        let registry = TypeHandlerRegistry::new();
        let handler = registry.resolve("string");
        assert_eq!(
            handler.result(&row("c", Value::Null), "c").unwrap(),
            Value::Null
        );
    }

    #[test]
    fn test_json_round_trip() {
        let registry = TypeHandlerRegistry::new();
        let handler = registry.resolve("json");
        let mut object = indexmap::IndexMap::new();
        object.insert("a".to_string(), Value::Array(vec![Value::Int(1)]));
        let value = Value::Object(object);
        let encoded = handler.to_sql(&value).unwrap();
        assert!(matches!(encoded, Value::Str(_)));
        assert_eq!(handler.from_sql(&encoded).unwrap(), value);
    }

    #[test]
    fn test_datetime_round_trip() {
        let handler = DateTimeTypeHandler::default();
        let dt = NaiveDate::from_ymd_opt(2024, 5, 17)
            .unwrap()
            .and_hms_opt(10, 30, 0)
            .unwrap();
        let encoded = handler.to_sql(&Value::DateTime(dt)).unwrap();
        assert_eq!(encoded, Value::Str("2024-05-17 10:30:00".into()));
        assert_eq!(handler.from_sql(&encoded).unwrap(), Value::DateTime(dt));
    }

    #[test]
    fn test_backed_enum_round_trip() {
        let registry = TypeHandlerRegistry::new();
        registry.register_enum(EnumDef::backed(
            "Status",
            [("Active", Value::Int(1)), ("Disabled", Value::Int(0))],
        ));
        let handler = registry.resolve("status");
        let value = handler.from_sql(&Value::Int(1)).unwrap();
        assert_eq!(
            value,
            Value::Enum(EnumValue {
                enum_name: "Status".into(),
                case: "Active".into()
            })
        );
        assert_eq!(handler.to_sql(&value).unwrap(), Value::Int(1));
    }

    #[test]
    fn test_unbacked_enum_round_trip() {
        let registry = TypeHandlerRegistry::new();
        registry.register_enum(EnumDef::unbacked("Color", ["Red", "Green"]));
        let handler = registry.resolve("color");
        let value = handler.from_sql(&Value::Str("Green".into())).unwrap();
        assert_eq!(handler.to_sql(&value).unwrap(), Value::Str("Green".into()));
    }

    #[test]
    fn test_invalid_enum_value() {
        let registry = TypeHandlerRegistry::new();
        registry.register_enum(EnumDef::unbacked("Color", ["Red"]));
        let err = registry
            .resolve("color")
            .from_sql(&Value::Str("Blue".into()))
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Hydration);
    }

    #[test]
    fn test_unknown_name_falls_back_to_string() {
        let registry = TypeHandlerRegistry::new();
        let handler = registry.resolve("no_such_type");
        assert_eq!(
            handler.from_sql(&Value::Int(5)).unwrap(),
            Value::Str("5".into())
        );
    }

    #[test]
    fn test_for_value_lookup() {
        let registry = TypeHandlerRegistry::new();
        registry.register_enum(EnumDef::unbacked("Color", ["Red"]));
        let value = Value::Enum(EnumValue {
            enum_name: "Color".into(),
            case: "Red".into(),
        });
        assert_eq!(
            registry.for_value(&value).to_sql(&value).unwrap(),
            Value::Str("Red".into())
        );
        assert_eq!(
            registry
                .for_value(&Value::Bool(true))
                .to_sql(&Value::Bool(true))
                .unwrap(),
            Value::Bool(true)
        );
    }
}
