//! The two-phase placeholder resolver.
//!
//! Authored SQL reaches this module still carrying `${...}` substitution
//! markers and `#{...}` parameter markers (either directly for static
//! statements or as the output of a dynamic-tree evaluation). Phase one
//! splices `${...}` values into the text verbatim; phase two rewrites
//! every `#{...}` into a positional `?` and records an ordered
//! [`ParameterMapping`] for it. The result is a [`BoundSql`].

use crate::config::Configuration;
use crate::dynamic::{DynamicContext, SqlNode};
use crate::entity::EntityRegistry;
use crate::error::{Error, Result};
use crate::param_value::{ParamsMap, Value};
use crate::utils::is_valid_ident;
use strum_macros::Display;

/// Direction of a bound parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display)]
pub enum ParamMode {
    #[default]
    #[strum(to_string = "IN")]
    In,
    #[strum(to_string = "OUT")]
    Out,
    #[strum(to_string = "INOUT")]
    InOut,
}

impl ParamMode {
    fn parse(text: &str) -> Result<Self> {
        match text.to_ascii_uppercase().as_str() {
            "IN" => Ok(Self::In),
            "OUT" => Ok(Self::Out),
            "INOUT" => Ok(Self::InOut),
            other => Err(Error::config(
                "mode",
                format!("`{other}` is not a parameter mode"),
            )),
        }
    }
}

/// A single positional parameter recorded by phase two.
///
/// The property is a dotted path resolved against the caller's parameter
/// (or the additional bindings contributed by `bind`/`foreach`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterMapping {
    pub property: String,
    pub value_type: Option<String>,
    pub sql_type: Option<String>,
    pub mode: ParamMode,
    pub type_handler: Option<String>,
}

impl ParameterMapping {
    /// Parses the inside of a `#{...}` marker: a property path optionally
    /// followed by `key=value` attributes.
    pub fn parse(content: &str) -> Result<Self> {
        let mut parts = content.split(',');
        let property = parts
            .next()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .ok_or_else(|| Error::config("#{}", "empty parameter marker"))?;
        let mut mapping = Self {
            property: property.to_owned(),
            value_type: None,
            sql_type: None,
            mode: ParamMode::In,
            type_handler: None,
        };
        for attr in parts {
            let Some((key, value)) = attr.split_once('=') else {
                return Err(Error::config(
                    "#{}",
                    format!("malformed attribute `{attr}` in `#{{{content}}}`"),
                ));
            };
            let value = value.trim().to_owned();
            match key.trim() {
                "valueType" => mapping.value_type = Some(value),
                "sqlType" => mapping.sql_type = Some(value),
                "mode" => mapping.mode = ParamMode::parse(&value)?,
                "typeHandler" => mapping.type_handler = Some(value),
                other => {
                    return Err(Error::config(
                        "#{}",
                        format!("unknown attribute `{other}` in `#{{{content}}}`"),
                    ));
                }
            }
        }
        Ok(mapping)
    }
}

/// Final SQL with positional placeholders plus the ordered mappings that
/// fill them. `additional_parameters` carries bindings contributed during
/// dynamic evaluation (`bind` values, unique `foreach` item names).
#[derive(Debug, Clone, PartialEq)]
pub struct BoundSql {
    pub sql: String,
    pub parameter_mappings: Vec<ParameterMapping>,
    pub additional_parameters: ParamsMap,
}

impl BoundSql {
    #[must_use]
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            parameter_mappings: Vec::new(),
            additional_parameters: ParamsMap::new(),
        }
    }
}

/// Scans `text` for `open`...`close` tokens and replaces each through the
/// handler. Unterminated tokens pass through verbatim.
pub(crate) fn replace_tokens(
    text: &str,
    open: &str,
    close: &str,
    mut handler: impl FnMut(&str) -> Result<String>,
) -> Result<String> {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find(open) {
        out.push_str(&rest[..start]);
        let after = &rest[start + open.len()..];
        match after.find(close) {
            None => {
                out.push_str(&rest[start..]);
                rest = "";
                break;
            }
            Some(end) => {
                out.push_str(&handler(&after[..end])?);
                rest = &after[end + close.len()..];
            }
        }
    }
    out.push_str(rest);
    Ok(out)
}

/// The two-phase builder itself.
pub struct SqlSourceBuilder<'a> {
    pub registry: &'a EntityRegistry,
    /// Reject `${...}` values that are not identifier-safe.
    pub strict_substitution: bool,
}

impl SqlSourceBuilder<'_> {
    /// Runs both phases over `text`. `bag` is the flattened caller
    /// parameter merged with dynamic bindings (bindings win).
    pub fn build(&self, text: &str, bag: &ParamsMap) -> Result<BoundSql> {
        let substituted = self.substitute(text, bag)?;
        let mut mappings = Vec::new();
        let sql = replace_tokens(&substituted, "#{", "}", |content| {
            mappings.push(ParameterMapping::parse(content)?);
            Ok("?".to_owned())
        })?;
        Ok(BoundSql {
            sql,
            parameter_mappings: mappings,
            additional_parameters: ParamsMap::new(),
        })
    }

    /// Phase one: `${path}` splices the string form of the resolved value.
    /// Missing values substitute the empty string. The caller owns the
    /// injection risk; these markers are reserved for identifiers such as
    /// table or column names.
    fn substitute(&self, text: &str, bag: &ParamsMap) -> Result<String> {
        replace_tokens(text, "${", "}", |content| {
            let path = content.trim();
            let value = self
                .registry
                .lookup(bag, path)
                .unwrap_or(Value::Null)
                .to_text();
            if self.strict_substitution && !value.is_empty() && !is_valid_ident(&value) {
                return Err(Error::config(
                    "${}",
                    format!("substitution for `{path}` is not identifier-safe: `{value}`"),
                ));
            }
            Ok(value)
        })
    }
}

/// A compiled SQL source attached to a mapped statement.
#[derive(Debug)]
pub enum SqlSource {
    /// Pre-parsed at registration; produced for statements without
    /// dynamic nodes or substitution markers.
    Static(StaticSqlSource),
    /// A dynamic tree evaluated per call.
    Dynamic(DynamicSqlSource),
}

impl SqlSource {
    /// Compiles raw statement text with no dynamic nodes. `#{...}`
    /// markers are resolved once, here; `${...}` markers force per-call
    /// building and are rejected.
    pub fn raw(text: &str) -> Result<Self> {
        if text.contains("${") {
            // Substitution depends on call parameters, so the text cannot
            // be frozen; wrap it in a single-node dynamic tree instead.
            return Ok(Self::Dynamic(DynamicSqlSource::new(SqlNode::text(text))));
        }
        let mut mappings = Vec::new();
        let sql = replace_tokens(text, "#{", "}", |content| {
            mappings.push(ParameterMapping::parse(content)?);
            Ok("?".to_owned())
        })?;
        Ok(Self::Static(StaticSqlSource {
            sql,
            parameter_mappings: mappings,
        }))
    }

    /// Wraps a dynamic tree.
    #[must_use]
    pub fn dynamic(root: SqlNode) -> Self {
        Self::Dynamic(DynamicSqlSource::new(root))
    }

    /// Produces the bound SQL for one execution.
    pub fn bound_sql(&self, config: &Configuration, parameter: &Value) -> Result<BoundSql> {
        match self {
            Self::Static(source) => Ok(BoundSql {
                sql: source.sql.clone(),
                parameter_mappings: source.parameter_mappings.clone(),
                additional_parameters: ParamsMap::new(),
            }),
            Self::Dynamic(source) => source.bound_sql(config, parameter),
        }
    }
}

/// A degenerate source returning a pre-parsed statement unchanged.
#[derive(Debug, Clone, PartialEq)]
pub struct StaticSqlSource {
    pub sql: String,
    pub parameter_mappings: Vec<ParameterMapping>,
}

/// A dynamic tree plus the per-call evaluation that flattens it.
#[derive(Debug)]
pub struct DynamicSqlSource {
    root: SqlNode,
}

impl DynamicSqlSource {
    #[must_use]
    pub fn new(root: SqlNode) -> Self {
        Self { root }
    }

    pub fn bound_sql(&self, config: &Configuration, parameter: &Value) -> Result<BoundSql> {
        let mut context = DynamicContext::new(config, parameter);
        self.root.apply(&mut context)?;
        let (text, bindings) = context.into_parts();

        let mut bag = config.entities().extract(parameter);
        // Dynamic bindings shadow extracted parameter properties.
        for (name, value) in &bindings {
            bag.insert(name.clone(), value.clone());
        }

        let builder = SqlSourceBuilder {
            registry: config.entities(),
            strict_substitution: config.settings().strict_substitution,
        };
        let mut bound = builder.build(&text, &bag)?;
        bound.additional_parameters = bindings;
        Ok(bound)
    }
}
