//! The dynamic SQL tree and its evaluator.
//!
//! A registered statement compiles to a tree of [`SqlNode`]s. Per
//! execution the tree is applied to a [`DynamicContext`], appending SQL
//! text and contributing bindings; the flattened text still carries
//! `${...}`/`#{...}` markers and is finished by the
//! [`crate::sql_source::SqlSourceBuilder`]. `apply` returns a
//! *contributed* flag so the trimming nodes know whether any inner
//! content produced output.

#[cfg(test)]
mod tests;

use crate::config::Configuration;
use crate::entity::EntityRegistry;
use crate::error::Result;
use crate::expr::{Expression, Scope};
use crate::param_value::{ParamsMap, Value};
use crate::sql_source::replace_tokens;
use crate::utils::StripAffixIgnoreAsciiCase;
use itertools::Itertools;
use trim_in_place::TrimInPlace;

/// Prefix for the unique per-iteration bindings allocated by `foreach`.
const FOREACH_BINDING_PREFIX: &str = "__frch_";

/// One node of a compiled dynamic statement.
#[derive(Debug, Clone)]
pub enum SqlNode {
    /// Literal SQL text, appended verbatim.
    Text(String),
    /// An ordered sequence of children.
    Mixed(Vec<SqlNode>),
    /// Conditional content gated by a test expression.
    If {
        test: Expression,
        inner: Box<SqlNode>,
    },
    /// First-match selection among `when` branches with an optional
    /// `otherwise`.
    Choose {
        whens: Vec<(Expression, SqlNode)>,
        otherwise: Option<Box<SqlNode>>,
    },
    /// Iteration over an array or associative value.
    Foreach {
        collection: Expression,
        item: String,
        index: Option<String>,
        open: String,
        close: String,
        separator: String,
        inner: Box<SqlNode>,
    },
    /// `WHERE`-prefixing trim that drops a leading `AND `/`OR `.
    Where(Box<SqlNode>),
    /// `SET`-prefixing trim that drops a trailing comma.
    Set(Box<SqlNode>),
    /// General affix trimming.
    Trim {
        inner: Box<SqlNode>,
        prefix: Option<String>,
        prefix_overrides: Vec<String>,
        suffix: Option<String>,
        suffix_overrides: Vec<String>,
    },
    /// Evaluates an expression once and stores it in the context
    /// bindings.
    Bind { name: String, value: Expression },
}

impl SqlNode {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    #[must_use]
    pub fn mixed(children: impl IntoIterator<Item = SqlNode>) -> Self {
        Self::Mixed(children.into_iter().collect())
    }

    pub fn if_(test: &str, inner: SqlNode) -> Result<Self> {
        Ok(Self::If {
            test: Expression::compile(test)?,
            inner: Box::new(inner),
        })
    }

    pub fn choose<'a>(
        whens: impl IntoIterator<Item = (&'a str, SqlNode)>,
        otherwise: Option<SqlNode>,
    ) -> Result<Self> {
        Ok(Self::Choose {
            whens: whens
                .into_iter()
                .map(|(test, node)| Ok((Expression::compile(test)?, node)))
                .collect::<Result<Vec<_>>>()?,
            otherwise: otherwise.map(Box::new),
        })
    }

    pub fn foreach(
        collection: &str,
        item: &str,
        index: Option<&str>,
        open: &str,
        close: &str,
        separator: &str,
        inner: SqlNode,
    ) -> Result<Self> {
        Ok(Self::Foreach {
            collection: Expression::compile(collection)?,
            item: item.to_owned(),
            index: index.map(str::to_owned),
            open: open.to_owned(),
            close: close.to_owned(),
            separator: separator.to_owned(),
            inner: Box::new(inner),
        })
    }

    #[must_use]
    pub fn where_(inner: SqlNode) -> Self {
        Self::Where(Box::new(inner))
    }

    #[must_use]
    pub fn set(inner: SqlNode) -> Self {
        Self::Set(Box::new(inner))
    }

    /// `prefix_overrides`/`suffix_overrides` are `|`-separated token
    /// lists compared case-insensitively, trailing spaces respected as
    /// authored.
    #[must_use]
    pub fn trim(
        inner: SqlNode,
        prefix: Option<&str>,
        prefix_overrides: Option<&str>,
        suffix: Option<&str>,
        suffix_overrides: Option<&str>,
    ) -> Self {
        Self::Trim {
            inner: Box::new(inner),
            prefix: prefix.map(str::to_owned),
            prefix_overrides: split_overrides(prefix_overrides),
            suffix: suffix.map(str::to_owned),
            suffix_overrides: split_overrides(suffix_overrides),
        }
    }

    pub fn bind(name: &str, value: &str) -> Result<Self> {
        Ok(Self::Bind {
            name: name.to_owned(),
            value: Expression::compile(value)?,
        })
    }

    /// Splices a named fragment in by substitution; `include` references
    /// are resolved to the fragment tree before statement registration.
    #[must_use]
    pub fn include(fragment: &SqlNode) -> Self {
        fragment.clone()
    }

    /// Applies this node to the context. Returns whether any output was
    /// contributed.
    pub fn apply(&self, context: &mut DynamicContext<'_>) -> Result<bool> {
        match self {
            Self::Text(text) => {
                context.append_sql(text);
                Ok(true)
            }
            Self::Mixed(children) => {
                let mut contributed = false;
                for child in children {
                    contributed |= child.apply(context)?;
                }
                Ok(contributed)
            }
            Self::If { test, inner } => {
                if context.evaluate_bool(test)? {
                    inner.apply(context)
                } else {
                    Ok(false)
                }
            }
            Self::Choose { whens, otherwise } => {
                for (test, node) in whens {
                    if context.evaluate_bool(test)? {
                        return node.apply(context);
                    }
                }
                match otherwise {
                    Some(node) => node.apply(context),
                    None => Ok(false),
                }
            }
            Self::Foreach {
                collection,
                item,
                index,
                open,
                close,
                separator,
                inner,
            } => Self::apply_foreach(
                context, collection, item, index.as_deref(), open, close, separator, inner,
            ),
            Self::Where(inner) => {
                let overrides: Vec<String> = ["AND ", "OR ", "AND\t", "OR\t", "AND\n", "OR\n"]
                    .iter()
                    .map(|s| (*s).to_owned())
                    .collect();
                Self::apply_trim(context, inner, Some("WHERE "), &overrides, None, &[])
            }
            Self::Set(inner) => {
                Self::apply_trim(context, inner, Some("SET "), &[], None, &[",".to_owned()])
            }
            Self::Trim {
                inner,
                prefix,
                prefix_overrides,
                suffix,
                suffix_overrides,
            } => Self::apply_trim(
                context,
                inner,
                prefix.as_deref(),
                prefix_overrides,
                suffix.as_deref(),
                suffix_overrides,
            ),
            Self::Bind { name, value } => {
                let value = context.evaluate(value)?;
                context.bind(name, value);
                Ok(true)
            }
        }
    }

    fn apply_trim(
        context: &mut DynamicContext<'_>,
        inner: &SqlNode,
        prefix: Option<&str>,
        prefix_overrides: &[String],
        suffix: Option<&str>,
        suffix_overrides: &[String],
    ) -> Result<bool> {
        let mut scratch = context.capture(|context| inner.apply(context).map(|_| ()))?;
        scratch.trim_in_place();
        if scratch.is_empty() {
            return Ok(false);
        }
        // First matching override wins; remaining tokens are not retried.
        for token in prefix_overrides {
            if let Some(rest) = scratch.strip_prefix_ignore_ascii_case(token) {
                scratch = rest.to_owned();
                break;
            }
        }
        for token in suffix_overrides {
            if let Some(rest) = scratch.strip_suffix_ignore_ascii_case(token) {
                scratch = rest.to_owned();
                break;
            }
        }
        let mut out = String::new();
        if let Some(prefix) = prefix {
            out.push_str(prefix);
        }
        out.push_str(&scratch);
        if let Some(suffix) = suffix {
            out.push_str(suffix);
        }
        context.append_separated(&out);
        Ok(true)
    }

    #[allow(clippy::too_many_arguments)]
    fn apply_foreach(
        context: &mut DynamicContext<'_>,
        collection: &Expression,
        item: &str,
        index: Option<&str>,
        open: &str,
        close: &str,
        separator: &str,
        inner: &SqlNode,
    ) -> Result<bool> {
        let resolved = context.evaluate(collection)?;
        let entries: Vec<(Value, Value)> = match resolved {
            Value::Array(items) => items
                .into_iter()
                .enumerate()
                .map(|(i, value)| (Value::Int(i64::try_from(i).unwrap_or(i64::MAX)), value))
                .collect(),
            Value::Object(object) => object
                .into_iter()
                .map(|(key, value)| (Value::Str(key), value))
                .collect(),
            _ => Vec::new(),
        };
        if entries.is_empty() {
            return Ok(false);
        }

        let mut pieces = Vec::with_capacity(entries.len());
        for (key, value) in entries {
            let number = context.unique_number();
            let unique_item = format!("{FOREACH_BINDING_PREFIX}{item}_{number}");
            context.bind(item, value.clone());
            context.bind(&unique_item, value);
            let unique_index = index.map(|index| {
                let unique_index = format!("{FOREACH_BINDING_PREFIX}{index}_{number}");
                context.bind(index, key.clone());
                context.bind(&unique_index, key.clone());
                unique_index
            });

            let piece = context.capture(|context| inner.apply(context).map(|_| ()))?;
            // Rebase loop-local references onto the unique bindings so
            // per-iteration values survive until the build phases run.
            let mut piece = rebase_tokens(&piece, "#{", item, &unique_item)?;
            piece = rebase_tokens(&piece, "${", item, &unique_item)?;
            if let (Some(index), Some(unique_index)) = (index, unique_index.as_deref()) {
                piece = rebase_tokens(&piece, "#{", index, unique_index)?;
                piece = rebase_tokens(&piece, "${", index, unique_index)?;
            }
            pieces.push(piece);
        }

        let mut out = String::new();
        out.push_str(open);
        out.push_str(&pieces.iter().join(separator));
        out.push_str(close);
        context.append_separated(&out);
        Ok(true)
    }
}

fn rebase_tokens(text: &str, open: &str, from: &str, to: &str) -> Result<String> {
    replace_tokens(text, open, "}", |content| {
        Ok(match rebase_marker(content, from, to) {
            Some(rebased) => format!("{open}{rebased}}}"),
            None => format!("{open}{content}}}"),
        })
    })
}

fn split_overrides(overrides: Option<&str>) -> Vec<String> {
    overrides
        .map(|tokens| tokens.split('|').map(str::to_owned).collect())
        .unwrap_or_default()
}

/// Rewrites the property path of a `#{...}` marker from the loop-local
/// name to its unique per-iteration binding, keeping attributes intact.
fn rebase_marker(content: &str, from: &str, to: &str) -> Option<String> {
    let (property, attrs) = match content.split_once(',') {
        Some((property, attrs)) => (property, Some(attrs)),
        None => (content, None),
    };
    let property = property.trim();
    let rebased = if property == from {
        to.to_owned()
    } else {
        let rest = property.strip_prefix(from)?;
        if !rest.starts_with('.') {
            return None;
        }
        format!("{to}{rest}")
    };
    Some(match attrs {
        Some(attrs) => format!("{rebased},{attrs}"),
        None => rebased,
    })
}

/// The per-execution builder the tree writes into.
///
/// Single-threaded and discarded after producing the final text: carries
/// the SQL buffer, the binding map, a flattened view of the caller's
/// parameter, and the monotonic counter used for unique placeholder
/// naming.
pub struct DynamicContext<'a> {
    registry: &'a EntityRegistry,
    parameter_bag: ParamsMap,
    sql: String,
    bindings: ParamsMap,
    unique: usize,
}

impl<'a> DynamicContext<'a> {
    #[must_use]
    pub fn new(config: &'a Configuration, parameter: &Value) -> Self {
        Self {
            registry: config.entities(),
            parameter_bag: config.entities().extract(parameter),
            sql: String::new(),
            bindings: ParamsMap::new(),
            unique: 0,
        }
    }

    pub fn append_sql(&mut self, fragment: &str) {
        self.sql.push_str(fragment);
    }

    /// Appends a fragment, inserting a single separating space when the
    /// buffer ends flush against previous text. Used by the trimming
    /// nodes, whose output has authored spacing stripped.
    fn append_separated(&mut self, fragment: &str) {
        if !self.sql.is_empty() && !self.sql.ends_with(char::is_whitespace) {
            self.sql.push(' ');
        }
        self.sql.push_str(fragment);
    }

    pub fn bind(&mut self, name: &str, value: Value) {
        self.bindings.insert(name.to_owned(), value);
    }

    /// Monotonically increasing counter; restarts at zero for each
    /// evaluation.
    pub fn unique_number(&mut self) -> usize {
        let number = self.unique;
        self.unique += 1;
        number
    }

    /// Runs `f` with an empty SQL buffer and returns what it produced,
    /// restoring the previous buffer. Bindings and the unique counter are
    /// shared with the capture.
    fn capture(&mut self, f: impl FnOnce(&mut Self) -> Result<()>) -> Result<String> {
        let saved = std::mem::take(&mut self.sql);
        let result = f(self);
        let captured = std::mem::replace(&mut self.sql, saved);
        result.map(|()| captured)
    }

    pub fn evaluate(&self, expression: &Expression) -> Result<Value> {
        expression.evaluate(&ContextScope(self))
    }

    pub fn evaluate_bool(&self, expression: &Expression) -> Result<bool> {
        expression.evaluate_bool(&ContextScope(self))
    }

    /// Tears the context down into the flattened SQL text and the
    /// contributed bindings.
    #[must_use]
    pub fn into_parts(self) -> (String, ParamsMap) {
        (self.sql, self.bindings)
    }

    #[must_use]
    pub fn sql(&self) -> &str {
        &self.sql
    }

    #[must_use]
    pub fn bindings(&self) -> &ParamsMap {
        &self.bindings
    }
}

/// Evaluation view: explicit bindings shadow the caller's parameter.
struct ContextScope<'a, 'b>(&'a DynamicContext<'b>);

impl Scope for ContextScope<'_, '_> {
    fn root(&self, name: &str) -> Option<Value> {
        self.0
            .bindings
            .get(name)
            .or_else(|| self.0.parameter_bag.get(name))
            .cloned()
    }

    fn property(&self, base: &Value, name: &str) -> Option<Value> {
        self.0.registry.property(base, name)
    }
}
