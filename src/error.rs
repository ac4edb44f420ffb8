//! Error types for the mapping engine.
//!
//! Every failure surfaces through the structured [`Error`] enum. Variants
//! carry enough context to diagnose the failing statement (the final SQL
//! and bound parameters for driver failures, the offending expression for
//! evaluator failures) and group into the coarse [`ErrorKind`] taxonomy.

use crate::param_value::ParamsMap;
use std::fmt;

/// Coarse classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Invalid or incomplete configuration; raised at registration time.
    Configuration,
    /// Malformed dynamic expression or illegal operator application.
    Expression,
    /// Row-to-value construction failed.
    Hydration,
    /// Statement dispatch contract violated (row count, statement kind).
    Query,
    /// Driver-level failure during prepare/execute/fetch.
    Sql,
    /// Operation on a closed session or executor.
    State,
    /// Anything else (conversions, internal invariants).
    General,
}

/// The main error type for mapping-engine operations.
#[derive(Debug)]
pub enum Error {
    /// Invalid configuration value or registration.
    Configuration { option: String, message: String },

    /// A mapped statement id was registered twice.
    DuplicateStatement { id: String },

    /// A statement id was dispatched but never registered.
    UnknownStatement { id: String },

    /// A result map reference could not be resolved.
    UnknownResultMap { id: String },

    /// No environment registered under the requested id.
    UnknownEnvironment { id: String },

    /// Dynamic expression failed to parse.
    ExpressionParse { message: String, expression: String },

    /// Dynamic expression failed to evaluate.
    ExpressionEval { message: String, expression: String },

    /// A constructor parameter had no value, no default, and no null
    /// admission.
    MissingConstructorArg { type_name: String, parameter: String },

    /// A database value did not match any case of the target enum.
    InvalidEnumValue { enum_name: String, value: String },

    /// General hydration failure (unregistered nested map, bad target
    /// type).
    Hydration { message: String },

    /// `select_one` received more than one row.
    TooManyRows { statement_id: String, count: usize },

    /// A statement of the wrong kind was dispatched through a session
    /// operation.
    StatementKindMismatch {
        statement_id: String,
        expected: String,
        actual: String,
    },

    /// Driver-level failure, wrapping the final SQL and the parameters
    /// actually bound.
    Sql {
        message: String,
        sql: Option<String>,
        parameters: Option<ParamsMap>,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Connection acquisition failed.
    Connection {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Operation on a closed session.
    SessionClosed,

    /// Operation on a closed executor.
    ExecutorClosed,

    /// Value conversion failure.
    Conversion { message: String },
}

impl Error {
    /// Returns the coarse kind of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Configuration { .. }
            | Self::DuplicateStatement { .. }
            | Self::UnknownStatement { .. }
            | Self::UnknownResultMap { .. }
            | Self::UnknownEnvironment { .. } => ErrorKind::Configuration,
            Self::ExpressionParse { .. } | Self::ExpressionEval { .. } => ErrorKind::Expression,
            Self::MissingConstructorArg { .. }
            | Self::InvalidEnumValue { .. }
            | Self::Hydration { .. } => ErrorKind::Hydration,
            Self::TooManyRows { .. } | Self::StatementKindMismatch { .. } => ErrorKind::Query,
            Self::Sql { .. } | Self::Connection { .. } => ErrorKind::Sql,
            Self::SessionClosed | Self::ExecutorClosed => ErrorKind::State,
            Self::Conversion { .. } => ErrorKind::General,
        }
    }

    // Convenience constructors

    /// Creates a configuration error.
    pub fn config(option: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Configuration {
            option: option.into(),
            message: message.into(),
        }
    }

    /// Creates an expression parse error.
    pub fn expr_parse(message: impl Into<String>, expression: impl Into<String>) -> Self {
        Self::ExpressionParse {
            message: message.into(),
            expression: expression.into(),
        }
    }

    /// Creates an expression evaluation error.
    pub fn expr_eval(message: impl Into<String>, expression: impl Into<String>) -> Self {
        Self::ExpressionEval {
            message: message.into(),
            expression: expression.into(),
        }
    }

    /// Creates a hydration error.
    pub fn hydration(message: impl Into<String>) -> Self {
        Self::Hydration {
            message: message.into(),
        }
    }

    /// Creates a driver error without statement context.
    pub fn sql(message: impl Into<String>) -> Self {
        Self::Sql {
            message: message.into(),
            sql: None,
            parameters: None,
            source: None,
        }
    }

    /// Creates a driver error carrying the final SQL and the bound
    /// parameter map.
    pub fn sql_with_context(
        message: impl Into<String>,
        sql: impl Into<String>,
        parameters: ParamsMap,
    ) -> Self {
        Self::Sql {
            message: message.into(),
            sql: Some(sql.into()),
            parameters: Some(parameters),
            source: None,
        }
    }

    /// Creates a connection error.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a conversion error.
    pub fn conversion(message: impl Into<String>) -> Self {
        Self::Conversion {
            message: message.into(),
        }
    }

    /// Attaches statement context to a driver error, leaving other errors
    /// untouched.
    #[must_use]
    pub fn with_statement_context(self, sql: &str, parameters: &ParamsMap) -> Self {
        match self {
            Self::Sql {
                message,
                sql: old_sql,
                parameters: old_params,
                source,
            } => Self::Sql {
                message,
                sql: old_sql.or_else(|| Some(sql.to_owned())),
                parameters: old_params.or_else(|| Some(parameters.clone())),
                source,
            },
            other => other,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuration { option, message } => {
                write!(f, "Configuration error for `{option}`: {message}")
            }
            Self::DuplicateStatement { id } => {
                write!(f, "Mapped statement `{id}` is already registered")
            }
            Self::UnknownStatement { id } => write!(f, "Unknown mapped statement: `{id}`"),
            Self::UnknownResultMap { id } => write!(f, "Unknown result map: `{id}`"),
            Self::UnknownEnvironment { id } => write!(f, "Unknown environment: `{id}`"),
            Self::ExpressionParse {
                message,
                expression,
            } => {
                write!(
                    f,
                    "Expression parse error: {message}\nExpression: {expression}"
                )
            }
            Self::ExpressionEval {
                message,
                expression,
            } => {
                write!(f, "Expression error: {message}\nExpression: {expression}")
            }
            Self::MissingConstructorArg {
                type_name,
                parameter,
            } => write!(
                f,
                "No value for required constructor parameter `{parameter}` of `{type_name}`"
            ),
            Self::InvalidEnumValue { enum_name, value } => {
                write!(f, "`{value}` is not a case of enum `{enum_name}`")
            }
            Self::Hydration { message } => write!(f, "Hydration error: {message}"),
            Self::TooManyRows {
                statement_id,
                count,
            } => write!(f, "Expected one row from `{statement_id}`, got {count}"),
            Self::StatementKindMismatch {
                statement_id,
                expected,
                actual,
            } => write!(
                f,
                "Statement `{statement_id}` is {actual}, expected {expected}"
            ),
            Self::Sql {
                message,
                sql,
                parameters,
                ..
            } => {
                write!(f, "SQL error: {message}")?;
                if let Some(sql) = sql {
                    write!(f, "\nSQL: {sql}")?;
                }
                if let Some(parameters) = parameters {
                    write!(f, "\nParameters: {parameters:?}")?;
                }
                Ok(())
            }
            Self::Connection { message, .. } => write!(f, "Connection error: {message}"),
            Self::SessionClosed => write!(f, "Session is closed"),
            Self::ExecutorClosed => write!(f, "Executor is closed"),
            Self::Conversion { message } => write!(f, "Conversion error: {message}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Sql { source, .. } | Self::Connection { source, .. } => source
                .as_ref()
                .map(|e| e.as_ref() as &(dyn std::error::Error + 'static)),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Conversion {
            message: format!("JSON error: {err}"),
        }
    }
}

impl From<std::fmt::Error> for Error {
    fn from(err: std::fmt::Error) -> Self {
        Self::Conversion {
            message: format!("Format error: {err}"),
        }
    }
}

impl From<std::num::TryFromIntError> for Error {
    fn from(err: std::num::TryFromIntError) -> Self {
        Self::Conversion {
            message: err.to_string(),
        }
    }
}

impl From<chrono::ParseError> for Error {
    fn from(err: chrono::ParseError) -> Self {
        Self::Conversion {
            message: format!("Date-time parse error: {err}"),
        }
    }
}

impl From<url::ParseError> for Error {
    fn from(err: url::ParseError) -> Self {
        Self::Configuration {
            option: "url".to_string(),
            message: err.to_string(),
        }
    }
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;
