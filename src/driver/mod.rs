//! The database driver boundary.
//!
//! The engine talks to a relational database exclusively through these
//! traits: acquire a connection, prepare a statement, bind positional
//! values, execute, fetch rows, and drive transactions. Production
//! deployments implement them over a real client library; the bundled
//! [`memory`] driver implements them over scripted results for tests and
//! diagnostics.

pub mod memory;

use crate::error::Result;
use crate::param_value::Value;
use indexmap::IndexMap;
use url::Url;

/// One fetched row: an ordered column-name → value map.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Row {
    columns: IndexMap<String, Value>,
}

impl Row {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style column append, used when scripting results.
    #[must_use]
    pub fn with(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.columns.insert(column.into(), value.into());
        self
    }

    #[must_use]
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns.get(column)
    }

    #[must_use]
    pub fn get_index(&self, index: usize) -> Option<&Value> {
        self.columns.get_index(index).map(|(_, value)| value)
    }

    /// The first column, which scalar hydration reads.
    #[must_use]
    pub fn first(&self) -> Option<&Value> {
        self.get_index(0)
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns
            .iter()
            .map(|(name, value)| (name.as_str(), value))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

impl FromIterator<(String, Value)> for Row {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self {
            columns: iter.into_iter().collect(),
        }
    }
}

/// Options applied to every connection a source hands out.
///
/// The defaults mirror the standard client setup: errors raise instead of
/// returning sentinel values, fetches produce associative rows, and
/// placeholder handling is left to the server.
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    pub url: Option<Url>,
    pub fail_on_error: bool,
    pub associative_fetch: bool,
    pub emulate_placeholders: bool,
    /// Caller-supplied driver-specific options.
    pub extra: crate::param_value::ParamsMap,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            url: None,
            fail_on_error: true,
            associative_fetch: true,
            emulate_placeholders: false,
            extra: crate::param_value::ParamsMap::new(),
        }
    }
}

impl ConnectionOptions {
    pub fn parse_url(url: &str) -> Result<Self> {
        Ok(Self {
            url: Some(Url::parse(url)?),
            ..Self::default()
        })
    }
}

/// A driver: the factory for connections.
pub trait Driver: Send + Sync {
    fn connect(&self, options: &ConnectionOptions) -> Result<Box<dyn Connection>>;
}

/// A single database connection. Never accessed concurrently; the owning
/// session serializes all use.
pub trait Connection: Send {
    /// Prepares a statement with positional `?` placeholders.
    fn prepare(&mut self, sql: &str) -> Result<Box<dyn PreparedStatement>>;

    /// Opens an explicit transaction.
    fn begin(&mut self) -> Result<()>;

    fn commit(&mut self) -> Result<()>;

    fn rollback(&mut self) -> Result<()>;

    /// Whether an explicit transaction is open.
    fn in_transaction(&self) -> bool;

    /// The id generated by the most recent insert, if the driver knows
    /// one.
    fn last_insert_id(&self) -> Option<i64>;

    /// Closing twice is a no-op.
    fn close(&mut self) -> Result<()>;
}

/// A prepared statement. Bind positions are zero-based and follow
/// placeholder order in the SQL text.
pub trait PreparedStatement: Send {
    fn sql(&self) -> &str;

    /// Per-call timeout in milliseconds; zero keeps the driver default.
    fn set_timeout_millis(&mut self, timeout: u64);

    fn set_fetch_size(&mut self, fetch_size: u32);

    fn bind_value(&mut self, index: usize, value: Value) -> Result<()>;

    /// Binds SQL NULL, optionally tagged with a declared SQL type.
    fn bind_null(&mut self, index: usize, sql_type: Option<&str>) -> Result<()>;

    /// Executes a write and returns the affected-row count.
    fn execute_update(&mut self) -> Result<u64>;

    /// Executes a query and fetches all rows.
    fn execute_query(&mut self) -> Result<Vec<Row>>;
}
