//! Sessions: the application-facing surface of the engine.
//!
//! A [`Session`] resolves named statements in the shared configuration,
//! dispatches them through its executor, tracks dirtiness across writes,
//! and drives the commit/rollback/close lifecycle. Sessions are opened by
//! a [`SessionFactory`] and are strictly single-threaded units.


use crate::config::{Configuration, ExecutorType, HydrationMode, MappedStatement, StatementKind};
use crate::driver::Row;
use crate::error::{Error, Result};
use crate::executor::{build_executor, Executor};
use crate::hydrator::Hydrator;
use crate::datasource::ConnectionSource;
use crate::param_value::Value;
use crate::telemetry::QueryInfo;
use crate::transaction::TransactionFactory;
use indexmap::IndexMap;
use std::sync::Arc;

/// Opens sessions against the configured environments.
pub struct SessionFactory {
    config: Arc<Configuration>,
}

impl SessionFactory {
    #[must_use]
    pub fn new(config: Configuration) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    #[must_use]
    pub fn from_arc(config: Arc<Configuration>) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn config(&self) -> &Arc<Configuration> {
        &self.config
    }

    /// Opens a session on the default environment with the configured
    /// executor type and autocommit off.
    pub fn open_session(&self) -> Result<Session> {
        self.open_session_with(self.config.settings().default_executor_type, false)
    }

    /// Opens a session with an explicit executor strategy and autocommit
    /// flag.
    pub fn open_session_with(
        &self,
        executor_type: ExecutorType,
        auto_commit: bool,
    ) -> Result<Session> {
        self.open_session_in(None, executor_type, auto_commit)
    }

    /// Opens a session on a named environment. `None` selects the
    /// default environment and fails when none is registered.
    pub fn open_session_in(
        &self,
        environment_id: Option<&str>,
        executor_type: ExecutorType,
        auto_commit: bool,
    ) -> Result<Session> {
        let environment = self.config.environment(environment_id)?;
        let connection = environment.data_source.get_connection()?;
        let transaction = environment.transaction_factory.new_transaction(
            connection,
            Arc::clone(&environment.data_source),
            auto_commit,
        );
        let executor = build_executor(executor_type, Arc::clone(&self.config), transaction);
        Ok(Session {
            config: Arc::clone(&self.config),
            executor,
            auto_commit,
            dirty: false,
            closed: false,
        })
    }
}

/// One unit of work against the database.
pub struct Session {
    config: Arc<Configuration>,
    executor: Box<dyn Executor>,
    auto_commit: bool,
    dirty: bool,
    closed: bool,
}

impl Session {
    #[must_use]
    pub fn configuration(&self) -> &Arc<Configuration> {
        &self.config
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            Err(Error::SessionClosed)
        } else {
            Ok(())
        }
    }

    fn query_statement(&self, id: &str) -> Result<Arc<MappedStatement>> {
        let statement = self.config.statement(id)?;
        if statement.kind.is_query() {
            Ok(statement)
        } else {
            Err(Error::StatementKindMismatch {
                statement_id: id.to_owned(),
                expected: "SELECT".to_owned(),
                actual: statement.kind.to_string(),
            })
        }
    }

    fn write_statement(&self, id: &str) -> Result<Arc<MappedStatement>> {
        let statement = self.config.statement(id)?;
        if statement.kind.is_write() {
            Ok(statement)
        } else {
            Err(Error::StatementKindMismatch {
                statement_id: id.to_owned(),
                expected: "INSERT, UPDATE or DELETE".to_owned(),
                actual: statement.kind.to_string(),
            })
        }
    }

    /// Executes a query and returns the ordered result sequence.
    pub fn select_list(&mut self, id: &str, parameter: &Value) -> Result<Vec<Value>> {
        self.ensure_open()?;
        let statement = self.query_statement(id)?;
        self.executor.query(&statement, parameter)
    }

    /// `select_list` with a per-call hydration override.
    pub fn select_list_with(
        &mut self,
        id: &str,
        parameter: &Value,
        hydration: HydrationMode,
    ) -> Result<Vec<Value>> {
        self.ensure_open()?;
        let mut statement = (*self.query_statement(id)?).clone();
        statement.hydration = Some(hydration);
        self.executor.query(&statement, parameter)
    }

    /// Executes a query expected to produce at most one row. Zero rows
    /// is `None`; more than one row is a query error.
    pub fn select_one(&mut self, id: &str, parameter: &Value) -> Result<Option<Value>> {
        let mut values = self.select_list(id, parameter)?;
        match values.len() {
            0 => Ok(None),
            1 => Ok(values.pop()),
            count => Err(Error::TooManyRows {
                statement_id: id.to_owned(),
                count,
            }),
        }
    }

    /// Executes a query and keys each result by the named property, in
    /// result order. Results whose key is not a scalar are skipped.
    pub fn select_map(
        &mut self,
        id: &str,
        parameter: &Value,
        key_property: &str,
    ) -> Result<IndexMap<String, Value>> {
        let values = self.select_list(id, parameter)?;
        let mut keyed = IndexMap::new();
        for value in values {
            let Some(key) = self.config.entities().property(&value, key_property) else {
                continue;
            };
            if !key.is_scalar() {
                continue;
            }
            keyed.insert(key.to_text(), value);
        }
        Ok(keyed)
    }

    /// Executes a SELECT and returns a lazy, single-pass cursor that
    /// hydrates row by row.
    pub fn select_cursor(&mut self, id: &str, parameter: &Value) -> Result<Cursor> {
        self.ensure_open()?;
        let statement = self.config.statement(id)?;
        if statement.kind != StatementKind::Select {
            return Err(Error::StatementKindMismatch {
                statement_id: id.to_owned(),
                expected: "SELECT".to_owned(),
                actual: statement.kind.to_string(),
            });
        }
        let rows = self.executor.query_rows(&statement, parameter)?;
        Ok(Cursor {
            config: Arc::clone(&self.config),
            statement: (*statement).clone(),
            rows: rows.into_iter(),
        })
    }

    /// Dispatches an INSERT statement and tags the session dirty.
    pub fn insert(&mut self, id: &str, parameter: &mut Value) -> Result<i64> {
        self.run_update(id, parameter)
    }

    /// Dispatches an UPDATE statement and tags the session dirty.
    pub fn update(&mut self, id: &str, parameter: &mut Value) -> Result<i64> {
        self.run_update(id, parameter)
    }

    /// Dispatches a DELETE statement and tags the session dirty. The
    /// write kinds are interchangeable, so soft-delete UPDATEs may be
    /// invoked here.
    pub fn delete(&mut self, id: &str, parameter: &mut Value) -> Result<i64> {
        self.run_update(id, parameter)
    }

    fn run_update(&mut self, id: &str, parameter: &mut Value) -> Result<i64> {
        self.ensure_open()?;
        let statement = self.write_statement(id)?;
        let affected = self.executor.update(&statement, parameter)?;
        self.dirty = true;
        Ok(affected)
    }

    /// Executes deferred batch work; row counts come back in submission
    /// order.
    pub fn flush_statements(&mut self) -> Result<Vec<i64>> {
        self.ensure_open()?;
        self.executor.flush_statements()
    }

    pub fn commit(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.executor.commit(!self.auto_commit)?;
        self.dirty = false;
        Ok(())
    }

    pub fn rollback(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.executor.rollback(!self.auto_commit)?;
        self.dirty = false;
        Ok(())
    }

    /// Closes the session, forcing a rollback when uncommitted writes
    /// are pending and autocommit is off. Idempotent.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        let force_rollback = self.dirty && !self.auto_commit;
        self.executor.close(force_rollback)?;
        self.dirty = false;
        self.closed = true;
        Ok(())
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Telemetry for the most recent execution on this session.
    #[must_use]
    pub fn last_query(&self) -> Option<&QueryInfo> {
        self.executor.last_query()
    }

    /// Resolves a registered mapper interface. The proxy is the pair of
    /// this lookup and [`Session::invoke`].
    pub fn mapper(&self, name: &str) -> Result<Arc<MapperInterface>> {
        self.config
            .mapper(name)
            .ok_or_else(|| Error::config(name, "mapper interface is not registered"))
    }

    /// Invokes a mapper method: the bound statement id is
    /// `<interface>.<method>`, arguments bind by declared parameter name,
    /// and the method's declared return shape drives dispatch. A single
    /// argument with no declared names forwards as the raw parameter.
    pub fn invoke(&mut self, interface: &str, method: &str, args: Vec<Value>) -> Result<Value> {
        let mapper = self.mapper(interface)?;
        let signature = mapper
            .methods
            .get(method)
            .ok_or_else(|| {
                Error::config(
                    format!("{interface}.{method}"),
                    "mapper method is not declared",
                )
            })?
            .clone();
        let statement_id = format!("{interface}.{method}");

        let mut parameter = if signature.param_names.is_empty() && args.len() == 1 {
            args.into_iter().next().unwrap_or(Value::Null)
        } else {
            let mut bag = IndexMap::new();
            for (index, name) in signature.param_names.iter().enumerate() {
                let value = args.get(index).cloned().unwrap_or(Value::Null);
                bag.insert(name.clone(), value);
            }
            Value::Object(bag)
        };

        match signature.returns {
            MapperReturn::Many => Ok(Value::Array(self.select_list(&statement_id, &parameter)?)),
            MapperReturn::One => Ok(self
                .select_one(&statement_id, &parameter)?
                .unwrap_or(Value::Null)),
            MapperReturn::Scalar => {
                let mut values =
                    self.select_list_with(&statement_id, &parameter, HydrationMode::Scalar)?;
                match values.len() {
                    0 => Ok(Value::Null),
                    1 => Ok(values.pop().unwrap_or(Value::Null)),
                    count => Err(Error::TooManyRows {
                        statement_id,
                        count,
                    }),
                }
            }
            MapperReturn::Affected => Ok(Value::Int(self.run_update(&statement_id, &mut parameter)?)),
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

/// A lazy, single-pass sequence over a query's rows. Fetching happened
/// when the cursor was created; hydration happens per item.
pub struct Cursor {
    config: Arc<Configuration>,
    statement: MappedStatement,
    rows: std::vec::IntoIter<Row>,
}

impl Iterator for Cursor {
    type Item = Result<Value>;

    fn next(&mut self) -> Option<Self::Item> {
        let row = self.rows.next()?;
        Some(Hydrator::new(&self.config).hydrate_row(&row, &self.statement))
    }
}

/// How a mapper method shapes its result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapperReturn {
    /// Nullable single result.
    One,
    /// Ordered sequence.
    Many,
    /// Single value with scalar hydration.
    Scalar,
    /// Affected-row count from a write statement.
    Affected,
}

/// One method of a mapper interface.
#[derive(Debug, Clone)]
pub struct MapperMethod {
    pub name: String,
    pub returns: MapperReturn,
    pub param_names: Vec<String>,
}

/// A registered mapper interface: statement ids are
/// `<interface>.<method>`.
#[derive(Debug, Clone)]
pub struct MapperInterface {
    pub name: String,
    pub methods: IndexMap<String, MapperMethod>,
}

impl MapperInterface {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            methods: IndexMap::new(),
        }
    }

    #[must_use]
    pub fn method(
        mut self,
        name: &str,
        returns: MapperReturn,
        param_names: impl IntoIterator<Item = &'static str>,
    ) -> Self {
        self.methods.insert(
            name.to_owned(),
            MapperMethod {
                name: name.to_owned(),
                returns,
                param_names: param_names.into_iter().map(str::to_owned).collect(),
            },
        );
        self
    }
}

/// Builds an associative parameter from name/value pairs; the common way
/// to call session operations.
#[must_use]
pub fn params(entries: impl IntoIterator<Item = (&'static str, Value)>) -> Value {
    let mut object = IndexMap::new();
    for (name, value) in entries {
        object.insert(name.to_owned(), value);
    }
    Value::Object(object)
}
