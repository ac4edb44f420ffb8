//! Executor strategies.
//!
//! An executor turns a mapped statement plus a caller parameter into
//! driver work: produce the bound SQL, consult the first-level cache,
//! prepare, bind through type handlers, execute, hydrate, and record
//! telemetry. The three strategies differ only in statement preparation
//! policy; everything else lives in [`ExecutorBase`].

mod batch;
mod reuse;
mod simple;

pub use batch::BatchExecutor;
pub use reuse::ReuseExecutor;
pub use simple::SimpleExecutor;

use crate::cache::CacheKey;
use crate::config::{Configuration, ExecutorType, MappedStatement};
use crate::driver::PreparedStatement;
use crate::error::{Error, Result};
use crate::hydrator::Hydrator;
use crate::param_value::{ParamsMap, Value};
use crate::sql_source::BoundSql;
use crate::telemetry::{QueryInfo, QueryTimer};
use crate::transaction::Transaction;
use crate::type_handler::TypeHandler;
use std::collections::HashMap;
use std::sync::Arc;

/// The sentinel row count returned by a deferred batch update.
pub const BATCH_UPDATE_PENDING: i64 = -1;

pub trait Executor: Send {
    /// Executes a query, consulting and populating the first-level
    /// cache.
    fn query(&mut self, statement: &MappedStatement, parameter: &Value) -> Result<Vec<Value>>;

    /// Executes a query and returns raw rows, bypassing the caches.
    /// Cursors hydrate these lazily.
    fn query_rows(
        &mut self,
        statement: &MappedStatement,
        parameter: &Value,
    ) -> Result<Vec<crate::driver::Row>>;

    /// Executes a write. Batch executors may defer and return
    /// [`BATCH_UPDATE_PENDING`]. Generated keys are written back into the
    /// parameter when the statement asks for them.
    fn update(&mut self, statement: &MappedStatement, parameter: &mut Value) -> Result<i64>;

    /// Executes deferred work and returns the real row counts in
    /// submission order.
    fn flush_statements(&mut self) -> Result<Vec<i64>>;

    fn commit(&mut self, required: bool) -> Result<()>;

    fn rollback(&mut self, required: bool) -> Result<()>;

    /// Releases the transaction. Close is idempotent.
    fn close(&mut self, force_rollback: bool) -> Result<()>;

    fn is_closed(&self) -> bool;

    /// The most recent execution's telemetry record.
    fn last_query(&self) -> Option<&QueryInfo>;
}

/// Builds the executor for the requested strategy.
#[must_use]
pub fn build_executor(
    executor_type: ExecutorType,
    config: Arc<Configuration>,
    transaction: Box<dyn Transaction>,
) -> Box<dyn Executor> {
    let base = ExecutorBase::new(config, transaction);
    match executor_type {
        ExecutorType::Simple => Box::new(SimpleExecutor::new(base)),
        ExecutorType::Reuse => Box::new(ReuseExecutor::new(base)),
        ExecutorType::Batch => Box::new(BatchExecutor::new(base)),
    }
}

/// Shared executor state and behavior.
pub(crate) struct ExecutorBase {
    pub(crate) config: Arc<Configuration>,
    pub(crate) transaction: Box<dyn Transaction>,
    local_cache: HashMap<CacheKey, Vec<Value>>,
    last_query: Option<QueryInfo>,
    closed: bool,
}

impl ExecutorBase {
    pub(crate) fn new(config: Arc<Configuration>, transaction: Box<dyn Transaction>) -> Self {
        Self {
            config,
            transaction,
            local_cache: HashMap::new(),
            last_query: None,
            closed: false,
        }
    }

    pub(crate) fn ensure_open(&self) -> Result<()> {
        if self.closed {
            Err(Error::ExecutorClosed)
        } else {
            Ok(())
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed
    }

    pub(crate) fn last_query(&self) -> Option<&QueryInfo> {
        self.last_query.as_ref()
    }

    pub(crate) fn bound_sql(
        &self,
        statement: &MappedStatement,
        parameter: &Value,
    ) -> Result<BoundSql> {
        statement.sql_source.bound_sql(&self.config, parameter)
    }

    /// The merged lookup bag for one execution: extracted caller
    /// parameter properties with dynamic bindings shadowing them.
    pub(crate) fn parameter_bag(&self, bound: &BoundSql, parameter: &Value) -> ParamsMap {
        let mut bag = self.config.entities().extract(parameter);
        for (name, value) in &bound.additional_parameters {
            bag.insert(name.clone(), value.clone());
        }
        bag
    }

    /// Resolves one mapping's value from the bag by dotted path.
    fn resolve_mapping_value(&self, bag: &ParamsMap, property: &str) -> Value {
        self.config
            .entities()
            .lookup(bag, property)
            .unwrap_or(Value::Null)
    }

    fn handler_for(
        &self,
        mapping: &crate::sql_source::ParameterMapping,
        value: &Value,
    ) -> Arc<dyn TypeHandler> {
        let handlers = self.config.type_handlers();
        if let Some(name) = &mapping.type_handler {
            return handlers.resolve(name);
        }
        if let Some(value_type) = &mapping.value_type {
            let value_type = self.config.resolve_alias(value_type);
            if handlers.contains(&value_type) {
                return handlers.resolve(&value_type);
            }
        }
        handlers.for_value(value)
    }

    /// Binds every parameter mapping in order and returns the values
    /// actually bound, keyed by property path.
    pub(crate) fn bind_parameters(
        &self,
        prepared: &mut dyn PreparedStatement,
        bound: &BoundSql,
        parameter: &Value,
    ) -> Result<ParamsMap> {
        let bag = self.parameter_bag(bound, parameter);
        let mut bound_values = ParamsMap::new();
        for (index, mapping) in bound.parameter_mappings.iter().enumerate() {
            let value = self.resolve_mapping_value(&bag, &mapping.property);
            let handler = self.handler_for(mapping, &value);
            handler.bind(prepared, index, &value, mapping.sql_type.as_deref())?;
            bound_values.insert(mapping.property.clone(), value);
        }
        Ok(bound_values)
    }

    /// Resolves the per-parameter values that go into the cache key and
    /// batch queues without touching a prepared statement.
    pub(crate) fn resolve_bindings(
        &self,
        bound: &BoundSql,
        parameter: &Value,
    ) -> Vec<(String, Value, Option<String>, Arc<dyn TypeHandler>)> {
        let bag = self.parameter_bag(bound, parameter);
        bound
            .parameter_mappings
            .iter()
            .map(|mapping| {
                let value = self.resolve_mapping_value(&bag, &mapping.property);
                let handler = self.handler_for(mapping, &value);
                (
                    mapping.property.clone(),
                    value,
                    mapping.sql_type.clone(),
                    handler,
                )
            })
            .collect()
    }

    /// The first-level cache fingerprint: statement id, final SQL, and
    /// the resolved parameter values in canonical order.
    pub(crate) fn cache_key(
        &self,
        statement: &MappedStatement,
        bound: &BoundSql,
        parameter: &Value,
    ) -> CacheKey {
        let bag = self.parameter_bag(bound, parameter);
        let mut key = CacheKey::new();
        key.update(&statement.id);
        key.update(&bound.sql);
        for mapping in &bound.parameter_mappings {
            key.update(&mapping.property);
            key.update_value(&self.resolve_mapping_value(&bag, &mapping.property));
        }
        key
    }

    pub(crate) fn cache_enabled(&self) -> bool {
        self.config.settings().cache_enabled
    }

    pub(crate) fn cached(&self, statement: &MappedStatement, key: &CacheKey) -> Option<Vec<Value>> {
        if !self.cache_enabled() {
            return None;
        }
        if let Some(values) = self.local_cache.get(key) {
            return Some(values.clone());
        }
        self.config
            .cache(statement.namespace())
            .and_then(|cache| cache.get(key))
    }

    pub(crate) fn store_cached(
        &mut self,
        statement: &MappedStatement,
        key: CacheKey,
        values: &[Value],
    ) {
        if !self.cache_enabled() {
            return;
        }
        if let Some(cache) = self.config.cache(statement.namespace()) {
            cache.put(key.clone(), values.to_vec());
        }
        self.local_cache.insert(key, values.to_vec());
    }

    /// Every write, commit, rollback, and close clears the first-level
    /// cache.
    pub(crate) fn clear_local_cache(&mut self) {
        self.local_cache.clear();
    }

    pub(crate) fn clear_namespace_cache(&self, statement: &MappedStatement) {
        if let Some(cache) = self.config.cache(statement.namespace()) {
            cache.clear();
        }
    }

    pub(crate) fn prepare(&mut self, sql: &str) -> Result<Box<dyn PreparedStatement>> {
        self.transaction.connection()?.prepare(sql)
    }

    pub(crate) fn apply_statement_options(
        &self,
        prepared: &mut dyn PreparedStatement,
        statement: &MappedStatement,
    ) {
        let timeout = statement
            .timeout_millis
            .unwrap_or(self.config.settings().default_statement_timeout_ms);
        if timeout > 0 {
            prepared.set_timeout_millis(timeout);
        }
        if let Some(fetch_size) = statement.fetch_size {
            prepared.set_fetch_size(fetch_size);
        }
    }

    /// Runs a query against an already prepared statement and returns
    /// the raw rows.
    pub(crate) fn run_query_rows(
        &mut self,
        prepared: &mut dyn PreparedStatement,
        statement: &MappedStatement,
        bound: &BoundSql,
        parameter: &Value,
    ) -> Result<Vec<crate::driver::Row>> {
        let timer = QueryTimer::start();
        let bound_values = self.bind_parameters(prepared, bound, parameter)?;
        let rows = prepared
            .execute_query()
            .map_err(|e| e.with_statement_context(&bound.sql, &bound_values))?;
        self.record(timer.finish(&statement.id, &bound.sql, bound_values, rows.len()));
        Ok(rows)
    }

    /// Runs the fetch-and-hydrate tail of a query against an already
    /// prepared statement.
    pub(crate) fn run_query(
        &mut self,
        prepared: &mut dyn PreparedStatement,
        statement: &MappedStatement,
        bound: &BoundSql,
        parameter: &Value,
    ) -> Result<Vec<Value>> {
        let timer = QueryTimer::start();
        let bound_values = self.bind_parameters(prepared, bound, parameter)?;
        let rows = prepared
            .execute_query()
            .map_err(|e| e.with_statement_context(&bound.sql, &bound_values))?;
        let values = Hydrator::new(&self.config).hydrate_all(rows, statement)?;
        self.record(timer.finish(&statement.id, &bound.sql, bound_values, values.len()));
        Ok(values)
    }

    /// Runs an immediate write against an already prepared statement.
    pub(crate) fn run_update(
        &mut self,
        prepared: &mut dyn PreparedStatement,
        statement: &MappedStatement,
        bound: &BoundSql,
        parameter: &mut Value,
    ) -> Result<i64> {
        let timer = QueryTimer::start();
        let bound_values = self.bind_parameters(prepared, bound, parameter)?;
        let affected = prepared
            .execute_update()
            .map_err(|e| e.with_statement_context(&bound.sql, &bound_values))?;
        self.write_generated_key(statement, parameter)?;
        self.record(timer.finish(
            &statement.id,
            &bound.sql,
            bound_values,
            usize::try_from(affected).unwrap_or(usize::MAX),
        ));
        Ok(i64::try_from(affected).unwrap_or(i64::MAX))
    }

    /// Generated-key writeback after inserts: the driver's last insert id
    /// lands under `key_property`. Instances go through their adapter
    /// (setter preferred, read-only skipped); associative parameters are
    /// written directly; a missing adapter property is silently ignored.
    pub(crate) fn write_generated_key(
        &mut self,
        statement: &MappedStatement,
        parameter: &mut Value,
    ) -> Result<()> {
        let enabled =
            statement.use_generated_keys || self.config.settings().use_generated_keys;
        if !enabled {
            return Ok(());
        }
        let Some(key_property) = statement.key_property.clone() else {
            return Ok(());
        };
        let Some(id) = self.transaction.connection()?.last_insert_id() else {
            return Ok(());
        };
        match parameter {
            Value::Object(object) => {
                object.insert(key_property, Value::Int(id));
            }
            Value::Instance(instance) => {
                match self.config.entities().get(&instance.type_name) {
                    Some(def) => {
                        // A read-only property without a setter skips the
                        // writeback silently.
                        let _ = def.set(instance, &key_property, Value::Int(id));
                    }
                    None => {
                        instance.properties.insert(key_property, Value::Int(id));
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }

    pub(crate) fn record(&mut self, info: QueryInfo) {
        if self.config.settings().debug_mode {
            self.config.query_hook().call(&info);
        }
        self.last_query = Some(info);
    }

    pub(crate) fn commit_transaction(&mut self, required: bool) -> Result<()> {
        self.clear_local_cache();
        if required {
            self.transaction.commit()?;
        }
        Ok(())
    }

    pub(crate) fn rollback_transaction(&mut self, required: bool) -> Result<()> {
        self.clear_local_cache();
        if required {
            self.transaction.rollback()?;
        }
        Ok(())
    }

    pub(crate) fn close_transaction(&mut self, force_rollback: bool) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        if force_rollback {
            let _ = self.transaction.rollback();
        }
        self.clear_local_cache();
        self.transaction.close()?;
        self.closed = true;
        Ok(())
    }
}
