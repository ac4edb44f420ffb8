//! The batch strategy: writes queue instead of executing.
//!
//! Consecutive updates with the same SQL share one prepared statement at
//! flush time. Queries flush pending work first, so reads never observe
//! a stale batch. `update` returns the [`super::BATCH_UPDATE_PENDING`]
//! sentinel; the real row counts come back from `flush_statements` in
//! submission order.

use super::{Executor, ExecutorBase, BATCH_UPDATE_PENDING};
use crate::config::MappedStatement;
use crate::error::Result;
use crate::param_value::{ParamsMap, Value};
use crate::telemetry::{QueryInfo, QueryTimer};
use crate::type_handler::TypeHandler;
use std::sync::Arc;

type PendingBinding = Vec<(String, Value, Option<String>, Arc<dyn TypeHandler>)>;

struct BatchEntry {
    sql: String,
    statement_id: String,
    pending: Vec<PendingBinding>,
}

pub struct BatchExecutor {
    base: ExecutorBase,
    batch: Vec<BatchEntry>,
}

impl BatchExecutor {
    pub(crate) fn new(base: ExecutorBase) -> Self {
        Self {
            base,
            batch: Vec::new(),
        }
    }

    /// Updates currently queued across all batch entries.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.batch.iter().map(|entry| entry.pending.len()).sum()
    }
}

impl Executor for BatchExecutor {
    fn query(&mut self, statement: &MappedStatement, parameter: &Value) -> Result<Vec<Value>> {
        self.base.ensure_open()?;
        // Reads must observe queued writes.
        self.flush_statements()?;
        let bound = self.base.bound_sql(statement, parameter)?;
        let key = self.base.cache_key(statement, &bound, parameter);
        if let Some(values) = self.base.cached(statement, &key) {
            return Ok(values);
        }
        let mut prepared = self.base.prepare(&bound.sql)?;
        self.base
            .apply_statement_options(prepared.as_mut(), statement);
        let values = self
            .base
            .run_query(prepared.as_mut(), statement, &bound, parameter)?;
        self.base.store_cached(statement, key, &values);
        Ok(values)
    }

    fn query_rows(
        &mut self,
        statement: &MappedStatement,
        parameter: &Value,
    ) -> Result<Vec<crate::driver::Row>> {
        self.base.ensure_open()?;
        self.flush_statements()?;
        let bound = self.base.bound_sql(statement, parameter)?;
        let mut prepared = self.base.prepare(&bound.sql)?;
        self.base
            .apply_statement_options(prepared.as_mut(), statement);
        self.base
            .run_query_rows(prepared.as_mut(), statement, &bound, parameter)
    }

    fn update(&mut self, statement: &MappedStatement, parameter: &mut Value) -> Result<i64> {
        self.base.ensure_open()?;
        self.base.clear_local_cache();
        self.base.clear_namespace_cache(statement);
        let bound = self.base.bound_sql(statement, parameter)?;
        let bindings = self.base.resolve_bindings(&bound, parameter);
        match self.batch.last_mut() {
            Some(entry) if entry.sql == bound.sql && entry.statement_id == statement.id => {
                entry.pending.push(bindings);
            }
            _ => self.batch.push(BatchEntry {
                sql: bound.sql,
                statement_id: statement.id.clone(),
                pending: vec![bindings],
            }),
        }
        // Deferred completion; generated keys are unavailable until
        // flush, so no writeback happens on the batch path.
        Ok(BATCH_UPDATE_PENDING)
    }

    fn flush_statements(&mut self) -> Result<Vec<i64>> {
        self.base.ensure_open()?;
        let mut counts = Vec::new();
        let entries: Vec<BatchEntry> = self.batch.drain(..).collect();
        for entry in entries {
            let mut prepared = self.base.prepare(&entry.sql)?;
            for bindings in entry.pending {
                let timer = QueryTimer::start();
                let mut bound_values = ParamsMap::new();
                for (index, (property, value, sql_type, handler)) in
                    bindings.into_iter().enumerate()
                {
                    handler.bind(prepared.as_mut(), index, &value, sql_type.as_deref())?;
                    bound_values.insert(property, value);
                }
                let affected = prepared
                    .execute_update()
                    .map_err(|e| e.with_statement_context(&entry.sql, &bound_values))?;
                self.base.record(timer.finish(
                    &entry.statement_id,
                    &entry.sql,
                    bound_values,
                    usize::try_from(affected).unwrap_or(usize::MAX),
                ));
                counts.push(i64::try_from(affected).unwrap_or(i64::MAX));
            }
        }
        Ok(counts)
    }

    fn commit(&mut self, required: bool) -> Result<()> {
        self.base.ensure_open()?;
        self.flush_statements()?;
        self.base.commit_transaction(required)
    }

    fn rollback(&mut self, required: bool) -> Result<()> {
        self.base.ensure_open()?;
        self.batch.clear();
        self.base.rollback_transaction(required)
    }

    fn close(&mut self, force_rollback: bool) -> Result<()> {
        self.batch.clear();
        self.base.close_transaction(force_rollback)
    }

    fn is_closed(&self) -> bool {
        self.base.is_closed()
    }

    fn last_query(&self) -> Option<&QueryInfo> {
        self.base.last_query()
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{memory_environment, open_executor};
    use super::*;
    use crate::config::{Configuration, ExecutorType, StatementKind};
    use crate::driver::Row;

    fn config_with_statements() -> (Arc<Configuration>, crate::driver::memory::MemoryDriver) {
        let mut config = Configuration::new();
        let driver = memory_environment(&mut config);
        let insert = config
            .raw_statement(
                "user.insert",
                StatementKind::Insert,
                "INSERT INTO users (name) VALUES (#{name})",
            )
            .unwrap()
            .build();
        config.add_statement(insert).unwrap();
        let touch = config
            .raw_statement(
                "user.touch",
                StatementKind::Update,
                "UPDATE users SET touched = 1 WHERE id = #{id}",
            )
            .unwrap()
            .build();
        config.add_statement(touch).unwrap();
        let find = config
            .raw_statement("user.findAll", StatementKind::Select, "SELECT * FROM users")
            .unwrap()
            .build();
        config.add_statement(find).unwrap();
        (Arc::new(config), driver)
    }

    fn param(name: &str, value: Value) -> Value {
        let mut object = indexmap::IndexMap::new();
        object.insert(name.to_string(), value);
        Value::Object(object)
    }

    #[test]
    fn test_batch_defers_and_flushes_in_submission_order() {
        let (config, driver) = config_with_statements();
        for n in [3, 5, 2, 7, 1] {
            driver.script_affected(n);
        }
        let mut executor = open_executor(&config, ExecutorType::Batch);
        let insert = config.statement("user.insert").unwrap();
        let touch = config.statement("user.touch").unwrap();

        for name in ["a", "b", "c"] {
            let mut parameter = param("name", Value::Str(name.into()));
            let sentinel = executor.update(&insert, &mut parameter).unwrap();
            assert_eq!(sentinel, BATCH_UPDATE_PENDING);
        }
        for id in [1, 2] {
            let mut parameter = param("id", Value::Int(id));
            assert_eq!(
                executor.update(&touch, &mut parameter).unwrap(),
                BATCH_UPDATE_PENDING
            );
        }
        // Nothing has hit the driver yet.
        assert!(driver.executed().is_empty());

        let counts = executor.flush_statements().unwrap();
        assert_eq!(counts, vec![3, 5, 2, 7, 1]);
        assert_eq!(driver.executed().len(), 5);

        // The batch reset: a second flush returns nothing.
        assert!(executor.flush_statements().unwrap().is_empty());
        executor.close(false).unwrap();
    }

    #[test]
    fn test_query_flushes_pending_batch_first() {
        let (config, driver) = config_with_statements();
        driver.script_affected(1);
        driver.script_rows(vec![Row::new().with("id", 1)]);
        let mut executor = open_executor(&config, ExecutorType::Batch);
        let insert = config.statement("user.insert").unwrap();
        let find = config.statement("user.findAll").unwrap();

        let mut parameter = param("name", Value::Str("a".into()));
        executor.update(&insert, &mut parameter).unwrap();
        let values = executor.query(&find, &Value::Null).unwrap();
        assert_eq!(values.len(), 1);

        let kinds: Vec<&str> = driver.executed().iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec!["update", "query"]);
        executor.close(false).unwrap();
    }

    #[test]
    fn test_close_clears_batch_without_executing() {
        let (config, driver) = config_with_statements();
        let mut executor = open_executor(&config, ExecutorType::Batch);
        let insert = config.statement("user.insert").unwrap();
        let mut parameter = param("name", Value::Str("a".into()));
        executor.update(&insert, &mut parameter).unwrap();
        executor.close(false).unwrap();
        assert!(driver.executed().is_empty());
    }
}
