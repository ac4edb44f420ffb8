//! The reuse strategy: prepared statements cached by SQL string within
//! the session. Prepare on miss, rebind and re-execute on hit; the cache
//! drains on close.

use super::{Executor, ExecutorBase};
use crate::config::MappedStatement;
use crate::driver::PreparedStatement;
use crate::error::Result;
use crate::param_value::Value;
use crate::telemetry::QueryInfo;
use std::collections::HashMap;

pub struct ReuseExecutor {
    base: ExecutorBase,
    statements: HashMap<String, Box<dyn PreparedStatement>>,
}

impl ReuseExecutor {
    pub(crate) fn new(base: ExecutorBase) -> Self {
        Self {
            base,
            statements: HashMap::new(),
        }
    }

    /// How many distinct statements are currently held prepared.
    #[must_use]
    pub fn prepared_count(&self) -> usize {
        self.statements.len()
    }
}

impl Executor for ReuseExecutor {
    fn query(&mut self, statement: &MappedStatement, parameter: &Value) -> Result<Vec<Value>> {
        self.base.ensure_open()?;
        let bound = self.base.bound_sql(statement, parameter)?;
        let key = self.base.cache_key(statement, &bound, parameter);
        if let Some(values) = self.base.cached(statement, &key) {
            return Ok(values);
        }
        let mut prepared = self
            .statements
            .remove(&bound.sql)
            .map_or_else(|| self.base.prepare(&bound.sql), Ok)?;
        self.base
            .apply_statement_options(prepared.as_mut(), statement);
        let result = self
            .base
            .run_query(prepared.as_mut(), statement, &bound, parameter);
        self.statements.insert(bound.sql.clone(), prepared);
        let values = result?;
        self.base.store_cached(statement, key, &values);
        Ok(values)
    }

    fn query_rows(
        &mut self,
        statement: &MappedStatement,
        parameter: &Value,
    ) -> Result<Vec<crate::driver::Row>> {
        self.base.ensure_open()?;
        let bound = self.base.bound_sql(statement, parameter)?;
        let mut prepared = self
            .statements
            .remove(&bound.sql)
            .map_or_else(|| self.base.prepare(&bound.sql), Ok)?;
        self.base
            .apply_statement_options(prepared.as_mut(), statement);
        let result = self
            .base
            .run_query_rows(prepared.as_mut(), statement, &bound, parameter);
        self.statements.insert(bound.sql.clone(), prepared);
        result
    }

    fn update(&mut self, statement: &MappedStatement, parameter: &mut Value) -> Result<i64> {
        self.base.ensure_open()?;
        self.base.clear_local_cache();
        self.base.clear_namespace_cache(statement);
        let bound = self.base.bound_sql(statement, parameter)?;
        let mut prepared = self
            .statements
            .remove(&bound.sql)
            .map_or_else(|| self.base.prepare(&bound.sql), Ok)?;
        self.base
            .apply_statement_options(prepared.as_mut(), statement);
        let result = self
            .base
            .run_update(prepared.as_mut(), statement, &bound, parameter);
        self.statements.insert(bound.sql.clone(), prepared);
        result
    }

    fn flush_statements(&mut self) -> Result<Vec<i64>> {
        Ok(Vec::new())
    }

    fn commit(&mut self, required: bool) -> Result<()> {
        self.base.ensure_open()?;
        self.base.commit_transaction(required)
    }

    fn rollback(&mut self, required: bool) -> Result<()> {
        self.base.ensure_open()?;
        self.base.rollback_transaction(required)
    }

    fn close(&mut self, force_rollback: bool) -> Result<()> {
        self.statements.clear();
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
    use super::super::test_support::memory_environment;
    use super::*;
    use crate::config::{Configuration, StatementKind};
    use crate::datasource::ConnectionSource;
    use crate::driver::Row;
    use crate::executor::ExecutorBase;
    use crate::transaction::TransactionFactory;
    use std::sync::Arc;

    fn reuse_executor() -> (ReuseExecutor, Arc<Configuration>, crate::driver::memory::MemoryDriver)
    {
        let mut config = Configuration::new();
        let driver = memory_environment(&mut config);
        let find = config
            .raw_statement(
                "user.findById",
                StatementKind::Select,
                "SELECT * FROM users WHERE id = #{id}",
            )
            .unwrap()
            .build();
        config.add_statement(find).unwrap();
        let find_all = config
            .raw_statement("user.findAll", StatementKind::Select, "SELECT * FROM users")
            .unwrap()
            .build();
        config.add_statement(find_all).unwrap();
        let config = Arc::new(config);

        let environment = config.environment(None).unwrap();
        let connection = environment.data_source.get_connection().unwrap();
        let transaction = environment.transaction_factory.new_transaction(
            connection,
            Arc::clone(&environment.data_source),
            true,
        );
        let base = ExecutorBase::new(Arc::clone(&config), transaction);
        (ReuseExecutor::new(base), config, driver)
    }

    fn param(id: i64) -> Value {
        let mut object = indexmap::IndexMap::new();
        object.insert("id".to_string(), Value::Int(id));
        Value::Object(object)
    }

    #[test]
    fn test_statements_are_reused_by_sql() {
        let (mut executor, config, driver) = reuse_executor();
        driver.script_rows(vec![Row::new().with("id", 1)]);
        driver.script_rows(vec![Row::new().with("id", 2)]);
        driver.script_rows(vec![]);
        let find = config.statement("user.findById").unwrap();
        let find_all = config.statement("user.findAll").unwrap();

        executor.query(&find, &param(1)).unwrap();
        executor.query(&find, &param(2)).unwrap();
        executor.query(&find_all, &Value::Null).unwrap();
        // Two distinct SQL strings, two prepared statements.
        assert_eq!(executor.prepared_count(), 2);
        assert_eq!(driver.executed().len(), 3);
        executor.close(false).unwrap();
    }

    #[test]
    fn test_close_clears_statement_cache() {
        let (mut executor, config, driver) = reuse_executor();
        driver.script_rows(vec![]);
        let find = config.statement("user.findById").unwrap();
        executor.query(&find, &param(1)).unwrap();
        assert_eq!(executor.prepared_count(), 1);
        executor.close(false).unwrap();
        assert_eq!(executor.prepared_count(), 0);
        assert!(executor.is_closed());
    }
}
