//! The simple strategy: a fresh prepared statement per call.

use super::{Executor, ExecutorBase};
use crate::config::MappedStatement;
use crate::error::Result;
use crate::param_value::Value;
use crate::telemetry::QueryInfo;

pub struct SimpleExecutor {
    base: ExecutorBase,
}

impl SimpleExecutor {
    pub(crate) fn new(base: ExecutorBase) -> Self {
        Self { base }
    }
}

impl Executor for SimpleExecutor {
    fn query(&mut self, statement: &MappedStatement, parameter: &Value) -> Result<Vec<Value>> {
        self.base.ensure_open()?;
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
        let mut prepared = self.base.prepare(&bound.sql)?;
        self.base
            .apply_statement_options(prepared.as_mut(), statement);
        self.base
            .run_update(prepared.as_mut(), statement, &bound, parameter)
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
        self.base.close_transaction(force_rollback)
    }

    fn is_closed(&self) -> bool {
        self.base.is_closed()
    }

    fn last_query(&self) -> Option<&QueryInfo> {
        self.base.last_query()
    }
}
