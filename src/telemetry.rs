//! Query telemetry: the per-execution record and the profiling hook.
//!
//! Every execution produces a [`QueryInfo`] that the executor keeps as
//! the "last query". When debug mode is on, the record is also forwarded
//! to the configured hook, a callback suitable for logging or profiling.
//! Hook failures never disturb query execution.

use crate::param_value::ParamsMap;
use std::sync::RwLock;
use std::time::Instant;

/// Information about one executed statement.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct QueryInfo {
    pub statement_id: String,
    /// The final SQL with positional placeholders.
    pub sql: String,
    /// The parameter values actually bound, by property path.
    pub parameters: ParamsMap,
    pub elapsed_ms: f64,
    /// Rows fetched for queries, rows affected for writes.
    pub row_count: usize,
}

type HookFn = Box<dyn Fn(&QueryInfo) + Send + Sync>;

/// Storage for the query hook callback.
#[derive(Default)]
pub struct QueryHook {
    callback: RwLock<Option<HookFn>>,
}

impl QueryHook {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs the callback, replacing any previous one.
    pub fn set(&self, callback: impl Fn(&QueryInfo) + Send + Sync + 'static) {
        *self.callback.write().expect("query hook poisoned") = Some(Box::new(callback));
    }

    pub fn clear(&self) {
        *self.callback.write().expect("query hook poisoned") = None;
    }

    #[must_use]
    pub fn is_set(&self) -> bool {
        self.callback.read().expect("query hook poisoned").is_some()
    }

    /// Calls the hook with query information. No-op when nothing is
    /// registered.
    pub fn call(&self, info: &QueryInfo) {
        if let Some(callback) = self.callback.read().expect("query hook poisoned").as_ref() {
            callback(info);
        }
    }
}

impl std::fmt::Debug for QueryHook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryHook")
            .field("is_set", &self.is_set())
            .finish()
    }
}

/// Measures one execution and produces its [`QueryInfo`].
pub struct QueryTimer {
    start: Instant,
}

impl QueryTimer {
    #[must_use]
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    #[must_use]
    pub fn finish(
        self,
        statement_id: &str,
        sql: &str,
        parameters: ParamsMap,
        row_count: usize,
    ) -> QueryInfo {
        QueryInfo {
            statement_id: statement_id.to_owned(),
            sql: sql.to_owned(),
            parameters,
            elapsed_ms: self.start.elapsed().as_secs_f64() * 1_000.0,
            row_count,
        }
    }
}
