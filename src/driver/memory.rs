//! An in-memory driver over scripted results.
//!
//! Queries pop the next scripted row set, writes pop the next scripted
//! affected-row count (defaulting to one), and every execution is
//! recorded for later inspection. Useful in tests and as a diagnostics
//! stand-in wherever a real driver is not available.

use super::{Connection, ConnectionOptions, Driver, PreparedStatement, Row};
use crate::error::{Error, Result};
use crate::param_value::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// One recorded execution or transaction-control call.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutedStatement {
    pub sql: String,
    pub parameters: Vec<Value>,
    /// `"query"`, `"update"`, `"begin"`, `"commit"` or `"rollback"`.
    pub kind: &'static str,
}

impl ExecutedStatement {
    fn control(kind: &'static str) -> Self {
        Self {
            sql: String::new(),
            parameters: Vec::new(),
            kind,
        }
    }
}

#[derive(Debug)]
enum Scripted {
    Rows(Vec<Row>),
    Affected(u64),
    Fail(String),
}

#[derive(Default)]
struct MemoryCore {
    scripts: Mutex<VecDeque<Scripted>>,
    log: Mutex<Vec<ExecutedStatement>>,
    last_insert_id: AtomicI64,
    connections_created: AtomicUsize,
}

impl MemoryCore {
    fn pop(&self) -> Option<Scripted> {
        self.scripts.lock().expect("script queue poisoned").pop_front()
    }

    fn record(&self, entry: ExecutedStatement) {
        self.log.lock().expect("execution log poisoned").push(entry);
    }
}

/// The scriptable driver. Cloning shares the script queue and log, so a
/// test can keep a handle while a data source owns another.
#[derive(Clone, Default)]
pub struct MemoryDriver {
    core: Arc<MemoryCore>,
}

impl MemoryDriver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a row set for the next query.
    pub fn script_rows(&self, rows: Vec<Row>) {
        self.core
            .scripts
            .lock()
            .expect("script queue poisoned")
            .push_back(Scripted::Rows(rows));
    }

    /// Queues an affected-row count for the next write.
    pub fn script_affected(&self, affected: u64) {
        self.core
            .scripts
            .lock()
            .expect("script queue poisoned")
            .push_back(Scripted::Affected(affected));
    }

    /// Queues a failure for the next execution.
    pub fn script_error(&self, message: impl Into<String>) {
        self.core
            .scripts
            .lock()
            .expect("script queue poisoned")
            .push_back(Scripted::Fail(message.into()));
    }

    /// Everything executed so far, in order.
    #[must_use]
    pub fn executed(&self) -> Vec<ExecutedStatement> {
        self.core.log.lock().expect("execution log poisoned").clone()
    }

    #[must_use]
    pub fn connections_created(&self) -> usize {
        self.core.connections_created.load(Ordering::SeqCst)
    }
}

impl Driver for MemoryDriver {
    fn connect(&self, _options: &ConnectionOptions) -> Result<Box<dyn Connection>> {
        self.core.connections_created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryConnection {
            core: Arc::clone(&self.core),
            in_transaction: false,
            open: true,
        }))
    }
}

struct MemoryConnection {
    core: Arc<MemoryCore>,
    in_transaction: bool,
    open: bool,
}

impl MemoryConnection {
    fn ensure_open(&self) -> Result<()> {
        if self.open {
            Ok(())
        } else {
            Err(Error::connection("connection is closed"))
        }
    }
}

impl Connection for MemoryConnection {
    fn prepare(&mut self, sql: &str) -> Result<Box<dyn PreparedStatement>> {
        self.ensure_open()?;
        Ok(Box::new(MemoryStatement {
            core: Arc::clone(&self.core),
            sql: sql.to_owned(),
            bindings: Vec::new(),
            timeout_millis: 0,
            fetch_size: 0,
        }))
    }

    fn begin(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.in_transaction = true;
        self.core.record(ExecutedStatement::control("begin"));
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.in_transaction = false;
        self.core.record(ExecutedStatement::control("commit"));
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.in_transaction = false;
        self.core.record(ExecutedStatement::control("rollback"));
        Ok(())
    }

    fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    fn last_insert_id(&self) -> Option<i64> {
        match self.core.last_insert_id.load(Ordering::SeqCst) {
            0 => None,
            id => Some(id),
        }
    }

    fn close(&mut self) -> Result<()> {
        self.open = false;
        Ok(())
    }
}

struct MemoryStatement {
    core: Arc<MemoryCore>,
    sql: String,
    bindings: Vec<Value>,
    timeout_millis: u64,
    fetch_size: u32,
}

impl MemoryStatement {
    fn take_parameters(&mut self) -> Vec<Value> {
        std::mem::take(&mut self.bindings)
    }

    fn set_binding(&mut self, index: usize, value: Value) {
        if index >= self.bindings.len() {
            self.bindings.resize(index + 1, Value::Null);
        }
        self.bindings[index] = value;
    }
}

impl PreparedStatement for MemoryStatement {
    fn sql(&self) -> &str {
        &self.sql
    }

    fn set_timeout_millis(&mut self, timeout: u64) {
        self.timeout_millis = timeout;
    }

    fn set_fetch_size(&mut self, fetch_size: u32) {
        self.fetch_size = fetch_size;
    }

    fn bind_value(&mut self, index: usize, value: Value) -> Result<()> {
        self.set_binding(index, value);
        Ok(())
    }

    fn bind_null(&mut self, index: usize, _sql_type: Option<&str>) -> Result<()> {
        self.set_binding(index, Value::Null);
        Ok(())
    }

    fn execute_update(&mut self) -> Result<u64> {
        let parameters = self.take_parameters();
        self.core.record(ExecutedStatement {
            sql: self.sql.clone(),
            parameters,
            kind: "update",
        });
        match self.core.pop() {
            Some(Scripted::Affected(affected)) => {
                self.core.last_insert_id.fetch_add(1, Ordering::SeqCst);
                Ok(affected)
            }
            Some(Scripted::Fail(message)) => Err(Error::sql(message)),
            Some(Scripted::Rows(_)) => Err(Error::sql("scripted rows where a write was executed")),
            None => {
                self.core.last_insert_id.fetch_add(1, Ordering::SeqCst);
                Ok(1)
            }
        }
    }

    fn execute_query(&mut self) -> Result<Vec<Row>> {
        let parameters = self.take_parameters();
        self.core.record(ExecutedStatement {
            sql: self.sql.clone(),
            parameters,
            kind: "query",
        });
        match self.core.pop() {
            Some(Scripted::Rows(rows)) => Ok(rows),
            Some(Scripted::Fail(message)) => Err(Error::sql(message)),
            Some(Scripted::Affected(_)) => {
                Err(Error::sql("scripted affected count where a query was executed"))
            }
            None => Ok(Vec::new()),
        }
    }
}
