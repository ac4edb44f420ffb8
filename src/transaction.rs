//! Transaction wrappers owning the session's connection.
//!
//! A session owns exactly one executor, which owns exactly one
//! transaction, which owns exactly one connection for the session's
//! lifetime. Closing the transaction hands the connection back to the
//! data source it came from; close is idempotent.

use crate::datasource::ConnectionSource;
use crate::driver::Connection;
use crate::error::{Error, Result};
use std::sync::Arc;

pub trait Transaction: Send {
    /// The connection this transaction owns. Fails once closed.
    fn connection(&mut self) -> Result<&mut (dyn Connection + '_)>;

    fn commit(&mut self) -> Result<()>;

    fn rollback(&mut self) -> Result<()>;

    /// Returns the connection to its source. Idempotent.
    fn close(&mut self) -> Result<()>;
}

/// Creates the transaction flavor an environment is configured with.
pub trait TransactionFactory: Send + Sync {
    fn new_transaction(
        &self,
        connection: Box<dyn Connection>,
        source: Arc<dyn ConnectionSource>,
        auto_commit: bool,
    ) -> Box<dyn Transaction>;
}

/// Transaction control through the driver's native begin/commit/rollback.
pub struct DriverTransactionFactory;

impl TransactionFactory for DriverTransactionFactory {
    fn new_transaction(
        &self,
        connection: Box<dyn Connection>,
        source: Arc<dyn ConnectionSource>,
        auto_commit: bool,
    ) -> Box<dyn Transaction> {
        Box::new(DriverTransaction {
            connection: Some(connection),
            source,
            auto_commit,
            begun: false,
        })
    }
}

/// Container-managed transactions: commit and rollback are no-ops and the
/// surrounding environment decides the outcome.
pub struct ManagedTransactionFactory;

impl TransactionFactory for ManagedTransactionFactory {
    fn new_transaction(
        &self,
        connection: Box<dyn Connection>,
        source: Arc<dyn ConnectionSource>,
        _auto_commit: bool,
    ) -> Box<dyn Transaction> {
        Box::new(ManagedTransaction {
            connection: Some(connection),
            source,
        })
    }
}

struct DriverTransaction {
    connection: Option<Box<dyn Connection>>,
    source: Arc<dyn ConnectionSource>,
    auto_commit: bool,
    begun: bool,
}

impl DriverTransaction {
    fn live_connection(&mut self) -> Result<&mut Box<dyn Connection>> {
        self.connection.as_mut().ok_or(Error::SessionClosed)
    }
}

impl Transaction for DriverTransaction {
    fn connection(&mut self) -> Result<&mut (dyn Connection + '_)> {
        // An explicit transaction opens on first use when autocommit is
        // off, so read-only sessions never hold an empty transaction.
        if !self.auto_commit && !self.begun {
            self.live_connection()?.begin()?;
            self.begun = true;
        }
        Ok(self.live_connection()?.as_mut())
    }

    fn commit(&mut self) -> Result<()> {
        if self.begun {
            self.live_connection()?.commit()?;
            self.begun = false;
        }
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        if self.begun {
            self.live_connection()?.rollback()?;
            self.begun = false;
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if let Some(connection) = self.connection.take() {
            self.source.release_connection(connection);
        }
        Ok(())
    }
}

struct ManagedTransaction {
    connection: Option<Box<dyn Connection>>,
    source: Arc<dyn ConnectionSource>,
}

impl Transaction for ManagedTransaction {
    fn connection(&mut self) -> Result<&mut (dyn Connection + '_)> {
        match self.connection.as_mut() {
            Some(c) => Ok(c.as_mut()),
            None => Err(Error::SessionClosed),
        }
    }

    fn commit(&mut self) -> Result<()> {
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if let Some(connection) = self.connection.take() {
            self.source.release_connection(connection);
        }
        Ok(())
    }
}
