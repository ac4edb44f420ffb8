//! Connection sources.
//!
//! All three sources share one contract: `get_connection` returns a
//! ready-to-use connection configured with the standard defaults plus any
//! caller-supplied options. `Simple` connects fresh every time,
//! `Unpooled` additionally counts creations for tests and diagnostics,
//! and `Pooled` keeps a bounded LIFO free-list whose releases roll back
//! any transaction left open.

use crate::driver::{Connection, ConnectionOptions, Driver};
use crate::error::Result;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub trait ConnectionSource: Send + Sync {
    fn get_connection(&self) -> Result<Box<dyn Connection>>;

    /// Hands a connection back. Sources that do not pool simply drop it.
    fn release_connection(&self, connection: Box<dyn Connection>);
}

/// Creates a fresh connection on every call.
pub struct SimpleConnectionSource {
    driver: Arc<dyn Driver>,
    options: ConnectionOptions,
}

impl SimpleConnectionSource {
    #[must_use]
    pub fn new(driver: Arc<dyn Driver>, options: ConnectionOptions) -> Self {
        Self { driver, options }
    }
}

impl ConnectionSource for SimpleConnectionSource {
    fn get_connection(&self) -> Result<Box<dyn Connection>> {
        self.driver.connect(&self.options)
    }

    fn release_connection(&self, mut connection: Box<dyn Connection>) {
        let _ = connection.close();
    }
}

/// Like [`SimpleConnectionSource`] but instrumented: counts connections
/// created and exposes a reset.
pub struct UnpooledConnectionSource {
    driver: Arc<dyn Driver>,
    options: ConnectionOptions,
    created: AtomicUsize,
}

impl UnpooledConnectionSource {
    #[must_use]
    pub fn new(driver: Arc<dyn Driver>, options: ConnectionOptions) -> Self {
        Self {
            driver,
            options,
            created: AtomicUsize::new(0),
        }
    }

    #[must_use]
    pub fn connections_created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn reset_counter(&self) {
        self.created.store(0, Ordering::SeqCst);
    }
}

impl ConnectionSource for UnpooledConnectionSource {
    fn get_connection(&self) -> Result<Box<dyn Connection>> {
        let connection = self.driver.connect(&self.options)?;
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(connection)
    }

    fn release_connection(&self, mut connection: Box<dyn Connection>) {
        let _ = connection.close();
    }
}

/// A bounded free-list of idle connections.
///
/// `get_connection` pops the most recently released connection (LIFO)
/// when one is idle, otherwise connects fresh. Releasing rolls back any
/// open transaction, then either parks the connection (free-list below
/// `max_size`) or discards it. Only idle instances are bounded; nothing
/// constrains the total created.
pub struct PooledConnectionSource {
    driver: Arc<dyn Driver>,
    options: ConnectionOptions,
    max_size: NonZeroU32,
    free_list: Mutex<Vec<Box<dyn Connection>>>,
    total_created: AtomicUsize,
}

impl PooledConnectionSource {
    #[must_use]
    pub fn new(driver: Arc<dyn Driver>, options: ConnectionOptions, max_size: NonZeroU32) -> Self {
        Self {
            driver,
            options,
            max_size,
            free_list: Mutex::new(Vec::new()),
            total_created: AtomicUsize::new(0),
        }
    }

    #[must_use]
    pub fn with_default_size(driver: Arc<dyn Driver>, options: ConnectionOptions) -> Self {
        Self::new(driver, options, crate::DEFAULT_POOL_MAX_SIZE)
    }

    /// Idle connections currently parked.
    #[must_use]
    pub fn free_list_size(&self) -> usize {
        self.free_list.lock().expect("free list poisoned").len()
    }

    /// Connections created over the source's lifetime.
    #[must_use]
    pub fn total_created(&self) -> usize {
        self.total_created.load(Ordering::SeqCst)
    }

    /// Drops every idle connection.
    pub fn clear(&self) {
        let drained = {
            let mut free_list = self.free_list.lock().expect("free list poisoned");
            std::mem::take(&mut *free_list)
        };
        for mut connection in drained {
            let _ = connection.close();
        }
    }
}

impl ConnectionSource for PooledConnectionSource {
    fn get_connection(&self) -> Result<Box<dyn Connection>> {
        let pooled = self.free_list.lock().expect("free list poisoned").pop();
        if let Some(connection) = pooled {
            return Ok(connection);
        }
        let connection = self.driver.connect(&self.options)?;
        self.total_created.fetch_add(1, Ordering::SeqCst);
        Ok(connection)
    }

    fn release_connection(&self, mut connection: Box<dyn Connection>) {
        if connection.in_transaction() && connection.rollback().is_err() {
            let _ = connection.close();
            return;
        }
        let mut free_list = self.free_list.lock().expect("free list poisoned");
        if free_list.len() < self.max_size.get() as usize {
            free_list.push(connection);
        } else {
            drop(free_list);
            let _ = connection.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::memory::MemoryDriver;

    fn pooled(max: u32) -> (PooledConnectionSource, MemoryDriver) {
        let driver = MemoryDriver::new();
        let source = PooledConnectionSource::new(
            Arc::new(driver.clone()),
            ConnectionOptions::default(),
            NonZeroU32::new(max).unwrap(),
        );
        (source, driver)
    }

    #[test]
    fn test_unpooled_counts_and_resets() {
        let driver = MemoryDriver::new();
        let source =
            UnpooledConnectionSource::new(Arc::new(driver), ConnectionOptions::default());
        source.release_connection(source.get_connection().unwrap());
        source.release_connection(source.get_connection().unwrap());
        assert_eq!(source.connections_created(), 2);
        source.reset_counter();
        assert_eq!(source.connections_created(), 0);
    }

    #[test]
    fn test_pool_reuses_released_connection() {
        let (source, driver) = pooled(4);
        let connection = source.get_connection().unwrap();
        source.release_connection(connection);
        assert_eq!(source.free_list_size(), 1);
        let _again = source.get_connection().unwrap();
        assert_eq!(source.free_list_size(), 0);
        assert_eq!(driver.connections_created(), 1);
        assert_eq!(source.total_created(), 1);
    }

    #[test]
    fn test_release_rolls_back_open_transaction() {
        let (source, _driver) = pooled(4);
        let mut connection = source.get_connection().unwrap();
        connection.begin().unwrap();
        assert!(connection.in_transaction());
        source.release_connection(connection);
        let connection = source.get_connection().unwrap();
        assert!(!connection.in_transaction());
    }

    #[test]
    fn test_free_list_is_bounded() {
        let (source, _driver) = pooled(2);
        let first = source.get_connection().unwrap();
        let second = source.get_connection().unwrap();
        let third = source.get_connection().unwrap();
        source.release_connection(first);
        source.release_connection(second);
        source.release_connection(third);
        assert_eq!(source.free_list_size(), 2);
        assert_eq!(source.total_created(), 3);
        assert!(source.total_created() >= source.free_list_size());
    }

    #[test]
    fn test_lifo_order() {
        let (source, _driver) = pooled(4);
        let first = source.get_connection().unwrap();
        let mut second = source.get_connection().unwrap();
        // Mark the second connection so we can recognize it on reuse.
        second.begin().unwrap();
        second.commit().unwrap();
        source.release_connection(first);
        source.release_connection(second);
        // LIFO: the most recently released connection comes back first.
        let _head = source.get_connection().unwrap();
        assert_eq!(source.free_list_size(), 1);
    }

    #[test]
    fn test_clear_drops_idle_connections() {
        let (source, _driver) = pooled(4);
        let connection = source.get_connection().unwrap();
        source.release_connection(connection);
        assert_eq!(source.free_list_size(), 1);
        source.clear();
        assert_eq!(source.free_list_size(), 0);
        // A stale release after clear parks or discards without panicking.
        let connection = source.get_connection().unwrap();
        source.clear();
        source.release_connection(connection);
    }
}
