//! `DuckDB` connection pooling.
//!
//! A single database instance is opened per warehouse; every pooled handle is a
//! `try_clone` of that root connection so all handles share one instance and one
//! file lock.

use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use ::duckdb::Connection;

struct PoolInner {
    db_path: PathBuf,
    max_idle: usize,
    root: Mutex<Connection>,
    idle: Mutex<Vec<Connection>>,
}

/// Pool of connections sharing one `DuckDB` instance.
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl ConnectionPool {
    /// Open the database file and create the pool.
    ///
    /// # Errors
    /// Returns an error if the database file cannot be opened or configured.
    pub fn open(path: impl Into<PathBuf>, max_idle: usize) -> Result<Self, ::duckdb::Error> {
        let db_path = path.into();
        let root = Connection::open(db_path.as_path())?;
        configure_connection(&root)?;

        Ok(Self {
            inner: Arc::new(PoolInner {
                db_path,
                max_idle: max_idle.max(1),
                root: Mutex::new(root),
                idle: Mutex::new(Vec::new()),
            }),
        })
    }

    /// Take an idle connection or clone a new one from the root instance.
    ///
    /// # Errors
    /// Returns an error if a new connection cannot be cloned or configured.
    ///
    /// # Panics
    /// Panics if a pool mutex is poisoned.
    pub fn acquire(&self) -> Result<PooledConnection, ::duckdb::Error> {
        let reused = self
            .inner
            .idle
            .lock()
            .expect("duckdb idle pool mutex poisoned")
            .pop();

        let connection = match reused {
            Some(connection) => connection,
            None => {
                let root = self
                    .inner
                    .root
                    .lock()
                    .expect("duckdb root connection mutex poisoned");
                let connection = root.try_clone()?;
                configure_connection(&connection)?;
                connection
            }
        };

        Ok(PooledConnection {
            pool: Arc::clone(&self.inner),
            connection: Some(connection),
        })
    }

    #[must_use]
    pub fn db_path(&self) -> &Path {
        self.inner.db_path.as_path()
    }

    /// Number of idle connections currently parked in the pool.
    ///
    /// # Panics
    /// Panics if the idle pool mutex is poisoned.
    #[must_use]
    pub fn idle_len(&self) -> usize {
        self.inner
            .idle
            .lock()
            .expect("duckdb idle pool mutex poisoned")
            .len()
    }
}

/// A connection that returns to the pool when dropped.
pub struct PooledConnection {
    pool: Arc<PoolInner>,
    connection: Option<Connection>,
}

impl Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Self::Target {
        self.connection
            .as_ref()
            .expect("pooled connection unexpectedly missing")
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.connection
            .as_mut()
            .expect("pooled connection unexpectedly missing")
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let Some(connection) = self.connection.take() else {
            return;
        };

        let Ok(mut idle) = self.pool.idle.lock() else {
            return;
        };
        if idle.len() < self.pool.max_idle {
            idle.push(connection);
        }
    }
}

fn configure_connection(connection: &Connection) -> Result<(), ::duckdb::Error> {
    connection.execute_batch("PRAGMA disable_progress_bar;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn dropped_connections_are_parked_up_to_the_idle_limit() {
        let temp = tempdir().expect("tempdir");
        let pool = ConnectionPool::open(temp.path().join("pool.duckdb"), 1).expect("pool");

        let first = pool.acquire().expect("first");
        let second = pool.acquire().expect("second");
        drop(first);
        drop(second);

        assert_eq!(pool.idle_len(), 1);
    }

    #[test]
    fn cloned_connections_see_each_others_writes() {
        let temp = tempdir().expect("tempdir");
        let pool = ConnectionPool::open(temp.path().join("shared.duckdb"), 2).expect("pool");

        let writer = pool.acquire().expect("writer");
        writer
            .execute_batch("CREATE TABLE t (id INTEGER); INSERT INTO t VALUES (1), (2);")
            .expect("write");

        let reader = pool.acquire().expect("reader");
        let count: i64 = reader
            .query_row("SELECT COUNT(*) FROM t", [], |row| row.get(0))
            .expect("count");
        assert_eq!(count, 2);
    }
}
