//! SQLite storage layer -- pool, schema, and the blocking-call wrapper every
//! store goes through.

pub mod schema;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use r2d2::Pool as R2D2Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;
use tracing::warn;

use crate::config::StorageConfig;
use crate::error::{EngineError, EngineResult};

/// Connection Pool type
pub type Pool = R2D2Pool<SqliteConnectionManager>;

/// Open (or create) the SQLite database and return a connection pool.
pub fn open_pool(path: &Path) -> Result<Pool> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
    }

    let manager = SqliteConnectionManager::file(path).with_init(|c| {
        c.execute_batch(
            "PRAGMA journal_mode = WAL;
                 PRAGMA synchronous = NORMAL;
                 PRAGMA temp_store = MEMORY;
                 PRAGMA foreign_keys = ON;
                 PRAGMA busy_timeout = 5000;",
        )
    });

    let pool = R2D2Pool::builder()
        .connection_timeout(Duration::from_secs(5))
        .build(manager)
        .context("failed to build connection pool")?;

    // Run migrations on a single connection
    let conn = pool.get()?;
    schema::migrate(&conn)?;

    Ok(pool)
}

/// Shared handle used by the telemetry, registry and finding stores.
///
/// Every call runs on the blocking pool under a timeout. A failure that
/// guarantees nothing was written (pool exhausted, database busy or locked)
/// is retried once after a short backoff. A timeout is returned as is: the
/// blocking task cannot be cancelled and may still commit.
#[derive(Clone)]
pub struct Db {
    pool: Pool,
    timeout: Duration,
    backoff: Duration,
}

impl Db {
    pub fn new(pool: Pool, config: &StorageConfig) -> Self {
        Self {
            pool,
            timeout: config.timeout(),
            backoff: config.retry_backoff(),
        }
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    pub async fn call<T, F>(&self, op: &'static str, f: F) -> EngineResult<T>
    where
        T: Send + 'static,
        F: Fn(&mut Connection) -> EngineResult<T> + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        match self.call_once(op, f.clone()).await {
            Err(e) if e.is_transient() => {
                warn!(op, error = %e, "store call failed transiently, retrying once");
                tokio::time::sleep(self.backoff).await;
                self.call_once(op, f).await
            }
            other => other,
        }
    }

    async fn call_once<T, F>(&self, op: &'static str, f: Arc<F>) -> EngineResult<T>
    where
        T: Send + 'static,
        F: Fn(&mut Connection) -> EngineResult<T> + Send + Sync + 'static,
    {
        let pool = self.pool.clone();
        let task = tokio::task::spawn_blocking(move || -> EngineResult<T> {
            let mut conn = pool.get()?;
            (*f)(&mut *conn)
        });

        match tokio::time::timeout(self.timeout, task).await {
            Ok(joined) => joined?,
            Err(_) => {
                warn!(op, timeout = ?self.timeout, "store call timed out, not retrying");
                Err(EngineError::Timeout(format!(
                    "{op} after {:?}",
                    self.timeout
                )))
            }
        }
    }
}

/// Timestamps are stored as sortable naive ISO-8601 text.
pub(crate) const TS_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

pub(crate) fn fmt_ts(ts: &chrono::NaiveDateTime) -> String {
    ts.format(TS_FORMAT).to_string()
}

pub(crate) fn parse_ts(s: &str) -> EngineResult<chrono::NaiveDateTime> {
    chrono::NaiveDateTime::parse_from_str(s, TS_FORMAT)
        .map_err(|e| EngineError::Internal(format!("bad stored timestamp '{s}': {e}")))
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;

    /// A file-backed database in a temp dir, kept alive with the handle.
    pub struct TestDb {
        pub db: Db,
        _dir: tempfile::TempDir,
    }

    pub fn test_db() -> TestDb {
        test_db_with(&StorageConfig::default())
    }

    pub fn test_db_with(config: &StorageConfig) -> TestDb {
        let dir = tempfile::TempDir::new().unwrap();
        let pool = open_pool(&dir.path().join("test.db")).unwrap();
        TestDb {
            db: Db::new(pool, config),
            _dir: dir,
        }
    }
}
