//! # SQLite Persistence
//!
//! All data access goes through [`Database`], a cloneable handle around a single
//! `rusqlite::Connection` guarded by a mutex. SQLite serializes writes anyway, and
//! the queries here are small, so handlers call it directly.
//!
//! ## Layout:
//! - **migrate**: schema creation and legacy-column migration, run on every open
//! - **models**: row types and enums
//! - **users** / **sessions** / **tracks**: data access per table
//! - **retention**: the inactive-user data sweep

pub mod migrate;
pub mod models;
pub mod retention;
pub mod sessions;
pub mod tracks;
pub mod users;

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use rusqlite::Connection;
use tracing::{info, warn};

use crate::error::{AppError, AppResult};

/// Thread-safe database handle shared through `AppState`.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish_non_exhaustive()
    }
}

impl Database {
    /// Open the database named by `url`, or an in-memory one when `url` is empty.
    ///
    /// Migrations run before the handle is returned, so callers always see the
    /// current schema.
    pub fn open(url: &str) -> AppResult<Self> {
        let conn = if url.trim().is_empty() || url == ":memory:" {
            warn!("DATABASE_URL not set, using in-memory SQLite database. Set DATABASE_URL to persist data.");
            Connection::open_in_memory()?
        } else {
            let path = Path::new(url);
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            info!(path = %path.display(), "Opening SQLite database");
            Connection::open(path)?
        };
        Self::from_connection(conn)
    }

    /// Open an in-memory database (for tests).
    #[cfg(test)]
    pub fn open_in_memory() -> AppResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> AppResult<Self> {
        // Legacy rows may reference deleted users, so migrate before enforcing keys.
        migrate::migrate(&conn)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Lock the connection. A poisoned lock means a panic mid-query; surface it as a 500.
    pub(crate) fn conn(&self) -> AppResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| AppError::Internal("Database lock poisoned".to_string()))
    }
}

/// Current unix time in seconds.
pub(crate) fn now_secs() -> i64 {
    chrono::Utc::now().timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_legacy_file_with_orphaned_session() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("legacy.db");
        {
            let conn = Connection::open(&path).unwrap();
            conn.execute_batch(
                r#"
                CREATE TABLE user (id TEXT PRIMARY KEY, username TEXT NOT NULL UNIQUE, password_hash TEXT NOT NULL);
                INSERT INTO user (id, username, password_hash) VALUES ('u1', 'old', 'hash');
                CREATE TABLE session (id TEXT PRIMARY KEY, user_id TEXT NOT NULL, expires_at INTEGER NOT NULL);
                INSERT INTO session VALUES ('s1', 'u1', 5000), ('s2', 'deleted-user', 6000);
                "#,
            )
            .unwrap();
        }

        let db = Database::open(path.to_str().unwrap()).unwrap();
        let conn = db.conn().unwrap();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM session", [], |r| r.get(0)).unwrap();
        assert_eq!(count, 2);

        // keys are enforced for everything written after the migration
        let fk: bool = conn.query_row("PRAGMA foreign_keys", [], |r| r.get(0)).unwrap();
        assert!(fk);
        assert!(conn
            .execute("INSERT INTO session (id, userId, expiresAt) VALUES ('s3', 'ghost', 1)", [])
            .is_err());
    }
}
