//! # Schema Migration
//!
//! Brings any database this application has ever written up to the current
//! layout. Older deployments created the `user` and `session` tables with
//! snake_case columns (`user_id`, `expires_at`, `is_active`, ...). The current
//! code reads camelCase columns, so the routine:
//!
//! 1. adds every missing `user` column, copying from the legacy column when one exists,
//! 2. creates, rebuilds or extends the `session` table,
//! 3. installs triggers that keep legacy session columns filled on new rows,
//! 4. creates the `track` and `transcription` tables,
//! 5. stamps `PRAGMA user_version` with [`SCHEMA_VERSION`].
//!
//! Every step checks `PRAGMA table_info` first, so running it on a current
//! database is a no-op.

use rusqlite::Connection;
use std::collections::HashSet;
use tracing::{debug, error, info};

/// Value written to `PRAGMA user_version` once the schema is current.
pub const SCHEMA_VERSION: i64 = 1;

/// One row of `PRAGMA table_info`.
#[derive(Debug, Clone)]
struct ColumnInfo {
    name: String,
    not_null: bool,
}

fn table_info(conn: &Connection, table: &str) -> rusqlite::Result<Vec<ColumnInfo>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let rows = stmt.query_map([], |row| {
        Ok(ColumnInfo {
            name: row.get(1)?,
            not_null: row.get::<_, i64>(3)? != 0,
        })
    })?;
    rows.collect()
}

fn column_names(info: &[ColumnInfo]) -> HashSet<String> {
    info.iter().map(|c| c.name.clone()).collect()
}

/// Run all migrations. Logs and propagates the first failure.
pub fn migrate(conn: &Connection) -> rusqlite::Result<()> {
    match run(conn) {
        Ok(()) => {
            info!("Database migration completed successfully");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Database migration failed");
            Err(e)
        }
    }
}

fn run(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS user (
            id TEXT PRIMARY KEY,
            username TEXT NOT NULL UNIQUE,
            password_hash TEXT NOT NULL
        );
        "#,
    )?;

    migrate_user_table(conn)?;
    migrate_session_table(conn)?;

    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS track (
            id TEXT PRIMARY KEY,
            userId TEXT NOT NULL,
            filePath TEXT NOT NULL,
            fileName TEXT NOT NULL,
            title TEXT,
            wasVideo INTEGER NOT NULL DEFAULT 0,
            createdAt INTEGER NOT NULL,
            FOREIGN KEY (userId) REFERENCES user(id)
        );

        CREATE TABLE IF NOT EXISTS transcription (
            id TEXT PRIMARY KEY,
            trackId TEXT NOT NULL,
            content TEXT NOT NULL,
            withTimestamps INTEGER NOT NULL DEFAULT 0,
            createdAt INTEGER NOT NULL,
            FOREIGN KEY (trackId) REFERENCES track(id)
        );

        CREATE INDEX IF NOT EXISTS idx_track_user ON track(userId, createdAt);
        CREATE INDEX IF NOT EXISTS idx_transcription_track ON transcription(trackId, createdAt);
        CREATE INDEX IF NOT EXISTS idx_session_user ON session(userId);
        "#,
    )?;

    conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
    Ok(())
}

fn migrate_user_table(conn: &Connection) -> rusqlite::Result<()> {
    let existing = column_names(&table_info(conn, "user")?);
    let now = chrono::Utc::now().timestamp();

    // (column, declaration) pairs with no legacy counterpart
    let plain: [(&str, &str); 6] = [
        ("email", "TEXT"),
        ("name", "TEXT"),
        ("avatar", "TEXT"),
        ("age", "INTEGER"),
        ("role", "TEXT DEFAULT 'user'"),
        ("bio", "TEXT"),
    ];
    for (column, decl) in plain {
        add_column(conn, &existing, "user", column, decl)?;
    }

    // Booleans: copy from the snake_case column when an old schema had one
    for (column, decl, legacy) in [
        ("isActive", "INTEGER DEFAULT 1", "is_active"),
        ("emailVerified", "INTEGER DEFAULT 0", "email_verified"),
    ] {
        if add_column(conn, &existing, "user", column, decl)? && existing.contains(legacy) {
            conn.execute_batch(&format!(
                "UPDATE user SET {column} = {legacy} WHERE {legacy} IS NOT NULL;"
            ))?;
        }
    }

    if add_column(conn, &existing, "user", "subscriber", "TEXT DEFAULT 'free'")? {
        conn.execute("UPDATE user SET subscriber = 'free' WHERE subscriber IS NULL", [])?;
    }

    // Timestamps: legacy value when present, otherwise "now" for existing rows
    for (column, legacy) in [
        ("createdAt", Some("created_at")),
        ("updatedAt", Some("updated_at")),
        ("lastSeen", None),
    ] {
        if add_column(conn, &existing, "user", column, "INTEGER")? {
            match legacy {
                Some(legacy) if existing.contains(legacy) => {
                    conn.execute_batch(&format!(
                        "UPDATE user SET {column} = {legacy} WHERE {column} IS NULL;"
                    ))?;
                }
                _ => {}
            }
            conn.execute(
                &format!("UPDATE user SET {column} = ?1 WHERE {column} IS NULL"),
                [now],
            )?;
        }
    }

    // ALTER TABLE cannot add a UNIQUE column, so uniqueness of email lives in an index
    conn.execute_batch("CREATE UNIQUE INDEX IF NOT EXISTS idx_user_email ON user(email);")?;

    Ok(())
}

/// Add `column` unless already present. Returns whether it was added.
fn add_column(
    conn: &Connection,
    existing: &HashSet<String>,
    table: &str,
    column: &str,
    decl: &str,
) -> rusqlite::Result<bool> {
    if existing.contains(column) {
        return Ok(false);
    }
    debug!(table, column, "Adding missing column");
    conn.execute_batch(&format!("ALTER TABLE {table} ADD COLUMN {column} {decl};"))?;
    Ok(true)
}

fn migrate_session_table(conn: &Connection) -> rusqlite::Result<()> {
    let info = table_info(conn, "session")?;
    let columns = column_names(&info);
    let legacy_user_id_not_null = info
        .iter()
        .any(|c| c.name == "user_id" && c.not_null);

    if info.is_empty() {
        conn.execute_batch(
            r#"
            CREATE TABLE session (
                id TEXT PRIMARY KEY,
                userId TEXT NOT NULL,
                expiresAt INTEGER NOT NULL,
                FOREIGN KEY (userId) REFERENCES user(id)
            );
            "#,
        )?;
    } else if legacy_user_id_not_null {
        // A NOT NULL user_id makes every camelCase-only insert fail. Rebuild the
        // table with userId as the required column and user_id kept nullable.
        info!("Rebuilding session table to normalize the userId foreign key");
        let user_id_src = if columns.contains("userId") { "COALESCE(userId, user_id)" } else { "user_id" };
        let expires_src = match (columns.contains("expiresAt"), columns.contains("expires_at")) {
            (true, true) => "COALESCE(expiresAt, expires_at)",
            (true, false) => "expiresAt",
            (false, true) => "expires_at",
            (false, false) => "NULL",
        };
        let legacy_expires = if columns.contains("expires_at") { "expires_at" } else { "NULL" };

        // Table rebuilds run with foreign keys off: legacy rows may point at
        // users that no longer exist.
        let fk_enabled: bool = conn.query_row("PRAGMA foreign_keys", [], |r| r.get(0))?;
        if fk_enabled {
            conn.execute_batch("PRAGMA foreign_keys = OFF;")?;
        }
        let rebuilt = rebuild_session_table(conn, user_id_src, expires_src, legacy_expires);
        if fk_enabled {
            conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        }
        rebuilt?;
    } else {
        if add_column(conn, &columns, "session", "userId", "TEXT")? && columns.contains("user_id") {
            conn.execute_batch("UPDATE session SET userId = user_id WHERE userId IS NULL;")?;
        }
        if add_column(conn, &columns, "session", "expiresAt", "INTEGER")? && columns.contains("expires_at") {
            conn.execute_batch("UPDATE session SET expiresAt = expires_at WHERE expiresAt IS NULL;")?;
        }
    }

    if columns.contains("user_id") || columns.contains("expires_at") {
        install_session_sync_triggers(conn)?;
    }

    Ok(())
}

/// Copy `session` into a table with `userId` as the required column, in one
/// transaction that rolls back on any error.
fn rebuild_session_table(
    conn: &Connection,
    user_id_src: &str,
    expires_src: &str,
    legacy_expires: &str,
) -> rusqlite::Result<()> {
    let tx = conn.unchecked_transaction()?;
    tx.execute_batch(&format!(
        r#"
        CREATE TABLE session_new (
            id TEXT PRIMARY KEY,
            userId TEXT NOT NULL,
            user_id TEXT,
            expiresAt INTEGER,
            expires_at INTEGER,
            FOREIGN KEY (userId) REFERENCES user(id)
        );
        INSERT INTO session_new (id, userId, user_id, expiresAt, expires_at)
        SELECT id, {user_id_src}, user_id, {expires_src}, {legacy_expires}
        FROM session;
        DROP TABLE session;
        ALTER TABLE session_new RENAME TO session;
        "#
    ))?;
    tx.commit()
}

/// Keep legacy snake_case session columns populated from the camelCase values.
///
/// Only called when the table had both kinds of columns at some point; after a
/// rebuild both `user_id` and `expires_at` exist.
fn install_session_sync_triggers(conn: &Connection) -> rusqlite::Result<()> {
    let columns = column_names(&table_info(conn, "session")?);
    let has_user_id = columns.contains("user_id");
    let has_expires = columns.contains("expires_at");

    let (condition, assignments) = match (has_user_id, has_expires) {
        (true, true) => (
            "NEW.user_id IS NULL OR NEW.expires_at IS NULL",
            "user_id = COALESCE(NEW.user_id, NEW.userId), expires_at = COALESCE(NEW.expires_at, NEW.expiresAt)",
        ),
        (true, false) => ("NEW.user_id IS NULL", "user_id = NEW.userId"),
        (false, true) => ("NEW.expires_at IS NULL", "expires_at = NEW.expiresAt"),
        (false, false) => return Ok(()),
    };

    conn.execute_batch(&format!(
        r#"
        DROP TRIGGER IF EXISTS sync_session_after_insert;
        DROP TRIGGER IF EXISTS sync_session_after_update;

        CREATE TRIGGER sync_session_after_insert
        AFTER INSERT ON session
        FOR EACH ROW
        WHEN ({condition})
        BEGIN
            UPDATE session SET {assignments} WHERE id = NEW.id;
        END;

        CREATE TRIGGER sync_session_after_update
        AFTER UPDATE ON session
        FOR EACH ROW
        WHEN ({condition})
        BEGIN
            UPDATE session SET {assignments} WHERE id = NEW.id;
        END;
        "#
    ))?;

    debug!("Installed session sync triggers");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn columns(conn: &Connection, table: &str) -> HashSet<String> {
        column_names(&table_info(conn, table).unwrap())
    }

    #[test]
    fn test_fresh_database() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();

        let user = columns(&conn, "user");
        for col in ["email", "role", "isActive", "emailVerified", "subscriber", "lastSeen", "createdAt", "updatedAt"] {
            assert!(user.contains(col), "missing user.{}", col);
        }
        let session = columns(&conn, "session");
        assert!(session.contains("userId"));
        assert!(session.contains("expiresAt"));
        assert!(!session.contains("user_id"));
        assert!(columns(&conn, "track").contains("filePath"));
        assert!(columns(&conn, "transcription").contains("withTimestamps"));
    }

    #[test]
    fn test_migration_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();
        let before = (columns(&conn, "user"), columns(&conn, "session"));
        migrate(&conn).unwrap();
        assert_eq!((columns(&conn, "user"), columns(&conn, "session")), before);

        let version: i64 = conn.query_row("PRAGMA user_version", [], |r| r.get(0)).unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[test]
    fn test_legacy_user_columns_are_copied() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            r#"
            CREATE TABLE user (
                id TEXT PRIMARY KEY,
                username TEXT NOT NULL UNIQUE,
                password_hash TEXT NOT NULL,
                is_active INTEGER,
                email_verified INTEGER,
                created_at INTEGER,
                updated_at INTEGER
            );
            INSERT INTO user VALUES ('u1', 'old', 'hash', 0, 1, 1000, 2000);
            "#,
        )
        .unwrap();

        migrate(&conn).unwrap();

        let (active, verified, created, updated, tier): (i64, i64, i64, i64, String) = conn
            .query_row(
                "SELECT isActive, emailVerified, createdAt, updatedAt, subscriber FROM user WHERE id = 'u1'",
                [],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?)),
            )
            .unwrap();
        assert_eq!((active, verified, created, updated), (0, 1, 1000, 2000));
        assert_eq!(tier, "free");
    }

    #[test]
    fn test_not_null_legacy_session_is_rebuilt() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            r#"
            CREATE TABLE user (id TEXT PRIMARY KEY, username TEXT NOT NULL UNIQUE, password_hash TEXT NOT NULL);
            INSERT INTO user (id, username, password_hash) VALUES ('u1', 'old', 'hash');
            CREATE TABLE session (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                expires_at INTEGER NOT NULL
            );
            INSERT INTO session VALUES ('s1', 'u1', 5000);
            "#,
        )
        .unwrap();

        migrate(&conn).unwrap();

        let info = table_info(&conn, "session").unwrap();
        let user_id = info.iter().find(|c| c.name == "user_id").unwrap();
        let camel = info.iter().find(|c| c.name == "userId").unwrap();
        assert!(!user_id.not_null);
        assert!(camel.not_null);

        let (uid, exp): (String, i64) = conn
            .query_row("SELECT userId, expiresAt FROM session WHERE id = 's1'", [], |r| {
                Ok((r.get(0)?, r.get(1)?))
            })
            .unwrap();
        assert_eq!(uid, "u1");
        assert_eq!(exp, 5000);

        // New camelCase-only inserts succeed and the trigger fills legacy columns
        conn.execute("INSERT INTO session (id, userId, expiresAt) VALUES ('s2', 'u1', 9000)", [])
            .unwrap();
        let (legacy_uid, legacy_exp): (String, i64) = conn
            .query_row("SELECT user_id, expires_at FROM session WHERE id = 's2'", [], |r| {
                Ok((r.get(0)?, r.get(1)?))
            })
            .unwrap();
        assert_eq!(legacy_uid, "u1");
        assert_eq!(legacy_exp, 9000);
    }

    #[test]
    fn test_rebuild_keeps_orphaned_sessions_with_foreign_keys_on() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;
            CREATE TABLE user (id TEXT PRIMARY KEY, username TEXT NOT NULL UNIQUE, password_hash TEXT NOT NULL);
            INSERT INTO user (id, username, password_hash) VALUES ('u1', 'old', 'hash');
            CREATE TABLE session (id TEXT PRIMARY KEY, user_id TEXT NOT NULL, expires_at INTEGER NOT NULL);
            INSERT INTO session VALUES ('s1', 'u1', 5000), ('s2', 'deleted-user', 6000);
            "#,
        )
        .unwrap();

        migrate(&conn).unwrap();

        let count: i64 = conn.query_row("SELECT COUNT(*) FROM session", [], |r| r.get(0)).unwrap();
        assert_eq!(count, 2);
        let fk: bool = conn.query_row("PRAGMA foreign_keys", [], |r| r.get(0)).unwrap();
        assert!(fk);
        assert!(conn.is_autocommit());
    }

    #[test]
    fn test_nullable_legacy_session_gets_camel_columns() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            r#"
            CREATE TABLE user (id TEXT PRIMARY KEY, username TEXT NOT NULL UNIQUE, password_hash TEXT NOT NULL);
            CREATE TABLE session (id TEXT PRIMARY KEY, user_id TEXT, expires_at INTEGER);
            INSERT INTO session VALUES ('s1', 'u1', 7000);
            "#,
        )
        .unwrap();

        migrate(&conn).unwrap();

        let (uid, exp): (String, i64) = conn
            .query_row("SELECT userId, expiresAt FROM session WHERE id = 's1'", [], |r| {
                Ok((r.get(0)?, r.get(1)?))
            })
            .unwrap();
        assert_eq!((uid.as_str(), exp), ("u1", 7000));
    }
}
