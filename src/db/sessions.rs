//! Session rows. Only the SHA-256 of a session token is ever stored, as the id.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

use super::models::{from_unix, Session};
use super::{now_secs, Database};
use crate::error::AppResult;

impl Database {
    pub fn create_session(&self, id: &str, user_id: &str, expires_at: DateTime<Utc>) -> AppResult<Session> {
        self.conn()?.execute(
            "INSERT INTO session (id, userId, expiresAt) VALUES (?1, ?2, ?3)",
            params![id, user_id, expires_at.timestamp()],
        )?;
        Ok(Session {
            id: id.to_string(),
            user_id: user_id.to_string(),
            expires_at: from_unix(expires_at.timestamp()),
        })
    }

    pub fn get_session(&self, id: &str) -> AppResult<Option<Session>> {
        let session = self
            .conn()?
            .query_row(
                "SELECT id, userId, expiresAt FROM session WHERE id = ?1",
                [id],
                |row| {
                    Ok(Session {
                        id: row.get(0)?,
                        user_id: row.get(1)?,
                        expires_at: from_unix(row.get::<_, Option<i64>>(2)?.unwrap_or_default()),
                    })
                },
            )
            .optional()?;
        Ok(session)
    }

    pub fn update_session_expiry(&self, id: &str, expires_at: DateTime<Utc>) -> AppResult<()> {
        self.conn()?.execute(
            "UPDATE session SET expiresAt = ?1 WHERE id = ?2",
            params![expires_at.timestamp(), id],
        )?;
        Ok(())
    }

    pub fn delete_session(&self, id: &str) -> AppResult<()> {
        self.conn()?.execute("DELETE FROM session WHERE id = ?1", [id])?;
        Ok(())
    }

    /// Sign a user out everywhere. Returns the number of sessions removed.
    pub fn delete_user_sessions(&self, user_id: &str) -> AppResult<usize> {
        Ok(self.conn()?.execute("DELETE FROM session WHERE userId = ?1", [user_id])?)
    }

    /// Remove sessions past their expiry. Returns the number removed.
    pub fn delete_expired_sessions(&self) -> AppResult<usize> {
        Ok(self
            .conn()?
            .execute("DELETE FROM session WHERE expiresAt IS NULL OR expiresAt <= ?1", [now_secs()])?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::NewUser;
    use chrono::Duration;

    fn db_with_user() -> (Database, String) {
        let db = Database::open_in_memory().unwrap();
        let user = db
            .create_user(NewUser {
                username: "alice".to_string(),
                password: "pw".to_string(),
                ..Default::default()
            })
            .unwrap();
        (db, user.id)
    }

    #[test]
    fn test_session_crud() {
        let (db, user_id) = db_with_user();
        let expires = Utc::now() + Duration::days(30);

        db.create_session("s1", &user_id, expires).unwrap();
        let session = db.get_session("s1").unwrap().unwrap();
        assert_eq!(session.user_id, user_id);
        assert_eq!(session.expires_at.timestamp(), expires.timestamp());

        let later = expires + Duration::days(5);
        db.update_session_expiry("s1", later).unwrap();
        assert_eq!(db.get_session("s1").unwrap().unwrap().expires_at.timestamp(), later.timestamp());

        db.delete_session("s1").unwrap();
        assert!(db.get_session("s1").unwrap().is_none());
    }

    #[test]
    fn test_expired_and_per_user_cleanup() {
        let (db, user_id) = db_with_user();
        db.create_session("old", &user_id, Utc::now() - Duration::hours(1)).unwrap();
        db.create_session("new", &user_id, Utc::now() + Duration::days(1)).unwrap();

        assert_eq!(db.delete_expired_sessions().unwrap(), 1);
        assert!(db.get_session("new").unwrap().is_some());

        assert_eq!(db.delete_user_sessions(&user_id).unwrap(), 1);
        assert!(db.get_session("new").unwrap().is_none());
    }

    #[test]
    fn test_session_requires_existing_user() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.create_session("s1", "ghost", Utc::now()).is_err());
    }
}
