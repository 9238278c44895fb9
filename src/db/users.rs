//! User account data access.

use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::info;
use uuid::Uuid;

use super::models::{from_unix, NewUser, Role, Subscriber, User, UserUpdate};
use super::{now_secs, Database};
use crate::auth::password::{hash_password, verify_password};
use crate::config::AdminConfig;
use crate::error::{AppError, AppResult};

const USER_COLUMNS: &str = "id, username, email, password_hash, name, age, avatar, bio, subscriber, \
     lastSeen, role, isActive, emailVerified, createdAt, updatedAt";

pub const DEFAULT_LIMIT: i64 = 50;
pub const MAX_LIMIT: i64 = 500;

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        username: row.get(1)?,
        email: row.get(2)?,
        password_hash: row.get(3)?,
        name: row.get(4)?,
        age: row.get(5)?,
        avatar: row.get(6)?,
        bio: row.get(7)?,
        subscriber: row.get(8)?,
        last_seen: from_unix(row.get::<_, Option<i64>>(9)?.unwrap_or_default()),
        role: row.get(10)?,
        is_active: row.get::<_, Option<bool>>(11)?.unwrap_or(true),
        email_verified: row.get::<_, Option<bool>>(12)?.unwrap_or(false),
        created_at: from_unix(row.get::<_, Option<i64>>(13)?.unwrap_or_default()),
        updated_at: from_unix(row.get::<_, Option<i64>>(14)?.unwrap_or_default()),
    })
}

/// Clamp client-supplied paging values. Zero or negative limits fall back to the default.
pub fn clamp_page(limit: Option<i64>, offset: Option<i64>) -> (i64, i64) {
    let limit = match limit {
        Some(l) if l > 0 => l.min(MAX_LIMIT),
        _ => DEFAULT_LIMIT,
    };
    (limit, offset.unwrap_or(0).max(0))
}

fn new_user_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Blank strings from form submissions mean "not provided".
fn non_empty(value: Option<String>) -> Option<String> {
    value.and_then(|v| {
        let trimmed = v.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
}

impl Database {
    fn query_user(conn: &Connection, column: &str, value: &str) -> AppResult<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM user WHERE {column} = ?1");
        Ok(conn.query_row(&sql, [value], user_from_row).optional()?)
    }

    pub fn get_user_by_id(&self, id: &str) -> AppResult<Option<User>> {
        let conn = self.conn()?;
        Self::query_user(&conn, "id", id)
    }

    pub fn get_user_by_username(&self, username: &str) -> AppResult<Option<User>> {
        let conn = self.conn()?;
        Self::query_user(&conn, "username", username)
    }

    pub fn get_user_by_email(&self, email: &str) -> AppResult<Option<User>> {
        let conn = self.conn()?;
        Self::query_user(&conn, "email", email)
    }

    /// List users, optionally filtered by a case-insensitive substring of
    /// username, name or email.
    pub fn list_users(&self, limit: i64, offset: i64, search: Option<&str>) -> AppResult<Vec<User>> {
        let conn = self.conn()?;
        let users = match search.map(str::trim).filter(|s| !s.is_empty()) {
            Some(term) => {
                let pattern = format!("%{}%", term.to_lowercase());
                let mut stmt = conn.prepare(&format!(
                    "SELECT {USER_COLUMNS} FROM user \
                     WHERE lower(username) LIKE ?1 OR lower(name) LIKE ?1 OR lower(email) LIKE ?1 \
                     ORDER BY createdAt, username LIMIT ?2 OFFSET ?3"
                ))?;
                let rows = stmt.query_map(params![pattern, limit, offset], user_from_row)?;
                rows.collect::<Result<Vec<_>, _>>()?
            }
            None => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {USER_COLUMNS} FROM user ORDER BY createdAt, username LIMIT ?1 OFFSET ?2"
                ))?;
                let rows = stmt.query_map(params![limit, offset], user_from_row)?;
                rows.collect::<Result<Vec<_>, _>>()?
            }
        };
        Ok(users)
    }

    pub fn create_user(&self, new_user: NewUser) -> AppResult<User> {
        let username = new_user.username.trim().to_string();
        if username.is_empty() || new_user.password.is_empty() {
            return Err(AppError::BadRequest("Username and password are required".to_string()));
        }

        // Hash outside the lock; Argon2 is deliberately slow
        let password_hash = hash_password(&new_user.password)?;
        let id = new_user_id();
        let now = now_secs();

        {
            let conn = self.conn()?;
            conn.execute(
                "INSERT INTO user (id, username, email, password_hash, name, bio, role, subscriber, \
                 isActive, emailVerified, lastSeen, createdAt, updatedAt) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 1, 0, ?9, ?9, ?9)",
                params![
                    id,
                    username,
                    non_empty(new_user.email),
                    password_hash,
                    non_empty(new_user.name),
                    non_empty(new_user.bio),
                    new_user.role.unwrap_or_default(),
                    Subscriber::default(),
                    now,
                ],
            )?;
        }

        self.get_user_by_id(&id)?
            .ok_or_else(|| AppError::Internal("Created user could not be read back".to_string()))
    }

    /// Apply a partial update. Returns `None` when the user doesn't exist.
    pub fn update_user(&self, id: &str, update: UserUpdate) -> AppResult<Option<User>> {
        let password_hash = match update.password.as_deref() {
            Some(pw) if !pw.is_empty() => Some(hash_password(pw)?),
            _ => None,
        };

        if let Some(username) = &update.username {
            if username.trim().is_empty() {
                return Err(AppError::ValidationError("Username cannot be empty".to_string()));
            }
        }

        let mut sets: Vec<&str> = Vec::new();
        let mut values: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(username) = update.username {
            sets.push("username = ?");
            values.push(Box::new(username.trim().to_string()));
        }
        if let Some(email) = update.email {
            sets.push("email = ?");
            values.push(Box::new(non_empty(Some(email))));
        }
        if let Some(name) = update.name {
            sets.push("name = ?");
            values.push(Box::new(non_empty(Some(name))));
        }
        if let Some(age) = update.age {
            sets.push("age = ?");
            values.push(Box::new(age));
        }
        if let Some(avatar) = update.avatar {
            sets.push("avatar = ?");
            values.push(Box::new(non_empty(Some(avatar))));
        }
        if let Some(bio) = update.bio {
            sets.push("bio = ?");
            values.push(Box::new(non_empty(Some(bio))));
        }
        if let Some(hash) = password_hash {
            sets.push("password_hash = ?");
            values.push(Box::new(hash));
        }
        if let Some(role) = update.role {
            sets.push("role = ?");
            values.push(Box::new(role));
        }
        if let Some(subscriber) = update.subscriber {
            sets.push("subscriber = ?");
            values.push(Box::new(subscriber));
        }
        if let Some(active) = update.is_active {
            sets.push("isActive = ?");
            values.push(Box::new(active));
        }
        if let Some(verified) = update.email_verified {
            sets.push("emailVerified = ?");
            values.push(Box::new(verified));
        }

        // updatedAt is always bumped, even for an empty update
        sets.push("updatedAt = ?");
        values.push(Box::new(now_secs()));
        values.push(Box::new(id.to_string()));

        let sql = format!("UPDATE user SET {} WHERE id = ?", sets.join(", "));
        let changed = {
            let conn = self.conn()?;
            conn.execute(&sql, rusqlite::params_from_iter(values.iter()))?
        };

        if changed == 0 {
            return Ok(None);
        }
        self.get_user_by_id(id)
    }

    /// Delete a user and everything that references them.
    ///
    /// Returns the stored file paths of the user's tracks so the caller can
    /// remove them from disk, or `None` when no such user existed.
    pub fn delete_user(&self, id: &str) -> AppResult<Option<Vec<String>>> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let file_paths = {
            let mut stmt = tx.prepare("SELECT filePath FROM track WHERE userId = ?1")?;
            let rows = stmt.query_map([id], |r| r.get::<_, String>(0))?;
            rows.collect::<Result<Vec<_>, _>>()?
        };

        tx.execute(
            "DELETE FROM transcription WHERE trackId IN (SELECT id FROM track WHERE userId = ?1)",
            [id],
        )?;
        tx.execute("DELETE FROM track WHERE userId = ?1", [id])?;
        tx.execute("DELETE FROM session WHERE userId = ?1", [id])?;
        let removed = tx.execute("DELETE FROM user WHERE id = ?1", [id])?;
        tx.commit()?;

        Ok((removed > 0).then_some(file_paths))
    }

    /// Check a username/password pair. Inactive accounts never authenticate.
    pub fn validate_user_credentials(&self, username: &str, password: &str) -> AppResult<Option<User>> {
        let Some(user) = self.get_user_by_username(username)? else {
            return Ok(None);
        };
        if !user.is_active || !verify_password(&user.password_hash, password) {
            return Ok(None);
        }
        Ok(Some(user))
    }

    /// True when no user other than `exclude_id` has this username.
    pub fn is_username_available(&self, username: &str, exclude_id: Option<&str>) -> AppResult<bool> {
        Ok(match self.get_user_by_username(username)? {
            Some(existing) => Some(existing.id.as_str()) == exclude_id,
            None => true,
        })
    }

    /// True when no user other than `exclude_id` has this email. Empty email is always available.
    pub fn is_email_available(&self, email: &str, exclude_id: Option<&str>) -> AppResult<bool> {
        if email.trim().is_empty() {
            return Ok(true);
        }
        Ok(match self.get_user_by_email(email)? {
            Some(existing) => Some(existing.id.as_str()) == exclude_id,
            None => true,
        })
    }

    pub fn touch_last_seen(&self, id: &str) -> AppResult<()> {
        self.conn()?
            .execute("UPDATE user SET lastSeen = ?1 WHERE id = ?2", params![now_secs(), id])?;
        Ok(())
    }

    /// Create the bootstrap administrator if that username is free.
    /// Returns whether an account was created.
    pub fn ensure_admin_user(&self, admin: &AdminConfig) -> AppResult<bool> {
        if self.get_user_by_username(&admin.username)?.is_some() {
            info!(username = %admin.username, "Admin user already exists");
            return Ok(false);
        }

        let user = self.create_user(NewUser {
            username: admin.username.clone(),
            email: Some(admin.email.clone()),
            name: Some(admin.name.clone()),
            password: admin.password.clone(),
            role: Some(Role::Admin),
            bio: Some(admin.bio.clone()),
        })?;
        info!(user_id = %user.id, username = %user.username, "Admin user created");
        Ok(true)
    }
}
