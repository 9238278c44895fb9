//! # Authentication
//!
//! Cookie-based sessions backed by the `session` table.
//!
//! ## Token scheme:
//! - The client holds a random token (20 bytes, hex) in an HttpOnly cookie
//! - The database stores only `sha256(token)` as the session id, so a leaked
//!   database does not leak usable cookies
//! - A session lives `session_ttl_days`; once less than `refresh_window_days`
//!   remain, the next request extends it and the cookie is re-issued
//!
//! ## Components:
//! - [`SessionManager`]: create / validate / invalidate sessions, build cookies
//! - [`extract`]: `CurrentUser` and `MaybeUser` request extractors
//! - [`password`]: Argon2id hashing

pub mod extract;
pub mod password;

use actix_web::cookie::{time::OffsetDateTime, Cookie, SameSite};
use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::config::AppConfig;
use crate::db::models::{Session, User};
use crate::db::Database;
use crate::error::AppResult;

pub use extract::{require_role, AuthContext, CurrentUser, MaybeUser};

/// Random session token handed to the client.
pub fn generate_session_token() -> String {
    let mut bytes = [0u8; 20];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Session id stored in the database for a given token.
pub fn session_id_from_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// Outcome of a successful token validation.
#[derive(Debug, Clone)]
pub struct SessionValidation {
    pub session: Session,
    pub user: User,
    /// The expiry was extended; the cookie must be re-sent.
    pub refreshed: bool,
}

/// Session lifecycle rules plus cookie settings, built from config.
#[derive(Debug, Clone)]
pub struct SessionManager {
    db: Database,
    cookie_name: String,
    ttl: Duration,
    refresh_window: Duration,
    secure: bool,
}

impl SessionManager {
    pub fn new(db: Database, config: &AppConfig) -> Self {
        Self {
            db,
            cookie_name: config.auth.cookie_name.clone(),
            ttl: Duration::days(config.auth.session_ttl_days),
            refresh_window: Duration::days(config.auth.refresh_window_days),
            secure: config.server.secure_cookies,
        }
    }

    pub fn cookie_name(&self) -> &str {
        &self.cookie_name
    }

    /// Store a new session for `user_id` keyed by the hash of `token`.
    pub fn create_session(&self, token: &str, user_id: &str) -> AppResult<Session> {
        let expires_at = Utc::now() + self.ttl;
        let session = self.db.create_session(&session_id_from_token(token), user_id, expires_at)?;
        self.db.touch_last_seen(user_id)?;
        Ok(session)
    }

    /// Resolve a cookie token to its session and user.
    ///
    /// Expired sessions are deleted. Sessions of deleted or deactivated users
    /// are treated as invalid. Every successful validation updates `lastSeen`.
    pub fn validate_session_token(&self, token: &str) -> AppResult<Option<SessionValidation>> {
        self.validate_at(token, Utc::now())
    }

    fn validate_at(&self, token: &str, now: DateTime<Utc>) -> AppResult<Option<SessionValidation>> {
        let session_id = session_id_from_token(token);
        let Some(mut session) = self.db.get_session(&session_id)? else {
            return Ok(None);
        };

        if now >= session.expires_at {
            debug!(user_id = %session.user_id, "Session expired");
            self.db.delete_session(&session_id)?;
            return Ok(None);
        }

        let user = match self.db.get_user_by_id(&session.user_id)? {
            Some(user) if user.is_active => user,
            _ => return Ok(None),
        };

        let mut refreshed = false;
        if session.expires_at - now < self.refresh_window {
            session.expires_at = now + self.ttl;
            self.db.update_session_expiry(&session_id, session.expires_at)?;
            refreshed = true;
        }

        self.db.touch_last_seen(&user.id)?;
        Ok(Some(SessionValidation { session, user, refreshed }))
    }

    pub fn invalidate_session(&self, session_id: &str) -> AppResult<()> {
        self.db.delete_session(session_id)
    }

    pub fn invalidate_user_sessions(&self, user_id: &str) -> AppResult<usize> {
        self.db.delete_user_sessions(user_id)
    }

    /// Cookie carrying `token` until `expires_at`.
    pub fn session_cookie(&self, token: &str, expires_at: DateTime<Utc>) -> Cookie<'static> {
        let expires = OffsetDateTime::from_unix_timestamp(expires_at.timestamp())
            .unwrap_or(OffsetDateTime::UNIX_EPOCH);
        Cookie::build(self.cookie_name.clone(), token.to_string())
            .path("/")
            .http_only(true)
            .same_site(SameSite::Strict)
            .secure(self.secure)
            .expires(expires)
            .finish()
    }

    /// Cookie that makes the browser drop the session cookie.
    pub fn removal_cookie(&self) -> Cookie<'static> {
        let mut cookie = Cookie::build(self.cookie_name.clone(), "")
            .path("/")
            .http_only(true)
            .same_site(SameSite::Strict)
            .secure(self.secure)
            .finish();
        cookie.make_removal();
        cookie
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{NewUser, UserUpdate};

    fn setup() -> (SessionManager, Database, User) {
        let db = Database::open_in_memory().unwrap();
        let user = db
            .create_user(NewUser {
                username: "alice".to_string(),
                password: "pw".to_string(),
                ..Default::default()
            })
            .unwrap();
        (SessionManager::new(db.clone(), &AppConfig::default()), db, user)
    }

    #[test]
    fn test_token_shape() {
        let token = generate_session_token();
        assert_eq!(token.len(), 40);
        assert_ne!(token, generate_session_token());
        assert_eq!(session_id_from_token(&token).len(), 64);
        assert_eq!(session_id_from_token("abc"), session_id_from_token("abc"));
    }

    #[test]
    fn test_validate_fresh_session() {
        let (manager, db, user) = setup();
        let token = generate_session_token();
        let session = manager.create_session(&token, &user.id).unwrap();

        // stored under the hash, never the raw token
        assert!(db.get_session(&token).unwrap().is_none());
        assert_eq!(session.id, session_id_from_token(&token));

        let validation = manager.validate_session_token(&token).unwrap().unwrap();
        assert_eq!(validation.user.id, user.id);
        assert!(!validation.refreshed);

        assert!(manager.validate_session_token("bogus").unwrap().is_none());
    }

    #[test]
    fn test_session_refresh_window() {
        let (manager, db, user) = setup();
        let token = generate_session_token();
        manager.create_session(&token, &user.id).unwrap();

        // 20 days later: 10 days left, inside the 15-day window
        let later = Utc::now() + Duration::days(20);
        let validation = manager.validate_at(&token, later).unwrap().unwrap();
        assert!(validation.refreshed);
        assert_eq!(validation.session.expires_at.timestamp(), (later + Duration::days(30)).timestamp());

        let stored = db.get_session(&session_id_from_token(&token)).unwrap().unwrap();
        assert_eq!(stored.expires_at.timestamp(), validation.session.expires_at.timestamp());
    }

    #[test]
    fn test_expired_session_is_deleted() {
        let (manager, db, user) = setup();
        let token = generate_session_token();
        manager.create_session(&token, &user.id).unwrap();

        let after_expiry = Utc::now() + Duration::days(31);
        assert!(manager.validate_at(&token, after_expiry).unwrap().is_none());
        assert!(db.get_session(&session_id_from_token(&token)).unwrap().is_none());
    }

    #[test]
    fn test_inactive_user_session_rejected() {
        let (manager, db, user) = setup();
        let token = generate_session_token();
        manager.create_session(&token, &user.id).unwrap();

        db.update_user(&user.id, UserUpdate { is_active: Some(false), ..Default::default() })
            .unwrap();
        assert!(manager.validate_session_token(&token).unwrap().is_none());
    }

    #[test]
    fn test_cookies() {
        let (manager, _, _) = setup();
        let cookie = manager.session_cookie("tok", Utc::now() + Duration::days(1));
        assert_eq!(cookie.name(), "auth-session");
        assert_eq!(cookie.value(), "tok");
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.same_site(), Some(SameSite::Strict));
        assert_eq!(cookie.path(), Some("/"));

        let removal = manager.removal_cookie();
        assert_eq!(removal.value(), "");
        assert!(removal.max_age().is_some());
    }
}
