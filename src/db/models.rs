//! Row types for the user, session, track and transcription tables.
//!
//! Timestamps are stored as unix seconds and surface as `DateTime<Utc>`.
//! JSON uses camelCase keys to match what browser clients already send.

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Authorization role of an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    User,
    Admin,
}

/// Subscription tier. Drives which accounts the retention sweep touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Subscriber {
    #[default]
    Free,
    Pro,
    Premium,
    Max,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
        }
    }
}

impl Subscriber {
    pub fn as_str(&self) -> &'static str {
        match self {
            Subscriber::Free => "free",
            Subscriber::Pro => "pro",
            Subscriber::Premium => "premium",
            Subscriber::Max => "max",
        }
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "user" => Ok(Role::User),
            "admin" => Ok(Role::Admin),
            other => Err(format!("unknown role '{}'", other)),
        }
    }
}

impl FromStr for Subscriber {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "free" => Ok(Subscriber::Free),
            "pro" => Ok(Subscriber::Pro),
            "premium" => Ok(Subscriber::Premium),
            "max" => Ok(Subscriber::Max),
            other => Err(format!("unknown subscriber tier '{}'", other)),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for Subscriber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// Legacy rows may hold NULL in role/subscriber, which reads as the default.
impl FromSql for Role {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        match value {
            ValueRef::Null => Ok(Role::default()),
            other => other
                .as_str()?
                .parse()
                .map_err(|e: String| FromSqlError::Other(e.into())),
        }
    }
}

impl ToSql for Role {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for Subscriber {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        match value {
            ValueRef::Null => Ok(Subscriber::default()),
            other => other
                .as_str()?
                .parse()
                .map_err(|e: String| FromSqlError::Other(e.into())),
        }
    }
}

impl ToSql for Subscriber {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

/// An account row. The password hash never leaves the server.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub username: String,
    pub email: Option<String>,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub name: Option<String>,
    pub age: Option<i64>,
    pub avatar: Option<String>,
    pub bio: Option<String>,
    pub subscriber: Subscriber,
    pub last_seen: DateTime<Utc>,
    pub role: Role,
    pub is_active: bool,
    pub email_verified: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// Public subset returned by the login endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct UserSummary {
    pub id: String,
    pub username: String,
    pub email: Option<String>,
    pub name: Option<String>,
    pub role: Role,
}

impl From<&User> for UserSummary {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.clone(),
            username: user.username.clone(),
            email: user.email.clone(),
            name: user.name.clone(),
            role: user.role,
        }
    }
}

/// Fields accepted when creating an account.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewUser {
    #[serde(default)]
    pub username: String,
    pub email: Option<String>,
    pub name: Option<String>,
    #[serde(default)]
    pub password: String,
    pub role: Option<Role>,
    pub bio: Option<String>,
}

/// Partial update. `None` leaves the column untouched.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserUpdate {
    pub username: Option<String>,
    pub email: Option<String>,
    pub name: Option<String>,
    pub age: Option<i64>,
    pub avatar: Option<String>,
    pub bio: Option<String>,
    pub password: Option<String>,
    pub role: Option<Role>,
    pub subscriber: Option<Subscriber>,
    pub is_active: Option<bool>,
    pub email_verified: Option<bool>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub user_id: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Track {
    pub id: String,
    pub user_id: String,
    pub file_path: String,
    pub file_name: String,
    pub title: Option<String>,
    pub was_video: bool,
    pub created_at: DateTime<Utc>,
}

/// Track plus whether any transcription exists for it.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackListing {
    #[serde(flatten)]
    pub track: Track,
    pub has_transcription: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Transcription {
    pub id: String,
    pub track_id: String,
    pub content: String,
    pub with_timestamps: bool,
    pub created_at: DateTime<Utc>,
}

/// Convert stored unix seconds to a UTC timestamp, clamping garbage to the epoch.
pub fn from_unix(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap_or_default()
}
