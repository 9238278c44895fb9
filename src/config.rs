//! # Configuration Management
//!
//! This module handles loading and managing application configuration from multiple sources:
//! - TOML configuration files (config.toml)
//! - Environment variables (with APP_ prefix)
//! - Well-known deployment variables (HOST, PORT, DATABASE_URL, STORAGE_DIR, MISTRAL_API_KEY)
//! - Default values (built into the code)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Deployment variables (PORT=3000, DATABASE_URL=./app.db, ...)
//! 2. Prefixed environment variables (APP_SERVER__PORT, APP_RETENTION__INACTIVE_DAYS, ...)
//! 3. Configuration file (config.toml)
//! 4. Default values (defined in the Default impl)
//!
//! Nested keys are separated with a double underscore because several keys
//! (`session_ttl_days`, `max_upload_mb`) contain single underscores themselves.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;

use crate::db::models::Subscriber;

/// Main application configuration that contains all settings.
///
/// ## Why separate config structs:
/// Breaking configuration into logical groups (server, database, auth, ...)
/// keeps each concern readable and lets `config.toml` mirror the same layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub storage: StorageConfig,
    pub auth: AuthConfig,
    pub transcription: TranscriptionConfig,
    pub retention: RetentionConfig,
    pub admin: AdminConfig,
}

/// Server-specific configuration settings.
///
/// ## Fields:
/// - `host`: IP address or hostname to bind the server to (e.g., "127.0.0.1", "0.0.0.0")
/// - `port`: TCP port number to listen on
/// - `secure_cookies`: Mark the session cookie `Secure` (enable behind HTTPS)
/// - `max_upload_mb`: Largest accepted track upload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub secure_cookies: bool,
    pub max_upload_mb: usize,
}

/// SQLite database location. An empty `url` selects an in-memory database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
}

/// Root directory for uploaded track files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub dir: String,
}

/// Session cookie and lifetime settings.
///
/// A session lives `session_ttl_days`. When a request arrives with less than
/// `refresh_window_days` remaining, the expiry is pushed out again.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub cookie_name: String,
    pub session_ttl_days: i64,
    pub refresh_window_days: i64,
}

/// External speech-to-text provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub timeout_secs: u64,
    pub max_concurrent: usize,
}

/// Inactive-user data-retention sweep settings.
///
/// ## Fields:
/// - `inactive_days`: Users not seen for this many days lose their stored tracks
/// - `sweep_interval_hours`: How often the sweep runs after the startup pass
/// - `tiers`: Subscriber tiers the sweep applies to (paying tiers are usually exempt)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    pub enabled: bool,
    pub inactive_days: i64,
    pub sweep_interval_hours: u64,
    pub tiers: Vec<String>,
}

/// Bootstrap administrator created on first start.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminConfig {
    pub username: String,
    pub email: String,
    pub name: String,
    pub password: String,
    pub bio: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),  // Localhost only (safe for development)
                port: 8080,
                secure_cookies: false,
                max_upload_mb: 200,
            },
            database: DatabaseConfig {
                url: String::new(),
            },
            storage: StorageConfig {
                dir: "storage".to_string(),
            },
            auth: AuthConfig {
                cookie_name: "auth-session".to_string(),
                session_ttl_days: 30,
                refresh_window_days: 15,
            },
            transcription: TranscriptionConfig {
                api_key: String::new(),
                base_url: "https://api.mistral.ai/v1".to_string(),
                model: "voxtral-mini-latest".to_string(),
                timeout_secs: 300,
                max_concurrent: 4,
            },
            retention: RetentionConfig {
                enabled: true,
                inactive_days: 90,
                sweep_interval_hours: 24,
                tiers: vec!["free".to_string()],
            },
            admin: AdminConfig {
                username: "admin".to_string(),
                email: "admin@example.com".to_string(),
                name: "Admin User".to_string(),
                password: "admin123".to_string(),
                bio: "System administrator".to_string(),
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from multiple sources in priority order.
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER__HOST=0.0.0.0`: Override server host
    /// - `APP_AUTH__SESSION_TTL_DAYS=7`: Shorter sessions
    /// - `APP_RETENTION__TIERS=free,pro`: Comma-separated tier list
    /// - `PORT=3000`: Special case for deployment platforms
    /// - `DATABASE_URL=./data/app.db`: SQLite file
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("retention.tiers")
                    .try_parsing(true),
            );

        // Deployment platforms and the old .env files use these bare names
        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }
        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }
        if let Ok(url) = env::var("DATABASE_URL") {
            settings = settings.set_override("database.url", url)?;
        }
        if let Ok(dir) = env::var("STORAGE_DIR") {
            settings = settings.set_override("storage.dir", dir)?;
        }
        if let Ok(key) = env::var("MISTRAL_API_KEY") {
            settings = settings.set_override("transcription.api_key", key)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    ///
    /// ## Why validate:
    /// Catching configuration errors at startup gives a clear message instead of
    /// sessions that never expire or a sweep that deletes everything.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.server.max_upload_mb == 0 {
            return Err(anyhow::anyhow!("Max upload size must be greater than 0"));
        }

        if self.auth.session_ttl_days <= 0 {
            return Err(anyhow::anyhow!("Session TTL must be greater than 0 days"));
        }

        if self.auth.refresh_window_days < 0 || self.auth.refresh_window_days >= self.auth.session_ttl_days {
            return Err(anyhow::anyhow!(
                "Session refresh window must be between 0 and the session TTL ({} days)",
                self.auth.session_ttl_days
            ));
        }

        if self.auth.cookie_name.trim().is_empty() {
            return Err(anyhow::anyhow!("Session cookie name cannot be empty"));
        }

        if self.transcription.max_concurrent == 0 {
            return Err(anyhow::anyhow!("Max concurrent transcriptions must be greater than 0"));
        }

        if self.retention.enabled {
            if self.retention.inactive_days <= 0 {
                return Err(anyhow::anyhow!("Retention inactive_days must be greater than 0"));
            }
            if self.retention.sweep_interval_hours == 0 {
                return Err(anyhow::anyhow!("Retention sweep interval must be greater than 0"));
            }
        }

        for tier in &self.retention.tiers {
            tier.parse::<Subscriber>()
                .map_err(|e| anyhow::anyhow!("Invalid retention tier: {}", e))?;
        }

        if self.admin.username.trim().is_empty() || self.admin.password.is_empty() {
            return Err(anyhow::anyhow!("Admin username and password must be set"));
        }

        Ok(())
    }

    /// Parsed retention tiers. Invalid entries were already rejected by `validate`.
    pub fn retention_tiers(&self) -> Vec<Subscriber> {
        self.retention
            .tiers
            .iter()
            .filter_map(|t| t.parse().ok())
            .collect()
    }

    /// Largest accepted upload in bytes.
    pub fn max_upload_bytes(&self) -> usize {
        self.server.max_upload_mb * 1024 * 1024
    }
}
