//! # Inactive-User Data Retention
//!
//! Accounts on the configured subscriber tiers that have not been seen for
//! `inactive_days` lose their stored data: transcriptions, tracks and sessions.
//! The account row itself stays, so the user can still sign in and start over.
//! Administrators are never swept.

use chrono::{DateTime, Duration, Utc};
use rusqlite::params_from_iter;
use serde::Serialize;

use super::models::Subscriber;
use super::Database;
use crate::error::AppResult;

/// What a sweep removed. `file_paths` are relative to the storage root.
#[derive(Debug, Default, Clone, Serialize)]
pub struct SweepReport {
    pub users: usize,
    pub tracks: usize,
    pub transcriptions: usize,
    pub sessions: usize,
    pub expired_sessions: usize,
    pub file_paths: Vec<String>,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.users == 0 && self.expired_sessions == 0
    }
}

impl Database {
    /// Remove the data of inactive users as of `now`.
    pub fn sweep_inactive_users(
        &self,
        now: DateTime<Utc>,
        inactive_days: i64,
        tiers: &[Subscriber],
    ) -> AppResult<SweepReport> {
        let mut report = SweepReport::default();
        let cutoff = (now - Duration::days(inactive_days)).timestamp();

        report.expired_sessions = self.delete_expired_sessions()?;

        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        if !tiers.is_empty() {
            let placeholders = vec!["?"; tiers.len()].join(", ");
            let mut args: Vec<String> = vec![cutoff.to_string()];
            args.extend(tiers.iter().map(|t| t.as_str().to_string()));

            let user_ids: Vec<String> = {
                let mut stmt = tx.prepare(&format!(
                    "SELECT id FROM user \
                     WHERE role != 'admin' AND COALESCE(lastSeen, 0) < CAST(? AS INTEGER) \
                       AND COALESCE(subscriber, 'free') IN ({placeholders})"
                ))?;
                let rows = stmt.query_map(params_from_iter(args.iter()), |r| r.get::<_, String>(0))?;
                rows.collect::<Result<Vec<_>, _>>()?
            };

            for user_id in &user_ids {
                let paths = {
                    let mut stmt = tx.prepare("SELECT filePath FROM track WHERE userId = ?1")?;
                    let rows = stmt.query_map([user_id], |r| r.get::<_, String>(0))?;
                    rows.collect::<Result<Vec<_>, _>>()?
                };

                let transcriptions = tx.execute(
                    "DELETE FROM transcription WHERE trackId IN (SELECT id FROM track WHERE userId = ?1)",
                    [user_id],
                )?;
                let tracks = tx.execute("DELETE FROM track WHERE userId = ?1", [user_id])?;
                let sessions = tx.execute("DELETE FROM session WHERE userId = ?1", [user_id])?;

                if tracks + transcriptions + sessions > 0 {
                    report.users += 1;
                }
                report.tracks += tracks;
                report.transcriptions += transcriptions;
                report.sessions += sessions;
                report.file_paths.extend(paths);
            }
        }

        tx.commit()?;
        Ok(report)
    }
}
