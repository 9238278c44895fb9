//! Scheduled data-retention sweep.
//!
//! Runs once at startup and then every `retention.sweep_interval_hours`. The
//! database side lives in [`crate::db::retention`]; this module drives it on a
//! timer and removes the swept audio files from storage.

use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

use crate::db::retention::SweepReport;
use crate::error::AppResult;
use crate::state::AppState;

/// Run one sweep against `state` and delete the files it reports.
pub async fn run_sweep(state: &AppState) -> AppResult<SweepReport> {
    let config = state.get_config();
    let tiers = config.retention_tiers();

    let report = state
        .db
        .sweep_inactive_users(Utc::now(), config.retention.inactive_days, &tiers)?;
    let removed = state.storage.delete_all(&report.file_paths).await;

    if report.is_empty() {
        info!("Retention sweep: nothing to remove");
    } else {
        info!(
            users = report.users,
            tracks = report.tracks,
            transcriptions = report.transcriptions,
            sessions = report.sessions,
            expired_sessions = report.expired_sessions,
            files_removed = removed,
            "Retention sweep completed"
        );
    }
    Ok(report)
}

/// Start the periodic sweep. Returns `None` when retention is disabled.
///
/// The task runs until the handle is aborted at shutdown.
pub fn spawn_retention_task(state: AppState) -> Option<JoinHandle<()>> {
    let config = state.get_config();
    if !config.retention.enabled {
        info!("Retention sweep disabled");
        return None;
    }

    let period = Duration::from_secs(config.retention.sweep_interval_hours * 3600);
    info!(
        inactive_days = config.retention.inactive_days,
        interval_hours = config.retention.sweep_interval_hours,
        tiers = ?config.retention.tiers,
        "Starting retention sweep task"
    );

    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            // first tick completes immediately: the startup pass
            ticker.tick().await;
            if let Err(e) = run_sweep(&state).await {
                error!(error = %e, "Retention sweep failed");
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::NewUser;
    use crate::state::tests::test_state;

    #[actix_web::test]
    async fn test_sweep_removes_files_of_inactive_users() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path());
        let user = state
            .db
            .create_user(NewUser {
                username: "idle".to_string(),
                password: "pw".to_string(),
                ..Default::default()
            })
            .unwrap();

        let rel = state.storage.save_track(&user.id, "old.mp3", b"data").await.unwrap();
        state.db.create_track(&user.id, "old.mp3", &rel, None, false).unwrap();
        state
            .db
            .conn()
            .unwrap()
            .execute("UPDATE user SET lastSeen = 0 WHERE id = ?1", [&user.id])
            .unwrap();

        let report = run_sweep(&state).await.unwrap();
        assert_eq!(report.users, 1);
        assert_eq!(report.tracks, 1);
        assert!(!state.storage.resolve(&rel).unwrap().exists());
        // the account is kept
        assert!(state.db.get_user_by_id(&user.id).unwrap().is_some());

        let again = run_sweep(&state).await.unwrap();
        assert_eq!(again.tracks, 0);
    }

    #[actix_web::test]
    async fn test_disabled_retention_spawns_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path());
        state.config.write().unwrap().retention.enabled = false;
        assert!(spawn_retention_task(state).is_none());
    }
}
