//! Track and transcription data access.

use rusqlite::{params, OptionalExtension, Row};
use uuid::Uuid;

use super::models::{from_unix, Track, TrackListing, Transcription};
use super::{now_secs, Database};
use crate::error::{AppError, AppResult};

const TRACK_COLUMNS: &str = "id, userId, filePath, fileName, title, wasVideo, createdAt";

fn track_from_row(row: &Row<'_>) -> rusqlite::Result<Track> {
    Ok(Track {
        id: row.get(0)?,
        user_id: row.get(1)?,
        file_path: row.get(2)?,
        file_name: row.get(3)?,
        title: row.get(4)?,
        was_video: row.get(5)?,
        created_at: from_unix(row.get(6)?),
    })
}

fn transcription_from_row(row: &Row<'_>) -> rusqlite::Result<Transcription> {
    Ok(Transcription {
        id: row.get(0)?,
        track_id: row.get(1)?,
        content: row.get(2)?,
        with_timestamps: row.get(3)?,
        created_at: from_unix(row.get(4)?),
    })
}

impl Database {
    pub fn create_track(
        &self,
        user_id: &str,
        file_name: &str,
        file_path: &str,
        title: Option<&str>,
        was_video: bool,
    ) -> AppResult<Track> {
        let id = Uuid::new_v4().to_string();
        let title = title.map(str::trim).filter(|t| !t.is_empty());
        self.conn()?.execute(
            "INSERT INTO track (id, userId, filePath, fileName, title, wasVideo, createdAt) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![id, user_id, file_path, file_name, title, was_video, now_secs()],
        )?;

        self.get_track(&id)?
            .ok_or_else(|| AppError::Internal("Created track could not be read back".to_string()))
    }

    pub fn get_track(&self, id: &str) -> AppResult<Option<Track>> {
        let track = self
            .conn()?
            .query_row(
                &format!("SELECT {TRACK_COLUMNS} FROM track WHERE id = ?1"),
                [id],
                track_from_row,
            )
            .optional()?;
        Ok(track)
    }

    /// A user's tracks, newest first.
    pub fn get_tracks_by_user(&self, user_id: &str, limit: i64, offset: i64) -> AppResult<Vec<TrackListing>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {TRACK_COLUMNS}, \
                EXISTS(SELECT 1 FROM transcription tr WHERE tr.trackId = track.id) \
             FROM track WHERE userId = ?1 \
             ORDER BY createdAt DESC, rowid DESC LIMIT ?2 OFFSET ?3"
        ))?;
        let rows = stmt.query_map(params![user_id, limit, offset], |row| {
            Ok(TrackListing {
                track: track_from_row(row)?,
                has_transcription: row.get(7)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Delete a track the user owns, along with its transcriptions.
    ///
    /// Returns the removed track so the caller can delete the stored file, or
    /// `None` when the track doesn't exist or belongs to someone else.
    pub fn delete_track(&self, track_id: &str, user_id: &str) -> AppResult<Option<Track>> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let track = tx
            .query_row(
                &format!("SELECT {TRACK_COLUMNS} FROM track WHERE id = ?1 AND userId = ?2"),
                [track_id, user_id],
                track_from_row,
            )
            .optional()?;

        if track.is_some() {
            tx.execute("DELETE FROM transcription WHERE trackId = ?1", [track_id])?;
            tx.execute("DELETE FROM track WHERE id = ?1", [track_id])?;
        }
        tx.commit()?;

        Ok(track)
    }

    pub fn create_transcription(&self, track_id: &str, content: &str, with_timestamps: bool) -> AppResult<Transcription> {
        let transcription = Transcription {
            id: Uuid::new_v4().to_string(),
            track_id: track_id.to_string(),
            content: content.to_string(),
            with_timestamps,
            created_at: from_unix(now_secs()),
        };
        self.conn()?.execute(
            "INSERT INTO transcription (id, trackId, content, withTimestamps, createdAt) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                transcription.id,
                transcription.track_id,
                transcription.content,
                transcription.with_timestamps,
                transcription.created_at.timestamp(),
            ],
        )?;
        Ok(transcription)
    }

    /// Transcriptions of a track, newest first.
    pub fn get_transcriptions(&self, track_id: &str) -> AppResult<Vec<Transcription>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, trackId, content, withTimestamps, createdAt FROM transcription \
             WHERE trackId = ?1 ORDER BY createdAt DESC, rowid DESC",
        )?;
        let rows = stmt.query_map([track_id], transcription_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::NewUser;

    fn setup() -> (Database, String, String) {
        let db = Database::open_in_memory().unwrap();
        let mut ids = Vec::new();
        for name in ["alice", "bob"] {
            let user = db
                .create_user(NewUser {
                    username: name.to_string(),
                    password: "pw".to_string(),
                    ..Default::default()
                })
                .unwrap();
            ids.push(user.id);
        }
        let bob = ids.pop().unwrap();
        let alice = ids.pop().unwrap();
        (db, alice, bob)
    }

    #[test]
    fn test_track_listing_is_per_user_and_newest_first() {
        let (db, alice, bob) = setup();
        let first = db.create_track(&alice, "one.mp3", "tracks/a/one.mp3", Some("One"), false).unwrap();
        let second = db.create_track(&alice, "two.mp3", "tracks/a/two.mp3", None, true).unwrap();
        db.create_track(&bob, "bob.mp3", "tracks/b/bob.mp3", None, false).unwrap();

        let listing = db.get_tracks_by_user(&alice, 50, 0).unwrap();
        assert_eq!(listing.len(), 2);
        assert_eq!(listing[0].track.id, second.id);
        assert_eq!(listing[1].track.id, first.id);
        assert!(listing[0].track.was_video);
        assert_eq!(listing[1].track.title.as_deref(), Some("One"));

        assert_eq!(db.get_tracks_by_user(&alice, 1, 1).unwrap()[0].track.id, first.id);
    }

    #[test]
    fn test_has_transcription_flag() {
        let (db, alice, _) = setup();
        let track = db.create_track(&alice, "a.mp3", "p", None, false).unwrap();
        assert!(!db.get_tracks_by_user(&alice, 50, 0).unwrap()[0].has_transcription);

        db.create_transcription(&track.id, "hello world", false).unwrap();
        assert!(db.get_tracks_by_user(&alice, 50, 0).unwrap()[0].has_transcription);
    }

    #[test]
    fn test_delete_track_checks_owner() {
        let (db, alice, bob) = setup();
        let track = db.create_track(&alice, "a.mp3", "p", None, false).unwrap();
        db.create_transcription(&track.id, "text", true).unwrap();

        assert!(db.delete_track(&track.id, &bob).unwrap().is_none());
        assert!(db.get_track(&track.id).unwrap().is_some());

        let removed = db.delete_track(&track.id, &alice).unwrap().unwrap();
        assert_eq!(removed.file_path, "p");
        assert!(db.get_track(&track.id).unwrap().is_none());
        assert!(db.get_transcriptions(&track.id).unwrap().is_empty());
    }

    #[test]
    fn test_transcriptions_newest_first() {
        let (db, alice, _) = setup();
        let track = db.create_track(&alice, "a.mp3", "p", None, false).unwrap();
        db.create_transcription(&track.id, "first", false).unwrap();
        db.create_transcription(&track.id, "second", true).unwrap();

        let all = db.get_transcriptions(&track.id).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].content, "second");
        assert!(all[0].with_timestamps);
    }
}
