//! # Transcription Handler
//!
//! ## Endpoint: `POST /api/transcribe?withTimestamps=true`
//!
//! The client either sends the audio inline (`audioData`, bytes as a JSON number
//! array) or just a `trackId`, in which case the stored file is used. When the
//! track exists and belongs to the caller, the result is saved alongside it.

use actix_web::{web, HttpResponse};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use crate::auth::CurrentUser;
use crate::error::AppError;
use crate::state::AppState;
use crate::storage::guess_content_type;
use crate::transcription::{AudioPayload, TranscribeOptions};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscribeQuery {
    #[serde(default)]
    pub with_timestamps: bool,
}

/// Inline audio as sent by the browser.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioData {
    pub name: String,
    #[serde(rename = "type", default)]
    pub content_type: String,
    pub array_buffer: Vec<u8>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscribeRequest {
    pub track_id: String,
    pub audio_data: Option<AudioData>,
}

/// Transcribe a track.
///
/// ## Response:
/// ```json
/// {
///   "success": true,
///   "content": "Hello there.",
///   "trackId": "...",
///   "timestamp": "2025-01-01T12:00:00Z"
/// }
/// ```
/// With `withTimestamps=true`, `content` is the provider's full response
/// including `segments`.
pub async fn transcribe(
    state: web::Data<AppState>,
    user: CurrentUser,
    query: web::Query<TranscribeQuery>,
    body: web::Json<TranscribeRequest>,
) -> Result<HttpResponse, AppError> {
    let TranscribeRequest { track_id, audio_data } = body.into_inner();
    if track_id.trim().is_empty() {
        return Err(AppError::ValidationError("trackId is required".to_string()));
    }
    let options = TranscribeOptions {
        with_timestamps: query.with_timestamps,
    };

    let track = state.db.get_track(&track_id)?;
    let owned = track.as_ref().is_some_and(|t| t.user_id == user.user().id);

    let audio = match (audio_data, &track) {
        (Some(data), _) => AudioPayload {
            file_name: data.name,
            content_type: data.content_type,
            bytes: data.array_buffer,
        },
        (None, Some(track)) if user.can_access(&track.user_id) => AudioPayload {
            file_name: track.file_name.clone(),
            content_type: guess_content_type(&track.file_name).to_string(),
            bytes: state.storage.read(&track.file_path).await?,
        },
        (None, _) => return Err(AppError::NotFound("Track not found".to_string())),
    };

    let transcript = state.engine.transcribe(audio, options).await?;

    let content = if options.with_timestamps {
        transcript.raw
    } else {
        serde_json::Value::String(transcript.text)
    };

    match track.filter(|_| owned) {
        Some(track) => {
            let stored = match &content {
                serde_json::Value::String(text) => text.clone(),
                other => other.to_string(),
            };
            state.db.create_transcription(&track.id, &stored, options.with_timestamps)?;
            info!(track_id = %track.id, user_id = %user.user().id, "Transcription stored");
        }
        None => warn!(track_id = %track_id, "Transcription not stored: track missing or not owned"),
    }

    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "content": content,
        "trackId": track_id,
        "timestamp": chrono::Utc::now().to_rfc3339()
    })))
}
