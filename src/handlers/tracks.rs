//! # Track Handlers
//!
//! Upload, list, stream and delete a user's audio tracks.
//!
//! ## Available Endpoints:
//! - `GET /api/tracks` - The caller's tracks, newest first
//! - `POST /api/tracks` - Multipart upload (`file`, optional `title`)
//! - `GET /api/tracks/{id}/audio` - Stream the stored audio, honouring `Range`
//! - `DELETE /api/tracks/{id}` - Delete an owned track and its file
//! - `GET /api/tracks/{id}/transcriptions` - Stored transcriptions of a track

use actix_multipart::{Field, Multipart};
use actix_web::http::header;
use actix_web::{web, HttpRequest, HttpResponse};
use futures_util::stream::StreamExt;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use crate::auth::CurrentUser;
use crate::db::models::Track;
use crate::db::users::clamp_page;
use crate::error::AppError;
use crate::state::AppState;
use crate::storage::{audio_file_name, guess_content_type, ByteRange};

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// A file part pulled out of the upload form.
struct UploadedFile {
    name: String,
    content_type: Option<String>,
    bytes: Vec<u8>,
}

/// Load a track the caller may read: its owner or an administrator.
fn readable_track(state: &AppState, user: &CurrentUser, track_id: &str) -> Result<Track, AppError> {
    match state.db.get_track(track_id)? {
        Some(track) if user.can_access(&track.user_id) => Ok(track),
        _ => Err(AppError::NotFound("Track not found".to_string())),
    }
}

/// Longest accepted `title` field, in bytes.
const TITLE_LIMIT: usize = 4096;

/// Collect a multipart field, failing with `too_large` as soon as `limit`
/// bytes are exceeded.
async fn read_field(field: &mut Field, limit: usize, too_large: &str) -> Result<Vec<u8>, AppError> {
    let mut bytes = Vec::new();
    while let Some(chunk) = field.next().await {
        let chunk = chunk.map_err(|e| AppError::ValidationError(format!("Chunk error: {}", e)))?;
        if bytes.len() + chunk.len() > limit {
            return Err(AppError::PayloadTooLarge(too_large.to_string()));
        }
        bytes.extend_from_slice(&chunk);
    }
    Ok(bytes)
}

/// ## Endpoint: `GET /api/tracks?limit=50&offset=0`
pub async fn list_tracks(
    state: web::Data<AppState>,
    user: CurrentUser,
    query: web::Query<PageQuery>,
) -> Result<HttpResponse, AppError> {
    let (limit, offset) = clamp_page(query.limit, query.offset);
    let tracks = state.db.get_tracks_by_user(&user.user().id, limit, offset)?;
    Ok(HttpResponse::Ok().json(tracks))
}

/// Upload a track.
///
/// ## Endpoint: `POST /api/tracks`
///
/// ## Request:
/// Multipart form data with the audio in a field named `file` and an optional
/// `title`. Video uploads are expected to already contain extracted audio and
/// are stored under an `.mp3` name.
///
/// ## Response (201):
/// ```json
/// {
///   "success": true,
///   "track": { "id": "...", "fileName": "talk.mp3", "wasVideo": true, ... },
///   "timestamp": "2025-01-01T12:00:00Z"
/// }
/// ```
pub async fn upload_track(
    state: web::Data<AppState>,
    user: CurrentUser,
    mut payload: Multipart,
) -> Result<HttpResponse, AppError> {
    let limit = state.get_config().max_upload_bytes();
    let mut file: Option<UploadedFile> = None;
    let mut title: Option<String> = None;

    while let Some(item) = payload.next().await {
        let mut field = item.map_err(|e| AppError::ValidationError(format!("Multipart error: {}", e)))?;

        let (field_name, file_name) = match field.content_disposition() {
            Some(cd) => (
                cd.get_name().unwrap_or_default().to_string(),
                cd.get_filename().map(str::to_string),
            ),
            None => continue,
        };

        match field_name.as_str() {
            "file" => {
                let content_type = field.content_type().map(|m| m.essence_str().to_string());
                let too_large = format!("File too large (max: {} MB)", limit / (1024 * 1024));
                let bytes = read_field(&mut field, limit, &too_large).await?;
                file = Some(UploadedFile {
                    name: file_name.unwrap_or_else(|| "upload".to_string()),
                    content_type,
                    bytes,
                });
            }
            "title" => {
                let too_large = format!("Title too long (max: {} bytes)", TITLE_LIMIT);
                let bytes = read_field(&mut field, TITLE_LIMIT, &too_large).await?;
                title = Some(String::from_utf8_lossy(&bytes).into_owned());
            }
            other => {
                debug!(field = %other, "Ignoring unknown upload field");
                // drain so the stream can advance
                while let Some(chunk) = field.next().await {
                    chunk.map_err(|e| AppError::ValidationError(format!("Chunk error: {}", e)))?;
                }
            }
        }
    }

    let file = match file {
        Some(f) if !f.bytes.is_empty() => f,
        _ => return Err(AppError::BadRequest("File missing".to_string())),
    };

    let user_id = &user.user().id;
    let is_video = file
        .content_type
        .as_deref()
        .is_some_and(|ct| ct.starts_with("video/"));
    let final_name = audio_file_name(&file.name, is_video);

    let rel_path = state.storage.save_track(user_id, &final_name, &file.bytes).await?;
    let track = match state
        .db
        .create_track(user_id, &final_name, &rel_path, title.as_deref(), is_video)
    {
        Ok(track) => track,
        Err(e) => {
            // don't leave an orphaned file behind
            state.storage.delete(&rel_path).await.ok();
            return Err(e);
        }
    };

    info!(
        track_id = %track.id,
        user_id = %user_id,
        size = file.bytes.len(),
        was_video = is_video,
        "Track uploaded"
    );

    Ok(HttpResponse::Created().json(json!({
        "success": true,
        "track": track,
        "timestamp": chrono::Utc::now().to_rfc3339()
    })))
}

/// Stream a stored track.
///
/// ## Endpoint: `GET /api/tracks/{id}/audio`
///
/// Without a `Range` header the whole file is returned with 200. With a single
/// satisfiable range the slice is returned with 206 and `Content-Range`.
/// Ranges past the end of the file get 416 with `Content-Range: bytes */len`.
pub async fn stream_audio(
    req: HttpRequest,
    state: web::Data<AppState>,
    user: CurrentUser,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let track = readable_track(&state, &user, &path.into_inner())?;
    let total = state.storage.len(&track.file_path).await?;
    let content_type = guess_content_type(&track.file_name);

    let range = match req.headers().get(header::RANGE).and_then(|v| v.to_str().ok()) {
        Some(value) => ByteRange::parse(value, total)?,
        None => None,
    };

    match range {
        Some(range) => {
            let bytes = state.storage.read_range(&track.file_path, range).await?;
            Ok(HttpResponse::PartialContent()
                .insert_header((header::CONTENT_TYPE, content_type))
                .insert_header((header::ACCEPT_RANGES, "bytes"))
                .insert_header((header::CONTENT_RANGE, range.content_range(total)))
                .body(bytes))
        }
        None => {
            let bytes = state.storage.read(&track.file_path).await?;
            Ok(HttpResponse::Ok()
                .insert_header((header::CONTENT_TYPE, content_type))
                .insert_header((header::ACCEPT_RANGES, "bytes"))
                .body(bytes))
        }
    }
}

/// ## Endpoint: `DELETE /api/tracks/{id}`
///
/// Only the owner may delete a track. Anything else is reported as 404 so the
/// existence of other users' tracks isn't revealed.
pub async fn delete_track(
    state: web::Data<AppState>,
    user: CurrentUser,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let track_id = path.into_inner();
    let track = state
        .db
        .delete_track(&track_id, &user.user().id)?
        .ok_or_else(|| AppError::NotFound("Not found or not allowed".to_string()))?;

    state.storage.delete(&track.file_path).await?;
    info!(track_id = %track_id, user_id = %user.user().id, "Track deleted");

    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "trackId": track_id,
        "timestamp": chrono::Utc::now().to_rfc3339()
    })))
}

/// ## Endpoint: `GET /api/tracks/{id}/transcriptions`
pub async fn list_transcriptions(
    state: web::Data<AppState>,
    user: CurrentUser,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let track = readable_track(&state, &user, &path.into_inner())?;
    let transcriptions = state.db.get_transcriptions(&track.id)?;
    Ok(HttpResponse::Ok().json(transcriptions))
}
