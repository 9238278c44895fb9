//! Route table.
//!
//! | method & path | handler |
//! |---|---|
//! | `POST /api/auth/login` | [`auth::login`] |
//! | `POST /api/auth/logout` | [`auth::logout`] |
//! | `GET /api/auth/me` | [`auth::me`] |
//! | `GET, POST /api/users` | [`users::list_users`], [`users::create_user`] |
//! | `GET, PUT, DELETE /api/users/{id}` | [`users::get_user`], [`users::update_user`], [`users::delete_user`] |
//! | `GET, POST /api/tracks` | [`tracks::list_tracks`], [`tracks::upload_track`] |
//! | `DELETE /api/tracks/{id}` | [`tracks::delete_track`] |
//! | `GET /api/tracks/{id}/audio` | [`tracks::stream_audio`] |
//! | `GET /api/tracks/{id}/transcriptions` | [`tracks::list_transcriptions`] |
//! | `POST /api/transcribe` | [`transcribe::transcribe`] |
//! | `GET /health`, `GET /api/health` | [`health::health_check`] |
//! | `GET /api/metrics` | [`health::detailed_metrics`] |

use actix_web::{error::JsonPayloadError, web, HttpRequest};

use crate::config::AppConfig;
use crate::error::AppError;
use crate::handlers::{auth, tracks, transcribe, users};
use crate::health;

/// Plain JSON bodies (login, user edits).
const JSON_LIMIT: usize = 256 * 1024;

/// Malformed JSON bodies get the same error shape as every other failure.
fn json_error(err: JsonPayloadError, _req: &HttpRequest) -> actix_web::Error {
    match err {
        JsonPayloadError::Overflow { .. } | JsonPayloadError::OverflowKnownLength { .. } => {
            AppError::PayloadTooLarge("Request body too large".to_string()).into()
        }
        other => AppError::BadRequest(format!("Invalid JSON body: {}", other)).into(),
    }
}

/// Register every route. Body limits come from `config`.
pub fn configure(config: &AppConfig) -> impl FnOnce(&mut web::ServiceConfig) {
    // Inline audio arrives as a JSON number array: up to four bytes of text per byte.
    let transcribe_limit = config.max_upload_bytes().saturating_mul(4);

    move |cfg: &mut web::ServiceConfig| {
        cfg.app_data(web::JsonConfig::default().limit(JSON_LIMIT).error_handler(json_error))
            .route("/health", web::get().to(health::health_check))
            .service(
                web::scope("/api")
                    .route("/health", web::get().to(health::health_check))
                    .route("/metrics", web::get().to(health::detailed_metrics))
                    .service(
                        web::scope("/auth")
                            .route("/login", web::post().to(auth::login))
                            .route("/logout", web::post().to(auth::logout))
                            .route("/me", web::get().to(auth::me)),
                    )
                    .service(
                        web::resource("/users")
                            .route(web::get().to(users::list_users))
                            .route(web::post().to(users::create_user)),
                    )
                    .service(
                        web::resource("/users/{id}")
                            .route(web::get().to(users::get_user))
                            .route(web::put().to(users::update_user))
                            .route(web::delete().to(users::delete_user)),
                    )
                    .service(
                        web::resource("/tracks")
                            .route(web::get().to(tracks::list_tracks))
                            .route(web::post().to(tracks::upload_track)),
                    )
                    .route("/tracks/{id}", web::delete().to(tracks::delete_track))
                    .route("/tracks/{id}/audio", web::get().to(tracks::stream_audio))
                    .route("/tracks/{id}/transcriptions", web::get().to(tracks::list_transcriptions))
                    .service(
                        web::resource("/transcribe")
                            .app_data(
                                web::JsonConfig::default()
                                    .limit(transcribe_limit)
                                    .error_handler(json_error),
                            )
                            .route(web::post().to(transcribe::transcribe)),
                    ),
            );
    }
}
