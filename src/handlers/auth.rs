//! # Authentication Handlers
//!
//! ## Available Endpoints:
//! - `POST /api/auth/login` - Check credentials, start a session, set the cookie
//! - `POST /api/auth/logout` - End the current session and clear the cookie
//! - `GET /api/auth/me` - The signed-in user

use actix_web::{web, HttpResponse};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use crate::auth::{generate_session_token, CurrentUser, MaybeUser};
use crate::db::models::UserSummary;
use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

/// Log in with username and password.
///
/// ## Endpoint: `POST /api/auth/login`
///
/// ## Response:
/// ```json
/// {
///   "message": "Login successful",
///   "user": { "id": "...", "username": "alice", "email": null, "name": null, "role": "user" }
/// }
/// ```
pub async fn login(
    state: web::Data<AppState>,
    body: web::Json<LoginRequest>,
) -> Result<HttpResponse, AppError> {
    let LoginRequest { username, password } = body.into_inner();
    if username.trim().is_empty() || password.is_empty() {
        return Err(AppError::BadRequest("Username and password are required".to_string()));
    }

    // Argon2 verification runs on the blocking pool
    let db = state.db.clone();
    let name = username.trim().to_string();
    let Some(user) = web::block(move || db.validate_user_credentials(&name, &password)).await?? else {
        warn!(username = %username.trim(), "Failed login attempt");
        return Err(AppError::Unauthorized("Invalid username or password".to_string()));
    };

    let token = generate_session_token();
    let session = state.sessions.create_session(&token, &user.id)?;
    info!(user_id = %user.id, username = %user.username, "User logged in");

    Ok(HttpResponse::Ok()
        .cookie(state.sessions.session_cookie(&token, session.expires_at))
        .json(json!({
            "message": "Login successful",
            "user": UserSummary::from(&user)
        })))
}

/// ## Endpoint: `POST /api/auth/logout`
///
/// Always succeeds; without a valid session there is nothing to invalidate.
pub async fn logout(state: web::Data<AppState>, user: MaybeUser) -> Result<HttpResponse, AppError> {
    if let Some(ctx) = user.0 {
        state.sessions.invalidate_session(&ctx.session.id)?;
        info!(user_id = %ctx.user.id, "User logged out");
    }

    Ok(HttpResponse::Ok()
        .cookie(state.sessions.removal_cookie())
        .json(json!({ "message": "Logout successful" })))
}

/// ## Endpoint: `GET /api/auth/me`
pub async fn me(user: CurrentUser) -> HttpResponse {
    HttpResponse::Ok().json(user.user())
}
