//! # User Management Handlers
//!
//! ## Available Endpoints:
//! - `GET /api/users` - List users (admin)
//! - `POST /api/users` - Create a user (admin)
//! - `GET /api/users/{id}` - View a profile (self or admin)
//! - `PUT /api/users/{id}` - Update a profile (self or admin)
//! - `DELETE /api/users/{id}` - Delete a user and their files (admin)

use actix_web::{web, HttpResponse};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use crate::auth::{require_role, CurrentUser};
use crate::db::models::{NewUser, Role, UserUpdate};
use crate::db::users::clamp_page;
use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ListUsersQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub search: Option<String>,
}

/// ## Endpoint: `GET /api/users?limit=50&offset=0&search=ali`
///
/// `search` matches username, email or name.
pub async fn list_users(
    state: web::Data<AppState>,
    user: CurrentUser,
    query: web::Query<ListUsersQuery>,
) -> Result<HttpResponse, AppError> {
    require_role(&user, Role::Admin)?;

    let (limit, offset) = clamp_page(query.limit, query.offset);
    let search = query.search.as_deref().map(str::trim).filter(|s| !s.is_empty());
    let users = state.db.list_users(limit, offset, search)?;
    Ok(HttpResponse::Ok().json(users))
}

/// ## Endpoint: `POST /api/users`
///
/// Responds 201 with the created user; 409 when the username or email is taken.
pub async fn create_user(
    state: web::Data<AppState>,
    user: CurrentUser,
    body: web::Json<NewUser>,
) -> Result<HttpResponse, AppError> {
    require_role(&user, Role::Admin)?;

    let new_user = body.into_inner();
    if new_user.username.trim().is_empty() || new_user.password.is_empty() {
        return Err(AppError::BadRequest("Username and password are required".to_string()));
    }

    let db = state.db.clone();
    let created = web::block(move || db.create_user(new_user)).await??;
    info!(user_id = %created.id, username = %created.username, by = %user.user().id, "User created");
    Ok(HttpResponse::Created().json(created))
}

/// ## Endpoint: `GET /api/users/{id}`
pub async fn get_user(
    state: web::Data<AppState>,
    user: CurrentUser,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let id = path.into_inner();
    if !user.can_access(&id) {
        return Err(AppError::Forbidden("You can only view your own profile".to_string()));
    }

    let found = state
        .db
        .get_user_by_id(&id)?
        .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;
    Ok(HttpResponse::Ok().json(found))
}

/// ## Endpoint: `PUT /api/users/{id}`
///
/// Partial update with camelCase keys. Only administrators may change
/// `role`, `isActive` or `subscriber`.
pub async fn update_user(
    state: web::Data<AppState>,
    user: CurrentUser,
    path: web::Path<String>,
    body: web::Json<UserUpdate>,
) -> Result<HttpResponse, AppError> {
    let id = path.into_inner();
    if !user.can_access(&id) {
        return Err(AppError::Forbidden("You can only update your own profile".to_string()));
    }

    let update = body.into_inner();
    if !user.user().is_admin() {
        if update.role.is_some() {
            return Err(AppError::Forbidden("You cannot change your role".to_string()));
        }
        if update.is_active.is_some() {
            return Err(AppError::Forbidden("You cannot change your active status".to_string()));
        }
        if update.subscriber.is_some() {
            return Err(AppError::Forbidden("You cannot change your subscription".to_string()));
        }
    }

    if let Some(username) = update.username.as_deref() {
        if !state.db.is_username_available(username.trim(), Some(&id))? {
            return Err(AppError::Conflict("Username or email already exists".to_string()));
        }
    }
    if let Some(email) = update.email.as_deref() {
        if !state.db.is_email_available(email.trim(), Some(&id))? {
            return Err(AppError::Conflict("Username or email already exists".to_string()));
        }
    }

    let deactivated = update.is_active == Some(false);
    let db = state.db.clone();
    let target = id.clone();
    let updated = web::block(move || db.update_user(&target, update))
        .await??
        .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;

    if deactivated {
        let ended = state.sessions.invalidate_user_sessions(&id)?;
        info!(user_id = %id, sessions = ended, "User deactivated");
    }

    Ok(HttpResponse::Ok().json(updated))
}

/// ## Endpoint: `DELETE /api/users/{id}`
///
/// Removes the account, its sessions, tracks and transcriptions, then the
/// stored audio files.
pub async fn delete_user(
    state: web::Data<AppState>,
    user: CurrentUser,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    require_role(&user, Role::Admin)?;

    let id = path.into_inner();
    let file_paths = state
        .db
        .delete_user(&id)?
        .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;

    let removed = state.storage.delete_all(&file_paths).await;
    info!(user_id = %id, files = removed, by = %user.user().id, "User deleted");

    Ok(HttpResponse::Ok().json(json!({ "success": true })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::User;
    use crate::handlers::tests::{login_cookie, test_app};
    use crate::state::tests::test_state;
    use actix_web::{http::StatusCode, test};

    fn seed_user(state: &AppState, username: &str, role: Role) -> User {
        state
            .db
            .create_user(NewUser {
                username: username.to_string(),
                email: Some(format!("{}@example.com", username)),
                password: "pw".to_string(),
                role: Some(role),
                ..Default::default()
            })
            .unwrap()
    }

    #[actix_web::test]
    async fn test_admin_only_listing_and_creation() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path());
        seed_user(&state, "root", Role::Admin);
        seed_user(&state, "bob", Role::User);
        let app = test_app!(state);

        let admin = login_cookie!(&app, "root", "pw");
        let bob = login_cookie!(&app, "bob", "pw");

        let req = test::TestRequest::get().uri("/api/users").cookie(bob.clone()).to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::FORBIDDEN);

        let req = test::TestRequest::get().uri("/api/users?search=bo").cookie(admin.clone()).to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body.as_array().unwrap().len(), 1);
        assert_eq!(body[0]["username"], "bob");

        let req = test::TestRequest::post()
            .uri("/api/users")
            .cookie(admin.clone())
            .set_json(json!({"username": "carol", "password": "pw", "email": "carol@example.com"}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CREATED);

        let req = test::TestRequest::post()
            .uri("/api/users")
            .cookie(admin.clone())
            .set_json(json!({"username": "carol", "password": "pw"}))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::CONFLICT);

        let req = test::TestRequest::post()
            .uri("/api/users")
            .cookie(admin)
            .set_json(json!({"username": "dave"}))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);

        let req = test::TestRequest::get().uri("/api/users").to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::UNAUTHORIZED);
    }

    #[actix_web::test]
    async fn test_profile_permissions() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path());
        let bob = seed_user(&state, "bob", Role::User);
        let eve = seed_user(&state, "eve", Role::User);
        let app = test_app!(state);
        let cookie = login_cookie!(&app, "bob", "pw");

        let req = test::TestRequest::get()
            .uri(&format!("/api/users/{}", bob.id))
            .cookie(cookie.clone())
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);

        let req = test::TestRequest::get()
            .uri(&format!("/api/users/{}", eve.id))
            .cookie(cookie.clone())
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["error"]["message"], "You can only view your own profile");

        let req = test::TestRequest::put()
            .uri(&format!("/api/users/{}", bob.id))
            .cookie(cookie.clone())
            .set_json(json!({"role": "admin"}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["error"]["message"], "You cannot change your role");

        let req = test::TestRequest::put()
            .uri(&format!("/api/users/{}", bob.id))
            .cookie(cookie.clone())
            .set_json(json!({"isActive": false}))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::FORBIDDEN);

        let req = test::TestRequest::put()
            .uri(&format!("/api/users/{}", bob.id))
            .cookie(cookie.clone())
            .set_json(json!({"email": "eve@example.com"}))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::CONFLICT);

        let req = test::TestRequest::put()
            .uri(&format!("/api/users/{}", bob.id))
            .cookie(cookie)
            .set_json(json!({"name": "Bob B", "bio": "hello"}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["name"], "Bob B");
        assert_eq!(body["bio"], "hello");
    }

    #[actix_web::test]
    async fn test_password_change_then_login() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path());
        let bob = seed_user(&state, "bob", Role::User);
        let app = test_app!(state);
        let cookie = login_cookie!(&app, "bob", "pw");

        let req = test::TestRequest::put()
            .uri(&format!("/api/users/{}", bob.id))
            .cookie(cookie)
            .set_json(json!({"password": "new-secret"}))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);

        let req = test::TestRequest::post()
            .uri("/api/auth/login")
            .set_json(json!({"username": "bob", "password": "pw"}))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::UNAUTHORIZED);

        let fresh = login_cookie!(&app, "bob", "new-secret");
        assert!(!fresh.value().is_empty());
    }

    #[actix_web::test]
    async fn test_admin_deactivation_ends_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path());
        seed_user(&state, "root", Role::Admin);
        let bob = seed_user(&state, "bob", Role::User);
        let app = test_app!(state);

        let admin = login_cookie!(&app, "root", "pw");
        let bob_cookie = login_cookie!(&app, "bob", "pw");

        let req = test::TestRequest::put()
            .uri(&format!("/api/users/{}", bob.id))
            .cookie(admin)
            .set_json(json!({"isActive": false}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["isActive"], false);

        let req = test::TestRequest::get().uri("/api/auth/me").cookie(bob_cookie).to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::UNAUTHORIZED);
    }

    #[actix_web::test]
    async fn test_delete_user_removes_files() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path());
        seed_user(&state, "root", Role::Admin);
        let bob = seed_user(&state, "bob", Role::User);

        let rel = state.storage.save_track(&bob.id, "a.mp3", b"abc").await.unwrap();
        state.db.create_track(&bob.id, "a.mp3", &rel, None, false).unwrap();
        let abs = state.storage.resolve(&rel).unwrap();
        assert!(abs.exists());

        let app = test_app!(state.clone());
        let admin = login_cookie!(&app, "root", "pw");

        let req = test::TestRequest::delete()
            .uri(&format!("/api/users/{}", bob.id))
            .cookie(admin.clone())
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["success"], true);
        assert!(!abs.exists());
        assert!(state.db.get_user_by_id(&bob.id).unwrap().is_none());

        let req = test::TestRequest::delete()
            .uri(&format!("/api/users/{}", bob.id))
            .cookie(admin)
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);
    }
}
