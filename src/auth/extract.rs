//! Request extractors for the user resolved by `SessionMiddleware`.

use actix_web::{dev::Payload, FromRequest, HttpMessage, HttpRequest};
use std::future::{ready, Ready};

use crate::db::models::{Role, Session, User};
use crate::error::AppError;

/// Stored in request extensions when the session cookie is valid.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub user: User,
    pub session: Session,
}

/// The signed-in user. Rejects the request with 401 when there is none.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub AuthContext);

/// The signed-in user, if any.
#[derive(Debug, Clone)]
pub struct MaybeUser(pub Option<AuthContext>);

impl CurrentUser {
    pub fn user(&self) -> &User {
        &self.0.user
    }

    /// Admins may act on anyone; everyone else only on themselves.
    pub fn can_access(&self, user_id: &str) -> bool {
        self.0.user.is_admin() || self.0.user.id == user_id
    }
}

impl FromRequest for CurrentUser {
    type Error = AppError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let ctx = req.extensions().get::<AuthContext>().cloned();
        ready(ctx.map(CurrentUser).ok_or_else(|| {
            AppError::Unauthorized("Authentication required".to_string())
        }))
    }
}

impl FromRequest for MaybeUser {
    type Error = AppError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        ready(Ok(MaybeUser(req.extensions().get::<AuthContext>().cloned())))
    }
}

/// 403 unless the user holds `role`. Administrators satisfy every role.
pub fn require_role(user: &CurrentUser, role: Role) -> Result<(), AppError> {
    if user.user().role == role || user.user().is_admin() {
        return Ok(());
    }
    let message = match role {
        Role::Admin => "Admin access required",
        Role::User => "User access required",
    };
    Err(AppError::Forbidden(message.to_string()))
}
