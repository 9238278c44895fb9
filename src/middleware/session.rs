use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    web, Error, HttpMessage,
};
use futures_util::future::LocalBoxFuture;
use std::future::{ready, Ready};
use tracing::{debug, warn};

use crate::auth::{AuthContext, SessionValidation};
use crate::state::AppState;

/// Resolves the session cookie before any handler runs.
///
/// - valid cookie: `AuthContext` goes into request extensions
/// - refreshed session: the cookie is re-sent with the new expiry
/// - unknown or expired cookie: the cookie is cleared
///
/// A handler that sets the session cookie itself (login, logout) wins; the
/// middleware leaves such responses alone.
pub struct SessionMiddleware;

impl<S, B> Transform<S, ServiceRequest> for SessionMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = SessionMiddlewareService<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(SessionMiddlewareService { service }))
    }
}

pub struct SessionMiddlewareService<S> {
    service: S,
}

enum CookieAction {
    None,
    Refresh(String, SessionValidation),
    Clear,
}

impl<S, B> Service<ServiceRequest> for SessionMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let Some(state) = req.app_data::<web::Data<AppState>>().cloned() else {
            return Box::pin(self.service.call(req));
        };
        let cookie_name = state.sessions.cookie_name().to_string();

        let action = match req.cookie(&cookie_name) {
            None => CookieAction::None,
            Some(cookie) => {
                let token = cookie.value().to_string();
                match state.sessions.validate_session_token(&token) {
                    Ok(Some(validation)) => {
                        req.extensions_mut().insert(AuthContext {
                            user: validation.user.clone(),
                            session: validation.session.clone(),
                        });
                        if validation.refreshed {
                            debug!(user_id = %validation.user.id, "Session refreshed");
                            CookieAction::Refresh(token, validation)
                        } else {
                            CookieAction::None
                        }
                    }
                    Ok(None) => CookieAction::Clear,
                    Err(e) => {
                        // anonymous for this request, cookie left in place
                        warn!(error = %e, "Session validation failed");
                        CookieAction::None
                    }
                }
            }
        };

        let fut = self.service.call(req);

        Box::pin(async move {
            let mut response = fut.await?;

            let handler_set_cookie = response.response().cookies().any(|c| c.name() == cookie_name);
            if handler_set_cookie {
                return Ok(response);
            }

            let cookie = match action {
                CookieAction::None => return Ok(response),
                CookieAction::Refresh(token, validation) => {
                    state.sessions.session_cookie(&token, validation.session.expires_at)
                }
                CookieAction::Clear => state.sessions.removal_cookie(),
            };
            if let Err(e) = response.response_mut().add_cookie(&cookie) {
                warn!(error = %e, "Failed to set session cookie");
            }

            Ok(response)
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::auth::session_id_from_token;
    use crate::db::models::NewUser;
    use crate::handlers::tests::{login_cookie, test_app};
    use crate::state::tests::test_state;
    use actix_web::cookie::{time::Duration as CookieDuration, Cookie};
    use actix_web::{http::StatusCode, test};
    use chrono::{Duration, Utc};

    #[actix_web::test]
    async fn test_session_cookie_refresh_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path());
        state
            .db
            .create_user(NewUser {
                username: "bob".to_string(),
                password: "pw".to_string(),
                ..Default::default()
            })
            .unwrap();
        let app = test_app!(state.clone());
        let cookie = login_cookie!(&app, "bob", "pw");

        // fresh session: nothing re-sent
        let req = test::TestRequest::get().uri("/api/auth/me").cookie(cookie.clone()).to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(resp.response().cookies().next().is_none());

        // inside the refresh window: expiry extended and cookie re-issued
        let session_id = session_id_from_token(cookie.value());
        state
            .db
            .update_session_expiry(&session_id, Utc::now() + Duration::hours(1))
            .unwrap();
        let req = test::TestRequest::get().uri("/api/auth/me").cookie(cookie.clone()).to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let reissued = resp
            .response()
            .cookies()
            .find(|c| c.name() == "auth-session")
            .unwrap()
            .into_owned();
        assert_eq!(reissued.value(), cookie.value());
        let expires = reissued.expires_datetime().unwrap().unix_timestamp();
        assert!(expires > (Utc::now() + Duration::days(29)).timestamp());
        let stored = state.db.get_session(&session_id).unwrap().unwrap();
        assert_eq!(stored.expires_at.timestamp(), expires);

        // unknown token: 401 and the cookie is cleared
        let req = test::TestRequest::get()
            .uri("/api/auth/me")
            .cookie(Cookie::new("auth-session", "bogus"))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        let cleared = resp
            .response()
            .cookies()
            .find(|c| c.name() == "auth-session")
            .unwrap()
            .into_owned();
        assert_eq!(cleared.value(), "");
        assert_eq!(cleared.max_age(), Some(CookieDuration::ZERO));
    }
}
