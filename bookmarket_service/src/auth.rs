//! Request extractors resolving the session cookie to a logged in user.

use std::future::{ready, Ready};

use actix_web::dev::Payload;
use actix_web::http::StatusCode;
use actix_web::web::Data;
use actix_web::{FromRequest, HttpRequest, HttpResponse, ResponseError};
use paperclip::actix::OperationModifier;
use paperclip::v2::schema::Apiv2Schema;

use crate::api::{Flash, FlashCategory, UserId, SESSION_COOKIE};
use crate::sessions::SessionStore;

/// Rejection for routes that need a logged in user
#[derive(Debug, thiserror::Error)]
#[error("Login required")]
pub struct LoginRequired;

impl ResponseError for LoginRequired {
    fn status_code(&self) -> StatusCode {
        StatusCode::UNAUTHORIZED
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::Unauthorized().json(Flash::new(
            FlashCategory::Warning,
            "Please log in to access this page.",
            "/login",
        ))
    }
}

fn session_user(req: &HttpRequest) -> Option<(UserId, String)> {
    let token = req.cookie(SESSION_COOKIE)?.value().to_string();
    let sessions = req.app_data::<Data<SessionStore>>()?;
    let user_id = sessions.user(&token)?;
    Some((user_id, token))
}

#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub user_id: UserId,
    pub session_token: String,
}

impl FromRequest for AuthenticatedUser {
    type Error = LoginRequired;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        ready(
            session_user(req)
                .map(|(user_id, session_token)| AuthenticatedUser {
                    user_id,
                    session_token,
                })
                .ok_or(LoginRequired),
        )
    }
}

impl Apiv2Schema for AuthenticatedUser {}
impl OperationModifier for AuthenticatedUser {}

/// Logged in user if there is one, never rejects the request
#[derive(Debug, Clone, Copy)]
pub struct OptionalUser(pub Option<UserId>);

impl FromRequest for OptionalUser {
    type Error = actix_web::Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        ready(Ok(OptionalUser(
            session_user(req).map(|(user_id, _)| user_id),
        )))
    }
}

impl Apiv2Schema for OptionalUser {}
impl OperationModifier for OptionalUser {}

#[cfg(test)]
mod auth_tests {
    use actix_web::cookie::Cookie;
    use actix_web::test::TestRequest;

    use super::*;

    #[actix_web::test]
    async fn test_extractors_resolve_session_cookie() {
        let sessions = Data::new(SessionStore::default());
        let token = sessions.create(42);

        let (req, mut payload) = TestRequest::default()
            .app_data(sessions.clone())
            .cookie(Cookie::new(SESSION_COOKIE, token.clone()))
            .to_http_parts();
        let user = AuthenticatedUser::from_request(&req, &mut payload)
            .await
            .unwrap();
        assert_eq!(user.user_id, 42);
        assert_eq!(user.session_token, token);
        let OptionalUser(optional) = OptionalUser::from_request(&req, &mut payload)
            .await
            .unwrap();
        assert_eq!(optional, Some(42));

        let (req, mut payload) = TestRequest::default()
            .app_data(sessions.clone())
            .cookie(Cookie::new(SESSION_COOKIE, "stale"))
            .to_http_parts();
        let rejection = AuthenticatedUser::from_request(&req, &mut payload)
            .await
            .unwrap_err();
        assert_eq!(rejection.status_code(), StatusCode::UNAUTHORIZED);
        let OptionalUser(optional) = OptionalUser::from_request(&req, &mut payload)
            .await
            .unwrap();
        assert_eq!(optional, None);
    }
}
