//! Invite-code gate and chat route guard

use super::types::{InviteRequest, InviteResponse};
use super::AppState;
use axum::{
    body::Body,
    extract::{rejection::JsonRejection, State},
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
    Json,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use axum_extra::extract::WithRejection;

/// Cookie marking a browser that has presented a valid invite code
pub const SESSION_COOKIE: &str = "authenticated";
const SESSION_DAYS: i64 = 7;

pub async fn validate_invite(
    State(state): State<AppState>,
    jar: CookieJar,
    WithRejection(Json(req), _): WithRejection<Json<InviteRequest>, InviteRejection>,
) -> Response {
    let valid = state
        .gate
        .invite_code
        .as_deref()
        .is_some_and(|code| code == req.invite_code);

    if !valid {
        tracing::warn!("Rejected invite code");
        return (
            StatusCode::UNAUTHORIZED,
            Json(InviteResponse {
                valid: false,
                message: "Invalid invite code",
            }),
        )
            .into_response();
    }

    tracing::info!("Invite code accepted");
    let cookie = Cookie::build((SESSION_COOKIE, "true"))
        .path("/")
        .http_only(true)
        .secure(state.gate.secure_cookies)
        .same_site(SameSite::Lax)
        .max_age(time::Duration::days(SESSION_DAYS))
        .build();

    (
        jar.add(cookie),
        Json(InviteResponse {
            valid: true,
            message: "Invite code valid",
        }),
    )
        .into_response()
}

/// Unreadable invite bodies answer in the invite response shape
#[derive(Debug)]
pub struct InviteRejection(JsonRejection);

impl From<JsonRejection> for InviteRejection {
    fn from(rejection: JsonRejection) -> Self {
        Self(rejection)
    }
}

impl IntoResponse for InviteRejection {
    fn into_response(self) -> Response {
        tracing::warn!(status = %self.0.status(), error = %self.0.body_text(), "Rejected invite request body");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(InviteResponse {
                valid: false,
                message: "Server error processing invite code",
            }),
        )
            .into_response()
    }
}

/// Redirect to the entry page unless the session cookie is present and set
pub async fn require_session(jar: CookieJar, req: Request<Body>, next: Next) -> Response {
    if jar
        .get(SESSION_COOKIE)
        .is_some_and(|cookie| !cookie.value().is_empty())
    {
        next.run(req).await
    } else {
        tracing::debug!(path = %req.uri().path(), "No session cookie, redirecting to entry page");
        Redirect::to("/").into_response()
    }
}
