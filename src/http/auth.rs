use axum::extract::{FromRequestParts, Request, State};
use axum::http::request::Parts;
use axum::http::{header, HeaderMap};
use axum::middleware::Next;
use axum::response::Response;
use axum_extra::extract::cookie::CookieJar;
use uuid::Uuid;

use crate::app::tokens::{TokenError, TokenKind};
use crate::http::AppError;
use crate::AppState;

/// Identity of the caller, placed in request extensions by the auth middleware.
#[derive(Debug, Clone, Copy)]
pub struct AuthUser {
    pub user_id: Uuid,
}

/// Bearer header first, then the cookie named for the token kind.
pub fn extract_token(headers: &HeaderMap, jar: &CookieJar, kind: TokenKind) -> Option<String> {
    let from_header = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty());

    if let Some(token) = from_header {
        return Some(token.to_string());
    }

    jar.get(kind.cookie_name())
        .map(|cookie| cookie.value().trim().to_string())
        .filter(|token| !token.is_empty())
}

fn authenticate(state: &AppState, headers: &HeaderMap, jar: &CookieJar) -> Result<AuthUser, AppError> {
    let token = extract_token(headers, jar, TokenKind::Access)
        .ok_or_else(|| AppError::unauthorized("missing token"))?;

    let claims = state
        .tokens
        .verify_kind(&token, TokenKind::Access)
        .map_err(|err| match err {
            TokenError::Expired => AppError::unauthorized("token expired, please refresh"),
            _ => AppError::unauthorized("invalid token"),
        })?;

    Ok(AuthUser {
        user_id: claims.user_id,
    })
}

/// Rejects the request unless it carries a valid access token.
pub async fn require_auth(
    State(state): State<AppState>,
    jar: CookieJar,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let user = authenticate(&state, req.headers(), &jar).map_err(|err| {
        tracing::warn!(path = %req.uri().path(), reason = err.message(), "unauthenticated request");
        err
    })?;

    req.extensions_mut().insert(user);
    Ok(next.run(req).await)
}

/// Same extraction as [`require_auth`], but anonymous or badly authenticated requests
/// proceed without an identity.
pub async fn optional_auth(
    State(state): State<AppState>,
    jar: CookieJar,
    mut req: Request,
    next: Next,
) -> Response {
    if let Ok(user) = authenticate(&state, req.headers(), &jar) {
        req.extensions_mut().insert(user);
    }
    next.run(req).await
}

#[axum::async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    // Public reads extract `Option<AuthUser>`, so a missing identity is routine there and
    // only worth a debug line.
    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        parts.extensions.get::<AuthUser>().copied().ok_or_else(|| {
            tracing::debug!(path = %parts.uri.path(), "no identity on request");
            AppError::unauthorized("unauthorized").with_cleared_session(state.cookie_secure)
        })
    }
}
