use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use time::{Duration, OffsetDateTime};

use crate::app::tokens::{SignedToken, TokenKind, TokenPair};

fn session_cookie(kind: TokenKind, token: &SignedToken, ttl: Duration, secure: bool) -> Cookie<'static> {
    Cookie::build((kind.cookie_name(), token.token.clone()))
        .path("/")
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Strict)
        .max_age(ttl)
        .expires(token.expires_at)
        .build()
}

// Same attributes as the session cookie it replaces, so the browser overwrites it.
fn removal_cookie(kind: TokenKind, secure: bool) -> Cookie<'static> {
    Cookie::build((kind.cookie_name(), ""))
        .path("/")
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Strict)
        .max_age(Duration::ZERO)
        .expires(OffsetDateTime::UNIX_EPOCH)
        .build()
}

/// Sets the access and refresh cookies; each lives as long as its token.
pub fn set_session(
    jar: CookieJar,
    tokens: &TokenPair,
    access_ttl: Duration,
    refresh_ttl: Duration,
    secure: bool,
) -> CookieJar {
    jar.add(session_cookie(TokenKind::Access, &tokens.access, access_ttl, secure))
        .add(session_cookie(TokenKind::Refresh, &tokens.refresh, refresh_ttl, secure))
}

pub fn clear_session(jar: CookieJar, secure: bool) -> CookieJar {
    jar.add(removal_cookie(TokenKind::Access, secure))
        .add(removal_cookie(TokenKind::Refresh, secure))
}
