use std::sync::OnceLock;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use axum_extra::extract::cookie::CookieJar;
use regex::Regex;
use serde::Serialize;
use sqlx::postgres::PgDatabaseError;

use crate::http::cookies;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub error: String,
}

#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    message: String,
    details: Option<Vec<FieldError>>,
    /// When set, both session cookies are expired; the flag is their `Secure` attribute.
    clear_session: Option<bool>,
}

#[derive(Serialize)]
struct ErrorResponse<'a> {
    status: &'static str,
    status_code: u16,
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<&'a [FieldError]>,
}

impl AppError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            details: None,
            clear_session: None,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn unsupported_media_type(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNSUPPORTED_MEDIA_TYPE, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, message)
    }

    pub fn request_timeout(message: impl Into<String>) -> Self {
        Self::new(StatusCode::REQUEST_TIMEOUT, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    /// Field validation failure; details are reported sorted by field name.
    pub fn validation(mut details: Vec<FieldError>) -> Self {
        details.sort_by(|a, b| a.field.cmp(&b.field));
        Self {
            details: Some(details),
            ..Self::bad_request("There is some problem with the data you submitted.")
        }
    }

    /// Also expire both session cookies on the client. `secure` must match the flag the
    /// cookies were set with.
    pub fn with_cleared_session(mut self, secure: bool) -> Self {
        self.clear_session = Some(secure);
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn details(&self) -> Option<&[FieldError]> {
        self.details.as_deref()
    }

    /// Maps a service failure onto the response a client should see. Anything that is not a
    /// storage error is an internal failure.
    pub fn from_store(err: &anyhow::Error, label: &str) -> Self {
        match err.downcast_ref::<sqlx::Error>() {
            Some(err) => Self::from_sqlx(err, label),
            None => Self::internal("internal server error"),
        }
    }

    pub fn from_sqlx(err: &sqlx::Error, label: &str) -> Self {
        match err {
            sqlx::Error::RowNotFound => Self::not_found(format!("{} not found", label)),
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed => Self::internal("database connection error"),
            sqlx::Error::Database(db_err) => match db_err.code().as_deref() {
                Some("23505") => {
                    let field = db_err
                        .try_downcast_ref::<PgDatabaseError>()
                        .and_then(|pg_err| pg_err.detail())
                        .and_then(duplicate_field)
                        .unwrap_or_else(|| "unknown field".to_string());
                    Self::conflict(format!("{} with this {} already exists", label, field))
                }
                Some("23503") => Self::not_found(format!("{} not found", label)),
                Some(code) if code.starts_with("08") => Self::internal("database connection error"),
                _ => Self::internal("internal server error"),
            },
            _ => Self::internal("internal server error"),
        }
    }
}

/// Pulls the column list out of a unique violation detail such as
/// `Key (email)=(a@b.c) already exists.`
pub(crate) fn duplicate_field(detail: &str) -> Option<String> {
    static KEY_REGEX: OnceLock<Regex> = OnceLock::new();
    let regex = KEY_REGEX
        .get_or_init(|| Regex::new(r"Key \((.*?)\)=").expect("Failed to compile key regex"));

    regex
        .captures(detail)
        .and_then(|captures| captures.get(1))
        .map(|field| field.as_str().to_string())
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(ErrorResponse {
            status: "error",
            status_code: self.status.as_u16(),
            message: &self.message,
            details: self.details.as_deref(),
        });

        if let Some(secure) = self.clear_session {
            let jar = cookies::clear_session(CookieJar::new(), secure);
            (self.status, jar, body).into_response()
        } else {
            (self.status, body).into_response()
        }
    }
}
