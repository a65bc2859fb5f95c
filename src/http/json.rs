use axum::extract::{FromRequest, Request};
use axum::http::{header, HeaderMap};
use http_body_util::{BodyExt, LengthLimitError, Limited};
use serde::de::DeserializeOwned;
use serde_json::error::Category;
use validator::Validate;

use crate::http::validation::validation_error;
use crate::http::AppError;

pub const MAX_BODY_BYTES: usize = 1024 * 1024;

/// JSON body extractor with strict decoding: JSON content type, size cap, and a single
/// value per body. Unknown fields are rejected by the target type (`deny_unknown_fields`).
#[derive(Debug)]
pub struct JsonBody<T>(pub T);

/// [`JsonBody`] followed by declarative validation of the decoded value.
#[derive(Debug)]
pub struct ValidJson<T>(pub T);

#[axum::async_trait]
impl<S, T> FromRequest<S> for JsonBody<T>
where
    S: Send + Sync,
    T: DeserializeOwned,
{
    type Rejection = AppError;

    async fn from_request(req: Request, _state: &S) -> Result<Self, Self::Rejection> {
        ensure_json_content_type(req.headers())?;
        let bytes = read_body(req).await?;
        decode_json(&bytes).map(JsonBody)
    }
}

#[axum::async_trait]
impl<S, T> FromRequest<S> for ValidJson<T>
where
    S: Send + Sync,
    T: DeserializeOwned + Validate,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let JsonBody(value) = JsonBody::<T>::from_request(req, state).await?;
        value.validate().map_err(|errors| {
            tracing::warn!(error = %errors, "validation failed");
            validation_error(errors)
        })?;
        Ok(ValidJson(value))
    }
}

/// A missing Content-Type is tolerated; anything other than JSON (parameters such as
/// `charset` aside) is a 415.
fn ensure_json_content_type(headers: &HeaderMap) -> Result<(), AppError> {
    let Some(content_type) = headers.get(header::CONTENT_TYPE) else {
        return Ok(());
    };

    let media_type = content_type
        .to_str()
        .unwrap_or_default()
        .split(';')
        .next()
        .unwrap_or_default()
        .trim();
    if !media_type.eq_ignore_ascii_case("application/json") {
        tracing::warn!(content_type = ?content_type, "rejected non-JSON body");
        return Err(AppError::unsupported_media_type(
            "Content-Type header is not application/json",
        ));
    }
    Ok(())
}

async fn read_body(req: Request) -> Result<Vec<u8>, AppError> {
    let body = Limited::new(req.into_body(), MAX_BODY_BYTES);
    match body.collect().await {
        Ok(collected) => Ok(collected.to_bytes().to_vec()),
        Err(err) if err.downcast_ref::<LengthLimitError>().is_some() => Err(AppError::bad_request(
            format!("Request body must not be larger than {} bytes", MAX_BODY_BYTES),
        )),
        Err(err) => {
            tracing::warn!(error = %err, "failed to read request body");
            Err(AppError::bad_request("failed to read request body"))
        }
    }
}

/// Decodes exactly one JSON value. Every failure becomes a 400 naming what was wrong.
pub fn decode_json<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, AppError> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Err(AppError::bad_request("Request body must not be empty"));
    }

    let mut de = serde_json::Deserializer::from_slice(bytes);
    let value: T = serde_path_to_error::deserialize(&mut de).map_err(|err| {
        tracing::warn!(error = %err, "invalid JSON body");
        let field = err.path().to_string();
        describe_json_error(err.inner(), bytes, &field)
    })?;

    de.end().map_err(|_| {
        AppError::bad_request("Request body must only contain a single JSON object")
    })?;

    Ok(value)
}

// `field` is the dotted path to the failing value, "." at the root.
fn describe_json_error(err: &serde_json::Error, input: &[u8], field: &str) -> AppError {
    let position = byte_offset(input, err.line(), err.column());
    match err.classify() {
        Category::Syntax => AppError::bad_request(format!(
            "Request body contains badly-formed JSON (at position {})",
            position
        )),
        Category::Eof => AppError::bad_request("Request body contains badly-formed JSON"),
        Category::Data => {
            let text = err.to_string();
            if let Some(field) = quoted_name(&text, "unknown field `") {
                AppError::bad_request(format!("Request body contains unknown field \"{}\"", field))
            } else if let Some(field) = quoted_name(&text, "missing field `") {
                AppError::bad_request(format!("Request body is missing field \"{}\"", field))
            } else if field != "." {
                AppError::bad_request(format!(
                    "Request body contains an invalid value for the \"{}\" field (at position {})",
                    field, position
                ))
            } else {
                AppError::bad_request(format!(
                    "Request body contains an invalid value (at position {})",
                    position
                ))
            }
        }
        Category::Io => AppError::bad_request("failed to read request body"),
    }
}

fn quoted_name<'a>(text: &'a str, prefix: &str) -> Option<&'a str> {
    let rest = text.strip_prefix(prefix)?;
    rest.split('`').next()
}

// serde_json reports 1-based line and column; clients get a byte offset.
fn byte_offset(input: &[u8], line: usize, column: usize) -> usize {
    let preceding: usize = input
        .split(|byte| *byte == b'\n')
        .take(line.saturating_sub(1))
        .map(|line| line.len() + 1)
        .sum();
    preceding + column
}

/// Reads a body that may be left out entirely; absent or blank bodies decode as
/// `T::default()`. When one is sent it goes through the same content-type, size and
/// decoding checks as [`JsonBody`].
pub(crate) async fn optional_json_body<T>(req: Request) -> Result<T, AppError>
where
    T: DeserializeOwned + Default,
{
    let content_type = ensure_json_content_type(req.headers());
    let bytes = read_body(req).await?;
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    content_type?;
    decode_json(&bytes)
}
