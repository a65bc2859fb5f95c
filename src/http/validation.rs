use validator::{ValidateEmail, ValidationError, ValidationErrors};

use crate::http::error::FieldError;
use crate::http::AppError;

pub fn validate_required(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::new("required"));
    }
    Ok(())
}

pub fn validate_email_address(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::new("required"));
    }
    if !value.validate_email() {
        return Err(ValidationError::new("email"));
    }
    Ok(())
}

pub fn validate_uuid(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::new("required"));
    }
    uuid::Uuid::parse_str(value)
        .map(|_| ())
        .map_err(|_| ValidationError::new("uuid"))
}

pub fn validate_entity_type(value: &str) -> Result<(), ValidationError> {
    match value {
        "" => Err(ValidationError::new("required")),
        "post" | "comment" => Ok(()),
        _ => Err(ValidationError::new("entity_type")),
    }
}

pub fn validate_verification_code(value: &str) -> Result<(), ValidationError> {
    if value.len() == 6 && value.bytes().all(|byte| byte.is_ascii_digit()) {
        Ok(())
    } else {
        Err(ValidationError::new("verification_code"))
    }
}

fn describe(code: &str) -> &'static str {
    match code {
        "required" => "field is required",
        "email" => "field is not a valid email",
        "uuid" => "field is not a valid UUID",
        "entity_type" => "field must be one of: post comment",
        "verification_code" => "field must be a 6 digit code",
        "length" => "field has an invalid length",
        _ => "field is invalid",
    }
}

/// One `{field, error}` pair per violation; [`AppError::validation`] sorts them.
pub fn validation_error(errors: ValidationErrors) -> AppError {
    let mut details = Vec::new();
    for (field, field_errors) in errors.field_errors() {
        for error in field_errors {
            details.push(FieldError {
                field: field.to_string(),
                error: describe(&error.code).to_string(),
            });
        }
    }
    AppError::validation(details)
}
