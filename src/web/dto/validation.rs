//! Validation utilities for request DTOs.

use axum::{
    async_trait,
    extract::{rejection::JsonRejection, FromRequest, Request},
    Json,
};
use serde::de::DeserializeOwned;
use validator::Validate;

use crate::file::MAX_FILENAME_LENGTH;
use crate::web::error::ApiError;

/// A JSON extractor that validates the request body.
///
/// Malformed JSON and failed validation both become a 400 with a plain-text
/// reason.
pub struct ValidatedJson<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for ValidatedJson<T>
where
    S: Send + Sync,
    T: DeserializeOwned + Validate,
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|e| ApiError::bad_request(format!("invalid JSON: {}", e.body_text())))?;

        value.validate().map_err(ApiError::from_validation_errors)?;

        Ok(ValidatedJson(value))
    }
}

/// Reject any control character, including newlines and tabs.
pub fn no_control_chars(value: &str) -> Result<(), validator::ValidationError> {
    if value.chars().any(|c| c.is_control()) {
        return Err(validator::ValidationError::new("no_control_chars")
            .with_message("must not contain control characters".into()));
    }
    Ok(())
}

/// Validate that a string is not empty after trimming whitespace.
pub fn not_empty_trimmed(value: &str) -> Result<(), validator::ValidationError> {
    if value.trim().is_empty() {
        return Err(validator::ValidationError::new("not_empty_trimmed")
            .with_message("must not be empty".into()));
    }
    Ok(())
}

/// Reject names longer than [`MAX_FILENAME_LENGTH`] characters.
pub fn filename_length(value: &str) -> Result<(), validator::ValidationError> {
    if value.chars().count() > MAX_FILENAME_LENGTH {
        return Err(validator::ValidationError::new("filename_length").with_message(
            format!("must be at most {MAX_FILENAME_LENGTH} characters").into(),
        ));
    }
    Ok(())
}

/// A display filename: non-blank, bounded in length and free of control
/// characters.
pub fn display_name(value: &str) -> Result<(), validator::ValidationError> {
    not_empty_trimmed(value)?;
    filename_length(value)?;
    no_control_chars(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_control_chars() {
        assert!(no_control_chars("report.txt").is_ok());
        assert!(no_control_chars("日本語.txt").is_ok());
        assert!(no_control_chars("a\nb").is_err());
        assert!(no_control_chars("a\tb").is_err());
        assert!(no_control_chars("Hello\x00World").is_err());
    }

    #[test]
    fn test_not_empty_trimmed() {
        assert!(not_empty_trimmed("a").is_ok());
        assert!(not_empty_trimmed("  a  ").is_ok());
        assert!(not_empty_trimmed("").is_err());
        assert!(not_empty_trimmed("\t\n ").is_err());
    }

    #[test]
    fn test_display_name() {
        assert!(display_name("report.txt").is_ok());
        assert_eq!(
            display_name(" ").unwrap_err().code,
            "not_empty_trimmed"
        );
        assert_eq!(
            display_name("a\rb").unwrap_err().code,
            "no_control_chars"
        );
        assert_eq!(
            display_name(&"x".repeat(MAX_FILENAME_LENGTH + 1))
                .unwrap_err()
                .code,
            "filename_length"
        );
    }

    #[test]
    fn test_filename_length() {
        assert!(filename_length(&"x".repeat(MAX_FILENAME_LENGTH)).is_ok());
        // Counted in characters, not bytes
        assert!(filename_length(&"日".repeat(MAX_FILENAME_LENGTH)).is_ok());
        assert!(filename_length(&"x".repeat(MAX_FILENAME_LENGTH + 1)).is_err());
    }
}
