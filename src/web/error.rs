//! API error handling for the filedepot HTTP surface.
//!
//! Every failure reaching a handler is turned into an [`ApiError`] here, and
//! only here. Bodies are short plain-text messages.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::DepotError;

/// API error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Bad request (400).
    BadRequest,
    /// Not found (404).
    NotFound,
    /// Payload too large (413).
    PayloadTooLarge,
    /// Internal server error (500).
    InternalError,
}

impl ErrorCode {
    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ErrorCode::BadRequest => StatusCode::BAD_REQUEST,
            ErrorCode::NotFound => StatusCode::NOT_FOUND,
            ErrorCode::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// API error type.
#[derive(Debug)]
pub struct ApiError {
    code: ErrorCode,
    message: String,
}

impl ApiError {
    /// Create a new API error.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Create a bad request error.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::BadRequest, message)
    }

    /// Create a not found error.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }

    /// Create a payload too large error.
    pub fn payload_too_large(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::PayloadTooLarge, message)
    }

    /// Create an internal server error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    /// The error code.
    pub fn code(&self) -> ErrorCode {
        self.code
    }

    /// The client-facing message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Create a bad request error from validator::ValidationErrors.
    pub fn from_validation_errors(errors: validator::ValidationErrors) -> Self {
        let mut messages: Vec<String> = errors
            .field_errors()
            .into_iter()
            .flat_map(|(field, field_errors)| {
                field_errors.iter().map(move |e| {
                    let reason = e
                        .message
                        .as_ref()
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| "invalid value".to_string());
                    format!("{field}: {reason}")
                })
            })
            .collect();
        messages.sort();

        Self::bad_request(messages.join("; "))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.code.status_code(), self.message).into_response()
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.code, self.message)
    }
}

impl std::error::Error for ApiError {}

impl From<DepotError> for ApiError {
    fn from(err: DepotError) -> Self {
        match &err {
            DepotError::Validation(msg) => ApiError::bad_request(msg.clone()),
            DepotError::InvalidId(_) => ApiError::bad_request(err.to_string()),
            DepotError::NotFound(_) => ApiError::not_found(err.to_string()),
            DepotError::PayloadTooLarge(_) => ApiError::payload_too_large(err.to_string()),
            DepotError::Database(_)
            | DepotError::Blob(_)
            | DepotError::Io(_)
            | DepotError::Config(_) => {
                tracing::error!("Internal error: {}", err);
                ApiError::internal("internal storage error")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use validator::Validate;

    #[test]
    fn test_error_code_status() {
        assert_eq!(ErrorCode::BadRequest.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(ErrorCode::NotFound.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(
            ErrorCode::PayloadTooLarge.status_code(),
            StatusCode::PAYLOAD_TOO_LARGE
        );
        assert_eq!(
            ErrorCode::InternalError.status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_from_depot_error() {
        let cases = [
            (DepotError::Validation("x".into()), ErrorCode::BadRequest),
            (DepotError::InvalidId("x".into()), ErrorCode::BadRequest),
            (DepotError::NotFound("file".into()), ErrorCode::NotFound),
            (DepotError::PayloadTooLarge(10), ErrorCode::PayloadTooLarge),
            (DepotError::Database("down".into()), ErrorCode::InternalError),
            (DepotError::Blob("cut".into()), ErrorCode::InternalError),
            (
                DepotError::Io(std::io::Error::other("disk")),
                ErrorCode::InternalError,
            ),
            (DepotError::Config("bad".into()), ErrorCode::InternalError),
        ];

        for (err, code) in cases {
            assert_eq!(ApiError::from(err).code(), code);
        }
    }

    #[test]
    fn test_internal_error_hides_details() {
        let err = ApiError::from(DepotError::Database("secret connection string".into()));
        assert!(!err.message().contains("secret"));
    }

    #[test]
    fn test_not_found_message() {
        let err = ApiError::from(DepotError::NotFound("file".into()));
        assert_eq!(err.message(), "file not found");
    }

    #[derive(Validate)]
    struct Named {
        #[validate(length(min = 1, message = "must not be empty"))]
        name: String,
    }

    #[test]
    fn test_from_validation_errors() {
        let errors = Named {
            name: String::new(),
        }
        .validate()
        .unwrap_err();

        let err = ApiError::from_validation_errors(errors);
        assert_eq!(err.code(), ErrorCode::BadRequest);
        assert_eq!(err.message(), "name: must not be empty");
    }

    #[tokio::test]
    async fn test_response_is_plain_text() {
        let response = ApiError::not_found("file not found").into_response();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let content_type = response.headers().get("content-type").unwrap();
        assert!(content_type.to_str().unwrap().starts_with("text/plain"));

        let body = http_body_util::BodyExt::collect(response.into_body())
            .await
            .unwrap()
            .to_bytes();
        assert_eq!(&body[..], b"file not found");
    }
}
