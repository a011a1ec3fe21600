//! Request DTOs for the file endpoints.

use serde::Deserialize;
use validator::Validate;

use super::validation::display_name;
use crate::web::error::ApiError;

/// `?id=` query parameter shared by the single-file endpoints.
#[derive(Debug, Default, Deserialize)]
pub struct IdQuery {
    /// Hex identifier of the file.
    pub id: Option<String>,
}

impl IdQuery {
    /// The identifier, or a 400 if it was not supplied.
    pub fn require(&self) -> Result<&str, ApiError> {
        match self.id.as_deref() {
            Some(id) if !id.trim().is_empty() => Ok(id),
            _ => Err(ApiError::bad_request("missing id query parameter")),
        }
    }
}

/// Rename request body. Unknown fields are ignored.
#[derive(Debug, Deserialize, Validate)]
pub struct UpdateFileRequest {
    /// New display name.
    #[validate(custom(function = "display_name"))]
    pub name: String,
}
