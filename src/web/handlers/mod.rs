//! HTTP handlers.

pub mod file;

pub use file::*;

use crate::file::FileService;

/// Shared application state.
pub struct AppState {
    /// Storage adapter.
    pub files: FileService,
}

impl AppState {
    /// Create a new application state.
    pub fn new(files: FileService) -> Self {
        Self { files }
    }
}
