//! HTTP surface for filedepot.
//!
//! Six file operations under `/files` plus a health check. Identifiers are
//! passed in the query string.

pub mod dto;
pub mod error;
pub mod handlers;
pub mod router;
pub mod server;

pub use error::ApiError;
pub use router::create_router;
pub use server::WebServer;
