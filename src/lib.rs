//! filedepot - a small HTTP file store.
//!
//! Uploaded files are kept as a metadata record plus a chunked blob under one
//! shared identifier, in MongoDB (collection + GridFS) or in SQLite.

pub mod config;
pub mod error;
pub mod file;
pub mod logging;
pub mod store;
pub mod web;

pub use config::Config;
pub use error::{DepotError, Result};
pub use file::{FileId, FileRecord, FileService, ReconcileReport, Staging};
pub use store::FileStore;
pub use web::WebServer;
