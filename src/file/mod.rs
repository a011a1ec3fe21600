//! File management for filedepot.
//!
//! This module provides:
//! - The `FileRecord` metadata entity and its `FileId` identifier
//! - Scoped staging files for uploads and downloads
//! - `FileService`, which keeps metadata and blobs in lock-step

mod service;
mod staging;

pub use service::{FileService, ReconcileReport};
pub use staging::{StagedDownload, StagedUpload, Staging};

use std::fmt;
use std::str::FromStr;

use bson::oid::ObjectId;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Serialize, Serializer};

use crate::{DepotError, Result};

/// Maximum length for a display filename (in characters).
pub const MAX_FILENAME_LENGTH: usize = 255;

/// Identifier shared by a metadata record and its blob.
///
/// 12 bytes, rendered as 24 lowercase hex characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileId(ObjectId);

impl FileId {
    /// Generate a fresh identifier.
    pub fn generate() -> Self {
        Self(ObjectId::new())
    }

    /// Parse an identifier from its hex form.
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(DepotError::InvalidId("empty id".to_string()));
        }
        ObjectId::parse_str(s)
            .map(Self)
            .map_err(|_| DepotError::InvalidId(s.to_string()))
    }

    /// Hex form of the identifier.
    pub fn to_hex(&self) -> String {
        self.0.to_hex()
    }

    /// The underlying object id.
    pub fn as_object_id(&self) -> ObjectId {
        self.0
    }
}

impl From<ObjectId> for FileId {
    fn from(oid: ObjectId) -> Self {
        Self(oid)
    }
}

impl FromStr for FileId {
    type Err = DepotError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for FileId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

/// Metadata for a stored file.
///
/// `size` and `date` are text and never change after the upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileRecord {
    /// Identifier shared with the blob.
    pub id: FileId,
    /// Display filename.
    pub name: String,
    /// Byte length at upload time.
    pub size: String,
    /// Upload timestamp (RFC 3339, UTC).
    pub date: String,
}

impl FileRecord {
    /// Create a record for a freshly uploaded file.
    pub fn new(id: FileId, name: impl Into<String>, size: u64, date: DateTime<Utc>) -> Self {
        Self {
            id,
            name: name.into(),
            size: size.to_string(),
            date: date.to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }
}

/// Check a display filename.
pub fn validate_name(name: &str) -> Result<String> {
    if name.trim().is_empty() {
        return Err(DepotError::Validation("name must not be empty".to_string()));
    }
    if name.chars().count() > MAX_FILENAME_LENGTH {
        return Err(DepotError::Validation(format!(
            "name must be at most {MAX_FILENAME_LENGTH} characters"
        )));
    }
    if name.chars().any(|c| c.is_control()) {
        return Err(DepotError::Validation(
            "name must not contain control characters".to_string(),
        ));
    }
    Ok(name.to_string())
}

/// Reduce a display filename to a single safe path component.
///
/// Directory parts are dropped, so `../../etc/passwd` becomes `passwd`.
/// Falls back to `fallback` when nothing usable is left.
pub fn safe_file_name(name: &str, fallback: &str) -> String {
    let last = name.rsplit(['/', '\\']).next().unwrap_or("");
    let cleaned: String = last.chars().filter(|c| !c.is_control()).collect();
    let cleaned = cleaned.trim();

    if cleaned.is_empty() || cleaned == "." || cleaned == ".." {
        fallback.to_string()
    } else {
        cleaned.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_file_id_roundtrip_hex() {
        let id = FileId::generate();
        let hex = id.to_hex();

        assert_eq!(hex.len(), 24);
        assert_eq!(FileId::parse(&hex).unwrap(), id);
        assert_eq!(id.to_string(), hex);
    }

    #[test]
    fn test_file_id_parse_invalid() {
        assert!(matches!(FileId::parse("xyz"), Err(DepotError::InvalidId(_))));
        assert!(matches!(
            FileId::parse("zzzzzzzzzzzzzzzzzzzzzzzz"),
            Err(DepotError::InvalidId(_))
        ));
        assert!(matches!(FileId::parse(""), Err(DepotError::InvalidId(_))));
        assert!(matches!(FileId::parse("   "), Err(DepotError::InvalidId(_))));
    }

    #[test]
    fn test_file_id_parse_trims() {
        let id: FileId = " 65a1b2c3d4e5f60718293a4b ".parse().unwrap();
        assert_eq!(id.to_hex(), "65a1b2c3d4e5f60718293a4b");
    }

    #[test]
    fn test_generated_ids_unique() {
        assert_ne!(FileId::generate(), FileId::generate());
    }

    #[test]
    fn test_record_serializes_as_text_fields() {
        let id = FileId::parse("65a1b2c3d4e5f60718293a4b").unwrap();
        let date = Utc.with_ymd_and_hms(2024, 1, 12, 9, 30, 0).unwrap();
        let record = FileRecord::new(id, "report.txt", 5, date);

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "id": "65a1b2c3d4e5f60718293a4b",
                "name": "report.txt",
                "size": "5",
                "date": "2024-01-12T09:30:00.000Z"
            })
        );
    }

    #[test]
    fn test_validate_name() {
        assert_eq!(validate_name("a.txt").unwrap(), "a.txt");
        assert!(validate_name("").is_err());
        assert!(validate_name("   ").is_err());
        assert!(validate_name("bad\nname").is_err());
        assert!(validate_name(&"x".repeat(MAX_FILENAME_LENGTH)).is_ok());
        assert!(validate_name(&"x".repeat(MAX_FILENAME_LENGTH + 1)).is_err());
    }

    #[test]
    fn test_safe_file_name() {
        assert_eq!(safe_file_name("report.txt", "id"), "report.txt");
        assert_eq!(safe_file_name("../../etc/passwd", "id"), "passwd");
        assert_eq!(safe_file_name("C:\\Users\\me\\a.txt", "id"), "a.txt");
        assert_eq!(safe_file_name("dir/", "id"), "id");
        assert_eq!(safe_file_name("..", "id"), "id");
        assert_eq!(safe_file_name("日本語.txt", "id"), "日本語.txt");
    }
}
