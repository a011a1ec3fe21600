//! SQLite schema and migrations for the embedded store.
//!
//! Migrations are applied sequentially when the database is first opened or
//! upgraded.

/// Database migrations.
///
/// Each migration is a SQL script executed in order. The schema_version table
/// tracks which migrations have been applied.
pub const MIGRATIONS: &[&str] = &[
    // v1: File metadata records
    r#"
CREATE TABLE files (
    id          TEXT PRIMARY KEY,          -- 24-char hex object id
    name        TEXT NOT NULL,
    size        TEXT NOT NULL,             -- decimal byte count
    date        TEXT NOT NULL,             -- RFC 3339 upload time
    pending     INTEGER NOT NULL DEFAULT 1,
    created_at  TEXT NOT NULL
);

CREATE INDEX idx_files_pending_created ON files(pending, created_at);
"#,
    // v2: Blob bucket (header + ordered chunks)
    r#"
CREATE TABLE blobs (
    id          TEXT PRIMARY KEY,          -- same id as the metadata record
    filename    TEXT NOT NULL,
    length      INTEGER NOT NULL,
    chunk_size  INTEGER NOT NULL,
    size        INTEGER NOT NULL,          -- declared size tag
    upload_date TEXT NOT NULL
);

CREATE TABLE blob_chunks (
    blob_id     TEXT NOT NULL REFERENCES blobs(id) ON DELETE CASCADE,
    n           INTEGER NOT NULL,
    data        BLOB NOT NULL,
    PRIMARY KEY (blob_id, n)
);
"#,
];
