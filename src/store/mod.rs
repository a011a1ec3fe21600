//! Blob+metadata store for filedepot.
//!
//! A store holds two things under one identifier: a metadata record in a
//! document collection and a chunked binary object in a blob bucket. The
//! `FileStore` trait is the seam between the storage adapter and a concrete
//! backend:
//!
//! - [`MongoStore`]: MongoDB collection + GridFS bucket
//! - [`SqliteStore`]: SQLite via sqlx with a GridFS-like chunk table
//!
//! Records carry a `pending` flag while their blob is being uploaded. All
//! record lookups used by the HTTP surface ignore pending records.

mod mongo;
mod schema;
mod sqlite;

pub use mongo::MongoStore;
pub use schema::MIGRATIONS;
pub use sqlite::SqliteStore;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tracing::info;

use crate::config::{StoreBackend, StoreConfig};
use crate::file::{FileId, FileRecord};
use crate::Result;

/// Buffer size used when copying blob bytes between streams.
pub(crate) const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// Operations a blob+metadata backend provides.
#[async_trait]
pub trait FileStore: Send + Sync {
    /// Short backend name for logging.
    fn backend_name(&self) -> &'static str;

    /// Check the backend is reachable.
    async fn ping(&self) -> Result<()>;

    // ------------------------------------------------------------------
    // Metadata records
    // ------------------------------------------------------------------

    /// Insert a record in the pending state.
    async fn insert_pending(&self, record: &FileRecord) -> Result<()>;

    /// Flip a pending record to complete. Returns false if no pending record matched.
    async fn mark_complete(&self, id: &FileId) -> Result<bool>;

    /// Find a complete record by id.
    async fn find_record(&self, id: &FileId) -> Result<Option<FileRecord>>;

    /// List all complete records.
    async fn list_records(&self) -> Result<Vec<FileRecord>>;

    /// Set the name of a complete record. Returns false if none matched.
    async fn update_name(&self, id: &FileId, name: &str) -> Result<bool>;

    /// Delete a complete record. Returns false if none matched.
    async fn delete_record(&self, id: &FileId) -> Result<bool>;

    /// Ids of pending records created before `cutoff`.
    async fn list_pending_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<FileId>>;

    /// Delete a pending record. Returns false if none matched.
    async fn discard_pending(&self, id: &FileId) -> Result<bool>;

    /// Ids of every record, pending or complete.
    async fn list_record_ids(&self) -> Result<Vec<FileId>>;

    // ------------------------------------------------------------------
    // Blobs
    // ------------------------------------------------------------------

    /// Store the bytes read from `reader` as a blob named `name`, tagged with
    /// the declared `size`. Returns the number of bytes stored.
    async fn upload_blob(
        &self,
        id: &FileId,
        name: &str,
        size: u64,
        reader: &mut (dyn AsyncRead + Unpin + Send),
    ) -> Result<u64>;

    /// Copy a blob into `writer`. Returns the number of bytes copied.
    async fn download_blob(
        &self,
        id: &FileId,
        writer: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> Result<u64>;

    /// Rename a blob. Returns false if the blob does not exist.
    async fn rename_blob(&self, id: &FileId, name: &str) -> Result<bool>;

    /// Delete a blob and all its chunks. Returns false if it did not exist.
    async fn delete_blob(&self, id: &FileId) -> Result<bool>;

    /// Ids of every stored blob.
    async fn list_blob_ids(&self) -> Result<Vec<FileId>>;
}

/// Connect the backend selected in `config`.
///
/// The connection is verified before returning; there is no retry.
pub async fn connect(config: &StoreConfig) -> Result<Arc<dyn FileStore>> {
    let store: Arc<dyn FileStore> = match config.backend {
        StoreBackend::Mongodb => Arc::new(MongoStore::connect(config).await?),
        StoreBackend::Sqlite => Arc::new(
            SqliteStore::open(&config.sqlite_path, config.chunk_size_bytes as usize).await?,
        ),
    };
    store.ping().await?;
    info!(backend = store.backend_name(), "Store connected");
    Ok(store)
}

/// Read until `buf` is full or the reader is exhausted.
pub(crate) async fn read_full<R>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_read_full_fills_buffer_across_reads() {
        let data: Vec<u8> = (0..10).collect();
        // A chained reader returns at most one slice per read call.
        let mut reader = tokio::io::AsyncReadExt::chain(&data[..3], &data[3..]);
        let mut buf = [0u8; 8];

        let n = read_full(&mut reader, &mut buf).await.unwrap();
        assert_eq!(n, 8);
        assert_eq!(&buf, &data[..8]);

        let n = read_full(&mut reader, &mut buf).await.unwrap();
        assert_eq!(n, 2);
        assert_eq!(&buf[..2], &data[8..]);
    }

    #[tokio::test]
    async fn test_connect_sqlite_backend() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let config = StoreConfig {
            backend: StoreBackend::Sqlite,
            sqlite_path: temp_dir
                .path()
                .join("depot.db")
                .to_string_lossy()
                .into_owned(),
            ..Default::default()
        };

        let store = connect(&config).await.unwrap();
        assert_eq!(store.backend_name(), "sqlite");
        assert!(store.list_records().await.unwrap().is_empty());
    }
}
