//! Embedded SQLite store.
//!
//! Metadata lives in the `files` table. Blobs are split into fixed-size rows
//! of `blob_chunks` under a `blobs` header row, the same layout GridFS uses.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use futures::TryStreamExt;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

use super::{read_full, FileStore, MIGRATIONS};
use crate::file::{FileId, FileRecord};
use crate::{DepotError, Result};

/// SQLite implementation of [`FileStore`].
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
    chunk_size: usize,
}

#[derive(sqlx::FromRow)]
struct FileRow {
    id: String,
    name: String,
    size: String,
    date: String,
}

impl TryFrom<FileRow> for FileRecord {
    type Error = DepotError;

    fn try_from(row: FileRow) -> Result<Self> {
        Ok(FileRecord {
            id: FileId::parse(&row.id)?,
            name: row.name,
            size: row.size,
            date: row.date,
        })
    }
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse stored ids, skipping any row that is not a valid object id.
fn parse_ids(rows: Vec<(String,)>, table: &str) -> Vec<FileId> {
    rows.into_iter()
        .filter_map(|(id,)| match FileId::parse(&id) {
            Ok(id) => Some(id),
            Err(_) => {
                warn!(table, id = %id, "Skipping row with malformed id");
                None
            }
        })
        .collect()
}

impl SqliteStore {
    /// Open the database at `path`, creating it and its parent directories
    /// if needed. Migrations are applied automatically.
    pub async fn open(path: impl AsRef<Path>, chunk_size: usize) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening database at {:?}", path);

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await?;

        Self::with_pool(pool, chunk_size).await
    }

    /// Open an in-memory database.
    ///
    /// The pool holds exactly one connection for its whole life, since every
    /// new connection to `:memory:` would see an empty database.
    pub async fn open_in_memory(chunk_size: usize) -> Result<Self> {
        debug!("Opening in-memory database");
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        Self::with_pool(pool, chunk_size).await
    }

    async fn with_pool(pool: SqlitePool, chunk_size: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(DepotError::Config("chunk size must be positive".to_string()));
        }
        let store = Self { pool, chunk_size };
        store.migrate().await?;
        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Get the current schema version.
    pub async fn schema_version(&self) -> Result<i64> {
        let table_exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
        )
        .fetch_one(&self.pool)
        .await?;

        if !table_exists {
            return Ok(0);
        }

        let version: i64 = sqlx::query_scalar("SELECT COALESCE(MAX(version), 0) FROM schema_version")
            .fetch_one(&self.pool)
            .await?;
        Ok(version)
    }

    /// Apply pending migrations.
    async fn migrate(&self) -> Result<()> {
        let current_version = self.schema_version().await?;
        if current_version as usize >= MIGRATIONS.len() {
            debug!("Database is up to date (version {})", current_version);
            return Ok(());
        }

        info!(
            "Migrating database from version {} to {}",
            current_version,
            MIGRATIONS.len()
        );

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS schema_version (
                version     INTEGER PRIMARY KEY,
                applied_at  TEXT NOT NULL DEFAULT (datetime('now'))
            )",
        )
        .execute(&self.pool)
        .await?;

        for (i, migration) in MIGRATIONS.iter().enumerate().skip(current_version as usize) {
            let version = (i + 1) as i64;
            info!("Applying migration v{}", version);

            let mut tx = self.pool.begin().await?;
            sqlx::raw_sql(migration).execute(&mut *tx).await?;
            sqlx::query("INSERT INTO schema_version (version) VALUES (?)")
                .bind(version)
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
        }

        Ok(())
    }
}

#[async_trait]
impl FileStore for SqliteStore {
    fn backend_name(&self) -> &'static str {
        "sqlite"
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn insert_pending(&self, record: &FileRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO files (id, name, size, date, pending, created_at) VALUES (?, ?, ?, ?, 1, ?)",
        )
        .bind(record.id.to_hex())
        .bind(&record.name)
        .bind(&record.size)
        .bind(&record.date)
        .bind(timestamp(Utc::now()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_complete(&self, id: &FileId) -> Result<bool> {
        let result = sqlx::query("UPDATE files SET pending = 0 WHERE id = ? AND pending = 1")
            .bind(id.to_hex())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn find_record(&self, id: &FileId) -> Result<Option<FileRecord>> {
        let row: Option<FileRow> = sqlx::query_as(
            "SELECT id, name, size, date FROM files WHERE id = ? AND pending = 0",
        )
        .bind(id.to_hex())
        .fetch_optional(&self.pool)
        .await?;

        row.map(FileRecord::try_from).transpose()
    }

    async fn list_records(&self) -> Result<Vec<FileRecord>> {
        let rows: Vec<FileRow> = sqlx::query_as(
            "SELECT id, name, size, date FROM files WHERE pending = 0 ORDER BY created_at, id",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(FileRecord::try_from).collect()
    }

    async fn update_name(&self, id: &FileId, name: &str) -> Result<bool> {
        let result = sqlx::query("UPDATE files SET name = ? WHERE id = ? AND pending = 0")
            .bind(name)
            .bind(id.to_hex())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_record(&self, id: &FileId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM files WHERE id = ? AND pending = 0")
            .bind(id.to_hex())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_pending_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<FileId>> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT id FROM files WHERE pending = 1 AND created_at < ?")
                .bind(timestamp(cutoff))
                .fetch_all(&self.pool)
                .await?;
        Ok(parse_ids(rows, "files"))
    }

    async fn discard_pending(&self, id: &FileId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM files WHERE id = ? AND pending = 1")
            .bind(id.to_hex())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_record_ids(&self) -> Result<Vec<FileId>> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT id FROM files")
            .fetch_all(&self.pool)
            .await?;
        Ok(parse_ids(rows, "files"))
    }

    async fn upload_blob(
        &self,
        id: &FileId,
        name: &str,
        size: u64,
        reader: &mut (dyn AsyncRead + Unpin + Send),
    ) -> Result<u64> {
        let blob_id = id.to_hex();
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO blobs (id, filename, length, chunk_size, size, upload_date)
             VALUES (?, ?, 0, ?, ?, ?)",
        )
        .bind(&blob_id)
        .bind(name)
        .bind(self.chunk_size as i64)
        .bind(size as i64)
        .bind(timestamp(Utc::now()))
        .execute(&mut *tx)
        .await?;

        let mut buf = vec![0u8; self.chunk_size];
        let mut n: i64 = 0;
        let mut total: u64 = 0;
        loop {
            let read = read_full(reader, &mut buf)
                .await
                .map_err(|e| DepotError::Blob(format!("failed to read upload: {e}")))?;
            if read == 0 {
                break;
            }
            sqlx::query("INSERT INTO blob_chunks (blob_id, n, data) VALUES (?, ?, ?)")
                .bind(&blob_id)
                .bind(n)
                .bind(&buf[..read])
                .execute(&mut *tx)
                .await?;
            n += 1;
            total += read as u64;
            if read < buf.len() {
                break;
            }
        }

        sqlx::query("UPDATE blobs SET length = ? WHERE id = ?")
            .bind(total as i64)
            .bind(&blob_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        debug!(id = %blob_id, chunks = n, bytes = total, "Blob stored");
        Ok(total)
    }

    async fn download_blob(
        &self,
        id: &FileId,
        writer: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> Result<u64> {
        let blob_id = id.to_hex();
        let length: Option<i64> = sqlx::query_scalar("SELECT length FROM blobs WHERE id = ?")
            .bind(&blob_id)
            .fetch_optional(&self.pool)
            .await?;
        let length = length.ok_or_else(|| DepotError::NotFound("blob".to_string()))? as u64;

        let mut chunks = sqlx::query_as::<_, (i64, Vec<u8>)>(
            "SELECT n, data FROM blob_chunks WHERE blob_id = ? ORDER BY n",
        )
        .bind(&blob_id)
        .fetch(&self.pool);

        let mut expected: i64 = 0;
        let mut total: u64 = 0;
        while let Some((n, data)) = chunks.try_next().await? {
            if n != expected {
                return Err(DepotError::Blob(format!(
                    "blob {blob_id} is missing chunk {expected}"
                )));
            }
            writer
                .write_all(&data)
                .await
                .map_err(|e| DepotError::Blob(format!("failed to write download: {e}")))?;
            expected += 1;
            total += data.len() as u64;
        }

        if total != length {
            return Err(DepotError::Blob(format!(
                "blob {blob_id} is truncated: expected {length} bytes, found {total}"
            )));
        }
        Ok(total)
    }

    async fn rename_blob(&self, id: &FileId, name: &str) -> Result<bool> {
        let result = sqlx::query("UPDATE blobs SET filename = ? WHERE id = ?")
            .bind(name)
            .bind(id.to_hex())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_blob(&self, id: &FileId) -> Result<bool> {
        let blob_id = id.to_hex();
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM blob_chunks WHERE blob_id = ?")
            .bind(&blob_id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM blobs WHERE id = ?")
            .bind(&blob_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_blob_ids(&self) -> Result<Vec<FileId>> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT id FROM blobs")
            .fetch_all(&self.pool)
            .await?;
        Ok(parse_ids(rows, "blobs"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup_store(chunk_size: usize) -> SqliteStore {
        SqliteStore::open_in_memory(chunk_size).await.unwrap()
    }

    fn sample_record(name: &str) -> FileRecord {
        FileRecord::new(FileId::generate(), name, 5, Utc::now())
    }

    async fn put_blob(store: &SqliteStore, id: &FileId, data: &[u8]) -> u64 {
        let mut reader: &[u8] = data;
        store
            .upload_blob(id, "blob", data.len() as u64, &mut reader)
            .await
            .unwrap()
    }

    async fn chunk_count(store: &SqliteStore, id: &FileId) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM blob_chunks WHERE blob_id = ?")
            .bind(id.to_hex())
            .fetch_one(store.pool())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_migrations_applied() {
        let store = setup_store(16).await;
        assert_eq!(store.schema_version().await.unwrap() as usize, MIGRATIONS.len());
    }

    #[tokio::test]
    async fn test_open_file_database_twice() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("nested/depot.db");

        let store = SqliteStore::open(&path, 16).await.unwrap();
        let record = sample_record("a.txt");
        store.insert_pending(&record).await.unwrap();
        store.mark_complete(&record.id).await.unwrap();
        store.pool().close().await;

        let reopened = SqliteStore::open(&path, 16).await.unwrap();
        assert_eq!(reopened.find_record(&record.id).await.unwrap(), Some(record));
    }

    #[tokio::test]
    async fn test_zero_chunk_size_rejected() {
        assert!(matches!(
            SqliteStore::open_in_memory(0).await,
            Err(DepotError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_pending_record_hidden_until_complete() {
        let store = setup_store(16).await;
        let record = sample_record("a.txt");

        store.insert_pending(&record).await.unwrap();
        assert_eq!(store.find_record(&record.id).await.unwrap(), None);
        assert!(store.list_records().await.unwrap().is_empty());
        assert_eq!(store.list_record_ids().await.unwrap(), vec![record.id]);

        assert!(store.mark_complete(&record.id).await.unwrap());
        assert!(!store.mark_complete(&record.id).await.unwrap());
        assert_eq!(store.find_record(&record.id).await.unwrap(), Some(record.clone()));
        assert_eq!(store.list_records().await.unwrap(), vec![record]);
    }

    #[tokio::test]
    async fn test_update_and_delete_record() {
        let store = setup_store(16).await;
        let record = sample_record("a.txt");
        store.insert_pending(&record).await.unwrap();

        // Pending records cannot be renamed or deleted through the public path.
        assert!(!store.update_name(&record.id, "b.txt").await.unwrap());
        assert!(!store.delete_record(&record.id).await.unwrap());

        store.mark_complete(&record.id).await.unwrap();
        assert!(store.update_name(&record.id, "b.txt").await.unwrap());
        let found = store.find_record(&record.id).await.unwrap().unwrap();
        assert_eq!(found.name, "b.txt");
        assert_eq!(found.size, record.size);
        assert_eq!(found.date, record.date);

        assert!(store.delete_record(&record.id).await.unwrap());
        assert!(!store.delete_record(&record.id).await.unwrap());
        assert_eq!(store.find_record(&record.id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_pending_before_and_discard() {
        let store = setup_store(16).await;
        let stale = sample_record("stale.txt");
        let done = sample_record("done.txt");
        store.insert_pending(&stale).await.unwrap();
        store.insert_pending(&done).await.unwrap();
        store.mark_complete(&done.id).await.unwrap();

        let past = Utc::now() - chrono::Duration::hours(1);
        assert!(store.list_pending_before(past).await.unwrap().is_empty());

        let future = Utc::now() + chrono::Duration::seconds(1);
        assert_eq!(store.list_pending_before(future).await.unwrap(), vec![stale.id]);

        assert!(!store.discard_pending(&done.id).await.unwrap());
        assert!(store.discard_pending(&stale.id).await.unwrap());
        assert_eq!(store.list_record_ids().await.unwrap(), vec![done.id]);
    }

    #[tokio::test]
    async fn test_blob_roundtrip_across_chunks() {
        let store = setup_store(4).await;
        let id = FileId::generate();
        let data: Vec<u8> = (0..=9).collect();

        assert_eq!(put_blob(&store, &id, &data).await, 10);
        assert_eq!(chunk_count(&store, &id).await, 3);

        let mut out: Vec<u8> = Vec::new();
        assert_eq!(store.download_blob(&id, &mut out).await.unwrap(), 10);
        assert_eq!(out, data);
    }

    #[tokio::test]
    async fn test_blob_exact_chunk_multiple() {
        let store = setup_store(4).await;
        let id = FileId::generate();

        assert_eq!(put_blob(&store, &id, b"abcdefgh").await, 8);
        assert_eq!(chunk_count(&store, &id).await, 2);

        let mut out: Vec<u8> = Vec::new();
        store.download_blob(&id, &mut out).await.unwrap();
        assert_eq!(out, b"abcdefgh");
    }

    #[tokio::test]
    async fn test_empty_blob() {
        let store = setup_store(4).await;
        let id = FileId::generate();

        assert_eq!(put_blob(&store, &id, b"").await, 0);
        assert_eq!(chunk_count(&store, &id).await, 0);

        let mut out: Vec<u8> = Vec::new();
        assert_eq!(store.download_blob(&id, &mut out).await.unwrap(), 0);
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn test_download_missing_blob() {
        let store = setup_store(4).await;
        let mut out: Vec<u8> = Vec::new();

        let result = store.download_blob(&FileId::generate(), &mut out).await;
        assert!(matches!(result, Err(DepotError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_download_detects_missing_chunk() {
        let store = setup_store(4).await;
        let id = FileId::generate();
        put_blob(&store, &id, b"abcdefghij").await;

        sqlx::query("DELETE FROM blob_chunks WHERE blob_id = ? AND n = 1")
            .bind(id.to_hex())
            .execute(store.pool())
            .await
            .unwrap();

        let mut out: Vec<u8> = Vec::new();
        let result = store.download_blob(&id, &mut out).await;
        assert!(matches!(result, Err(DepotError::Blob(_))));
    }

    #[tokio::test]
    async fn test_duplicate_blob_id_rejected() {
        let store = setup_store(4).await;
        let id = FileId::generate();
        put_blob(&store, &id, b"first").await;

        let mut reader: &[u8] = b"second";
        let result = store.upload_blob(&id, "again", 6, &mut reader).await;
        assert!(matches!(result, Err(DepotError::Database(_))));

        let mut out: Vec<u8> = Vec::new();
        store.download_blob(&id, &mut out).await.unwrap();
        assert_eq!(out, b"first");
    }

    #[tokio::test]
    async fn test_rename_and_delete_blob() {
        let store = setup_store(4).await;
        let id = FileId::generate();
        put_blob(&store, &id, b"abcdefghij").await;

        assert!(store.rename_blob(&id, "renamed.bin").await.unwrap());
        let filename: String = sqlx::query_scalar("SELECT filename FROM blobs WHERE id = ?")
            .bind(id.to_hex())
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(filename, "renamed.bin");

        assert_eq!(store.list_blob_ids().await.unwrap(), vec![id]);
        assert!(store.delete_blob(&id).await.unwrap());
        assert!(!store.delete_blob(&id).await.unwrap());
        assert!(!store.rename_blob(&id, "gone").await.unwrap());
        assert_eq!(chunk_count(&store, &id).await, 0);
        assert!(store.list_blob_ids().await.unwrap().is_empty());
    }
}
