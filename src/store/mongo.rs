//! MongoDB store: a metadata collection plus a GridFS bucket.

use std::time::Duration;

use async_trait::async_trait;
use bson::oid::ObjectId;
use bson::{doc, Bson, Document};
use chrono::{DateTime, Utc};
use futures::io::{AsyncReadExt as _, AsyncWriteExt as _};
use futures::TryStreamExt;
use mongodb::error::{ErrorKind, GridFsErrorKind};
use mongodb::gridfs::GridFsBucket;
use mongodb::options::{ClientOptions, GridFsBucketOptions};
use mongodb::{Client, Collection, Database, IndexModel};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt as _};
use tracing::{debug, info, warn};

use super::{read_full, FileStore, COPY_BUFFER_SIZE};
use crate::config::StoreConfig;
use crate::file::{FileId, FileRecord};
use crate::{DepotError, Result};

/// A metadata document as stored in the collection.
///
/// Documents written before the two-phase insert existed have neither
/// `pending` nor `created_at`, and count as complete.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct FileDocument {
    #[serde(rename = "_id")]
    id: ObjectId,
    name: String,
    size: String,
    date: String,
    #[serde(default)]
    pending: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    created_at: Option<bson::DateTime>,
}

impl FileDocument {
    fn pending(record: &FileRecord) -> Self {
        Self {
            id: record.id.as_object_id(),
            name: record.name.clone(),
            size: record.size.clone(),
            date: record.date.clone(),
            pending: true,
            created_at: Some(bson::DateTime::now()),
        }
    }
}

impl From<FileDocument> for FileRecord {
    fn from(doc: FileDocument) -> Self {
        FileRecord {
            id: doc.id.into(),
            name: doc.name,
            size: doc.size,
            date: doc.date,
        }
    }
}

fn complete_filter(id: &FileId) -> Document {
    doc! { "_id": id.as_object_id(), "pending": { "$ne": true } }
}

fn blob_id(id: &FileId) -> Bson {
    Bson::ObjectId(id.as_object_id())
}

fn is_file_not_found(e: &mongodb::error::Error) -> bool {
    matches!(
        *e.kind,
        ErrorKind::GridFs(GridFsErrorKind::FileNotFound { .. })
    )
}

/// Collect `_id` values from an id-only cursor, skipping non-ObjectId ids.
async fn collect_ids(cursor: mongodb::Cursor<Document>, source: &str) -> Result<Vec<FileId>> {
    let docs: Vec<Document> = cursor.try_collect().await?;
    Ok(docs
        .into_iter()
        .filter_map(|d| match d.get_object_id("_id") {
            Ok(oid) => Some(FileId::from(oid)),
            Err(_) => {
                warn!(source, "Skipping document without an ObjectId _id");
                None
            }
        })
        .collect())
}

/// MongoDB implementation of [`FileStore`].
#[derive(Clone)]
pub struct MongoStore {
    db: Database,
    records: Collection<FileDocument>,
    raw_records: Collection<Document>,
    bucket: GridFsBucket,
    blob_files: Collection<Document>,
}

impl MongoStore {
    /// Connect to the server named in `config` and verify it answers.
    pub async fn connect(config: &StoreConfig) -> Result<Self> {
        info!("Connecting to MongoDB at {}", config.url);

        let mut options = ClientOptions::parse(&config.url)
            .await
            .map_err(|e| DepotError::Database(format!("invalid MongoDB url: {e}")))?;
        // Fail fast instead of hanging on an unreachable server.
        options.server_selection_timeout = Some(Duration::from_secs(3));
        options.connect_timeout = Some(Duration::from_secs(3));

        let client = Client::with_options(options).map_err(|e| {
            DepotError::Database(format!("failed to connect to MongoDB: {e}"))
        })?;
        let db = client.database(&config.database);

        let bucket = db.gridfs_bucket(
            GridFsBucketOptions::builder()
                .bucket_name(config.bucket.clone())
                .chunk_size_bytes(config.chunk_size_bytes)
                .build(),
        );

        let store = Self {
            records: db.collection(&config.collection),
            raw_records: db.collection(&config.collection),
            blob_files: db.collection(&format!("{}.files", config.bucket)),
            bucket,
            db,
        };
        store.ping().await?;
        store.apply_indexes().await?;

        info!(
            database = %config.database,
            collection = %config.collection,
            bucket = %config.bucket,
            "Connected to MongoDB"
        );
        Ok(store)
    }

    async fn apply_indexes(&self) -> Result<()> {
        let index = IndexModel::builder()
            .keys(doc! { "pending": 1, "created_at": 1 })
            .build();
        self.records
            .create_index(index)
            .await
            .map_err(|e| DepotError::Database(format!("failed to create indexes: {e}")))?;
        Ok(())
    }
}

impl std::fmt::Debug for MongoStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MongoStore")
            .field("database", &self.db.name())
            .field("collection", &self.records.name())
            .finish()
    }
}

#[async_trait]
impl FileStore for MongoStore {
    fn backend_name(&self) -> &'static str {
        "mongodb"
    }

    async fn ping(&self) -> Result<()> {
        self.db
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| DepotError::Database(format!("MongoDB ping failed: {e}")))?;
        Ok(())
    }

    async fn insert_pending(&self, record: &FileRecord) -> Result<()> {
        self.records
            .insert_one(FileDocument::pending(record))
            .await?;
        Ok(())
    }

    async fn mark_complete(&self, id: &FileId) -> Result<bool> {
        let result = self
            .records
            .update_one(
                doc! { "_id": id.as_object_id(), "pending": true },
                doc! { "$set": { "pending": false } },
            )
            .await?;
        Ok(result.matched_count > 0)
    }

    async fn find_record(&self, id: &FileId) -> Result<Option<FileRecord>> {
        let found = self.records.find_one(complete_filter(id)).await?;
        Ok(found.map(FileRecord::from))
    }

    async fn list_records(&self) -> Result<Vec<FileRecord>> {
        let cursor = self
            .records
            .find(doc! { "pending": { "$ne": true } })
            .await?;
        let docs: Vec<FileDocument> = cursor.try_collect().await?;
        Ok(docs.into_iter().map(FileRecord::from).collect())
    }

    async fn update_name(&self, id: &FileId, name: &str) -> Result<bool> {
        let result = self
            .records
            .update_one(complete_filter(id), doc! { "$set": { "name": name } })
            .await?;
        Ok(result.matched_count > 0)
    }

    async fn delete_record(&self, id: &FileId) -> Result<bool> {
        let result = self.records.delete_one(complete_filter(id)).await?;
        Ok(result.deleted_count > 0)
    }

    async fn list_pending_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<FileId>> {
        let cursor = self
            .raw_records
            .find(doc! {
                "pending": true,
                "created_at": { "$lt": bson::DateTime::from_chrono(cutoff) },
            })
            .projection(doc! { "_id": 1 })
            .await?;
        collect_ids(cursor, "records").await
    }

    async fn discard_pending(&self, id: &FileId) -> Result<bool> {
        let result = self
            .records
            .delete_one(doc! { "_id": id.as_object_id(), "pending": true })
            .await?;
        Ok(result.deleted_count > 0)
    }

    async fn list_record_ids(&self) -> Result<Vec<FileId>> {
        let cursor = self
            .raw_records
            .find(doc! {})
            .projection(doc! { "_id": 1 })
            .await?;
        collect_ids(cursor, "records").await
    }

    async fn upload_blob(
        &self,
        id: &FileId,
        name: &str,
        size: u64,
        reader: &mut (dyn AsyncRead + Unpin + Send),
    ) -> Result<u64> {
        let mut upload = self
            .bucket
            .open_upload_stream(name)
            .id(blob_id(id))
            .metadata(doc! { "size": size as i64 })
            .await?;

        let mut buf = vec![0u8; COPY_BUFFER_SIZE];
        let mut total: u64 = 0;
        loop {
            let read = match read_full(reader, &mut buf).await {
                Ok(n) => n,
                Err(e) => {
                    if let Err(abort_err) = upload.abort().await {
                        warn!(id = %id, error = %abort_err, "Failed to abort blob upload");
                    }
                    return Err(DepotError::Blob(format!("failed to read upload: {e}")));
                }
            };
            if read == 0 {
                break;
            }
            if let Err(e) = upload.write_all(&buf[..read]).await {
                if let Err(abort_err) = upload.abort().await {
                    warn!(id = %id, error = %abort_err, "Failed to abort blob upload");
                }
                return Err(DepotError::Blob(format!("failed to write blob: {e}")));
            }
            total += read as u64;
        }

        upload
            .close()
            .await
            .map_err(|e| DepotError::Blob(format!("failed to finalize blob: {e}")))?;

        debug!(id = %id, bytes = total, "Blob stored");
        Ok(total)
    }

    async fn download_blob(
        &self,
        id: &FileId,
        writer: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> Result<u64> {
        let mut download = match self.bucket.open_download_stream(blob_id(id)).await {
            Ok(stream) => stream,
            Err(e) if is_file_not_found(&e) => {
                return Err(DepotError::NotFound("blob".to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        let mut buf = vec![0u8; COPY_BUFFER_SIZE];
        let mut total: u64 = 0;
        loop {
            let read = download
                .read(&mut buf)
                .await
                .map_err(|e| DepotError::Blob(format!("failed to read blob: {e}")))?;
            if read == 0 {
                break;
            }
            writer
                .write_all(&buf[..read])
                .await
                .map_err(|e| DepotError::Blob(format!("failed to write download: {e}")))?;
            total += read as u64;
        }
        Ok(total)
    }

    async fn rename_blob(&self, id: &FileId, name: &str) -> Result<bool> {
        match self.bucket.rename(blob_id(id), name).await {
            Ok(()) => Ok(true),
            Err(e) if is_file_not_found(&e) => Ok(false),
            Err(e) => Err(DepotError::Blob(format!("failed to rename blob: {e}"))),
        }
    }

    async fn delete_blob(&self, id: &FileId) -> Result<bool> {
        match self.bucket.delete(blob_id(id)).await {
            Ok(()) => Ok(true),
            Err(e) if is_file_not_found(&e) => Ok(false),
            Err(e) => Err(DepotError::Blob(format!("failed to delete blob: {e}"))),
        }
    }

    async fn list_blob_ids(&self) -> Result<Vec<FileId>> {
        let cursor = self
            .blob_files
            .find(doc! {})
            .projection(doc! { "_id": 1 })
            .await?;
        collect_ids(cursor, "blobs").await
    }
}
