//! File service for filedepot.
//!
//! Keeps metadata records and blobs in lock-step: every complete record has a
//! blob under the same id and vice versa.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{error, info, warn};

use super::staging::{StagedUpload, Staging};
use super::{validate_name, FileId, FileRecord};
use crate::store::FileStore;
use crate::{DepotError, Result};

/// Outcome of a reconciliation sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Pending records past the grace period that were discarded.
    pub stale_pending: usize,
    /// Blobs without any metadata record that were deleted.
    pub orphan_blobs: usize,
    /// Repairs that failed. They are retried by the next sweep.
    pub failed: usize,
}

impl ReconcileReport {
    /// Whether the sweep found nothing to repair.
    pub fn is_clean(&self) -> bool {
        self.stale_pending == 0 && self.orphan_blobs == 0 && self.failed == 0
    }
}

/// Storage adapter used by the HTTP handlers.
pub struct FileService {
    store: Arc<dyn FileStore>,
    staging: Staging,
    max_upload_size: u64,
}

impl FileService {
    /// Create a new FileService.
    pub fn new(store: Arc<dyn FileStore>, staging: Staging, max_upload_size: u64) -> Self {
        Self {
            store,
            staging,
            max_upload_size,
        }
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<dyn FileStore> {
        &self.store
    }

    /// The staging directories.
    pub fn staging(&self) -> &Staging {
        &self.staging
    }

    /// Maximum upload size in bytes.
    pub fn max_upload_size(&self) -> u64 {
        self.max_upload_size
    }

    /// Open a staged upload bounded by the upload limit.
    pub async fn stage_upload(&self) -> Result<StagedUpload> {
        self.staging.create_upload(self.max_upload_size).await
    }

    /// Store a staged upload under a fresh id.
    ///
    /// The record is inserted as pending, the blob uploaded, and only then is
    /// the record marked complete. Any failure after the pending insert removes
    /// both the partial blob and the record. The staged file is removed when
    /// this returns.
    pub async fn insert(&self, mut staged: StagedUpload, name: &str) -> Result<FileId> {
        let name = validate_name(name)?;
        staged.finish().await?;

        let size = staged.len();
        let record = FileRecord::new(FileId::generate(), name, size, Utc::now());
        self.store.insert_pending(&record).await?;

        if let Err(e) = self.upload_and_complete(&staged, &record).await {
            error!(id = %record.id, error = %e, "INSERT failed, rolling back");
            self.rollback_insert(&record.id).await;
            return Err(e);
        }

        info!(id = %record.id, name = %record.name, size, "INSERT file");
        Ok(record.id)
    }

    async fn upload_and_complete(&self, staged: &StagedUpload, record: &FileRecord) -> Result<()> {
        let size = staged.len();
        let mut reader = staged.open_reader().await?;
        let written = self
            .store
            .upload_blob(&record.id, &record.name, size, &mut reader)
            .await?;
        if written != size {
            return Err(DepotError::Blob(format!(
                "stored {written} of {size} bytes for {}",
                record.id
            )));
        }

        if !self.store.mark_complete(&record.id).await? {
            return Err(DepotError::Blob(format!(
                "pending record {} disappeared during upload",
                record.id
            )));
        }
        Ok(())
    }

    async fn rollback_insert(&self, id: &FileId) {
        if let Err(e) = self.store.delete_blob(id).await {
            warn!(id = %id, error = %e, "Failed to remove partial blob");
        }
        if let Err(e) = self.store.discard_pending(id).await {
            warn!(id = %id, error = %e, "Failed to remove pending record");
        }
    }

    /// Look up a record and publish its blob to the output directory.
    pub async fn find_one(&self, id: &str) -> Result<FileRecord> {
        let id = FileId::parse(id)?;
        let record = self.require_record(&id).await?;

        let mut download = self.staging.create_download().await?;
        self.store
            .download_blob(&id, download.writer())
            .await
            .map_err(|e| match e {
                DepotError::NotFound(_) => DepotError::Blob(format!("blob for {id} is missing")),
                other => other,
            })?;
        let path = download
            .publish(self.staging.output_path_for(&record))
            .await?;

        info!(id = %id, path = %path.display(), "FIND file");
        Ok(record)
    }

    /// Look up a record without touching its blob.
    pub async fn find_info(&self, id: &str) -> Result<FileRecord> {
        let id = FileId::parse(id)?;
        self.require_record(&id).await
    }

    /// Every complete record.
    pub async fn find_all(&self) -> Result<Vec<FileRecord>> {
        self.store.list_records().await
    }

    /// Rename a file. Only the name changes; size and date are kept.
    pub async fn update(&self, name: &str, id: &str) -> Result<()> {
        let id = FileId::parse(id)?;
        let name = validate_name(name)?;
        self.require_record(&id).await?;

        if !self.store.rename_blob(&id, &name).await? {
            return Err(DepotError::Blob(format!("blob for {id} is missing")));
        }
        if !self.store.update_name(&id, &name).await? {
            return Err(DepotError::NotFound("file".to_string()));
        }

        info!(id = %id, name = %name, "UPDATE file");
        Ok(())
    }

    /// Delete a record and its blob.
    pub async fn delete(&self, id: &str) -> Result<()> {
        let id = FileId::parse(id)?;
        if !self.store.delete_record(&id).await? {
            return Err(DepotError::NotFound("file".to_string()));
        }
        if !self.store.delete_blob(&id).await? {
            warn!(id = %id, "Deleted record had no blob");
        }

        info!(id = %id, "DELETE file");
        Ok(())
    }

    /// Repair anything a crash left behind, treating pending records older
    /// than `grace` as abandoned.
    pub async fn reconcile(&self, grace: Duration) -> Result<ReconcileReport> {
        self.reconcile_before(Utc::now() - grace).await
    }

    /// Discard pending records created before `cutoff` and delete blobs that
    /// have no record.
    pub async fn reconcile_before(&self, cutoff: DateTime<Utc>) -> Result<ReconcileReport> {
        let mut report = ReconcileReport::default();

        for id in self.store.list_pending_before(cutoff).await? {
            // The record goes first so an upload completing right now keeps its blob.
            match self.store.discard_pending(&id).await {
                Ok(true) => {}
                Ok(false) => continue,
                Err(e) => {
                    warn!(id = %id, error = %e, "Reconcile: failed to discard pending record");
                    report.failed += 1;
                    continue;
                }
            }
            report.stale_pending += 1;
            // A blob left behind here is picked up as an orphan below.
            if let Err(e) = self.store.delete_blob(&id).await {
                warn!(id = %id, error = %e, "Reconcile: failed to delete stale blob");
            }
        }

        // Blobs are listed before records: every blob's record is inserted
        // before the blob upload starts.
        let blob_ids = self.store.list_blob_ids().await?;
        let record_ids: HashSet<FileId> = self.store.list_record_ids().await?.into_iter().collect();
        for id in blob_ids.into_iter().filter(|id| !record_ids.contains(id)) {
            match self.store.delete_blob(&id).await {
                Ok(true) => report.orphan_blobs += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(id = %id, error = %e, "Reconcile: failed to delete orphan blob");
                    report.failed += 1;
                }
            }
        }

        if report.failed > 0 {
            warn!(
                stale_pending = report.stale_pending,
                orphan_blobs = report.orphan_blobs,
                failed = report.failed,
                "Reconcile: finished with failures"
            );
        } else if report.is_clean() {
            info!("Reconcile: nothing to repair");
        } else {
            info!(
                stale_pending = report.stale_pending,
                orphan_blobs = report.orphan_blobs,
                "Reconcile: repaired store"
            );
        }
        Ok(report)
    }

    async fn require_record(&self, id: &FileId) -> Result<FileRecord> {
        self.store
            .find_record(id)
            .await?
            .ok_or_else(|| DepotError::NotFound("file".to_string()))
    }
}
