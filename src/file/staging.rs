//! Local staging directories for filedepot.
//!
//! Uploads are spooled to a uniquely named temporary file in the input
//! directory before they are handed to the blob store. Downloads are written
//! to a temporary file in the output directory and renamed into place once
//! complete. Temporary files are removed when dropped.
//!
//! ```text
//! {input_path}/
//! └── upload-Xa81Kq.part      (lives for one request)
//! {output_path}/
//! ├── report.txt              (published download)
//! └── .download-P0s7Tz.part   (in flight)
//! ```

use std::path::{Path, PathBuf};

use tempfile::{Builder, NamedTempFile};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

use super::{safe_file_name, FileRecord};
use crate::{DepotError, Result};

const UPLOAD_PREFIX: &str = "upload-";
const DOWNLOAD_PREFIX: &str = ".download-";
const PART_SUFFIX: &str = ".part";

/// Input and output staging directories.
#[derive(Debug, Clone)]
pub struct Staging {
    input_dir: PathBuf,
    output_dir: PathBuf,
}

impl Staging {
    /// Create the staging area. Both directories are created if missing.
    pub fn new(input_dir: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Result<Self> {
        let input_dir = input_dir.into();
        let output_dir = output_dir.into();
        std::fs::create_dir_all(&input_dir)?;
        std::fs::create_dir_all(&output_dir)?;

        Ok(Self {
            input_dir,
            output_dir,
        })
    }

    /// Directory uploads are staged in.
    pub fn input_dir(&self) -> &Path {
        &self.input_dir
    }

    /// Directory downloads are published to.
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Open a new staged upload that refuses to grow beyond `limit` bytes.
    pub async fn create_upload(&self, limit: u64) -> Result<StagedUpload> {
        let (file, writer) = create_part(self.input_dir.clone(), UPLOAD_PREFIX).await?;

        Ok(StagedUpload {
            file,
            writer,
            len: 0,
            limit,
        })
    }

    /// Open a new temporary download target in the output directory.
    pub async fn create_download(&self) -> Result<StagedDownload> {
        let (file, writer) = create_part(self.output_dir.clone(), DOWNLOAD_PREFIX).await?;

        Ok(StagedDownload { file, writer })
    }

    /// Where the download of `record` is published.
    pub fn output_path_for(&self, record: &FileRecord) -> PathBuf {
        self.output_dir
            .join(safe_file_name(&record.name, &record.id.to_hex()))
    }
}

/// Create a `.part` file in `dir` plus an async writer over it.
///
/// Temp file creation is blocking, so it runs on the blocking pool.
async fn create_part(dir: PathBuf, prefix: &'static str) -> Result<(NamedTempFile, File)> {
    let (file, handle) = run_blocking(move || {
        let file = Builder::new()
            .prefix(prefix)
            .suffix(PART_SUFFIX)
            .tempfile_in(&dir)?;
        let handle = file.reopen()?;
        Ok((file, handle))
    })
    .await?;

    Ok((file, File::from_std(handle)))
}

async fn run_blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> std::io::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| DepotError::Io(std::io::Error::other(e)))?
        .map_err(DepotError::Io)
}

/// An upload being spooled to the input staging directory.
#[derive(Debug)]
pub struct StagedUpload {
    file: NamedTempFile,
    writer: File,
    len: u64,
    limit: u64,
}

impl StagedUpload {
    /// Append a chunk of the upload.
    pub async fn write_chunk(&mut self, chunk: &[u8]) -> Result<()> {
        let new_len = self.len + chunk.len() as u64;
        if new_len > self.limit {
            return Err(DepotError::PayloadTooLarge(self.limit));
        }
        self.writer.write_all(chunk).await?;
        self.len = new_len;
        Ok(())
    }

    /// Flush everything written so far to disk.
    pub async fn finish(&mut self) -> Result<()> {
        self.writer.flush().await?;
        self.writer.sync_all().await?;
        Ok(())
    }

    /// Bytes written so far.
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Whether nothing has been written.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Path of the staging file.
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Open an independent reader over the staged bytes.
    pub async fn open_reader(&self) -> Result<File> {
        Ok(File::open(self.file.path()).await?)
    }
}

/// A download being written to the output staging directory.
#[derive(Debug)]
pub struct StagedDownload {
    file: NamedTempFile,
    writer: File,
}

impl StagedDownload {
    /// Writer for the downloaded bytes.
    pub fn writer(&mut self) -> &mut File {
        &mut self.writer
    }

    /// Path of the in-flight temporary file.
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Flush and atomically move the download to `dest`, replacing any
    /// previous file of the same name.
    pub async fn publish(mut self, dest: impl AsRef<Path>) -> Result<PathBuf> {
        self.writer.flush().await?;
        self.writer.sync_all().await?;
        drop(self.writer);

        let dest = dest.as_ref().to_path_buf();
        let file = self.file;
        let target = dest.clone();
        run_blocking(move || file.persist(&target).map(drop).map_err(|e| e.error)).await?;
        Ok(dest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::FileId;
    use chrono::Utc;
    use tempfile::TempDir;
    use tokio::io::AsyncReadExt;

    fn setup_staging() -> (TempDir, Staging) {
        let temp_dir = TempDir::new().unwrap();
        let staging = Staging::new(temp_dir.path().join("in"), temp_dir.path().join("out")).unwrap();
        (temp_dir, staging)
    }

    fn count_entries(dir: &Path) -> usize {
        std::fs::read_dir(dir).unwrap().count()
    }

    #[test]
    fn test_new_creates_directories() {
        let temp_dir = TempDir::new().unwrap();
        let input = temp_dir.path().join("a/in");
        let output = temp_dir.path().join("b/out");

        let staging = Staging::new(&input, &output).unwrap();

        assert!(input.is_dir());
        assert!(output.is_dir());
        assert_eq!(staging.input_dir(), input);
        assert_eq!(staging.output_dir(), output);
    }

    #[tokio::test]
    async fn test_upload_write_and_read_back() {
        let (_temp_dir, staging) = setup_staging();

        let mut upload = staging.create_upload(1024).await.unwrap();
        upload.write_chunk(b"hel").await.unwrap();
        upload.write_chunk(b"lo").await.unwrap();
        upload.finish().await.unwrap();

        assert_eq!(upload.len(), 5);
        assert!(upload.path().starts_with(staging.input_dir()));

        let mut content = Vec::new();
        upload
            .open_reader()
            .await
            .unwrap()
            .read_to_end(&mut content)
            .await
            .unwrap();
        assert_eq!(content, b"hello");
    }

    #[tokio::test]
    async fn test_upload_removed_on_drop() {
        let (_temp_dir, staging) = setup_staging();

        let mut upload = staging.create_upload(1024).await.unwrap();
        upload.write_chunk(b"data").await.unwrap();
        let path = upload.path().to_path_buf();
        assert!(path.exists());

        drop(upload);

        assert!(!path.exists());
        assert_eq!(count_entries(staging.input_dir()), 0);
    }

    #[tokio::test]
    async fn test_upload_limit() {
        let (_temp_dir, staging) = setup_staging();

        let mut upload = staging.create_upload(4).await.unwrap();
        upload.write_chunk(b"abcd").await.unwrap();
        let result = upload.write_chunk(b"e").await;

        assert!(matches!(result, Err(DepotError::PayloadTooLarge(4))));
        assert_eq!(upload.len(), 4);
    }

    #[tokio::test]
    async fn test_concurrent_uploads_do_not_collide() {
        let (_temp_dir, staging) = setup_staging();

        let a = staging.create_upload(1024).await.unwrap();
        let b = staging.create_upload(1024).await.unwrap();

        assert_ne!(a.path(), b.path());
        assert_eq!(count_entries(staging.input_dir()), 2);
    }

    #[tokio::test]
    async fn test_download_publish() {
        let (_temp_dir, staging) = setup_staging();
        let record = FileRecord::new(FileId::generate(), "report.txt", 5, Utc::now());

        let mut download = staging.create_download().await.unwrap();
        download.writer().write_all(b"hello").await.unwrap();
        let temp_path = download.path().to_path_buf();

        let dest = download
            .publish(staging.output_path_for(&record))
            .await
            .unwrap();

        assert_eq!(dest, staging.output_dir().join("report.txt"));
        assert_eq!(std::fs::read(&dest).unwrap(), b"hello");
        assert!(!temp_path.exists());
    }

    #[tokio::test]
    async fn test_download_publish_replaces_existing() {
        let (_temp_dir, staging) = setup_staging();
        let dest = staging.output_dir().join("same.txt");
        std::fs::write(&dest, b"old").unwrap();

        let mut download = staging.create_download().await.unwrap();
        download.writer().write_all(b"new").await.unwrap();
        download.publish(&dest).await.unwrap();

        assert_eq!(std::fs::read(&dest).unwrap(), b"new");
        assert_eq!(count_entries(staging.output_dir()), 1);
    }

    #[tokio::test]
    async fn test_abandoned_download_cleaned_up() {
        let (_temp_dir, staging) = setup_staging();

        let mut download = staging.create_download().await.unwrap();
        download.writer().write_all(b"partial").await.unwrap();
        drop(download);

        assert_eq!(count_entries(staging.output_dir()), 0);
    }

    #[tokio::test]
    async fn test_create_in_missing_directory() {
        let (temp_dir, staging) = setup_staging();
        std::fs::remove_dir_all(temp_dir.path().join("in")).unwrap();
        std::fs::remove_dir_all(temp_dir.path().join("out")).unwrap();

        assert!(matches!(
            staging.create_upload(16).await,
            Err(DepotError::Io(_))
        ));
        assert!(matches!(
            staging.create_download().await,
            Err(DepotError::Io(_))
        ));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_staging_on_single_threaded_runtime() {
        let (temp_dir, staging) = setup_staging();

        let mut upload = staging.create_upload(16).await.unwrap();
        upload.write_chunk(b"abc").await.unwrap();
        upload.finish().await.unwrap();

        let mut download = staging.create_download().await.unwrap();
        download.writer().write_all(b"abc").await.unwrap();
        let dest = download
            .publish(temp_dir.path().join("out/abc.txt"))
            .await
            .unwrap();

        assert_eq!(std::fs::read(dest).unwrap(), b"abc");
        assert_eq!(count_entries(&temp_dir.path().join("out")), 1);
    }

    #[test]
    fn test_output_path_strips_directories() {
        let (_temp_dir, staging) = setup_staging();
        let record = FileRecord::new(FileId::generate(), "../escape.txt", 1, Utc::now());

        assert_eq!(
            staging.output_path_for(&record),
            staging.output_dir().join("escape.txt")
        );
    }
}
