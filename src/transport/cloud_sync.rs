//! Cloud-sync-folder backend adapter
//!
//! Serves attachments out of a locally synced cloud folder (the sync
//! client itself moves bytes to and from the cloud). Version tokens are
//! sha1 content hashes, so "remote advanced" means the synced file's
//! bytes changed. Layout: `<sync_dir>/<attachment key>/<filename>`.

use std::path::{Path, PathBuf};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info};

use crate::attachment::AttachmentRecord;
use crate::hash::sha1_hex_of_file;

use super::{CancelFlag, ProgressFn, TransportError};

/// Read/write chunk size; also the cancellation poll granularity
const CHUNK_SIZE: usize = 64 * 1024;

/// Transport backed by a locally synced cloud folder
pub struct CloudSyncTransport {
    sync_dir: PathBuf,
}

impl CloudSyncTransport {
    pub fn new(sync_dir: impl Into<PathBuf>) -> Self {
        Self {
            sync_dir: sync_dir.into(),
        }
    }

    fn remote_path(&self, record: &AttachmentRecord) -> PathBuf {
        self.sync_dir
            .join(record.key.as_str())
            .join(&record.filename)
    }

    pub async fn probe_remote_version(
        &self,
        record: &AttachmentRecord,
    ) -> Result<Option<String>, TransportError> {
        let path = self.remote_path(record);
        if !path.exists() {
            return Ok(None);
        }
        let hash = sha1_hex_of_file(&path)?;
        debug!(key = %record.key, version = %hash, "Probed cloud-sync file");
        Ok(Some(hash))
    }

    pub async fn fetch(
        &self,
        record: &AttachmentRecord,
        dest: &Path,
        progress: ProgressFn<'_>,
        cancel: &CancelFlag,
    ) -> Result<String, TransportError> {
        let path = self.remote_path(record);
        if !path.exists() {
            return Err(TransportError::NotFound(format!(
                "no synced file for attachment {}",
                record.key
            )));
        }

        // Hash first so the returned token matches the bytes we stream
        let version = sha1_hex_of_file(&path)?;

        let mut src = tokio::fs::File::open(&path).await?;
        let total = src.metadata().await.map(|m| m.len()).ok();
        let mut out = tokio::fs::File::create(dest).await?;
        let mut buf = vec![0u8; CHUNK_SIZE];
        let mut written: u64 = 0;

        loop {
            cancel.check()?;
            let n = src.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            out.write_all(&buf[..n]).await?;
            written += n as u64;
            progress(written, total);
        }
        out.flush().await?;

        info!(key = %record.key, size = written, version = %version, "Copied attachment from cloud-sync folder");
        Ok(version)
    }

    pub async fn push(
        &self,
        record: &AttachmentRecord,
        local_path: &Path,
        expected_version: Option<&str>,
    ) -> Result<String, TransportError> {
        let path = self.remote_path(record);

        // Detect a sync-client race before overwriting
        if let Some(expected) = expected_version {
            if path.exists() {
                let actual = sha1_hex_of_file(&path)?;
                if actual != expected {
                    return Err(TransportError::Conflict {
                        expected: expected.to_string(),
                        actual,
                    });
                }
            }
        }

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Write through a temp file in the same directory so the sync
        // client never observes a half-written attachment
        let parent = path.parent().unwrap_or(&self.sync_dir);
        let tmp = tempfile::NamedTempFile::new_in(parent)?;
        tokio::fs::copy(local_path, tmp.path()).await?;
        let version = sha1_hex_of_file(tmp.path())?;
        tmp.persist(&path)
            .map_err(|e| TransportError::Io(e.error))?;

        info!(key = %record.key, version = %version, "Copied attachment into cloud-sync folder");
        Ok(version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attachment::{AttachmentKey, LinkMode};
    use crate::hash::sha1_hex;

    fn record(key: &str, filename: &str) -> AttachmentRecord {
        AttachmentRecord {
            key: AttachmentKey::from(key),
            library_id: 1,
            link_mode: LinkMode::ImportedFile,
            content_type: "application/pdf".to_string(),
            filename: filename.to_string(),
            charset: None,
            url: None,
            size_bytes: 0,
            server_version: None,
        }
    }

    fn seed(dir: &Path, record: &AttachmentRecord, contents: &[u8]) {
        let path = dir.join(record.key.as_str()).join(&record.filename);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, contents).unwrap();
    }

    #[tokio::test]
    async fn probe_reports_content_hash_or_absence() {
        let dir = tempfile::tempdir().unwrap();
        let transport = CloudSyncTransport::new(dir.path());
        let rec = record("KEY1", "paper.pdf");

        assert_eq!(transport.probe_remote_version(&rec).await.unwrap(), None);

        seed(dir.path(), &rec, b"hello");
        assert_eq!(
            transport.probe_remote_version(&rec).await.unwrap(),
            Some(sha1_hex(b"hello"))
        );
    }

    #[tokio::test]
    async fn fetch_streams_bytes_and_reports_progress() {
        let dir = tempfile::tempdir().unwrap();
        let transport = CloudSyncTransport::new(dir.path());
        let rec = record("KEY1", "paper.pdf");
        seed(dir.path(), &rec, b"some attachment bytes");

        let dest = dir.path().join("staged.tmp");
        let seen = std::sync::Mutex::new(0u64);
        let version = transport
            .fetch(
                &rec,
                &dest,
                &|bytes, _total| *seen.lock().unwrap() = bytes,
                &CancelFlag::new(),
            )
            .await
            .unwrap();

        assert_eq!(version, sha1_hex(b"some attachment bytes"));
        assert_eq!(std::fs::read(&dest).unwrap(), b"some attachment bytes");
        assert_eq!(*seen.lock().unwrap(), 21);
    }

    #[tokio::test]
    async fn cancelled_fetch_unwinds_before_copying() {
        let dir = tempfile::tempdir().unwrap();
        let transport = CloudSyncTransport::new(dir.path());
        let rec = record("KEY1", "paper.pdf");
        seed(dir.path(), &rec, b"bytes");

        let cancel = CancelFlag::new();
        cancel.trip();

        let dest = dir.path().join("staged.tmp");
        let result = transport
            .fetch(&rec, &dest, &|_, _| {}, &cancel)
            .await;
        assert!(matches!(result, Err(TransportError::Cancelled)));
    }

    #[tokio::test]
    async fn push_detects_remote_change() {
        let dir = tempfile::tempdir().unwrap();
        let transport = CloudSyncTransport::new(dir.path());
        let rec = record("KEY1", "paper.pdf");
        seed(dir.path(), &rec, b"remote edit");

        let local = dir.path().join("local.pdf");
        std::fs::write(&local, b"my edit").unwrap();

        // Expected token is stale relative to the synced file
        let result = transport
            .push(&rec, &local, Some(&sha1_hex(b"old contents")))
            .await;
        assert!(matches!(result, Err(TransportError::Conflict { .. })));

        // Matching token goes through and returns the new hash
        let version = transport
            .push(&rec, &local, Some(&sha1_hex(b"remote edit")))
            .await
            .unwrap();
        assert_eq!(version, sha1_hex(b"my edit"));
    }
}
