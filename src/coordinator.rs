//! Transfer coordination
//!
//! Owns the single-flight-per-copy guarantee, per-backend concurrency
//! limits, progress/cancellation plumbing, and the retry policy. Each
//! admitted transfer runs as its own tokio task; status flows to all
//! interested callers through a shared watch channel, so duplicate
//! requests coalesce onto one physical transfer and observe the same
//! terminal result.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{watch, Notify, Semaphore};
use tracing::{debug, info, warn};

use crate::attachment::{AttachmentKey, AttachmentRecord, CopyKind};
use crate::cache::CacheStore;
use crate::config::{BackendKind, SyncConfig};
use crate::error::SyncError;
use crate::resolver::{SyncState, VersionResolver};
use crate::transport::{with_retry, CancelFlag, Transport, TransportError};

/// Transfer direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Download,
    Upload,
}

/// Why a job terminated in `Failed`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Network,
    NotFound,
    Permission,
    Conflict,
    Io,
}

/// Terminal failure details, cloneable for the status channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl From<&TransportError> for TransferFailure {
    fn from(err: &TransportError) -> Self {
        let kind = match err {
            TransportError::Network(_) => FailureKind::Network,
            TransportError::NotFound(_) => FailureKind::NotFound,
            TransportError::Permission(_) => FailureKind::Permission,
            TransportError::Conflict { .. } => FailureKind::Conflict,
            TransportError::Io(_) => FailureKind::Io,
            // Cancellation terminates as Cancelled, not Failed
            TransportError::Cancelled => FailureKind::Network,
        };
        TransferFailure {
            kind,
            message: err.to_string(),
        }
    }
}

/// State machine of one transfer job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobState {
    Queued,
    InFlight,
    Completed(PathBuf),
    Failed(TransferFailure),
    Cancelled,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Completed(_) | JobState::Failed(_) | JobState::Cancelled
        )
    }
}

/// Published status of a transfer job
#[derive(Debug, Clone)]
pub struct JobStatus {
    pub state: JobState,
    pub bytes_transferred: u64,
    pub total_bytes: Option<u64>,
}

/// Caller-held handle to a transfer job
///
/// Cloneable; all clones (and all coalesced requesters) observe the same
/// progress and terminal state. Dropping a handle does not cancel the
/// transfer.
#[derive(Clone)]
pub struct JobHandle {
    id: u64,
    key: AttachmentKey,
    copy: CopyKind,
    direction: Direction,
    status: watch::Receiver<JobStatus>,
    cancel: CancelFlag,
    cancel_notify: Arc<Notify>,
}

impl JobHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn key(&self) -> &AttachmentKey {
        &self.key
    }

    pub fn copy(&self) -> CopyKind {
        self.copy
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Current status snapshot
    pub fn status(&self) -> JobStatus {
        self.status.borrow().clone()
    }

    /// Watch channel for progress and state changes
    pub fn subscribe(&self) -> watch::Receiver<JobStatus> {
        self.status.clone()
    }

    /// Request cooperative cancellation
    pub fn cancel(&self) {
        self.cancel.trip();
        self.cancel_notify.notify_one();
    }

    /// Wait for the job to reach a terminal state
    pub async fn wait(&self) -> JobStatus {
        let mut rx = self.status.clone();
        loop {
            let status = rx.borrow().clone();
            if status.state.is_terminal() {
                return status;
            }
            // Sender dropped implies the job task finished; the last
            // value it sent is terminal
            if rx.changed().await.is_err() {
                return rx.borrow().clone();
            }
        }
    }
}

struct ActiveJob {
    id: u64,
    direction: Direction,
    handle: JobHandle,
}

/// Supervises attachment transfers
pub struct TransferCoordinator {
    cache: Arc<CacheStore>,
    transport: Arc<Transport>,
    resolver: Arc<VersionResolver>,
    config: SyncConfig,
    jobs: Mutex<HashMap<(AttachmentKey, CopyKind), ActiveJob>>,
    limits: HashMap<BackendKind, Arc<Semaphore>>,
    next_job_id: AtomicU64,
}

impl TransferCoordinator {
    pub fn new(
        config: SyncConfig,
        transport: Arc<Transport>,
        resolver: Arc<VersionResolver>,
        cache: Arc<CacheStore>,
    ) -> Self {
        let limits = BackendKind::ALL
            .iter()
            .map(|&backend| {
                let permits = config.transfer_limits.for_backend(backend).max(1);
                (backend, Arc::new(Semaphore::new(permits)))
            })
            .collect();

        Self {
            cache,
            transport,
            resolver,
            config,
            jobs: Mutex::new(HashMap::new()),
            limits,
            next_job_id: AtomicU64::new(1),
        }
    }

    pub fn cache(&self) -> &Arc<CacheStore> {
        &self.cache
    }

    pub fn resolver(&self) -> &Arc<VersionResolver> {
        &self.resolver
    }

    /// Live status of any job for the given copy
    pub fn job_status(&self, key: &AttachmentKey, copy: CopyKind) -> Option<JobStatus> {
        let jobs = self.jobs.lock().unwrap();
        jobs.get(&(key.clone(), copy)).map(|j| j.handle.status())
    }

    /// Request a download of the attachment's original copy
    ///
    /// Duplicate requests while a download is queued or in flight return
    /// a handle to the same job. A pending upload for the same attachment
    /// blocks admission until it resolves.
    pub fn request_download(self: &Arc<Self>, record: &AttachmentRecord) -> JobHandle {
        let copy = CopyKind::Original;
        let mut jobs = self.jobs.lock().unwrap();

        if let Some(active) = jobs.get(&(record.key.clone(), copy)) {
            if active.direction == Direction::Download {
                debug!(key = %record.key, job = active.id, "Coalescing duplicate download request");
                return active.handle.clone();
            }
        }

        // Upload and download on the same attachment are mutually
        // exclusive; chain behind the pending upload
        let prior = jobs
            .get(&(record.key.clone(), CopyKind::Modified))
            .filter(|a| a.direction == Direction::Upload)
            .map(|a| a.handle.clone());

        let (handle, tx) = self.new_job(record.key.clone(), copy, Direction::Download);
        jobs.insert(
            (record.key.clone(), copy),
            ActiveJob {
                id: handle.id,
                direction: Direction::Download,
                handle: handle.clone(),
            },
        );
        drop(jobs);

        let this = Arc::clone(self);
        let record = record.clone();
        let job = handle.clone();
        tokio::spawn(async move {
            this.run_download(record, job, tx, prior).await;
        });

        handle
    }

    /// Request an upload of the attachment's modified copy
    ///
    /// Admission requires something to push: a modified copy whose
    /// classification is `Stale`, or `Conflicted` with the caller having
    /// explicitly resolved keep-local. An `UpToDate` push is rejected as
    /// a no-op.
    pub async fn request_upload(
        self: &Arc<Self>,
        record: &AttachmentRecord,
        resolved_keep_local: bool,
    ) -> Result<JobHandle, SyncError> {
        let copy = CopyKind::Modified;

        {
            let jobs = self.jobs.lock().unwrap();
            if let Some(active) = jobs.get(&(record.key.clone(), copy)) {
                if active.direction == Direction::Upload {
                    debug!(key = %record.key, job = active.id, "Coalescing duplicate upload request");
                    return Ok(active.handle.clone());
                }
            }
        }

        let state = self.cache.state(&record.key);
        if state.as_ref().and_then(|s| s.modified.as_ref()).is_none() {
            return Err(SyncError::NothingToPush(record.key.clone()));
        }

        let classification = self.resolver.classify(record, copy, state.as_ref()).await?;
        let force = match classification {
            SyncState::UpToDate => return Err(SyncError::NothingToPush(record.key.clone())),
            SyncState::Conflicted if !resolved_keep_local => {
                return Err(SyncError::ConflictUnresolved(record.key.clone()));
            }
            // Keep-local deliberately overwrites the newer remote, so the
            // push runs unconditionally
            SyncState::Conflicted => true,
            _ => false,
        };

        let mut jobs = self.jobs.lock().unwrap();
        // Re-check under the lock; a duplicate may have been admitted
        // while we were classifying
        if let Some(active) = jobs.get(&(record.key.clone(), copy)) {
            if active.direction == Direction::Upload {
                return Ok(active.handle.clone());
            }
        }

        let prior = jobs
            .get(&(record.key.clone(), CopyKind::Original))
            .filter(|a| a.direction == Direction::Download)
            .map(|a| a.handle.clone());

        let (handle, tx) = self.new_job(record.key.clone(), copy, Direction::Upload);
        jobs.insert(
            (record.key.clone(), copy),
            ActiveJob {
                id: handle.id,
                direction: Direction::Upload,
                handle: handle.clone(),
            },
        );
        drop(jobs);

        let this = Arc::clone(self);
        let record = record.clone();
        let job = handle.clone();
        tokio::spawn(async move {
            this.run_upload(record, job, tx, prior, force).await;
        });

        Ok(handle)
    }

    fn new_job(
        &self,
        key: AttachmentKey,
        copy: CopyKind,
        direction: Direction,
    ) -> (JobHandle, watch::Sender<JobStatus>) {
        let id = self.next_job_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = watch::channel(JobStatus {
            state: JobState::Queued,
            bytes_transferred: 0,
            total_bytes: None,
        });
        let handle = JobHandle {
            id,
            key,
            copy,
            direction,
            status: rx,
            cancel: CancelFlag::new(),
            cancel_notify: Arc::new(Notify::new()),
        };
        (handle, tx)
    }

    async fn run_download(
        self: Arc<Self>,
        record: AttachmentRecord,
        job: JobHandle,
        tx: watch::Sender<JobStatus>,
        prior: Option<JobHandle>,
    ) {
        let copy = CopyKind::Original;

        // Wait out a pending opposite-direction job before admission
        if let Some(prior) = prior {
            prior.wait().await;
        }

        self.cache.pin(&record.key, copy);
        let outcome = self.perform_download(&record, &job, &tx).await;
        self.cache.unpin(&record.key, copy);
        self.finish(&record.key, copy, &job, &tx, outcome);
    }

    async fn perform_download(
        &self,
        record: &AttachmentRecord,
        job: &JobHandle,
        tx: &watch::Sender<JobStatus>,
    ) -> JobState {
        if job.cancel.is_cancelled() {
            return JobState::Cancelled;
        }

        // A current cached copy needs no transfer
        let state = self.cache.state(&record.key);
        match self
            .resolver
            .classify(record, CopyKind::Original, state.as_ref())
            .await
        {
            Ok(SyncState::UpToDate) => {
                debug!(key = %record.key, "Download request satisfied by cache");
                return JobState::Completed(self.cache.path_for(record, CopyKind::Original));
            }
            Ok(_) => {}
            Err(e) => {
                warn!(key = %record.key, error = %e, "Classification failed before download");
                return JobState::Failed(TransferFailure::from(&e));
            }
        }

        let timeout = self.config.request_timeout;
        let result = with_retry(
            "download",
            record.key.as_str(),
            self.config.max_retries,
            || async {
                // A concurrency slot is held only while the wire transfer
                // runs; backoff sleeps between attempts do not occupy one
                let _permit = match self.admit(job).await {
                    Some(permit) => permit,
                    None => return Err(TransportError::Cancelled),
                };
                tx.send_modify(|s| s.state = JobState::InFlight);

                let tmp = self.cache.temp_file()?;
                let progress = |bytes: u64, total: Option<u64>| {
                    tx.send_modify(|s| {
                        s.bytes_transferred = bytes;
                        s.total_bytes = total.or(s.total_bytes);
                    });
                };
                let fetched = tokio::time::timeout(
                    timeout,
                    self.transport.fetch(record, tmp.path(), &progress, &job.cancel),
                )
                .await
                .map_err(|_| {
                    TransportError::Network("transfer deadline exceeded".to_string())
                })??;
                Ok((tmp, fetched))
            },
        )
        .await;

        match result {
            Ok((tmp, version)) => {
                // Commit; the temp file is consumed by the atomic move
                match self.cache.stage(
                    record,
                    CopyKind::Original,
                    tmp,
                    &version,
                    self.transport.kind(),
                ) {
                    Ok(path) => {
                        self.resolver.note_remote_version(&record.key, &version);
                        self.enforce_cache_limit();
                        info!(key = %record.key, version = %version, "Download completed");
                        JobState::Completed(path)
                    }
                    Err(e) => {
                        warn!(key = %record.key, error = %e, "Failed to stage completed download");
                        JobState::Failed(TransferFailure {
                            kind: FailureKind::Io,
                            message: e.to_string(),
                        })
                    }
                }
            }
            Err(TransportError::Cancelled) => {
                // Temp file dropped; canonical path untouched
                info!(key = %record.key, "Download cancelled");
                JobState::Cancelled
            }
            Err(e) => {
                if matches!(e, TransportError::NotFound(_)) {
                    // The remote object is gone; drop the sync point so
                    // the cached copy stops presenting as pushable and
                    // later requests do not re-fetch a deleted remote
                    self.resolver.note_remote_missing(&record.key);
                    self.cache.clear_synced_version(&record.key);
                }
                warn!(key = %record.key, error = %e, "Download failed");
                JobState::Failed(TransferFailure::from(&e))
            }
        }
    }

    async fn run_upload(
        self: Arc<Self>,
        record: AttachmentRecord,
        job: JobHandle,
        tx: watch::Sender<JobStatus>,
        prior: Option<JobHandle>,
        force: bool,
    ) {
        let copy = CopyKind::Modified;

        if let Some(prior) = prior {
            prior.wait().await;
        }

        self.cache.pin(&record.key, copy);
        let outcome = self.perform_upload(&record, &job, &tx, force).await;
        self.cache.unpin(&record.key, copy);
        self.finish(&record.key, copy, &job, &tx, outcome);
    }

    async fn perform_upload(
        &self,
        record: &AttachmentRecord,
        job: &JobHandle,
        tx: &watch::Sender<JobStatus>,
        force: bool,
    ) -> JobState {
        let state = self.cache.state(&record.key);
        let (local_path, size) = match state.as_ref().and_then(|s| s.modified.as_ref()) {
            Some(modified) => (modified.path.clone(), modified.size_bytes),
            None => {
                return JobState::Failed(TransferFailure {
                    kind: FailureKind::Io,
                    message: "modified copy disappeared before upload".to_string(),
                })
            }
        };
        // Conditional on the last sync point so a remote advance between
        // admission and push surfaces as a conflict. A resolved keep-local
        // push overwrites the remote on purpose, so it runs unconditionally.
        let expected = if force {
            None
        } else {
            state.as_ref().and_then(|s| s.synced_version.clone())
        };

        if job.cancel.is_cancelled() {
            return JobState::Cancelled;
        }
        tx.send_modify(|s| s.total_bytes = Some(size));

        let timeout = self.config.request_timeout;
        let result = with_retry(
            "upload",
            record.key.as_str(),
            self.config.max_retries,
            || async {
                let _permit = match self.admit(job).await {
                    Some(permit) => permit,
                    None => return Err(TransportError::Cancelled),
                };
                tx.send_modify(|s| s.state = JobState::InFlight);

                tokio::time::timeout(
                    timeout,
                    self.transport.push(record, &local_path, expected.as_deref()),
                )
                .await
                .map_err(|_| TransportError::Network("transfer deadline exceeded".to_string()))?
            },
        )
        .await;

        match result {
            Ok(new_version) => {
                tx.send_modify(|s| s.bytes_transferred = size);
                match self.cache.promote_modified_to_original(
                    &record.key,
                    &new_version,
                    self.transport.kind(),
                ) {
                    Ok(()) => {
                        self.resolver.note_remote_version(&record.key, &new_version);
                        info!(key = %record.key, version = %new_version, "Upload completed");
                        JobState::Completed(self.cache.path_for(record, CopyKind::Original))
                    }
                    Err(e) => {
                        warn!(key = %record.key, error = %e, "Failed to promote pushed copy");
                        JobState::Failed(TransferFailure {
                            kind: FailureKind::Io,
                            message: e.to_string(),
                        })
                    }
                }
            }
            Err(TransportError::Cancelled) => {
                info!(key = %record.key, "Upload cancelled");
                JobState::Cancelled
            }
            Err(e) => {
                match &e {
                    // A fresh classification is required before retrying
                    TransportError::Conflict { .. } => {
                        self.resolver.invalidate_probe(&record.key);
                    }
                    TransportError::NotFound(_) => {
                        self.resolver.note_remote_missing(&record.key);
                        self.cache.clear_synced_version(&record.key);
                    }
                    _ => {}
                }
                warn!(key = %record.key, error = %e, "Upload failed");
                JobState::Failed(TransferFailure::from(&e))
            }
        }
    }

    /// Acquire a concurrency slot, honoring cancellation while queued
    ///
    /// Returns None when the job was cancelled before admission. The
    /// semaphore is fair, so queued jobs are admitted first-requested-
    /// first-served.
    async fn admit(&self, job: &JobHandle) -> Option<tokio::sync::OwnedSemaphorePermit> {
        if job.cancel.is_cancelled() {
            return None;
        }

        let semaphore = Arc::clone(
            self.limits
                .get(&self.transport.kind())
                .expect("semaphore exists for every backend"),
        );

        tokio::select! {
            permit = semaphore.acquire_owned() => {
                // acquire_owned only fails if the semaphore is closed,
                // which never happens here
                let permit = permit.ok()?;
                if job.cancel.is_cancelled() {
                    None
                } else {
                    Some(permit)
                }
            }
            _ = job.cancel_notify.notified() => None,
        }
    }

    fn finish(
        &self,
        key: &AttachmentKey,
        copy: CopyKind,
        job: &JobHandle,
        tx: &watch::Sender<JobStatus>,
        outcome: JobState,
    ) {
        {
            let mut jobs = self.jobs.lock().unwrap();
            if jobs
                .get(&(key.clone(), copy))
                .map_or(false, |active| active.id == job.id)
            {
                jobs.remove(&(key.clone(), copy));
            }
        }
        tx.send_modify(|s| s.state = outcome);
    }

    fn enforce_cache_limit(&self) {
        if self.cache.current_size_bytes() > self.config.max_cache_bytes {
            let report = self.cache.evict_until_under(self.config.max_cache_bytes);
            debug!(
                freed = report.bytes_freed,
                remaining = report.bytes_remaining,
                evicted = report.evicted,
                satisfied = report.satisfied,
                "Enforced cache ceiling after download"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attachment::LinkMode;
    use crate::transport::CloudSyncTransport;
    use std::path::Path;

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

    fn seed_remote(dir: &Path, rec: &AttachmentRecord, contents: &[u8]) {
        let path = dir.join(rec.key.as_str()).join(&rec.filename);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, contents).unwrap();
    }

    fn coordinator(remote: &Path, cache: &Path) -> Arc<TransferCoordinator> {
        let transport = Arc::new(Transport::CloudSync(CloudSyncTransport::new(remote)));
        let resolver = Arc::new(VersionResolver::new(Arc::clone(&transport)));
        let store = Arc::new(CacheStore::with_dir(cache).unwrap());
        Arc::new(TransferCoordinator::new(
            SyncConfig::default(),
            transport,
            resolver,
            store,
        ))
    }

    #[tokio::test]
    async fn download_stages_file_and_reports_progress() {
        let remote = tempfile::tempdir().unwrap();
        let cache = tempfile::tempdir().unwrap();
        let coord = coordinator(remote.path(), cache.path());
        let rec = record("KEY1", "paper.pdf");
        seed_remote(remote.path(), &rec, b"attachment content");

        let handle = coord.request_download(&rec);
        let status = handle.wait().await;

        let path = match status.state {
            JobState::Completed(path) => path,
            other => panic!("unexpected terminal state: {:?}", other),
        };
        assert_eq!(std::fs::read(&path).unwrap(), b"attachment content");
        assert_eq!(status.bytes_transferred, 18);
        assert!(coord.cache.file_exists(&rec.key, CopyKind::Original));
    }

    #[tokio::test]
    async fn duplicate_download_requests_share_one_job() {
        let remote = tempfile::tempdir().unwrap();
        let cache = tempfile::tempdir().unwrap();
        let coord = coordinator(remote.path(), cache.path());
        let rec = record("KEY1", "paper.pdf");
        seed_remote(remote.path(), &rec, b"content");

        let first = coord.request_download(&rec);
        let second = coord.request_download(&rec);
        assert_eq!(first.id(), second.id());

        let a = first.wait().await;
        let b = second.wait().await;
        assert_eq!(a.state, b.state);
        assert!(matches!(a.state, JobState::Completed(_)));
    }

    #[tokio::test]
    async fn cancel_before_admission_leaves_no_file() {
        let remote = tempfile::tempdir().unwrap();
        let cache = tempfile::tempdir().unwrap();
        let coord = coordinator(remote.path(), cache.path());
        let rec = record("KEY1", "paper.pdf");
        seed_remote(remote.path(), &rec, b"content");

        // The job task has not run yet on the current-thread runtime, so
        // the flag is observed before admission
        let handle = coord.request_download(&rec);
        handle.cancel();

        let status = handle.wait().await;
        assert_eq!(status.state, JobState::Cancelled);
        assert!(!coord.cache.path_for(&rec, CopyKind::Original).exists());
        assert!(!coord.cache.file_exists(&rec.key, CopyKind::Original));
    }

    #[tokio::test]
    async fn cancelling_in_flight_download_preserves_prior_version() {
        let remote = tempfile::tempdir().unwrap();
        let cache = tempfile::tempdir().unwrap();
        let coord = coordinator(remote.path(), cache.path());
        let rec = record("KEY1", "paper.pdf");
        seed_remote(remote.path(), &rec, b"v1 bytes");

        let first = coord.request_download(&rec).wait().await;
        assert!(matches!(first.state, JobState::Completed(_)));
        let v1 = coord
            .cache
            .state(&rec.key)
            .and_then(|s| s.original.map(|c| c.local_version))
            .unwrap();

        // Remote advances with a payload large enough for several chunks
        seed_remote(remote.path(), &rec, &[7u8; 200_000]);
        coord.resolver.invalidate_probe(&rec.key);

        let handle = coord.request_download(&rec);
        let mut rx = handle.subscribe();
        // Cancel once bytes are actually moving
        loop {
            rx.changed().await.unwrap();
            let status = rx.borrow().clone();
            if status.bytes_transferred > 0 || status.state.is_terminal() {
                break;
            }
        }
        handle.cancel();

        let status = handle.wait().await;
        assert_eq!(status.state, JobState::Cancelled);

        // The canonical file and its version fields are untouched
        let state = coord.cache.state(&rec.key).unwrap();
        let original = state.original.unwrap();
        assert_eq!(original.local_version, v1);
        assert_eq!(state.synced_version, Some(v1));
        assert_eq!(std::fs::read(&original.path).unwrap(), b"v1 bytes");
    }

    #[tokio::test]
    async fn remote_deletion_clears_the_sync_point() {
        let remote = tempfile::tempdir().unwrap();
        let cache = tempfile::tempdir().unwrap();
        let coord = coordinator(remote.path(), cache.path());
        let rec = record("KEY1", "paper.pdf");
        seed_remote(remote.path(), &rec, b"v1 bytes");

        let first = coord.request_download(&rec).wait().await;
        assert!(matches!(first.state, JobState::Completed(_)));
        assert!(coord
            .cache
            .state(&rec.key)
            .unwrap()
            .synced_version
            .is_some());

        // Remote object removed out from under us
        std::fs::remove_dir_all(remote.path().join(rec.key.as_str())).unwrap();
        coord.resolver.invalidate_probe(&rec.key);

        let status = coord.request_download(&rec).wait().await;
        match status.state {
            JobState::Failed(failure) => assert_eq!(failure.kind, FailureKind::NotFound),
            other => panic!("unexpected terminal state: {:?}", other),
        }

        // The sync point is dropped; the cached bytes stay for offline use
        let state = coord.cache.state(&rec.key).unwrap();
        assert_eq!(state.synced_version, None);
        assert!(coord.cache.file_exists(&rec.key, CopyKind::Original));
    }

    #[tokio::test]
    async fn up_to_date_download_completes_without_transfer() {
        let remote = tempfile::tempdir().unwrap();
        let cache = tempfile::tempdir().unwrap();
        let coord = coordinator(remote.path(), cache.path());
        let rec = record("KEY1", "paper.pdf");
        seed_remote(remote.path(), &rec, b"content");

        let first = coord.request_download(&rec).wait().await;
        assert!(matches!(first.state, JobState::Completed(_)));

        // Second download is satisfied by the cache; no bytes move
        let second = coord.request_download(&rec).wait().await;
        assert!(matches!(second.state, JobState::Completed(_)));
        assert_eq!(second.bytes_transferred, 0);
    }

    #[tokio::test]
    async fn upload_without_modified_copy_is_rejected() {
        let remote = tempfile::tempdir().unwrap();
        let cache = tempfile::tempdir().unwrap();
        let coord = coordinator(remote.path(), cache.path());
        let rec = record("KEY1", "paper.pdf");
        seed_remote(remote.path(), &rec, b"content");

        let result = coord.request_upload(&rec, false).await;
        assert!(matches!(result, Err(SyncError::NothingToPush(_))));
    }

    #[tokio::test]
    async fn upload_pushes_edit_and_promotes_it() {
        let remote = tempfile::tempdir().unwrap();
        let cache = tempfile::tempdir().unwrap();
        let coord = coordinator(remote.path(), cache.path());
        let rec = record("KEY1", "paper.pdf");
        seed_remote(remote.path(), &rec, b"v1 content");

        let downloaded = coord.request_download(&rec).wait().await;
        assert!(matches!(downloaded.state, JobState::Completed(_)));

        let edit = cache.path().join("edit.pdf");
        std::fs::write(&edit, b"edited content").unwrap();
        coord.cache.adopt_modified(&rec, &edit).unwrap();

        let handle = coord.request_upload(&rec, false).await.unwrap();
        let status = handle.wait().await;
        assert!(matches!(status.state, JobState::Completed(_)));

        // The edit is now both the remote content and the local original
        let remote_path = remote.path().join(rec.key.as_str()).join(&rec.filename);
        assert_eq!(std::fs::read(remote_path).unwrap(), b"edited content");
        let state = coord.cache.state(&rec.key).unwrap();
        assert!(state.modified.is_none());
        assert!(state.original.is_some());
    }
}
