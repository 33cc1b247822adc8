//! Sync facade
//!
//! The entry point external collaborators use: the presentation layer
//! requests downloads and queries state here, the metadata layer feeds
//! it records. One facade instance is constructed at application startup
//! and passed to callers; there is no ambient global. Backend selection
//! is resolved from configuration, never by callers.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::info;

use crate::attachment::{AttachmentRecord, CopyKind};
use crate::cache::{CacheStore, EvictionReport, PurgeRecord};
use crate::config::SyncConfig;
use crate::coordinator::{JobHandle, JobStatus, TransferCoordinator};
use crate::error::SyncError;
use crate::resolver::{SyncState, VersionResolver};
use crate::transport::Transport;

/// Explicit resolution of a sync conflict
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictChoice {
    /// Push the local edit, overwriting the newer remote version
    KeepLocal,
    /// Discard the local edit and re-download the remote version
    TakeRemote,
}

/// Combined view of an attachment's sync state and any live transfer
#[derive(Debug, Clone)]
pub struct SyncStatus {
    pub classification: SyncState,
    pub job: Option<JobStatus>,
}

/// Orchestration surface over the coordinator and cache
pub struct SyncFacade {
    config: SyncConfig,
    coordinator: Arc<TransferCoordinator>,
}

impl SyncFacade {
    /// Wire up the engine for the configured backend
    ///
    /// The transport must match `config.active_backend`; the host builds
    /// it from its own credential store.
    pub fn new(config: SyncConfig, transport: Transport, cache: Arc<CacheStore>) -> Self {
        let transport = Arc::new(transport);
        let resolver = Arc::new(VersionResolver::new(Arc::clone(&transport)));
        let coordinator = Arc::new(TransferCoordinator::new(
            config.clone(),
            transport,
            resolver,
            cache,
        ));
        info!(backend = config.active_backend.as_str(), "Sync engine ready");
        Self {
            config,
            coordinator,
        }
    }

    fn check_cacheable(&self, record: &AttachmentRecord) -> Result<(), SyncError> {
        if !self.config.use_cache {
            return Err(SyncError::CachingDisabled);
        }
        if !record.is_cacheable() {
            return Err(SyncError::NotCacheable(record.key.clone()));
        }
        Ok(())
    }

    /// Start (or join) a download of the attachment's original copy
    pub fn download(&self, record: &AttachmentRecord) -> Result<JobHandle, SyncError> {
        self.check_cacheable(record)?;
        Ok(self.coordinator.request_download(record))
    }

    /// Start (or join) an upload of the attachment's modified copy
    ///
    /// Rejected when there is nothing to push or when the attachment is
    /// conflicted; conflicts go through [`SyncFacade::resolve_conflict`].
    pub async fn upload(&self, record: &AttachmentRecord) -> Result<JobHandle, SyncError> {
        self.check_cacheable(record)?;
        self.coordinator.request_upload(record, false).await
    }

    /// Resolve a conflict and start the resulting transfer
    pub async fn resolve_conflict(
        &self,
        record: &AttachmentRecord,
        choice: ConflictChoice,
    ) -> Result<JobHandle, SyncError> {
        self.check_cacheable(record)?;
        match choice {
            ConflictChoice::KeepLocal => self.coordinator.request_upload(record, true).await,
            ConflictChoice::TakeRemote => {
                self.coordinator.cache().purge(
                    &record.key,
                    CopyKind::Modified,
                    "conflict resolved as take-remote",
                );
                self.coordinator.resolver().invalidate_probe(&record.key);
                Ok(self.coordinator.request_download(record))
            }
        }
    }

    /// Request cooperative cancellation of a transfer
    pub fn cancel(&self, handle: &JobHandle) {
        handle.cancel();
    }

    /// Classification plus any live job status for the given copy
    pub async fn state(
        &self,
        record: &AttachmentRecord,
        copy: CopyKind,
    ) -> Result<SyncStatus, SyncError> {
        let cache_state = self.coordinator.cache().state(&record.key);
        let classification = self
            .coordinator
            .resolver()
            .classify(record, copy, cache_state.as_ref())
            .await?;
        Ok(SyncStatus {
            classification,
            job: self.coordinator.job_status(&record.key, copy),
        })
    }

    /// Drop the cached remote probe for an attachment
    ///
    /// The next classification re-probes the backend immediately instead
    /// of waiting out the freshness window. Used by explicit refresh
    /// actions in the host application.
    pub fn refresh_remote(&self, record: &AttachmentRecord) {
        self.coordinator.resolver().invalidate_probe(&record.key);
    }

    /// Whether the given copy is present in the cache
    pub fn file_exists(&self, record: &AttachmentRecord, copy: CopyKind) -> bool {
        self.coordinator.cache().file_exists(&record.key, copy)
    }

    /// Canonical path of the given copy, if cached
    pub fn file_path(&self, record: &AttachmentRecord, copy: CopyKind) -> Option<PathBuf> {
        if self.file_exists(record, copy) {
            Some(self.coordinator.cache().path_for(record, copy))
        } else {
            None
        }
    }

    /// Record a successful open; feeds least-recently-used eviction
    pub fn mark_opened(&self, record: &AttachmentRecord) {
        self.coordinator.cache().mark_viewed(&record.key);
    }

    /// Adopt a locally edited file as the attachment's modified copy
    pub fn stage_modified(
        &self,
        record: &AttachmentRecord,
        edited_file: &Path,
    ) -> Result<PathBuf, SyncError> {
        self.check_cacheable(record)?;
        Ok(self.coordinator.cache().adopt_modified(record, edited_file)?)
    }

    /// Remove a cached copy; the reason lands in the audit trail
    pub fn purge_local(&self, record: &AttachmentRecord, copy: CopyKind, reason: &str) {
        self.coordinator.cache().purge(&record.key, copy, reason);
    }

    /// Recent purge diagnostics
    pub fn recent_purges(&self) -> Vec<PurgeRecord> {
        self.coordinator.cache().recent_purges()
    }

    /// Total bytes currently cached
    pub fn cache_size_bytes(&self) -> u64 {
        self.coordinator.cache().current_size_bytes()
    }

    /// Evict down to the configured ceiling
    pub fn enforce_cache_limit(&self) -> EvictionReport {
        self.coordinator
            .cache()
            .evict_until_under(self.config.max_cache_bytes)
    }

    /// Engine configuration in effect
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attachment::{AttachmentKey, LinkMode};
    use crate::transport::CloudSyncTransport;

    fn record(key: &str, link_mode: LinkMode) -> AttachmentRecord {
        AttachmentRecord {
            key: AttachmentKey::from(key),
            library_id: 1,
            link_mode,
            content_type: "application/pdf".to_string(),
            filename: "paper.pdf".to_string(),
            charset: None,
            url: None,
            size_bytes: 0,
            server_version: None,
        }
    }

    fn facade(remote: &Path, cache_dir: &Path, config: SyncConfig) -> SyncFacade {
        let transport = Transport::CloudSync(CloudSyncTransport::new(remote));
        let cache = Arc::new(CacheStore::with_dir(cache_dir).unwrap());
        SyncFacade::new(config, transport, cache)
    }

    #[tokio::test]
    async fn linked_url_attachments_are_rejected() {
        let remote = tempfile::tempdir().unwrap();
        let cache = tempfile::tempdir().unwrap();
        let facade = facade(remote.path(), cache.path(), SyncConfig::default());

        let rec = record("KEY1", LinkMode::LinkedUrl);
        assert!(matches!(
            facade.download(&rec),
            Err(SyncError::NotCacheable(_))
        ));
    }

    #[tokio::test]
    async fn disabled_cache_rejects_downloads() {
        let remote = tempfile::tempdir().unwrap();
        let cache = tempfile::tempdir().unwrap();
        let config = SyncConfig {
            use_cache: false,
            ..SyncConfig::default()
        };
        let facade = facade(remote.path(), cache.path(), config);

        let rec = record("KEY1", LinkMode::ImportedFile);
        assert!(matches!(
            facade.download(&rec),
            Err(SyncError::CachingDisabled)
        ));
    }

    #[tokio::test]
    async fn state_reports_missing_for_uncached_attachment() {
        let remote = tempfile::tempdir().unwrap();
        let cache = tempfile::tempdir().unwrap();
        let facade = facade(remote.path(), cache.path(), SyncConfig::default());

        let rec = record("KEY1", LinkMode::ImportedFile);
        let status = facade.state(&rec, CopyKind::Original).await.unwrap();
        assert_eq!(status.classification, SyncState::Missing);
        assert!(status.job.is_none());
        assert!(!facade.file_exists(&rec, CopyKind::Original));
        assert!(facade.file_path(&rec, CopyKind::Original).is_none());
    }
}
