//! Sync-state classification
//!
//! Compares an attachment's cached copy against the active backend's
//! remote version and classifies it as up to date, stale, missing, or
//! conflicted. Remote probes go through a short-TTL cache so a UI
//! rendering a list of attachments does not trigger a network round trip
//! per row.

use std::sync::Arc;
use std::time::Duration;

use moka::sync::Cache;
use tracing::{debug, trace, warn};

use crate::attachment::{AttachmentKey, AttachmentRecord, CopyKind};
use crate::cache::CacheState;
use crate::transport::{Transport, TransportError};

/// Freshness window for cached remote probes
const DEFAULT_PROBE_TTL: Duration = Duration::from_secs(15);

/// Classification of a cached copy relative to the active backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// Local and remote versions match, produced by the active backend
    UpToDate,
    /// Remote advanced (or source changed) with no unpushed local edit
    Stale,
    /// No local copy of the requested kind exists
    Missing,
    /// Both sides changed: unpushed local edit and a newer remote.
    /// Never auto-resolved; the caller chooses keep-local or take-remote.
    Conflicted,
}

/// Cached result of a remote probe
#[derive(Debug, Clone)]
enum ProbeEntry {
    Version(String),
    NotFound,
}

/// Classifies attachments against the active backend
pub struct VersionResolver {
    transport: Arc<Transport>,
    probe_cache: Cache<AttachmentKey, ProbeEntry>,
}

impl VersionResolver {
    pub fn new(transport: Arc<Transport>) -> Self {
        Self::with_freshness(transport, DEFAULT_PROBE_TTL)
    }

    /// Create a resolver with a custom probe freshness window
    pub fn with_freshness(transport: Arc<Transport>, probe_ttl: Duration) -> Self {
        let probe_cache = Cache::builder()
            .time_to_live(probe_ttl)
            .name("remote_probe_cache")
            .build();
        Self {
            transport,
            probe_cache,
        }
    }

    /// Current remote version token, via the probe cache
    ///
    /// `Ok(None)` means the attachment does not exist remotely. When the
    /// backend is unreachable the classification falls back to the
    /// record's last-known server version so offline use keeps working.
    pub async fn remote_version(
        &self,
        record: &AttachmentRecord,
    ) -> Result<Option<String>, TransportError> {
        if let Some(entry) = self.probe_cache.get(&record.key) {
            trace!(key = %record.key, "Probe cache HIT");
            return Ok(match entry {
                ProbeEntry::Version(v) => Some(v),
                ProbeEntry::NotFound => None,
            });
        }

        trace!(key = %record.key, "Probe cache MISS");
        match self.transport.probe_remote_version(record).await {
            Ok(Some(version)) => {
                self.probe_cache
                    .insert(record.key.clone(), ProbeEntry::Version(version.clone()));
                Ok(Some(version))
            }
            Ok(None) => {
                self.probe_cache
                    .insert(record.key.clone(), ProbeEntry::NotFound);
                Ok(None)
            }
            Err(e) if e.is_retryable() => {
                warn!(key = %record.key, error = %e, "Remote unreachable, using last-known server version");
                Ok(record.server_version.clone())
            }
            Err(e) => Err(e),
        }
    }

    /// Record a version token observed by a completed transfer, so the
    /// next classification does not re-probe
    pub fn note_remote_version(&self, key: &AttachmentKey, version: &str) {
        self.probe_cache
            .insert(key.clone(), ProbeEntry::Version(version.to_string()));
    }

    /// Record that the attachment is gone remotely, so the next
    /// classification does not re-probe a deleted object
    pub fn note_remote_missing(&self, key: &AttachmentKey) {
        self.probe_cache.insert(key.clone(), ProbeEntry::NotFound);
    }

    /// Drop the cached probe for an attachment
    pub fn invalidate_probe(&self, key: &AttachmentKey) {
        self.probe_cache.invalidate(key);
    }

    /// Classify the given copy of an attachment
    ///
    /// `local` is the cache ledger's snapshot for the attachment (None
    /// when nothing is cached).
    pub async fn classify(
        &self,
        record: &AttachmentRecord,
        copy: CopyKind,
        local: Option<&CacheState>,
    ) -> Result<SyncState, TransportError> {
        let state = match local {
            Some(s) => s,
            None => return Ok(SyncState::Missing),
        };
        let copy_state = match state.copy(copy) {
            Some(c) => c,
            None => return Ok(SyncState::Missing),
        };

        let remote = self.remote_version(record).await?;
        let active = self.transport.kind();

        // An unpushed edit plus a remote that moved past the last sync
        // point means both sides changed
        if state.modified.is_some() {
            let remote_advanced = match (&remote, &state.synced_version) {
                (Some(r), Some(synced)) => r != synced,
                (Some(_), None) => true,
                (None, _) => false,
            };
            if remote_advanced {
                debug!(key = %record.key, "Classified as conflicted");
                return Ok(SyncState::Conflicted);
            }
        }

        let same_version = remote.as_deref() == Some(copy_state.local_version.as_str());
        let same_source = state.version_source == Some(active);

        if same_version && same_source {
            Ok(SyncState::UpToDate)
        } else {
            debug!(
                key = %record.key,
                copy = %copy,
                local = %copy_state.local_version,
                remote = ?remote,
                source = ?state.version_source,
                "Classified as stale"
            );
            Ok(SyncState::Stale)
        }
    }
}
