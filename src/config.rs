//! Engine configuration
//!
//! Plain values read by the engine; persistence and editing belong to the
//! host application. The active backend, cache ceiling, and scope flags
//! mirror the client's preference pane.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default maximum cache size: 1 GB
pub const DEFAULT_MAX_CACHE_SIZE: u64 = 1024 * 1024 * 1024;

/// Default per-transfer deadline
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Maximum number of retries for retryable transfer errors
pub const MAX_RETRIES: u32 = 3;

/// The storage backends an attachment's bytes can come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    /// The library's own metadata/file server
    Server,
    /// A user-configured WebDAV share
    Webdav,
    /// A locally synced cloud folder (e.g. a file-sync client's directory)
    CloudSync,
}

impl BackendKind {
    pub const ALL: [BackendKind; 3] =
        [BackendKind::Server, BackendKind::Webdav, BackendKind::CloudSync];

    pub fn as_str(self) -> &'static str {
        match self {
            BackendKind::Server => "server",
            BackendKind::Webdav => "webdav",
            BackendKind::CloudSync => "cloud-sync",
        }
    }
}

/// How much of the library the client caches attachments for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CacheScope {
    ActiveCollection,
    ActiveLibrary,
    AllLibraries,
}

/// Concurrency ceilings per backend
///
/// Distinct limits keep a slow WebDAV share from starving server-native
/// transfers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TransferLimits {
    pub server: usize,
    pub webdav: usize,
    pub cloud_sync: usize,
}

impl TransferLimits {
    pub fn for_backend(&self, backend: BackendKind) -> usize {
        match backend {
            BackendKind::Server => self.server,
            BackendKind::Webdav => self.webdav,
            BackendKind::CloudSync => self.cloud_sync,
        }
    }
}

impl Default for TransferLimits {
    fn default() -> Self {
        Self {
            server: 4,
            webdav: 2,
            cloud_sync: 4,
        }
    }
}

/// Engine configuration as read from the host application
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Which backend currently serves attachment bytes
    pub active_backend: BackendKind,
    /// Whether attachment caching is enabled at all
    pub use_cache: bool,
    /// Which part of the library gets cached
    pub cache_scope: CacheScope,
    /// Cache size ceiling in bytes
    pub max_cache_bytes: u64,
    /// Per-backend in-flight transfer limits
    pub transfer_limits: TransferLimits,
    /// Deadline for a single transport call
    #[serde(with = "duration_secs")]
    pub request_timeout: Duration,
    /// Retry budget for transient network failures
    pub max_retries: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            active_backend: BackendKind::Server,
            use_cache: true,
            cache_scope: CacheScope::ActiveLibrary,
            max_cache_bytes: DEFAULT_MAX_CACHE_SIZE,
            transfer_limits: TransferLimits::default(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            max_retries: MAX_RETRIES,
        }
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}
