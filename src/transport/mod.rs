//! Backend transports
//!
//! One adapter per storage backend, behind a closed enum. Each adapter
//! speaks only its wire protocol; caching, eviction, and concurrency
//! policy live elsewhere. Adding a backend means adding a variant here,
//! not touching callers.

pub mod cloud_sync;
pub mod error;
pub mod server;
pub mod webdav;

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::attachment::AttachmentRecord;
use crate::config::BackendKind;

pub use cloud_sync::CloudSyncTransport;
pub use error::TransportError;
pub use server::ServerTransport;
pub use webdav::WebdavTransport;

/// Progress callback: (bytes transferred so far, total when known)
pub type ProgressFn<'a> = &'a (dyn Fn(u64, Option<u64>) + Send + Sync);

/// Cooperative cancellation flag
///
/// Transports observe it at chunk boundaries and unwind with
/// `TransportError::Cancelled` without leaving a staged file.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation
    pub fn trip(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    /// Bail out if cancellation was requested
    pub fn check(&self) -> Result<(), TransportError> {
        if self.is_cancelled() {
            Err(TransportError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// The closed set of backend transports
pub enum Transport {
    Server(ServerTransport),
    Webdav(WebdavTransport),
    CloudSync(CloudSyncTransport),
}

impl Transport {
    /// Which backend this transport serves
    pub fn kind(&self) -> BackendKind {
        match self {
            Transport::Server(_) => BackendKind::Server,
            Transport::Webdav(_) => BackendKind::Webdav,
            Transport::CloudSync(_) => BackendKind::CloudSync,
        }
    }

    /// Ask the backend for the attachment's current version token
    ///
    /// `Ok(None)` means the attachment does not exist remotely;
    /// `Err(Network)` means the backend was unreachable.
    pub async fn probe_remote_version(
        &self,
        record: &AttachmentRecord,
    ) -> Result<Option<String>, TransportError> {
        match self {
            Transport::Server(t) => t.probe_remote_version(record).await,
            Transport::Webdav(t) => t.probe_remote_version(record).await,
            Transport::CloudSync(t) => t.probe_remote_version(record).await,
        }
    }

    /// Stream the attachment's bytes to `dest`, reporting progress per
    /// chunk and observing `cancel` at chunk boundaries
    ///
    /// Returns the remote version token observed at fetch start.
    pub async fn fetch(
        &self,
        record: &AttachmentRecord,
        dest: &Path,
        progress: ProgressFn<'_>,
        cancel: &CancelFlag,
    ) -> Result<String, TransportError> {
        match self {
            Transport::Server(t) => t.fetch(record, dest, progress, cancel).await,
            Transport::Webdav(t) => t.fetch(record, dest, progress, cancel).await,
            Transport::CloudSync(t) => t.fetch(record, dest, progress, cancel).await,
        }
    }

    /// Upload a local file as the attachment's new remote content
    ///
    /// The push is conditional on `expected_version`; a version race
    /// surfaces as `TransportError::Conflict`.
    pub async fn push(
        &self,
        record: &AttachmentRecord,
        local_path: &Path,
        expected_version: Option<&str>,
    ) -> Result<String, TransportError> {
        match self {
            Transport::Server(t) => t.push(record, local_path, expected_version).await,
            Transport::Webdav(t) => t.push(record, local_path, expected_version).await,
            Transport::CloudSync(t) => t.push(record, local_path, expected_version).await,
        }
    }
}

/// Execute an operation with retry and bounded backoff
///
/// Only errors reporting `is_retryable()` are retried; everything else
/// returns immediately, as does exhausting the budget.
pub(crate) async fn with_retry<F, Fut, T>(
    operation: &str,
    key: &str,
    max_retries: u32,
    f: F,
) -> Result<T, TransportError>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T, TransportError>>,
{
    let backoff_ms: [u64; 3] = [500, 1000, 2000];

    let mut attempt = 0;
    loop {
        match f().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                if !e.is_retryable() || attempt >= max_retries {
                    return Err(e);
                }
                let delay = backoff_ms.get(attempt as usize).copied().unwrap_or(2000);
                warn!(
                    operation = operation,
                    key = key,
                    attempt = attempt + 1,
                    max = max_retries,
                    delay_ms = delay,
                    error = %e,
                    "Retrying transfer operation"
                );
                tokio::time::sleep(Duration::from_millis(delay)).await;
                attempt += 1;
            }
        }
    }
}
