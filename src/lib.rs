//! refcache — attachment cache and sync engine for reference-library clients
//!
//! Keeps local copies of remote document attachments synchronized with one
//! of several storage backends (the library's own server, a WebDAV share,
//! or a cloud-file-sync folder), bounds local disk usage through LRU
//! eviction, and lets a user work offline with previously fetched files.
//!
//! The host application constructs one [`SyncFacade`] at startup and hands
//! it to the presentation and metadata layers:
//!
//! ```no_run
//! use std::sync::Arc;
//! use refcache::{
//!     CacheStore, CloudSyncTransport, SyncConfig, SyncFacade, Transport,
//! };
//!
//! # fn main() -> std::io::Result<()> {
//! let cache = Arc::new(CacheStore::new("default-profile")?);
//! let transport = Transport::CloudSync(CloudSyncTransport::new("/home/me/Sync/attachments"));
//! let facade = SyncFacade::new(SyncConfig::default(), transport, cache);
//! # let _ = facade;
//! # Ok(())
//! # }
//! ```
//!
//! Downloads are requested per attachment record; duplicate requests share
//! one transfer, progress flows through a watch channel on the returned
//! handle, and cancellation is cooperative.

pub mod attachment;
pub mod cache;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod facade;
pub mod hash;
pub mod resolver;
pub mod transport;

pub use attachment::{AttachmentKey, AttachmentRecord, CopyKind, LinkMode};
pub use cache::{CacheStore, EvictionReport, PurgeRecord};
pub use config::{BackendKind, CacheScope, SyncConfig, TransferLimits};
pub use coordinator::{
    Direction, FailureKind, JobHandle, JobState, JobStatus, TransferCoordinator, TransferFailure,
};
pub use error::SyncError;
pub use facade::{ConflictChoice, SyncFacade, SyncStatus};
pub use resolver::{SyncState, VersionResolver};
pub use transport::{
    CancelFlag, CloudSyncTransport, ServerTransport, Transport, TransportError, WebdavTransport,
};
