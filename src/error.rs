//! Engine-level error type
//!
//! Admission and policy failures surfaced by the facade and coordinator.
//! Transport and I/O errors pass through unmodified so callers can see
//! the specific kind (no connection vs. removed on server vs. denied).

use crate::attachment::AttachmentKey;
use crate::transport::TransportError;

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// The attachment's link mode has no cacheable content
    #[error("attachment {0} is not cacheable")]
    NotCacheable(AttachmentKey),

    /// Attachment caching is disabled in the current configuration
    #[error("attachment caching is disabled")]
    CachingDisabled,

    /// Upload requested with no modified copy, or the copy is already
    /// current remotely
    #[error("nothing to push for attachment {0}")]
    NothingToPush(AttachmentKey),

    /// Both sides changed; the caller must resolve keep-local or
    /// take-remote explicitly before a transfer is admitted
    #[error("attachment {0} has a sync conflict; explicit resolution required")]
    ConflictUnresolved(AttachmentKey),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
