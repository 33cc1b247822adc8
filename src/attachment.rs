//! Attachment data model
//!
//! Plain value types describing a library item's attachment. Records are
//! produced by the metadata layer; the engine never builds them from raw
//! server responses. Mutable cache-side state (local version, presence,
//! last-viewed) lives in the cache ledger, not here.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable identity of an attachment within its owning library
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttachmentKey(pub String);

impl AttachmentKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AttachmentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AttachmentKey {
    fn from(s: &str) -> Self {
        AttachmentKey(s.to_string())
    }
}

/// How the attachment references its content
///
/// Determines whether the content can be cached locally at all:
/// linked-URL attachments point at external resources and are never cached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LinkMode {
    ImportedFile,
    ImportedUrl,
    LinkedFile,
    LinkedUrl,
}

impl LinkMode {
    /// Whether this link mode has cacheable content
    pub fn is_cacheable(self) -> bool {
        !matches!(self, LinkMode::LinkedUrl)
    }
}

/// Which cached copy of an attachment is meant
///
/// `Original` is the file as retrieved from the authoritative source;
/// `Modified` is a locally edited copy not yet pushed back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CopyKind {
    Original,
    Modified,
}

impl fmt::Display for CopyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CopyKind::Original => f.write_str("original"),
            CopyKind::Modified => f.write_str("modified"),
        }
    }
}

/// An attachment as described by the metadata layer
///
/// Descriptive fields are immutable after creation except on metadata
/// refresh. `server_version` is the last version token the metadata layer
/// saw for the remote content; the resolver prefers a fresh probe but
/// falls back to this hint when the remote is unreachable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachmentRecord {
    /// Identity within the owning library
    pub key: AttachmentKey,
    /// Owning library identifier
    pub library_id: i64,
    /// How the content is linked
    pub link_mode: LinkMode,
    /// MIME type as reported by the server
    pub content_type: String,
    /// Original file name (may collide across attachments)
    pub filename: String,
    /// Character set, when known
    #[serde(default)]
    pub charset: Option<String>,
    /// Source URL, when the attachment has one
    #[serde(default)]
    pub url: Option<String>,
    /// Remote size in bytes, used for eviction accounting
    pub size_bytes: u64,
    /// Version token last reported by the metadata layer
    #[serde(default)]
    pub server_version: Option<String>,
}

impl AttachmentRecord {
    /// Whether this attachment's content can be cached locally
    pub fn is_cacheable(&self) -> bool {
        self.link_mode.is_cacheable()
    }
}
