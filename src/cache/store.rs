//! Attachment file cache
//!
//! Owns the on-disk layout for cached attachment copies and the ledger
//! tying version metadata to file presence. A version token is recorded
//! only after the corresponding file is in place, and cleared before or
//! together with its removal, so the ledger and the directory never
//! disagree about which copy exists.
//!
//! Layout: originals live at `<cache>/<enc(key)>.<enc(filename)>`,
//! modified copies under `<cache>/modified/`. The encoding is base64url
//! of both components, reversible and collision-free across attachments
//! that share a filename.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::SystemTime;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::attachment::{AttachmentKey, AttachmentRecord, CopyKind};
use crate::config::BackendKind;
use crate::hash::sha1_hex_of_file;

/// Maximum number of purge records kept for diagnostics
const MAX_PURGE_HISTORY: usize = 64;

/// Subdirectory holding modified (locally edited, unpushed) copies
const MODIFIED_DIR: &str = "modified";

/// One cached copy of an attachment
#[derive(Debug, Clone)]
pub struct CopyState {
    /// Version token of the bytes on disk
    pub local_version: String,
    /// Size on disk, feeds the cache-size counter
    pub size_bytes: u64,
    /// Canonical path of the cached file
    pub path: PathBuf,
}

/// Cache-side state of one attachment
#[derive(Debug, Clone, Default)]
pub struct CacheState {
    /// The as-downloaded copy, if cached
    pub original: Option<CopyState>,
    /// A locally edited copy awaiting push, if any
    pub modified: Option<CopyState>,
    /// Which backend produced the cached file (and will receive the next push)
    pub version_source: Option<BackendKind>,
    /// Remote version token recorded at the last successful fetch or push
    pub synced_version: Option<String>,
    /// Last successful open, drives LRU eviction
    pub last_viewed: Option<SystemTime>,
}

impl CacheState {
    pub fn copy(&self, kind: CopyKind) -> Option<&CopyState> {
        match kind {
            CopyKind::Original => self.original.as_ref(),
            CopyKind::Modified => self.modified.as_ref(),
        }
    }

    fn copy_mut(&mut self, kind: CopyKind) -> &mut Option<CopyState> {
        match kind {
            CopyKind::Original => &mut self.original,
            CopyKind::Modified => &mut self.modified,
        }
    }

    fn is_empty(&self) -> bool {
        self.original.is_none() && self.modified.is_none()
    }
}

/// Diagnostic record of a purge; the reason is mandatory
#[derive(Debug, Clone)]
pub struct PurgeRecord {
    pub timestamp: SystemTime,
    pub key: AttachmentKey,
    pub copy: CopyKind,
    pub reason: String,
    /// False when the copy was already absent (purge is idempotent)
    pub removed: bool,
}

/// Outcome of an eviction pass
#[derive(Debug, Clone)]
pub struct EvictionReport {
    pub bytes_freed: u64,
    pub bytes_remaining: u64,
    pub evicted: usize,
    /// False when no eligible victim was left but the total is still over
    pub satisfied: bool,
}

struct Ledger {
    entries: HashMap<AttachmentKey, CacheState>,
    /// Copies with a transfer in flight; never evicted
    pinned: HashSet<(AttachmentKey, CopyKind)>,
    purge_log: VecDeque<PurgeRecord>,
}

/// Local disk cache for attachment content
pub struct CacheStore {
    cache_dir: PathBuf,
    ledger: Mutex<Ledger>,
}

impl CacheStore {
    /// Create a cache rooted in the platform cache directory
    pub fn new(profile: &str) -> std::io::Result<Self> {
        let cache_dir = dirs::cache_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("refcache")
            .join(profile);
        Self::with_dir(cache_dir)
    }

    /// Create a cache rooted at an explicit directory
    pub fn with_dir(cache_dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let cache_dir = cache_dir.into();
        fs::create_dir_all(cache_dir.join(MODIFIED_DIR))?;

        let store = Self {
            cache_dir,
            ledger: Mutex::new(Ledger {
                entries: HashMap::new(),
                pinned: HashSet::new(),
                purge_log: VecDeque::new(),
            }),
        };

        store.cleanup();
        info!(cache_dir = %store.cache_dir.display(), "Attachment cache initialized");
        Ok(store)
    }

    /// Deterministic canonical path for an attachment copy
    ///
    /// Derivable without scanning the directory; distinct across
    /// attachments even when filenames collide.
    pub fn path_for(&self, record: &AttachmentRecord, copy: CopyKind) -> PathBuf {
        let name = encode_cache_filename(&record.key, &record.filename);
        match copy {
            CopyKind::Original => self.cache_dir.join(name),
            CopyKind::Modified => self.cache_dir.join(MODIFIED_DIR).join(name),
        }
    }

    /// Allocate a temp file in the cache directory for an in-progress
    /// download; same filesystem as the canonical path so commit is a rename
    pub fn temp_file(&self) -> std::io::Result<NamedTempFile> {
        NamedTempFile::new_in(&self.cache_dir)
    }

    /// Commit a completed download into the canonical path
    ///
    /// The move is atomic (rename); the ledger is updated only after the
    /// file is in place. A half-written file is never visible here.
    pub fn stage(
        &self,
        record: &AttachmentRecord,
        copy: CopyKind,
        staged: NamedTempFile,
        version: &str,
        source: BackendKind,
    ) -> std::io::Result<PathBuf> {
        let dest = self.path_for(record, copy);
        let file = staged.persist(&dest).map_err(|e| e.error)?;
        let size = file.metadata()?.len();
        drop(file);

        let mut ledger = self.ledger.lock().unwrap();
        let entry = ledger.entries.entry(record.key.clone()).or_default();
        *entry.copy_mut(copy) = Some(CopyState {
            local_version: version.to_string(),
            size_bytes: size,
            path: dest.clone(),
        });
        entry.version_source = Some(source);
        if copy == CopyKind::Original {
            entry.synced_version = Some(version.to_string());
        }

        debug!(
            key = %record.key,
            copy = %copy,
            version = version,
            size = size,
            path = %dest.display(),
            "Staged attachment copy"
        );
        Ok(dest)
    }

    /// Adopt a locally edited file as the attachment's modified copy
    ///
    /// Used when the host application saves an annotated/edited version.
    /// The source file is consumed. The modified copy's version token is
    /// its content hash; `synced_version` is left untouched so conflict
    /// detection still compares against the last sync point.
    pub fn adopt_modified(
        &self,
        record: &AttachmentRecord,
        source_path: &Path,
    ) -> std::io::Result<PathBuf> {
        let dest = self.path_for(record, CopyKind::Modified);

        let tmp = self.temp_file()?;
        fs::copy(source_path, tmp.path())?;
        let version = sha1_hex_of_file(tmp.path())?;
        tmp.persist(&dest).map_err(|e| e.error)?;
        let size = fs::metadata(&dest)?.len();
        fs::remove_file(source_path)?;

        let mut ledger = self.ledger.lock().unwrap();
        let entry = ledger.entries.entry(record.key.clone()).or_default();
        entry.modified = Some(CopyState {
            local_version: version.clone(),
            size_bytes: size,
            path: dest.clone(),
        });

        debug!(key = %record.key, version = %version, "Adopted modified copy");
        Ok(dest)
    }

    /// Promote the modified copy to original after a successful push
    ///
    /// The pushed bytes are now what the remote holds, so they become the
    /// authoritative local copy under the version token the push returned.
    pub fn promote_modified_to_original(
        &self,
        key: &AttachmentKey,
        new_version: &str,
        source: BackendKind,
    ) -> std::io::Result<()> {
        let mut ledger = self.ledger.lock().unwrap();
        let entry = match ledger.entries.get_mut(key) {
            Some(entry) => entry,
            None => return Ok(()),
        };
        let modified = match entry.modified.take() {
            Some(m) => m,
            None => return Ok(()),
        };

        let file_name = modified
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        let original_path = self.cache_dir.join(file_name);

        // Replace any stale original with the pushed bytes
        fs::rename(&modified.path, &original_path)?;

        entry.original = Some(CopyState {
            local_version: new_version.to_string(),
            size_bytes: modified.size_bytes,
            path: original_path,
        });
        entry.synced_version = Some(new_version.to_string());
        entry.version_source = Some(source);

        debug!(key = %key, version = new_version, "Promoted modified copy to original");
        Ok(())
    }

    /// Remove a cached copy and clear its version state
    ///
    /// Idempotent when the copy is already absent; the reason is always
    /// recorded in the audit trail.
    pub fn purge(&self, key: &AttachmentKey, copy: CopyKind, reason: &str) {
        let mut ledger = self.ledger.lock().unwrap();

        let removed = match ledger.entries.get_mut(key) {
            Some(entry) => match entry.copy_mut(copy).take() {
                Some(state) => {
                    if let Err(e) = fs::remove_file(&state.path) {
                        if e.kind() != std::io::ErrorKind::NotFound {
                            warn!(path = %state.path.display(), error = %e, "Failed to remove cached file");
                        }
                    }
                    true
                }
                None => false,
            },
            None => false,
        };

        if let Some(entry) = ledger.entries.get(key) {
            if entry.is_empty() {
                ledger.entries.remove(key);
            }
        }

        info!(key = %key, copy = %copy, reason = reason, removed = removed, "Purged attachment copy");
        ledger.purge_log.push_back(PurgeRecord {
            timestamp: SystemTime::now(),
            key: key.clone(),
            copy,
            reason: reason.to_string(),
            removed,
        });
        if ledger.purge_log.len() > MAX_PURGE_HISTORY {
            ledger.purge_log.pop_front();
        }
    }

    /// Forget the last sync point after the remote object was found to
    /// be gone
    ///
    /// Cached files stay on disk for offline use; only the remote
    /// linkage is dropped, so a later push recreates the object instead
    /// of failing a conditional write against nothing.
    pub fn clear_synced_version(&self, key: &AttachmentKey) {
        let mut ledger = self.ledger.lock().unwrap();
        if let Some(entry) = ledger.entries.get_mut(key) {
            entry.synced_version = None;
        }
    }

    /// Recent purge diagnostics, oldest first
    pub fn recent_purges(&self) -> Vec<PurgeRecord> {
        let ledger = self.ledger.lock().unwrap();
        ledger.purge_log.iter().cloned().collect()
    }

    /// Snapshot of an attachment's cache-side state
    pub fn state(&self, key: &AttachmentKey) -> Option<CacheState> {
        let ledger = self.ledger.lock().unwrap();
        ledger.entries.get(key).cloned()
    }

    /// Whether the given copy exists in the cache
    pub fn file_exists(&self, key: &AttachmentKey, copy: CopyKind) -> bool {
        let ledger = self.ledger.lock().unwrap();
        ledger
            .entries
            .get(key)
            .and_then(|e| e.copy(copy))
            .is_some()
    }

    /// Record a successful open; feeds LRU eviction order
    pub fn mark_viewed(&self, key: &AttachmentKey) {
        let mut ledger = self.ledger.lock().unwrap();
        if let Some(entry) = ledger.entries.get_mut(key) {
            entry.last_viewed = Some(SystemTime::now());
        }
    }

    /// Pin a copy against eviction while a transfer is in flight
    pub fn pin(&self, key: &AttachmentKey, copy: CopyKind) {
        let mut ledger = self.ledger.lock().unwrap();
        ledger.pinned.insert((key.clone(), copy));
    }

    /// Release an eviction pin
    pub fn unpin(&self, key: &AttachmentKey, copy: CopyKind) {
        let mut ledger = self.ledger.lock().unwrap();
        ledger.pinned.remove(&(key.clone(), copy));
    }

    /// Total bytes currently held by the cache
    pub fn current_size_bytes(&self) -> u64 {
        let ledger = self.ledger.lock().unwrap();
        ledger
            .entries
            .values()
            .map(|e| {
                e.original.as_ref().map_or(0, |c| c.size_bytes)
                    + e.modified.as_ref().map_or(0, |c| c.size_bytes)
            })
            .sum()
    }

    /// Evict least-recently-viewed originals until the cache fits `limit`
    ///
    /// Never touches pinned copies or modified copies (a modified slot
    /// only exists while unpushed). Stops when under the limit or when no
    /// eligible victim remains, reporting partial success rather than
    /// failing.
    pub fn evict_until_under(&self, limit: u64) -> EvictionReport {
        let mut ledger = self.ledger.lock().unwrap();

        let total: u64 = ledger
            .entries
            .values()
            .map(|e| {
                e.original.as_ref().map_or(0, |c| c.size_bytes)
                    + e.modified.as_ref().map_or(0, |c| c.size_bytes)
            })
            .sum();

        if total <= limit {
            return EvictionReport {
                bytes_freed: 0,
                bytes_remaining: total,
                evicted: 0,
                satisfied: true,
            };
        }

        // Candidates: originals of attachments with no transfer in
        // flight on either copy, least recently viewed first
        let mut candidates: Vec<(AttachmentKey, Option<SystemTime>, u64)> = ledger
            .entries
            .iter()
            .filter(|(key, entry)| {
                entry.original.is_some()
                    && !ledger.pinned.contains(&((*key).clone(), CopyKind::Original))
                    && !ledger.pinned.contains(&((*key).clone(), CopyKind::Modified))
            })
            .map(|(key, entry)| {
                let size = entry.original.as_ref().map_or(0, |c| c.size_bytes);
                (key.clone(), entry.last_viewed, size)
            })
            .collect();
        candidates.sort_by(|a, b| a.1.cmp(&b.1));

        let mut remaining = total;
        let mut freed: u64 = 0;
        let mut evicted = 0;

        for (key, _, size) in candidates {
            if remaining <= limit {
                break;
            }
            let entry = match ledger.entries.get_mut(&key) {
                Some(entry) => entry,
                None => continue,
            };
            if let Some(state) = entry.original.take() {
                if let Err(e) = fs::remove_file(&state.path) {
                    if e.kind() != std::io::ErrorKind::NotFound {
                        warn!(path = %state.path.display(), error = %e, "Failed to evict cached file");
                        entry.original = Some(state);
                        continue;
                    }
                }
                debug!(key = %key, size = size, "Evicted cached attachment");
                freed += size;
                remaining -= size;
                evicted += 1;
            }
            if ledger.entries.get(&key).map_or(false, CacheState::is_empty) {
                ledger.entries.remove(&key);
            }
        }

        let satisfied = remaining <= limit;
        if !satisfied {
            warn!(
                remaining = remaining,
                limit = limit,
                "Eviction ran out of eligible victims"
            );
        }

        ledger.purge_log.push_back(PurgeRecord {
            timestamp: SystemTime::now(),
            key: AttachmentKey::from("<eviction>"),
            copy: CopyKind::Original,
            reason: format!("evicted {} copies, freed {} bytes", evicted, freed),
            removed: evicted > 0,
        });
        if ledger.purge_log.len() > MAX_PURGE_HISTORY {
            ledger.purge_log.pop_front();
        }

        EvictionReport {
            bytes_freed: freed,
            bytes_remaining: remaining,
            evicted,
            satisfied,
        }
    }

    /// Remove stale temp files left by interrupted downloads
    pub fn cleanup(&self) {
        if let Ok(read_dir) = fs::read_dir(&self.cache_dir) {
            for entry in read_dir.flatten() {
                let path = entry.path();
                let name = entry.file_name();
                if name.to_string_lossy().starts_with(".tmp") {
                    debug!(path = %path.display(), "Removing stale temp file");
                    let _ = fs::remove_file(&path);
                }
            }
        }
    }

    /// Root directory of the cache
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }
}

/// Encode (key, filename) into one collision-free path component
///
/// Both parts are base64url without padding, joined with '.', which the
/// base64url alphabet never produces, so the encoding is reversible.
pub fn encode_cache_filename(key: &AttachmentKey, filename: &str) -> String {
    format!(
        "{}.{}",
        URL_SAFE_NO_PAD.encode(key.as_str()),
        URL_SAFE_NO_PAD.encode(filename)
    )
}

/// Recover (key, filename) from an encoded cache path component
pub fn decode_cache_filename(name: &str) -> Option<(String, String)> {
    let (enc_key, enc_name) = name.split_once('.')?;
    let key = String::from_utf8(URL_SAFE_NO_PAD.decode(enc_key).ok()?).ok()?;
    let filename = String::from_utf8(URL_SAFE_NO_PAD.decode(enc_name).ok()?).ok()?;
    Some((key, filename))
}
