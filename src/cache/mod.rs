//! Attachment file caching layer
//!
//! Filesystem layout, atomic staging, purge auditing, and LRU eviction
//! for locally cached attachment copies.

pub mod store;

pub use store::{
    decode_cache_filename, encode_cache_filename, CacheState, CacheStore, CopyState,
    EvictionReport, PurgeRecord,
};
