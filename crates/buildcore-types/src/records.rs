//! File/cache/action records.

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

/// `{path, metadataHash, contentHash, size, mtime, exists}` .
///
/// Invariant: if `content_hash` is `Some`, `metadata_hash` was recomputed at
/// the same tracked moment (enforced by `FileTracker`, not by this type).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileState {
    pub path: Utf8PathBuf,
    pub metadata_hash: [u8; 32],
    pub content_hash: Option<[u8; 32]>,
    pub size: u64,
    pub mtime: i64,
    pub exists: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    Unchanged,
    Modified,
    New,
    Deleted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeResult {
    pub has_changed: bool,
    pub content_hash: Option<[u8; 32]>,
    pub kind: ChangeKind,
}

/// `{kind, primaryInputHash, toolchainFingerprint}` — stable action key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ActionId {
    pub kind: String,
    pub primary_input_hash: [u8; 32],
    pub toolchain_fingerprint: [u8; 32],
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CacheEntry {
    pub target_id: String,
    pub sources_fingerprint: String,
    pub deps_fingerprint: String,
    pub output_blob_ids: Vec<String>,
    pub output_hash_bundle: String,
    pub created_at: u64,
    pub last_accessed: u64,
    pub size_bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActionEntry {
    pub action_id: String,
    pub inputs_fingerprint: String,
    pub output_blob_ids: Vec<String>,
    pub metadata_kv: Vec<(String, String)>,
    pub created_at: u64,
    pub last_accessed: u64,
    pub success: bool,
}

/// Raw bytes keyed by `BLAKE3(bytes)`; a refCount of 0 means GC-eligible.
#[derive(Debug, Clone)]
pub struct Blob {
    pub hash: String,
    pub ref_count: u64,
    pub size_bytes: u64,
}
