//! BLAKE3-based content hashing.
//!
//! BLAKE3 already dispatches to the best available SIMD kernel
//! (AVX-512/AVX2/SSE4.1/NEON/portable) the first time it is invoked in a
//! process, so `Hasher` doesn't reimplement kernel selection — it just owns
//! that one-time dispatch behind a cheap, cloneable handle, the same shape
//! `turborepo-hash::TurboHash` wraps around `xxhash_rust`.

use std::{
    fs::File,
    io::{self, BufReader, Read},
};

use camino::Utf8Path;
use thiserror::Error;

/// Chunk size for streaming file hashes; large enough to amortize syscalls,
/// small enough to keep peak memory bounded for huge inputs.
const STREAM_CHUNK: usize = 64 * 1024;

#[derive(Debug, Error)]
pub enum HashError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
}

/// A 32-byte BLAKE3 digest.
pub type Digest = [u8; 32];

/// Hasher handle. Cheap to clone; `blake3::Hasher::new()` performs the
/// one-time CPU feature probe internally and the result (a function pointer
/// table) is cached process-wide by the `blake3` crate itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct Hasher;

impl Hasher {
    pub fn new() -> Self {
        Self
    }

    pub fn hash_bytes(&self, bytes: &[u8]) -> Digest {
        *blake3::hash(bytes).as_bytes()
    }

    /// Streams file content through BLAKE3 in fixed chunks rather than
    /// reading the whole file into memory.
    #[tracing::instrument(skip(self), fields(path = %path))]
    pub fn hash_file(&self, path: &Utf8Path) -> Result<Digest, HashError> {
        let file = File::open(path).map_err(|source| HashError::Io {
            path: path.to_string(),
            source,
        })?;
        let mut reader = BufReader::with_capacity(STREAM_CHUNK, file);
        let mut hasher = blake3::Hasher::new();
        let mut buf = [0u8; STREAM_CHUNK];
        loop {
            let n = reader.read(&mut buf).map_err(|source| HashError::Io {
                path: path.to_string(),
                source,
            })?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(*hasher.finalize().as_bytes())
    }

    /// `BLAKE3(size ⋄ mtime ⋄ mode)` — a cheap proxy for file identity that
    /// changes whenever the file's `stat` changes, without reading content.
    #[tracing::instrument(skip(self), fields(path = %path))]
    pub fn hash_metadata(&self, path: &Utf8Path) -> Result<Digest, HashError> {
        let meta = std::fs::metadata(path.as_std_path()).map_err(|source| HashError::Io {
            path: path.to_string(),
            source,
        })?;
        let size = meta.len();
        let mtime = mtime_nanos(&meta);
        let mode = file_mode(&meta);
        Ok(self.hash_metadata_parts(size, mtime, mode))
    }

    fn hash_metadata_parts(&self, size: u64, mtime: i64, mode: u32) -> Digest {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&size.to_le_bytes());
        hasher.update(&mtime.to_le_bytes());
        hasher.update(&mode.to_le_bytes());
        *hasher.finalize().as_bytes()
    }

    /// Batched parallel hashing via `rayon`, for `FileTracker::trackBatch`
    /// and similar callers that need many independent hashes at once.
    pub fn hash_many(&self, chunks: &[&[u8]]) -> Vec<Digest> {
        use rayon::prelude::*;
        chunks.par_iter().map(|c| self.hash_bytes(c)).collect()
    }

    /// 8-hex-char display form, for logs only — never used as a cache key.
    pub fn short(digest: &Digest) -> String {
        hex::encode(&digest[..4])
    }
}

#[cfg(unix)]
fn mtime_nanos(meta: &std::fs::Metadata) -> i64 {
    use std::os::unix::fs::MetadataExt;
    meta.mtime() * 1_000_000_000 + meta.mtime_nsec()
}

#[cfg(not(unix))]
fn mtime_nanos(meta: &std::fs::Metadata) -> i64 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}

#[cfg(unix)]
fn file_mode(meta: &std::fs::Metadata) -> u32 {
    use std::os::unix::fs::MetadataExt;
    meta.mode()
}

#[cfg(not(unix))]
fn file_mode(meta: &std::fs::Metadata) -> u32 {
    u32::from(meta.permissions().readonly())
}
