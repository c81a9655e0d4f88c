//! Content-addressable `BlobStore`.
//!
//! Layout mirrors `darinkishore-hurry`'s `LocalCas`: two levels of
//! hex-prefix sharding (`cas/aa/bb/<full-hash>`), atomic writes via
//! temp-file-then-rename, and a companion refcount index flushed the same
//! way. Unlike `LocalCas`, blobs are stored uncompressed — compression
//! happens at the `RemoteCache` tier instead.

use std::{
    collections::HashMap,
    fs,
    io::Write,
};

use camino::{Utf8Path, Utf8PathBuf};
use parking_lot::Mutex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CasError {
    #[error("io error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("blob {0} not found")]
    NotFound(String),
    #[error("cannot delete blob {0}: refCount is {1}, must be 0")]
    StillReferenced(String, u64),
    #[error("corrupt refcount index, discarding: {0}")]
    CorruptIndex(String),
}

fn io_err(path: &Utf8Path, source: std::io::Error) -> CasError {
    CasError::Io {
        path: path.to_string(),
        source,
    }
}

/// In-memory refcount index, persisted to `cas/index`.
#[derive(Debug, Default)]
struct Index {
    counts: HashMap<String, u64>,
}

impl Index {
    fn load(path: &Utf8Path) -> Self {
        let Ok(content) = fs::read_to_string(path.as_std_path()) else {
            return Self::default();
        };
        let mut counts = HashMap::new();
        for line in content.lines() {
            let Some((hash, count)) = line.split_once(' ') else {
                tracing::warn!("corrupt cas index line, discarding index: {line:?}");
                return Self::default();
            };
            match count.parse() {
                Ok(n) => {
                    counts.insert(hash.to_string(), n);
                }
                Err(_) => {
                    tracing::warn!("corrupt cas index count, discarding index: {line:?}");
                    return Self::default();
                }
            }
        }
        Self { counts }
    }

    fn save(&self, path: &Utf8Path) -> Result<(), CasError> {
        let tmp = path.with_extension("tmp");
        let mut body = String::new();
        let mut keys: Vec<_> = self.counts.keys().collect();
        keys.sort();
        for k in keys {
            body.push_str(&format!("{k} {}\n", self.counts[k]));
        }
        {
            let mut f = fs::File::create(tmp.as_std_path()).map_err(|e| io_err(&tmp, e))?;
            f.write_all(body.as_bytes()).map_err(|e| io_err(&tmp, e))?;
            f.sync_all().map_err(|e| io_err(&tmp, e))?;
        }
        fs::rename(tmp.as_std_path(), path.as_std_path()).map_err(|e| io_err(path, e))?;
        Ok(())
    }
}

pub struct BlobStore {
    root: Utf8PathBuf,
    index: Mutex<Index>,
}

impl BlobStore {
    pub fn new(root: impl Into<Utf8PathBuf>) -> Result<Self, CasError> {
        let root = root.into();
        fs::create_dir_all(root.as_std_path()).map_err(|e| io_err(&root, e))?;
        let index = Index::load(&root.join("index"));
        Ok(Self {
            root,
            index: Mutex::new(index),
        })
    }

    fn shard_path(&self, hash: &str) -> Utf8PathBuf {
        self.root.join(&hash[0..2]).join(&hash[2..4]).join(hash)
    }

    fn index_path(&self) -> Utf8PathBuf {
        self.root.join("index")
    }

    fn flush_index(&self) -> Result<(), CasError> {
        self.index.lock().save(&self.index_path())
    }

    /// Stores `bytes`, returning the BLAKE3 hex hash. Deduplicates: if the
    /// blob already exists, its refCount is incremented instead of
    /// rewriting the file.
    #[tracing::instrument(skip(self, bytes))]
    pub fn put(&self, bytes: &[u8]) -> Result<String, CasError> {
        let hash = blake3::hash(bytes).to_hex().to_string();
        let path = self.shard_path(&hash);

        if !path.as_std_path().exists() {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent.as_std_path()).map_err(|e| io_err(parent, e))?;
            }
            let tmp = path.with_extension(format!("tmp-{}", std::process::id()));
            {
                let mut f = fs::File::create(tmp.as_std_path()).map_err(|e| io_err(&tmp, e))?;
                f.write_all(bytes).map_err(|e| io_err(&tmp, e))?;
                f.sync_all().map_err(|e| io_err(&tmp, e))?;
            }
            fs::rename(tmp.as_std_path(), path.as_std_path()).map_err(|e| io_err(&path, e))?;
        }

        let mut index = self.index.lock();
        *index.counts.entry(hash.clone()).or_insert(0) += 1;
        index.save(&self.index_path())?;
        Ok(hash)
    }

    pub fn get(&self, hash: &str) -> Result<Vec<u8>, CasError> {
        let path = self.shard_path(hash);
        fs::read(path.as_std_path()).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                CasError::NotFound(hash.to_string())
            } else {
                io_err(&path, e)
            }
        })
    }

    pub fn has(&self, hash: &str) -> bool {
        self.shard_path(hash).as_std_path().exists()
    }

    pub fn inc_ref(&self, hash: &str) {
        let mut index = self.index.lock();
        *index.counts.entry(hash.to_string()).or_insert(0) += 1;
        let _ = index.save(&self.index_path());
    }

    pub fn dec_ref(&self, hash: &str) {
        let mut index = self.index.lock();
        if let Some(count) = index.counts.get_mut(hash) {
            *count = count.saturating_sub(1);
        }
        let _ = index.save(&self.index_path());
    }

    pub fn ref_count(&self, hash: &str) -> u64 {
        self.index.lock().counts.get(hash).copied().unwrap_or(0)
    }

    pub fn list(&self) -> Vec<String> {
        self.index.lock().counts.keys().cloned().collect()
    }

    /// Size of the stored blob in bytes, if present on disk.
    pub fn size_of(&self, hash: &str) -> Option<u64> {
        fs::metadata(self.shard_path(hash).as_std_path())
            .ok()
            .map(|m| m.len())
    }

    /// Deletes the blob only if its refCount has reached zero.
    pub fn delete(&self, hash: &str) -> Result<(), CasError> {
        let count = self.ref_count(hash);
        if count != 0 {
            return Err(CasError::StillReferenced(hash.to_string(), count));
        }
        let path = self.shard_path(hash);
        if path.as_std_path().exists() {
            fs::remove_file(path.as_std_path()).map_err(|e| io_err(&path, e))?;
        }
        self.index.lock().counts.remove(hash);
        self.flush_index()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_dedups_and_increments_refcount() {
        let dir = tempfile::tempdir().unwrap();
        let store = BlobStore::new(Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap()).unwrap();

        let h1 = store.put(b"hello").unwrap();
        let h2 = store.put(b"hello").unwrap();
        assert_eq!(h1, h2);
        assert_eq!(store.ref_count(&h1), 2);
    }

    #[test]
    fn delete_rejected_until_refcount_zero() {
        let dir = tempfile::tempdir().unwrap();
        let store = BlobStore::new(Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap()).unwrap();

        let h = store.put(b"hello").unwrap();
        store.put(b"hello").unwrap();
        assert!(store.delete(&h).is_err());

        store.dec_ref(&h);
        store.dec_ref(&h);
        assert!(store.delete(&h).is_ok());
        assert!(!store.has(&h));
    }

    #[test]
    fn get_roundtrips_content() {
        let dir = tempfile::tempdir().unwrap();
        let store = BlobStore::new(Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap()).unwrap();
        let h = store.put(b"payload").unwrap();
        assert_eq!(store.get(&h).unwrap(), b"payload");
    }

    #[test]
    fn index_persists_across_store_instances() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let h = {
            let store = BlobStore::new(root.clone()).unwrap();
            store.put(b"payload").unwrap()
        };
        let reopened = BlobStore::new(root).unwrap();
        assert_eq!(reopened.ref_count(&h), 1);
        assert!(reopened.has(&h));
    }
}
