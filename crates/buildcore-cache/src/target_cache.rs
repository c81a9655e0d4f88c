//! TargetCache: target → artifact mapping.

use std::{
    collections::HashMap,
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use buildcore_cas::BlobStore;
use buildcore_types::{CacheEntry, Event, EventBus};
use camino::Utf8PathBuf;
use parking_lot::Mutex;

use crate::{
    eviction::{select_evictions, EvictionLimits, Evictable},
    format::{self, decode_cache_entry, encode_cache_entry, FormatError},
    key::target_cache_key,
};

impl Evictable for CacheEntry {
    fn last_accessed(&self) -> u64 {
        self.last_accessed
    }
    fn created_at(&self) -> u64 {
        self.created_at
    }
    fn size_bytes(&self) -> u64 {
        self.size_bytes
    }
}

fn now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

pub struct TargetCache {
    path: Utf8PathBuf,
    signing_key: [u8; 32],
    blobs: Arc<BlobStore>,
    limits: EvictionLimits,
    events: Arc<EventBus>,
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl TargetCache {
    pub fn open(path: Utf8PathBuf, signing_key: [u8; 32], blobs: Arc<BlobStore>, limits: EvictionLimits, events: Arc<EventBus>) -> Self {
        let entries = std::fs::read(path.as_std_path())
            .ok()
            .and_then(|bytes| format::read_file(&signing_key, &bytes, decode_cache_entry).ok())
            .map(|list| list.into_iter().map(|e| (e.target_id.clone(), e)).collect())
            .unwrap_or_else(|| {
                tracing::warn!(path = %path, "target cache missing or corrupt, starting fresh");
                HashMap::new()
            });

        Self {
            path,
            signing_key,
            blobs,
            limits,
            events,
            entries: Mutex::new(entries),
        }
    }

    /// `isCached(targetId, sources, deps)` : key exists, every
    /// source hash still matches, and every referenced output blob exists.
    #[tracing::instrument(skip(self, source_hashes, dep_output_hashes))]
    pub fn is_cached(&self, target_id: &str, source_hashes: &[String], dep_output_hashes: &[String]) -> bool {
        let key = target_cache_key(target_id, source_hashes, dep_output_hashes);
        let entries = self.entries.lock();
        let Some(entry) = entries.get(&key) else {
            return false;
        };
        entry
            .output_blob_ids
            .iter()
            .all(|blob| self.blobs.has(blob))
    }

    pub fn get(&self, target_id: &str, source_hashes: &[String], dep_output_hashes: &[String]) -> Option<CacheEntry> {
        let key = target_cache_key(target_id, source_hashes, dep_output_hashes);
        let mut entries = self.entries.lock();
        let entry = entries.get_mut(&key)?;
        entry.last_accessed = now();
        Some(entry.clone())
    }

    /// Records the entry and increments refCount on every output blob.
    pub fn update(
        &self,
        target_id: &str,
        source_hashes: &[String],
        dep_output_hashes: &[String],
        output_blob_ids: Vec<String>,
        output_hash_bundle: String,
        size_bytes: u64,
    ) {
        let key = target_cache_key(target_id, source_hashes, dep_output_hashes);
        let ts = now();
        for blob in &output_blob_ids {
            self.blobs.inc_ref(blob);
        }
        let entry = CacheEntry {
            target_id: target_id.to_string(),
            sources_fingerprint: source_hashes.join(","),
            deps_fingerprint: dep_output_hashes.join(","),
            output_blob_ids,
            output_hash_bundle,
            created_at: ts,
            last_accessed: ts,
            size_bytes,
        };
        self.entries.lock().insert(key, entry);
    }

    /// Flushes to disk, applying eviction first.
    pub fn flush(&self) -> Result<(), FormatError> {
        let mut entries = self.entries.lock();
        let mut keys: Vec<String> = entries.keys().cloned().collect();
        keys.sort();
        let values: Vec<CacheEntry> = keys.iter().map(|k| entries[k].clone()).collect();

        let evicted = select_evictions(&values, &self.limits, now());
        for idx in &evicted {
            let key = &keys[*idx];
            if let Some(evicted_entry) = entries.remove(key) {
                for blob in &evicted_entry.output_blob_ids {
                    self.blobs.dec_ref(blob);
                }
                self.events.publish(Event::CacheEviction {
                    key: key.clone(),
                    reason: "lru_age_size",
                });
            }
        }

        let remaining: Vec<CacheEntry> = entries.values().cloned().collect();
        let bytes = format::write_file(&self.signing_key, &remaining, encode_cache_entry);
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent.as_std_path()).ok();
        }
        let tmp = self.path.with_extension("tmp");
        std::fs::write(tmp.as_std_path(), &bytes)
            .map_err(|_| FormatError::Truncated)?;
        std::fs::rename(tmp.as_std_path(), self.path.as_std_path()).map_err(|_| FormatError::Truncated)?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every blob hash referenced by a live entry, for GC reachability
    /// analysis.
    pub fn referenced_blob_ids(&self) -> Vec<String> {
        self.entries
            .lock()
            .values()
            .flat_map(|e| e.output_blob_ids.iter().cloned())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache(dir: &tempfile::TempDir) -> TargetCache {
        let blobs = Arc::new(BlobStore::new(Utf8PathBuf::from_path_buf(dir.path().join("cas")).unwrap()).unwrap());
        TargetCache::open(
            Utf8PathBuf::from_path_buf(dir.path().join("targets.bin")).unwrap(),
            [1u8; 32],
            blobs,
            EvictionLimits::default(),
            Arc::new(EventBus::new()),
        )
    }

    #[test]
    fn update_then_is_cached_with_unchanged_sources() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache(&dir);
        let blob = cache.blobs.put(b"output").unwrap();
        cache.update("w//p:t", &["h1".into()], &[], vec![blob], "bundle".into(), 10);
        assert!(cache.is_cached("w//p:t", &["h1".into()], &[]));
    }

    #[test]
    fn is_cached_false_after_source_changes() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache(&dir);
        let blob = cache.blobs.put(b"output").unwrap();
        cache.update("w//p:t", &["h1".into()], &[], vec![blob], "bundle".into(), 10);
        assert!(!cache.is_cached("w//p:t", &["h1-changed".into()], &[]));
    }

    #[test]
    fn flush_persists_and_reload_restores_state() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache(&dir);
        let blob = cache.blobs.put(b"output").unwrap();
        cache.update("w//p:t", &["h1".into()], &[], vec![blob.clone()], "bundle".into(), 10);
        cache.flush().unwrap();

        let blobs2 = cache.blobs.clone();
        let reopened = TargetCache::open(cache.path.clone(), cache.signing_key, blobs2, cache.limits, Arc::new(EventBus::new()));
        assert!(reopened.is_cached("w//p:t", &["h1".into()], &[]));
    }

    #[test]
    fn flush_publishes_eviction_event() {
        let dir = tempfile::tempdir().unwrap();
        let blobs = Arc::new(BlobStore::new(Utf8PathBuf::from_path_buf(dir.path().join("cas")).unwrap()).unwrap());
        let events = Arc::new(EventBus::new());
        let limits = EvictionLimits {
            max_entries: 1,
            max_bytes: u64::MAX,
            max_age_secs: u64::MAX,
        };
        let cache = TargetCache::open(Utf8PathBuf::from_path_buf(dir.path().join("targets.bin")).unwrap(), [1u8; 32], blobs, limits, events.clone());
        let rx = events.subscribe();

        let blob_a = cache.blobs.put(b"a").unwrap();
        cache.update("w//p:a", &["h1".into()], &[], vec![blob_a], "bundle".into(), 1);
        let blob_b = cache.blobs.put(b"b").unwrap();
        cache.update("w//p:b", &["h2".into()], &[], vec![blob_b], "bundle".into(), 1);
        cache.flush().unwrap();

        assert!(rx.try_iter().any(|event| matches!(event, Event::CacheEviction { .. })));
    }

    #[test]
    fn missing_blob_invalidates_cache_hit() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache(&dir);
        cache.update("w//p:t", &["h1".into()], &[], vec!["nonexistent-blob".into()], "bundle".into(), 10);
        assert!(!cache.is_cached("w//p:t", &["h1".into()], &[]));
    }
}
