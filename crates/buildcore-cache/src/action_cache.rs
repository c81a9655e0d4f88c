//! ActionCache: per-action result cache, stricter than TargetCache.
//!
//! Keys include toolchain/flag metadata, so a flag change invalidates the
//! entry even when no source file did. Unsuccessful actions are also
//! recorded (`success: false`) so a retry within the same session doesn't
//! repeat a step already known to fail.

use std::{
    collections::HashMap,
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use buildcore_cas::BlobStore;
use buildcore_types::{ActionEntry, Event, EventBus};
use camino::Utf8PathBuf;
use parking_lot::Mutex;

use crate::{
    eviction::{select_evictions, EvictionLimits, Evictable},
    format::{self, decode_action_entry, encode_action_entry, FormatError},
    key::action_cache_key,
};

impl Evictable for ActionEntry {
    fn last_accessed(&self) -> u64 {
        self.last_accessed
    }
    fn created_at(&self) -> u64 {
        self.created_at
    }
    fn size_bytes(&self) -> u64 {
        // ActionCache entries don't track blob size directly; size pressure
        // on this tier is bounded by entry count and age, not bytes.
        0
    }
}

fn now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionOutcome {
    Hit,
    KnownFailure,
    Miss,
}

pub struct ActionCache {
    path: Utf8PathBuf,
    signing_key: [u8; 32],
    blobs: Arc<BlobStore>,
    limits: EvictionLimits,
    events: Arc<EventBus>,
    entries: Mutex<HashMap<String, ActionEntry>>,
}

impl ActionCache {
    pub fn open(path: Utf8PathBuf, signing_key: [u8; 32], blobs: Arc<BlobStore>, limits: EvictionLimits, events: Arc<EventBus>) -> Self {
        let entries = std::fs::read(path.as_std_path())
            .ok()
            .and_then(|bytes| format::read_file(&signing_key, &bytes, decode_action_entry).ok())
            .map(|list| list.into_iter().map(|e| (e.action_id.clone(), e)).collect())
            .unwrap_or_else(|| {
                tracing::warn!(path = %path, "action cache missing or corrupt, starting fresh");
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

    /// Looks up an action result. `Hit` means outputs are cached and all
    /// output blobs still exist; `KnownFailure` means this exact action was
    /// already attempted and failed, so the caller should not retry it;
    /// `Miss` means the action has never been recorded (or its key changed).
    pub fn lookup(&self, action_id: &str, input_hashes: &[String], metadata_kv: &[(String, String)]) -> ActionOutcome {
        let key = action_cache_key(action_id, input_hashes, metadata_kv);
        let mut entries = self.entries.lock();
        let Some(entry) = entries.get_mut(&key) else {
            return ActionOutcome::Miss;
        };
        entry.last_accessed = now();
        if !entry.success {
            return ActionOutcome::KnownFailure;
        }
        if entry.output_blob_ids.iter().all(|blob| self.blobs.has(blob)) {
            ActionOutcome::Hit
        } else {
            ActionOutcome::Miss
        }
    }

    pub fn get_outputs(&self, action_id: &str, input_hashes: &[String], metadata_kv: &[(String, String)]) -> Option<Vec<String>> {
        let key = action_cache_key(action_id, input_hashes, metadata_kv);
        self.entries.lock().get(&key).map(|e| e.output_blob_ids.clone())
    }

    pub fn record_success(
        &self,
        action_id: &str,
        input_hashes: &[String],
        metadata_kv: &[(String, String)],
        output_blob_ids: Vec<String>,
    ) {
        let key = action_cache_key(action_id, input_hashes, metadata_kv);
        let ts = now();
        for blob in &output_blob_ids {
            self.blobs.inc_ref(blob);
        }
        let entry = ActionEntry {
            action_id: action_id.to_string(),
            inputs_fingerprint: input_hashes.join(","),
            output_blob_ids,
            metadata_kv: metadata_kv.to_vec(),
            created_at: ts,
            last_accessed: ts,
            success: true,
        };
        self.entries.lock().insert(key, entry);
    }

    /// Records a failed attempt so repeated scheduling of the same action
    /// within this session short-circuits to `KnownFailure` instead of
    /// re-running a handler known to fail.
    pub fn record_failure(&self, action_id: &str, input_hashes: &[String], metadata_kv: &[(String, String)]) {
        let key = action_cache_key(action_id, input_hashes, metadata_kv);
        let ts = now();
        let entry = ActionEntry {
            action_id: action_id.to_string(),
            inputs_fingerprint: input_hashes.join(","),
            output_blob_ids: Vec::new(),
            metadata_kv: metadata_kv.to_vec(),
            created_at: ts,
            last_accessed: ts,
            success: false,
        };
        self.entries.lock().insert(key, entry);
    }

    pub fn flush(&self) -> Result<(), FormatError> {
        let mut entries = self.entries.lock();
        let mut keys: Vec<String> = entries.keys().cloned().collect();
        keys.sort();
        let values: Vec<ActionEntry> = keys.iter().map(|k| entries[k].clone()).collect();

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

        let remaining: Vec<ActionEntry> = entries.values().cloned().collect();
        let bytes = format::write_file(&self.signing_key, &remaining, encode_action_entry);
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent.as_std_path()).ok();
        }
        let tmp = self.path.with_extension("tmp");
        std::fs::write(tmp.as_std_path(), &bytes).map_err(|_| FormatError::Truncated)?;
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

    fn cache(dir: &tempfile::TempDir) -> ActionCache {
        let blobs = Arc::new(BlobStore::new(Utf8PathBuf::from_path_buf(dir.path().join("cas")).unwrap()).unwrap());
        ActionCache::open(
            Utf8PathBuf::from_path_buf(dir.path().join("actions.bin")).unwrap(),
            [2u8; 32],
            blobs,
            EvictionLimits::default(),
            Arc::new(EventBus::new()),
        )
    }

    #[test]
    fn miss_when_never_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache(&dir);
        assert_eq!(cache.lookup("compile", &["h1".into()], &[]), ActionOutcome::Miss);
    }

    #[test]
    fn hit_after_success_with_outputs_present() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache(&dir);
        let blob = cache.blobs.put(b"obj").unwrap();
        cache.record_success("compile", &["h1".into()], &[], vec![blob]);
        assert_eq!(cache.lookup("compile", &["h1".into()], &[]), ActionOutcome::Hit);
    }

    #[test]
    fn known_failure_short_circuits_without_rerun() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache(&dir);
        cache.record_failure("compile", &["h1".into()], &[]);
        assert_eq!(cache.lookup("compile", &["h1".into()], &[]), ActionOutcome::KnownFailure);
    }

    #[test]
    fn metadata_change_invalidates_entry() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache(&dir);
        let blob = cache.blobs.put(b"obj").unwrap();
        cache.record_success("compile", &["h1".into()], &[("flags".into(), "-O2".into())], vec![blob]);
        assert_eq!(
            cache.lookup("compile", &["h1".into()], &[("flags".into(), "-O3".into())]),
            ActionOutcome::Miss
        );
    }

    #[test]
    fn flush_persists_failures_and_successes() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache(&dir);
        cache.record_failure("compile", &["h1".into()], &[]);
        cache.flush().unwrap();

        let blobs2 = cache.blobs.clone();
        let reopened = ActionCache::open(cache.path.clone(), cache.signing_key, blobs2, cache.limits, Arc::new(EventBus::new()));
        assert_eq!(reopened.lookup("compile", &["h1".into()], &[]), ActionOutcome::KnownFailure);
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
        let cache = ActionCache::open(Utf8PathBuf::from_path_buf(dir.path().join("actions.bin")).unwrap(), [2u8; 32], blobs, limits, events.clone());
        let rx = events.subscribe();

        cache.record_success("compile_a", &["h1".into()], &[], vec![]);
        cache.record_success("compile_b", &["h2".into()], &[], vec![]);
        cache.flush().unwrap();

        assert!(rx.try_iter().any(|event| matches!(event, Event::CacheEviction { .. })));
    }
}
