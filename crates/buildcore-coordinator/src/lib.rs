//! `CacheCoordinator`: unifies TargetCache → ActionCache → RemoteCache
//! behind one lookup path, with the inverse write path, event emission, and
//! reachability-based garbage collection.

use std::{
    collections::HashSet,
    sync::Arc,
};

use buildcore_cache::{ActionCache, ActionOutcome, TargetCache};
use buildcore_cas::BlobStore;
use buildcore_remote_cache::RemoteCache;
use buildcore_types::{Event, EventBus};

/// Where an artifact was ultimately found, for the `CacheHit` event's `tier`
/// field.
const TIER_TARGET: &str = "target";
const TIER_ACTION: &str = "action";
const TIER_REMOTE: &str = "remote";

/// GC is triggered automatically once orphaned bytes exceed this fraction of
/// total blob bytes.
const GC_ORPHAN_RATIO_THRESHOLD: f64 = 0.2;

pub struct CacheCoordinator {
    targets: TargetCache,
    actions: ActionCache,
    remote: Option<Arc<dyn RemoteCache>>,
    blobs: Arc<BlobStore>,
    events: Arc<EventBus>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GcStats {
    pub scanned: u64,
    pub reachable: u64,
    pub deleted: u64,
    pub bytes_freed: u64,
}

impl CacheCoordinator {
    pub fn new(
        targets: TargetCache,
        actions: ActionCache,
        remote: Option<Arc<dyn RemoteCache>>,
        blobs: Arc<BlobStore>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            targets,
            actions,
            remote,
            blobs,
            events,
        }
    }

    pub fn targets(&self) -> &TargetCache {
        &self.targets
    }

    pub fn actions(&self) -> &ActionCache {
        &self.actions
    }

    /// Target-tier lookup path: TargetCache → RemoteCache is not consulted
    /// here (RemoteCache only stores action outputs through a blob-shaped
    /// API); this is the executor's `isCached` check.
    #[tracing::instrument(skip(self, source_hashes, dep_output_hashes), fields(target_id))]
    pub fn is_target_cached(&self, target_id: &str, source_hashes: &[String], dep_output_hashes: &[String]) -> bool {
        let key = format!("{target_id}|{}|{}", source_hashes.join(","), dep_output_hashes.join(","));
        let hit = self.targets.is_cached(target_id, source_hashes, dep_output_hashes);
        if hit {
            tracing::trace!(key = %key, "target cache hit");
            self.events.publish(Event::CacheHit { key, tier: TIER_TARGET });
        } else {
            tracing::trace!(key = %key, "target cache miss");
            self.events.publish(Event::CacheMiss { key });
        }
        hit
    }

    pub fn update_target(
        &self,
        target_id: &str,
        source_hashes: &[String],
        dep_output_hashes: &[String],
        output_blob_ids: Vec<String>,
        output_hash_bundle: String,
        size_bytes: u64,
    ) {
        self.targets.update(
            target_id,
            source_hashes,
            dep_output_hashes,
            output_blob_ids,
            output_hash_bundle,
            size_bytes,
        );
        self.events.publish(Event::CacheUpdate {
            key: target_id.to_string(),
        });
    }

    /// Action-tier lookup: ActionCache first, then RemoteCache (if
    /// configured) for the action's outputs. A remote hit is copied into the
    /// local blob store and recorded in ActionCache so subsequent lookups
    /// are local ("update writes on the inverse path").
    #[tracing::instrument(skip(self, input_hashes, metadata_kv), fields(action_id))]
    pub fn lookup_action(&self, action_id: &str, input_hashes: &[String], metadata_kv: &[(String, String)]) -> ActionOutcome {
        let key = action_id.to_string();
        match self.actions.lookup(action_id, input_hashes, metadata_kv) {
            ActionOutcome::Hit => {
                tracing::trace!(key = %key, "action cache hit");
                self.events.publish(Event::CacheHit { key, tier: TIER_ACTION });
                ActionOutcome::Hit
            }
            ActionOutcome::KnownFailure => ActionOutcome::KnownFailure,
            ActionOutcome::Miss => {
                if let Some(outputs) = self.try_remote_fill(action_id, input_hashes, metadata_kv) {
                    tracing::debug!(key = %key, "filled from remote cache");
                    self.events.publish(Event::RemoteHit { key: key.clone() });
                    self.actions.record_success(action_id, input_hashes, metadata_kv, outputs);
                    self.events.publish(Event::CacheHit { key, tier: TIER_REMOTE });
                    return ActionOutcome::Hit;
                }
                tracing::trace!(key = %key, "action cache miss");
                self.events.publish(Event::CacheMiss { key });
                ActionOutcome::Miss
            }
        }
    }

    fn try_remote_fill(&self, action_id: &str, input_hashes: &[String], metadata_kv: &[(String, String)]) -> Option<Vec<String>> {
        let remote = self.remote.as_ref()?;
        // The action's expected output blob hashes are not knowable without
        // running it; remote fill only helps once we already recorded output
        // blob ids for this key previously (e.g. from a peer in a shared
        // workspace cache). Absent that, there is nothing to pull.
        let known_outputs = self.actions.get_outputs(action_id, input_hashes, metadata_kv)?;
        let mut fetched = Vec::with_capacity(known_outputs.len());
        for hash in known_outputs {
            match remote.get(&hash) {
                Ok(Some(bytes)) => {
                    let stored = self.blobs.put(&bytes).ok()?;
                    fetched.push(stored);
                }
                _ => return None,
            }
        }
        Some(fetched)
    }

    pub fn record_action_success(&self, action_id: &str, input_hashes: &[String], metadata_kv: &[(String, String)], output_blob_ids: Vec<String>) {
        if let Some(remote) = &self.remote {
            for hash in &output_blob_ids {
                if let Ok(bytes) = self.blobs.get(hash) {
                    if remote.put(hash, &bytes).is_ok() {
                        self.events.publish(Event::RemotePush { key: hash.clone() });
                    }
                }
            }
        }
        self.actions.record_success(action_id, input_hashes, metadata_kv, output_blob_ids);
        self.events.publish(Event::CacheUpdate {
            key: action_id.to_string(),
        });
    }

    pub fn record_action_failure(&self, action_id: &str, input_hashes: &[String], metadata_kv: &[(String, String)]) {
        self.actions.record_failure(action_id, input_hashes, metadata_kv);
    }

    pub fn flush(&self) -> Result<(), buildcore_cache::FormatError> {
        self.targets.flush()?;
        self.actions.flush()?;
        Ok(())
    }

    /// Mark-sweep GC: every blob hash reachable from a live TargetCache or
    /// ActionCache entry is kept; anything else in the BlobStore is deleted.
    /// Triggered explicitly (here) or by `should_gc`.
    #[tracing::instrument(skip(self))]
    pub fn gc(&self) -> GcStats {
        tracing::info!("starting cache gc pass");
        self.events.publish(Event::GcStarted);

        let reachable: HashSet<String> = self
            .targets
            .referenced_blob_ids()
            .into_iter()
            .chain(self.actions.referenced_blob_ids())
            .collect();

        let all = self.blobs.list();
        let scanned = all.len() as u64;
        let mut deleted = 0u64;
        let mut bytes_freed = 0u64;

        for hash in &all {
            if reachable.contains(hash) {
                continue;
            }
            if self.blobs.ref_count(hash) != 0 {
                continue;
            }
            let size = self.blobs.size_of(hash).unwrap_or(0);
            if self.blobs.delete(hash).is_ok() {
                deleted += 1;
                bytes_freed += size;
            }
        }

        let stats = GcStats {
            scanned,
            reachable: reachable.len() as u64,
            deleted,
            bytes_freed,
        };
        tracing::info!(scanned = stats.scanned, deleted = stats.deleted, bytes_freed = stats.bytes_freed, "cache gc pass complete");
        self.events.publish(Event::GcCompleted {
            scanned: stats.scanned,
            reachable: stats.reachable,
            deleted: stats.deleted,
            bytes_freed: stats.bytes_freed,
        });
        stats
    }

    /// Whether orphaned bytes (unreferenced, refCount-zero blobs) exceed the
    /// configured threshold and an automatic GC pass should run.
    pub fn should_gc(&self) -> bool {
        let reachable: HashSet<String> = self
            .targets
            .referenced_blob_ids()
            .into_iter()
            .chain(self.actions.referenced_blob_ids())
            .collect();

        let all = self.blobs.list();
        let mut total_bytes = 0u64;
        let mut orphan_bytes = 0u64;
        for hash in &all {
            let size = self.blobs.size_of(hash).unwrap_or(0);
            total_bytes += size;
            if !reachable.contains(hash) && self.blobs.ref_count(hash) == 0 {
                orphan_bytes += size;
            }
        }
        if total_bytes == 0 {
            return false;
        }
        (orphan_bytes as f64 / total_bytes as f64) > GC_ORPHAN_RATIO_THRESHOLD
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use buildcore_cache::EvictionLimits;
    use camino::Utf8PathBuf;

    fn coordinator(dir: &tempfile::TempDir) -> CacheCoordinator {
        let blobs = Arc::new(BlobStore::new(Utf8PathBuf::from_path_buf(dir.path().join("cas")).unwrap()).unwrap());
        let events = Arc::new(EventBus::new());
        let targets = TargetCache::open(
            Utf8PathBuf::from_path_buf(dir.path().join("targets.bin")).unwrap(),
            [3u8; 32],
            blobs.clone(),
            EvictionLimits::default(),
            events.clone(),
        );
        let actions = ActionCache::open(
            Utf8PathBuf::from_path_buf(dir.path().join("actions.bin")).unwrap(),
            [4u8; 32],
            blobs.clone(),
            EvictionLimits::default(),
            events.clone(),
        );
        CacheCoordinator::new(targets, actions, None, blobs, events)
    }

    #[test]
    fn gc_deletes_only_unreferenced_blobs() {
        let dir = tempfile::tempdir().unwrap();
        let coord = coordinator(&dir);

        let kept = coord.blobs.put(b"kept").unwrap();
        let orphan = coord.blobs.put(b"orphan").unwrap();
        coord.blobs.dec_ref(&orphan); // drop the put()-assigned refcount

        coord.update_target("w//p:t", &["h1".into()], &[], vec![kept.clone()], "bundle".into(), 4);

        let stats = coord.gc();
        assert_eq!(stats.deleted, 1);
        assert!(coord.blobs.has(&kept));
        assert!(!coord.blobs.has(&orphan));
    }

    #[test]
    fn is_target_cached_emits_hit_then_miss_events() {
        let dir = tempfile::tempdir().unwrap();
        let coord = coordinator(&dir);
        let rx = coord.events.subscribe();

        let blob = coord.blobs.put(b"out").unwrap();
        coord.update_target("w//p:t", &["h1".into()], &[], vec![blob], "bundle".into(), 3);
        assert!(coord.is_target_cached("w//p:t", &["h1".into()], &[]));
        assert!(!coord.is_target_cached("w//p:t", &["h2".into()], &[]));

        let mut saw_update = false;
        let mut saw_hit = false;
        let mut saw_miss = false;
        while let Ok(event) = rx.try_recv() {
            match event {
                Event::CacheUpdate { .. } => saw_update = true,
                Event::CacheHit { .. } => saw_hit = true,
                Event::CacheMiss { .. } => saw_miss = true,
                _ => {}
            }
        }
        assert!(saw_update && saw_hit && saw_miss);
    }

    #[test]
    fn should_gc_false_when_nothing_orphaned() {
        let dir = tempfile::tempdir().unwrap();
        let coord = coordinator(&dir);
        let blob = coord.blobs.put(b"out").unwrap();
        coord.update_target("w//p:t", &["h1".into()], &[], vec![blob], "bundle".into(), 3);
        assert!(!coord.should_gc());
    }
}
