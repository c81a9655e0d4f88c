//! Versioned, signed on-disk cache tier: `TargetCache` and `ActionCache`
//! over a shared binary file format, with hybrid LRU+age+size eviction
//!.

pub mod action_cache;
pub mod eviction;
pub mod format;
pub mod key;
pub mod target_cache;

pub use action_cache::{ActionCache, ActionOutcome};
pub use eviction::{EvictionLimits, Evictable};
pub use format::FormatError;
pub use target_cache::TargetCache;

use std::sync::Arc;

use buildcore_cas::BlobStore;
use buildcore_types::EventBus;
use camino::Utf8PathBuf;

/// Owns both cache tiers over one `BlobStore`, matching /// "one lock per cache" rule — `TargetCache` and `ActionCache` each guard
/// their own entry map independently.
pub struct CacheTiers {
    pub targets: TargetCache,
    pub actions: ActionCache,
}

impl CacheTiers {
    pub fn open(root: Utf8PathBuf, signing_key: [u8; 32], blobs: Arc<BlobStore>, limits: EvictionLimits, events: Arc<EventBus>) -> Self {
        let targets = TargetCache::open(root.join("targets.bin"), signing_key, blobs.clone(), limits, events.clone());
        let actions = ActionCache::open(root.join("actions.bin"), signing_key, blobs, limits, events);
        Self { targets, actions }
    }

    pub fn flush(&self) -> Result<(), FormatError> {
        self.targets.flush()?;
        self.actions.flush()?;
        Ok(())
    }
}
