//! Two-tier file change tracking.
//!
//! `check(path)` takes the cheap metadata path whenever the file's `stat`
//! hasn't moved at all, and only falls back to a full content hash when the
//! metadata changed — which also lets it recognize a pure `touch` (content
//! identical, mtime bumped) without declaring a change.

use std::collections::HashMap;

use buildcore_hash::Hasher;
use buildcore_types::{ChangeKind, ChangeResult, FileState};
use camino::{Utf8Path, Utf8PathBuf};
use parking_lot::Mutex;

#[derive(Debug, Default, Clone, Copy)]
pub struct Stats {
    pub metadata_checks: u64,
    pub content_hash_checks: u64,
    pub changes_detected: u64,
}

impl Stats {
    /// `1 − contentHashChecks / metadataChecks`, the proportion of checks
    /// that never had to touch file content.
    pub fn fast_path_rate(&self) -> f64 {
        if self.metadata_checks == 0 {
            return 1.0;
        }
        1.0 - (self.content_hash_checks as f64 / self.metadata_checks as f64)
    }
}

pub struct FileTracker {
    hasher: Hasher,
    state: Mutex<HashMap<Utf8PathBuf, FileState>>,
    stats: Mutex<Stats>,
}

impl Default for FileTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl FileTracker {
    pub fn new() -> Self {
        Self {
            hasher: Hasher::new(),
            state: Mutex::new(HashMap::new()),
            stats: Mutex::new(Stats::default()),
        }
    }

    pub fn stats(&self) -> Stats {
        *self.stats.lock()
    }

    /// Implements five-step algorithm exactly.
    #[tracing::instrument(skip(self), fields(path = %path))]
    pub fn check(&self, path: &Utf8Path) -> ChangeResult {
        let exists = path.as_std_path().exists();
        let mut state = self.state.lock();
        let mut stats = self.stats.lock();

        let previous = state.get(path).cloned();

        // Step 1: untracked.
        let Some(previous) = previous else {
            if !exists {
                // Never seen and doesn't exist: nothing to track, nothing changed.
                return ChangeResult {
                    has_changed: false,
                    content_hash: None,
                    kind: ChangeKind::Unchanged,
                };
            }
            let content_hash = self.hasher.hash_file(path).ok();
            stats.content_hash_checks += 1;
            stats.changes_detected += 1;
            let new_state = self.new_state(path, exists, content_hash);
            state.insert(path.to_owned(), new_state);
            return ChangeResult {
                has_changed: true,
                content_hash,
                kind: ChangeKind::New,
            };
        };

        // Step 2: previously existed, now gone.
        if !exists {
            if previous.exists {
                tracing::debug!(path = %path, "file deleted");
                stats.changes_detected += 1;
                state.insert(
                    path.to_owned(),
                    FileState {
                        exists: false,
                        ..previous
                    },
                );
                return ChangeResult {
                    has_changed: true,
                    content_hash: None,
                    kind: ChangeKind::Deleted,
                };
            }
            return ChangeResult {
                has_changed: false,
                content_hash: previous.content_hash,
                kind: ChangeKind::Unchanged,
            };
        }

        // Step 3: metadata fast path.
        stats.metadata_checks += 1;
        let new_metadata_hash = match self.hasher.hash_metadata(path) {
            Ok(h) => h,
            Err(_) => {
                return ChangeResult {
                    has_changed: false,
                    content_hash: previous.content_hash,
                    kind: ChangeKind::Unchanged,
                }
            }
        };

        if previous.exists && new_metadata_hash == previous.metadata_hash {
            tracing::trace!(path = %path, "metadata unchanged, fast path");
            return ChangeResult {
                has_changed: false,
                content_hash: previous.content_hash,
                kind: ChangeKind::Unchanged,
            };
        }

        // Step 4: metadata changed, compute content hash to rule out a touch.
        stats.content_hash_checks += 1;
        let new_content_hash = self.hasher.hash_file(path).ok();

        if previous.exists && new_content_hash == previous.content_hash {
            // Touch detected: refresh stored metadata hash only.
            tracing::trace!(path = %path, "metadata moved but content identical, touch");
            state.insert(
                path.to_owned(),
                FileState {
                    metadata_hash: new_metadata_hash,
                    exists: true,
                    ..previous
                },
            );
            return ChangeResult {
                has_changed: false,
                content_hash: new_content_hash,
                kind: ChangeKind::Unchanged,
            };
        }

        // Step 5: genuine content change.
        tracing::debug!(path = %path, "content change detected");
        stats.changes_detected += 1;
        let meta = std::fs::metadata(path.as_std_path()).ok();
        let size = meta.as_ref().map(|m| m.len()).unwrap_or(0);
        state.insert(
            path.to_owned(),
            FileState {
                path: path.to_owned(),
                metadata_hash: new_metadata_hash,
                content_hash: new_content_hash,
                size,
                mtime: mtime_of(path),
                exists: true,
            },
        );
        ChangeResult {
            has_changed: true,
            content_hash: new_content_hash,
            kind: ChangeKind::Modified,
        }
    }

    /// Parallelizes the content-hashing step across many paths at once.
    pub fn track_batch(&self, paths: &[Utf8PathBuf]) -> Vec<ChangeResult> {
        use rayon::prelude::*;
        paths.par_iter().map(|p| self.check(p)).collect()
    }

    fn new_state(&self, path: &Utf8Path, exists: bool, content_hash: Option<[u8; 32]>) -> FileState {
        let metadata_hash = self.hasher.hash_metadata(path).unwrap_or([0u8; 32]);
        let meta = std::fs::metadata(path.as_std_path()).ok();
        FileState {
            path: path.to_owned(),
            metadata_hash,
            content_hash,
            size: meta.as_ref().map(|m| m.len()).unwrap_or(0),
            mtime: mtime_of(path),
            exists,
        }
    }
}

#[cfg(unix)]
fn mtime_of(path: &Utf8Path) -> i64 {
    use std::os::unix::fs::MetadataExt;
    std::fs::metadata(path.as_std_path())
        .map(|m| m.mtime())
        .unwrap_or(0)
}

#[cfg(not(unix))]
fn mtime_of(_path: &Utf8Path) -> i64 {
    0
}
