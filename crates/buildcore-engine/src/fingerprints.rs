//! Adapts `FileTracker` to the scheduler's narrow `Fingerprints` contract —
//! `FileTracker` and `Hasher` own the actual hashing; this just bridges
//! the two into the shape the executor expects.

use std::sync::Arc;

use buildcore_filetracker::FileTracker;
use buildcore_scheduler::Fingerprints;
use buildcore_types::Target;
use camino::Utf8Path;

pub struct FileTrackerFingerprints {
    tracker: Arc<FileTracker>,
    workspace_root: camino::Utf8PathBuf,
}

impl FileTrackerFingerprints {
    pub fn new(tracker: Arc<FileTracker>, workspace_root: camino::Utf8PathBuf) -> Self {
        Self { tracker, workspace_root }
    }
}

impl Fingerprints for FileTrackerFingerprints {
    fn source_hashes(&self, target: &Target) -> Vec<String> {
        target
            .sources
            .iter()
            .map(|relative| {
                let absolute = self.workspace_root.join(relative);
                let result = self.tracker.check(Utf8Path::new(absolute.as_str()));
                result.content_hash.map(hex::encode).unwrap_or_default()
            })
            .collect()
    }
}
