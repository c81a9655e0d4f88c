//! `IncrementalEngine`: computes the minimum rebuild set from a source list
//! and a changed-file list.

use std::collections::{HashMap, HashSet};

use buildcore_cache::{ActionCache, ActionOutcome};
use camino::Utf8PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Force every source to Compile, ignoring the action cache entirely.
    Full,
    /// Default: ActionCache hit ⇒ Cached; changed files and their transitive
    /// dependents ⇒ Compile.
    Incremental,
    /// Only the changed files themselves are escalated to Compile — no
    /// transitive propagation through the dependent index. Intended for
    /// targeted recompiles where the caller already knows the blast radius
    /// is bounded (see DESIGN.md for the Minimal/header-change resolution).
    Minimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reason {
    ForcedFull,
    Changed,
    TransitiveDependent,
    ActionCacheMiss,
    ActionCacheHit,
}

/// One source's composite action key inputs, as the caller (Executor)
/// already has them from building the action's `ActionId`.
pub struct ActionKeyInputs<'a> {
    pub action_id: &'a str,
    pub input_hashes: Vec<String>,
    pub metadata_kv: Vec<(String, String)>,
}

/// `{file -> transitive set of sources that import it}`.
/// Built and maintained by the `DependencyAnalyzer` / `BuildGraph` layer;
/// the engine only queries it.
#[derive(Debug, Default, Clone)]
pub struct DependentIndex {
    /// direct edges: provider -> set of direct importers
    direct: HashMap<Utf8PathBuf, HashSet<Utf8PathBuf>>,
}

impl DependentIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_dependency(&mut self, provider: Utf8PathBuf, dependent: Utf8PathBuf) {
        self.direct.entry(provider).or_default().insert(dependent);
    }

    /// All sources that transitively depend on `file` (BFS over the direct
    /// importer edges), excluding `file` itself.
    pub fn transitive_dependents(&self, file: &Utf8PathBuf) -> HashSet<Utf8PathBuf> {
        let mut seen = HashSet::new();
        let mut queue = vec![file.clone()];
        while let Some(current) = queue.pop() {
            let Some(direct) = self.direct.get(&current) else {
                continue;
            };
            for dependent in direct {
                if seen.insert(dependent.clone()) {
                    queue.push(dependent.clone());
                }
            }
        }
        seen
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IncrementalResult {
    pub files_to_compile: Vec<Utf8PathBuf>,
    pub cached_files: Vec<Utf8PathBuf>,
    pub reasons: HashMap<Utf8PathBuf, Reason>,
    pub reduction_rate: f64,
}

pub struct IncrementalEngine<'a> {
    action_cache: &'a ActionCache,
}

impl<'a> IncrementalEngine<'a> {
    pub fn new(action_cache: &'a ActionCache) -> Self {
        Self { action_cache }
    }

    /// Classifies every source into `{Compile, Cached}`.
    #[tracing::instrument(skip_all, fields(sources = sources.len(), changed = changed.len(), ?strategy))]
    pub fn classify(
        &self,
        sources: &[Utf8PathBuf],
        changed: &[Utf8PathBuf],
        strategy: Strategy,
        action_keys: &dyn Fn(&Utf8PathBuf) -> ActionKeyInputs,
        dependents: &DependentIndex,
    ) -> IncrementalResult {
        let changed_set: HashSet<&Utf8PathBuf> = changed.iter().collect();

        let mut escalated: HashMap<Utf8PathBuf, Reason> = HashMap::new();
        if strategy == Strategy::Full {
            for source in sources {
                escalated.insert(source.clone(), Reason::ForcedFull);
            }
        } else {
            for file in changed {
                escalated.entry(file.clone()).or_insert(Reason::Changed);
            }
            if strategy == Strategy::Incremental {
                for file in changed {
                    for dependent in dependents.transitive_dependents(file) {
                        escalated.entry(dependent).or_insert(Reason::TransitiveDependent);
                    }
                }
            }
            // Strategy::Minimal: deliberately no transitive expansion.
        }

        let mut files_to_compile = Vec::new();
        let mut cached_files = Vec::new();
        let mut reasons = HashMap::new();

        for source in sources {
            if let Some(reason) = escalated.get(source) {
                files_to_compile.push(source.clone());
                reasons.insert(source.clone(), *reason);
                continue;
            }

            let inputs = action_keys(source);
            match self.action_cache.lookup(inputs.action_id, &inputs.input_hashes, &inputs.metadata_kv) {
                ActionOutcome::Hit => {
                    cached_files.push(source.clone());
                    reasons.insert(source.clone(), Reason::ActionCacheHit);
                }
                ActionOutcome::Miss | ActionOutcome::KnownFailure => {
                    files_to_compile.push(source.clone());
                    reasons.insert(source.clone(), Reason::ActionCacheMiss);
                }
            }
        }

        let _ = changed_set;
        let total = sources.len().max(1) as f64;
        let reduction_rate = cached_files.len() as f64 / total;
        tracing::debug!(to_compile = files_to_compile.len(), cached = cached_files.len(), reduction_rate, "classified rebuild set");

        IncrementalResult {
            files_to_compile,
            cached_files,
            reasons,
            reduction_rate,
        }
    }
}
