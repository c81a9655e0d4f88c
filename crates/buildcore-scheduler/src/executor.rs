//! `Executor`: runs the per-Ready-node build algorithm.
//!
//! Grounded on `turborepo-graph-utils::Walker`'s callback shape
//! (a per-node task that publishes a completion signal once done) but
//! reworked from its async channel handoff into a synchronous call the
//! scheduler's worker thread makes directly, ("Async vs
//! threads").

use std::sync::Arc;

use buildcore_cas::BlobStore;
use buildcore_coordinator::CacheCoordinator;
use buildcore_graph::BuildGraph;
use buildcore_types::{Event, EventBus, NodeStatus, Target, TargetId};

use crate::handler::{BuildContext, HandlerRegistry, SimdCapabilities, WorkspaceOptions};
use crate::retry::{self, MAX_ATTEMPTS};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionOutcome {
    Completed,
    Cached,
    Failed,
    /// A transient failure under the retry budget; the caller should requeue
    /// the node after `backoff_delay(attempt)`.
    Retry,
}

/// Resolves a target's current source content hashes. An external
/// collaborator (FileTracker + Hasher) owns the actual hashing; the
/// Executor only needs the resulting strings to ask `CacheCoordinator` the
/// "is this target cached" question, the same decoupling `BuildGraph::build`
/// uses for its `sources` callback.
pub trait Fingerprints: Send + Sync {
    fn source_hashes(&self, target: &Target) -> Vec<String>;
}

pub struct Executor {
    coordinator: Arc<CacheCoordinator>,
    registry: Arc<HandlerRegistry>,
    blobs: Arc<BlobStore>,
    events: Arc<EventBus>,
    fingerprints: Arc<dyn Fingerprints>,
    workspace_options: WorkspaceOptions,
    simd_capabilities: SimdCapabilities,
}

impl Executor {
    pub fn new(
        coordinator: Arc<CacheCoordinator>,
        registry: Arc<HandlerRegistry>,
        blobs: Arc<BlobStore>,
        events: Arc<EventBus>,
        fingerprints: Arc<dyn Fingerprints>,
        workspace_options: WorkspaceOptions,
        simd_capabilities: SimdCapabilities,
    ) -> Self {
        Self {
            coordinator,
            registry,
            blobs,
            events,
            fingerprints,
            workspace_options,
            simd_capabilities,
        }
    }

    /// Runs one Ready node through to a terminal (or retry) outcome.
    pub fn execute(&self, target_id: &TargetId, graph: &BuildGraph) -> ExecutionOutcome {
        let Some(node) = graph.node(target_id) else {
            return ExecutionOutcome::Failed;
        };

        let span = tracing::info_span!("execute_target", target = %target_id);
        let _guard = span.enter();

        node.set_status(NodeStatus::Running);
        self.events.publish(Event::TargetStarted { target: target_id.clone() });

        let source_hashes = self.fingerprints.source_hashes(&node.target);
        let dep_hashes = self.dependency_output_hashes(target_id, graph);

        if self.coordinator.is_target_cached(&target_id.stable_string(), &source_hashes, &dep_hashes) {
            node.set_status(NodeStatus::Cached);
            self.events.publish(Event::TargetCached { target: target_id.clone() });
            return ExecutionOutcome::Cached;
        }

        let Some(handler) = self.registry.get(&node.target.language) else {
            let message = format!("no language handler registered for {:?}", node.target.language);
            node.set_last_error(message.clone());
            node.set_status(NodeStatus::Failed);
            self.events.publish(Event::TargetFailed { target: target_id.clone(), message });
            return ExecutionOutcome::Failed;
        };

        let context = BuildContext::new(&node.target, &self.workspace_options, self.simd_capabilities);

        match handler.build(&context) {
            Ok(output) => {
                let (actions, _dependencies) = context.take_recorded();
                for action in &actions {
                    self.coordinator.record_action_success(&action.action_id, &action.inputs, &action.metadata_kv, action.outputs.clone());
                }

                let mut output_blob_ids = Vec::with_capacity(output.output_paths.len());
                let mut size_bytes = 0u64;
                for path in &output.output_paths {
                    if let Ok(bytes) = std::fs::read(path) {
                        size_bytes += bytes.len() as u64;
                        if let Ok(hash) = self.blobs.put(&bytes) {
                            output_blob_ids.push(hash);
                        }
                    }
                }

                self.coordinator.update_target(
                    &target_id.stable_string(),
                    &source_hashes,
                    &dep_hashes,
                    output_blob_ids,
                    output.output_hash.clone(),
                    size_bytes,
                );

                if let Ok(hash_bytes) = hex::decode(pad_to_64_hex(&output.output_hash)) {
                    if hash_bytes.len() == 32 {
                        let mut arr = [0u8; 32];
                        arr.copy_from_slice(&hash_bytes);
                        node.set_content_hash(arr);
                    }
                }

                node.set_status(NodeStatus::Completed);
                self.events.publish(Event::TargetCompleted { target: target_id.clone() });
                ExecutionOutcome::Completed
            }
            Err(error) => {
                let attempt = node.increment_retry();
                node.set_last_error(error.to_string());

                if retry::should_retry(&error) && attempt < MAX_ATTEMPTS {
                    node.set_status(NodeStatus::Ready);
                    std::thread::sleep(retry::backoff_delay(attempt));
                    return ExecutionOutcome::Retry;
                }

                node.set_status(NodeStatus::Failed);
                self.events.publish(Event::TargetFailed {
                    target: target_id.clone(),
                    message: error.to_string(),
                });
                ExecutionOutcome::Failed
            }
        }
    }

    /// Dependency output hashes, taken from each dependency node's content
    /// hash (set once that node has completed). A dependency with no
    /// recorded hash (shouldn't happen once the graph is topologically
    /// respected) contributes an empty string rather than panicking.
    fn dependency_output_hashes(&self, target_id: &TargetId, graph: &BuildGraph) -> Vec<String> {
        graph
            .dependencies(target_id)
            .iter()
            .map(|dep_id| {
                graph
                    .node(dep_id)
                    .and_then(|n| n.content_hash())
                    .map(hex::encode)
                    .unwrap_or_default()
            })
            .collect()
    }
}

/// `blake3`-style hex digests are already 64 chars; this only pads shorter
/// handler-supplied hashes (e.g. test doubles) so `hex::decode` doesn't
/// reject them outright.
fn pad_to_64_hex(s: &str) -> String {
    let mut s = s.to_string();
    while s.len() < 64 {
        s.push('0');
    }
    s.truncate(64);
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{HandlerOutput, LanguageHandler};
    use buildcore_cache::{ActionCache, EvictionLimits, TargetCache};
    use buildcore_graph::ImportIndex;
    use buildcore_types::{TargetKind};
    use camino::Utf8PathBuf;

    struct FixedFingerprints;
    impl Fingerprints for FixedFingerprints {
        fn source_hashes(&self, _target: &Target) -> Vec<String> {
            vec!["h1".to_string()]
        }
    }

    struct StubHandler {
        output_path: Utf8PathBuf,
    }

    impl LanguageHandler for StubHandler {
        fn analyze_imports(&self, _sources: &[Utf8PathBuf]) -> Vec<String> {
            Vec::new()
        }

        fn build(&self, context: &BuildContext) -> Result<HandlerOutput, buildcore_types::CoreError> {
            context.record_action("compile", vec!["h1".into()], vec!["out".into()], vec![], true);
            Ok(HandlerOutput {
                output_hash: "abc123".into(),
                output_paths: vec![self.output_path.clone()],
            })
        }

        fn get_outputs(&self, _target: &Target, _workspace: &camino::Utf8Path) -> Vec<Utf8PathBuf> {
            vec![self.output_path.clone()]
        }
    }

    fn setup(dir: &tempfile::TempDir) -> (Executor, BuildGraph) {
        let blobs = Arc::new(BlobStore::new(Utf8PathBuf::from_path_buf(dir.path().join("cas")).unwrap()).unwrap());
        let events = Arc::new(EventBus::new());
        let targets = TargetCache::open(
            Utf8PathBuf::from_path_buf(dir.path().join("targets.bin")).unwrap(),
            [1u8; 32],
            blobs.clone(),
            EvictionLimits::default(),
            events.clone(),
        );
        let actions = ActionCache::open(
            Utf8PathBuf::from_path_buf(dir.path().join("actions.bin")).unwrap(),
            [2u8; 32],
            blobs.clone(),
            EvictionLimits::default(),
            events.clone(),
        );
        let coordinator = Arc::new(CacheCoordinator::new(targets, actions, None, blobs.clone(), events.clone()));

        let output_path = Utf8PathBuf::from_path_buf(dir.path().join("out.o")).unwrap();
        std::fs::write(&output_path, b"object code").unwrap();

        let registry = Arc::new(HandlerRegistry::new().register("rust", Arc::new(StubHandler { output_path })));

        let target = Target::new(TargetId::new("w", "p", "x"), TargetKind::Library, "rust");
        let graph = BuildGraph::build(vec![target], &|_| Vec::new(), None, &ImportIndex::new()).unwrap();

        let executor = Executor::new(
            coordinator,
            registry,
            blobs,
            events,
            Arc::new(FixedFingerprints),
            WorkspaceOptions::default(),
            SimdCapabilities::default(),
        );
        (executor, graph)
    }

    #[test]
    fn first_execution_builds_and_caches() {
        let dir = tempfile::tempdir().unwrap();
        let (executor, graph) = setup(&dir);
        let id = TargetId::new("w", "p", "x");

        let outcome = executor.execute(&id, &graph);
        assert_eq!(outcome, ExecutionOutcome::Completed);
        assert_eq!(graph.node(&id).unwrap().status(), NodeStatus::Completed);
    }

    #[test]
    fn second_execution_with_same_sources_hits_cache() {
        let dir = tempfile::tempdir().unwrap();
        let (executor, graph) = setup(&dir);
        let id = TargetId::new("w", "p", "x");

        executor.execute(&id, &graph);
        graph.node(&id).unwrap().set_status(NodeStatus::Ready);
        let outcome = executor.execute(&id, &graph);
        assert_eq!(outcome, ExecutionOutcome::Cached);
    }

    #[test]
    fn missing_handler_fails_without_retry() {
        let dir = tempfile::tempdir().unwrap();
        let (executor, graph) = setup(&dir);
        let ghost = Target::new(TargetId::new("w", "p", "ghost"), TargetKind::Library, "cobol");
        let graph = BuildGraph::build(vec![ghost], &|_| Vec::new(), None, &ImportIndex::new()).unwrap();
        let id = TargetId::new("w", "p", "ghost");

        let outcome = executor.execute(&id, &graph);
        assert_eq!(outcome, ExecutionOutcome::Failed);
    }
}
