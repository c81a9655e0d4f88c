//! `BuildGraph`: content-addressed target graph with topological ordering
//! and cycle detection.
//!
//! Built over `petgraph::stable_graph::StableDiGraph`, the same family of
//! graph type `turborepo-graph-utils` uses for its workspace dependency
//! graph, generalized here to node-removal-stable
//! indices since dynamic extension only ever adds nodes.

pub mod analyzer;
pub mod error;

pub use analyzer::{DependencyAnalyzer, ImportIndex, RegexImportAnalyzer};
pub use error::GraphError;

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use buildcore_types::{BuildNode, Target, TargetId};
use parking_lot::RwLock;
use petgraph::{stable_graph::{NodeIndex, StableDiGraph}, Direction};

/// An edge `A -> B` means "A depends on B" (B must complete before A can
/// start). `dependents(B)` walks incoming edges; `dependencies(A)` walks
/// outgoing edges.
struct Inner {
    graph: StableDiGraph<Arc<BuildNode>, ()>,
    index: HashMap<TargetId, NodeIndex>,
    topo_order: Vec<TargetId>,
}

/// Dynamic extension is protected by a single
/// graph-wide lock; per-node counters are atomic and need no coordination
/// during normal execution.
pub struct BuildGraph {
    inner: RwLock<Inner>,
}

impl BuildGraph {
    /// Builds a graph from a flat target list (step 1-2), optionally
    /// augmented by a `DependencyAnalyzer` pass over each target's sources
    /// (step 3), then validates acyclicity (step 4) and computes a
    /// deterministic topological order (step 5-6).
    #[tracing::instrument(skip_all, fields(targets = targets.len()))]
    pub fn build(
        targets: Vec<Target>,
        sources: &dyn Fn(&Target) -> Vec<(camino::Utf8PathBuf, String)>,
        analyzer: Option<&dyn DependencyAnalyzer>,
        import_index: &ImportIndex,
    ) -> Result<Self, GraphError> {
        let mut graph: StableDiGraph<Arc<BuildNode>, ()> = StableDiGraph::new();
        let mut index: HashMap<TargetId, NodeIndex> = HashMap::new();

        for target in &targets {
            if index.contains_key(&target.id) {
                return Err(GraphError::DuplicateTarget(target.id.clone()));
            }
            let node_idx = graph.add_node(Arc::new(BuildNode::new(target.clone(), 0)));
            index.insert(target.id.clone(), node_idx);
        }

        // Step 2: explicit dependency edges.
        for target in &targets {
            let from_idx = index[&target.id];
            for dep in &target.dependencies {
                let Some(&to_idx) = index.get(dep) else {
                    return Err(GraphError::MissingDependency {
                        from: target.id.clone(),
                        missing: dep.clone(),
                    });
                };
                graph.add_edge(from_idx, to_idx, ());
            }
        }

        // Step 3: implicit edges discovered from import scanning.
        if let Some(analyzer) = analyzer {
            for target in &targets {
                let from_idx = index[&target.id];
                for (path, contents) in sources(target) {
                    for import in analyzer.scan_imports(&path, &contents) {
                        if let Some(provider) = import_index.resolve(&import) {
                            if provider != &target.id {
                                if let Some(&to_idx) = index.get(provider) {
                                    graph.update_edge(from_idx, to_idx, ());
                                }
                            }
                        }
                    }
                }
            }
        }

        // Step 4: three-colour DFS cycle detection.
        if let Some(cycle) = detect_cycle(&graph, &index) {
            return Err(GraphError::Cycle { cycle });
        }

        // Step 5-6: Kahn's algorithm with deterministic TargetId tie-break;
        // also yields in-degree, seeded into each node's pendingDeps.
        let topo_order = topological_order(&graph, &index)?;
        seed_pending_deps(&graph, &index);
        tracing::debug!(nodes = graph.node_count(), edges = graph.edge_count(), "build graph assembled");

        Ok(Self {
            inner: RwLock::new(Inner { graph, index, topo_order }),
        })
    }

    pub fn node(&self, id: &TargetId) -> Option<Arc<BuildNode>> {
        let inner = self.inner.read();
        inner.index.get(id).map(|&idx| inner.graph[idx].clone())
    }

    pub fn len(&self) -> usize {
        self.inner.read().graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The deterministic topological order computed at construction (or
    /// after the most recent `extend`).
    pub fn topo_order(&self) -> Vec<TargetId> {
        self.inner.read().topo_order.clone()
    }

    pub fn dependencies(&self, id: &TargetId) -> Vec<TargetId> {
        let inner = self.inner.read();
        let Some(&idx) = inner.index.get(id) else {
            return Vec::new();
        };
        inner
            .graph
            .neighbors_directed(idx, Direction::Outgoing)
            .map(|n| inner.graph[n].id().clone())
            .collect()
    }

    pub fn dependents(&self, id: &TargetId) -> Vec<TargetId> {
        let inner = self.inner.read();
        let Some(&idx) = inner.index.get(id) else {
            return Vec::new();
        };
        inner
            .graph
            .neighbors_directed(idx, Direction::Incoming)
            .map(|n| inner.graph[n].id().clone())
            .collect()
    }

    /// Dynamic extension: a running node declares additional targets
    /// discovered from generated code. New nodes and edges are added
    /// atomically under the graph-wide write lock. Every new node's own
    /// `pendingDeps` is seeded from its declared `dependencies` (the same
    /// edge-per-dependency bookkeeping `build()`'s Step 2 does for the
    /// initial target list), the discoverer's `pendingDeps` gains one count
    /// per new dependency it was given, and topological order is
    /// recomputed. Pre-existing nodes elsewhere in the graph are left
    /// untouched: their `pendingDeps` may already be partway decremented by
    /// completed dependencies, and nothing about `extend()` changes their
    /// own dependency edges, so there is nothing to reseed on them (see
    /// DESIGN.md decision #7). Returns the discoverer's existing dependents,
    /// which remain correctly blocked on the discoverer's still-pending
    /// completion.
    #[tracing::instrument(skip(self, new_targets, discoverer_depends_on), fields(discoverer = %discoverer, new_targets = new_targets.len()))]
    pub fn extend(
        &self,
        discoverer: &TargetId,
        new_targets: Vec<Target>,
        discoverer_depends_on: Vec<TargetId>,
    ) -> Result<Vec<TargetId>, GraphError> {
        tracing::debug!("extending build graph with dynamically discovered targets");
        let mut inner = self.inner.write();

        let discoverer_idx = *inner
            .index
            .get(discoverer)
            .ok_or_else(|| GraphError::NotFound(discoverer.clone()))?;

        let mut new_indices = Vec::with_capacity(new_targets.len());
        for target in &new_targets {
            if inner.index.contains_key(&target.id) {
                return Err(GraphError::DuplicateTarget(target.id.clone()));
            }
            let idx = inner.graph.add_node(Arc::new(BuildNode::new(target.clone(), 0)));
            inner.index.insert(target.id.clone(), idx);
            new_indices.push(idx);
        }

        // Each new target's own declared dependencies, resolved against the
        // now-complete index (old nodes plus the ones just inserted above).
        for (target, &from_idx) in new_targets.iter().zip(&new_indices) {
            for dep in &target.dependencies {
                let &dep_idx = inner
                    .index
                    .get(dep)
                    .ok_or_else(|| GraphError::MissingDependency {
                        from: target.id.clone(),
                        missing: dep.clone(),
                    })?;
                inner.graph.add_edge(from_idx, dep_idx, ());
                inner.graph[from_idx].add_pending_dep();
            }
        }

        for dep in &discoverer_depends_on {
            let &dep_idx = inner
                .index
                .get(dep)
                .ok_or_else(|| GraphError::MissingDependency {
                    from: discoverer.clone(),
                    missing: dep.clone(),
                })?;
            inner.graph.add_edge(discoverer_idx, dep_idx, ());
            inner.graph[discoverer_idx].add_pending_dep();
        }

        if let Some(cycle) = detect_cycle(&inner.graph, &inner.index) {
            return Err(GraphError::Cycle { cycle });
        }

        inner.topo_order = topological_order(&inner.graph, &inner.index)?;

        let dependents = inner
            .graph
            .neighbors_directed(discoverer_idx, Direction::Incoming)
            .map(|n| inner.graph[n].id().clone())
            .collect();
        Ok(dependents)
    }
}

/// Three-colour (White/Gray/Black) DFS cycle detection returning the full
/// cycle path — `petgraph::algo::toposort`'s `Cycle` error only
/// names one offending node, so this is hand-rolled.
fn detect_cycle(graph: &StableDiGraph<Arc<BuildNode>, ()>, index: &HashMap<TargetId, NodeIndex>) -> Option<Vec<TargetId>> {
    use cycle_color::Color;

    let mut color: HashMap<NodeIndex, Color> = graph.node_indices().map(|n| (n, Color::White)).collect();
    let mut stack: Vec<NodeIndex> = Vec::new();

    let mut ordered_starts: Vec<NodeIndex> = index.values().copied().collect();
    ordered_starts.sort_by_key(|&idx| graph[idx].id().clone());

    for start in ordered_starts {
        if color[&start] != Color::White {
            continue;
        }
        if let Some(cycle) = dfs_visit(graph, start, &mut color, &mut stack) {
            return Some(cycle);
        }
    }
    None
}

fn dfs_visit(
    graph: &StableDiGraph<Arc<BuildNode>, ()>,
    node: NodeIndex,
    color: &mut HashMap<NodeIndex, cycle_color::Color>,
    stack: &mut Vec<NodeIndex>,
) -> Option<Vec<TargetId>> {
    color.insert(node, cycle_color::Color::Gray);
    stack.push(node);

    let mut neighbors: Vec<NodeIndex> = graph.neighbors_directed(node, Direction::Outgoing).collect();
    neighbors.sort_by_key(|&idx| graph[idx].id().clone());

    for next in neighbors {
        match color.get(&next).copied().unwrap_or(cycle_color::Color::White) {
            cycle_color::Color::White => {
                if let Some(cycle) = dfs_visit(graph, next, color, stack) {
                    return Some(cycle);
                }
            }
            cycle_color::Color::Gray => {
                let start = stack.iter().position(|&n| n == next).unwrap_or(0);
                let mut cycle: Vec<TargetId> = stack[start..].iter().map(|&n| graph[n].id().clone()).collect();
                cycle.push(graph[next].id().clone());
                return Some(cycle);
            }
            cycle_color::Color::Black => {}
        }
    }

    stack.pop();
    color.insert(node, cycle_color::Color::Black);
    None
}

/// Local alias so `dfs_visit`'s signature doesn't depend on the private enum
/// defined inside `detect_cycle`.
mod cycle_color {
    #[derive(PartialEq, Eq, Clone, Copy)]
    pub enum Color {
        White,
        Gray,
        Black,
    }
}

/// Kahn's algorithm with deterministic tie-break by `TargetId`:
/// among all currently-zero-in-degree nodes, the lexicographically
/// smallest `TargetId` is emitted next.
fn topological_order(graph: &StableDiGraph<Arc<BuildNode>, ()>, index: &HashMap<TargetId, NodeIndex>) -> Result<Vec<TargetId>, GraphError> {
    let mut in_degree: HashMap<NodeIndex, usize> = graph
        .node_indices()
        .map(|n| (n, graph.neighbors_directed(n, Direction::Outgoing).count()))
        .collect();

    let mut ready: std::collections::BTreeSet<TargetId> = index
        .iter()
        .filter(|(_, &idx)| in_degree[&idx] == 0)
        .map(|(id, _)| id.clone())
        .collect();

    let mut order = Vec::with_capacity(graph.node_count());
    let mut visited: HashSet<NodeIndex> = HashSet::new();

    while let Some(id) = ready.iter().next().cloned() {
        ready.remove(&id);
        let idx = index[&id];
        visited.insert(idx);
        order.push(id.clone());

        for dependent in graph.neighbors_directed(idx, Direction::Incoming) {
            let degree = in_degree.get_mut(&dependent).unwrap();
            *degree -= 1;
            if *degree == 0 {
                ready.insert(graph[dependent].id().clone());
            }
        }
    }

    if order.len() != graph.node_count() {
        // Should be unreachable: detect_cycle already rejected cyclic graphs.
        return Err(GraphError::Cycle { cycle: Vec::new() });
    }

    Ok(order)
}

fn seed_pending_deps(graph: &StableDiGraph<Arc<BuildNode>, ()>, index: &HashMap<TargetId, NodeIndex>) {
    for &idx in index.values() {
        let in_degree = graph.neighbors_directed(idx, Direction::Outgoing).count() as u32;
        graph[idx].reset_pending_deps(in_degree);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use buildcore_types::TargetKind;

    fn target(name: &str, deps: &[&str]) -> Target {
        let mut t = Target::new(TargetId::new("w", "p", name), TargetKind::Library, "rust");
        t.dependencies = deps.iter().map(|d| TargetId::new("w", "p", *d)).collect();
        t
    }

    fn no_sources(_: &Target) -> Vec<(camino::Utf8PathBuf, String)> {
        Vec::new()
    }

    #[test]
    fn acyclic_graph_builds_and_orders_forward() {
        let graph = BuildGraph::build(
            vec![target("a", &[]), target("b", &["a"]), target("c", &["b"])],
            &no_sources,
            None,
            &ImportIndex::new(),
        )
        .unwrap();

        let order = graph.topo_order();
        let pos = |n: &str| order.iter().position(|id| id.name() == n).unwrap();
        assert!(pos("a") < pos("b"));
        assert!(pos("b") < pos("c"));
    }

    #[test]
    fn cycle_is_rejected_with_full_path() {
        let err = BuildGraph::build(
            vec![target("a", &["b"]), target("b", &["a"])],
            &no_sources,
            None,
            &ImportIndex::new(),
        )
        .unwrap_err();

        match err {
            GraphError::Cycle { cycle } => {
                let names: Vec<_> = cycle.iter().map(|t| t.name().to_string()).collect();
                assert!(names.contains(&"a".to_string()));
                assert!(names.contains(&"b".to_string()));
            }
            other => panic!("expected Cycle, got {other:?}"),
        }
    }

    #[test]
    fn missing_dependency_is_an_error() {
        let err = BuildGraph::build(vec![target("a", &["ghost"])], &no_sources, None, &ImportIndex::new()).unwrap_err();
        assert!(matches!(err, GraphError::MissingDependency { .. }));
    }

    #[test]
    fn pending_deps_seeded_from_in_degree() {
        let graph = BuildGraph::build(
            vec![target("a", &[]), target("b", &["a"])],
            &no_sources,
            None,
            &ImportIndex::new(),
        )
        .unwrap();

        assert_eq!(graph.node(&TargetId::new("w", "p", "a")).unwrap().pending_deps(), 0);
        assert_eq!(graph.node(&TargetId::new("w", "p", "b")).unwrap().pending_deps(), 1);
    }

    #[test]
    fn extend_adds_nodes_and_increments_discoverer_pending_deps() {
        let graph = BuildGraph::build(vec![target("a", &[]), target("b", &["a"])], &no_sources, None, &ImportIndex::new()).unwrap();

        let generated = target("generated", &[]);
        let generated_id = generated.id.clone();
        let a_id = TargetId::new("w", "p", "a");

        let dependents = graph.extend(&a_id, vec![generated], vec![generated_id.clone()]).unwrap();
        assert_eq!(dependents, vec![TargetId::new("w", "p", "b")]);
        assert_eq!(graph.node(&a_id).unwrap().pending_deps(), 1);
        assert!(graph.node(&generated_id).is_some());

        let order = graph.topo_order();
        let pos = |n: &str| order.iter().position(|id| id.name() == n).unwrap();
        assert!(pos("generated") < pos("a"));
    }

    #[test]
    fn extend_seeds_pending_deps_for_a_new_target_with_its_own_dependencies() {
        let graph = BuildGraph::build(vec![target("a", &[])], &no_sources, None, &ImportIndex::new()).unwrap();

        let generated = target("generated", &["a"]);
        let generated_id = generated.id.clone();
        let a_id = TargetId::new("w", "p", "a");

        graph.extend(&a_id, vec![generated], vec![]).unwrap();

        assert_eq!(graph.node(&generated_id).unwrap().pending_deps(), 1);
        let order = graph.topo_order();
        let pos = |n: &str| order.iter().position(|id| id.name() == n).unwrap();
        assert!(pos("a") < pos("generated"));
    }

    #[test]
    fn extend_does_not_disturb_pending_deps_of_unrelated_in_flight_nodes() {
        let graph = BuildGraph::build(vec![target("a", &[]), target("b", &["a"]), target("c", &[])], &no_sources, None, &ImportIndex::new()).unwrap();

        let b_id = TargetId::new("w", "p", "b");
        assert_eq!(graph.node(&b_id).unwrap().pending_deps(), 1);
        assert!(graph.node(&b_id).unwrap().dep_completed());
        assert_eq!(graph.node(&b_id).unwrap().pending_deps(), 0);

        let c_id = TargetId::new("w", "p", "c");
        let generated = target("generated", &[]);
        graph.extend(&c_id, vec![generated], vec![]).unwrap();

        assert_eq!(graph.node(&b_id).unwrap().pending_deps(), 0);
    }

    #[test]
    fn dependency_analyzer_adds_implicit_edges() {
        let mut import_index = ImportIndex::new();
        import_index.insert("acme::widgets", TargetId::new("w", "p", "widgets"));

        let consumer = target("consumer", &[]);
        let widgets = target("widgets", &[]);

        let sources = |t: &Target| -> Vec<(camino::Utf8PathBuf, String)> {
            if t.id.name() == "consumer" {
                vec![("main.rs".into(), "use acme::widgets;".to_string())]
            } else {
                Vec::new()
            }
        };

        let analyzer = RegexImportAnalyzer::default_pattern();
        let graph = BuildGraph::build(vec![consumer, widgets], &sources, Some(&analyzer), &import_index).unwrap();

        assert_eq!(graph.dependencies(&TargetId::new("w", "p", "consumer")), vec![TargetId::new("w", "p", "widgets")]);
    }
}
