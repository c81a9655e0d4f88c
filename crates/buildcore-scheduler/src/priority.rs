//! Critical-path priority analyzer: assigns each node a `Priority` based on
//! weighted depth, fan-out, and estimated duration. Runs once before the
//! build starts; priority only
//! affects which end of a worker's local deque a Ready node enters, never
//! correctness.

use std::collections::HashMap;

use buildcore_graph::BuildGraph;
use buildcore_types::{Priority, TargetId};

/// Assigns `Priority` to every node in `graph` from an estimated
/// per-target duration, by computing each node's "remaining critical path"
/// (its own duration plus the longest chain among its dependents) and
/// fan-out (number of direct dependents), then bucketing by percentile rank
/// of `critical_length + fan_out_weight * fan_out`.
pub struct CriticalPathAnalyzer {
    fan_out_weight: f64,
}

impl Default for CriticalPathAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl CriticalPathAnalyzer {
    pub fn new() -> Self {
        Self { fan_out_weight: 0.1 }
    }

    pub fn with_fan_out_weight(fan_out_weight: f64) -> Self {
        Self { fan_out_weight }
    }

    pub fn assign_priorities(&self, graph: &BuildGraph, estimated_duration: &dyn Fn(&TargetId) -> f64) {
        let topo = graph.topo_order();

        // topo_order runs from least-dependent ("a" with no deps) to
        // most-dependent; the critical path away from a node is the longest
        // chain through its dependents, so process in reverse.
        let mut critical_length: HashMap<TargetId, f64> = HashMap::new();
        for id in topo.iter().rev() {
            let own = estimated_duration(id);
            let longest_dependent = graph
                .dependents(id)
                .iter()
                .filter_map(|dep| critical_length.get(dep))
                .cloned()
                .fold(0.0_f64, f64::max);
            critical_length.insert(id.clone(), own + longest_dependent);
        }

        let mut scored: Vec<(TargetId, f64)> = topo
            .iter()
            .map(|id| {
                let fan_out = graph.dependents(id).len() as f64;
                let score = critical_length[id] + self.fan_out_weight * fan_out;
                (id.clone(), score)
            })
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        let total = scored.len();
        for (rank, (id, _)) in scored.into_iter().enumerate() {
            let percentile = if total <= 1 { 0.0 } else { rank as f64 / (total - 1) as f64 };
            let priority = if percentile < 0.10 {
                Priority::Critical
            } else if percentile < 0.30 {
                Priority::High
            } else if percentile < 0.80 {
                Priority::Normal
            } else {
                Priority::Low
            };
            if let Some(node) = graph.node(&id) {
                node.set_priority(priority);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use buildcore_graph::ImportIndex;
    use buildcore_types::{Target, TargetId, TargetKind};

    fn target(name: &str, deps: &[&str]) -> Target {
        let mut t = Target::new(TargetId::new("w", "p", name), TargetKind::Library, "rust");
        t.dependencies = deps.iter().map(|d| TargetId::new("w", "p", *d)).collect();
        t
    }

    fn no_sources(_: &Target) -> Vec<(camino::Utf8PathBuf, String)> {
        Vec::new()
    }

    #[test]
    fn longest_chain_root_gets_highest_priority() {
        // a <- b <- c (c depends on b depends on a); a sits on the longest
        // chain and should outrank the isolated leaf d.
        let graph = BuildGraph::build(
            vec![target("a", &[]), target("b", &["a"]), target("c", &["b"]), target("d", &[])],
            &no_sources,
            None,
            &ImportIndex::new(),
        )
        .unwrap();

        let analyzer = CriticalPathAnalyzer::new();
        analyzer.assign_priorities(&graph, &|_| 1.0);

        let a_priority = graph.node(&TargetId::new("w", "p", "a")).unwrap().priority();
        let d_priority = graph.node(&TargetId::new("w", "p", "d")).unwrap().priority();
        assert!(a_priority >= d_priority);
    }
}
