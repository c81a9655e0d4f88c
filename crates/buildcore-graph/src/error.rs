//! Graph construction errors, mapped to `ErrorKind::Graph`.

use buildcore_types::TargetId;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("target {from} declares a dependency on unknown target {missing}")]
    MissingDependency { from: TargetId, missing: TargetId },
    #[error("cyclic dependency: {}", cycle.iter().map(|t| t.to_string()).collect::<Vec<_>>().join(" -> "))]
    Cycle { cycle: Vec<TargetId> },
    #[error("target {0} declared twice")]
    DuplicateTarget(TargetId),
    #[error("target {0} not found in graph")]
    NotFound(TargetId),
}
