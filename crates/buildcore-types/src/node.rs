//! Mutable execution-state wrapper around a [`crate::Target`].

use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};

use crate::target::{Target, TargetId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeStatus {
    Pending,
    Ready,
    Running,
    Cached,
    Completed,
    Failed,
    Cancelled,
}

impl NodeStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            NodeStatus::Cached | NodeStatus::Completed | NodeStatus::Failed | NodeStatus::Cancelled
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

/// One per `TargetId`, owned exclusively by the `BuildGraph`.
///
/// `pendingDeps` and `status` are atomics so the scheduler can mutate them
/// without taking the graph-wide lock.
#[derive(Debug)]
pub struct BuildNode {
    pub target: Target,
    status: parking_lot::Mutex<NodeStatus>,
    pending_deps: AtomicU32,
    content_hash: parking_lot::Mutex<Option<[u8; 32]>>,
    retry_count: AtomicU32,
    last_error: parking_lot::Mutex<Option<String>>,
    priority: parking_lot::Mutex<Priority>,
    // Signed so dynamic-discovery rewinds can temporarily go negative between
    // the increment of dependency count and the corresponding decrement.
    discovery_adjust: AtomicI64,
}

impl BuildNode {
    pub fn new(target: Target, in_degree: u32) -> Self {
        Self {
            target,
            status: parking_lot::Mutex::new(NodeStatus::Pending),
            pending_deps: AtomicU32::new(in_degree),
            content_hash: parking_lot::Mutex::new(None),
            retry_count: AtomicU32::new(0),
            last_error: parking_lot::Mutex::new(None),
            priority: parking_lot::Mutex::new(Priority::Normal),
            discovery_adjust: AtomicI64::new(0),
        }
    }

    pub fn id(&self) -> &TargetId {
        &self.target.id
    }

    pub fn status(&self) -> NodeStatus {
        *self.status.lock()
    }

    pub fn set_status(&self, status: NodeStatus) {
        tracing::trace!(target = %self.id(), ?status, "node status transition");
        *self.status.lock() = status;
    }

    pub fn pending_deps(&self) -> u32 {
        self.pending_deps.load(Ordering::SeqCst)
    }

    /// Decrements the pending-dependency counter; returns `true` if this call
    /// made it reach zero (i.e. the node just became Ready).
    pub fn dep_completed(&self) -> bool {
        let prev = self.pending_deps.fetch_sub(1, Ordering::SeqCst);
        debug_assert!(prev > 0, "pendingDeps underflow for {}", self.id());
        let ready = prev == 1;
        if ready {
            tracing::trace!(target = %self.id(), "pending deps reached zero, node ready");
        }
        ready
    }

    /// Used by dynamic graph extension to add newly-discovered dependencies
    /// before the node has started running.
    pub fn add_pending_dep(&self) {
        self.pending_deps.fetch_add(1, Ordering::SeqCst);
    }

    pub fn reset_pending_deps(&self, in_degree: u32) {
        self.pending_deps.store(in_degree, Ordering::SeqCst);
    }

    pub fn content_hash(&self) -> Option<[u8; 32]> {
        *self.content_hash.lock()
    }

    pub fn set_content_hash(&self, hash: [u8; 32]) {
        *self.content_hash.lock() = Some(hash);
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count.load(Ordering::SeqCst)
    }

    pub fn increment_retry(&self) -> u32 {
        self.retry_count.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().clone()
    }

    pub fn set_last_error(&self, error: impl Into<String>) {
        *self.last_error.lock() = Some(error.into());
    }

    pub fn priority(&self) -> Priority {
        *self.priority.lock()
    }

    pub fn set_priority(&self, priority: Priority) {
        *self.priority.lock() = priority;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::TargetKind;

    fn node(deps: u32) -> BuildNode {
        BuildNode::new(
            Target::new(TargetId::new("w", "p", "x"), TargetKind::Library, "rust"),
            deps,
        )
    }

    #[test]
    fn dep_completed_signals_only_on_final_decrement() {
        let n = node(2);
        assert!(!n.dep_completed());
        assert!(n.dep_completed());
    }

    #[test]
    fn terminal_statuses() {
        assert!(NodeStatus::Completed.is_terminal());
        assert!(NodeStatus::Failed.is_terminal());
        assert!(!NodeStatus::Running.is_terminal());
    }

    #[test]
    fn priority_ordering() {
        assert!(Priority::Critical > Priority::High);
        assert!(Priority::High > Priority::Normal);
        assert!(Priority::Normal > Priority::Low);
    }
}
