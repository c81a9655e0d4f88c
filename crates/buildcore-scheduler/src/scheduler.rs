//! `Scheduler`: fixed-size OS-thread worker pool with one local deque per
//! worker, a shared overflow injector, and random-victim work stealing
//!.
//!
//! Grounded on long-lived thread-based worker pools
//! (`PolicyWorker`-style long-lived threads draining a channel in a loop)
//! but the work unit here is pull-based (deque pop /
//! steal) rather than push-based (channel recv), to get a specific
//! local-LIFO / shared-FIFO / steal / park order.

use std::{
    collections::HashSet,
    sync::atomic::{AtomicBool, AtomicUsize, Ordering},
    sync::{Arc, Condvar, Mutex},
    time::Duration,
};

use buildcore_graph::BuildGraph;
use buildcore_types::{Event, EventBus, NodeStatus, TargetId};
use crossbeam_deque::{Injector, Steal, Stealer, Worker as Deque};
use rand::seq::SliceRandom;

use crate::executor::{Executor, ExecutionOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildSummary {
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: usize,
}

/// Condvar-backed parker: workers block here when their deque, the
/// injector, and every steal candidate are empty: a worker blocks on a
/// condition variable only when its deque and all steal candidates are
/// empty.
#[derive(Default)]
struct Parker {
    mutex: Mutex<()>,
    condvar: Condvar,
}

impl Parker {
    fn park_timeout(&self, timeout: Duration) {
        let guard = self.mutex.lock().unwrap();
        let _ = self.condvar.wait_timeout(guard, timeout).unwrap();
    }

    fn notify_all(&self) {
        self.condvar.notify_all();
    }
}

pub struct Scheduler {
    worker_count: usize,
}

impl Scheduler {
    pub fn new(worker_count: usize) -> Self {
        Self {
            worker_count: worker_count.max(1),
        }
    }

    /// Runs every node in `graph` to a terminal state.
    /// Blocks the calling thread until the build completes or
    /// `cancel` is set.
    pub fn run(&self, graph: &Arc<BuildGraph>, executor: &Arc<Executor>, events: &Arc<EventBus>, cancel: &Arc<AtomicBool>) -> BuildSummary {
        let injector = Arc::new(Injector::<TargetId>::new());
        let deques: Vec<Deque<TargetId>> = (0..self.worker_count).map(|_| Deque::new_lifo()).collect();
        let stealers: Arc<Vec<Stealer<TargetId>>> = Arc::new(deques.iter().map(|d| d.stealer()).collect());

        let remaining = Arc::new(AtomicUsize::new(graph.len()));
        let succeeded = Arc::new(AtomicUsize::new(0));
        let failed = Arc::new(AtomicUsize::new(0));
        let cancelled = Arc::new(AtomicUsize::new(0));
        let parker = Arc::new(Parker::default());

        events.publish(Event::BuildStarted);

        seed_ready_nodes(graph, &injector);
        parker.notify_all();

        std::thread::scope(|scope| {
            for (index, deque) in deques.into_iter().enumerate() {
                let injector = injector.clone();
                let stealers = stealers.clone();
                let graph = graph.clone();
                let executor = executor.clone();
                let remaining = remaining.clone();
                let succeeded = succeeded.clone();
                let failed = failed.clone();
                let cancelled = cancelled.clone();
                let parker = parker.clone();
                let cancel = cancel.clone();

                scope.spawn(move || {
                    worker_loop(
                        index, deque, injector, stealers, graph, executor, remaining, succeeded, failed, cancelled, parker, cancel,
                    );
                });
            }
        });

        let summary = BuildSummary {
            succeeded: succeeded.load(Ordering::SeqCst),
            failed: failed.load(Ordering::SeqCst),
            cancelled: cancelled.load(Ordering::SeqCst),
        };
        events.publish(Event::BuildCompleted {
            succeeded: summary.succeeded,
            failed: summary.failed,
        });
        summary
    }
}

fn seed_ready_nodes(graph: &BuildGraph, injector: &Injector<TargetId>) {
    for id in graph.topo_order() {
        if let Some(node) = graph.node(&id) {
            if node.pending_deps() == 0 {
                node.set_status(NodeStatus::Ready);
                injector.push(id);
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn worker_loop(
    index: usize,
    local: Deque<TargetId>,
    injector: Arc<Injector<TargetId>>,
    stealers: Arc<Vec<Stealer<TargetId>>>,
    graph: Arc<BuildGraph>,
    executor: Arc<Executor>,
    remaining: Arc<AtomicUsize>,
    succeeded: Arc<AtomicUsize>,
    failed: Arc<AtomicUsize>,
    cancelled: Arc<AtomicUsize>,
    parker: Arc<Parker>,
    cancel: Arc<AtomicBool>,
) {
    let mut rng = rand::thread_rng();

    loop {
        if remaining.load(Ordering::SeqCst) == 0 {
            return;
        }

        if cancel.load(Ordering::SeqCst) {
            drain_as_cancelled(&local, &graph, &remaining, &cancelled);
            return;
        }

        let task = local
            .pop()
            .or_else(|| steal_from_injector(&injector, &local))
            .or_else(|| steal_from_peers(&stealers, index, &mut rng));

        let Some(target_id) = task else {
            parker.park_timeout(Duration::from_millis(25));
            continue;
        };

        match executor.execute(&target_id, &graph) {
            ExecutionOutcome::Completed | ExecutionOutcome::Cached => {
                succeeded.fetch_add(1, Ordering::SeqCst);
                remaining.fetch_sub(1, Ordering::SeqCst);
                push_ready_dependents(&graph, &target_id, &local);
                parker.notify_all();
            }
            ExecutionOutcome::Failed => {
                let newly_terminal = cascade_failure(&graph, &target_id);
                failed.fetch_add(1, Ordering::SeqCst);
                remaining.fetch_sub(1 + newly_terminal, Ordering::SeqCst);
                parker.notify_all();
            }
            ExecutionOutcome::Retry => {
                // Producer locality: requeue on this worker's own deque.
                local.push(target_id);
            }
        }
    }
}

fn steal_from_injector(injector: &Injector<TargetId>, local: &Deque<TargetId>) -> Option<TargetId> {
    loop {
        match injector.steal_batch_and_pop(local) {
            Steal::Success(id) => return Some(id),
            Steal::Empty => return None,
            Steal::Retry => continue,
        }
    }
}

fn steal_from_peers(stealers: &[Stealer<TargetId>], own_index: usize, rng: &mut impl rand::Rng) -> Option<TargetId> {
    let mut order: Vec<usize> = (0..stealers.len()).filter(|&i| i != own_index).collect();
    order.shuffle(rng);

    for victim in order {
        loop {
            match stealers[victim].steal() {
                Steal::Success(id) => return Some(id),
                Steal::Empty => break,
                Steal::Retry => continue,
            }
        }
    }
    None
}

/// Pushes every dependent of `completed` whose `pendingDeps` just reached
/// zero onto the completing worker's own local deque, for producer
/// locality.
fn push_ready_dependents(graph: &BuildGraph, completed: &TargetId, local: &Deque<TargetId>) {
    for dependent_id in graph.dependents(completed) {
        if let Some(node) = graph.node(&dependent_id) {
            if node.dep_completed() {
                node.set_status(NodeStatus::Ready);
                local.push(dependent_id);
            }
        }
    }
}

/// On a terminal failure, dependents' `pendingDeps`
/// are not decremented — they stay blocked. To still guarantee
/// that every node reaches a terminal state,
/// every transitive dependent is walked and marked `Failed` as well, since
/// it can now never become Ready (see DESIGN.md). Returns how many
/// dependents were newly marked terminal this way, for `remaining`
/// accounting.
fn cascade_failure(graph: &BuildGraph, failed_root: &TargetId) -> usize {
    let mut visited: HashSet<TargetId> = HashSet::new();
    let mut queue = vec![failed_root.clone()];
    let mut newly_terminal = 0usize;

    while let Some(current) = queue.pop() {
        for dependent_id in graph.dependents(&current) {
            if !visited.insert(dependent_id.clone()) {
                continue;
            }
            if let Some(node) = graph.node(&dependent_id) {
                if !node.status().is_terminal() {
                    node.set_last_error(format!("blocked by failed dependency {failed_root}"));
                    node.set_status(NodeStatus::Failed);
                    newly_terminal += 1;
                }
            }
            queue.push(dependent_id);
        }
    }
    newly_terminal
}

fn drain_as_cancelled(local: &Deque<TargetId>, graph: &BuildGraph, remaining: &Arc<AtomicUsize>, cancelled: &Arc<AtomicUsize>) {
    while let Some(target_id) = local.pop() {
        if let Some(node) = graph.node(&target_id) {
            if !node.status().is_terminal() {
                node.set_status(NodeStatus::Cancelled);
                cancelled.fetch_add(1, Ordering::SeqCst);
                remaining.fetch_sub(1, Ordering::SeqCst);
            }
        }
    }
}
