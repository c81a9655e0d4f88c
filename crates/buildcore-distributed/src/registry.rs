//! Worker registry: per-worker state machine and heartbeat bookkeeping
//!.
//!
//! `Unregistered -> Registered -> (Healthy <-> Degraded) -> Failed`.
//! Heartbeats are due every 2s; missing 3 consecutive heartbeats marks a
//! worker Failed, at which point every action assigned to it is returned to
//! the caller for rescheduling (the registry only reports which action ids
//! were in flight — re-enqueuing onto the local `BuildGraph`/`Scheduler` is
//! the coordinator's job, kept out of this crate to avoid a dependency
//! cycle with `buildcore-scheduler`).

use std::collections::HashMap;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Unregistered,
    Registered,
    Healthy,
    Degraded,
    Failed,
}

pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(2);
const MISSED_HEARTBEATS_BEFORE_FAILED: u32 = 3;

struct WorkerRecord {
    state: WorkerState,
    address: String,
    last_heartbeat: Instant,
    missed_heartbeats: u32,
    queue_size: u32,
    inflight_actions: Vec<String>,
}

pub struct WorkerRegistry {
    workers: HashMap<String, WorkerRecord>,
}

impl Default for WorkerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self { workers: HashMap::new() }
    }

    pub fn register(&mut self, worker_id: impl Into<String>, address: impl Into<String>, now: Instant) {
        self.workers.insert(
            worker_id.into(),
            WorkerRecord {
                state: WorkerState::Registered,
                address: address.into(),
                last_heartbeat: now,
                missed_heartbeats: 0,
                queue_size: 0,
                inflight_actions: Vec::new(),
            },
        );
    }

    pub fn state(&self, worker_id: &str) -> Option<WorkerState> {
        self.workers.get(worker_id).map(|w| w.state)
    }

    pub fn address(&self, worker_id: &str) -> Option<&str> {
        self.workers.get(worker_id).map(|w| w.address.as_str())
    }

    pub fn queue_size(&self, worker_id: &str) -> Option<u32> {
        self.workers.get(worker_id).map(|w| w.queue_size)
    }

    /// Records a heartbeat: resets the missed count and promotes Registered
    /// or Degraded workers back to Healthy.
    pub fn heartbeat(&mut self, worker_id: &str, queue_size: u32, now: Instant) {
        if let Some(record) = self.workers.get_mut(worker_id) {
            record.last_heartbeat = now;
            record.missed_heartbeats = 0;
            record.queue_size = queue_size;
            if record.state != WorkerState::Failed {
                record.state = WorkerState::Healthy;
            }
        }
    }

    pub fn assign_action(&mut self, worker_id: &str, action_id: impl Into<String>) {
        if let Some(record) = self.workers.get_mut(worker_id) {
            record.inflight_actions.push(action_id.into());
        }
    }

    pub fn complete_action(&mut self, worker_id: &str, action_id: &str) {
        if let Some(record) = self.workers.get_mut(worker_id) {
            record.inflight_actions.retain(|id| id != action_id);
        }
    }

    /// Sweeps every worker whose heartbeat is overdue relative to `now`.
    /// Returns the ids of workers that transitioned to `Failed` this call,
    /// paired with the actions that were in flight on them (to be returned
    /// to Ready with an incremented retry count by the caller).
    pub fn sweep_expired(&mut self, now: Instant) -> Vec<(String, Vec<String>)> {
        let mut newly_failed = Vec::new();

        for (worker_id, record) in self.workers.iter_mut() {
            if record.state == WorkerState::Failed {
                continue;
            }
            if now.duration_since(record.last_heartbeat) < HEARTBEAT_INTERVAL {
                continue;
            }

            let missed = now.duration_since(record.last_heartbeat).as_secs_f64() / HEARTBEAT_INTERVAL.as_secs_f64();
            record.missed_heartbeats = missed.floor() as u32;

            if record.missed_heartbeats >= MISSED_HEARTBEATS_BEFORE_FAILED {
                record.state = WorkerState::Failed;
                newly_failed.push((worker_id.clone(), std::mem::take(&mut record.inflight_actions)));
            } else if record.missed_heartbeats >= 1 {
                record.state = WorkerState::Degraded;
            }
        }

        newly_failed
    }

    pub fn healthy_worker_ids(&self) -> Vec<String> {
        self.workers
            .iter()
            .filter(|(_, r)| matches!(r.state, WorkerState::Healthy))
            .map(|(id, _)| id.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registration_then_heartbeat_reaches_healthy() {
        let mut registry = WorkerRegistry::new();
        let now = Instant::now();
        registry.register("w1", "10.0.0.1:9000", now);
        assert_eq!(registry.state("w1"), Some(WorkerState::Registered));

        registry.heartbeat("w1", 3, now);
        assert_eq!(registry.state("w1"), Some(WorkerState::Healthy));
    }

    #[test]
    fn three_missed_heartbeats_marks_failed_and_returns_inflight_actions() {
        let mut registry = WorkerRegistry::new();
        let now = Instant::now();
        registry.register("w1", "10.0.0.1:9000", now);
        registry.heartbeat("w1", 1, now);
        registry.assign_action("w1", "action-1");

        let later = now + HEARTBEAT_INTERVAL * 3;
        let failed = registry.sweep_expired(later);

        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].0, "w1");
        assert_eq!(failed[0].1, vec!["action-1".to_string()]);
        assert_eq!(registry.state("w1"), Some(WorkerState::Failed));
    }

    #[test]
    fn one_missed_heartbeat_degrades_without_failing() {
        let mut registry = WorkerRegistry::new();
        let now = Instant::now();
        registry.register("w1", "10.0.0.1:9000", now);
        registry.heartbeat("w1", 1, now);

        let later = now + HEARTBEAT_INTERVAL * 2;
        let failed = registry.sweep_expired(later);

        assert!(failed.is_empty());
        assert_eq!(registry.state("w1"), Some(WorkerState::Degraded));
    }
}
