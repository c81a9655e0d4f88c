//! `DistributedCoordinator` (optional): when enabled, the
//! Scheduler additionally acts as a cluster coordinator over remote worker
//! processes that register, heartbeat, and request work.

pub mod registry;
pub mod steal;
pub mod wire;

pub use registry::{WorkerRegistry, WorkerState, HEARTBEAT_INTERVAL};
pub use steal::{pick_victim, should_initiate_steal};
pub use wire::{Message, WireError};

use std::sync::Arc;
use std::time::Instant;

use buildcore_types::{Event, EventBus};
use parking_lot::Mutex;

/// Coordinates remote workers: owns the `WorkerRegistry` and decides steal
/// targets. Transport (accepting connections, framing `wire::Message`s) is
/// the embedding binary's job; this type is the decision logic the
/// transport layer calls into, mirroring how `buildcore_coordinator`
/// separates cache policy from the on-disk codec.
pub struct DistributedCoordinator {
    registry: Mutex<WorkerRegistry>,
    events: Arc<EventBus>,
}

impl DistributedCoordinator {
    pub fn new(events: Arc<EventBus>) -> Self {
        Self {
            registry: Mutex::new(WorkerRegistry::new()),
            events,
        }
    }

    #[tracing::instrument(skip(self, registration, now), fields(worker_id = %registration.worker_id))]
    pub fn handle_registration(&self, registration: &wire::Registration, now: Instant) {
        tracing::info!(address = %registration.address, "worker registered");
        self.registry.lock().register(&registration.worker_id, &registration.address, now);
    }

    #[tracing::instrument(skip(self, heartbeat, now), fields(worker_id = %heartbeat.worker_id))]
    pub fn handle_heartbeat(&self, heartbeat: &wire::HeartBeat, now: Instant) {
        self.registry.lock().heartbeat(&heartbeat.worker_id, heartbeat.queue_size, now);
    }

    /// Sweeps for workers that missed 3 consecutive heartbeats; their
    /// in-flight action ids are returned so the caller can push them back
    /// to Ready with an incremented retry count.
    #[tracing::instrument(skip(self, now))]
    pub fn sweep_failed_workers(&self, now: Instant) -> Vec<(String, Vec<String>)> {
        let failed = self.registry.lock().sweep_expired(now);
        for (worker_id, actions) in &failed {
            tracing::warn!(worker_id = %worker_id, returned_actions = actions.len(), "worker missed 3 consecutive heartbeats");
            self.events.publish(Event::NetworkDegraded {
                endpoint: worker_id.clone(),
                message: format!("worker missed {} consecutive heartbeats, {} actions returned to Ready", 3, actions.len()),
            });
        }
        failed
    }

    /// Whether `requesting_worker` should initiate a steal, and if so,
    /// which peer to target (power-of-two-choices).
    #[tracing::instrument(skip(self))]
    pub fn choose_steal_target(&self, requesting_worker: &str) -> Option<String> {
        let registry = self.registry.lock();
        let local_queue = registry.queue_size(requesting_worker)?;

        let peers: Vec<(String, u32)> = registry
            .healthy_worker_ids()
            .into_iter()
            .filter(|id| id != requesting_worker)
            .filter_map(|id| registry.queue_size(&id).map(|size| (id, size)))
            .collect();

        let peer_sizes: Vec<u32> = peers.iter().map(|(_, size)| *size).collect();
        if !should_initiate_steal(local_queue, &peer_sizes) {
            return None;
        }

        let mut rng = rand::thread_rng();
        let target = pick_victim(&peers, &mut rng).map(str::to_string);
        if let Some(target) = &target {
            tracing::debug!(victim = %target, "steal target chosen");
        }
        target
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registration_and_heartbeat_flow_through_coordinator() {
        let coordinator = DistributedCoordinator::new(Arc::new(EventBus::new()));
        let now = Instant::now();

        coordinator.handle_registration(
            &wire::Registration {
                worker_id: "w1".into(),
                address: "10.0.0.1:9000".into(),
                capabilities: vec!["rust".into()],
                protocol_version: 1,
            },
            now,
        );
        coordinator.handle_heartbeat(
            &wire::HeartBeat {
                worker_id: "w1".into(),
                inflight: 0,
                queue_size: 4,
                health_score: 1.0,
            },
            now,
        );

        assert!(coordinator.sweep_failed_workers(now).is_empty());
    }

    #[test]
    fn failed_worker_surfaces_its_inflight_actions() {
        let events = Arc::new(EventBus::new());
        let rx = events.subscribe();
        let coordinator = DistributedCoordinator::new(events);
        let now = Instant::now();

        coordinator.handle_registration(
            &wire::Registration {
                worker_id: "w1".into(),
                address: "10.0.0.1:9000".into(),
                capabilities: vec![],
                protocol_version: 1,
            },
            now,
        );
        coordinator.handle_heartbeat(
            &wire::HeartBeat {
                worker_id: "w1".into(),
                inflight: 1,
                queue_size: 0,
                health_score: 1.0,
            },
            now,
        );
        coordinator.registry.lock().assign_action("w1", "action-x");

        let later = now + HEARTBEAT_INTERVAL * 4;
        let failed = coordinator.sweep_failed_workers(later);
        assert_eq!(failed, vec![("w1".to_string(), vec!["action-x".to_string()])]);
        assert!(matches!(rx.try_recv().unwrap(), Event::NetworkDegraded { .. }));
    }

    #[test]
    fn steal_target_chosen_when_local_idle_and_peer_busy() {
        let coordinator = DistributedCoordinator::new(Arc::new(EventBus::new()));
        let now = Instant::now();
        for (id, queue_size) in [("w1", 0u32), ("w2", 10u32)] {
            coordinator.handle_registration(
                &wire::Registration {
                    worker_id: id.into(),
                    address: format!("10.0.0.{id}:9000"),
                    capabilities: vec![],
                    protocol_version: 1,
                },
                now,
            );
            coordinator.handle_heartbeat(
                &wire::HeartBeat {
                    worker_id: id.into(),
                    inflight: 0,
                    queue_size,
                    health_score: 1.0,
                },
                now,
            );
        }

        assert_eq!(coordinator.choose_steal_target("w1"), Some("w2".to_string()));
    }
}
