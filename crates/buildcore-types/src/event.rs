//! The cross-component event bus, plus the
//! GC/circuit-breaker payload additions.
//!
//! Every component publishes through a shared [`EventBus`]; an external
//! renderer/telemetry collaborator subscribes via [`EventBus::subscribe`].
//! Implemented with `crossbeam-channel`'s multi-consumer broadcast-by-clone
//! pattern rather than a single mpsc, since events are consumed by
//! a renderer and telemetry as independent subscribers.

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;

use crate::target::TargetId;

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    BuildStarted,
    BuildCompleted { succeeded: usize, failed: usize },
    TargetStarted { target: TargetId },
    TargetCompleted { target: TargetId },
    TargetFailed { target: TargetId, message: String },
    TargetCached { target: TargetId },
    CacheHit { key: String, tier: &'static str },
    CacheMiss { key: String },
    CacheUpdate { key: String },
    CacheEviction { key: String, reason: &'static str },
    RemoteHit { key: String },
    RemotePush { key: String },
    GcStarted,
    GcCompleted {
        scanned: u64,
        reachable: u64,
        deleted: u64,
        bytes_freed: u64,
    },
    NetworkDegraded { endpoint: String, message: String },
}

/// Fan-out event bus: every subscriber gets its own bounded
/// `crossbeam_channel` receiver fed from a single publish call.
pub struct EventBus {
    subscribers: Mutex<Vec<Sender<Event>>>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Returns a receiver that will observe every event published after
    /// this call.
    pub fn subscribe(&self) -> Receiver<Event> {
        let (tx, rx) = crossbeam_channel::unbounded();
        self.subscribers.lock().push(tx);
        rx
    }

    pub fn publish(&self, event: Event) {
        tracing::trace!(?event, "event published");
        let mut subs = self.subscribers.lock();
        subs.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscriber_receives_published_event() {
        let bus = EventBus::new();
        let rx = bus.subscribe();
        bus.publish(Event::BuildStarted);
        assert_eq!(rx.recv().unwrap(), Event::BuildStarted);
    }

    #[test]
    fn dead_subscriber_is_pruned() {
        let bus = EventBus::new();
        {
            let _rx = bus.subscribe();
        }
        assert_eq!(bus.subscribers.lock().len(), 1);
        bus.publish(Event::BuildStarted);
        assert_eq!(bus.subscribers.lock().len(), 0);
    }

    #[test]
    fn multiple_subscribers_both_receive() {
        let bus = EventBus::new();
        let rx1 = bus.subscribe();
        let rx2 = bus.subscribe();
        bus.publish(Event::GcStarted);
        assert_eq!(rx1.recv().unwrap(), Event::GcStarted);
        assert_eq!(rx2.recv().unwrap(), Event::GcStarted);
    }
}
