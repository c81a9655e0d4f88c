//! `ShutdownCoordinator`: process-wide, initialized once, never mutated
//! after init. Registers a `ctrlc` handler that
//! only flips an `AtomicBool` — no I/O happens on the signal thread itself,
//! matching `turborepo-lib`'s `spawn_child` pattern of keeping signal handlers
//! minimal and pushing real work back onto the owning thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cooperative cancellation flag the Scheduler polls between nodes: on
/// shutdown every in-flight handler subprocess should receive termination
/// within 5s.
#[derive(Clone)]
pub struct ShutdownCoordinator {
    cancel: Arc<AtomicBool>,
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self {
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Installs a process-wide `SIGINT`/`SIGTERM` handler. Must be called
    /// at most once per process; `ctrlc::set_handler` itself enforces this
    /// by erroring on a second call.
    pub fn install(&self) -> Result<(), ctrlc::Error> {
        let cancel = self.cancel.clone();
        ctrlc::set_handler(move || {
            tracing::info!("received interrupt, requesting cooperative shutdown");
            cancel.store(true, Ordering::SeqCst);
        })
    }

    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_uncancelled() {
        let shutdown = ShutdownCoordinator::new();
        assert!(!shutdown.is_cancelled());
    }

    #[test]
    fn cancel_flag_shares_state() {
        let shutdown = ShutdownCoordinator::new();
        let flag = shutdown.cancel_flag();
        flag.store(true, Ordering::SeqCst);
        assert!(shutdown.is_cancelled());
    }
}
