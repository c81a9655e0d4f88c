//! Work-stealing parallel executor: worker pool, retry
//! policy, and critical-path priority assignment.

pub mod executor;
pub mod handler;
pub mod priority;
pub mod retry;
pub mod scheduler;

pub use executor::{ExecutionOutcome, Executor, Fingerprints};
pub use handler::{BuildContext, HandlerOutput, HandlerRegistry, LanguageHandler, SimdCapabilities, WorkspaceOptions};
pub use priority::CriticalPathAnalyzer;
pub use scheduler::{BuildSummary, Scheduler};
