//! Language handler contract: the only extension point the core
//! calls into. Concrete handlers (invoking `rustc`, `gcc`, `javac`, ...) are
//! an external collaborator; the core only sees this narrow interface,
//! one trait with no inheritance hierarchy across languages.

use std::collections::HashMap;
use std::sync::Arc;

use buildcore_types::{CoreError, Language, Target};
use camino::Utf8PathBuf;
use parking_lot::Mutex;

#[derive(Debug, Clone, Default)]
pub struct WorkspaceOptions {
    pub root: Utf8PathBuf,
    pub parallelism: usize,
    pub verbose: bool,
}

/// SIMD dispatch hints threaded through to handlers that shell out to
/// SIMD-aware tools; the core itself only uses this for its own hasher.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimdCapabilities {
    pub avx2: bool,
    pub sse42: bool,
    pub neon: bool,
}

/// One `recordAction` call captured from a handler during `build()`.
#[derive(Debug, Clone)]
pub struct RecordedAction {
    pub action_id: String,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    pub metadata_kv: Vec<(String, String)>,
    pub success: bool,
}

/// One `recordDependency` call: a source file and the import paths it
/// resolved to, fed back into the `DependentIndex`.
#[derive(Debug, Clone)]
pub struct RecordedDependency {
    pub source_file: Utf8PathBuf,
    pub deps: Vec<Utf8PathBuf>,
}

/// Handed to `LanguageHandler::build` for one target invocation. The two
/// `record_*` methods are the callbacks a handler uses to report back; they accumulate into
/// interior-mutable buffers the Executor drains after `build()` returns,
/// since handlers run on the calling worker thread and never need to share
/// this context across threads.
pub struct BuildContext<'a> {
    pub target: &'a Target,
    pub workspace_options: &'a WorkspaceOptions,
    pub simd_capabilities: SimdCapabilities,
    actions: Mutex<Vec<RecordedAction>>,
    dependencies: Mutex<Vec<RecordedDependency>>,
}

impl<'a> BuildContext<'a> {
    pub fn new(target: &'a Target, workspace_options: &'a WorkspaceOptions, simd_capabilities: SimdCapabilities) -> Self {
        Self {
            target,
            workspace_options,
            simd_capabilities,
            actions: Mutex::new(Vec::new()),
            dependencies: Mutex::new(Vec::new()),
        }
    }

    pub fn record_action(
        &self,
        action_id: impl Into<String>,
        inputs: Vec<String>,
        outputs: Vec<String>,
        metadata_kv: Vec<(String, String)>,
        success: bool,
    ) {
        self.actions.lock().push(RecordedAction {
            action_id: action_id.into(),
            inputs,
            outputs,
            metadata_kv,
            success,
        });
    }

    pub fn record_dependency(&self, source_file: Utf8PathBuf, deps: Vec<Utf8PathBuf>) {
        self.dependencies.lock().push(RecordedDependency { source_file, deps });
    }

    /// Drains the recorded actions and dependencies; called once by the
    /// Executor after `handler.build()` returns.
    pub fn take_recorded(&self) -> (Vec<RecordedAction>, Vec<RecordedDependency>) {
        (std::mem::take(&mut self.actions.lock()), std::mem::take(&mut self.dependencies.lock()))
    }
}

#[derive(Debug, Clone)]
pub struct HandlerOutput {
    pub output_hash: String,
    pub output_paths: Vec<Utf8PathBuf>,
}

/// Per-language build capability, registered once at startup.
pub trait LanguageHandler: Send + Sync {
    fn analyze_imports(&self, sources: &[Utf8PathBuf]) -> Vec<String>;
    fn build(&self, context: &BuildContext) -> Result<HandlerOutput, CoreError>;
    fn get_outputs(&self, target: &Target, workspace: &camino::Utf8Path) -> Vec<Utf8PathBuf>;
}

/// Process-wide map from `Target::language` to its handler. Built once at
/// startup and never mutated after; the builder
/// pattern here enforces that by consuming `self` on each `register` call.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<Language, Arc<dyn LanguageHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, language: impl Into<Language>, handler: Arc<dyn LanguageHandler>) -> Self {
        self.handlers.insert(language.into(), handler);
        self
    }

    pub fn get(&self, language: &Language) -> Option<Arc<dyn LanguageHandler>> {
        self.handlers.get(language).cloned()
    }
}
