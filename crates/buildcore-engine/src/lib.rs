//! `buildcore-engine`: the facade an external CLI/TUI/LSP calls into.
//! The DSL parser, workspace loader, and per-language handler command
//! construction stay out of scope; this crate is the thin seam
//! between them and the subsystems underneath.
//!
//! Grounded on how `turborepo-lib` assembles `turborepo-engine` +
//! `turborepo-cache` + `turborepo-scm` beneath its own CLI layer: one
//! top-level struct owns every subsystem handle and exposes a single
//! entry point, here `BuildCore::run`.

pub mod config;
pub mod fingerprints;
pub mod shutdown;

pub use config::{CoreConfig, RemoteCacheConfig};
pub use shutdown::ShutdownCoordinator;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use buildcore_cache::{ActionCache, TargetCache};
use buildcore_cas::BlobStore;
use buildcore_coordinator::CacheCoordinator;
use buildcore_filetracker::FileTracker;
use buildcore_graph::{BuildGraph, DependencyAnalyzer, GraphError, ImportIndex};
use buildcore_remote_cache::{HttpRemoteCache, RemoteCache};
use buildcore_scheduler::{
    BuildSummary, CriticalPathAnalyzer, Executor, HandlerRegistry, Scheduler, SimdCapabilities, WorkspaceOptions,
};
use buildcore_types::{CoreError, Event, EventBus, ErrorKind, Target, TargetId};
use camino::Utf8PathBuf;
use fingerprints::FileTrackerFingerprints;

/// The CLI command surface the core is invoked with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Build,
    Clean,
    Graph,
    Query,
}

/// `{command, target?, verbose, mode, parallelism?}`. `mode`
/// reuses `buildcore_incremental::Strategy` since it names the same
/// Full/Incremental/Minimal choice the CLI surface calls "mode".
#[derive(Debug, Clone)]
pub struct InvocationOptions {
    pub target: Option<TargetId>,
    pub verbose: bool,
    pub mode: buildcore_incremental::Strategy,
    pub parallelism: Option<usize>,
}

impl Default for InvocationOptions {
    fn default() -> Self {
        Self {
            target: None,
            verbose: false,
            mode: buildcore_incremental::Strategy::Incremental,
            parallelism: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BuildResult {
    pub exit_code: i32,
    pub summary: Option<BuildSummary>,
    /// Populated for `Command::Graph`: the topological target order.
    pub graph_order: Option<Vec<TargetId>>,
    /// Populated when the invocation failed: a rendered
    /// `miette::Diagnostic` report (code, severity, help text) a CLI can
    /// print as-is instead of reformatting `CoreError` itself.
    pub report: Option<String>,
}

impl BuildResult {
    fn from_error(error: CoreError) -> Self {
        let exit_code = error.kind.exit_code();
        let report = format!("{:?}", miette::Report::new(error));
        Self {
            exit_code,
            summary: None,
            graph_order: None,
            report: Some(report),
        }
    }
}

/// Wires every subsystem into one invocable unit. Construction
/// performs all fallible setup (opening cache files, building the remote
/// client); `run` never fails on setup, only on a specific invocation.
pub struct BuildCore {
    workspace_root: Utf8PathBuf,
    graph: Arc<BuildGraph>,
    coordinator: Arc<CacheCoordinator>,
    executor: Arc<Executor>,
    blobs: Arc<BlobStore>,
    events: Arc<EventBus>,
    shutdown: ShutdownCoordinator,
    parallelism: usize,
}

impl BuildCore {
    /// Opens the on-disk cache tiers under `<workspace>/.builder-cache`,
    /// builds the target graph, and wires
    /// the scheduler's `Executor`. `signing_key` authenticates the cache
    /// file HMAC (binary format).
    pub fn new(
        workspace_root: impl Into<Utf8PathBuf>,
        target_list: Vec<Target>,
        handlers: HandlerRegistry,
        import_index: ImportIndex,
        analyzer: Option<Box<dyn DependencyAnalyzer>>,
        signing_key: [u8; 32],
        config: CoreConfig,
    ) -> Result<Self, CoreError> {
        let workspace_root = workspace_root.into();
        let cache_root = workspace_root.join(".builder-cache");
        std::fs::create_dir_all(cache_root.join("cas")).map_err(|e| CoreError::io(e.to_string()))?;

        let blobs = Arc::new(
            BlobStore::new(cache_root.join("cas")).map_err(|e| CoreError::io(e.to_string()))?,
        );

        let events = Arc::new(EventBus::new());
        let targets = TargetCache::open(cache_root.join("targets.bin"), signing_key, blobs.clone(), config.target_cache_limits, events.clone());
        let actions = ActionCache::open(cache_root.join("actions.bin"), signing_key, blobs.clone(), config.action_cache_limits, events.clone());

        let remote: Option<Arc<dyn RemoteCache>> = match &config.remote_cache {
            Some(remote_config) => {
                let client = HttpRemoteCache::new(
                    remote_config.url.clone(),
                    remote_config.timeout,
                    u64::MAX,
                    remote_config.compression,
                )
                .map_err(|e| CoreError::network(e.to_string()))?;
                Some(Arc::new(client))
            }
            None => None,
        };

        let coordinator = Arc::new(CacheCoordinator::new(
            targets,
            actions,
            remote,
            blobs.clone(),
            events.clone(),
        ));

        let sources_fn = |target: &Target| -> Vec<(Utf8PathBuf, String)> {
            target
                .sources
                .iter()
                .filter_map(|path| {
                    let absolute = workspace_root.join(path);
                    std::fs::read_to_string(&absolute).ok().map(|contents| (path.clone(), contents))
                })
                .collect()
        };

        let graph = Arc::new(
            BuildGraph::build(target_list, &sources_fn, analyzer.as_deref(), &import_index)
                .map_err(graph_error_to_core)?,
        );

        let tracker = Arc::new(FileTracker::new());
        let fingerprints = Arc::new(FileTrackerFingerprints::new(tracker, workspace_root.clone()));

        let workspace_options = WorkspaceOptions {
            root: workspace_root.clone(),
            parallelism: num_cpus(),
            verbose: false,
        };

        let executor = Arc::new(Executor::new(
            coordinator.clone(),
            Arc::new(handlers),
            blobs.clone(),
            events.clone(),
            fingerprints,
            workspace_options,
            SimdCapabilities::default(),
        ));

        let shutdown = ShutdownCoordinator::new();

        Ok(Self {
            workspace_root,
            graph,
            coordinator,
            executor,
            blobs,
            events,
            shutdown,
            parallelism: num_cpus(),
        })
    }

    pub fn events(&self) -> Arc<EventBus> {
        self.events.clone()
    }

    /// Installs the `SIGINT`/`SIGTERM` handler. Call at most once per
    /// process.
    pub fn install_shutdown_handler(&self) -> Result<(), ctrlc::Error> {
        self.shutdown.install()
    }

    /// Single entry point an external CLI/TUI/LSP calls. Returns
    /// the process exit code alongside whatever data the command produces.
    pub fn run(&self, command: Command, options: InvocationOptions) -> BuildResult {
        match command {
            Command::Build => self.run_build(&options),
            Command::Clean => self.run_clean(),
            Command::Graph => self.run_graph(),
            Command::Query => self.run_query(&options),
        }
    }

    fn run_build(&self, options: &InvocationOptions) -> BuildResult {
        // options.mode selects Full/Incremental/Minimal at the action level;
        // handlers consult buildcore_incremental::IncrementalEngine directly
        // rather than the scheduler, so it isn't read here.
        CriticalPathAnalyzer::new().assign_priorities(&self.graph, &|_target| 1.0);

        let worker_count = options.parallelism.unwrap_or(self.parallelism);
        let scheduler = Scheduler::new(worker_count);
        let cancel = self.shutdown.cancel_flag();

        let summary = scheduler.run(&self.graph, &self.executor, &self.events, &cancel);

        if let Err(error) = self.coordinator.flush() {
            tracing::warn!(error = %error, "cache flush failed after build");
        }

        self.events.publish(Event::BuildCompleted {
            succeeded: summary.succeeded,
            failed: summary.failed,
        });

        let exit_code = if cancel.load(Ordering::SeqCst) {
            ErrorKind::Cancelled.exit_code()
        } else if summary.failed > 0 {
            ErrorKind::Handler.exit_code()
        } else {
            0
        };

        BuildResult {
            exit_code,
            summary: Some(summary),
            graph_order: None,
            report: None,
        }
    }

    /// Removes the on-disk cache tiers and CAS store entirely. The next
    /// `build` starts from a cold cache (no target is left partially
    /// cached, matching "Cache errors are never fatal: discard
    /// and rebuild" posture applied preemptively).
    fn run_clean(&self) -> BuildResult {
        let cache_root = self.workspace_root.join(".builder-cache");
        if let Err(error) = std::fs::remove_dir_all(&cache_root) {
            if cache_root.exists() {
                return BuildResult::from_error(CoreError::io(error.to_string()));
            }
        }
        BuildResult {
            exit_code: 0,
            summary: None,
            graph_order: None,
            report: None,
        }
    }

    fn run_graph(&self) -> BuildResult {
        BuildResult {
            exit_code: 0,
            summary: None,
            graph_order: Some(self.graph.topo_order()),
            report: None,
        }
    }

    fn run_query(&self, options: &InvocationOptions) -> BuildResult {
        let Some(target) = &options.target else {
            return BuildResult::from_error(CoreError::input("query requires a target"));
        };
        match self.graph.node(target) {
            Some(_) => BuildResult {
                exit_code: 0,
                summary: None,
                graph_order: Some(self.graph.dependencies(target)),
                report: None,
            },
            None => BuildResult::from_error(CoreError::input(format!("unknown target {target}")).with_target(target.clone())),
        }
    }

    pub fn blobs(&self) -> &Arc<BlobStore> {
        &self.blobs
    }
}

fn graph_error_to_core(error: GraphError) -> CoreError {
    CoreError::graph(error.to_string())
}

fn num_cpus() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
}
