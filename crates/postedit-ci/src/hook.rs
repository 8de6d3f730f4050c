//! Hook entry: recursion guard, trigger filter, debounce, change-set
//! resolution, pipeline, report.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use postedit_core::debounce::now_epoch_seconds;
use postedit_core::{
    git, relative_to_root, ChangeSet, ChangeSetResolver, DebounceController, DebounceDecision,
    ExplicitList, FsStateStore, PipelineConfig, PosteditError, RecursionGuard, StateStore,
    TriggerInput,
};
use tracing::{debug, info};

use crate::exit_codes;
use crate::pipeline::{FailurePolicy, PipelineRunner};
use crate::report::PipelineReport;
use crate::runner::CommandRunner;
use crate::stage::StageRegistry;

/// Directory name of the state store when it lives beside the work tree.
pub const STATE_DIR_NAME: &str = ".postedit";

/// How an invocation ended.
#[derive(Debug, Clone, PartialEq)]
pub enum HookOutcome {
    /// Nested invocation; nothing was done.
    RecursionSuppressed,
    /// The trigger did not name a file.
    NoOp { reason: String },
    /// Inside the cooldown window; the trigger was dropped.
    Deferred { elapsed_secs: f64 },
    /// The pipeline ran.
    Completed(PipelineReport),
}

impl HookOutcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            HookOutcome::Completed(report) => report.exit_code,
            _ => exit_codes::SUCCESS,
        }
    }

    pub fn report(&self) -> Option<&PipelineReport> {
        match self {
            HookOutcome::Completed(report) => Some(report),
            _ => None,
        }
    }
}

/// Everything one invocation needs, constructed by the entry point.
pub struct HookContext {
    pub guard: RecursionGuard,
    pub config: PipelineConfig,
    pub working_dir: PathBuf,
    pub trigger: TriggerInput,
    pub explicit: Option<ExplicitList>,
    pub runner: Arc<dyn CommandRunner>,
    /// Overrides the filesystem store derived from the config.
    pub store: Option<Arc<dyn StateStore>>,
    /// Skip the cooldown check entirely (manual runs).
    pub debounce: bool,
    pub self_exe: Option<PathBuf>,
    /// Clock override for deterministic tests.
    pub now: Option<f64>,
}

impl HookContext {
    pub fn new(
        guard: RecursionGuard,
        config: PipelineConfig,
        working_dir: impl Into<PathBuf>,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        Self {
            guard,
            config,
            working_dir: working_dir.into(),
            trigger: TriggerInput::Manual,
            explicit: None,
            runner,
            store: None,
            debounce: true,
            self_exe: None,
            now: None,
        }
    }
}

/// Locate the working context: the enclosing work tree, or the directory
/// itself when it is not under version control.
pub fn resolve_root(working_dir: &Path) -> postedit_core::Result<PathBuf> {
    if !working_dir.is_dir() {
        return Err(PosteditError::Setup(format!(
            "working directory {} does not exist",
            working_dir.display()
        )));
    }
    match git::repo_root(working_dir) {
        Ok(root) => Ok(root),
        Err(e) => {
            debug!(error = %e, "Not a git work tree, using working directory as root");
            Ok(working_dir.to_path_buf())
        }
    }
}

/// Default state directory: inside `.git` when present so it never shows
/// up as a change, otherwise beside the sources.
pub fn default_state_dir(root: &Path) -> PathBuf {
    let git_dir = root.join(".git");
    if git_dir.is_dir() {
        git_dir.join("postedit")
    } else {
        root.join(STATE_DIR_NAME)
    }
}

/// Effective state directory. A relative override is taken from `root`.
pub fn state_dir(config: &PipelineConfig, root: &Path) -> PathBuf {
    match &config.state_dir {
        Some(dir) => root.join(dir),
        None => default_state_dir(root),
    }
}

/// Build the state store for `config` rooted at `root`.
pub fn state_store(config: &PipelineConfig, root: &Path) -> Arc<dyn StateStore> {
    Arc::new(FsStateStore::new(state_dir(config, root)))
}

/// Run one hook invocation.
///
/// `Err` is reserved for setup failures; stage failures are reported
/// through [`HookOutcome::Completed`].
pub async fn run_hook(ctx: HookContext) -> postedit_core::Result<HookOutcome> {
    if ctx.guard.is_recursive_invocation() {
        info!("Nested invocation detected, suppressing");
        return Ok(HookOutcome::RecursionSuppressed);
    }

    let trigger_path = match &ctx.trigger {
        TriggerInput::NoOp { reason } => {
            debug!(reason = %reason, "Nothing to check");
            return Ok(HookOutcome::NoOp {
                reason: reason.clone(),
            });
        }
        TriggerInput::Edit { tool, file_path } => {
            debug!(tool = %tool, file_path = %file_path, "Edit trigger");
            Some(file_path.clone())
        }
        TriggerInput::Manual => None,
    };

    let root = resolve_root(&ctx.working_dir)?;

    if ctx.debounce {
        let store = ctx
            .store
            .clone()
            .unwrap_or_else(|| state_store(&ctx.config, &root));
        let controller = DebounceController::new(store);
        let now = ctx.now.unwrap_or_else(now_epoch_seconds);
        if let DebounceDecision::Defer { elapsed_secs } =
            controller.check_and_record_at(now, ctx.config.cooldown_secs)
        {
            info!(
                elapsed_secs,
                cooldown_secs = ctx.config.cooldown_secs,
                "Within cooldown window, deferring"
            );
            return Ok(HookOutcome::Deferred { elapsed_secs });
        }
    }

    let mut change_set = ChangeSetResolver::new(&root)
        .with_explicit(ctx.explicit.clone())
        .resolve();
    if let Some(path) = &trigger_path {
        change_set = change_set.with_path(&relative_to_root(&root, Path::new(path)));
    }
    change_set = without_state_dir(change_set, &root, &state_dir(&ctx.config, &root));
    info!(change_set = %change_set.describe(), "Resolved change set");

    let registry = StageRegistry::from_config(&ctx.config);
    let pipeline = PipelineRunner::new(registry, ctx.runner.clone(), &root)
        .with_policy(FailurePolicy::from_fail_fast(ctx.config.fail_fast))
        .with_preflight(ctx.config.preflight)
        .with_guard(ctx.guard, ctx.self_exe.clone());

    let run = pipeline.run(&change_set).await;
    Ok(HookOutcome::Completed(PipelineReport::generate(
        &run,
        ctx.config.verbose,
    )))
}

/// Drop paths under the state directory, which the hook itself writes.
fn without_state_dir(change_set: ChangeSet, root: &Path, state_dir: &Path) -> ChangeSet {
    let mut excluded = vec![PathBuf::from(STATE_DIR_NAME)];
    let rel = relative_to_root(root, state_dir);
    // Empty or absolute: the root itself, or outside the work tree
    if !rel.is_empty() && !rel.starts_with('/') {
        excluded.push(PathBuf::from(rel));
    }

    match change_set {
        ChangeSet::All => ChangeSet::All,
        ChangeSet::Files(paths) => ChangeSet::Files(
            paths
                .into_iter()
                .filter(|p| !excluded.iter().any(|e| Path::new(p).starts_with(e)))
                .collect(),
        ),
    }
}
