//! postedit - staged post-change enforcement
//!
//! The `postedit` command runs format, typecheck, build and test gates
//! after an editing action and reports the first failure with a stable
//! exit code.
//!
//! ## Commands
//!
//! - `hook`: entry point for editor hooks (default when no command is given)
//! - `run`: manual run, no debounce, trigger ignored
//! - `stages`: list the stage table and what would run
//! - `reset-state`: forget the last trigger timestamp

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use postedit_ci::exit_codes;
use postedit_ci::hook::{resolve_root, state_store};
use postedit_ci::{run_hook, HookContext, HookOutcome, ProcessRunner, StageRegistry};
use postedit_core::{
    init_tracing, level_for, read_trigger, ChangeSet, ChangeSetResolver, DebounceController,
    ExplicitList, LogFormat, PipelineConfig, PosteditError, RecursionGuard, TriggerInput, ENV_PREFIX,
};

#[derive(Parser, Debug)]
#[command(name = "postedit")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Staged post-change enforcement (format, typecheck, build, test)", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json_logs: bool,

    /// Print the JSON report on stdout
    #[arg(long, global = true)]
    json: bool,

    /// Directory to run in (default: current directory)
    #[arg(long, global = true, env = "POSTEDIT_WORKDIR")]
    workdir: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run as an editor hook: read the trigger, debounce, then run the pipeline
    Hook(HookArgs),

    /// Run the pipeline once, ignoring trigger and cooldown
    Run(RunArgs),

    /// List stages in execution order
    Stages {
        #[command(flatten)]
        selection: SelectionArgs,
    },

    /// Clear the debounce state
    ResetState,
}

/// Where the change list comes from when it is given explicitly.
#[derive(Args, Debug, Default, Clone)]
struct SelectionArgs {
    /// Changed paths, newline or comma separated (overrides git diff)
    #[arg(long)]
    changed_files: Option<String>,

    /// File holding the changed paths, one per line
    #[arg(long, value_name = "PATH")]
    changed_files_from: Option<PathBuf>,
}

#[derive(Args, Debug, Default, Clone)]
struct RunArgs {
    #[command(flatten)]
    selection: SelectionArgs,

    /// Run every applicable stage even after a failure
    #[arg(long)]
    no_fail_fast: bool,

    /// Check that every applicable tool exists before running anything
    #[arg(long)]
    preflight: bool,
}

#[derive(Args, Debug, Default, Clone)]
struct HookArgs {
    #[command(flatten)]
    run: RunArgs,

    /// Trigger descriptor JSON (default: POSTEDIT_TRIGGER, then stdin)
    #[arg(long)]
    trigger: Option<String>,

    /// Never read the trigger from stdin
    #[arg(long)]
    no_stdin: bool,

    /// Skip the cooldown check
    #[arg(long)]
    no_debounce: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let code = run_cli(cli, RecursionGuard::from_env(), std::env::vars()).await;
    to_exit_code(code)
}

/// Process-level flow: guard, configuration, logging, command.
async fn run_cli<I>(cli: Cli, guard: RecursionGuard, vars: I) -> i32
where
    I: IntoIterator<Item = (String, String)>,
{
    // Nested invocations do nothing, whatever the inherited configuration
    if guard.is_recursive_invocation() {
        return exit_codes::SUCCESS;
    }

    // Configuration errors are reported after logging is up
    let config = PipelineConfig::from_vars(vars);
    let verbose = cli.verbose || config.as_ref().map(|c| c.verbose).unwrap_or(false);
    init_tracing(LogFormat::from_json_flag(cli.json_logs), level_for(verbose));

    let result = match config {
        Ok(config) => execute(cli, guard, config).await,
        Err(e) => Err(e.into()),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("postedit: error: {e:#}");
            exit_codes::SETUP_ERROR
        }
    }
}

async fn execute(cli: Cli, guard: RecursionGuard, mut config: PipelineConfig) -> Result<i32> {
    let workdir = match cli.workdir {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to determine working directory")?,
    };
    if cli.verbose {
        config.verbose = true;
    }

    match cli.command.unwrap_or_else(|| Commands::Hook(HookArgs::default())) {
        Commands::Hook(args) => cmd_hook(guard, config, &workdir, args, cli.json).await,
        Commands::Run(args) => cmd_run(guard, config, &workdir, args, cli.json).await,
        Commands::Stages { selection } => cmd_stages(&config, &workdir, &selection, cli.json),
        Commands::ResetState => cmd_reset_state(&config, &workdir),
    }
}

async fn cmd_hook(
    guard: RecursionGuard,
    config: PipelineConfig,
    workdir: &Path,
    args: HookArgs,
    json: bool,
) -> Result<i32> {
    let raw = read_trigger(
        args.trigger.clone().or_else(|| env_value("TRIGGER")),
        !args.no_stdin,
    )
    .context("Failed to read trigger")?;

    let mut ctx = hook_context(guard, config, workdir, &args.run);
    ctx.trigger = TriggerInput::from_raw(raw.as_deref());
    ctx.debounce = !args.no_debounce;

    let outcome = run_hook(ctx).await?;
    emit(&outcome, json)
}

async fn cmd_run(
    guard: RecursionGuard,
    config: PipelineConfig,
    workdir: &Path,
    args: RunArgs,
    json: bool,
) -> Result<i32> {
    let mut ctx = hook_context(guard, config, workdir, &args);
    ctx.debounce = false;

    let outcome = run_hook(ctx).await?;
    emit(&outcome, json)
}

fn cmd_stages(
    config: &PipelineConfig,
    workdir: &Path,
    selection: &SelectionArgs,
    json: bool,
) -> Result<i32> {
    let registry = StageRegistry::from_config(config);
    let change_set = match explicit_list(selection) {
        Some(explicit) => {
            let root = resolve_root(workdir)?;
            Some(ChangeSetResolver::new(&root).with_explicit(Some(explicit)).resolve())
        }
        None => None,
    };

    if json {
        let stages: Vec<_> = registry
            .stages()
            .iter()
            .map(|def| {
                json!({
                    "name": def.name,
                    "description": def.description,
                    "command": def.command,
                    "exit_code": def.exit_code,
                    "timeout_secs": def.timeout.as_secs(),
                    "override_key": def.override_key,
                    "applies": change_set.as_ref().map(|cs| def.applies(cs)),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&stages)?);
    } else {
        for line in stage_lines(&registry, change_set.as_ref()) {
            println!("{line}");
        }
    }
    Ok(exit_codes::SUCCESS)
}

fn cmd_reset_state(config: &PipelineConfig, workdir: &Path) -> Result<i32> {
    let root = resolve_root(workdir)?;
    DebounceController::new(state_store(config, &root))
        .reset()
        .map_err(PosteditError::State)
        .context("Failed to clear debounce state")?;
    eprintln!("postedit: debounce state cleared");
    Ok(exit_codes::SUCCESS)
}

fn hook_context(
    guard: RecursionGuard,
    mut config: PipelineConfig,
    workdir: &Path,
    args: &RunArgs,
) -> HookContext {
    if args.no_fail_fast {
        config.fail_fast = false;
    }
    if args.preflight {
        config.preflight = true;
    }

    let mut ctx = HookContext::new(guard, config, workdir, Arc::new(ProcessRunner::new()));
    ctx.explicit = explicit_list(&args.selection);
    ctx.self_exe = std::env::current_exe().ok();
    ctx
}

/// Explicit change list: file flag, then inline flag, then POSTEDIT_CHANGED_FILES.
fn explicit_list(selection: &SelectionArgs) -> Option<ExplicitList> {
    if let Some(path) = &selection.changed_files_from {
        return Some(ExplicitList::File(path.clone()));
    }
    selection
        .changed_files
        .clone()
        .or_else(|| env_value("CHANGED_FILES"))
        .map(ExplicitList::Inline)
}

fn env_value(suffix: &str) -> Option<String> {
    std::env::var(format!("{ENV_PREFIX}_{suffix}"))
        .ok()
        .filter(|v| !v.trim().is_empty())
}

fn emit(outcome: &HookOutcome, json: bool) -> Result<i32> {
    if let HookOutcome::Completed(report) = outcome {
        eprint!("{}", report.render_text());
        if json {
            println!("{}", serde_json::to_string_pretty(report)?);
        }
    }
    Ok(outcome.exit_code())
}

fn stage_lines(registry: &StageRegistry, change_set: Option<&ChangeSet>) -> Vec<String> {
    registry
        .stages()
        .iter()
        .enumerate()
        .map(|(i, def)| {
            let mut line = format!(
                "{}. {:<10} {:<32} exit {}  timeout {}s",
                i + 1,
                def.name,
                def.command.join(" "),
                def.exit_code,
                def.timeout.as_secs()
            );
            if let Some(cs) = change_set {
                if def.applies(cs) {
                    line.push_str("  [runs]");
                } else {
                    line.push_str(&format!("  [skipped: {}]", def.skip_reason()));
                }
            } else if let Some(reason) = &def.suppressed_by {
                line.push_str(&format!("  [{reason}]"));
            }
            line
        })
        .collect()
}

fn to_exit_code(code: i32) -> ExitCode {
    ExitCode::from(exit_status_byte(code))
}

/// Out-of-range codes collapse to a generic failure.
fn exit_status_byte(code: i32) -> u8 {
    u8::try_from(code).unwrap_or(1)
}
