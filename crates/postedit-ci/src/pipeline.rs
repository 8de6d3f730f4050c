//! Pipeline orchestration: walk the registry in order, run applicable
//! stages, and apply the failure policy.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use postedit_core::{ChangeSet, RecursionGuard, StageKind};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::exit_codes;
use crate::runner::{CommandOutcome, CommandRequest, CommandRunner};
use crate::stage::{StageDefinition, StageRegistry};

/// What to do after a stage fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Halt at the first failure.
    #[default]
    FailFast,
    /// Run every applicable stage; report the first failure.
    ContinueOnError,
}

impl FailurePolicy {
    pub fn from_fail_fast(fail_fast: bool) -> Self {
        if fail_fast {
            FailurePolicy::FailFast
        } else {
            FailurePolicy::ContinueOnError
        }
    }
}

/// Why a stage failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The stage's executable is not available.
    ToolNotFound,
    /// The command ran and exited non-zero, or could not be started.
    StageFailure,
    /// The command exceeded its timeout.
    StageTimeout,
}

/// Outcome of one stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageResult {
    pub stage_name: String,
    pub kind: StageKind,
    /// False when the stage was skipped as not applicable.
    pub ran: bool,
    pub success: bool,
    pub message: String,
    /// The stage's assigned exit code, set only on failure.
    pub exit_code_if_failed: Option<i32>,
    pub failure: Option<FailureKind>,
    pub command: Vec<String>,
    /// Exit code of the command itself, if it was executed.
    pub command_exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
    /// Remediation hint, set only on failure.
    pub remediation_hint: Option<String>,
}

impl StageResult {
    fn skipped(def: &StageDefinition) -> Self {
        Self {
            stage_name: def.name.clone(),
            kind: def.kind,
            ran: false,
            success: true,
            message: format!("skipped: {}", def.skip_reason()),
            exit_code_if_failed: None,
            failure: None,
            command: def.command.clone(),
            command_exit_code: None,
            stdout: String::new(),
            stderr: String::new(),
            duration_ms: 0,
            remediation_hint: None,
        }
    }

    fn tool_not_found(def: &StageDefinition, program: &str) -> Self {
        Self {
            stage_name: def.name.clone(),
            kind: def.kind,
            ran: true,
            success: false,
            message: format!("tool not found: {program}"),
            exit_code_if_failed: Some(def.exit_code),
            failure: Some(FailureKind::ToolNotFound),
            command: def.command.clone(),
            command_exit_code: None,
            stdout: String::new(),
            stderr: String::new(),
            duration_ms: 0,
            remediation_hint: Some(format!("{} {}", def.install_hint, def.remediation_hint)),
        }
    }

    fn from_outcome(def: &StageDefinition, outcome: CommandOutcome) -> Self {
        if let CommandOutcome::ToolNotFound { program } = &outcome {
            return Self::tool_not_found(def, program);
        }

        let success = outcome.succeeded();
        let (message, failure) = match &outcome {
            _ if success => ("passed".to_string(), None),
            CommandOutcome::TimedOut { timeout, .. } => (
                format!("timed out after {}s", timeout.as_secs()),
                Some(FailureKind::StageTimeout),
            ),
            other => (
                format!("exited with code {}", other.exit_code()),
                Some(FailureKind::StageFailure),
            ),
        };

        Self {
            stage_name: def.name.clone(),
            kind: def.kind,
            ran: true,
            success,
            message,
            exit_code_if_failed: (!success).then_some(def.exit_code),
            failure,
            command: def.command.clone(),
            command_exit_code: Some(outcome.exit_code()),
            stdout: outcome.stdout().to_string(),
            stderr: outcome.stderr().to_string(),
            duration_ms: outcome.duration_ms(),
            remediation_hint: (!success).then(|| def.remediation_hint.clone()),
        }
    }

    fn start_error(def: &StageDefinition, error: &anyhow::Error, duration_ms: u64) -> Self {
        Self {
            stage_name: def.name.clone(),
            kind: def.kind,
            ran: true,
            success: false,
            message: format!("could not be started: {error}"),
            exit_code_if_failed: Some(def.exit_code),
            failure: Some(FailureKind::StageFailure),
            command: def.command.clone(),
            command_exit_code: None,
            stdout: String::new(),
            stderr: error.to_string(),
            duration_ms,
            remediation_hint: Some(def.remediation_hint.clone()),
        }
    }

    /// Whether the stage ran and failed.
    pub fn failed(&self) -> bool {
        self.ran && !self.success
    }
}

/// Ordered record of one pipeline execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineRun {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub change_set: ChangeSet,
    pub policy: FailurePolicy,
    /// One entry per evaluated stage, in registry order.
    pub results: Vec<StageResult>,
    /// Stages never evaluated because the pipeline halted.
    pub not_attempted: Vec<String>,
    /// Set when preflight stopped the run before any stage executed.
    pub preflight_failed: bool,
    pub exit_code: i32,
    pub duration_ms: u64,
}

impl PipelineRun {
    /// Number of stages that ran and passed.
    pub fn passed_count(&self) -> usize {
        self.results.iter().filter(|r| r.ran && r.success).count()
    }

    /// Number of stages that ran.
    pub fn ran_count(&self) -> usize {
        self.results.iter().filter(|r| r.ran).count()
    }

    pub fn failed_count(&self) -> usize {
        self.results.iter().filter(|r| r.failed()).count()
    }

    /// First failing stage in registry order.
    pub fn first_failure(&self) -> Option<&StageResult> {
        self.results
            .iter()
            .find(|r| r.failed() || (self.preflight_failed && !r.success))
    }

    pub fn success(&self) -> bool {
        self.exit_code == exit_codes::SUCCESS
    }
}

/// A stage whose tool is missing, found during preflight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingTool {
    pub stage: String,
    pub program: String,
}

/// Walks the registry and executes stages.
pub struct PipelineRunner {
    registry: StageRegistry,
    runner: Arc<dyn CommandRunner>,
    working_dir: PathBuf,
    policy: FailurePolicy,
    preflight: bool,
    guard: RecursionGuard,
    self_exe: Option<PathBuf>,
}

impl PipelineRunner {
    pub fn new(
        registry: StageRegistry,
        runner: Arc<dyn CommandRunner>,
        working_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            registry,
            runner,
            working_dir: working_dir.into(),
            policy: FailurePolicy::default(),
            preflight: false,
            guard: RecursionGuard::top_level(),
            self_exe: None,
        }
    }

    pub fn with_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Check every applicable stage's tool before running anything.
    pub fn with_preflight(mut self, preflight: bool) -> Self {
        self.preflight = preflight;
        self
    }

    /// Guard handed to stages that re-invoke `self_exe`.
    pub fn with_guard(mut self, guard: RecursionGuard, self_exe: Option<PathBuf>) -> Self {
        self.guard = guard;
        self.self_exe = self_exe;
        self
    }

    /// Applicable stages whose executable cannot be found.
    pub fn missing_tools(&self, change_set: &ChangeSet) -> Vec<MissingTool> {
        self.registry
            .stages()
            .iter()
            .filter(|def| def.applies(change_set))
            .filter(|def| !self.runner.tool_available(def.program(), &self.working_dir))
            .map(|def| MissingTool {
                stage: def.name.clone(),
                program: def.program().to_string(),
            })
            .collect()
    }

    /// Execute the pipeline for `change_set`.
    pub async fn run(&self, change_set: &ChangeSet) -> PipelineRun {
        let start = Instant::now();
        let run_id = Uuid::new_v4().to_string();
        let started_at = Utc::now();

        info!(
            run_id = %run_id,
            change_set = %change_set.describe(),
            policy = ?self.policy,
            "Starting pipeline"
        );

        if self.preflight {
            let missing = self.missing_tools(change_set);
            if !missing.is_empty() {
                warn!(count = missing.len(), "Preflight found missing tools");
                let results = self
                    .registry
                    .stages()
                    .iter()
                    .filter_map(|def| {
                        missing.iter().find(|m| m.stage == def.name).map(|m| {
                            let mut result = StageResult::tool_not_found(def, &m.program);
                            result.ran = false;
                            result.exit_code_if_failed = Some(exit_codes::TOOL_UNAVAILABLE);
                            result
                        })
                    })
                    .collect();

                return PipelineRun {
                    run_id,
                    started_at,
                    change_set: change_set.clone(),
                    policy: self.policy,
                    results,
                    not_attempted: self.registry.names(),
                    preflight_failed: true,
                    exit_code: exit_codes::TOOL_UNAVAILABLE,
                    duration_ms: start.elapsed().as_millis() as u64,
                };
            }
        }

        let mut results = Vec::new();
        let mut not_attempted = Vec::new();
        let mut exit_code = exit_codes::SUCCESS;

        let stages = self.registry.stages();
        for (idx, def) in stages.iter().enumerate() {
            if !def.applies(change_set) {
                debug!(stage = %def.name, reason = %def.skip_reason(), "Skipping stage");
                results.push(StageResult::skipped(def));
                continue;
            }

            let result = self.execute(def).await;
            let failed = result.failed();

            if failed {
                warn!(
                    stage = %def.name,
                    message = %result.message,
                    exit_code = def.exit_code,
                    "Stage failed"
                );
                if exit_code == exit_codes::SUCCESS {
                    exit_code = def.exit_code;
                }
            } else {
                info!(stage = %def.name, duration_ms = result.duration_ms, "Stage passed");
            }

            results.push(result);

            if failed && self.policy == FailurePolicy::FailFast {
                not_attempted = stages[idx + 1..].iter().map(|s| s.name.clone()).collect();
                info!(stage = %def.name, "Fail-fast: halting pipeline");
                break;
            }
        }

        let duration_ms = start.elapsed().as_millis() as u64;
        info!(run_id = %run_id, exit_code, duration_ms, "Pipeline finished");

        PipelineRun {
            run_id,
            started_at,
            change_set: change_set.clone(),
            policy: self.policy,
            results,
            not_attempted,
            preflight_failed: false,
            exit_code,
            duration_ms,
        }
    }

    async fn execute(&self, def: &StageDefinition) -> StageResult {
        let program = def.program();
        if !self.runner.tool_available(program, &self.working_dir) {
            return StageResult::tool_not_found(def, program);
        }

        let mut request =
            CommandRequest::new(def.command.clone(), self.working_dir.clone(), def.timeout);
        if RecursionGuard::is_self_invocation(program, self.self_exe.as_deref()) {
            let (key, value) = self.guard.child_env();
            request = request.with_env(key, value);
        }

        info!(stage = %def.name, command = ?def.command, "Executing stage");
        let start = Instant::now();
        match self.runner.run(&request).await {
            Ok(outcome) => StageResult::from_outcome(def, outcome),
            Err(e) => StageResult::start_error(def, &e, start.elapsed().as_millis() as u64),
        }
    }
}
