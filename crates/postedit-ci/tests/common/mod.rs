//! Scripted command runner shared by the integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use postedit_ci::{CommandOutcome, CommandRequest, CommandRunner, StageRegistry};
use postedit_core::{PipelineConfig, StageKind};

/// Programs used in place of the real tools.
pub const FORMAT_TOOL: &str = "fake-format";
pub const TYPECHECK_TOOL: &str = "fake-typecheck";
pub const BUILD_TOOL: &str = "fake-build";
pub const TEST_TOOL: &str = "fake-test";

/// Runner that returns scripted exit codes per program and records calls.
#[derive(Default)]
pub struct ScriptedRunner {
    exit_codes: HashMap<String, i32>,
    missing: HashSet<String>,
    timeouts: HashSet<String>,
    calls: Mutex<Vec<CommandRequest>>,
    lookups: AtomicUsize,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(mut self, program: &str, code: i32) -> Self {
        self.exit_codes.insert(program.to_string(), code);
        self
    }

    pub fn missing(mut self, program: &str) -> Self {
        self.missing.insert(program.to_string());
        self
    }

    pub fn timing_out(mut self, program: &str) -> Self {
        self.timeouts.insert(program.to_string());
        self
    }

    /// Programs executed, in order.
    pub fn executed(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.argv[0].clone())
            .collect()
    }

    pub fn requests(&self) -> Vec<CommandRequest> {
        self.calls.lock().unwrap().clone()
    }

    /// Total interactions: availability lookups plus executions.
    pub fn interactions(&self) -> usize {
        self.lookups.load(Ordering::SeqCst) + self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    fn tool_available(&self, program: &str, _working_dir: &Path) -> bool {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        !self.missing.contains(program)
    }

    async fn run(&self, request: &CommandRequest) -> anyhow::Result<CommandOutcome> {
        self.calls.lock().unwrap().push(request.clone());
        let program = request.argv[0].as_str();

        if self.missing.contains(program) {
            return Ok(CommandOutcome::ToolNotFound {
                program: program.to_string(),
            });
        }
        if self.timeouts.contains(program) {
            return Ok(CommandOutcome::TimedOut {
                stdout: String::new(),
                stderr: "[timeout] command exceeded 1s and was terminated".to_string(),
                duration_ms: 1000,
                timeout: Duration::from_secs(1),
            });
        }

        let exit_code = self.exit_codes.get(program).copied().unwrap_or(0);
        Ok(CommandOutcome::Exited {
            exit_code,
            stdout: format!("{program} ran\n"),
            stderr: if exit_code == 0 {
                String::new()
            } else {
                format!("{program}: failure\n")
            },
            duration_ms: 3,
        })
    }
}

/// Configuration whose stage commands are the fake programs.
pub fn fake_config() -> PipelineConfig {
    let mut config = PipelineConfig::default();
    for (kind, program) in [
        (StageKind::Format, FORMAT_TOOL),
        (StageKind::Typecheck, TYPECHECK_TOOL),
        (StageKind::Build, BUILD_TOOL),
        (StageKind::Test, TEST_TOOL),
    ] {
        if let Some(settings) = config.stages.get_mut(&kind) {
            settings.command_override = Some(vec![program.to_string()]);
        }
    }
    config
}

pub fn fake_registry(config: &PipelineConfig) -> StageRegistry {
    StageRegistry::from_config(config)
}
