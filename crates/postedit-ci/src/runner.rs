//! External command execution.
//!
//! One attempt per call, no retries. A missing executable is reported as
//! its own outcome without spawning anything.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::exit_codes::{NOT_FOUND_COMMAND_CODE, TIMEOUT_COMMAND_CODE};

/// How long to keep draining pipes after a timed-out child was killed.
const DRAIN_GRACE: Duration = Duration::from_millis(500);

/// A single command invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRequest {
    /// Program followed by its arguments; never re-parsed by a shell.
    pub argv: Vec<String>,
    pub working_dir: PathBuf,
    pub timeout: Duration,
    /// Extra environment entries for the child.
    pub env: Vec<(String, String)>,
}

impl CommandRequest {
    pub fn new(argv: Vec<String>, working_dir: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            argv,
            working_dir: working_dir.into(),
            timeout,
            env: Vec::new(),
        }
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn program(&self) -> &str {
        self.argv.first().map(String::as_str).unwrap_or("")
    }
}

/// Result of a command invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    /// The process ran to completion.
    Exited {
        exit_code: i32,
        stdout: String,
        stderr: String,
        duration_ms: u64,
    },
    /// The process was killed after exceeding its timeout.
    TimedOut {
        stdout: String,
        stderr: String,
        duration_ms: u64,
        timeout: Duration,
    },
    /// The executable could not be found; nothing was spawned.
    ToolNotFound { program: String },
}

impl CommandOutcome {
    /// Whether the command exited with status 0.
    pub fn succeeded(&self) -> bool {
        matches!(self, CommandOutcome::Exited { exit_code: 0, .. })
    }

    /// Exit code, with synthetic codes for timeouts and missing tools.
    pub fn exit_code(&self) -> i32 {
        match self {
            CommandOutcome::Exited { exit_code, .. } => *exit_code,
            CommandOutcome::TimedOut { .. } => TIMEOUT_COMMAND_CODE,
            CommandOutcome::ToolNotFound { .. } => NOT_FOUND_COMMAND_CODE,
        }
    }

    pub fn stdout(&self) -> &str {
        match self {
            CommandOutcome::Exited { stdout, .. } | CommandOutcome::TimedOut { stdout, .. } => {
                stdout
            }
            CommandOutcome::ToolNotFound { .. } => "",
        }
    }

    pub fn stderr(&self) -> &str {
        match self {
            CommandOutcome::Exited { stderr, .. } | CommandOutcome::TimedOut { stderr, .. } => {
                stderr
            }
            CommandOutcome::ToolNotFound { .. } => "",
        }
    }

    pub fn duration_ms(&self) -> u64 {
        match self {
            CommandOutcome::Exited { duration_ms, .. }
            | CommandOutcome::TimedOut { duration_ms, .. } => *duration_ms,
            CommandOutcome::ToolNotFound { .. } => 0,
        }
    }
}

/// Executes external commands on behalf of the pipeline.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Lightweight lookup: is `program` runnable from `working_dir`?
    fn tool_available(&self, program: &str, working_dir: &Path) -> bool;

    /// Run `request` once. `Err` means the command could not be started
    /// for a reason other than a missing executable.
    async fn run(&self, request: &CommandRequest) -> anyhow::Result<CommandOutcome>;
}

/// Runs commands as tokio child processes.
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner;

impl ProcessRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    fn tool_available(&self, program: &str, working_dir: &Path) -> bool {
        find_executable(program, working_dir, std::env::var_os("PATH").as_deref()).is_some()
    }

    async fn run(&self, request: &CommandRequest) -> anyhow::Result<CommandOutcome> {
        if request.argv.is_empty() {
            anyhow::bail!("command argv must not be empty");
        }

        let program = request.program();
        if !self.tool_available(program, &request.working_dir) {
            debug!(program, "Executable not found, not spawning");
            return Ok(CommandOutcome::ToolNotFound {
                program: program.to_string(),
            });
        }

        let start = Instant::now();
        let mut child = Command::new(program)
            .args(&request.argv[1..])
            .current_dir(&request.working_dir)
            .envs(request.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| anyhow::anyhow!("failed to spawn {}: {}", program, e))?;

        // Drain both pipes concurrently so a chatty child cannot block on a
        // full pipe buffer.
        let stdout_task = child.stdout.take().map(|mut out| {
            tokio::spawn(async move {
                let mut buf = Vec::new();
                let _ = out.read_to_end(&mut buf).await;
                buf
            })
        });
        let stderr_task = child.stderr.take().map(|mut err| {
            tokio::spawn(async move {
                let mut buf = Vec::new();
                let _ = err.read_to_end(&mut buf).await;
                buf
            })
        });

        let waited = tokio::time::timeout(request.timeout, child.wait()).await;

        let outcome = match waited {
            Ok(status) => {
                let status = status?;
                let stdout = collect(stdout_task, None).await;
                let stderr = collect(stderr_task, None).await;
                CommandOutcome::Exited {
                    exit_code: status.code().unwrap_or(-1),
                    stdout,
                    stderr,
                    duration_ms: start.elapsed().as_millis() as u64,
                }
            }
            Err(_) => {
                warn!(
                    program,
                    timeout_secs = request.timeout.as_secs(),
                    "Command timed out, killing"
                );
                if let Err(e) = child.kill().await {
                    warn!(program, error = %e, "Failed to kill timed-out command");
                }
                let stdout = collect(stdout_task, Some(DRAIN_GRACE)).await;
                let mut stderr = collect(stderr_task, Some(DRAIN_GRACE)).await;
                if !stderr.is_empty() && !stderr.ends_with('\n') {
                    stderr.push('\n');
                }
                stderr.push_str(&format!(
                    "[timeout] command exceeded {}s and was terminated",
                    request.timeout.as_secs()
                ));
                CommandOutcome::TimedOut {
                    stdout,
                    stderr,
                    duration_ms: start.elapsed().as_millis() as u64,
                    timeout: request.timeout,
                }
            }
        };

        Ok(outcome)
    }
}

async fn collect(
    task: Option<tokio::task::JoinHandle<Vec<u8>>>,
    grace: Option<Duration>,
) -> String {
    let Some(task) = task else {
        return String::new();
    };

    let bytes = match grace {
        None => task.await.unwrap_or_default(),
        Some(grace) => {
            let abort = task.abort_handle();
            match tokio::time::timeout(grace, task).await {
                Ok(joined) => joined.unwrap_or_default(),
                Err(_) => {
                    // A grandchild still holds the pipe open.
                    abort.abort();
                    Vec::new()
                }
            }
        }
    };
    String::from_utf8_lossy(&bytes).into_owned()
}

/// Locate `program` the way a shell would, without running it.
///
/// Names containing a path separator are resolved against `working_dir`;
/// bare names are searched on `path_var`.
pub fn find_executable(
    program: &str,
    working_dir: &Path,
    path_var: Option<&std::ffi::OsStr>,
) -> Option<PathBuf> {
    if program.is_empty() {
        return None;
    }

    if program.contains(std::path::MAIN_SEPARATOR) || program.contains('/') {
        let candidate = working_dir.join(program);
        return is_executable(&candidate).then_some(candidate);
    }

    let path_var = path_var?;
    std::env::split_paths(path_var)
        .map(|dir| dir.join(program))
        .find(|candidate| is_executable(candidate))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file() || path.with_extension("exe").is_file()
}
