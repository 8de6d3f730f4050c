//! postedit CI - staged post-change enforcement
//!
//! Provides the pipeline that runs after an editing action:
//! - Ordered stage registry (format, typecheck, build, test)
//! - Change-set driven applicability
//! - Fail-fast or continue-on-error execution with stable exit codes
//! - Text and JSON reports with remediation hints

pub mod exit_codes;
pub mod hook;
pub mod pipeline;
pub mod report;
pub mod runner;
pub mod stage;

// Re-export key types
pub use hook::{run_hook, HookContext, HookOutcome};
pub use pipeline::{FailureKind, FailurePolicy, PipelineRun, PipelineRunner, StageResult};
pub use report::{PipelineReport, StageLine, StageStatus};
pub use runner::{CommandOutcome, CommandRequest, CommandRunner, ProcessRunner};
pub use stage::{Applicability, BuildSurface, StageDefinition, StageRegistry};
