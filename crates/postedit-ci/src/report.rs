//! Human and machine readable summaries of a pipeline run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::pipeline::{FailureKind, PipelineRun, StageResult};

/// Maximum captured output lines shown per stage in the text report.
pub const OUTPUT_TAIL_LINES: usize = 40;

/// Status of one stage line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Passed,
    Failed,
    Skipped,
    NotAttempted,
}

/// One line of the report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageLine {
    pub stage: String,
    pub status: StageStatus,
    pub message: String,
    pub duration_ms: u64,
    /// Tail of captured output, present for failures (or everything in
    /// verbose mode).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

/// Remediation hint for a failing stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Remediation {
    pub stage: String,
    pub hint: String,
}

/// Summary of a pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineReport {
    pub run_id: String,
    pub generated_at: DateTime<Utc>,
    pub change_set: String,
    pub stages: Vec<StageLine>,
    /// Stages that ran and passed.
    pub passed: usize,
    /// Stages that ran; skipped stages are excluded.
    pub total: usize,
    pub failed_stage: Option<String>,
    pub preflight_failed: bool,
    pub remediations: Vec<Remediation>,
    pub exit_code: i32,
    pub duration_ms: u64,
}

impl PipelineReport {
    /// Build the report for `run`. Pure: no I/O.
    pub fn generate(run: &PipelineRun, verbose: bool) -> Self {
        let mut stages: Vec<StageLine> = run
            .results
            .iter()
            .map(|r| stage_line(r, verbose))
            .collect();

        if !run.preflight_failed {
            stages.extend(run.not_attempted.iter().map(|name| StageLine {
                stage: name.clone(),
                status: StageStatus::NotAttempted,
                message: "not attempted (fail-fast)".to_string(),
                duration_ms: 0,
                output: None,
            }));
        }

        let remediations = run
            .results
            .iter()
            .filter(|r| !r.success)
            .filter_map(|r| {
                r.remediation_hint.as_ref().map(|hint| Remediation {
                    stage: r.stage_name.clone(),
                    hint: hint.clone(),
                })
            })
            .collect();

        Self {
            run_id: run.run_id.clone(),
            generated_at: Utc::now(),
            change_set: run.change_set.describe(),
            stages,
            passed: run.passed_count(),
            total: run.ran_count(),
            failed_stage: run.first_failure().map(|r| r.stage_name.clone()),
            preflight_failed: run.preflight_failed,
            remediations,
            exit_code: run.exit_code,
            duration_ms: run.duration_ms,
        }
    }

    /// `passed/total passed`, e.g. `0/0 passed`.
    pub fn tally(&self) -> String {
        format!("{}/{} passed", self.passed, self.total)
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Render the plain-text summary.
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!(
            "postedit: {} ({})\n",
            self.tally(),
            self.change_set
        ));

        if self.preflight_failed {
            out.push_str("Preflight failed: required tools are missing, no stage was run\n");
        }

        for line in &self.stages {
            let marker = match line.status {
                StageStatus::Passed => "✓",
                StageStatus::Failed => "✗",
                StageStatus::Skipped => "-",
                StageStatus::NotAttempted => "·",
            };
            match line.status {
                StageStatus::Passed | StageStatus::Failed => out.push_str(&format!(
                    "  {} {} {} ({}ms)\n",
                    marker, line.stage, line.message, line.duration_ms
                )),
                _ => out.push_str(&format!("  {} {} {}\n", marker, line.stage, line.message)),
            }
            if let Some(output) = &line.output {
                for l in output.lines() {
                    out.push_str(&format!("      | {l}\n"));
                }
            }
        }

        match &self.failed_stage {
            Some(stage) => out.push_str(&format!(
                "Failed: {} (exit code {})\n",
                stage, self.exit_code
            )),
            None => out.push_str("All applicable stages passed\n"),
        }

        if !self.remediations.is_empty() {
            out.push_str("Remediation:\n");
            for r in &self.remediations {
                out.push_str(&format!("  - {}: {}\n", r.stage, r.hint));
            }
        }

        out
    }
}

fn stage_line(result: &StageResult, verbose: bool) -> StageLine {
    let status = if !result.ran && result.success {
        StageStatus::Skipped
    } else if result.success {
        StageStatus::Passed
    } else {
        StageStatus::Failed
    };

    let show_output = match status {
        StageStatus::Failed => result.failure != Some(FailureKind::ToolNotFound),
        StageStatus::Passed => verbose,
        _ => false,
    };

    StageLine {
        stage: result.stage_name.clone(),
        status,
        message: result.message.clone(),
        duration_ms: result.duration_ms,
        output: if show_output {
            tail_output(&result.stdout, &result.stderr, OUTPUT_TAIL_LINES)
        } else {
            None
        },
    }
}

/// Last `max_lines` lines of stdout followed by stderr, `None` if empty.
pub fn tail_output(stdout: &str, stderr: &str, max_lines: usize) -> Option<String> {
    let lines: Vec<&str> = stdout
        .lines()
        .chain(stderr.lines())
        .filter(|l| !l.trim().is_empty())
        .collect();
    if lines.is_empty() {
        return None;
    }

    let skip = lines.len().saturating_sub(max_lines);
    let mut tail = String::new();
    if skip > 0 {
        tail.push_str(&format!("... ({skip} earlier lines omitted)\n"));
    }
    tail.push_str(&lines[skip..].join("\n"));
    Some(tail)
}
