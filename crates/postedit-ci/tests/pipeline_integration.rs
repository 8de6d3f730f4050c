//! Integration tests for the pipeline with a scripted command runner.

mod common;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use common::*;
use postedit_ci::exit_codes;
use postedit_ci::{
    FailureKind, FailurePolicy, PipelineReport, PipelineRunner, ProcessRunner, StageDefinition,
    StageRegistry, StageStatus,
};
use postedit_core::{ChangeSet, PipelineConfig, RecursionGuard, StageKind, GUARD_VAR};

fn pipeline(runner: Arc<ScriptedRunner>, config: &PipelineConfig) -> PipelineRunner {
    PipelineRunner::new(fake_registry(config), runner, std::env::temp_dir())
        .with_policy(FailurePolicy::from_fail_fast(config.fail_fast))
        .with_preflight(config.preflight)
}

/// Test: fail-fast halts after the first failing stage
#[tokio::test]
async fn test_fail_fast_stops_at_format() {
    let runner = Arc::new(ScriptedRunner::new().failing(FORMAT_TOOL, 1));
    let config = fake_config();

    let run = pipeline(runner.clone(), &config).run(&ChangeSet::All).await;

    assert_eq!(run.exit_code, exit_codes::FORMAT_FAILED);
    assert_eq!(runner.executed(), vec![FORMAT_TOOL]);
    assert_eq!(run.results.len(), 1);
    assert_eq!(run.not_attempted, vec!["typecheck", "build", "test"]);

    let report = PipelineReport::generate(&run, false);
    assert_eq!(report.failed_stage.as_deref(), Some("format"));
    assert_eq!(report.tally(), "0/1 passed");
}

/// Test: continue-on-error runs everything and reports the first failure
#[tokio::test]
async fn test_continue_on_error_reports_first_failure() {
    let runner = Arc::new(
        ScriptedRunner::new()
            .failing(FORMAT_TOOL, 1)
            .failing(BUILD_TOOL, 2),
    );
    let config = PipelineConfig {
        fail_fast: false,
        ..fake_config()
    };

    let run = pipeline(runner.clone(), &config).run(&ChangeSet::All).await;

    assert_eq!(
        runner.executed(),
        vec![FORMAT_TOOL, TYPECHECK_TOOL, BUILD_TOOL, TEST_TOOL]
    );
    assert_eq!(run.exit_code, exit_codes::FORMAT_FAILED);
    assert_eq!(run.failed_count(), 2);
    assert!(run.not_attempted.is_empty());

    let report = PipelineReport::generate(&run, false);
    assert_eq!(report.tally(), "2/4 passed");
    let hinted: Vec<&str> = report.remediations.iter().map(|r| r.stage.as_str()).collect();
    assert_eq!(hinted, vec!["format", "build"]);
}

/// Test: continue-on-error with a single later failure
#[tokio::test]
async fn test_continue_on_error_single_typecheck_failure() {
    let runner = Arc::new(ScriptedRunner::new().failing(TYPECHECK_TOOL, 1));
    let config = PipelineConfig {
        fail_fast: false,
        ..fake_config()
    };

    let run = pipeline(runner.clone(), &config).run(&ChangeSet::All).await;
    assert_eq!(run.exit_code, exit_codes::TYPECHECK_FAILED);
    assert_eq!(runner.executed().len(), 4);
}

/// Test: documentation-only change skips everything
#[tokio::test]
async fn test_readme_only_change_skips_all_stages() {
    let runner = Arc::new(ScriptedRunner::new());
    let config = fake_config();

    let run = pipeline(runner.clone(), &config)
        .run(&ChangeSet::files(["README.md"]))
        .await;

    assert_eq!(run.exit_code, exit_codes::SUCCESS);
    assert!(runner.executed().is_empty());
    assert_eq!(run.results.len(), 4);
    assert!(run.results.iter().all(|r| !r.ran));

    let report = PipelineReport::generate(&run, false);
    assert_eq!(report.tally(), "0/0 passed");
    assert!(report.render_text().contains("0/0 passed"));
}

/// Test: a change under a build-surface prefix triggers the build stage
#[tokio::test]
async fn test_build_surface_prefix_failure_exits_three() {
    let runner = Arc::new(ScriptedRunner::new().failing(BUILD_TOOL, 1));
    let config = PipelineConfig {
        extra_build_paths: vec!["backend/core".to_string()],
        ..fake_config()
    };

    let run = pipeline(runner.clone(), &config)
        .run(&ChangeSet::files(["backend/core/engine.cpp"]))
        .await;

    assert_eq!(run.exit_code, exit_codes::BUILD_FAILED);
    assert_eq!(
        runner.executed(),
        vec![FORMAT_TOOL, TYPECHECK_TOOL, BUILD_TOOL]
    );

    let report = PipelineReport::generate(&run, false);
    assert_eq!(report.failed_stage.as_deref(), Some("build"));
    let text = report.render_text();
    assert!(text.contains("Failed: build (exit code 3)"));
    assert!(text.contains(&StageDefinition::builtin(StageKind::Build).remediation_hint));
}

/// Test: source change outside the build surface skips build only
#[tokio::test]
async fn test_source_change_skips_build() {
    let runner = Arc::new(ScriptedRunner::new());
    let config = fake_config();

    let run = pipeline(runner.clone(), &config)
        .run(&ChangeSet::files(["src/app.py"]))
        .await;

    assert_eq!(run.exit_code, 0);
    assert_eq!(runner.executed(), vec![FORMAT_TOOL, TYPECHECK_TOOL, TEST_TOOL]);
    let report = PipelineReport::generate(&run, false);
    assert_eq!(report.tally(), "3/3 passed");
    assert_eq!(report.stages[2].status, StageStatus::Skipped);
}

/// Test: skip flags suppress stages even for the ALL change set
#[tokio::test]
async fn test_skip_flags_respected() {
    let runner = Arc::new(ScriptedRunner::new());
    let config = PipelineConfig {
        skip_build: true,
        skip_tests: true,
        ..fake_config()
    };

    let run = pipeline(runner.clone(), &config).run(&ChangeSet::All).await;
    assert_eq!(runner.executed(), vec![FORMAT_TOOL, TYPECHECK_TOOL]);
    assert!(run.results[2].message.contains("POSTEDIT_SKIP_BUILD"));
}

/// Test: missing tool is a stage failure under fail-fast
#[tokio::test]
async fn test_missing_tool_fails_stage() {
    let runner = Arc::new(ScriptedRunner::new().missing(TYPECHECK_TOOL));
    let config = fake_config();

    let run = pipeline(runner.clone(), &config).run(&ChangeSet::All).await;

    assert_eq!(run.exit_code, exit_codes::TYPECHECK_FAILED);
    assert_eq!(runner.executed(), vec![FORMAT_TOOL]);
    let failed = run.first_failure().unwrap();
    assert_eq!(failed.failure, Some(FailureKind::ToolNotFound));
    assert!(failed.message.contains("tool not found"));
    assert!(failed
        .remediation_hint
        .as_deref()
        .unwrap()
        .contains("POSTEDIT_TYPECHECK_CMD"));
}

/// Test: timeout is reported as a failure of the stage
#[tokio::test]
async fn test_timeout_is_stage_failure() {
    let runner = Arc::new(ScriptedRunner::new().timing_out(TEST_TOOL));
    let config = fake_config();

    let run = pipeline(runner.clone(), &config).run(&ChangeSet::All).await;

    assert_eq!(run.exit_code, exit_codes::TEST_FAILED);
    let failed = run.first_failure().unwrap();
    assert_eq!(failed.failure, Some(FailureKind::StageTimeout));
    assert!(failed.stderr.contains("[timeout]"));
}

/// Test: preflight stops before any stage when a tool is missing
#[tokio::test]
async fn test_preflight_missing_tool_exits_seven() {
    let runner = Arc::new(ScriptedRunner::new().missing(TEST_TOOL));
    let config = PipelineConfig {
        preflight: true,
        ..fake_config()
    };

    let run = pipeline(runner.clone(), &config).run(&ChangeSet::All).await;

    assert_eq!(run.exit_code, exit_codes::TOOL_UNAVAILABLE);
    assert!(run.preflight_failed);
    assert!(runner.executed().is_empty());

    let report = PipelineReport::generate(&run, false);
    assert_eq!(report.failed_stage.as_deref(), Some("test"));
    assert!(report.render_text().contains("Preflight failed"));
}

/// Test: preflight passes when every applicable tool exists
#[tokio::test]
async fn test_preflight_ignores_inapplicable_stages() {
    let runner = Arc::new(ScriptedRunner::new().missing(BUILD_TOOL));
    let config = PipelineConfig {
        preflight: true,
        ..fake_config()
    };

    let run = pipeline(runner.clone(), &config)
        .run(&ChangeSet::files(["src/app.py"]))
        .await;
    assert_eq!(run.exit_code, 0);
    assert_eq!(runner.executed().len(), 3);
}

/// Test: stage that re-invokes postedit receives the guard variable
#[tokio::test]
async fn test_guard_propagated_to_self_invocation_only() {
    let runner = Arc::new(ScriptedRunner::new());
    let mut config = fake_config();
    config
        .stages
        .get_mut(&StageKind::Test)
        .unwrap()
        .command_override = Some(vec!["postedit".to_string(), "run".to_string()]);

    let run = PipelineRunner::new(fake_registry(&config), runner.clone(), std::env::temp_dir())
        .with_guard(
            RecursionGuard::top_level(),
            Some(PathBuf::from("/usr/local/bin/postedit")),
        )
        .run(&ChangeSet::All)
        .await;
    assert_eq!(run.exit_code, 0);

    for request in runner.requests() {
        let has_guard = request.env.iter().any(|(k, _)| k == GUARD_VAR);
        assert_eq!(has_guard, request.argv[0] == "postedit", "{:?}", request.argv);
    }
}

/// Test: real processes through the tokio runner
#[tokio::test]
async fn test_process_runner_pipeline() {
    let registry = StageRegistry::from_definitions(vec![
        StageDefinition::builtin(StageKind::Format)
            .with_command(vec!["echo".to_string(), "formatted".to_string()])
            .with_timeout(Duration::from_secs(30)),
        StageDefinition::builtin(StageKind::Typecheck)
            .with_command(vec!["false".to_string()])
            .with_timeout(Duration::from_secs(30)),
        StageDefinition::builtin(StageKind::Test)
            .with_command(vec!["echo".to_string(), "tested".to_string()])
            .with_timeout(Duration::from_secs(30)),
    ]);

    let run = PipelineRunner::new(registry, Arc::new(ProcessRunner::new()), std::env::temp_dir())
        .with_policy(FailurePolicy::ContinueOnError)
        .run(&ChangeSet::All)
        .await;

    assert_eq!(run.exit_code, exit_codes::TYPECHECK_FAILED);
    assert_eq!(run.ran_count(), 3);
    assert!(run.results[0].stdout.contains("formatted"));
    assert!(run.results[2].success);
}
