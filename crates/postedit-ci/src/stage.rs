//! Stage definitions and the ordered stage registry.

use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;

use postedit_core::{ChangeSet, PipelineConfig, StageKind};
use serde::Serialize;

use crate::exit_codes;

/// File extensions treated as source code.
pub const SOURCE_EXTENSIONS: &[&str] = &[
    "py", "pyi", "rs", "go", "ts", "tsx", "js", "jsx", "mjs", "cjs", "c", "h", "cc", "cpp",
    "cxx", "hpp", "hh", "java", "kt", "kts", "swift", "rb", "cs", "scala", "php", "lua", "sh",
];

/// File names whose modification implies a rebuild.
pub const BUILD_SURFACE_FILES: &[&str] = &[
    "Dockerfile",
    "Containerfile",
    "docker-compose.yml",
    "docker-compose.yaml",
    "compose.yml",
    "compose.yaml",
    ".dockerignore",
    "Makefile",
    "CMakeLists.txt",
    "pyproject.toml",
    "setup.py",
    "setup.cfg",
    "requirements.txt",
    "package.json",
    "package-lock.json",
    "Cargo.toml",
    "Cargo.lock",
    "go.mod",
    "go.sum",
];

/// Directory prefixes whose contents imply a rebuild.
pub const BUILD_SURFACE_PREFIXES: &[&str] = &["docker", "deploy", ".devcontainer"];

/// Whether `path` has a recognised source extension.
pub fn has_source_extension(path: &str) -> bool {
    Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| SOURCE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// The build surface: fixed file names plus directory prefixes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildSurface {
    files: BTreeSet<String>,
    prefixes: Vec<String>,
}

impl Default for BuildSurface {
    fn default() -> Self {
        Self {
            files: BUILD_SURFACE_FILES.iter().map(|f| f.to_string()).collect(),
            prefixes: BUILD_SURFACE_PREFIXES.iter().map(|p| p.to_string()).collect(),
        }
    }
}

impl BuildSurface {
    /// Add directory prefixes (e.g. `backend/core`).
    pub fn with_prefixes<I, S>(mut self, prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for p in prefixes {
            let p = p.into();
            let p = p.trim_end_matches('/');
            if !p.is_empty() && !self.prefixes.iter().any(|existing| existing == p) {
                self.prefixes.push(p.to_string());
            }
        }
        self
    }

    /// Whether a repository-relative path is on the build surface.
    ///
    /// Prefixes match whole path components: `backend/core` covers
    /// `backend/core/engine.cpp` but not `backend/core2/x`.
    pub fn matches(&self, path: &str) -> bool {
        let p = Path::new(path);
        let name_hit = p
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| self.files.contains(n) || n.starts_with("Dockerfile."))
            .unwrap_or(false);
        name_hit || self.prefixes.iter().any(|prefix| p.starts_with(prefix))
    }
}

/// Rule deciding whether a stage applies to a change set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applicability {
    /// Any changed file has a source extension.
    SourceFiles,
    /// Any changed file is on the build surface.
    BuildSurface(BuildSurface),
}

impl Applicability {
    /// Evaluate against a change set. `All` satisfies every rule.
    pub fn evaluate(&self, change_set: &ChangeSet) -> bool {
        match self {
            Applicability::SourceFiles => change_set.any_path(has_source_extension),
            Applicability::BuildSurface(surface) => change_set.any_path(|p| surface.matches(p)),
        }
    }

    fn describe(&self) -> &'static str {
        match self {
            Applicability::SourceFiles => "no source files changed",
            Applicability::BuildSurface(_) => "no build-surface files changed",
        }
    }
}

/// Immutable definition of one quality gate.
#[derive(Debug, Clone)]
pub struct StageDefinition {
    pub kind: StageKind,
    pub name: String,
    pub description: String,
    pub default_command: Vec<String>,
    /// Effective command after applying the override, if any.
    pub command: Vec<String>,
    pub override_key: String,
    pub applicability: Applicability,
    pub exit_code: i32,
    pub remediation_hint: String,
    pub install_hint: String,
    pub timeout: Duration,
    /// Reason the stage is switched off globally, e.g. a skip flag.
    pub suppressed_by: Option<String>,
}

impl StageDefinition {
    /// Built-in definition for `kind` with default command and timeout.
    pub fn builtin(kind: StageKind) -> Self {
        let (description, command, applicability, exit_code, remediation, install): (
            &str,
            &[&str],
            Applicability,
            i32,
            &str,
            &str,
        ) = match kind {
            StageKind::Format => (
                "Check formatting of changed sources",
                &["ruff", "format", "--check", "."],
                Applicability::SourceFiles,
                exit_codes::FORMAT_FAILED,
                "Run the formatter (`ruff format .`) and review the resulting diff.",
                "Install ruff (`pip install ruff`) or set POSTEDIT_FORMAT_CMD.",
            ),
            StageKind::Typecheck => (
                "Static type check",
                &["mypy", "."],
                Applicability::SourceFiles,
                exit_codes::TYPECHECK_FAILED,
                "Fix the reported type errors; reproduce locally with `mypy .`.",
                "Install mypy (`pip install mypy`) or set POSTEDIT_TYPECHECK_CMD.",
            ),
            StageKind::Build => (
                "Container build",
                &["docker", "compose", "build"],
                Applicability::BuildSurface(BuildSurface::default()),
                exit_codes::BUILD_FAILED,
                "Inspect the build log and rerun `docker compose build`; set POSTEDIT_SKIP_BUILD=1 to bypass temporarily.",
                "Install Docker with the compose plugin or set POSTEDIT_BUILD_CMD.",
            ),
            StageKind::Test => (
                "Test suite",
                &["pytest", "-q"],
                Applicability::SourceFiles,
                exit_codes::TEST_FAILED,
                "Reproduce with `pytest -q` and fix the failing tests; set POSTEDIT_SKIP_TESTS=1 to bypass temporarily.",
                "Install pytest (`pip install pytest`) or set POSTEDIT_TEST_CMD.",
            ),
        };

        let command: Vec<String> = command.iter().map(|s| s.to_string()).collect();
        Self {
            kind,
            name: kind.name().to_string(),
            description: description.to_string(),
            default_command: command.clone(),
            command,
            override_key: kind.override_key(),
            applicability,
            exit_code,
            remediation_hint: remediation.to_string(),
            install_hint: install.to_string(),
            timeout: kind.default_timeout(),
            suppressed_by: None,
        }
    }

    /// Replace the effective command.
    pub fn with_command(mut self, command: Vec<String>) -> Self {
        self.command = command;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_applicability(mut self, applicability: Applicability) -> Self {
        self.applicability = applicability;
        self
    }

    /// Switch the stage off for every change set.
    pub fn suppressed(mut self, reason: impl Into<String>) -> Self {
        self.suppressed_by = Some(reason.into());
        self
    }

    /// Program the stage executes.
    pub fn program(&self) -> &str {
        self.command.first().map(String::as_str).unwrap_or("")
    }

    /// Whether the stage should run for `change_set`.
    pub fn applies(&self, change_set: &ChangeSet) -> bool {
        self.suppressed_by.is_none() && self.applicability.evaluate(change_set)
    }

    /// Why the stage does not apply, for the report.
    pub fn skip_reason(&self) -> String {
        match &self.suppressed_by {
            Some(reason) => reason.clone(),
            None => self.applicability.describe().to_string(),
        }
    }
}

/// Fixed, ordered table of stages.
#[derive(Debug, Clone)]
pub struct StageRegistry {
    stages: Vec<StageDefinition>,
}

impl Default for StageRegistry {
    fn default() -> Self {
        Self::from_config(&PipelineConfig::default())
    }
}

impl StageRegistry {
    /// Build the registry from validated configuration.
    pub fn from_config(config: &PipelineConfig) -> Self {
        let stages = StageKind::ALL
            .iter()
            .map(|kind| {
                let settings = config.stage(*kind);
                let mut def = StageDefinition::builtin(*kind).with_timeout(settings.timeout);

                if let Some(command) = settings.command_override {
                    def = def.with_command(command);
                }

                if *kind == StageKind::Build {
                    let surface =
                        BuildSurface::default().with_prefixes(config.extra_build_paths.clone());
                    def = def.with_applicability(Applicability::BuildSurface(surface));
                    if config.skip_build {
                        def = def.suppressed("disabled by POSTEDIT_SKIP_BUILD");
                    }
                }

                if *kind == StageKind::Test && config.skip_tests {
                    def = def.suppressed("disabled by POSTEDIT_SKIP_TESTS");
                }

                def
            })
            .collect();

        Self { stages }
    }

    /// A registry with explicit definitions, kept in the given order.
    pub fn from_definitions(stages: Vec<StageDefinition>) -> Self {
        Self { stages }
    }

    pub fn stages(&self) -> &[StageDefinition] {
        &self.stages
    }

    pub fn get(&self, kind: StageKind) -> Option<&StageDefinition> {
        self.stages.iter().find(|s| s.kind == kind)
    }

    /// Stage names in execution order.
    pub fn names(&self) -> Vec<String> {
        self.stages.iter().map(|s| s.name.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn md_only() -> ChangeSet {
        ChangeSet::files(["README.md", "docs/guide.md"])
    }

    #[test]
    fn test_registry_order_and_exit_codes() {
        let registry = StageRegistry::default();
        assert_eq!(registry.names(), vec!["format", "typecheck", "build", "test"]);
        let codes: Vec<i32> = registry.stages().iter().map(|s| s.exit_code).collect();
        assert_eq!(codes, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_all_change_set_applies_everywhere() {
        let registry = StageRegistry::default();
        for stage in registry.stages() {
            assert!(stage.applies(&ChangeSet::All), "{} should apply", stage.name);
        }
    }

    #[test]
    fn test_markdown_only_skips_everything() {
        let registry = StageRegistry::default();
        for stage in registry.stages() {
            assert!(!stage.applies(&md_only()), "{} should be skipped", stage.name);
        }
    }

    #[test]
    fn test_markdown_on_build_surface_triggers_build_only() {
        let registry = StageRegistry::from_config(&PipelineConfig {
            extra_build_paths: vec!["docs".to_string()],
            ..PipelineConfig::default()
        });
        let cs = md_only();
        assert!(registry.get(StageKind::Build).unwrap().applies(&cs));
        assert!(!registry.get(StageKind::Format).unwrap().applies(&cs));
        assert!(!registry.get(StageKind::Typecheck).unwrap().applies(&cs));
        assert!(!registry.get(StageKind::Test).unwrap().applies(&cs));
    }

    #[test]
    fn test_source_extension_detection() {
        assert!(has_source_extension("src/app.py"));
        assert!(has_source_extension("engine.CPP"));
        assert!(!has_source_extension("README.md"));
        assert!(!has_source_extension("Makefile"));
    }

    #[test]
    fn test_build_surface_files_and_prefixes() {
        let surface = BuildSurface::default().with_prefixes(["backend/core/"]);
        assert!(surface.matches("Dockerfile"));
        assert!(surface.matches("services/api/Dockerfile.dev"));
        assert!(surface.matches("pyproject.toml"));
        assert!(surface.matches("backend/core/engine.cpp"));
        assert!(surface.matches("docker/entrypoint.sh"));
        assert!(!surface.matches("backend/core2/engine.cpp"));
        assert!(!surface.matches("src/app.py"));
    }

    #[test]
    fn test_skip_flags_suppress_stages() {
        let registry = StageRegistry::from_config(&PipelineConfig {
            skip_build: true,
            skip_tests: true,
            ..PipelineConfig::default()
        });
        let build = registry.get(StageKind::Build).unwrap();
        let test = registry.get(StageKind::Test).unwrap();
        assert!(!build.applies(&ChangeSet::All));
        assert!(!test.applies(&ChangeSet::All));
        assert!(build.skip_reason().contains("POSTEDIT_SKIP_BUILD"));
        assert!(registry.get(StageKind::Format).unwrap().applies(&ChangeSet::All));
    }

    #[test]
    fn test_command_override_applied() {
        let mut config = PipelineConfig::default();
        config
            .stages
            .get_mut(&StageKind::Test)
            .unwrap()
            .command_override = Some(vec!["cargo".to_string(), "test".to_string()]);
        let registry = StageRegistry::from_config(&config);
        let test = registry.get(StageKind::Test).unwrap();
        assert_eq!(test.command, vec!["cargo", "test"]);
        assert_eq!(test.default_command, vec!["pytest", "-q"]);
        assert_eq!(test.program(), "cargo");
        assert_eq!(test.override_key, "POSTEDIT_TEST_CMD");
    }
}
