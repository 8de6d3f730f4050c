//! Validated pipeline configuration.
//!
//! Built once at startup from the process environment (or any key/value
//! iterator in tests) and passed by reference afterwards. Nothing else in
//! the workspace reads `POSTEDIT_*` variables for pipeline behaviour.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{PosteditError, Result};

/// Prefix shared by every configuration variable.
pub const ENV_PREFIX: &str = "POSTEDIT";

/// Default debounce window.
pub const DEFAULT_COOLDOWN_SECS: f64 = 5.0;

/// The four quality gates, in execution order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    Format,
    Typecheck,
    Build,
    Test,
}

impl StageKind {
    /// All stages in registry order.
    pub const ALL: [StageKind; 4] = [
        StageKind::Format,
        StageKind::Typecheck,
        StageKind::Build,
        StageKind::Test,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            StageKind::Format => "format",
            StageKind::Typecheck => "typecheck",
            StageKind::Build => "build",
            StageKind::Test => "test",
        }
    }

    /// Upper-case segment used in `POSTEDIT_<STAGE>_*` keys.
    pub fn env_segment(&self) -> &'static str {
        match self {
            StageKind::Format => "FORMAT",
            StageKind::Typecheck => "TYPECHECK",
            StageKind::Build => "BUILD",
            StageKind::Test => "TEST",
        }
    }

    /// Key of the per-stage command override.
    pub fn override_key(&self) -> String {
        format!("{}_{}_CMD", ENV_PREFIX, self.env_segment())
    }

    /// Key of the per-stage timeout override.
    pub fn timeout_key(&self) -> String {
        format!("{}_{}_TIMEOUT_SECS", ENV_PREFIX, self.env_segment())
    }

    pub fn default_timeout(&self) -> Duration {
        match self {
            StageKind::Format => Duration::from_secs(60),
            StageKind::Typecheck => Duration::from_secs(300),
            StageKind::Build => Duration::from_secs(900),
            StageKind::Test => Duration::from_secs(600),
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Per-stage settings resolved from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageSettings {
    /// Replacement argv; `None` keeps the stage default.
    pub command_override: Option<Vec<String>>,
    pub timeout: Duration,
}

/// Validated configuration object.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub stages: BTreeMap<StageKind, StageSettings>,
    pub skip_build: bool,
    pub skip_tests: bool,
    pub verbose: bool,
    pub fail_fast: bool,
    pub preflight: bool,
    pub cooldown_secs: f64,
    pub state_dir: Option<PathBuf>,
    pub extra_build_paths: Vec<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let stages = StageKind::ALL
            .iter()
            .map(|kind| {
                (
                    *kind,
                    StageSettings {
                        command_override: None,
                        timeout: kind.default_timeout(),
                    },
                )
            })
            .collect();

        Self {
            stages,
            skip_build: false,
            skip_tests: false,
            verbose: false,
            fail_fast: true,
            preflight: false,
            cooldown_secs: DEFAULT_COOLDOWN_SECS,
            state_dir: None,
            extra_build_paths: Vec::new(),
        }
    }
}

impl PipelineConfig {
    /// Build the configuration from the current process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_vars(std::env::vars())
    }

    /// Build the configuration from an arbitrary set of key/value pairs.
    pub fn from_vars<I, K, V>(vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let vars: HashMap<String, String> = vars
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .filter(|(k, _)| k.starts_with(ENV_PREFIX))
            .collect();

        let mut config = Self::default();

        for kind in StageKind::ALL {
            let settings = config
                .stages
                .get_mut(&kind)
                .ok_or_else(|| PosteditError::config(kind.name(), "missing stage settings"))?;

            let override_key = kind.override_key();
            if let Some(raw) = vars.get(&override_key) {
                settings.command_override = Some(parse_command(&override_key, raw)?);
            }

            let timeout_key = kind.timeout_key();
            if let Some(raw) = vars.get(&timeout_key) {
                settings.timeout = parse_timeout(&timeout_key, raw)?;
            }
        }

        config.skip_build = flag(&vars, "SKIP_BUILD", false)?;
        config.skip_tests = flag(&vars, "SKIP_TESTS", false)?;
        config.verbose = flag(&vars, "VERBOSE", false)?;
        config.fail_fast = flag(&vars, "FAIL_FAST", true)?;
        config.preflight = flag(&vars, "PREFLIGHT", false)?;

        let cooldown_key = format!("{ENV_PREFIX}_COOLDOWN_SECS");
        if let Some(raw) = vars.get(&cooldown_key) {
            config.cooldown_secs = parse_cooldown(&cooldown_key, raw)?;
        }

        if let Some(dir) = vars.get(&format!("{ENV_PREFIX}_STATE_DIR")) {
            if !dir.trim().is_empty() {
                config.state_dir = Some(PathBuf::from(dir.trim()));
            }
        }

        if let Some(paths) = vars.get(&format!("{ENV_PREFIX}_BUILD_PATHS")) {
            config.extra_build_paths = paths
                .split(',')
                .map(|p| p.trim().trim_end_matches('/').to_string())
                .filter(|p| !p.is_empty())
                .collect();
        }

        Ok(config)
    }

    /// Settings for one stage.
    pub fn stage(&self, kind: StageKind) -> StageSettings {
        self.stages.get(&kind).cloned().unwrap_or(StageSettings {
            command_override: None,
            timeout: kind.default_timeout(),
        })
    }
}

/// Parse a command override into an argv list.
///
/// Accepts a JSON array of strings, or a single program name without
/// whitespace. Never splits on whitespace.
pub fn parse_command(key: &str, raw: &str) -> Result<Vec<String>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(PosteditError::config(key, "command must not be empty"));
    }

    let argv = if trimmed.starts_with('[') {
        serde_json::from_str::<Vec<String>>(trimmed)
            .map_err(|e| PosteditError::config(key, format!("not a JSON string array: {e}")))?
    } else if trimmed.chars().any(char::is_whitespace) {
        return Err(PosteditError::config(
            key,
            "command contains whitespace; give it as a JSON array, e.g. [\"ruff\", \"format\"]",
        ));
    } else {
        vec![trimmed.to_string()]
    };

    match argv.first() {
        Some(program) if !program.trim().is_empty() => Ok(argv),
        _ => Err(PosteditError::config(key, "argv[0] must name a program")),
    }
}

/// Parse a boolean flag value.
pub fn parse_bool(key: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(PosteditError::config(
            key,
            format!("expected a boolean, got {other:?}"),
        )),
    }
}

fn flag(vars: &HashMap<String, String>, name: &str, default: bool) -> Result<bool> {
    let key = format!("{ENV_PREFIX}_{name}");
    match vars.get(&key) {
        Some(raw) => parse_bool(&key, raw),
        None => Ok(default),
    }
}

fn parse_timeout(key: &str, raw: &str) -> Result<Duration> {
    let secs: u64 = raw
        .trim()
        .parse()
        .map_err(|_| PosteditError::config(key, format!("expected whole seconds, got {raw:?}")))?;
    if secs == 0 {
        return Err(PosteditError::config(key, "timeout must be positive"));
    }
    Ok(Duration::from_secs(secs))
}

fn parse_cooldown(key: &str, raw: &str) -> Result<f64> {
    let secs: f64 = raw
        .trim()
        .parse()
        .map_err(|_| PosteditError::config(key, format!("expected seconds, got {raw:?}")))?;
    if !secs.is_finite() || secs < 0.0 {
        return Err(PosteditError::config(key, "cooldown must be a non-negative number"));
    }
    Ok(secs)
}
