//! Recursion guard.
//!
//! The guard is an explicit value created at the entry point and threaded
//! through every call that might start another pipeline. It is carried to
//! child processes only when the child is postedit itself.

use std::ffi::OsStr;
use std::path::Path;

use crate::config::ENV_PREFIX;

/// Environment variable carrying the guard across process boundaries.
pub const GUARD_VAR: &str = "POSTEDIT_ACTIVE";

/// Whether this process is a nested invocation of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RecursionGuard {
    inherited: bool,
}

impl RecursionGuard {
    /// A guard for a top-level invocation.
    pub fn top_level() -> Self {
        Self { inherited: false }
    }

    /// A guard for a nested invocation.
    pub fn nested() -> Self {
        Self { inherited: true }
    }

    /// Read the inherited flag from the process environment.
    pub fn from_env() -> Self {
        Self::from_value(std::env::var(GUARD_VAR).ok().as_deref())
    }

    /// Interpret a raw flag value. Any non-empty value other than `0` or
    /// `false` marks the invocation as nested.
    pub fn from_value(value: Option<&str>) -> Self {
        let inherited = match value.map(str::trim) {
            None | Some("") => false,
            Some(v) => !matches!(v.to_ascii_lowercase().as_str(), "0" | "false" | "no" | "off"),
        };
        Self { inherited }
    }

    pub fn is_recursive_invocation(&self) -> bool {
        self.inherited
    }

    /// Environment entry to hand to a child that re-invokes the pipeline.
    pub fn child_env(&self) -> (String, String) {
        (GUARD_VAR.to_string(), "1".to_string())
    }

    /// Whether `program` names the pipeline's own executable.
    ///
    /// Compared by file name so that `postedit`, `./target/debug/postedit`
    /// and an absolute path all match.
    pub fn is_self_invocation(program: &str, self_exe: Option<&Path>) -> bool {
        let program_name = Path::new(program).file_name();
        let own_name = self_exe.and_then(Path::file_name);
        match (program_name, own_name) {
            (Some(p), Some(own)) => p == own,
            (Some(p), None) => p == OsStr::new(&ENV_PREFIX.to_ascii_lowercase()),
            _ => false,
        }
    }
}
