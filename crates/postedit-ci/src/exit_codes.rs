//! Process exit codes. External callers key remediation off these values,
//! so they must never change.

/// All applicable stages passed, or nothing needed to run.
pub const SUCCESS: i32 = 0;
pub const FORMAT_FAILED: i32 = 1;
pub const TYPECHECK_FAILED: i32 = 2;
pub const BUILD_FAILED: i32 = 3;
pub const TEST_FAILED: i32 = 4;
/// Working context or configuration could not be established.
pub const SETUP_ERROR: i32 = 5;
/// Preflight found a stage tool missing before any stage ran.
pub const TOOL_UNAVAILABLE: i32 = 7;

/// Synthetic command exit code reported for a timed-out stage.
pub const TIMEOUT_COMMAND_CODE: i32 = 124;
/// Synthetic command exit code reported for a missing executable.
pub const NOT_FOUND_COMMAND_CODE: i32 = 127;
