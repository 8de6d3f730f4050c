//! Trigger descriptors: the edit that caused this invocation.

use std::io::{IsTerminal, Read};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{PosteditError, Result};

/// Parameters of the triggering tool call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerParameters {
    #[serde(default)]
    pub file_path: Option<String>,

    #[serde(default)]
    pub command: Option<String>,
}

/// The edit that occurred.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerDescriptor {
    #[serde(alias = "tool_name")]
    pub tool: String,

    #[serde(default, alias = "tool_input")]
    pub parameters: TriggerParameters,
}

impl TriggerDescriptor {
    pub fn parse(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|e| PosteditError::Trigger(e.to_string()))
    }

    /// The edited file, if the trigger names one.
    pub fn informative_path(&self) -> Option<&str> {
        self.parameters
            .file_path
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
    }
}

/// What the trigger input amounted to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerInput {
    /// No trigger supplied: a manual run.
    Manual,
    /// A trigger naming an edited file.
    Edit { tool: String, file_path: String },
    /// A trigger without an informative path, or one that did not parse.
    NoOp { reason: String },
}

impl TriggerInput {
    /// Classify raw trigger text. Empty text is a manual run.
    pub fn from_raw(raw: Option<&str>) -> Self {
        let raw = match raw.map(str::trim) {
            None | Some("") => return TriggerInput::Manual,
            Some(raw) => raw,
        };

        match TriggerDescriptor::parse(raw) {
            Ok(descriptor) => match descriptor.informative_path() {
                Some(path) => TriggerInput::Edit {
                    tool: descriptor.tool.clone(),
                    file_path: path.to_string(),
                },
                None => TriggerInput::NoOp {
                    reason: format!("{} trigger carries no file path", descriptor.tool),
                },
            },
            Err(e) => {
                warn!(error = %e, "Ignoring unparseable trigger");
                TriggerInput::NoOp {
                    reason: format!("unparseable trigger: {e}"),
                }
            }
        }
    }
}

/// Read trigger text: the env value if non-empty, otherwise stdin when it
/// is not a terminal and `read_stdin` is set.
pub fn read_trigger(env_value: Option<String>, read_stdin: bool) -> Result<Option<String>> {
    if let Some(value) = env_value.filter(|v| !v.trim().is_empty()) {
        debug!("Trigger taken from environment");
        return Ok(Some(value));
    }

    let stdin = std::io::stdin();
    if !read_stdin || stdin.is_terminal() {
        return Ok(None);
    }

    let mut buf = String::new();
    stdin.lock().read_to_string(&mut buf)?;
    if buf.trim().is_empty() {
        Ok(None)
    } else {
        debug!(bytes = buf.len(), "Trigger taken from stdin");
        Ok(Some(buf))
    }
}
