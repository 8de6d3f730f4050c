//! postedit Core Library
//!
//! Domain building blocks for the post-change enforcement pipeline:
//! configuration, trigger parsing, change-set resolution, the recursion
//! guard and the debounce controller with its state store.

pub mod changeset;
pub mod config;
pub mod debounce;
pub mod error;
pub mod fakes;
pub mod git;
pub mod guard;
pub mod state;
pub mod telemetry;
pub mod trigger;

pub use changeset::{parse_path_list, relative_to_root, ChangeSet, ChangeSetResolver, ExplicitList};
pub use config::{PipelineConfig, StageKind, StageSettings, ENV_PREFIX};
pub use debounce::{DebounceController, DebounceDecision, DebounceState, DEBOUNCE_KEY};
pub use error::{PosteditError, Result, StateError};
pub use git::{changed_files, repo_root};
pub use guard::{RecursionGuard, GUARD_VAR};
pub use state::{FsStateStore, StateStore};
pub use telemetry::{init_tracing, level_for, LogFormat};
pub use trigger::{read_trigger, TriggerDescriptor, TriggerInput, TriggerParameters};
