//! Change sets and their resolution.
//!
//! A change set is either a finite set of repository-relative paths or the
//! `All` sentinel. Resolution failures always produce `All`: running a
//! stage that was not needed is cheaper than skipping one that was.

use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::git;

/// Files affected by the triggering edit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "paths", rename_all = "snake_case")]
pub enum ChangeSet {
    /// Could not determine the affected files; every stage applies.
    All,
    /// Repository-relative paths, forward-slash separated.
    Files(BTreeSet<String>),
}

impl ChangeSet {
    pub fn files<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        ChangeSet::Files(
            paths
                .into_iter()
                .filter_map(|p| normalize_listed_path(p.as_ref()))
                .collect(),
        )
    }

    pub fn is_all(&self) -> bool {
        matches!(self, ChangeSet::All)
    }

    /// Number of known paths; `None` for `All`.
    pub fn len(&self) -> Option<usize> {
        match self {
            ChangeSet::All => None,
            ChangeSet::Files(paths) => Some(paths.len()),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, ChangeSet::Files(paths) if paths.is_empty())
    }

    /// True when `All`, or when any listed path satisfies `pred`.
    pub fn any_path(&self, pred: impl Fn(&str) -> bool) -> bool {
        match self {
            ChangeSet::All => true,
            ChangeSet::Files(paths) => paths.iter().any(|p| pred(p)),
        }
    }

    /// Add a path. `All` absorbs it.
    pub fn with_path(self, path: &str) -> Self {
        match self {
            ChangeSet::All => ChangeSet::All,
            ChangeSet::Files(mut paths) => {
                if let Some(p) = normalize_listed_path(path) {
                    paths.insert(p);
                }
                ChangeSet::Files(paths)
            }
        }
    }

    /// Short human description, e.g. `3 file(s)` or `all files`.
    pub fn describe(&self) -> String {
        match self {
            ChangeSet::All => "all files (change set unknown)".to_string(),
            ChangeSet::Files(paths) => format!("{} file(s)", paths.len()),
        }
    }
}

/// Where the explicit change list comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExplicitList {
    /// Newline-delimited paths given directly.
    Inline(String),
    /// File containing newline-delimited paths.
    File(PathBuf),
}

/// Resolves the change set for one pipeline invocation.
#[derive(Debug, Clone)]
pub struct ChangeSetResolver {
    repo_root: PathBuf,
    explicit: Option<ExplicitList>,
}

impl ChangeSetResolver {
    pub fn new(repo_root: impl Into<PathBuf>) -> Self {
        Self {
            repo_root: repo_root.into(),
            explicit: None,
        }
    }

    pub fn with_explicit(mut self, explicit: Option<ExplicitList>) -> Self {
        self.explicit = explicit;
        self
    }

    /// Resolve: explicit list if non-empty, else git diff, else `All`.
    pub fn resolve(&self) -> ChangeSet {
        if let Some(explicit) = &self.explicit {
            let raw = match explicit {
                ExplicitList::Inline(text) => text.clone(),
                ExplicitList::File(path) => match std::fs::read_to_string(path) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "Cannot read change list, assuming all files");
                        return ChangeSet::All;
                    }
                },
            };

            let listed = parse_path_list(&raw);
            if !listed.is_empty() {
                debug!(count = listed.len(), "Using explicit change list");
                return ChangeSet::Files(listed);
            }
            debug!("Explicit change list is empty, falling back to git diff");
        }

        match git::changed_files(&self.repo_root) {
            Ok(paths) => {
                debug!(count = paths.len(), "Resolved change set from git diff");
                ChangeSet::Files(paths)
            }
            Err(e) => {
                warn!(error = %e, "Cannot diff working tree, assuming all files");
                ChangeSet::All
            }
        }
    }
}

/// Parse a path list separated by newlines or commas. Blank entries are
/// ignored.
pub fn parse_path_list(raw: &str) -> BTreeSet<String> {
    raw.split(['\n', ','])
        .filter_map(normalize_listed_path)
        .collect()
}

fn normalize_listed_path(line: &str) -> Option<String> {
    let mut p = line.trim();
    while let Some(rest) = p.strip_prefix("./") {
        p = rest;
    }
    if p.is_empty() {
        None
    } else {
        Some(p.to_string())
    }
}

/// Express `path` relative to `root` with forward slashes.
///
/// Relative inputs are taken as already root-relative. Absolute inputs
/// reached through a symlinked directory are compared in canonical form;
/// inputs outside `root` are returned unchanged.
pub fn relative_to_root(root: &Path, path: &Path) -> String {
    let rel: PathBuf = if path.is_absolute() {
        match path.strip_prefix(root) {
            Ok(rel) => rel.to_path_buf(),
            Err(_) => canonical_strip(root, path).unwrap_or_else(|| path.to_path_buf()),
        }
    } else {
        path.to_path_buf()
    };

    let parts: Vec<String> = rel
        .components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
            Component::RootDir => Some(String::new()),
            _ => None,
        })
        .collect();
    parts.join("/")
}

fn canonical_strip(root: &Path, path: &Path) -> Option<PathBuf> {
    let root = root.canonicalize().ok()?;
    let path = canonicalize_existing_prefix(path)?;
    path.strip_prefix(&root).ok().map(Path::to_path_buf)
}

/// Canonicalize the longest existing ancestor of `path` and re-append the
/// rest, so deleted or not-yet-created files still resolve.
fn canonicalize_existing_prefix(path: &Path) -> Option<PathBuf> {
    let mut missing = Vec::new();
    let mut current = path;
    loop {
        if let Ok(canonical) = current.canonicalize() {
            return Some(missing.iter().rev().fold(canonical, |acc, part| acc.join(part)));
        }
        missing.push(current.file_name()?.to_os_string());
        current = current.parent()?;
    }
}
