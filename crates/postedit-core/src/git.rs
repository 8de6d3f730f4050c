//! Git integration utilities for discovering the working context and the
//! files touched since the last commit.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::{PosteditError, Result};

fn git_output(dir: &Path, args: &[&str]) -> Result<String> {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .map_err(|e| PosteditError::Git(format!("failed to run git: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(PosteditError::Git(format!(
            "git {} failed: {}",
            args.join(" "),
            stderr.trim()
        )));
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Top-level directory of the work tree containing `dir`.
pub fn repo_root(dir: &Path) -> Result<PathBuf> {
    let out = git_output(dir, &["rev-parse", "--show-toplevel"])?;
    let root = out.trim();
    if root.is_empty() {
        return Err(PosteditError::Git(
            "git rev-parse --show-toplevel returned empty output".to_string(),
        ));
    }
    Ok(PathBuf::from(root))
}

/// Paths changed in the working tree relative to `HEAD`, plus untracked
/// files that are not ignored.
///
/// `repo_root` must be the top of the work tree so that both listings are
/// root-relative. Fails when there is no `HEAD` yet.
pub fn changed_files(repo_root: &Path) -> Result<BTreeSet<String>> {
    let mut paths = BTreeSet::new();

    let diff = git_output(repo_root, &["diff", "--name-only", "HEAD"])?;
    let untracked = git_output(repo_root, &["ls-files", "--others", "--exclude-standard"])?;

    for line in diff.lines().chain(untracked.lines()) {
        let line = line.trim();
        if !line.is_empty() {
            paths.insert(line.to_string());
        }
    }

    Ok(paths)
}
