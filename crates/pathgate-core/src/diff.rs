//! Diff matching: does a revision pair touch a path filter?
//!
//! The matcher keeps three outcomes apart:
//! - the diff ran and found changes under the filter
//! - the diff ran and found nothing
//! - the diff could not run at all (`GateError::DiffUnavailable`)
//!
//! A fourth, defined case covers the first commit in history, where the base
//! does not exist and the change set cannot be compared.

use std::path::PathBuf;
use std::process::{Output, Stdio};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::{GateError, Result};
use crate::filter::PathFilter;
use crate::revision::RevisionRef;

/// Outcome of matching one filter against a revision pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffResult {
    /// At least one changed path is equal to or nested under the filter.
    Changed,

    /// No changed path falls under the filter.
    Unchanged,

    /// The base revision does not exist because `head` is a root commit.
    /// Counts as a match so the build is never suppressed.
    BaseUnresolvable,
}

impl DiffResult {
    pub fn is_match(&self) -> bool {
        matches!(self, DiffResult::Changed | DiffResult::BaseUnresolvable)
    }
}

/// Source-control diff capability used by the gate.
#[async_trait]
pub trait DiffMatcher: Send + Sync {
    /// Whether anything under `filter` changed between `base` and `head`.
    async fn matches(
        &self,
        base: &RevisionRef,
        head: &RevisionRef,
        filter: &PathFilter,
    ) -> Result<DiffResult>;
}

/// `DiffMatcher` backed by the `git` CLI, scoped with a pathspec so git does
/// the path matching.
#[derive(Debug, Clone)]
pub struct GitDiffMatcher {
    repo_dir: PathBuf,
    git_binary: String,
}

impl GitDiffMatcher {
    pub fn new(repo_dir: impl Into<PathBuf>) -> Self {
        Self {
            repo_dir: repo_dir.into(),
            git_binary: "git".to_string(),
        }
    }

    /// Use a different git executable (absolute path or name on `PATH`).
    pub fn with_git_binary(mut self, git_binary: impl Into<String>) -> Self {
        self.git_binary = git_binary.into();
        self
    }

    pub fn repo_dir(&self) -> &std::path::Path {
        &self.repo_dir
    }

    /// List paths changed between `base` and `head`, optionally scoped to
    /// one filter. For a root commit every path in `head` is reported.
    pub async fn changed_paths(
        &self,
        base: &RevisionRef,
        head: &RevisionRef,
        filter: Option<&PathFilter>,
    ) -> Result<Vec<String>> {
        let scope = filter.map(PathFilter::as_str).unwrap_or(".");
        check_revisions(base, head, scope)?;

        let output = self
            .git(&[
                "-c",
                "core.quotepath=off",
                "diff",
                "--no-ext-diff",
                "--name-only",
                base.as_str(),
                head.as_str(),
                "--",
                scope,
            ])
            .await
            .map_err(|e| unavailable(scope, format!("failed to run git: {e}")))?;

        if output.status.success() {
            return Ok(lines(&output.stdout));
        }

        if self.is_root_commit(head).await {
            let listing = self
                .git(&[
                    "-c",
                    "core.quotepath=off",
                    "ls-tree",
                    "-r",
                    "--name-only",
                    head.as_str(),
                    "--",
                    scope,
                ])
                .await
                .map_err(|e| unavailable(scope, format!("failed to run git: {e}")))?;
            if listing.status.success() {
                return Ok(lines(&listing.stdout));
            }
            return Err(unavailable(scope, stderr_reason(&listing)));
        }

        Err(unavailable(scope, stderr_reason(&output)))
    }

    /// Run git with literal pathspecs: a filter never acts as a glob or
    /// `:(magic)` pattern, so it only scopes paths equal to or under it.
    async fn git(&self, args: &[&str]) -> std::io::Result<Output> {
        Command::new(&self.git_binary)
            .arg("--literal-pathspecs")
            .args(args)
            .current_dir(&self.repo_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
    }

    /// True when `head` resolves to a commit without parents.
    async fn is_root_commit(&self, head: &RevisionRef) -> bool {
        let rev = format!("{}^{{commit}}", head.as_str());
        match self.git(&["rev-list", "--parents", "-n", "1", &rev]).await {
            Ok(output) if output.status.success() => {
                let stdout = String::from_utf8_lossy(&output.stdout);
                stdout.split_whitespace().count() == 1
            }
            _ => false,
        }
    }
}

#[async_trait]
impl DiffMatcher for GitDiffMatcher {
    async fn matches(
        &self,
        base: &RevisionRef,
        head: &RevisionRef,
        filter: &PathFilter,
    ) -> Result<DiffResult> {
        check_revisions(base, head, filter.as_str())?;

        let output = self
            .git(&[
                "diff",
                "--quiet",
                "--no-ext-diff",
                base.as_str(),
                head.as_str(),
                "--",
                filter.as_str(),
            ])
            .await
            .map_err(|e| unavailable(filter.as_str(), format!("failed to run git: {e}")))?;

        // `--quiet` implies `--exit-code`: 0 = no differences, 1 = differences.
        match output.status.code() {
            Some(0) => {
                debug!(filter = %filter, base = %base, head = %head, "no changes under filter");
                Ok(DiffResult::Unchanged)
            }
            Some(1) => {
                debug!(filter = %filter, base = %base, head = %head, "changes under filter");
                Ok(DiffResult::Changed)
            }
            code => {
                if self.is_root_commit(head).await {
                    warn!(
                        head = %head,
                        base = %base,
                        "head is the first commit in history; base cannot be compared"
                    );
                    return Ok(DiffResult::BaseUnresolvable);
                }
                let reason = match code {
                    Some(code) => {
                        format!("git diff exited with {}: {}", code, stderr_reason(&output))
                    }
                    None => "git diff terminated by signal".to_string(),
                };
                Err(unavailable(filter.as_str(), reason))
            }
        }
    }
}

fn check_revisions(base: &RevisionRef, head: &RevisionRef, scope: &str) -> Result<()> {
    base.validate()
        .and_then(|_| head.validate())
        .map_err(|reason| unavailable(scope, reason))
}

fn unavailable(filter: &str, reason: String) -> GateError {
    GateError::DiffUnavailable {
        filter: filter.to_string(),
        reason,
    }
}

fn stderr_reason(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    if stderr.is_empty() {
        "no error output".to_string()
    } else {
        stderr
    }
}

fn lines(stdout: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(stdout)
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}
