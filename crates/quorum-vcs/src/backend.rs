//! Version control operations
//!
//! `VersionControl` is the seam the provisioner and branch merger talk to.
//! `GitBackend` implements it on top of any [`GitExecutor`], running
//! commands in a worktree with `git -C <dir>` where a working copy matters.

use async_trait::async_trait;
use quorum_core::{QuorumError, RepositorySnapshot, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, instrument, warn};

use crate::command::{GitExecutor, GitOutput};
use crate::conflicts::parse_unmerged_paths;

/// Outcome of one three-way merge
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeAttempt {
    Clean,
    /// Merge stopped with these unmerged paths (sorted)
    Conflicted(Vec<String>),
}

/// One entry of `git worktree list`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorktreeInfo {
    pub path: PathBuf,
    /// Checked-out branch, without `refs/heads/`
    pub branch: Option<String>,
}

#[async_trait]
pub trait VersionControl: Send + Sync {
    /// Stage and commit everything in `dir`; returns false when nothing changed
    async fn commit_all(&self, dir: &Path, message: &str) -> Result<bool>;

    /// Three-way merge `branch` into whatever is checked out in `dir`
    async fn merge(&self, dir: &Path, branch: &str, message: &str) -> Result<MergeAttempt>;

    async fn abort_merge(&self, dir: &Path) -> Result<()>;

    /// Unmerged paths in `dir`
    async fn conflicted_paths(&self, dir: &Path) -> Result<Vec<String>>;

    async fn read_file(&self, dir: &Path, path: &str) -> Result<String>;

    async fn snapshot(&self) -> Result<RepositorySnapshot>;

    /// Add a worktree at `path` on `branch`, created or reset from `start`
    async fn add_worktree(&self, path: &Path, branch: &str, start: &str) -> Result<()>;

    /// Remove the worktree at `path`; `EnvironmentGone` if it does not exist
    async fn remove_worktree(&self, path: &Path) -> Result<()>;

    async fn list_worktrees(&self) -> Result<Vec<WorktreeInfo>>;
}

/// `VersionControl` over git
pub struct GitBackend<E: GitExecutor> {
    executor: E,
}

impl<E: GitExecutor> GitBackend<E> {
    pub fn new(executor: E) -> Self {
        Self { executor }
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    async fn run(&self, args: &[&str], what: &str) -> Result<GitOutput> {
        let output = self.executor.exec(args).await?;
        if !output.success {
            return Err(QuorumError::GitCommand(format!(
                "{} failed: {}",
                what,
                output.stderr.trim()
            )));
        }
        Ok(output)
    }
}

fn dir_arg(dir: &Path) -> String {
    dir.to_string_lossy().to_string()
}

fn lines(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(String::from)
        .collect()
}

/// Parse `git worktree list --porcelain`
fn parse_worktree_list(output: &str) -> Vec<WorktreeInfo> {
    let mut worktrees = Vec::new();
    let mut current: Option<WorktreeInfo> = None;

    for line in output.lines() {
        if let Some(path) = line.strip_prefix("worktree ") {
            if let Some(done) = current.take() {
                worktrees.push(done);
            }
            current = Some(WorktreeInfo {
                path: PathBuf::from(path),
                branch: None,
            });
        } else if let Some(branch) = line.strip_prefix("branch ") {
            if let Some(wt) = current.as_mut() {
                wt.branch = Some(branch.trim_start_matches("refs/heads/").to_string());
            }
        }
    }
    if let Some(done) = current {
        worktrees.push(done);
    }

    worktrees
}

#[async_trait]
impl<E: GitExecutor> VersionControl for GitBackend<E> {
    #[instrument(skip(self, message))]
    async fn commit_all(&self, dir: &Path, message: &str) -> Result<bool> {
        let dir = dir_arg(dir);
        self.run(&["-C", &dir, "add", "-A"], "git add").await?;

        let status = self
            .run(&["-C", &dir, "status", "--porcelain"], "git status")
            .await?;
        if status.stdout.trim().is_empty() {
            debug!("Nothing to commit in {}", dir);
            return Ok(false);
        }

        self.run(&["-C", &dir, "commit", "--no-verify", "-m", message], "git commit")
            .await?;
        Ok(true)
    }

    #[instrument(skip(self, message))]
    async fn merge(&self, dir: &Path, branch: &str, message: &str) -> Result<MergeAttempt> {
        let dir_str = dir_arg(dir);
        let output = self
            .executor
            .exec(&["-C", &dir_str, "merge", "--no-ff", "-m", message, branch])
            .await?;

        if output.success {
            return Ok(MergeAttempt::Clean);
        }

        let paths = self.conflicted_paths(dir).await?;
        if paths.is_empty() {
            // Refused before touching the tree (unknown branch, dirty tree)
            return Err(QuorumError::GitCommand(format!(
                "git merge {} failed: {}",
                branch,
                output.stderr.trim()
            )));
        }

        debug!("Merge of {} conflicted in {} path(s)", branch, paths.len());
        Ok(MergeAttempt::Conflicted(paths))
    }

    #[instrument(skip(self))]
    async fn abort_merge(&self, dir: &Path) -> Result<()> {
        let dir = dir_arg(dir);
        self.run(&["-C", &dir, "merge", "--abort"], "git merge --abort")
            .await?;
        Ok(())
    }

    async fn conflicted_paths(&self, dir: &Path) -> Result<Vec<String>> {
        let dir = dir_arg(dir);
        let status = self
            .run(&["-C", &dir, "status", "--porcelain"], "git status")
            .await?;
        Ok(parse_unmerged_paths(&status.stdout))
    }

    async fn read_file(&self, dir: &Path, path: &str) -> Result<String> {
        Ok(tokio::fs::read_to_string(dir.join(path)).await?)
    }

    async fn snapshot(&self) -> Result<RepositorySnapshot> {
        let head = self
            .run(&["rev-parse", "--abbrev-ref", "HEAD"], "git rev-parse")
            .await?;
        let files = self.run(&["ls-files"], "git ls-files").await?;

        Ok(RepositorySnapshot {
            root: self.executor.repo_root().clone(),
            head_branch: head.stdout.trim().to_string(),
            files: lines(&files.stdout),
        })
    }

    #[instrument(skip(self))]
    async fn add_worktree(&self, path: &Path, branch: &str, start: &str) -> Result<()> {
        let path = dir_arg(path);
        let output = self
            .executor
            .exec(&["worktree", "add", "-B", branch, &path, start])
            .await?;
        if !output.success {
            return Err(QuorumError::Provisioning(format!(
                "git worktree add {} failed: {}",
                path,
                output.stderr.trim()
            )));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn remove_worktree(&self, path: &Path) -> Result<()> {
        let path_str = dir_arg(path);
        let output = self
            .executor
            .exec(&["worktree", "remove", "--force", &path_str])
            .await?;

        if output.success {
            return Ok(());
        }

        let stderr = output.stderr.to_lowercase();
        if stderr.contains("is not a working tree") || stderr.contains("no such file") {
            // Deleted out from under us; drop the stale admin entry too
            if let Err(e) = self.executor.exec(&["worktree", "prune"]).await {
                warn!("git worktree prune failed: {}", e);
            }
            return Err(QuorumError::EnvironmentGone(path_str));
        }

        Err(QuorumError::GitCommand(format!(
            "git worktree remove {} failed: {}",
            path_str,
            output.stderr.trim()
        )))
    }

    async fn list_worktrees(&self) -> Result<Vec<WorktreeInfo>> {
        let output = self
            .run(&["worktree", "list", "--porcelain"], "git worktree list")
            .await?;
        Ok(parse_worktree_list(&output.stdout))
    }
}
