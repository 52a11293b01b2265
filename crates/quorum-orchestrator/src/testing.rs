//! In-memory version control for merge and orchestration tests
//!
//! Branches are modelled as the set of lines each touched per file. Two
//! branches conflict when they touched the same line of the same file.
//! Work queued with `work` lands on its branch at the next commit in a
//! worktree checked out on that branch.

use crate::provisioner::WorktreeProvisioner;
use crate::registry::LifecycleRegistry;
use async_trait::async_trait;
use quorum_core::{QuorumError, RepositorySnapshot, Result};
use quorum_vcs::{MergeAttempt, VersionControl, WorktreeInfo};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

type Edits = BTreeMap<String, BTreeSet<u32>>;

#[derive(Default)]
struct FakeState {
    branches: HashMap<String, Edits>,
    pending: HashMap<String, Edits>,
    worktrees: BTreeMap<PathBuf, String>,
    conflicts: HashMap<PathBuf, Vec<String>>,
    merged: Vec<String>,
    commits: Vec<(String, String)>,
    fail_worktrees: HashSet<String>,
}

#[derive(Default)]
pub struct FakeVcs {
    state: Mutex<FakeState>,
    files: Vec<String>,
    merge_delay: Option<Duration>,
}

impl FakeVcs {
    pub fn new() -> Self {
        let vcs = Self {
            state: Mutex::new(FakeState::default()),
            files: vec!["src/lib.rs".to_string(), "src/parser.rs".to_string()],
            merge_delay: None,
        };
        vcs.lock().branches.insert("main".to_string(), Edits::new());
        vcs
    }

    /// Record that `branch` touched `lines` of `file`
    pub fn edit(self, branch: &str, file: &str, lines: impl IntoIterator<Item = u32>) -> Self {
        self.lock()
            .branches
            .entry(branch.to_string())
            .or_default()
            .entry(file.to_string())
            .or_default()
            .extend(lines);
        self
    }

    /// Queue edits to `branch` that land when a worktree on it commits
    pub fn work(self, branch: &str, file: &str, lines: impl IntoIterator<Item = u32>) -> Self {
        self.lock()
            .pending
            .entry(branch.to_string())
            .or_default()
            .entry(file.to_string())
            .or_default()
            .extend(lines);
        self
    }

    /// Adding a worktree whose directory is named `name` fails
    pub fn with_failing_worktree(self, name: &str) -> Self {
        self.lock().fail_worktrees.insert(name.to_string());
        self
    }

    /// Every merge sleeps for `delay` first
    pub fn with_merge_delay(mut self, delay: Duration) -> Self {
        self.merge_delay = Some(delay);
        self
    }

    /// Branches merged cleanly, in order
    pub fn merged(&self) -> Vec<String> {
        self.lock().merged.clone()
    }

    pub fn edits(&self, branch: &str) -> Edits {
        self.lock().branches.get(branch).cloned().unwrap_or_default()
    }

    /// Commits made, as (branch, message)
    pub fn commits(&self) -> Vec<(String, String)> {
        self.lock().commits.clone()
    }

    pub fn live_worktrees(&self) -> Vec<PathBuf> {
        self.lock().worktrees.keys().cloned().collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl VersionControl for FakeVcs {
    async fn commit_all(&self, dir: &Path, message: &str) -> Result<bool> {
        let mut state = self.lock();
        let branch = state
            .worktrees
            .get(dir)
            .cloned()
            .ok_or_else(|| QuorumError::GitCommand(format!("not a worktree: {}", dir.display())))?;
        let Some(work) = state.pending.remove(&branch) else {
            return Ok(false);
        };

        let edits = state.branches.entry(branch.clone()).or_default();
        for (file, lines) in work {
            edits.entry(file).or_default().extend(lines);
        }
        state.commits.push((branch, message.to_string()));
        Ok(true)
    }

    async fn merge(&self, dir: &Path, branch: &str, _message: &str) -> Result<MergeAttempt> {
        if let Some(delay) = self.merge_delay {
            tokio::time::sleep(delay).await;
        }
        let mut state = self.lock();
        let target = state
            .worktrees
            .get(dir)
            .cloned()
            .ok_or_else(|| QuorumError::GitCommand(format!("not a worktree: {}", dir.display())))?;
        let incoming = state
            .branches
            .get(branch)
            .cloned()
            .ok_or_else(|| QuorumError::Branch(format!("unknown branch {}", branch)))?;
        let current = state.branches.get(&target).cloned().unwrap_or_default();

        let conflicted: Vec<String> = incoming
            .iter()
            .filter(|(file, lines)| {
                current
                    .get(*file)
                    .is_some_and(|ours| !ours.is_disjoint(lines))
            })
            .map(|(file, _)| file.clone())
            .collect();

        if !conflicted.is_empty() {
            state.conflicts.insert(dir.to_path_buf(), conflicted.clone());
            return Ok(MergeAttempt::Conflicted(conflicted));
        }

        let merged = state.branches.entry(target).or_default();
        for (file, lines) in incoming {
            merged.entry(file).or_default().extend(lines);
        }
        state.merged.push(branch.to_string());
        Ok(MergeAttempt::Clean)
    }

    async fn abort_merge(&self, dir: &Path) -> Result<()> {
        self.lock().conflicts.remove(dir);
        Ok(())
    }

    async fn conflicted_paths(&self, dir: &Path) -> Result<Vec<String>> {
        Ok(self.lock().conflicts.get(dir).cloned().unwrap_or_default())
    }

    async fn read_file(&self, dir: &Path, path: &str) -> Result<String> {
        let state = self.lock();
        let conflicted = state
            .conflicts
            .get(dir)
            .is_some_and(|files| files.iter().any(|f| f == path));
        if conflicted {
            Ok("fn a() {}\n<<<<<<< HEAD\nours\n=======\ntheirs\n>>>>>>> incoming\n".to_string())
        } else {
            Ok("fn a() {}\n".to_string())
        }
    }

    async fn snapshot(&self) -> Result<RepositorySnapshot> {
        Ok(RepositorySnapshot {
            root: PathBuf::from("/fake"),
            head_branch: "main".to_string(),
            files: self.files.clone(),
        })
    }

    async fn add_worktree(&self, path: &Path, branch: &str, start: &str) -> Result<()> {
        let mut state = self.lock();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if state.fail_worktrees.contains(&name) {
            return Err(QuorumError::Provisioning(format!("{}: refused", name)));
        }

        let edits = state.branches.get(start).cloned().unwrap_or_default();
        state.branches.insert(branch.to_string(), edits);
        state.worktrees.insert(path.to_path_buf(), branch.to_string());
        Ok(())
    }

    async fn remove_worktree(&self, path: &Path) -> Result<()> {
        match self.lock().worktrees.remove(path) {
            Some(_) => Ok(()),
            None => Err(QuorumError::EnvironmentGone(path.display().to_string())),
        }
    }

    async fn list_worktrees(&self) -> Result<Vec<WorktreeInfo>> {
        Ok(self
            .lock()
            .worktrees
            .iter()
            .map(|(path, branch)| WorktreeInfo {
                path: path.clone(),
                branch: Some(branch.clone()),
            })
            .collect())
    }
}

/// A [`FakeVcs`] behind the worktree provisioner and a registry
///
/// Worktree paths live under a temporary directory that is removed on drop.
pub struct FakeRepo {
    pub vcs: Arc<FakeVcs>,
    pub registry: Arc<LifecycleRegistry>,
    root: tempfile::TempDir,
}

impl FakeRepo {
    pub fn new(vcs: FakeVcs) -> Self {
        let root = tempfile::tempdir().unwrap();
        let vcs = Arc::new(vcs);
        let provisioner = Arc::new(WorktreeProvisioner::new(vcs.clone(), root.path()));
        Self {
            registry: Arc::new(LifecycleRegistry::new(provisioner)),
            vcs,
            root,
        }
    }

    pub fn worktree_root(&self) -> &Path {
        self.root.path()
    }

    /// No registered handles and no worktrees left behind
    pub fn assert_clean(&self) {
        assert_eq!(self.registry.active_count(), 0);
        assert!(self.vcs.live_worktrees().is_empty());
    }
}
