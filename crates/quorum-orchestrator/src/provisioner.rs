//! Environment provisioning
//!
//! An environment is a working directory an agent can run in. The default
//! provisioner backs each one with a git worktree on the subtask's branch.

use async_trait::async_trait;
use quorum_core::{EnvironmentRef, EnvironmentSpec, ExecOutput, QuorumError, Result};
use quorum_vcs::VersionControl;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info};

#[async_trait]
pub trait EnvironmentProvisioner: Send + Sync {
    /// Create the environment named in `spec`, on `spec.branch` from `spec.base_branch`
    async fn provision(&self, spec: &EnvironmentSpec) -> Result<EnvironmentRef>;

    /// Destroy `env`; `EnvironmentGone` when it no longer exists
    async fn teardown(&self, env: &EnvironmentRef) -> Result<()>;

    /// Run `command` with the environment as working directory
    async fn exec_in_environment(&self, env: &EnvironmentRef, command: &[&str]) -> Result<ExecOutput>;

    /// Environments whose name starts with `prefix`
    async fn list_environments(&self, prefix: &str) -> Result<Vec<EnvironmentRef>>;
}

/// Where worktrees live inside a repository
pub fn default_worktree_root(repo_root: &Path) -> PathBuf {
    repo_root.join(".quorum").join("worktrees")
}

/// Git worktrees under a single root directory
pub struct WorktreeProvisioner<V: VersionControl + ?Sized> {
    vcs: Arc<V>,
    root: PathBuf,
}

impl<V: VersionControl + ?Sized> WorktreeProvisioner<V> {
    pub fn new(vcs: Arc<V>, root: impl Into<PathBuf>) -> Self {
        Self {
            vcs,
            root: root.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl<V: VersionControl + ?Sized> EnvironmentProvisioner for WorktreeProvisioner<V> {
    async fn provision(&self, spec: &EnvironmentSpec) -> Result<EnvironmentRef> {
        tokio::fs::create_dir_all(&self.root).await?;
        let path = self.root.join(&spec.name);

        self.vcs
            .add_worktree(&path, &spec.branch, &spec.base_branch)
            .await?;

        info!("Provisioned {} at {}", spec.name, path.display());
        Ok(EnvironmentRef {
            name: spec.name.clone(),
            path,
        })
    }

    async fn teardown(&self, env: &EnvironmentRef) -> Result<()> {
        self.vcs.remove_worktree(&env.path).await?;
        debug!("Tore down {}", env.name);
        Ok(())
    }

    async fn exec_in_environment(&self, env: &EnvironmentRef, command: &[&str]) -> Result<ExecOutput> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| QuorumError::Exec("empty command".to_string()))?;

        if !tokio::fs::try_exists(&env.path).await.unwrap_or(false) {
            return Err(QuorumError::EnvironmentGone(env.name.clone()));
        }

        let output = tokio::process::Command::new(program)
            .args(args)
            .current_dir(&env.path)
            .output()
            .await
            .map_err(|e| QuorumError::Exec(format!("{}: {}", program, e)))?;

        Ok(ExecOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code().unwrap_or(-1),
        })
    }

    async fn list_environments(&self, prefix: &str) -> Result<Vec<EnvironmentRef>> {
        let worktrees = self.vcs.list_worktrees().await?;

        Ok(worktrees
            .into_iter()
            .filter(|wt| wt.path.parent() == Some(self.root.as_path()))
            .filter_map(|wt| {
                let name = wt.path.file_name()?.to_str()?.to_string();
                name.starts_with(prefix).then_some(EnvironmentRef { name, path: wt.path })
            })
            .collect())
    }
}

#[derive(Default)]
struct MemoryState {
    live: BTreeMap<String, EnvironmentRef>,
    teardowns: Vec<String>,
    commands: Vec<(String, Vec<String>)>,
    fail_provision: HashSet<String>,
    fail_teardown: HashSet<String>,
}

/// Provisioner that only keeps bookkeeping (for tests and dry runs)
///
/// Commands always succeed with empty output.
#[derive(Default)]
pub struct MemoryProvisioner {
    root: PathBuf,
    teardown_delay: Option<Duration>,
    state: Mutex<MemoryState>,
}

impl MemoryProvisioner {
    pub fn new() -> Self {
        Self {
            root: PathBuf::from("/memory"),
            teardown_delay: None,
            state: Mutex::new(MemoryState::default()),
        }
    }

    /// Provisioning `name` fails
    pub fn with_failing_provision(self, name: impl Into<String>) -> Self {
        self.lock().fail_provision.insert(name.into());
        self
    }

    /// Tearing down `name` fails (and keeps failing)
    pub fn with_failing_teardown(self, name: impl Into<String>) -> Self {
        self.lock().fail_teardown.insert(name.into());
        self
    }

    /// Every teardown sleeps for `delay` before touching state
    pub fn with_teardown_delay(mut self, delay: Duration) -> Self {
        self.teardown_delay = Some(delay);
        self
    }

    /// Names of environments still alive
    pub fn live(&self) -> Vec<String> {
        self.lock().live.keys().cloned().collect()
    }

    /// Names torn down, in order
    pub fn teardowns(&self) -> Vec<String> {
        self.lock().teardowns.clone()
    }

    /// Commands run, as (environment, argv)
    pub fn commands(&self) -> Vec<(String, Vec<String>)> {
        self.lock().commands.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl EnvironmentProvisioner for MemoryProvisioner {
    async fn provision(&self, spec: &EnvironmentSpec) -> Result<EnvironmentRef> {
        let mut state = self.lock();
        if state.fail_provision.contains(&spec.name) {
            return Err(QuorumError::Provisioning(format!("{}: refused", spec.name)));
        }
        let env = EnvironmentRef {
            name: spec.name.clone(),
            path: self.root.join(&spec.name),
        };
        state.live.insert(spec.name.clone(), env.clone());
        Ok(env)
    }

    async fn teardown(&self, env: &EnvironmentRef) -> Result<()> {
        if let Some(delay) = self.teardown_delay {
            tokio::time::sleep(delay).await;
        }
        let mut state = self.lock();
        if state.fail_teardown.contains(&env.name) {
            return Err(QuorumError::Provisioning(format!("{}: teardown refused", env.name)));
        }
        if state.live.remove(&env.name).is_none() {
            return Err(QuorumError::EnvironmentGone(env.name.clone()));
        }
        state.teardowns.push(env.name.clone());
        Ok(())
    }

    async fn exec_in_environment(&self, env: &EnvironmentRef, command: &[&str]) -> Result<ExecOutput> {
        let mut state = self.lock();
        if !state.live.contains_key(&env.name) {
            return Err(QuorumError::EnvironmentGone(env.name.clone()));
        }
        state.commands.push((
            env.name.clone(),
            command.iter().map(|s| s.to_string()).collect(),
        ));
        Ok(ExecOutput::default())
    }

    async fn list_environments(&self, prefix: &str) -> Result<Vec<EnvironmentRef>> {
        Ok(self
            .lock()
            .live
            .values()
            .filter(|env| env.name.starts_with(prefix))
            .cloned()
            .collect())
    }
}
