//! Folding parallel branches into one integration branch
//!
//! Branches are merged one at a time, in the order given, onto a fresh
//! integration branch cut from the base. The first conflict stops the fold:
//! the merge is aborted, the partial integration branch keeps every branch
//! merged so far, and the remaining branches are reported as unmerged.
//! Conflicts are never resolved automatically.
//!
//! The integration worktree is acquired through the lifecycle registry like
//! any subtask environment, so a cancelled merge is swept with its task.

use quorum_core::{
    integration_branch_for, integration_environment_for, EnvironmentSpec, MergeResult,
    QuorumError, Result, TaskId,
};
use quorum_vcs::{count_conflict_hunks, MergeAttempt, VersionControl};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::registry::{LifecycleRegistry, ReleaseOutcome};

pub struct BranchMerger<V: VersionControl + ?Sized> {
    vcs: Arc<V>,
    registry: Arc<LifecycleRegistry>,
    environment_prefix: String,
}

impl<V: VersionControl + ?Sized> BranchMerger<V> {
    pub fn new(
        vcs: Arc<V>,
        registry: Arc<LifecycleRegistry>,
        environment_prefix: impl Into<String>,
    ) -> Self {
        Self {
            vcs,
            registry,
            environment_prefix: environment_prefix.into(),
        }
    }

    /// Merge `branches` in order onto `quorum/<task>/integration`, cut from `base`
    ///
    /// The same inputs against the same repository state always produce the
    /// same result.
    pub async fn merge(&self, task_id: &TaskId, base: &str, branches: &[String]) -> Result<MergeResult> {
        if branches.is_empty() {
            return Err(QuorumError::Branch("no branches to merge".to_string()));
        }

        let integration = integration_branch_for(task_id);
        let spec = EnvironmentSpec {
            name: integration_environment_for(&self.environment_prefix, task_id),
            branch: integration.clone(),
            base_branch: base.to_string(),
        };

        let handle = self.registry.acquire(task_id, None, &spec).await?;
        let result = self
            .fold(task_id, base, branches, &integration, &handle.environment.path)
            .await;

        if let ReleaseOutcome::Failed(e) = self.registry.release(&handle.id).await {
            warn!("Could not remove integration worktree {}: {}", handle.environment.name, e);
        }

        result
    }

    async fn fold(
        &self,
        task_id: &TaskId,
        base: &str,
        branches: &[String],
        integration: &str,
        dir: &Path,
    ) -> Result<MergeResult> {
        let mut merged = Vec::with_capacity(branches.len());

        for (position, branch) in branches.iter().enumerate() {
            let message = format!("quorum: merge {} into {}", branch, integration);

            match self.vcs.merge(dir, branch, &message).await? {
                MergeAttempt::Clean => {
                    debug!("Merged {} into {}", branch, integration);
                    merged.push(branch.clone());
                }
                MergeAttempt::Conflicted(files) => {
                    let hunks = self.count_hunks(dir, &files).await;

                    if let Err(e) = self.vcs.abort_merge(dir).await {
                        warn!("git merge --abort failed in {}: {}", dir.display(), e);
                    }

                    warn!(
                        "Conflict merging {} into {}: {} file(s), {} hunk(s)",
                        branch,
                        integration,
                        files.len(),
                        hunks.values().sum::<usize>()
                    );

                    let unmerged = branches[position..].to_vec();
                    return Ok(MergeResult::conflicted(
                        task_id.clone(),
                        base,
                        merged,
                        files,
                        integration,
                        unmerged,
                    )?
                    .with_conflict_hunks(hunks));
                }
            }
        }

        info!("Merged {} branch(es) into {}", merged.len(), integration);
        Ok(MergeResult::clean(task_id.clone(), base, merged, integration))
    }

    async fn count_hunks(&self, dir: &Path, files: &[String]) -> BTreeMap<String, usize> {
        let mut hunks = BTreeMap::new();
        for file in files {
            let count = match self.vcs.read_file(dir, file).await {
                Ok(content) => count_conflict_hunks(&content),
                Err(e) => {
                    debug!("Could not read conflicted {}: {}", file, e);
                    0
                }
            };
            hunks.insert(file.clone(), count);
        }
        hunks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provisioner::WorktreeProvisioner;
    use crate::testing::{FakeRepo, FakeVcs};
    use quorum_core::MergeStatus;
    use quorum_vcs::{GitBackend, GitCommand};
    use std::time::Duration;

    fn branches(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn merger(repo: &FakeRepo) -> BranchMerger<FakeVcs> {
        BranchMerger::new(repo.vcs.clone(), repo.registry.clone(), "quorum")
    }

    #[tokio::test]
    async fn test_disjoint_branches_merge_clean() {
        let repo = FakeRepo::new(
            FakeVcs::new()
                .edit("a", "src/lib.rs", 1..=5)
                .edit("b", "src/lib.rs", 10..=12)
                .edit("b", "src/parser.rs", [3]),
        );
        let task = TaskId::new("t-1");

        let result = merger(&repo)
            .merge(&task, "main", &branches(&["a", "b"]))
            .await
            .unwrap();

        assert_eq!(result.status, MergeStatus::Clean);
        assert_eq!(result.merged_branches, branches(&["a", "b"]));
        assert_eq!(result.merged_branch_name.as_deref(), Some("quorum/t-1/integration"));
        assert!(result.conflicted_files.is_empty());
        assert_eq!(repo.vcs.edits("quorum/t-1/integration").len(), 2);
        repo.assert_clean();
    }

    #[tokio::test]
    async fn test_overlap_stops_at_first_conflict() {
        let repo = FakeRepo::new(
            FakeVcs::new()
                .edit("a", "src/lib.rs", 10..=20)
                .edit("b", "src/lib.rs", 15..=25)
                .edit("c", "src/parser.rs", [1]),
        );
        let task = TaskId::new("t-1");

        let result = merger(&repo)
            .merge(&task, "main", &branches(&["a", "b", "c"]))
            .await
            .unwrap();

        assert_eq!(result.status, MergeStatus::Conflicted);
        assert_eq!(result.conflicted_files, vec!["src/lib.rs"]);
        assert_eq!(result.merged_branch_name, None);
        assert_eq!(result.merged_branches, branches(&["a"]));
        assert_eq!(result.unmerged_branches, branches(&["b", "c"]));
        assert_eq!(result.partial_branch.as_deref(), Some("quorum/t-1/integration"));
        assert_eq!(result.conflict_hunks.get("src/lib.rs"), Some(&1));
        // c was never attempted
        assert_eq!(repo.vcs.merged(), vec!["a"]);
        repo.assert_clean();
    }

    #[tokio::test]
    async fn test_same_inputs_same_result() {
        let make = || {
            FakeRepo::new(
                FakeVcs::new()
                    .edit("a", "src/lib.rs", [1, 2])
                    .edit("b", "src/lib.rs", [2, 3]),
            )
        };
        let task = TaskId::new("t-1");
        let input = branches(&["a", "b"]);

        let (one, two) = (make(), make());
        let first = merger(&one).merge(&task, "main", &input).await.unwrap();
        let second = merger(&two).merge(&task, "main", &input).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_rerun_resets_integration_branch() {
        let repo = FakeRepo::new(FakeVcs::new().edit("a", "src/lib.rs", [1]));
        let task = TaskId::new("t-1");
        let m = merger(&repo);

        m.merge(&task, "main", &branches(&["a"])).await.unwrap();
        let again = m.merge(&task, "main", &branches(&["a"])).await.unwrap();
        assert_eq!(again.status, MergeStatus::Clean);
        repo.assert_clean();
    }

    #[tokio::test]
    async fn test_empty_branch_list_is_an_error() {
        let repo = FakeRepo::new(FakeVcs::new());
        assert!(merger(&repo).merge(&TaskId::new("t-1"), "main", &[]).await.is_err());
        repo.assert_clean();
    }

    #[tokio::test]
    async fn test_integration_worktree_is_registered_while_merging() {
        let repo = FakeRepo::new(
            FakeVcs::new()
                .edit("a", "src/lib.rs", [1])
                .with_merge_delay(Duration::from_secs(60)),
        );
        let task = TaskId::new("t-1");
        let m = merger(&repo);

        let interrupted = tokio::time::timeout(
            Duration::from_millis(200),
            m.merge(&task, "main", &branches(&["a"])),
        )
        .await;
        assert!(interrupted.is_err());

        let active = repo.registry.active_handles();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].environment.name, "quorum-t-1-integration");
        assert_eq!(active[0].owner_task_id, task);
        assert_eq!(repo.vcs.live_worktrees().len(), 1);

        let report = repo.registry.release_task(&task).await;
        assert_eq!(report.released_count, 1);
        repo.assert_clean();
    }

    fn git(dir: &Path, args: &[&str]) {
        let status = std::process::Command::new("git")
            .args(args)
            .current_dir(dir)
            .output()
            .unwrap();
        assert!(status.status.success(), "git {:?}: {}", args, String::from_utf8_lossy(&status.stderr));
    }

    fn commit_file(dir: &Path, path: &str, content: &str, message: &str) {
        std::fs::write(dir.join(path), content).unwrap();
        git(dir, &["add", "-A"]);
        git(dir, &["commit", "-q", "-m", message]);
    }

    #[tokio::test]
    async fn test_conflict_in_real_repository() {
        let tmp = tempfile::tempdir().unwrap();
        let repo_dir = tmp.path().join("repo");
        std::fs::create_dir_all(repo_dir.join("src")).unwrap();
        git(&repo_dir, &["init", "-q", "-b", "main"]);
        git(&repo_dir, &["config", "user.name", "Quorum Test"]);
        git(&repo_dir, &["config", "user.email", "quorum@example.com"]);
        commit_file(&repo_dir, "src/lib.rs", "one\ntwo\nthree\n", "base");

        for (branch, content) in [
            ("quorum/t-1/subtask-0", "one\nTWO from a\nthree\n"),
            ("quorum/t-1/subtask-1", "one\nTWO from b\nthree\n"),
        ] {
            git(&repo_dir, &["checkout", "-q", "-b", branch, "main"]);
            commit_file(&repo_dir, "src/lib.rs", content, branch);
        }
        git(&repo_dir, &["checkout", "-q", "-b", "quorum/t-1/subtask-2", "main"]);
        commit_file(&repo_dir, "README.md", "notes\n", "docs");
        git(&repo_dir, &["checkout", "-q", "main"]);

        let vcs = Arc::new(GitBackend::new(GitCommand::new(&repo_dir)));
        let provisioner = Arc::new(WorktreeProvisioner::new(vcs.clone(), tmp.path().join("worktrees")));
        let registry = Arc::new(LifecycleRegistry::new(provisioner));
        let merger = BranchMerger::new(vcs.clone(), registry.clone(), "quorum");
        let task = TaskId::new("t-1");
        let input = branches(&[
            "quorum/t-1/subtask-0",
            "quorum/t-1/subtask-1",
            "quorum/t-1/subtask-2",
        ]);

        let result = merger.merge(&task, "main", &input).await.unwrap();

        assert_eq!(result.status, MergeStatus::Conflicted);
        assert_eq!(result.conflicted_files, vec!["src/lib.rs"]);
        assert_eq!(result.merged_branches, branches(&["quorum/t-1/subtask-0"]));
        assert_eq!(
            result.unmerged_branches,
            branches(&["quorum/t-1/subtask-1", "quorum/t-1/subtask-2"])
        );
        assert_eq!(result.partial_branch.as_deref(), Some("quorum/t-1/integration"));
        assert_eq!(result.conflict_hunks.get("src/lib.rs"), Some(&1));

        // integration worktree gone, branch kept with the first merge on it
        assert_eq!(registry.active_count(), 0);
        assert!(!tmp.path().join("worktrees").join("quorum-t-1-integration").exists());
        let partial = std::process::Command::new("git")
            .args(["show", "quorum/t-1/integration:src/lib.rs"])
            .current_dir(&repo_dir)
            .output()
            .unwrap();
        assert_eq!(String::from_utf8_lossy(&partial.stdout), "one\nTWO from a\nthree\n");
    }
}
