//! Task orchestration
//!
//! A task is planned, provisioned, executed and reviewed, then either
//! completes, fails or is cancelled. Single-subtask plans run a bounded
//! architect → coder → reviewer round loop with direct dialogues when one
//! role questions another. Multi-subtask plans fan out on separate branches
//! and are folded back by the merger. Whatever happens, every handle the
//! task acquired is released before `run` returns.

use quorum_agent::{build_caller, AgentCaller};
use quorum_consensus::{ConsensusEngine, ConversationLog};
use quorum_core::{
    fail_open, QuorumConfig, QuorumError, ResourceHandle, Result, Role, Subtask, TaskId,
    TaskStatus,
};
use quorum_planning::{ExecutionMode, HeuristicPlanner, Planner, PromptBuilder, TemplatePromptBuilder};
use quorum_vcs::VersionControl;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::dialogue::DialogueSession;
use crate::execution::ExecutionUnit;
use crate::merger::BranchMerger;
use crate::parallel::ParallelEngine;
use crate::registry::LifecycleRegistry;
use crate::store::{FileTaskStore, StoreSink, TaskStore};
use crate::task::{DialogueRecord, Task};

/// The pluggable parts of an orchestrator
///
/// The registry is shared with whoever else must be able to sweep it, such
/// as the termination handlers.
pub struct Collaborators {
    pub vcs: Arc<dyn VersionControl>,
    pub registry: Arc<LifecycleRegistry>,
    pub planner: Arc<dyn Planner>,
    pub caller: Arc<dyn AgentCaller>,
    pub prompts: Arc<dyn PromptBuilder>,
    pub store: Arc<dyn TaskStore>,
}

pub struct Orchestrator {
    config: QuorumConfig,
    repo_root: PathBuf,
    registry: Arc<LifecycleRegistry>,
    vcs: Arc<dyn VersionControl>,
    planner: Arc<dyn Planner>,
    caller: Arc<dyn AgentCaller>,
    prompts: Arc<dyn PromptBuilder>,
    store: Arc<dyn TaskStore>,
    engine: ConsensusEngine,
    cancel: CancellationToken,
}

impl Orchestrator {
    pub fn new(config: QuorumConfig, repo_root: impl Into<PathBuf>, parts: Collaborators) -> Result<Self> {
        config.validate()?;
        let engine = ConsensusEngine::new(&config.phrases, config.orchestration.lookback)?;

        Ok(Self {
            repo_root: repo_root.into(),
            config,
            registry: parts.registry,
            vcs: parts.vcs,
            planner: parts.planner,
            caller: parts.caller,
            prompts: parts.prompts,
            store: parts.store,
            engine,
            cancel: CancellationToken::new(),
        })
    }

    /// Orchestrator over `repo_root` with the heuristic planner, the configured
    /// agent caller and tasks persisted under `.quorum/`
    pub fn open(
        config: QuorumConfig,
        repo_root: impl Into<PathBuf>,
        vcs: Arc<dyn VersionControl>,
        registry: Arc<LifecycleRegistry>,
    ) -> Result<Self> {
        let repo_root = repo_root.into();
        let parts = Collaborators {
            planner: Arc::new(HeuristicPlanner::new(config.timeouts.clone())),
            caller: build_caller(&config.agent, config.orchestration.termination_grace()),
            prompts: Arc::new(TemplatePromptBuilder::new()),
            store: Arc::new(FileTaskStore::for_repo(&repo_root)),
            registry,
            vcs,
        };
        Self::new(config, repo_root, parts)
    }

    pub fn config(&self) -> &QuorumConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<LifecycleRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<dyn TaskStore> {
        &self.store
    }

    /// Cancelling this token cancels every task this orchestrator runs
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run a new task to a terminal status
    pub async fn run(&self, description: &str) -> Task {
        self.run_task(TaskId::generate(), description).await
    }

    pub async fn run_task(&self, id: TaskId, description: &str) -> Task {
        info!("Starting task {}: {}", id, description);
        let mut task = Task::new(id.clone(), description, &self.repo_root);

        let log = ConversationLog::new().with_sink(Arc::new(StoreSink(self.store.clone())));
        let unit = Arc::new(
            ExecutionUnit::new(
                id.clone(),
                description,
                self.registry.clone(),
                self.vcs.clone(),
                self.caller.clone(),
                log,
                self.cancel.child_token(),
            )
            .with_prompts(self.prompts.clone())
            .with_settings(&self.config.orchestration, &self.config.timeouts),
        );

        self.persist(&task).await;

        match self.drive(&mut task, &unit).await {
            Ok(()) => {}
            Err(QuorumError::Cancelled) => task.cancel("cancelled"),
            Err(e) => {
                warn!("Task {} failed: {}", id, e);
                task.fail(e.to_string());
            }
        }

        let report = self.registry.release_task(&id).await;
        for failure in &report.failures {
            warn!(
                "Task {} left {} behind: {}",
                id, failure.environment, failure.error
            );
        }

        self.persist(&task).await;
        info!(
            "Task {} {} ({}): {} tokens",
            id,
            task.status(),
            task.terminal_reason.as_deref().unwrap_or("-"),
            task.usage.total()
        );
        task
    }

    /// The persisted record of a task
    pub async fn status(&self, id: &TaskId) -> Result<Option<Task>> {
        self.store.load(id).await
    }

    async fn persist(&self, task: &Task) {
        fail_open("task_store", || self.store.save(task)).await;
    }

    async fn advance(&self, task: &mut Task, to: TaskStatus, note: Option<String>) -> Result<()> {
        task.transition(to, note)?;
        self.persist(task).await;
        Ok(())
    }

    fn check_cancelled(unit: &ExecutionUnit) -> Result<()> {
        if unit.cancel_token().is_cancelled() {
            return Err(QuorumError::Cancelled);
        }
        Ok(())
    }

    async fn drive(&self, task: &mut Task, unit: &Arc<ExecutionUnit>) -> Result<()> {
        self.advance(task, TaskStatus::Planning, None).await?;

        let snapshot = self.vcs.snapshot().await?;
        let plan = self.planner.plan(&task.description, &snapshot).await?;
        plan.validate()?;

        let mode = plan.mode();
        task.mode = Some(mode);
        task.complexity = Some(plan.complexity);
        task.subtasks = plan
            .subtasks
            .into_iter()
            .enumerate()
            .map(|(idx, spec)| Subtask::new(&task.id, idx, spec.description, spec.roles))
            .collect();

        Self::check_cancelled(unit)?;
        let note = format!("{} subtask(s), {:?}", task.subtasks.len(), mode).to_lowercase();
        self.advance(task, TaskStatus::Provisioning, Some(note)).await?;

        match mode {
            ExecutionMode::Sequential => self.run_sequential(task, unit).await,
            ExecutionMode::Parallel => self.run_parallel(task, unit).await,
        }
    }

    async fn run_sequential(&self, task: &mut Task, unit: &ExecutionUnit) -> Result<()> {
        let handle = unit.acquire(&task.subtasks[0]).await?;
        task.record_handle(handle.id.clone());
        task.subtasks[0].resolve_handle(handle.id.clone());
        let subtask = task.subtasks[0].clone();

        self.advance(task, TaskStatus::Executing, None).await?;

        let max_rounds = self.config.orchestration.max_rounds;
        let mut last_reason = String::from("no rounds run");

        for round in 1..=max_rounds {
            if round > 1 {
                let note = format!("round {}: {}", round, last_reason);
                self.advance(task, TaskStatus::Executing, Some(note)).await?;
            }
            task.rounds = round;

            for assignment in &subtask.roles {
                if assignment.role == Role::Reviewer && task.status() == TaskStatus::Executing {
                    self.advance(task, TaskStatus::Reviewing, None).await?;
                }

                let step = unit
                    .run_role(&subtask, &handle, assignment, round, max_rounds, None)
                    .await?;
                task.add_usage(&step.usage);

                self.open_dialogue(task, unit, &subtask, &handle, round, max_rounds)
                    .await?;
            }

            if task.status() == TaskStatus::Executing {
                self.advance(task, TaskStatus::Reviewing, None).await?;
            }
            unit.commit(&subtask, &handle, round).await?;

            let decision = self
                .engine
                .should_continue_collaboration(&unit.log().entries());
            if !decision.should_continue {
                let note = format!("{} after {} round(s)", decision.reason, round);
                return self.advance(task, TaskStatus::Completed, Some(note)).await;
            }
            info!("Round {} of {}: {}", round, max_rounds, decision.reason);
            last_reason = decision.reason;
        }

        Err(QuorumError::Other(format!(
            "no consensus after {} rounds: {}",
            max_rounds, last_reason
        )))
    }

    /// Run a direct dialogue if the latest step left a question open
    async fn open_dialogue(
        &self,
        task: &mut Task,
        unit: &ExecutionUnit,
        subtask: &Subtask,
        handle: &ResourceHandle,
        round: usize,
        max_rounds: usize,
    ) -> Result<()> {
        let Some(request) = self.engine.needs_direct_dialogue(&unit.log().entries()) else {
            return Ok(());
        };

        let session = DialogueSession {
            unit,
            engine: &self.engine,
            subtask,
            handle,
        };
        let outcome = session
            .run(
                &request,
                round,
                max_rounds,
                self.config.orchestration.max_dialogue_rounds,
            )
            .await?;

        task.add_usage(&outcome.usage);
        task.dialogues.push(DialogueRecord {
            round,
            asker: request.agent_a,
            addressee: request.agent_b,
            reason: request.reason,
            rounds: outcome.rounds,
            consensus: outcome.consensus,
        });
        Ok(())
    }

    async fn run_parallel(&self, task: &mut Task, unit: &Arc<ExecutionUnit>) -> Result<()> {
        let settings = &self.config.orchestration;
        self.advance(task, TaskStatus::Executing, None).await?;

        let report = ParallelEngine::new(settings.max_concurrency)
            .run(unit.clone(), task.subtasks.clone())
            .await;

        for result in &report.results {
            task.add_usage(&result.usage);
            if let Some(handle_id) = &result.handle_id {
                task.record_handle(handle_id.clone());
                if let Some(subtask) = task.subtasks.get_mut(result.index) {
                    subtask.resolve_handle(handle_id.clone());
                }
            }
        }
        task.subtask_results = report.results.clone();
        Self::check_cancelled(unit)?;

        self.advance(task, TaskStatus::Reviewing, None).await?;

        let entries = unit.log().entries();
        let mut approved = Vec::new();
        let mut problems = Vec::new();
        for result in &report.results {
            if !result.succeeded() {
                problems.push(format!(
                    "subtask {} {}: {}",
                    result.index,
                    result.status,
                    result.reason.as_deref().unwrap_or("no reason given")
                ));
                continue;
            }

            let own: Vec<_> = entries
                .iter()
                .filter(|e| e.subtask_id.as_ref() == Some(&result.subtask_id))
                .cloned()
                .collect();
            let decision = self.engine.should_continue_collaboration(&own);
            if decision.should_continue {
                problems.push(format!(
                    "subtask {} not approved: {}",
                    result.index, decision.reason
                ));
            } else {
                approved.push(result.branch_name.clone());
            }
        }

        if approved.is_empty() {
            return Err(QuorumError::Other(format!(
                "no subtask produced an approved branch: {}",
                problems.join("; ")
            )));
        }

        let note = format!("merging {} branch(es)", approved.len());
        self.advance(task, TaskStatus::Merging, Some(note)).await?;

        let merger = BranchMerger::new(
            self.vcs.clone(),
            self.registry.clone(),
            &settings.environment_prefix,
        );
        // A cancelled merge leaves its integration handle for release_task
        let merge = tokio::select! {
            _ = unit.cancel_token().cancelled() => return Err(QuorumError::Cancelled),
            merge = merger.merge(&task.id, &settings.base_branch, &approved) => merge?,
        };
        let summary = merge.summary();
        let conflicted = merge.is_conflicted();
        task.merge_result = Some(merge);

        if conflicted || !problems.is_empty() {
            problems.insert(0, summary);
            return Err(QuorumError::Other(problems.join("; ")));
        }

        self.advance(task, TaskStatus::Completed, Some(summary)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::SubtaskStatus;
    use crate::state_machine::TaskStateMachine;
    use crate::store::MemoryTaskStore;
    use crate::testing::{FakeRepo, FakeVcs};
    use quorum_agent::ScriptedCaller;
    use quorum_core::{MergeStatus, RoleAssignment, Usage};
    use quorum_planning::{Complexity, FixedPlanner, Plan, SubtaskSpec};
    use std::time::Duration;

    struct Harness {
        orchestrator: Orchestrator,
        caller: Arc<ScriptedCaller>,
        repo: FakeRepo,
        store: Arc<MemoryTaskStore>,
    }

    fn plan(parts: &[&str], roles: &[Role]) -> Plan {
        Plan {
            subtasks: parts
                .iter()
                .map(|d| SubtaskSpec {
                    description: d.to_string(),
                    roles: roles.iter().map(|r| RoleAssignment::new(*r)).collect(),
                })
                .collect(),
            complexity: Complexity::Low,
        }
    }

    fn harness_with(
        plan: Plan,
        caller: ScriptedCaller,
        vcs: FakeVcs,
        config: QuorumConfig,
    ) -> Harness {
        let caller = Arc::new(caller);
        let repo = FakeRepo::new(vcs);
        let store = Arc::new(MemoryTaskStore::new());
        let parts = Collaborators {
            vcs: repo.vcs.clone(),
            registry: repo.registry.clone(),
            planner: Arc::new(FixedPlanner::new(plan)),
            caller: caller.clone(),
            prompts: Arc::new(TemplatePromptBuilder::new()),
            store: store.clone(),
        };
        Harness {
            orchestrator: Orchestrator::new(config, "/fake", parts).unwrap(),
            caller,
            repo,
            store,
        }
    }

    fn harness(plan: Plan, caller: ScriptedCaller) -> Harness {
        harness_with(plan, caller, FakeVcs::new(), QuorumConfig::default())
    }

    fn sequential_plan() -> Plan {
        plan(
            &["Add a length helper to the parser"],
            &[Role::Architect, Role::Coder, Role::Reviewer],
        )
    }

    fn assert_clean_shutdown(h: &Harness) {
        assert!(Arc::ptr_eq(h.orchestrator.registry(), &h.repo.registry));
        h.repo.assert_clean();
    }

    #[tokio::test]
    async fn test_sequential_completes_after_one_round() {
        let caller = ScriptedCaller::new()
            .reply(Role::Architect, "Plan: add fn len() to the parser.")
            .reply(Role::Coder, "Implemented len() with tests.")
            .reply(Role::Reviewer, "Approved")
            .with_usage(Usage {
                input_tokens: 10,
                output_tokens: 5,
            });
        let h = harness(sequential_plan(), caller);

        let task = h.orchestrator.run("Add a length helper").await;

        assert_eq!(task.status(), TaskStatus::Completed);
        assert_eq!(task.rounds, 1);
        assert!(task.terminal_reason.as_deref().unwrap().contains("reviewer approved"));
        assert_eq!(
            h.caller.call_order(),
            vec![Role::Architect, Role::Coder, Role::Reviewer]
        );
        assert_eq!(task.usage.total(), 45);
        assert_eq!(task.resource_handle_ids.len(), 1);
        assert!(TaskStateMachine::is_valid_walk(task.history()));
        assert_clean_shutdown(&h);

        let stored = h.orchestrator.status(&task.id).await.unwrap().unwrap();
        assert_eq!(stored.status(), TaskStatus::Completed);
        assert_eq!(h.store.conversation(&task.id).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_direct_dialogue_resolves_within_round() {
        let caller = ScriptedCaller::new()
            .reply(Role::Architect, "Plan: use X for the buffer.")
            .reply(Role::Coder, "Implemented the buffer with X.")
            .reply(Role::Reviewer, "I'm not sure why you used X")
            .reply(Role::Coder, "X avoids an extra allocation.")
            .reply(Role::Reviewer, "Approved");
        let h = harness(sequential_plan(), caller);

        let task = h.orchestrator.run("Add a buffer").await;

        assert_eq!(task.status(), TaskStatus::Completed);
        assert_eq!(task.rounds, 1);
        assert_eq!(task.dialogues.len(), 1);
        let dialogue = &task.dialogues[0];
        assert_eq!((dialogue.asker, dialogue.addressee), (Role::Reviewer, Role::Coder));
        assert_eq!(dialogue.rounds, 1);
        assert!(dialogue.consensus);
        assert_eq!(
            h.caller.call_order(),
            vec![Role::Architect, Role::Coder, Role::Reviewer, Role::Coder, Role::Reviewer]
        );
        assert_clean_shutdown(&h);
    }

    #[tokio::test]
    async fn test_exhausted_rounds_fail_the_task() {
        let caller = ScriptedCaller::new()
            .fallback(Role::Architect, "Plan: keep going.")
            .fallback(Role::Coder, "Updated the parser.")
            .fallback(Role::Reviewer, "Not approved: the parser still drops input.");
        let mut config = QuorumConfig::default();
        config.orchestration.max_rounds = 2;
        let h = harness_with(
            sequential_plan(),
            caller,
            FakeVcs::new(),
            config,
        );

        let task = h.orchestrator.run("Fix the parser").await;

        assert_eq!(task.status(), TaskStatus::Failed);
        assert_eq!(task.rounds, 2);
        assert!(task
            .terminal_reason
            .as_deref()
            .unwrap()
            .starts_with("no consensus after 2 rounds"));
        assert_eq!(h.caller.call_order().len(), 6);
        // reviewing -> executing happened between the rounds
        assert!(task
            .history()
            .iter()
            .any(|r| r.from == TaskStatus::Reviewing && r.to == TaskStatus::Executing));
        assert!(TaskStateMachine::is_valid_walk(task.history()));
        assert_clean_shutdown(&h);
    }

    #[tokio::test]
    async fn test_parallel_conflict_fails_with_files_and_branches() {
        let task_id = TaskId::new("t-merge");
        let vcs = FakeVcs::new()
            .work("quorum/t-merge/subtask-0", "src/lib.rs", 10..=20)
            .work("quorum/t-merge/subtask-1", "src/lib.rs", 15..=25);
        let caller = ScriptedCaller::new()
            .fallback(Role::Coder, "Done.")
            .fallback(Role::Reviewer, "Approved");
        let h = harness_with(
            plan(&["left half", "right half"], &[Role::Coder, Role::Reviewer]),
            caller,
            vcs,
            QuorumConfig::default(),
        );

        let task = h.orchestrator.run_task(task_id, "Split work").await;

        assert_eq!(task.status(), TaskStatus::Failed);
        let reason = task.terminal_reason.clone().unwrap();
        assert!(reason.contains("src/lib.rs"), "{}", reason);
        assert!(reason.contains("quorum/t-merge/subtask-1"), "{}", reason);

        let merge = task.merge_result.as_ref().unwrap();
        assert_eq!(merge.status, MergeStatus::Conflicted);
        assert_eq!(merge.conflicted_files, vec!["src/lib.rs"]);
        assert_eq!(merge.merged_branch_name, None);
        assert_eq!(merge.merged_branches, vec!["quorum/t-merge/subtask-0"]);
        assert_eq!(task.resource_handle_ids.len(), 2);
        assert_clean_shutdown(&h);
    }

    #[tokio::test]
    async fn test_parallel_clean_merge_completes() {
        let vcs = FakeVcs::new()
            .work("quorum/t-clean/subtask-0", "src/lib.rs", [1, 2])
            .work("quorum/t-clean/subtask-1", "src/parser.rs", [7]);
        let caller = ScriptedCaller::new()
            .fallback(Role::Coder, "Done.")
            .fallback(Role::Reviewer, "LGTM");
        let h = harness_with(
            plan(&["lib", "parser"], &[Role::Coder, Role::Reviewer]),
            caller,
            vcs,
            QuorumConfig::default(),
        );

        let task = h.orchestrator.run_task(TaskId::new("t-clean"), "Two parts").await;

        assert_eq!(task.status(), TaskStatus::Completed, "{:?}", task.terminal_reason);
        let merge = task.merge_result.as_ref().unwrap();
        assert_eq!(merge.merged_branch_name.as_deref(), Some("quorum/t-clean/integration"));
        assert!(task
            .history()
            .iter()
            .any(|r| r.to == TaskStatus::Merging));
        assert_eq!(task.subtask_results.len(), 2);
        assert_clean_shutdown(&h);
    }

    #[tokio::test]
    async fn test_parallel_partial_failure_merges_survivors_then_fails() {
        let vcs = FakeVcs::new()
            .work("quorum/t-part/subtask-0", "src/lib.rs", [1])
            .work("quorum/t-part/subtask-1", "src/parser.rs", [1]);
        let caller = ScriptedCaller::new()
            .fail(Role::Coder, quorum_agent::AgentError::permanent("model refused"))
            .fallback(Role::Coder, "Done.")
            .fallback(Role::Reviewer, "Approved");
        let mut config = QuorumConfig::default();
        config.orchestration.max_concurrency = 1;
        let h = harness_with(
            plan(&["lib", "parser"], &[Role::Coder, Role::Reviewer]),
            caller,
            vcs,
            config,
        );

        let task = h.orchestrator.run_task(TaskId::new("t-part"), "Two parts").await;

        assert_eq!(task.status(), TaskStatus::Failed);
        assert_eq!(task.subtask_results[0].status, SubtaskStatus::Failure);
        let merge = task.merge_result.as_ref().unwrap();
        assert_eq!(merge.merged_branches, vec!["quorum/t-part/subtask-1"]);
        assert!(task
            .terminal_reason
            .as_deref()
            .unwrap()
            .contains("subtask 0 failure"));
        assert_clean_shutdown(&h);
    }

    #[tokio::test]
    async fn test_provisioning_failure_fails_task() {
        let task_id = TaskId::new("t-prov");
        let h = harness_with(
            sequential_plan(),
            ScriptedCaller::new(),
            FakeVcs::new().with_failing_worktree("quorum-t-prov-0"),
            QuorumConfig::default(),
        );

        let task = h.orchestrator.run_task(task_id, "anything").await;

        assert_eq!(task.status(), TaskStatus::Failed);
        assert!(task
            .terminal_reason
            .as_deref()
            .unwrap()
            .contains("provisioning failed"));
        assert!(h.caller.call_order().is_empty());
        assert_clean_shutdown(&h);
    }

    #[tokio::test(start_paused = true)]
    async fn test_agent_timeout_fails_task_and_releases() {
        let roles = vec![RoleAssignment::new(Role::Coder).with_timeout(Duration::from_secs(5))];
        let plan = Plan {
            subtasks: vec![SubtaskSpec {
                description: "slow".to_string(),
                roles,
            }],
            complexity: Complexity::Low,
        };
        let caller = ScriptedCaller::new()
            .reply(Role::Coder, "never")
            .delay(Role::Coder, Duration::from_secs(3600));
        let h = harness(plan, caller);

        let task = h.orchestrator.run("slow task").await;

        assert_eq!(task.status(), TaskStatus::Failed);
        assert!(task.terminal_reason.as_deref().unwrap().contains("timed out"));
        assert_clean_shutdown(&h);
    }

    #[tokio::test]
    async fn test_cancelled_orchestrator_cancels_task() {
        let h = harness(sequential_plan(), ScriptedCaller::new());
        h.orchestrator.cancellation_token().cancel();

        let task = h.orchestrator.run("anything").await;

        assert_eq!(task.status(), TaskStatus::Cancelled);
        assert!(h.caller.call_order().is_empty());
        assert_clean_shutdown(&h);
    }

    #[tokio::test]
    async fn test_every_transition_is_persisted() {
        let caller = ScriptedCaller::new()
            .reply(Role::Architect, "Plan: small change.")
            .reply(Role::Coder, "Done.")
            .reply(Role::Reviewer, "Approved");
        let h = harness(sequential_plan(), caller);

        let task = h.orchestrator.run("small").await;

        // initial save + one per transition + final save
        assert_eq!(h.store.save_count(), task.history().len() + 2);
    }

    #[tokio::test]
    async fn test_cancel_during_merge_releases_integration_worktree() {
        let vcs = FakeVcs::new()
            .work("quorum/t-slow/subtask-0", "src/lib.rs", [1])
            .work("quorum/t-slow/subtask-1", "src/parser.rs", [1])
            .with_merge_delay(Duration::from_secs(60));
        let caller = ScriptedCaller::new()
            .fallback(Role::Coder, "Done.")
            .fallback(Role::Reviewer, "Approved");
        let h = harness_with(
            plan(&["lib", "parser"], &[Role::Coder, Role::Reviewer]),
            caller,
            vcs,
            QuorumConfig::default(),
        );

        let token = h.orchestrator.cancellation_token();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            token.cancel();
        });

        let task = tokio::time::timeout(
            Duration::from_secs(10),
            h.orchestrator.run_task(TaskId::new("t-slow"), "Two parts"),
        )
        .await
        .expect("cancel did not interrupt the merge");

        assert_eq!(task.status(), TaskStatus::Cancelled);
        assert!(task
            .history()
            .iter()
            .any(|r| r.from == TaskStatus::Merging && r.to == TaskStatus::Cancelled));
        assert!(task.merge_result.is_none());
        assert!(h.repo.vcs.merged().is_empty());
        assert_clean_shutdown(&h);
    }

    #[tokio::test]
    async fn test_registry_is_shared_with_caller() {
        let caller = ScriptedCaller::new()
            .reply(Role::Architect, "Plan: small change.")
            .reply(Role::Coder, "Done.")
            .reply(Role::Reviewer, "Approved");
        let h = harness(sequential_plan(), caller);

        // another owner's environment in the same registry is left alone
        let other = h
            .repo
            .registry
            .acquire(
                &TaskId::new("t-other"),
                None,
                &quorum_core::EnvironmentSpec {
                    name: "quorum-t-other-0".to_string(),
                    branch: "quorum/t-other/subtask-0".to_string(),
                    base_branch: "main".to_string(),
                },
            )
            .await
            .unwrap();

        let task = h.orchestrator.run("small").await;
        assert_eq!(task.status(), TaskStatus::Completed);
        assert_eq!(h.orchestrator.registry().active_handles(), vec![other.clone()]);

        // a sweep through the shared registry reaches it
        let report = h.repo.registry.release_all().await;
        assert_eq!(report.released_count, 1);
        assert_clean_shutdown(&h);
    }

    #[test]
    fn test_zero_limits_are_rejected() {
        let mut config = QuorumConfig::default();
        config.orchestration.max_dialogue_rounds = 0;
        let repo = FakeRepo::new(FakeVcs::new());
        let parts = Collaborators {
            vcs: repo.vcs.clone(),
            registry: repo.registry.clone(),
            planner: Arc::new(FixedPlanner::new(sequential_plan())),
            caller: Arc::new(ScriptedCaller::new()),
            prompts: Arc::new(TemplatePromptBuilder::new()),
            store: Arc::new(MemoryTaskStore::new()),
        };

        let err = Orchestrator::new(config, "/fake", parts).err().unwrap();
        assert!(matches!(err, QuorumError::Config(_)), "{}", err);
    }
}
