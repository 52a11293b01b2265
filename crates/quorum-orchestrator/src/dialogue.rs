//! Direct two-role exchanges
//!
//! When one role asks another a question, the round loop pauses and the two
//! talk directly: the addressee answers, the asker responds, and the
//! consensus engine is consulted after every message. The exchange ends on
//! agreement or after a fixed number of rounds, whichever comes first.

use quorum_consensus::{CollaborationDecision, ConsensusEngine, DialogueRequest};
use quorum_core::{bounded_iterate, Backoff, ResourceHandle, Role, Subtask, Usage};
use quorum_planning::DialogueTurn;
use tracing::{debug, info};

use crate::execution::{ExecutionUnit, StepError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DialogueOutcome {
    /// Dialogue rounds run
    pub rounds: usize,
    pub consensus: bool,
    pub decision: CollaborationDecision,
    pub usage: Usage,
}

struct DialogueRound {
    decision: CollaborationDecision,
    usage: Usage,
}

/// One subtask's environment, ready to host an exchange
pub struct DialogueSession<'a> {
    pub unit: &'a ExecutionUnit,
    pub engine: &'a ConsensusEngine,
    pub subtask: &'a Subtask,
    pub handle: &'a ResourceHandle,
}

impl<'a> DialogueSession<'a> {
    fn latest_from(&self, role: Role) -> String {
        self.unit
            .log()
            .entries()
            .into_iter()
            .rev()
            .find(|e| e.speaker == role)
            .map(|e| e.text)
            .unwrap_or_default()
    }

    /// Run the exchange for at most `max_dialogue_rounds` rounds
    ///
    /// `round` and `max_rounds` locate the exchange inside the outer loop
    /// and only feed the prompts. A zero round limit runs nothing and fails.
    pub async fn run(
        &self,
        request: &DialogueRequest,
        round: usize,
        max_rounds: usize,
        max_dialogue_rounds: usize,
    ) -> Result<DialogueOutcome, StepError> {
        info!(
            "Direct dialogue {} -> {}: {}",
            request.agent_a, request.agent_b, request.reason
        );

        let asker = self.unit.assignment_for(self.subtask, request.agent_a);
        let addressee = self.unit.assignment_for(self.subtask, request.agent_b);
        let (asker, addressee) = (&asker, &addressee);

        let step = move |dialogue_round: usize| async move {
            let mut usage = Usage::default();

            let question = self.latest_from(request.agent_a);
            let reply = self
                .unit
                .run_role(
                    self.subtask,
                    self.handle,
                    addressee,
                    round,
                    max_rounds,
                    Some(DialogueTurn {
                        with: request.agent_a,
                        message: question,
                        round: dialogue_round,
                        max_rounds: max_dialogue_rounds,
                    }),
                )
                .await?;
            usage.add(&reply.usage);

            let decision = self
                .engine
                .should_continue_collaboration(&self.unit.log().entries());
            if !decision.should_continue {
                return Ok(DialogueRound { decision, usage });
            }

            let response = self
                .unit
                .run_role(
                    self.subtask,
                    self.handle,
                    asker,
                    round,
                    max_rounds,
                    Some(DialogueTurn {
                        with: request.agent_b,
                        message: reply.text,
                        round: dialogue_round,
                        max_rounds: max_dialogue_rounds,
                    }),
                )
                .await?;
            usage.add(&response.usage);

            let decision = self
                .engine
                .should_continue_collaboration(&self.unit.log().entries());
            debug!("Dialogue round {}: {}", dialogue_round, decision.reason);
            Ok(DialogueRound { decision, usage })
        };

        let mut total = Usage::default();
        let outcome = bounded_iterate(
            max_dialogue_rounds,
            &Backoff::None,
            step,
            |result: &Result<DialogueRound, StepError>| match result {
                Ok(r) => {
                    total.add(&r.usage);
                    !r.decision.should_continue
                }
                Err(_) => true,
            },
        )
        .await;

        let rounds = outcome.rounds;
        let satisfied = outcome.satisfied;
        let last = outcome
            .last
            .ok_or_else(|| StepError::Failed {
                role: request.agent_b,
                message: "dialogue produced no rounds".to_string(),
            })??;

        let consensus = satisfied && !last.decision.should_continue;
        info!(
            "Dialogue {} -> {} ended after {} round(s), consensus: {}",
            request.agent_a, request.agent_b, rounds, consensus
        );

        Ok(DialogueOutcome {
            rounds,
            consensus,
            decision: last.decision,
            usage: total,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeRepo, FakeVcs};
    use quorum_agent::{AgentCaller, ScriptedCaller};
    use quorum_consensus::ConversationLog;
    use quorum_core::{ConversationEntry, PhraseSets, RoleAssignment, TaskId};
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    struct Fixture {
        caller: Arc<ScriptedCaller>,
        unit: ExecutionUnit,
        engine: ConsensusEngine,
        subtask: Subtask,
        _repo: FakeRepo,
    }

    fn fixture(caller: ScriptedCaller) -> Fixture {
        let caller = Arc::new(caller);
        let repo = FakeRepo::new(FakeVcs::new());
        let unit = ExecutionUnit::new(
            TaskId::new("t-1"),
            "demo",
            repo.registry.clone(),
            repo.vcs.clone(),
            caller.clone() as Arc<dyn AgentCaller>,
            ConversationLog::new(),
            CancellationToken::new(),
        );
        let subtask = Subtask::new(
            &TaskId::new("t-1"),
            0,
            "Add a helper",
            vec![RoleAssignment::new(Role::Coder), RoleAssignment::new(Role::Reviewer)],
        );
        Fixture {
            caller,
            unit,
            engine: ConsensusEngine::new(&PhraseSets::default(), 4).unwrap(),
            subtask,
            _repo: repo,
        }
    }

    fn request() -> DialogueRequest {
        DialogueRequest {
            agent_a: Role::Reviewer,
            agent_b: Role::Coder,
            reason: "reviewer asked coder".to_string(),
            question_index: 1,
        }
    }

    async fn seed(unit: &ExecutionUnit) {
        let task = TaskId::new("t-1");
        unit.log()
            .append(ConversationEntry::new(task.clone(), Role::Coder, "Implemented with X."))
            .await;
        unit.log()
            .append(ConversationEntry::new(task, Role::Reviewer, "I'm not sure why you used X"))
            .await;
    }

    #[tokio::test]
    async fn test_stops_as_soon_as_reviewer_approves() {
        let f = fixture(
            ScriptedCaller::new()
                .reply(Role::Coder, "X avoids an extra allocation.")
                .reply(Role::Reviewer, "Approved"),
        );
        seed(&f.unit).await;
        let handle = f.unit.acquire(&f.subtask).await.unwrap();
        let session = DialogueSession {
            unit: &f.unit,
            engine: &f.engine,
            subtask: &f.subtask,
            handle: &handle,
        };

        let outcome = session.run(&request(), 1, 3, 2).await.unwrap();

        assert_eq!(outcome.rounds, 1);
        assert!(outcome.consensus);
        assert_eq!(outcome.decision.reason, "reviewer approved");
        assert_eq!(f.caller.call_order(), vec![Role::Coder, Role::Reviewer]);
        let entries = f.unit.log().entries();
        assert!(entries[2..].iter().all(|e| e.is_dialogue));
        // the addressee saw the question
        assert!(f.caller.requests()[0].prompt.contains("> I'm not sure why you used X"));
    }

    #[tokio::test]
    async fn test_runs_exactly_max_rounds_without_consensus() {
        let f = fixture(
            ScriptedCaller::new()
                .fallback(Role::Coder, "Here is more detail on X.")
                .fallback(Role::Reviewer, "I still have a concern about X."),
        );
        seed(&f.unit).await;
        let handle = f.unit.acquire(&f.subtask).await.unwrap();
        let session = DialogueSession {
            unit: &f.unit,
            engine: &f.engine,
            subtask: &f.subtask,
            handle: &handle,
        };

        let outcome = session.run(&request(), 1, 3, 2).await.unwrap();

        assert_eq!(outcome.rounds, 2);
        assert!(!outcome.consensus);
        assert_eq!(f.caller.call_order().len(), 4);
        assert_eq!(f.unit.log().len(), 6);
    }

    #[tokio::test]
    async fn test_addressee_readiness_ends_exchange_early() {
        let f = fixture(
            ScriptedCaller::new().reply(Role::Coder, "Makes sense, ready to proceed."),
        );
        seed(&f.unit).await;
        let handle = f.unit.acquire(&f.subtask).await.unwrap();
        let session = DialogueSession {
            unit: &f.unit,
            engine: &f.engine,
            subtask: &f.subtask,
            handle: &handle,
        };

        let outcome = session.run(&request(), 1, 3, 2).await.unwrap();
        assert_eq!(outcome.rounds, 1);
        assert!(outcome.consensus);
        assert_eq!(f.caller.call_order(), vec![Role::Coder]);
    }

    #[tokio::test]
    async fn test_agent_failure_surfaces() {
        let f = fixture(ScriptedCaller::new());
        seed(&f.unit).await;
        let handle = f.unit.acquire(&f.subtask).await.unwrap();
        let session = DialogueSession {
            unit: &f.unit,
            engine: &f.engine,
            subtask: &f.subtask,
            handle: &handle,
        };

        let err = session.run(&request(), 1, 3, 2).await.unwrap_err();
        assert!(matches!(err, StepError::Failed { role: Role::Coder, .. }));
    }

    #[tokio::test]
    async fn test_zero_round_limit_runs_nothing() {
        let f = fixture(ScriptedCaller::new().fallback(Role::Coder, "unused"));
        seed(&f.unit).await;
        let handle = f.unit.acquire(&f.subtask).await.unwrap();
        let session = DialogueSession {
            unit: &f.unit,
            engine: &f.engine,
            subtask: &f.subtask,
            handle: &handle,
        };

        let err = session.run(&request(), 1, 3, 0).await.unwrap_err();
        assert!(matches!(err, StepError::Failed { .. }));
        assert!(f.caller.call_order().is_empty());
    }
}
