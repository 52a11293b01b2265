//! Resource handle registry
//!
//! Every provisioned environment is registered here before any agent runs
//! in it. Release is exactly-once: a handle is claimed under the lock before
//! teardown starts, so concurrent releases (a worker finishing while a
//! signal handler sweeps) never tear down twice. A release that finds a
//! teardown in flight waits for it to finish before returning.

use futures::future::join_all;
use quorum_core::{
    EnvironmentRef, EnvironmentSpec, HandleId, HandleState, QuorumError, ResourceHandle, Result,
    SubtaskId, TaskId,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::provisioner::EnvironmentProvisioner;

/// What a single release did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// This call tore the environment down (or found it already gone)
    Released,
    /// Released earlier, or by a concurrent call this one waited for
    AlreadyReleased,
    /// No such handle
    Unknown,
    /// Teardown failed; the handle stays active for a later attempt
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupFailure {
    pub handle_id: Option<HandleId>,
    pub environment: String,
    pub error: String,
}

/// Result of a bulk release
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseReport {
    pub released_count: usize,
    pub failures: Vec<CleanupFailure>,
}

impl ReleaseReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    fn absorb(&mut self, handle: &ResourceHandle, outcome: ReleaseOutcome) {
        match outcome {
            ReleaseOutcome::Released => self.released_count += 1,
            ReleaseOutcome::Failed(error) => self.failures.push(CleanupFailure {
                handle_id: Some(handle.id.clone()),
                environment: handle.environment.name.clone(),
                error,
            }),
            ReleaseOutcome::AlreadyReleased | ReleaseOutcome::Unknown => {}
        }
    }
}

/// Outcome of an in-flight teardown, `None` until it finishes
type Completion = watch::Receiver<Option<ReleaseOutcome>>;

struct Tracked {
    handle: ResourceHandle,
    /// Generation and completion of the teardown in flight
    releasing: Option<(u64, Completion)>,
}

enum Claim {
    Done(ReleaseOutcome),
    Wait(u64, Completion),
    Teardown(EnvironmentRef, watch::Sender<Option<ReleaseOutcome>>),
}

pub struct LifecycleRegistry {
    handles: Mutex<HashMap<HandleId, Tracked>>,
    provisioner: Arc<dyn EnvironmentProvisioner>,
    generation: AtomicU64,
}

impl LifecycleRegistry {
    pub fn new(provisioner: Arc<dyn EnvironmentProvisioner>) -> Self {
        Self {
            handles: Mutex::new(HashMap::new()),
            provisioner,
            generation: AtomicU64::new(0),
        }
    }

    pub fn provisioner(&self) -> &Arc<dyn EnvironmentProvisioner> {
        &self.provisioner
    }

    // A panic while holding the lock must not stop the cleanup paths
    fn lock(&self) -> MutexGuard<'_, HashMap<HandleId, Tracked>> {
        self.handles.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn register(&self, handle: ResourceHandle) -> Result<()> {
        let mut handles = self.lock();
        if handles.contains_key(&handle.id) {
            return Err(QuorumError::DuplicateHandle(handle.id.to_string()));
        }
        debug!("Registered handle {} ({})", handle.id, handle.environment.name);
        handles.insert(
            handle.id.clone(),
            Tracked {
                handle,
                releasing: None,
            },
        );
        Ok(())
    }

    /// Provision an environment and register a handle for it
    ///
    /// Nothing is registered if provisioning fails.
    pub async fn acquire(
        &self,
        owner_task_id: &TaskId,
        owner_subtask_id: Option<SubtaskId>,
        spec: &EnvironmentSpec,
    ) -> Result<ResourceHandle> {
        let environment = self.provisioner.provision(spec).await?;
        let handle = ResourceHandle::new(
            owner_task_id.clone(),
            owner_subtask_id,
            environment,
            spec.branch.clone(),
        );
        self.register(handle.clone())?;
        Ok(handle)
    }

    pub fn get(&self, id: &HandleId) -> Option<ResourceHandle> {
        self.lock().get(id).map(|t| t.handle.clone())
    }

    pub fn active_handles(&self) -> Vec<ResourceHandle> {
        let mut active: Vec<_> = self
            .lock()
            .values()
            .filter(|t| t.handle.is_active())
            .map(|t| t.handle.clone())
            .collect();
        active.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.as_str().cmp(b.id.as_str())));
        active
    }

    pub fn active_count(&self) -> usize {
        self.lock().values().filter(|t| t.handle.is_active()).count()
    }

    /// Tear down one handle's environment, at most once
    ///
    /// When another call is already tearing the handle down, waits for it
    /// and reports `AlreadyReleased`, or its failure.
    pub async fn release(&self, id: &HandleId) -> ReleaseOutcome {
        loop {
            match self.claim(id) {
                Claim::Done(outcome) => return outcome,
                Claim::Teardown(environment, done) => {
                    return self.teardown(id, environment, done).await
                }
                Claim::Wait(generation, mut completion) => {
                    let finished = completion
                        .wait_for(Option::is_some)
                        .await
                        .map(|outcome| (*outcome).clone());
                    match finished {
                        Ok(Some(ReleaseOutcome::Failed(e))) => return ReleaseOutcome::Failed(e),
                        Ok(_) => return ReleaseOutcome::AlreadyReleased,
                        // The releasing call was dropped mid-teardown; claim it ourselves
                        Err(_) => self.abandon(id, generation),
                    }
                }
            }
        }
    }

    fn claim(&self, id: &HandleId) -> Claim {
        let mut handles = self.lock();
        match handles.get_mut(id) {
            None => Claim::Done(ReleaseOutcome::Unknown),
            Some(t) if !t.handle.is_active() => Claim::Done(ReleaseOutcome::AlreadyReleased),
            Some(Tracked {
                releasing: Some((generation, completion)),
                ..
            }) => Claim::Wait(*generation, completion.clone()),
            Some(t) => {
                let generation = self.generation.fetch_add(1, Ordering::Relaxed);
                let (done, completion) = watch::channel(None);
                t.releasing = Some((generation, completion));
                Claim::Teardown(t.handle.environment.clone(), done)
            }
        }
    }

    fn abandon(&self, id: &HandleId, generation: u64) {
        if let Some(t) = self.lock().get_mut(id) {
            if matches!(t.releasing, Some((g, _)) if g == generation) {
                t.releasing = None;
            }
        }
    }

    async fn teardown(
        &self,
        id: &HandleId,
        environment: EnvironmentRef,
        done: watch::Sender<Option<ReleaseOutcome>>,
    ) -> ReleaseOutcome {
        let result = self.provisioner.teardown(&environment).await;

        let outcome = {
            let mut handles = self.lock();
            let tracked = handles.get_mut(id);
            match result {
                Ok(()) | Err(QuorumError::EnvironmentGone(_)) => {
                    if let Some(t) = tracked {
                        t.releasing = None;
                        t.handle.state = HandleState::Released;
                    }
                    debug!("Released handle {} ({})", id, environment.name);
                    ReleaseOutcome::Released
                }
                Err(e) => {
                    if let Some(t) = tracked {
                        t.releasing = None;
                    }
                    warn!("Failed to release {} ({}): {}", id, environment.name, e);
                    ReleaseOutcome::Failed(e.to_string())
                }
            }
        };

        done.send_replace(Some(outcome.clone()));
        outcome
    }

    async fn release_matching<F>(&self, filter: F) -> ReleaseReport
    where
        F: Fn(&ResourceHandle) -> bool,
    {
        let targets: Vec<ResourceHandle> = self
            .active_handles()
            .into_iter()
            .filter(|h| filter(h))
            .collect();

        let outcomes = join_all(targets.iter().map(|h| self.release(&h.id))).await;

        let mut report = ReleaseReport::default();
        for (handle, outcome) in targets.iter().zip(outcomes) {
            report.absorb(handle, outcome);
        }
        report
    }

    /// Release every active handle concurrently
    pub async fn release_all(&self) -> ReleaseReport {
        let report = self.release_matching(|_| true).await;
        info!(
            "Released {} handle(s), {} failure(s)",
            report.released_count,
            report.failures.len()
        );
        report
    }

    pub async fn release_task(&self, task_id: &TaskId) -> ReleaseReport {
        self.release_matching(|h| &h.owner_task_id == task_id).await
    }

    pub async fn release_subtask(&self, subtask_id: &SubtaskId) -> ReleaseReport {
        self.release_matching(|h| h.owner_subtask_id.as_ref() == Some(subtask_id))
            .await
    }

    /// Tear down every environment named with `prefix`, registered or not
    ///
    /// Covers environments left behind by a previous process. Registered
    /// handles pointing at a swept environment are marked released.
    pub async fn force_release_by_owner_prefix(&self, prefix: &str) -> ReleaseReport {
        let mut report = ReleaseReport::default();

        let environments = match self.provisioner.list_environments(prefix).await {
            Ok(envs) => envs,
            Err(e) => {
                report.failures.push(CleanupFailure {
                    handle_id: None,
                    environment: format!("{}*", prefix),
                    error: e.to_string(),
                });
                return report;
            }
        };

        let outcomes = join_all(environments.iter().map(|env| self.provisioner.teardown(env))).await;

        for (env, outcome) in environments.iter().zip(outcomes) {
            match outcome {
                Ok(()) | Err(QuorumError::EnvironmentGone(_)) => {
                    report.released_count += 1;
                    self.mark_released(env);
                }
                Err(e) => report.failures.push(CleanupFailure {
                    handle_id: self.handle_for(env),
                    environment: env.name.clone(),
                    error: e.to_string(),
                }),
            }
        }

        info!(
            "Swept {} environment(s) with prefix {}, {} failure(s)",
            report.released_count,
            prefix,
            report.failures.len()
        );
        report
    }

    fn mark_released(&self, env: &EnvironmentRef) {
        for tracked in self.lock().values_mut() {
            if tracked.handle.environment.name == env.name {
                tracked.handle.state = HandleState::Released;
            }
        }
    }

    fn handle_for(&self, env: &EnvironmentRef) -> Option<HandleId> {
        self.lock()
            .values()
            .find(|t| t.handle.environment.name == env.name)
            .map(|t| t.handle.id.clone())
    }
}
