//! Bounded-concurrency fan-out of independent subtasks
//!
//! Every subtask runs to completion even when a sibling fails. A worker
//! that panics is reported as a failure and its handles are released.

use quorum_core::Subtask;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{error, info};

use crate::execution::{ExecutionUnit, SubtaskResult, SubtaskStatus};

/// Results of one fan-out, ordered by subtask index
#[derive(Debug, Clone, Default)]
pub struct ParallelReport {
    pub results: Vec<SubtaskResult>,
}

impl ParallelReport {
    pub fn all_succeeded(&self) -> bool {
        self.results.iter().all(SubtaskResult::succeeded)
    }

    pub fn succeeded(&self) -> impl Iterator<Item = &SubtaskResult> {
        self.results.iter().filter(|r| r.succeeded())
    }

    pub fn failed(&self) -> impl Iterator<Item = &SubtaskResult> {
        self.results.iter().filter(|r| !r.succeeded())
    }
}

#[derive(Debug, Clone)]
pub struct ParallelEngine {
    max_concurrency: usize,
}

impl ParallelEngine {
    pub fn new(max_concurrency: usize) -> Self {
        Self {
            max_concurrency: max_concurrency.max(1),
        }
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// Run every subtask, at most `max_concurrency` at a time
    pub async fn run(&self, unit: Arc<ExecutionUnit>, subtasks: Vec<Subtask>) -> ParallelReport {
        info!(
            "Running {} subtask(s) with concurrency {}",
            subtasks.len(),
            self.max_concurrency
        );
        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));

        let workers: Vec<_> = subtasks
            .into_iter()
            .map(|subtask| {
                let unit = unit.clone();
                let semaphore = semaphore.clone();
                let worker_subtask = subtask.clone();
                let handle = tokio::spawn(async move {
                    let permit = tokio::select! {
                        _ = unit.cancel_token().cancelled() => None,
                        permit = semaphore.acquire_owned() => permit.ok(),
                    };
                    let Some(_permit) = permit else {
                        return SubtaskResult::new(&worker_subtask, SubtaskStatus::Cancelled)
                            .with_reason("cancelled while queued");
                    };
                    unit.run_subtask(&worker_subtask).await
                });
                (subtask, handle)
            })
            .collect();

        let mut results = Vec::with_capacity(workers.len());
        for (subtask, handle) in workers {
            match handle.await {
                Ok(result) => results.push(result),
                Err(e) => {
                    error!("Worker for {} died: {}", subtask.id, e);
                    let report = unit.registry().release_subtask(&subtask.id).await;
                    if !report.is_clean() {
                        error!(
                            "{} handle(s) of {} could not be released",
                            report.failures.len(),
                            subtask.id
                        );
                    }
                    results.push(
                        SubtaskResult::new(&subtask, SubtaskStatus::Failure)
                            .with_reason(format!("worker panicked: {}", e)),
                    );
                }
            }
        }

        results.sort_by_key(|r| r.index);
        ParallelReport { results }
    }
}
