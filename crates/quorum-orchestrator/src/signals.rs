//! Cleanup on abnormal termination
//!
//! SIGINT, SIGTERM and a panic on the main thread all end the same way:
//! cancel in-flight work, release every registered handle concurrently,
//! report failures, exit with the conventional status.

use std::sync::Arc;
use std::thread;

use quorum_core::Result;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::registry::{CleanupFailure, LifecycleRegistry, ReleaseReport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationCause {
    Interrupt,
    Terminate,
    Panic,
}

impl TerminationCause {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Interrupt => 130,
            Self::Terminate => 143,
            Self::Panic => 70,
        }
    }
}

impl std::fmt::Display for TerminationCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Interrupt => write!(f, "SIGINT"),
            Self::Terminate => write!(f, "SIGTERM"),
            Self::Panic => write!(f, "panic"),
        }
    }
}

/// Cancel in-flight work and release everything, returning the exit status
pub async fn handle_termination(
    registry: &LifecycleRegistry,
    cancel: &CancellationToken,
    cause: TerminationCause,
) -> (ReleaseReport, i32) {
    warn!("Received {}, releasing {} handle(s)", cause, registry.active_count());
    cancel.cancel();

    let report = registry.release_all().await;
    log_failures(&report.failures);

    (report, cause.exit_code())
}

fn log_failures(failures: &[CleanupFailure]) {
    for failure in failures {
        error!(
            "Could not release {}: {}",
            failure.environment, failure.error
        );
    }
}

#[cfg(unix)]
async fn wait_for_termination(
    mut terminate: tokio::signal::unix::Signal,
) -> TerminationCause {
    tokio::select! {
        _ = tokio::signal::ctrl_c() => TerminationCause::Interrupt,
        _ = terminate.recv() => TerminationCause::Terminate,
    }
}

/// Install SIGINT/SIGTERM handlers and the main-thread panic hook
///
/// Must be called from the main thread inside a runtime. The returned task
/// exits the process once a signal has been handled.
#[cfg(unix)]
pub fn install_termination_handlers(
    registry: Arc<LifecycleRegistry>,
    cancel: CancellationToken,
) -> Result<JoinHandle<()>> {
    use tokio::signal::unix::{signal, SignalKind};

    let terminate = signal(SignalKind::terminate())?;
    install_panic_hook(registry.clone());

    Ok(tokio::spawn(async move {
        let cause = wait_for_termination(terminate).await;
        let (report, code) = handle_termination(&registry, &cancel, cause).await;
        info!(
            "Released {} handle(s) after {}, exiting with {}",
            report.released_count, cause, code
        );
        std::process::exit(code);
    }))
}

#[cfg(not(unix))]
pub fn install_termination_handlers(
    registry: Arc<LifecycleRegistry>,
    cancel: CancellationToken,
) -> Result<JoinHandle<()>> {
    install_panic_hook(registry.clone());

    Ok(tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        let (_, code) = handle_termination(&registry, &cancel, TerminationCause::Interrupt).await;
        std::process::exit(code);
    }))
}

/// Chain a panic hook that releases everything when the main thread panics
///
/// Panics on worker threads are left to the join-error path of whoever
/// spawned them.
pub fn install_panic_hook(registry: Arc<LifecycleRegistry>) {
    let main_thread = thread::current().id();
    let previous = std::panic::take_hook();

    std::panic::set_hook(Box::new(move |info| {
        previous(info);
        if thread::current().id() != main_thread {
            return;
        }
        let report = release_all_blocking(registry.clone());
        log_failures(&report.failures);
        std::process::exit(TerminationCause::Panic.exit_code());
    }));
}

/// Run `release_all` to completion from synchronous code
///
/// Uses a fresh thread and runtime, so it works even while the calling
/// thread is inside (or tearing down) another runtime.
pub fn release_all_blocking(registry: Arc<LifecycleRegistry>) -> ReleaseReport {
    let worker = thread::spawn(move || {
        match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(runtime) => runtime.block_on(registry.release_all()),
            Err(e) => ReleaseReport {
                released_count: 0,
                failures: vec![CleanupFailure {
                    handle_id: None,
                    environment: "*".to_string(),
                    error: format!("cleanup runtime failed to start: {}", e),
                }],
            },
        }
    });

    worker.join().unwrap_or_default()
}
