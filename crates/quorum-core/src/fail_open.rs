//! Fail-open helpers for side channels
//!
//! Conversation mirroring, status snapshots and orphan sweeps must never
//! take a task down with them. Agent calls, state transitions and merges
//! are not fail-open.

use std::future::Future;
use tracing::warn;

use crate::Result;

/// Run an operation whose failure is logged and otherwise ignored
///
/// Returns `None` when the operation failed.
///
/// ```no_run
/// use quorum_core::fail_open::fail_open;
/// use quorum_core::Result;
///
/// async fn mirror_entry() -> Result<()> {
///     Ok(())
/// }
///
/// async fn example() {
///     let mirrored = fail_open("conversation_sink", || mirror_entry()).await;
///     assert!(mirrored.is_some());
/// }
/// ```
pub async fn fail_open<F, Fut, T>(operation_name: &str, f: F) -> Option<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    match f().await {
        Ok(val) => Some(val),
        Err(e) => {
            warn!("{} failed (fail-open): {}", operation_name, e);
            None
        }
    }
}
