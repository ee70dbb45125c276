//! Client-side polling helpers.
//!
//! Callers that dispatched an op and need a synchronous answer poll the
//! store until the op terminates or a deadline passes. Timeouts are an
//! expected outcome here, not an error: the op may well still be
//! running, and the caller decides what that means.

use std::future::Future;
use std::time::Duration;

use anyhow::Result;
use tokio::time::Instant;
use tracing::debug;

use crate::op::OpStatus;
use crate::store::LroStore;

/// Result of waiting for an op to reach a terminal status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitOutcome {
    /// Last observed status, `None` if the op was never seen at all.
    pub status: Option<OpStatus>,
    pub error: Option<String>,
    /// The deadline passed before a terminal status was observed.
    pub timed_out: bool,
}

impl WaitOutcome {
    pub fn succeeded(&self) -> bool {
        self.status == Some(OpStatus::Succeeded)
    }
}

/// Poll `op_id` until it reaches a terminal status or `timeout` passes.
///
/// A timeout is reported through [`WaitOutcome::timed_out`] together
/// with the last status seen; only store failures return `Err`.
pub async fn wait_for_op(
    store: &dyn LroStore,
    op_id: &str,
    timeout: Duration,
    poll: Duration,
) -> Result<WaitOutcome> {
    let deadline = Instant::now() + timeout;
    let mut last_status = None;
    let mut last_error = None;

    loop {
        if let Some(op) = store.get(op_id).await? {
            last_status = Some(op.status);
            last_error = op.error;
            if op.status.is_terminal() {
                return Ok(WaitOutcome {
                    status: last_status,
                    error: last_error,
                    timed_out: false,
                });
            }
        }
        if Instant::now() >= deadline {
            debug!(op_id, status = ?last_status, "wait timed out");
            return Ok(WaitOutcome {
                status: last_status,
                error: last_error,
                timed_out: true,
            });
        }
        tokio::time::sleep(poll).await;
    }
}

/// Poll `fetch` (current host assignment) until it reports `expected`.
///
/// Used after a move or start to confirm the workload landed where the
/// op said it would. Returns `false` on timeout.
pub async fn wait_for_placement<F, Fut>(
    mut fetch: F,
    expected: &str,
    timeout: Duration,
    poll: Duration,
) -> Result<bool>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<String>>>,
{
    let deadline = Instant::now() + timeout;
    loop {
        if fetch().await?.as_deref() == Some(expected) {
            return Ok(true);
        }
        if Instant::now() >= deadline {
            return Ok(false);
        }
        tokio::time::sleep(poll).await;
    }
}

/// Poll `fetch` until the assignment is anything but `excluded`,
/// including unassigned. Returns `false` on timeout.
pub async fn wait_for_departure<F, Fut>(
    mut fetch: F,
    excluded: &str,
    timeout: Duration,
    poll: Duration,
) -> Result<bool>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<String>>>,
{
    let deadline = Instant::now() + timeout;
    loop {
        if fetch().await?.as_deref() != Some(excluded) {
            return Ok(true);
        }
        if Instant::now() >= deadline {
            return Ok(false);
        }
        tokio::time::sleep(poll).await;
    }
}
