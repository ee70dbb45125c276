//! Executor seam between the worker loop and workflow business logic.
//!
//! An executor performs one kind of operation given the op's input,
//! reporting progress through a [`ProgressSink`]. Executors are pure
//! with respect to the LRO store: claiming, heartbeats, and terminal
//! status writes are the worker's job.

pub mod hard_delete;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use crate::op::LroOp;
use crate::progress::{Phase, ProgressSink};

/// Business logic for one operation kind.
#[async_trait]
pub trait OpExecutor: Send + Sync {
    /// Operation type tag this executor handles, e.g. "project-hard-delete".
    fn kind(&self) -> &str;

    /// Declared phases in execution order, with user-facing percentages.
    fn phases(&self) -> &[Phase];

    /// Check required input fields before any work happens. The worker
    /// fails the op immediately on error, without invoking [`execute`].
    ///
    /// [`execute`]: OpExecutor::execute
    fn validate_input(&self, input: &Value) -> Result<()>;

    /// Run the operation to completion. The returned value becomes the
    /// op's terminal `result`; any error becomes its terminal `error`.
    async fn execute(&self, op: &LroOp, progress: &dyn ProgressSink) -> Result<Value>;
}
