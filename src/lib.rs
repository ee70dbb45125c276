//! Control plane for long-running cluster operations (LROs).
//!
//! Asynchronous cluster actions (workspace delete, move, start, ...)
//! are recorded as durable [`op::LroOp`] rows in an external store.
//! This crate provides the pieces that act on those rows:
//!
//! - [`store`]: the store contract (atomic claim, lease touch, merge
//!   update) and an in-memory reference implementation
//! - [`worker`]: the claim-and-execute loop with lease heartbeats and
//!   bounded parallelism
//! - [`executor`]: the seam for per-kind business logic, including the
//!   workspace hard-delete workflow
//! - [`progress`]: deduplicated progress reporting to the store and bus
//! - [`client`]: polling helpers for callers that need a synchronous
//!   answer
//!
//! At-most-one execution is enforced by leases: claiming an op grants a
//! deadline, heartbeats extend it, and a crashed worker's ops become
//! claimable again once the deadline lapses. Executors are therefore
//! written to be safely re-runnable.

pub mod backup;
pub mod bus;
pub mod client;
pub mod config;
pub mod db;
pub mod executor;
pub mod host;
pub mod op;
pub mod progress;
pub mod store;
pub mod worker;

pub use client::{wait_for_op, WaitOutcome};
pub use config::{Config, WorkerConfig};
pub use executor::OpExecutor;
pub use op::{LroOp, OpStatus, ProgressSummary, ScopeType};
pub use store::{LroStore, LroUpdate, MemoryStore, NewOp};
pub use worker::{Worker, WorkerHandle};
