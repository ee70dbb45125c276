//! Data model for long-running operations (LROs).
//!
//! An [`LroOp`] is a durable record of an asynchronous cluster action
//! (start, stop, move, delete, ...) owned by the external store and
//! mutated by exactly one lease-holding worker at a time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Execution status of an operation.
///
/// `pending -> running -> {succeeded | failed | canceled}`. A `running`
/// op whose lease expires becomes claimable again without an explicit
/// transition. `expired` is reserved for an external reaper; nothing in
/// this crate transitions into it, but it is treated as terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Canceled,
    Expired,
}

impl OpStatus {
    /// Whether this status is terminal. Terminal statuses are sticky:
    /// the store rejects transitions away from them.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OpStatus::Succeeded | OpStatus::Failed | OpStatus::Canceled | OpStatus::Expired
        )
    }
}

impl std::fmt::Display for OpStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            OpStatus::Pending => "pending",
            OpStatus::Running => "running",
            OpStatus::Succeeded => "succeeded",
            OpStatus::Failed => "failed",
            OpStatus::Canceled => "canceled",
            OpStatus::Expired => "expired",
        };
        write!(f, "{}", s)
    }
}

/// The kind of entity an operation is filed against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScopeType {
    Project,
    Account,
    Host,
    Hub,
}

impl std::fmt::Display for ScopeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ScopeType::Project => "project",
            ScopeType::Account => "account",
            ScopeType::Host => "host",
            ScopeType::Hub => "hub",
        };
        write!(f, "{}", s)
    }
}

/// Latest progress snapshot for an operation. This is a snapshot, not an
/// append log: each accepted update replaces the previous one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressSummary {
    /// Stable phase name (e.g. "backups", "db-cleanup").
    pub phase: String,
    /// Human-readable description of what is happening.
    pub message: String,
    /// Optional extra detail (counts, ids, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// Completion percentage for user-facing display, derived from the
    /// executor's phase map.
    pub percent: u8,
}

impl ProgressSummary {
    /// Composite key used to deduplicate consecutive identical updates.
    pub fn dedup_key(&self) -> (String, String, Option<String>) {
        (self.phase.clone(), self.message.clone(), self.detail.clone())
    }
}

/// A durable long-running operation record.
///
/// Owned by the external store; workers mutate it through the store's
/// claim/touch/update primitives and clients read it via get.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LroOp {
    /// Opaque unique identifier.
    pub op_id: String,
    /// Operation type tag, e.g. "project-hard-delete".
    pub kind: String,
    pub scope_type: ScopeType,
    pub scope_id: String,
    pub status: OpStatus,
    /// Identity of the current lease holder. Absent while pending.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,
    /// Incremented on every successful claim, including reclaims after
    /// lease expiry. Only ever increases.
    pub attempt: u32,
    /// Immutable parameters supplied at creation.
    pub input: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress_summary: Option<ProgressSummary>,
    /// Terminal payload on success. Mutually exclusive with `error` in
    /// practice.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    /// Lease deadline while running.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    /// Client-side acknowledgement. Does not affect execution.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dismissed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dismissed_by: Option<String>,
}

impl LroOp {
    /// Whether the lease on this op has lapsed as of `now`.
    ///
    /// A running op with no deadline is treated as expired: it can never
    /// be heartbeated back to health, so it must be reclaimable.
    pub fn lease_expired(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(deadline) => deadline <= now,
            None => true,
        }
    }

    /// Whether this op is claimable: pending, or running with an
    /// expired lease.
    pub fn claimable(&self, now: DateTime<Utc>) -> bool {
        match self.status {
            OpStatus::Pending => true,
            OpStatus::Running => self.lease_expired(now),
            _ => false,
        }
    }
}
