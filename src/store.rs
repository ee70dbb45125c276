//! LRO store contract and an in-memory reference implementation.
//!
//! The durable store behind the control plane is external (typically a
//! database fronted by RPCs). This module pins down the contract the
//! worker and client helpers rely on, and provides [`MemoryStore`], a
//! single-process implementation of the same contract used by tests and
//! embedders that run the control plane locally.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::debug;

use crate::op::{LroOp, OpStatus, ProgressSummary, ScopeType};

/// Field merge applied by [`LroStore::update`]. Unset fields are left
/// untouched.
#[derive(Debug, Clone, Default)]
pub struct LroUpdate {
    pub status: Option<OpStatus>,
    pub progress_summary: Option<ProgressSummary>,
    pub result: Option<Value>,
    pub error: Option<String>,
}

impl LroUpdate {
    pub fn status(status: OpStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn progress(summary: ProgressSummary) -> Self {
        Self {
            progress_summary: Some(summary),
            ..Self::default()
        }
    }
}

/// Contract for the durable operation store.
///
/// Implementations must provide atomic claim semantics: the same op must
/// never be handed to two callers for overlapping lease windows.
#[async_trait]
pub trait LroStore: Send + Sync {
    /// Atomically select up to `limit` ops of `kind` that are pending or
    /// running with an expired lease; transition them to running under
    /// the caller's ownership with `expires_at = now + lease`, and
    /// increment `attempt` on each.
    async fn claim_ops(
        &self,
        kind: &str,
        owner_type: &str,
        owner_id: &str,
        limit: usize,
        lease: Duration,
    ) -> Result<Vec<LroOp>>;

    /// Extend the lease deadline iff the caller still holds the lease.
    /// Silently a no-op (not an error) when the op already terminated or
    /// the lease moved to another owner.
    async fn touch(&self, op_id: &str, owner_type: &str, owner_id: &str) -> Result<()>;

    /// Merge fields into the op. Returns `None` when the op no longer
    /// exists, or is already terminal and the update is a non-idempotent
    /// overwrite (guards races between a slow worker and a reaper).
    async fn update(&self, op_id: &str, update: LroUpdate) -> Result<Option<LroOp>>;

    /// Fetch an op by id.
    async fn get(&self, op_id: &str) -> Result<Option<LroOp>>;
}

/// Parameters for enqueuing a new operation into a [`MemoryStore`].
#[derive(Debug, Clone)]
pub struct NewOp {
    pub op_id: String,
    pub kind: String,
    pub scope_type: ScopeType,
    pub scope_id: String,
    pub input: Value,
}

#[derive(Debug)]
struct StoredOp {
    op: LroOp,
    /// Lease duration recorded at claim time; `touch` extends by this.
    lease: Duration,
}

/// In-memory implementation of the store contract.
///
/// All mutations happen under one lock, which is what makes the claim
/// atomic. Claim order is FIFO by creation time.
#[derive(Debug, Default)]
pub struct MemoryStore {
    ops: Mutex<HashMap<String, StoredOp>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new pending op. Creation of LRO rows normally happens in
    /// the request path outside this crate; the reference store needs a
    /// way to admit claimable rows.
    pub async fn create(&self, new: NewOp) -> LroOp {
        let op = LroOp {
            op_id: new.op_id,
            kind: new.kind,
            scope_type: new.scope_type,
            scope_id: new.scope_id,
            status: OpStatus::Pending,
            owner_type: None,
            owner_id: None,
            attempt: 0,
            input: new.input,
            progress_summary: None,
            result: None,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            updated_at: None,
            finished_at: None,
            expires_at: None,
            dismissed_at: None,
            dismissed_by: None,
        };
        self.ops.lock().await.insert(
            op.op_id.clone(),
            StoredOp {
                op: op.clone(),
                lease: Duration::from_secs(0),
            },
        );
        op
    }

    /// Record a client-side acknowledgement. Does not affect execution.
    pub async fn dismiss(&self, op_id: &str, account_id: &str) -> Option<LroOp> {
        let mut ops = self.ops.lock().await;
        let stored = ops.get_mut(op_id)?;
        stored.op.dismissed_at = Some(Utc::now());
        stored.op.dismissed_by = Some(account_id.to_string());
        Some(stored.op.clone())
    }
}

#[async_trait]
impl LroStore for MemoryStore {
    async fn claim_ops(
        &self,
        kind: &str,
        owner_type: &str,
        owner_id: &str,
        limit: usize,
        lease: Duration,
    ) -> Result<Vec<LroOp>> {
        let now = Utc::now();
        let mut ops = self.ops.lock().await;

        let mut candidates: Vec<&String> = ops
            .iter()
            .filter(|(_, s)| s.op.kind == kind && s.op.claimable(now))
            .map(|(id, _)| id)
            .collect();
        candidates.sort_by_key(|id| ops[*id].op.created_at);
        let ids: Vec<String> = candidates.into_iter().take(limit).cloned().collect();

        let mut claimed = Vec::with_capacity(ids.len());
        for id in ids {
            let Some(stored) = ops.get_mut(&id) else {
                continue;
            };
            let op = &mut stored.op;
            op.status = OpStatus::Running;
            op.owner_type = Some(owner_type.to_string());
            op.owner_id = Some(owner_id.to_string());
            op.attempt += 1;
            op.expires_at = Some(now + chrono::Duration::from_std(lease)?);
            op.started_at.get_or_insert(now);
            op.updated_at = Some(now);
            stored.lease = lease;
            debug!(
                op_id = %op.op_id,
                kind = %op.kind,
                attempt = op.attempt,
                owner_id = %owner_id,
                "op claimed"
            );
            claimed.push(op.clone());
        }
        Ok(claimed)
    }

    async fn touch(&self, op_id: &str, owner_type: &str, owner_id: &str) -> Result<()> {
        let now = Utc::now();
        let mut ops = self.ops.lock().await;
        let Some(stored) = ops.get_mut(op_id) else {
            return Ok(());
        };
        let op = &mut stored.op;
        let holds_lease = op.status == OpStatus::Running
            && op.owner_type.as_deref() == Some(owner_type)
            && op.owner_id.as_deref() == Some(owner_id);
        if holds_lease {
            op.expires_at = Some(now + chrono::Duration::from_std(stored.lease)?);
            op.updated_at = Some(now);
        }
        Ok(())
    }

    async fn update(&self, op_id: &str, update: LroUpdate) -> Result<Option<LroOp>> {
        let now = Utc::now();
        let mut ops = self.ops.lock().await;
        let Some(stored) = ops.get_mut(op_id) else {
            return Ok(None);
        };
        let op = &mut stored.op;

        if op.status.is_terminal() {
            // Terminal statuses are sticky. A duplicate terminal write
            // that changes nothing observable is an idempotent no-op;
            // anything else is rejected.
            let idempotent = update.status.map_or(true, |s| s == op.status)
                && update.result.as_ref().map_or(true, |r| Some(r) == op.result.as_ref())
                && update.error.as_ref().map_or(true, |e| Some(e) == op.error.as_ref())
                && update
                    .progress_summary
                    .as_ref()
                    .map_or(true, |p| Some(p) == op.progress_summary.as_ref());
            if idempotent {
                return Ok(Some(op.clone()));
            }
            return Ok(None);
        }

        if let Some(status) = update.status {
            op.status = status;
            if status.is_terminal() {
                op.finished_at = Some(now);
                op.expires_at = None;
            }
        }
        if let Some(progress) = update.progress_summary {
            op.progress_summary = Some(progress);
        }
        if let Some(result) = update.result {
            op.result = Some(result);
        }
        if let Some(error) = update.error {
            op.error = Some(error);
        }
        op.updated_at = Some(now);
        Ok(Some(op.clone()))
    }

    async fn get(&self, op_id: &str) -> Result<Option<LroOp>> {
        Ok(self.ops.lock().await.get(op_id).map(|s| s.op.clone()))
    }
}
