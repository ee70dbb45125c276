//! Progress reporting from executors to the store and event bus.
//!
//! Executors report through the [`ProgressSink`] observer instead of
//! writing to the store directly, which keeps business logic decoupled
//! from the transport. The worker-side sink deduplicates consecutive
//! identical updates so slow polling loops inside an executor cannot
//! amplify into store-write and event storms.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::warn;

use crate::bus::{EventBus, LroEvent};
use crate::op::{ProgressSummary, ScopeType};
use crate::store::{LroStore, LroUpdate};

/// A named execution phase with its user-facing completion percentage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Phase {
    pub name: &'static str,
    pub percent: u8,
}

/// A progress update emitted by an executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Progress {
    pub phase: String,
    pub message: String,
    pub detail: Option<String>,
}

impl Progress {
    pub fn new(phase: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            phase: phase.into(),
            message: message.into(),
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Observer interface executors report through.
///
/// Reporting is infallible from the executor's point of view: delivery
/// problems are the sink's concern and must never fail the workflow.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn report(&self, update: Progress);
}

/// Sink that drops all updates.
#[derive(Debug, Default)]
pub struct NullSink;

#[async_trait]
impl ProgressSink for NullSink {
    async fn report(&self, _update: Progress) {}
}

/// Sink that records updates in order, for executor tests.
#[derive(Debug, Default)]
pub struct RecordingSink {
    updates: Mutex<Vec<Progress>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn updates(&self) -> Vec<Progress> {
        self.updates.lock().await.clone()
    }
}

#[async_trait]
impl ProgressSink for RecordingSink {
    async fn report(&self, update: Progress) {
        self.updates.lock().await.push(update);
    }
}

/// Worker-side sink for one op: writes `progress_summary` to the store
/// and publishes a progress event per accepted update.
pub struct OpProgress {
    op_id: String,
    scope_type: ScopeType,
    scope_id: String,
    store: Arc<dyn LroStore>,
    bus: Arc<dyn EventBus>,
    phases: Vec<Phase>,
    last_key: Mutex<Option<(String, String, Option<String>)>>,
}

impl OpProgress {
    pub fn new(
        op_id: impl Into<String>,
        scope_type: ScopeType,
        scope_id: impl Into<String>,
        store: Arc<dyn LroStore>,
        bus: Arc<dyn EventBus>,
        phases: &[Phase],
    ) -> Self {
        Self {
            op_id: op_id.into(),
            scope_type,
            scope_id: scope_id.into(),
            store,
            bus,
            phases: phases.to_vec(),
            last_key: Mutex::new(None),
        }
    }

    fn percent_for(&self, phase: &str) -> u8 {
        match self.phases.iter().find(|p| p.name == phase) {
            Some(p) => p.percent,
            None => {
                warn!(op_id = %self.op_id, phase = %phase, "progress for undeclared phase");
                0
            }
        }
    }
}

#[async_trait]
impl ProgressSink for OpProgress {
    async fn report(&self, update: Progress) {
        let summary = ProgressSummary {
            percent: self.percent_for(&update.phase),
            phase: update.phase,
            message: update.message,
            detail: update.detail,
        };
        {
            let mut last = self.last_key.lock().await;
            let key = summary.dedup_key();
            if last.as_ref() == Some(&key) {
                // Identical consecutive update: no store write, no event.
                return;
            }
            *last = Some(key);
        }

        match self.store.update(&self.op_id, LroUpdate::progress(summary.clone())).await {
            Ok(Some(_)) => {}
            Ok(None) => {
                warn!(op_id = %self.op_id, "progress write dropped: op gone or terminal");
            }
            Err(e) => {
                warn!(op_id = %self.op_id, error = %e, "progress write failed");
            }
        }

        let event = LroEvent {
            scope_type: self.scope_type,
            scope_id: self.scope_id.clone(),
            op_id: self.op_id.clone(),
            progress: summary,
        };
        if let Err(e) = self.bus.publish_event(event).await {
            warn!(op_id = %self.op_id, error = %e, "progress event publish failed");
        }
    }
}
