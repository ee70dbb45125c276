//! Event bus contract for progress events and terminal summaries.
//!
//! Fan-out to subscribers is external; this crate only publishes.
//! Subscribers are scoped by `(scope_type, scope_id)`.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::op::{OpStatus, ProgressSummary, ScopeType};

/// A progress event for one op, published on every accepted update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LroEvent {
    pub scope_type: ScopeType,
    pub scope_id: String,
    pub op_id: String,
    pub progress: ProgressSummary,
}

/// Terminal summary for one op, published exactly once when it finishes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LroSummary {
    pub scope_type: ScopeType,
    pub scope_id: String,
    pub op_id: String,
    pub status: OpStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Publisher side of the pub/sub stream.
#[async_trait]
pub trait EventBus: Send + Sync {
    async fn publish_event(&self, event: LroEvent) -> Result<()>;
    async fn publish_summary(&self, summary: LroSummary) -> Result<()>;
}

/// Bus that discards everything. For embedders that only poll.
#[derive(Debug, Default)]
pub struct NullBus;

#[async_trait]
impl EventBus for NullBus {
    async fn publish_event(&self, _event: LroEvent) -> Result<()> {
        Ok(())
    }

    async fn publish_summary(&self, _summary: LroSummary) -> Result<()> {
        Ok(())
    }
}

/// Bus that records every publish, for tests and local inspection.
#[derive(Debug, Default)]
pub struct MemoryBus {
    events: Mutex<Vec<LroEvent>>,
    summaries: Mutex<Vec<LroSummary>>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn events(&self) -> Vec<LroEvent> {
        self.events.lock().await.clone()
    }

    pub async fn summaries(&self) -> Vec<LroSummary> {
        self.summaries.lock().await.clone()
    }
}

#[async_trait]
impl EventBus for MemoryBus {
    async fn publish_event(&self, event: LroEvent) -> Result<()> {
        self.events.lock().await.push(event);
        Ok(())
    }

    async fn publish_summary(&self, summary: LroSummary) -> Result<()> {
        self.summaries.lock().await.push(summary);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(op_id: &str, phase: &str) -> LroEvent {
        LroEvent {
            scope_type: ScopeType::Project,
            scope_id: "P1".to_string(),
            op_id: op_id.to_string(),
            progress: ProgressSummary {
                phase: phase.to_string(),
                message: "working".to_string(),
                detail: None,
                percent: 50,
            },
        }
    }

    #[tokio::test]
    async fn memory_bus_records_in_order() {
        let bus = MemoryBus::new();
        bus.publish_event(event("op-1", "validate")).await.unwrap();
        bus.publish_event(event("op-1", "backups")).await.unwrap();
        bus.publish_summary(LroSummary {
            scope_type: ScopeType::Project,
            scope_id: "P1".to_string(),
            op_id: "op-1".to_string(),
            status: OpStatus::Succeeded,
            error: None,
        })
        .await
        .unwrap();

        let events = bus.events().await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].progress.phase, "validate");
        assert_eq!(events[1].progress.phase, "backups");

        let summaries = bus.summaries().await;
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].status, OpStatus::Succeeded);
    }

    #[tokio::test]
    async fn null_bus_accepts_everything() {
        let bus = NullBus;
        bus.publish_event(event("op-1", "validate")).await.unwrap();
        bus.publish_summary(LroSummary {
            scope_type: ScopeType::Hub,
            scope_id: "hub".to_string(),
            op_id: "op-2".to_string(),
            status: OpStatus::Failed,
            error: Some("boom".to_string()),
        })
        .await
        .unwrap();
    }

    #[test]
    fn summary_serde_omits_missing_error() {
        let summary = LroSummary {
            scope_type: ScopeType::Project,
            scope_id: "P1".to_string(),
            op_id: "op-1".to_string(),
            status: OpStatus::Succeeded,
            error: None,
        };
        let json = serde_json::to_string(&summary).unwrap();
        assert!(!json.contains("error"));
    }
}
