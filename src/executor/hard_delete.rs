//! Permanent workspace deletion.
//!
//! The most destructive workflow in the control plane, and the one that
//! exercises every consistency concern: idempotency via the tombstone,
//! partial external side effects (backups and host data go first), and
//! an atomic final commit that purges the database. Phase order is
//! `validate -> backups -> host-cleanup -> db-cleanup -> done`; backups
//! are a required phase, host cleanup is best-effort, and the purge
//! transaction is all-or-nothing.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::backup::BackupClient;
use crate::db::{DeletedProjectRecord, ProjectDb, ProjectRow, TableDelete, PROJECT_TABLES};
use crate::executor::OpExecutor;
use crate::host::HostControl;
use crate::op::LroOp;
use crate::progress::{Phase, Progress, ProgressSink};

/// Operation kind tag handled by [`HardDeleteExecutor`].
pub const KIND: &str = "project-hard-delete";

/// Phase map for user-facing progress display.
pub const PHASES: &[Phase] = &[
    Phase { name: "validate", percent: 10 },
    Phase { name: "backups", percent: 40 },
    Phase { name: "host-cleanup", percent: 60 },
    Phase { name: "db-cleanup", percent: 90 },
    Phase { name: "done", percent: 100 },
];

/// Input parameters for a hard delete, from the op's `input` field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HardDeleteInput {
    pub project_id: String,
    /// Initiating account; must be the workspace owner or a site admin.
    pub account_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup_retention_days: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purge_backups_now: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_backups: Option<bool>,
}

impl HardDeleteInput {
    /// Whether the backup phase should be skipped, and why.
    ///
    /// `skip_backups` skips outright. `purge_backups_now: false` also
    /// skips: snapshots are left to age out under the repository's own
    /// retention policy rather than purged here.
    fn backup_skip_reason(&self) -> Option<&'static str> {
        if self.skip_backups == Some(true) {
            Some("skipped by request")
        } else if self.purge_backups_now == Some(false) {
            Some("retention requested")
        } else {
            None
        }
    }
}

/// Outcome of the backup phase, also embedded in the tombstone metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupOutcome {
    pub skipped: bool,
    pub deleted_snapshots: u64,
    pub deleted_index_snapshots: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl BackupOutcome {
    fn skipped(reason: &str) -> Self {
        Self {
            skipped: true,
            deleted_snapshots: 0,
            deleted_index_snapshots: 0,
            reason: Some(reason.to_string()),
        }
    }
}

/// Terminal result of a hard delete.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HardDeleteOutcome {
    pub project_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub already_deleted: Option<bool>,
    pub backup: BackupOutcome,
    pub purged_tables: Vec<String>,
}

/// Why a delete may not proceed, as reported by the advisory pre-check.
#[derive(Debug, Error)]
pub enum DeleteCheckError {
    #[error("workspace {0} not found")]
    NotFound(String),
    /// The pre-check treats "already gone" as an error so UIs can block
    /// the action; the executor itself returns success in this case so
    /// it stays safely re-runnable.
    #[error("workspace {0} is already permanently deleted")]
    AlreadyDeleted(String),
    #[error("account {account_id} is not allowed to delete workspace {project_id}")]
    Forbidden {
        project_id: String,
        account_id: String,
    },
    #[error(transparent)]
    Db(#[from] anyhow::Error),
}

/// Advisory permission pre-check: phase 1 of the delete, errors only.
pub async fn check_delete_allowed(
    db: &dyn ProjectDb,
    project_id: &str,
    account_id: &str,
) -> Result<(), DeleteCheckError> {
    let Some(project) = db.get_project(project_id).await? else {
        if db.get_tombstone(project_id).await?.is_some() {
            return Err(DeleteCheckError::AlreadyDeleted(project_id.to_string()));
        }
        return Err(DeleteCheckError::NotFound(project_id.to_string()));
    };
    authorize(db, &project, account_id).await
}

async fn authorize(
    db: &dyn ProjectDb,
    project: &ProjectRow,
    account_id: &str,
) -> Result<(), DeleteCheckError> {
    if project.owner_account_id == account_id || db.is_site_admin(account_id).await? {
        Ok(())
    } else {
        Err(DeleteCheckError::Forbidden {
            project_id: project.project_id.clone(),
            account_id: account_id.to_string(),
        })
    }
}

/// Executor for permanent workspace deletion.
pub struct HardDeleteExecutor {
    db: Arc<dyn ProjectDb>,
    backups: Arc<dyn BackupClient>,
    hosts: Arc<dyn HostControl>,
}

impl HardDeleteExecutor {
    pub fn new(
        db: Arc<dyn ProjectDb>,
        backups: Arc<dyn BackupClient>,
        hosts: Arc<dyn HostControl>,
    ) -> Self {
        Self { db, backups, hosts }
    }

    /// Phase 2: purge backup snapshots for both backup identities.
    ///
    /// Required unless skipped: database records must not be purged
    /// while backups referencing them might still exist, so failures
    /// here abort the whole operation.
    async fn purge_backups(
        &self,
        input: &HardDeleteInput,
        progress: &dyn ProgressSink,
    ) -> Result<BackupOutcome> {
        if let Some(reason) = input.backup_skip_reason() {
            debug!(project_id = %input.project_id, reason, "backup purge skipped");
            return Ok(BackupOutcome::skipped(reason));
        }

        let Some(identities) = self.db.backup_identities(&input.project_id).await? else {
            // Never configured: nothing to purge, and not an error.
            return Ok(BackupOutcome {
                skipped: false,
                deleted_snapshots: 0,
                deleted_index_snapshots: 0,
                reason: Some("no backup configuration".to_string()),
            });
        };

        let deleted_snapshots = self
            .forget_all(&identities.files_host, progress)
            .await
            .with_context(|| {
                format!("failed to purge file backups for {}", input.project_id)
            })?;
        let deleted_index_snapshots = self
            .forget_all(&identities.index_host, progress)
            .await
            .with_context(|| {
                format!("failed to purge search-index backups for {}", input.project_id)
            })?;

        Ok(BackupOutcome {
            skipped: false,
            deleted_snapshots,
            deleted_index_snapshots,
            reason: None,
        })
    }

    async fn forget_all(&self, host: &str, progress: &dyn ProgressSink) -> Result<u64> {
        let ids = self.backups.list_snapshots(host).await?;
        let total = ids.len() as u64;
        for (i, id) in ids.iter().enumerate() {
            progress
                .report(
                    Progress::new("backups", "deleting backup snapshots")
                        .with_detail(format!("{}: {}/{}", host, i + 1, total)),
                )
                .await;
            self.backups.forget_snapshot(host, id).await?;
        }
        Ok(total)
    }

    /// Phase 3: best-effort host-side cleanup. The authoritative
    /// deletion guarantee is the database purge; an offline or
    /// reclaimed host must not block it.
    async fn host_cleanup(&self, project_id: &str, host_id: &str) {
        if let Err(e) = self.hosts.stop_workload(project_id).await {
            debug!(project_id, host_id, error = %e, "host stop failed, continuing");
        }
        if let Err(e) = self.hosts.delete_workload_data(project_id, host_id).await {
            debug!(project_id, host_id, error = %e, "host data wipe failed, continuing");
        }
    }

    /// Phase 4: one atomic transaction — tombstone, dependent tables,
    /// workspace row. Any non-schema error rolls the whole thing back.
    async fn purge_database(
        &self,
        project: &ProjectRow,
        input: &HardDeleteInput,
        backup: &BackupOutcome,
    ) -> Result<Vec<String>> {
        let mut metadata = serde_json::json!({ "backup": backup });
        if let Some(days) = input.backup_retention_days {
            metadata["backup_retention_days"] = serde_json::json!(days);
        }

        let mut tx = self.db.begin().await.context("failed to open purge transaction")?;
        tx.upsert_tombstone(DeletedProjectRecord {
            project_id: project.project_id.clone(),
            name: project.name.clone(),
            title: project.title.clone(),
            description: project.description.clone(),
            owner_account_id: project.owner_account_id.clone(),
            host_id: project.host_id.clone(),
            created: project.created,
            last_edited: project.last_edited,
            deleted_at: Utc::now(),
            deleted_by: input.account_id.clone(),
            metadata,
        })
        .await
        .context("failed to write tombstone")?;

        let mut purged = Vec::new();
        for table in PROJECT_TABLES {
            match tx.delete_rows(table, &project.project_id).await? {
                TableDelete::Deleted(n) if n > 0 => purged.push(table.to_string()),
                TableDelete::Deleted(_) => {}
                TableDelete::Missing => {
                    debug!(table, "table absent from schema, skipping");
                }
            }
        }

        tx.delete_project_row(&project.project_id)
            .await
            .context("failed to delete workspace row")?;
        tx.commit().await.context("failed to commit purge transaction")?;
        Ok(purged)
    }
}

#[async_trait]
impl OpExecutor for HardDeleteExecutor {
    fn kind(&self) -> &str {
        KIND
    }

    fn phases(&self) -> &[Phase] {
        PHASES
    }

    fn validate_input(&self, input: &Value) -> Result<()> {
        let input: HardDeleteInput = serde_json::from_value(input.clone())
            .context("invalid project-hard-delete input")?;
        if input.project_id.is_empty() {
            bail!("missing required input field: project_id");
        }
        if input.account_id.is_empty() {
            bail!("missing required input field: account_id");
        }
        Ok(())
    }

    #[instrument(skip(self, op, progress), fields(op_id = %op.op_id))]
    async fn execute(&self, op: &LroOp, progress: &dyn ProgressSink) -> Result<Value> {
        let input: HardDeleteInput = serde_json::from_value(op.input.clone())
            .context("invalid project-hard-delete input")?;

        // Phase 1: validate.
        progress
            .report(Progress::new("validate", "loading workspace"))
            .await;
        let project = match self.db.get_project(&input.project_id).await? {
            Some(project) => project,
            None => {
                if self.db.get_tombstone(&input.project_id).await?.is_some() {
                    // Re-run of a completed delete: success, no phases.
                    info!(project_id = %input.project_id, "workspace already deleted");
                    let outcome = HardDeleteOutcome {
                        project_id: input.project_id.clone(),
                        host_id: None,
                        already_deleted: Some(true),
                        backup: BackupOutcome::skipped("already deleted"),
                        purged_tables: Vec::new(),
                    };
                    return Ok(serde_json::to_value(outcome)?);
                }
                return Err(DeleteCheckError::NotFound(input.project_id.clone()).into());
            }
        };
        authorize(self.db.as_ref(), &project, &input.account_id)
            .await
            .map_err(anyhow::Error::from)?;

        // Phase 2: backups (required unless skipped).
        progress
            .report(Progress::new("backups", "deleting backup snapshots"))
            .await;
        let backup = self.purge_backups(&input, progress).await?;

        // Phase 3: host cleanup (best-effort).
        progress
            .report(Progress::new("host-cleanup", "cleaning up assigned host"))
            .await;
        if let Some(host_id) = &project.host_id {
            self.host_cleanup(&project.project_id, host_id).await;
        }

        // Phase 4: atomic database purge.
        progress
            .report(Progress::new("db-cleanup", "purging database records"))
            .await;
        let purged_tables = self.purge_database(&project, &input, &backup).await?;

        progress
            .report(
                Progress::new("done", "workspace permanently deleted")
                    .with_detail(format!("purged {} tables", purged_tables.len())),
            )
            .await;
        info!(
            project_id = %project.project_id,
            purged = purged_tables.len(),
            snapshots = backup.deleted_snapshots + backup.deleted_index_snapshots,
            "workspace permanently deleted"
        );

        let outcome = HardDeleteOutcome {
            project_id: project.project_id.clone(),
            host_id: project.host_id.clone(),
            already_deleted: None,
            backup,
            purged_tables,
        };
        Ok(serde_json::to_value(outcome)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;

    use crate::backup::testing::FakeBackups;
    use crate::db::{BackupIdentities, MemoryDb};
    use crate::host::testing::RecordingHost;
    use crate::op::{OpStatus, ScopeType};
    use crate::progress::RecordingSink;

    struct Fixture {
        db: MemoryDb,
        backups: Arc<FakeBackups>,
        hosts: Arc<RecordingHost>,
        executor: HardDeleteExecutor,
    }

    fn fixture_with_hosts(hosts: RecordingHost) -> Fixture {
        let db = MemoryDb::new();
        let backups = Arc::new(FakeBackups::new());
        let hosts = Arc::new(hosts);
        let executor = HardDeleteExecutor::new(
            Arc::new(db.clone()),
            backups.clone(),
            hosts.clone(),
        );
        Fixture {
            db,
            backups,
            hosts,
            executor,
        }
    }

    fn fixture() -> Fixture {
        fixture_with_hosts(RecordingHost::new())
    }

    fn project(project_id: &str, owner: &str) -> ProjectRow {
        ProjectRow {
            project_id: project_id.to_string(),
            name: format!("name-{}", project_id),
            title: format!("Workspace {}", project_id),
            description: "test workspace".to_string(),
            owner_account_id: owner.to_string(),
            host_id: Some("host-7".to_string()),
            created: Utc::now(),
            last_edited: Some(Utc::now()),
        }
    }

    async fn seed_standard(f: &Fixture) {
        f.db.insert_project(project("P1", "A1")).await;
        f.db.set_backup_identities(
            "P1",
            BackupIdentities {
                files_host: "project-P1".to_string(),
                index_host: "project-P1-index".to_string(),
            },
        )
        .await;
        f.backups.seed("project-P1", &["s1", "s2"]).await;
        f.backups.seed("project-P1-index", &["i1"]).await;
        f.db.seed_table("api_keys", "P1", 2).await;
        f.db.seed_table("project_log", "P1", 9).await;
    }

    fn op_with_input(input: Value) -> LroOp {
        LroOp {
            op_id: "op-1".to_string(),
            kind: KIND.to_string(),
            scope_type: ScopeType::Project,
            scope_id: "P1".to_string(),
            status: OpStatus::Running,
            owner_type: Some("worker".to_string()),
            owner_id: Some("w1".to_string()),
            attempt: 1,
            input,
            progress_summary: None,
            result: None,
            error: None,
            created_at: Utc::now(),
            started_at: Some(Utc::now()),
            updated_at: None,
            finished_at: None,
            expires_at: None,
            dismissed_at: None,
            dismissed_by: None,
        }
    }

    fn delete_op() -> LroOp {
        op_with_input(serde_json::json!({"project_id": "P1", "account_id": "A1"}))
    }

    fn outcome_from(value: Value) -> HardDeleteOutcome {
        serde_json::from_value(value).unwrap()
    }

    #[tokio::test]
    async fn full_delete_succeeds() {
        let f = fixture();
        seed_standard(&f).await;
        let sink = RecordingSink::new();

        let result = f.executor.execute(&delete_op(), &sink).await.unwrap();
        let outcome = outcome_from(result);

        assert_eq!(outcome.project_id, "P1");
        assert_eq!(outcome.host_id.as_deref(), Some("host-7"));
        assert!(outcome.already_deleted.is_none());
        assert!(!outcome.backup.skipped);
        assert_eq!(outcome.backup.deleted_snapshots, 2);
        assert_eq!(outcome.backup.deleted_index_snapshots, 1);
        assert_eq!(outcome.purged_tables, vec!["project_log", "api_keys"]);

        // Database state: tombstone present, everything else gone.
        assert!(!f.db.project_exists("P1").await);
        let tombstone = f.db.get_tombstone("P1").await.unwrap().unwrap();
        assert_eq!(tombstone.deleted_by, "A1");
        assert_eq!(tombstone.host_id.as_deref(), Some("host-7"));
        assert_eq!(tombstone.metadata["backup"]["deleted_snapshots"], 2);
        assert_eq!(f.db.table_rows("api_keys", "P1").await, 0);

        // Host cleanup happened.
        assert_eq!(f.hosts.stopped.lock().await.as_slice(), ["P1"]);
        assert_eq!(
            f.hosts.wiped.lock().await.as_slice(),
            [("P1".to_string(), "host-7".to_string())]
        );

        // Backups all purged.
        assert_eq!(f.backups.remaining("project-P1").await, 0);
        assert_eq!(f.backups.remaining("project-P1-index").await, 0);

        // Phases reported in order.
        let phases: Vec<String> = sink
            .updates()
            .await
            .into_iter()
            .map(|p| p.phase)
            .collect();
        let mut dedup = phases.clone();
        dedup.dedup();
        assert_eq!(
            dedup,
            vec!["validate", "backups", "host-cleanup", "db-cleanup", "done"]
        );
    }

    #[tokio::test]
    async fn rerun_is_idempotent() {
        let f = fixture();
        seed_standard(&f).await;
        let sink = RecordingSink::new();

        f.executor.execute(&delete_op(), &sink).await.unwrap();
        let invocations_after_first = f.backups.invocations();

        let second = f.executor.execute(&delete_op(), &sink).await.unwrap();
        let outcome = outcome_from(second);
        assert_eq!(outcome.already_deleted, Some(true));
        assert!(outcome.backup.skipped);
        assert_eq!(outcome.backup.reason.as_deref(), Some("already deleted"));
        assert!(outcome.purged_tables.is_empty());
        // Zero additional backup-tool invocations.
        assert_eq!(f.backups.invocations(), invocations_after_first);
    }

    #[tokio::test]
    async fn unknown_workspace_fails_not_found() {
        let f = fixture();
        let err = f
            .executor
            .execute(&delete_op(), &RecordingSink::new())
            .await
            .unwrap_err();
        assert!(format!("{:#}", err).contains("not found"));
    }

    #[tokio::test]
    async fn non_owner_is_forbidden() {
        let f = fixture();
        f.db.insert_project(project("P1", "A1")).await;
        let op = op_with_input(serde_json::json!({"project_id": "P1", "account_id": "A2"}));
        let err = f
            .executor
            .execute(&op, &RecordingSink::new())
            .await
            .unwrap_err();
        let msg = format!("{:#}", err);
        assert!(msg.contains("not allowed"), "forbidden, not not-found: {}", msg);
        // Nothing happened.
        assert!(f.db.project_exists("P1").await);
    }

    #[tokio::test]
    async fn site_admin_may_delete() {
        let f = fixture();
        f.db.insert_project(project("P1", "A1")).await;
        f.db.add_site_admin("A2").await;
        let op = op_with_input(serde_json::json!({"project_id": "P1", "account_id": "A2"}));
        f.executor.execute(&op, &RecordingSink::new()).await.unwrap();
        assert!(!f.db.project_exists("P1").await);
    }

    #[tokio::test]
    async fn backup_failure_aborts_before_db_cleanup() {
        let f = fixture();
        seed_standard(&f).await;
        f.backups.fail_forget.store(true, Ordering::SeqCst);

        let err = f
            .executor
            .execute(&delete_op(), &RecordingSink::new())
            .await
            .unwrap_err();
        assert!(format!("{:#}", err).contains("file backups"));

        // No purge happened: workspace intact, no tombstone, host untouched.
        assert!(f.db.project_exists("P1").await);
        assert!(f.db.get_tombstone("P1").await.unwrap().is_none());
        assert_eq!(f.db.table_rows("api_keys", "P1").await, 2);
        assert!(f.hosts.stopped.lock().await.is_empty());
    }

    #[tokio::test]
    async fn skip_backups_bypasses_failing_tool() {
        let f = fixture();
        seed_standard(&f).await;
        f.backups.fail_forget.store(true, Ordering::SeqCst);

        let op = op_with_input(serde_json::json!({
            "project_id": "P1",
            "account_id": "A1",
            "skip_backups": true
        }));
        let result = f.executor.execute(&op, &RecordingSink::new()).await.unwrap();
        let outcome = outcome_from(result);
        assert!(outcome.backup.skipped);
        assert_eq!(outcome.backup.reason.as_deref(), Some("skipped by request"));
        assert!(!f.db.project_exists("P1").await);
    }

    #[tokio::test]
    async fn retention_request_skips_purge() {
        let f = fixture();
        seed_standard(&f).await;

        let op = op_with_input(serde_json::json!({
            "project_id": "P1",
            "account_id": "A1",
            "purge_backups_now": false,
            "backup_retention_days": 30
        }));
        let result = f.executor.execute(&op, &RecordingSink::new()).await.unwrap();
        let outcome = outcome_from(result);
        assert!(outcome.backup.skipped);
        assert_eq!(outcome.backup.reason.as_deref(), Some("retention requested"));
        assert_eq!(f.backups.invocations(), 0);
        assert_eq!(f.backups.remaining("project-P1").await, 2);

        let tombstone = f.db.get_tombstone("P1").await.unwrap().unwrap();
        assert_eq!(tombstone.metadata["backup_retention_days"], 30);
    }

    #[tokio::test]
    async fn missing_backup_config_is_noop_success() {
        let f = fixture();
        f.db.insert_project(project("P1", "A1")).await;
        // No backup identities configured.
        let result = f
            .executor
            .execute(&delete_op(), &RecordingSink::new())
            .await
            .unwrap();
        let outcome = outcome_from(result);
        assert!(!outcome.backup.skipped);
        assert_eq!(outcome.backup.deleted_snapshots, 0);
        assert_eq!(outcome.backup.reason.as_deref(), Some("no backup configuration"));
        assert!(!f.db.project_exists("P1").await);
    }

    #[tokio::test]
    async fn host_failure_is_best_effort() {
        let f = fixture_with_hosts(RecordingHost::failing());
        seed_standard(&f).await;

        let result = f
            .executor
            .execute(&delete_op(), &RecordingSink::new())
            .await
            .unwrap();
        let outcome = outcome_from(result);
        assert!(outcome.already_deleted.is_none());
        assert!(!f.db.project_exists("P1").await);
    }

    #[tokio::test]
    async fn unassigned_workspace_skips_host_cleanup() {
        let f = fixture();
        let mut row = project("P1", "A1");
        row.host_id = None;
        f.db.insert_project(row).await;

        let result = f
            .executor
            .execute(&delete_op(), &RecordingSink::new())
            .await
            .unwrap();
        let outcome = outcome_from(result);
        assert!(outcome.host_id.is_none());
        assert!(f.hosts.stopped.lock().await.is_empty());
        assert!(f.hosts.wiped.lock().await.is_empty());
    }

    #[tokio::test]
    async fn purge_failure_rolls_back_everything() {
        let f = fixture();
        seed_standard(&f).await;
        f.db.fail_table("listings").await;

        let err = f
            .executor
            .execute(&delete_op(), &RecordingSink::new())
            .await
            .unwrap_err();
        assert!(format!("{:#}", err).contains("simulated database error"));

        // Atomicity: no write from the transaction is visible.
        assert!(f.db.project_exists("P1").await);
        assert!(f.db.get_tombstone("P1").await.unwrap().is_none());
        assert_eq!(f.db.table_rows("api_keys", "P1").await, 2);
        assert_eq!(f.db.table_rows("project_log", "P1").await, 9);

        // Backups were already purged before the failure: accepted
        // blast radius, surfaced through the failed op.
        assert_eq!(f.backups.remaining("project-P1").await, 0);
    }

    #[tokio::test]
    async fn missing_table_is_skipped_not_fatal() {
        let f = fixture();
        seed_standard(&f).await;
        f.db.mark_table_missing("mentions").await;

        let result = f
            .executor
            .execute(&delete_op(), &RecordingSink::new())
            .await
            .unwrap();
        let outcome = outcome_from(result);
        assert!(!outcome.purged_tables.contains(&"mentions".to_string()));
        assert!(!f.db.project_exists("P1").await);
    }

    #[tokio::test]
    async fn purged_tables_lists_only_nonempty() {
        let f = fixture();
        seed_standard(&f).await;
        let result = f
            .executor
            .execute(&delete_op(), &RecordingSink::new())
            .await
            .unwrap();
        let outcome = outcome_from(result);
        assert_eq!(outcome.purged_tables, vec!["project_log", "api_keys"]);
    }

    #[test]
    fn validate_input_requires_fields() {
        let f = fixture();
        assert!(f
            .executor
            .validate_input(&serde_json::json!({"project_id": "P1", "account_id": "A1"}))
            .is_ok());
        assert!(f
            .executor
            .validate_input(&serde_json::json!({"project_id": "P1"}))
            .is_err());
        assert!(f
            .executor
            .validate_input(&serde_json::json!({"project_id": "", "account_id": "A1"}))
            .is_err());
        assert!(f.executor.validate_input(&serde_json::json!("nope")).is_err());
    }

    // --- Pre-check helper ---

    #[tokio::test]
    async fn precheck_allows_owner_and_admin() {
        let f = fixture();
        f.db.insert_project(project("P1", "A1")).await;
        f.db.add_site_admin("root").await;
        assert!(check_delete_allowed(&f.db, "P1", "A1").await.is_ok());
        assert!(check_delete_allowed(&f.db, "P1", "root").await.is_ok());
    }

    #[tokio::test]
    async fn precheck_forbids_stranger() {
        let f = fixture();
        f.db.insert_project(project("P1", "A1")).await;
        let err = check_delete_allowed(&f.db, "P1", "A2").await.unwrap_err();
        assert!(matches!(err, DeleteCheckError::Forbidden { .. }));
    }

    #[tokio::test]
    async fn precheck_errors_on_missing_and_already_deleted() {
        let f = fixture();
        let err = check_delete_allowed(&f.db, "P1", "A1").await.unwrap_err();
        assert!(matches!(err, DeleteCheckError::NotFound(_)));

        // Once deleted, the pre-check errors where the executor would
        // return success.
        f.db.insert_project(project("P1", "A1")).await;
        f.executor
            .execute(&delete_op(), &RecordingSink::new())
            .await
            .unwrap();
        let err = check_delete_allowed(&f.db, "P1", "A1").await.unwrap_err();
        assert!(matches!(err, DeleteCheckError::AlreadyDeleted(_)));
    }

    #[test]
    fn phase_map_is_ordered_and_complete() {
        let names: Vec<&str> = PHASES.iter().map(|p| p.name).collect();
        assert_eq!(
            names,
            vec!["validate", "backups", "host-cleanup", "db-cleanup", "done"]
        );
        assert!(PHASES.windows(2).all(|w| w[0].percent < w[1].percent));
        assert_eq!(PHASES.last().unwrap().percent, 100);
    }
}
