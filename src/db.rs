//! Project-database contract consumed by destructive workflows.
//!
//! The real database lives behind cluster RPCs; the hard-delete workflow
//! only needs the narrow surface defined here: project/tombstone reads,
//! an admin check, backup configuration lookup, and a transaction whose
//! writes are invisible until commit. [`MemoryDb`] implements the
//! contract in-process for tests, including schema-skew and failure
//! injection.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;

/// Live workspace row, as read from the projects table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectRow {
    pub project_id: String,
    pub name: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub owner_account_id: String,
    /// Currently assigned host, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_id: Option<String>,
    pub created: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_edited: Option<DateTime<Utc>>,
}

/// Tombstone row proving a workspace was permanently deleted.
///
/// Created exactly once per workspace inside the purge transaction and
/// never mutated afterwards; re-running the same delete upserts the same
/// content, which is a no-op. Its presence is the idempotency witness:
/// if it exists, the workspace is considered already deleted regardless
/// of whether the live row still exists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeletedProjectRecord {
    pub project_id: String,
    pub name: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub owner_account_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_id: Option<String>,
    pub created: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_edited: Option<DateTime<Utc>>,
    pub deleted_at: DateTime<Utc>,
    pub deleted_by: String,
    /// Includes the outcome of backup deletion.
    pub metadata: Value,
}

/// The two logical backup identities tied to a workspace: its live file
/// backups and its separate search-index backups. Each maps to a logical
/// "host" name in the backup repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupIdentities {
    pub files_host: String,
    pub index_host: String,
}

/// Dependent tables purged together with the workspace row. The list is
/// fixed; a deployment whose schema lacks one of these tables simply has
/// no data there ([`TableDelete::Missing`]).
pub const PROJECT_TABLES: &[&str] = &[
    "project_invites",
    "project_invite_tokens",
    "project_log",
    "backup_secrets",
    "api_keys",
    "public_path_stars",
    "public_paths",
    "copy_history",
    "lro_ops",
    "file_use",
    "mentions",
    "listings",
    "usage_records",
    "external_credentials",
];

/// Outcome of deleting a project's rows from one dependent table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableDelete {
    /// Rows matched and were deleted (possibly zero).
    Deleted(u64),
    /// The table does not exist in the current schema. Treated as
    /// absent data, not a failure.
    Missing,
}

/// Read surface of the project database.
#[async_trait]
pub trait ProjectDb: Send + Sync {
    async fn get_project(&self, project_id: &str) -> Result<Option<ProjectRow>>;

    async fn get_tombstone(&self, project_id: &str) -> Result<Option<DeletedProjectRecord>>;

    async fn is_site_admin(&self, account_id: &str) -> Result<bool>;

    /// Backup configuration for a workspace, if any was ever set up.
    async fn backup_identities(&self, project_id: &str) -> Result<Option<BackupIdentities>>;

    /// Open a purge transaction. Writes must be invisible to concurrent
    /// readers until [`ProjectTx::commit`]; dropping the transaction
    /// without committing discards everything.
    async fn begin(&self) -> Result<Box<dyn ProjectTx>>;
}

/// One atomic purge transaction.
#[async_trait]
pub trait ProjectTx: Send {
    /// Insert or overwrite the tombstone row for this project.
    async fn upsert_tombstone(&mut self, record: DeletedProjectRecord) -> Result<()>;

    /// Delete all of a project's rows from one dependent table.
    async fn delete_rows(&mut self, table: &str, project_id: &str) -> Result<TableDelete>;

    /// Delete the workspace row itself.
    async fn delete_project_row(&mut self, project_id: &str) -> Result<()>;

    /// Apply all buffered writes atomically.
    async fn commit(self: Box<Self>) -> Result<()>;
}

// ---------------------------------------------------------------------------
// In-memory implementation
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct DbState {
    projects: HashMap<String, ProjectRow>,
    tombstones: HashMap<String, DeletedProjectRecord>,
    site_admins: HashSet<String>,
    backups: HashMap<String, BackupIdentities>,
    /// table name -> project_id -> row count
    tables: HashMap<String, HashMap<String, u64>>,
    /// Tables absent from the simulated schema.
    missing_tables: HashSet<String>,
    /// Tables whose deletes fail with a non-schema error.
    failing_tables: HashSet<String>,
}

/// In-memory [`ProjectDb`] with buffered transactions.
#[derive(Debug, Clone, Default)]
pub struct MemoryDb {
    state: Arc<Mutex<DbState>>,
}

impl MemoryDb {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_project(&self, row: ProjectRow) {
        self.state
            .lock()
            .await
            .projects
            .insert(row.project_id.clone(), row);
    }

    pub async fn insert_tombstone(&self, record: DeletedProjectRecord) {
        self.state
            .lock()
            .await
            .tombstones
            .insert(record.project_id.clone(), record);
    }

    pub async fn add_site_admin(&self, account_id: &str) {
        self.state
            .lock()
            .await
            .site_admins
            .insert(account_id.to_string());
    }

    pub async fn set_backup_identities(&self, project_id: &str, identities: BackupIdentities) {
        self.state
            .lock()
            .await
            .backups
            .insert(project_id.to_string(), identities);
    }

    /// Seed `rows` rows for a project in a dependent table.
    pub async fn seed_table(&self, table: &str, project_id: &str, rows: u64) {
        self.state
            .lock()
            .await
            .tables
            .entry(table.to_string())
            .or_default()
            .insert(project_id.to_string(), rows);
    }

    /// Simulate schema skew: the table does not exist.
    pub async fn mark_table_missing(&self, table: &str) {
        self.state
            .lock()
            .await
            .missing_tables
            .insert(table.to_string());
    }

    /// Inject a hard failure on deletes from this table.
    pub async fn fail_table(&self, table: &str) {
        self.state
            .lock()
            .await
            .failing_tables
            .insert(table.to_string());
    }

    pub async fn project_exists(&self, project_id: &str) -> bool {
        self.state.lock().await.projects.contains_key(project_id)
    }

    pub async fn table_rows(&self, table: &str, project_id: &str) -> u64 {
        self.state
            .lock()
            .await
            .tables
            .get(table)
            .and_then(|t| t.get(project_id))
            .copied()
            .unwrap_or(0)
    }
}

enum TxWrite {
    UpsertTombstone(DeletedProjectRecord),
    ClearTable { table: String, project_id: String },
    DeleteProject(String),
}

struct MemoryTx {
    state: Arc<Mutex<DbState>>,
    writes: Vec<TxWrite>,
}

#[async_trait]
impl ProjectDb for MemoryDb {
    async fn get_project(&self, project_id: &str) -> Result<Option<ProjectRow>> {
        Ok(self.state.lock().await.projects.get(project_id).cloned())
    }

    async fn get_tombstone(&self, project_id: &str) -> Result<Option<DeletedProjectRecord>> {
        Ok(self.state.lock().await.tombstones.get(project_id).cloned())
    }

    async fn is_site_admin(&self, account_id: &str) -> Result<bool> {
        Ok(self.state.lock().await.site_admins.contains(account_id))
    }

    async fn backup_identities(&self, project_id: &str) -> Result<Option<BackupIdentities>> {
        Ok(self.state.lock().await.backups.get(project_id).cloned())
    }

    async fn begin(&self) -> Result<Box<dyn ProjectTx>> {
        Ok(Box::new(MemoryTx {
            state: self.state.clone(),
            writes: Vec::new(),
        }))
    }
}

#[async_trait]
impl ProjectTx for MemoryTx {
    async fn upsert_tombstone(&mut self, record: DeletedProjectRecord) -> Result<()> {
        self.writes.push(TxWrite::UpsertTombstone(record));
        Ok(())
    }

    async fn delete_rows(&mut self, table: &str, project_id: &str) -> Result<TableDelete> {
        let state = self.state.lock().await;
        if state.missing_tables.contains(table) {
            return Ok(TableDelete::Missing);
        }
        if state.failing_tables.contains(table) {
            bail!("delete from {} failed: simulated database error", table);
        }
        let count = state
            .tables
            .get(table)
            .and_then(|t| t.get(project_id))
            .copied()
            .unwrap_or(0);
        drop(state);
        self.writes.push(TxWrite::ClearTable {
            table: table.to_string(),
            project_id: project_id.to_string(),
        });
        Ok(TableDelete::Deleted(count))
    }

    async fn delete_project_row(&mut self, project_id: &str) -> Result<()> {
        self.writes.push(TxWrite::DeleteProject(project_id.to_string()));
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        // One lock acquisition: readers see all writes or none.
        let mut state = self.state.lock().await;
        for write in self.writes {
            match write {
                TxWrite::UpsertTombstone(record) => {
                    state.tombstones.insert(record.project_id.clone(), record);
                }
                TxWrite::ClearTable { table, project_id } => {
                    if let Some(rows) = state.tables.get_mut(&table) {
                        rows.remove(&project_id);
                    }
                }
                TxWrite::DeleteProject(project_id) => {
                    state.projects.remove(&project_id);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn project(project_id: &str, owner: &str) -> ProjectRow {
        ProjectRow {
            project_id: project_id.to_string(),
            name: format!("name-{}", project_id),
            title: format!("Title {}", project_id),
            description: String::new(),
            owner_account_id: owner.to_string(),
            host_id: Some("host-1".to_string()),
            created: Utc::now(),
            last_edited: None,
        }
    }

    fn tombstone_for(row: &ProjectRow) -> DeletedProjectRecord {
        DeletedProjectRecord {
            project_id: row.project_id.clone(),
            name: row.name.clone(),
            title: row.title.clone(),
            description: row.description.clone(),
            owner_account_id: row.owner_account_id.clone(),
            host_id: row.host_id.clone(),
            created: row.created,
            last_edited: row.last_edited,
            deleted_at: Utc::now(),
            deleted_by: row.owner_account_id.clone(),
            metadata: serde_json::json!({}),
        }
    }

    #[tokio::test]
    async fn reads_reflect_seeded_state() {
        let db = MemoryDb::new();
        db.insert_project(project("P1", "A1")).await;
        db.add_site_admin("root").await;
        db.seed_table("api_keys", "P1", 3).await;

        assert!(db.get_project("P1").await.unwrap().is_some());
        assert!(db.get_project("P2").await.unwrap().is_none());
        assert!(db.is_site_admin("root").await.unwrap());
        assert!(!db.is_site_admin("A1").await.unwrap());
        assert_eq!(db.table_rows("api_keys", "P1").await, 3);
        assert!(db.backup_identities("P1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn commit_applies_all_writes() {
        let db = MemoryDb::new();
        let row = project("P1", "A1");
        db.insert_project(row.clone()).await;
        db.seed_table("api_keys", "P1", 2).await;
        db.seed_table("project_log", "P1", 7).await;

        let mut tx = db.begin().await.unwrap();
        tx.upsert_tombstone(tombstone_for(&row)).await.unwrap();
        assert_eq!(
            tx.delete_rows("api_keys", "P1").await.unwrap(),
            TableDelete::Deleted(2)
        );
        assert_eq!(
            tx.delete_rows("project_log", "P1").await.unwrap(),
            TableDelete::Deleted(7)
        );
        tx.delete_project_row("P1").await.unwrap();

        // Nothing visible before commit.
        assert!(db.project_exists("P1").await);
        assert!(db.get_tombstone("P1").await.unwrap().is_none());

        tx.commit().await.unwrap();

        assert!(!db.project_exists("P1").await);
        assert!(db.get_tombstone("P1").await.unwrap().is_some());
        assert_eq!(db.table_rows("api_keys", "P1").await, 0);
        assert_eq!(db.table_rows("project_log", "P1").await, 0);
    }

    #[tokio::test]
    async fn dropped_transaction_discards_writes() {
        let db = MemoryDb::new();
        let row = project("P1", "A1");
        db.insert_project(row.clone()).await;
        db.seed_table("api_keys", "P1", 2).await;

        {
            let mut tx = db.begin().await.unwrap();
            tx.upsert_tombstone(tombstone_for(&row)).await.unwrap();
            tx.delete_rows("api_keys", "P1").await.unwrap();
            tx.delete_project_row("P1").await.unwrap();
            // Dropped without commit.
        }

        assert!(db.project_exists("P1").await);
        assert!(db.get_tombstone("P1").await.unwrap().is_none());
        assert_eq!(db.table_rows("api_keys", "P1").await, 2);
    }

    #[tokio::test]
    async fn missing_table_reports_schema_skew() {
        let db = MemoryDb::new();
        db.mark_table_missing("mentions").await;
        let mut tx = db.begin().await.unwrap();
        assert_eq!(
            tx.delete_rows("mentions", "P1").await.unwrap(),
            TableDelete::Missing
        );
    }

    #[tokio::test]
    async fn failing_table_errors() {
        let db = MemoryDb::new();
        db.fail_table("listings").await;
        let mut tx = db.begin().await.unwrap();
        let err = tx.delete_rows("listings", "P1").await.unwrap_err();
        assert!(err.to_string().contains("simulated database error"));
    }

    #[tokio::test]
    async fn delete_on_empty_table_counts_zero() {
        let db = MemoryDb::new();
        let mut tx = db.begin().await.unwrap();
        assert_eq!(
            tx.delete_rows("api_keys", "P1").await.unwrap(),
            TableDelete::Deleted(0)
        );
    }

    #[test]
    fn table_list_is_fixed_and_nonempty() {
        assert!(PROJECT_TABLES.contains(&"lro_ops"));
        assert!(PROJECT_TABLES.contains(&"api_keys"));
        assert_eq!(
            PROJECT_TABLES.len(),
            PROJECT_TABLES.iter().collect::<HashSet<_>>().len(),
            "no duplicate table names"
        );
    }
}
