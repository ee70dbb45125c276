//! Backup repository operations for workspace deletion.
//!
//! Workspace backups live in a content-addressed repository managed by
//! the `restic` CLI, with one logical "host" name per backup identity.
//! All operations shell out with a bounded timeout and an output-size
//! cap so a wedged or pathological tool cannot stall the worker.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::debug;

use crate::config::BackupToolConfig;

/// Snapshot operations the hard-delete workflow needs.
#[async_trait]
pub trait BackupClient: Send + Sync {
    /// List snapshot ids recorded under a logical host name.
    async fn list_snapshots(&self, host: &str) -> Result<Vec<String>>;

    /// Forget (delete) one snapshot under a logical host name.
    async fn forget_snapshot(&self, host: &str, snapshot_id: &str) -> Result<()>;
}

/// `restic` CLI wrapper.
#[derive(Debug, Clone)]
pub struct ResticBackups {
    binary: PathBuf,
    repository: String,
    password_file: Option<PathBuf>,
    timeout: Duration,
    max_output_bytes: usize,
}

impl ResticBackups {
    pub fn new(config: &BackupToolConfig) -> Self {
        Self {
            binary: config.binary.clone(),
            repository: config.repository.clone(),
            password_file: config.password_file.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
            max_output_bytes: config.max_output_bytes,
        }
    }

    /// Run restic with the repository flags prepended, returning stdout.
    ///
    /// stdout is read through a capped reader, not buffered whole, so a
    /// pathological tool cannot balloon memory before the cap check.
    async fn run(&self, args: &[&str]) -> Result<String> {
        debug!(args = ?args, "running backup tool");

        let mut cmd = Command::new(&self.binary);
        cmd.arg("-r")
            .arg(&self.repository)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(pw) = &self.password_file {
            cmd.env("RESTIC_PASSWORD_FILE", pw);
        }

        // One byte past the cap is enough to detect overflow.
        let cap = self.max_output_bytes as u64 + 1;
        let capture = async {
            let mut child = cmd.spawn().context("failed to execute backup tool")?;
            let mut stdout_pipe = child
                .stdout
                .take()
                .context("backup tool stdout unavailable")?;
            let mut stderr_pipe = child
                .stderr
                .take()
                .context("backup tool stderr unavailable")?;
            let mut stdout = Vec::new();
            let mut stderr = Vec::new();
            // Both pipes drained concurrently; reading them in sequence
            // can deadlock against a full pipe buffer.
            let mut stdout_capped = stdout_pipe.take(cap);
            let mut stderr_capped = stderr_pipe.take(64 * 1024);
            let (out, err) = tokio::join!(
                stdout_capped.read_to_end(&mut stdout),
                stderr_capped.read_to_end(&mut stderr),
            );
            out.context("failed to read backup tool output")?;
            err.context("failed to read backup tool stderr")?;
            if stdout.len() > self.max_output_bytes {
                // The tool may still be writing past the cap; waiting on
                // it would block on the full pipe.
                let _ = child.kill().await;
                bail!(
                    "restic {} produced more than {} bytes of output",
                    args.first().unwrap_or(&""),
                    self.max_output_bytes
                );
            }
            let status = child.wait().await.context("failed to wait for backup tool")?;
            anyhow::Ok((stdout, stderr, status))
        };
        let (stdout, stderr, status) = tokio::time::timeout(self.timeout, capture)
            .await
            .with_context(|| {
                format!(
                    "backup tool timed out after {}s: restic {}",
                    self.timeout.as_secs(),
                    args.join(" ")
                )
            })??;

        if !status.success() {
            let stderr = String::from_utf8_lossy(&stderr);
            bail!(
                "restic {} failed: {}",
                args.first().unwrap_or(&""),
                stderr.trim()
            );
        }

        Ok(String::from_utf8_lossy(&stdout).to_string())
    }
}

#[async_trait]
impl BackupClient for ResticBackups {
    async fn list_snapshots(&self, host: &str) -> Result<Vec<String>> {
        let output = self
            .run(&["--host", host, "snapshots", "--json"])
            .await
            .with_context(|| format!("failed to list snapshots for host {}", host))?;
        parse_snapshot_ids(&output)
            .with_context(|| format!("failed to parse snapshot list for host {}", host))
    }

    async fn forget_snapshot(&self, host: &str, snapshot_id: &str) -> Result<()> {
        self.run(&["--host", host, "forget", snapshot_id])
            .await
            .with_context(|| format!("failed to forget snapshot {} for host {}", snapshot_id, host))?;
        Ok(())
    }
}

/// Parse `restic snapshots --json` output into snapshot ids.
///
/// restic prints a JSON array of snapshot objects, or `null` when the
/// repository has no matching snapshots. Entries without a string `id`
/// are skipped.
pub(crate) fn parse_snapshot_ids(output: &str) -> Result<Vec<String>> {
    let trimmed = output.trim();
    if trimmed.is_empty() || trimmed == "null" {
        return Ok(Vec::new());
    }

    let value: serde_json::Value =
        serde_json::from_str(trimmed).context("snapshot list is not valid JSON")?;
    let entries = match value {
        serde_json::Value::Array(entries) => entries,
        serde_json::Value::Null => return Ok(Vec::new()),
        other => bail!("snapshot list is not a JSON array: {}", other),
    };

    Ok(entries
        .iter()
        .filter_map(|e| e.get("id").and_then(|id| id.as_str()).map(String::from))
        .collect())
}
