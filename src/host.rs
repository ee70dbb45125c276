//! Host-control operations consumed by destructive workflows.
//!
//! The cluster transport that actually reaches a host is external; in
//! the deletion path both operations are best-effort. An offline or
//! already-reclaimed host must never block a permanent delete: the
//! authoritative guarantee is the database purge.

use anyhow::Result;
use async_trait::async_trait;

/// Commands sent to the host currently running a workload.
#[async_trait]
pub trait HostControl: Send + Sync {
    /// Ask the host to stop running the workload.
    async fn stop_workload(&self, workload_id: &str) -> Result<()>;

    /// Ask the host to erase the workload's on-host data.
    async fn delete_workload_data(&self, workload_id: &str, host_id: &str) -> Result<()>;
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::atomic::{AtomicBool, Ordering};

    use anyhow::bail;
    use tokio::sync::Mutex;

    use super::*;

    /// Records every call; optionally fails everything.
    #[derive(Debug, Default)]
    pub struct RecordingHost {
        pub stopped: Mutex<Vec<String>>,
        pub wiped: Mutex<Vec<(String, String)>>,
        pub fail: AtomicBool,
    }

    impl RecordingHost {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn failing() -> Self {
            let host = Self::default();
            host.fail.store(true, Ordering::SeqCst);
            host
        }
    }

    #[async_trait]
    impl HostControl for RecordingHost {
        async fn stop_workload(&self, workload_id: &str) -> Result<()> {
            if self.fail.load(Ordering::SeqCst) {
                bail!("host unreachable");
            }
            self.stopped.lock().await.push(workload_id.to_string());
            Ok(())
        }

        async fn delete_workload_data(&self, workload_id: &str, host_id: &str) -> Result<()> {
            if self.fail.load(Ordering::SeqCst) {
                bail!("host unreachable");
            }
            self.wiped
                .lock()
                .await
                .push((workload_id.to_string(), host_id.to_string()));
            Ok(())
        }
    }
}
