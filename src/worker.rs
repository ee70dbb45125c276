//! Claim-and-execute worker loop.
//!
//! A [`Worker`] polls the store for claimable ops of one kind, runs them
//! through its executor with bounded parallelism, renews the lease in
//! the background while an execution is in flight, and writes the
//! terminal status when it finishes. Losing the lease mid-execution is
//! tolerated: the store's terminal-stickiness rules resolve the race
//! with whichever claimant finishes first.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

use crate::bus::{EventBus, LroSummary};
use crate::config::WorkerConfig;
use crate::executor::OpExecutor;
use crate::op::{LroOp, OpStatus};
use crate::progress::{OpProgress, Progress, ProgressSink};
use crate::store::{LroStore, LroUpdate};

/// Owner type recorded on every lease this crate takes.
pub const OWNER_TYPE: &str = "worker";

/// A worker bound to one operation kind.
pub struct Worker {
    kind: String,
    owner_id: String,
    config: WorkerConfig,
    store: Arc<dyn LroStore>,
    bus: Arc<dyn EventBus>,
    executor: Arc<dyn OpExecutor>,
}

/// Handle to a spawned worker. Dropping it without calling [`stop`]
/// detaches the loop; it keeps running until the runtime shuts down.
///
/// [`stop`]: WorkerHandle::stop
pub struct WorkerHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
    owner_id: String,
}

impl WorkerHandle {
    /// This worker's lease owner id.
    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    /// Stop claiming new ops and wait for in-flight executions to
    /// finish. In-flight work is never aborted; a mid-flight kill would
    /// just turn into a lease-expiry retry on another worker.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            warn!(error = %e, "worker task panicked during shutdown");
        }
    }
}

impl Worker {
    pub fn new(
        config: WorkerConfig,
        store: Arc<dyn LroStore>,
        bus: Arc<dyn EventBus>,
        executor: Arc<dyn OpExecutor>,
    ) -> Self {
        Self {
            kind: executor.kind().to_string(),
            owner_id: uuid::Uuid::new_v4().to_string(),
            config,
            store,
            bus,
            executor,
        }
    }

    /// Spawn the claim loop onto the current runtime.
    pub fn spawn(self) -> WorkerHandle {
        let (shutdown, rx) = watch::channel(false);
        let owner_id = self.owner_id.clone();
        info!(kind = %self.kind, owner_id = %owner_id, "worker starting");
        let task = tokio::spawn(self.run(rx));
        WorkerHandle {
            shutdown,
            task,
            owner_id,
        }
    }

    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.tick_interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut executions: JoinSet<()> = JoinSet::new();

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    // Reap finished executions before measuring capacity.
                    while let Some(res) = executions.try_join_next() {
                        if let Err(e) = res {
                            warn!(error = %e, "execution task panicked");
                        }
                    }
                    let capacity = self.config.max_parallel.saturating_sub(executions.len());
                    if capacity == 0 {
                        continue;
                    }
                    let claimed = match self
                        .store
                        .claim_ops(
                            &self.kind,
                            OWNER_TYPE,
                            &self.owner_id,
                            capacity,
                            self.config.lease(),
                        )
                        .await
                    {
                        Ok(ops) => ops,
                        Err(e) => {
                            // Store hiccups heal on the next tick.
                            warn!(kind = %self.kind, error = %e, "claim failed");
                            continue;
                        }
                    };
                    for op in claimed {
                        executions.spawn(execute_one(
                            op,
                            self.store.clone(),
                            self.bus.clone(),
                            self.executor.clone(),
                            self.owner_id.clone(),
                            self.config.heartbeat_interval(),
                        ));
                    }
                }
                _ = shutdown.changed() => break,
            }
        }

        debug!(kind = %self.kind, in_flight = executions.len(), "worker draining");
        while let Some(res) = executions.join_next().await {
            if let Err(e) = res {
                warn!(error = %e, "execution task panicked");
            }
        }
        info!(kind = %self.kind, owner_id = %self.owner_id, "worker stopped");
    }
}

/// Run one claimed op to a terminal status.
async fn execute_one(
    op: LroOp,
    store: Arc<dyn LroStore>,
    bus: Arc<dyn EventBus>,
    executor: Arc<dyn OpExecutor>,
    owner_id: String,
    heartbeat_interval: Duration,
) {
    info!(op_id = %op.op_id, kind = %op.kind, attempt = op.attempt, "executing op");

    if let Err(e) = executor.validate_input(&op.input) {
        // Bad input can never succeed on retry. Fail without executing.
        finalize(&store, &bus, &op, Err(e)).await;
        return;
    }

    let sink = Arc::new(OpProgress::new(
        op.op_id.clone(),
        op.scope_type,
        op.scope_id.clone(),
        store.clone(),
        bus.clone(),
        executor.phases(),
    ));
    // Refresh the summary to the first phase so observers see movement
    // even before the executor's own first report.
    if let Some(first) = executor.phases().first() {
        sink.report(Progress::new(first.name, "starting")).await;
    }

    let result = {
        // Heartbeat stops the moment execution ends, success or not.
        let _heartbeat = spawn_heartbeat(
            store.clone(),
            op.op_id.clone(),
            owner_id,
            heartbeat_interval,
        );
        // Child task so a panicking executor is contained and finalized
        // as a failure instead of leaving the op running until its lease
        // lapses.
        let task = {
            let executor = executor.clone();
            let sink = sink.clone();
            let op = op.clone();
            tokio::spawn(async move { executor.execute(&op, sink.as_ref()).await })
        };
        match task.await {
            Ok(result) => result,
            Err(e) if e.is_panic() => Err(anyhow::anyhow!(
                "executor panicked: {}",
                panic_message(e.into_panic())
            )),
            Err(_) => Err(anyhow::anyhow!("executor task canceled")),
        }
    };
    finalize(&store, &bus, &op, result).await;
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Write the terminal status and publish the summary.
async fn finalize(
    store: &Arc<dyn LroStore>,
    bus: &Arc<dyn EventBus>,
    op: &LroOp,
    result: anyhow::Result<serde_json::Value>,
) {
    let update = match &result {
        Ok(value) => {
            info!(op_id = %op.op_id, "op succeeded");
            LroUpdate {
                status: Some(OpStatus::Succeeded),
                result: Some(value.clone()),
                ..LroUpdate::default()
            }
        }
        Err(e) => {
            warn!(op_id = %op.op_id, error = %format!("{:#}", e), "op failed");
            LroUpdate {
                status: Some(OpStatus::Failed),
                error: Some(format!("{:#}", e)),
                ..LroUpdate::default()
            }
        }
    };

    let wrote = match store.update(&op.op_id, update).await {
        Ok(Some(_)) => true,
        Ok(None) => {
            // The op was reaped or finished elsewhere while we ran. Its
            // terminal summary is not ours to publish.
            warn!(op_id = %op.op_id, "terminal write dropped: op gone or already terminal");
            false
        }
        Err(e) => {
            warn!(op_id = %op.op_id, error = %e, "terminal write failed");
            false
        }
    };
    if !wrote {
        return;
    }

    let summary = LroSummary {
        scope_type: op.scope_type,
        scope_id: op.scope_id.clone(),
        op_id: op.op_id.clone(),
        status: if result.is_ok() {
            OpStatus::Succeeded
        } else {
            OpStatus::Failed
        },
        error: result.err().map(|e| format!("{:#}", e)),
    };
    if let Err(e) = bus.publish_summary(summary).await {
        warn!(op_id = %op.op_id, error = %e, "summary publish failed");
    }
}

/// Periodic lease renewal for one op, aborted when the guard drops.
fn spawn_heartbeat(
    store: Arc<dyn LroStore>,
    op_id: String,
    owner_id: String,
    interval: Duration,
) -> AbortOnDrop {
    let handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first interval tick fires immediately; the claim already
        // set a fresh deadline, so skip it.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if let Err(e) = store.touch(&op_id, OWNER_TYPE, &owner_id).await {
                // Keep trying; a transient store error must not let the
                // lease lapse by silencing all later renewals.
                warn!(op_id = %op_id, error = %e, "heartbeat failed");
            }
        }
    });
    AbortOnDrop(handle)
}

struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}
