use crate::config::{CheckpointConfig, PurgeConfig};
use crate::health::{write_health_snapshot, HealthSnapshot};
use codefam_registry::{unix_now_ms, CheckpointReport, CheckpointStore, Registry};
use log::{debug, error, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::time::{self, Instant, MissedTickBehavior};

const MIN_TICK: Duration = Duration::from_secs(1);

/// Wakes the maintenance loop once enough assignments are not yet durable.
#[derive(Debug, Clone)]
pub struct CheckpointTrigger {
    every_assignments: u64,
    notify: Arc<Notify>,
}

impl CheckpointTrigger {
    pub fn observe(&self, registry: &Registry) {
        if registry.assignments_since_checkpoint() >= self.every_assignments {
            self.notify.notify_one();
        }
    }
}

/// Periodic checkpointing and purging of one registry.
#[derive(Debug)]
pub struct Maintenance {
    registry: Arc<Registry>,
    store: CheckpointStore,
    checkpoint: CheckpointConfig,
    purge: PurgeConfig,
    trigger: Arc<Notify>,
    purged_since_checkpoint: AtomicBool,
    health_tx: watch::Sender<HealthSnapshot>,
}

impl Maintenance {
    pub fn new(
        registry: Arc<Registry>,
        store: CheckpointStore,
        checkpoint: CheckpointConfig,
        purge: PurgeConfig,
    ) -> Self {
        let (health_tx, _) = watch::channel(HealthSnapshot::default());
        Self {
            registry,
            store,
            checkpoint,
            purge,
            trigger: Arc::new(Notify::new()),
            purged_since_checkpoint: AtomicBool::new(false),
            health_tx,
        }
    }

    #[must_use]
    pub fn trigger(&self) -> CheckpointTrigger {
        CheckpointTrigger {
            every_assignments: self.checkpoint.every_assignments.max(1),
            notify: Arc::clone(&self.trigger),
        }
    }

    #[must_use]
    pub fn health(&self) -> HealthSnapshot {
        self.health_tx.borrow().clone()
    }

    #[must_use]
    pub fn health_stream(&self) -> watch::Receiver<HealthSnapshot> {
        self.health_tx.subscribe()
    }

    /// Checkpoint, retrying with exponential backoff. Exhausting the attempts
    /// raises an alert (error log, health failure) and returns the last
    /// error; the registry keeps serving from memory either way.
    pub async fn checkpoint_with_retry(
        &self,
        reason: &str,
    ) -> codefam_registry::Result<CheckpointReport> {
        let attempts = self.checkpoint.max_attempts.max(1);
        let mut backoff = self.checkpoint.initial_backoff();
        let mut attempt = 1;
        let purged = self.purged_since_checkpoint.swap(false, Ordering::SeqCst);

        loop {
            match self.store.checkpoint(&self.registry).await {
                Ok(report) => {
                    info!(
                        "Checkpoint ({reason}): {} families, {} samples, {} bytes in {}ms",
                        report.families, report.samples, report.bytes, report.duration_ms
                    );
                    self.health_tx
                        .send_modify(|health| health.record_checkpoint(&report, reason));
                    self.persist_health().await;
                    return Ok(report);
                }
                Err(err) if attempt < attempts => {
                    warn!(
                        "Checkpoint ({reason}) attempt {attempt}/{attempts} failed: {err}; retrying in {backoff:?}"
                    );
                    time::sleep(backoff).await;
                    backoff = backoff.saturating_mul(2);
                    attempt += 1;
                }
                Err(err) => {
                    error!("Checkpoint ({reason}) failed after {attempt} attempts: {err}");
                    if purged {
                        self.purged_since_checkpoint.store(true, Ordering::SeqCst);
                    }
                    let detail = err.to_string();
                    self.health_tx
                        .send_modify(|health| health.record_failure("checkpoint", &detail));
                    self.persist_health().await;
                    return Err(err);
                }
            }
        }
    }

    /// One purge pass. Returns the number of families removed.
    pub async fn purge_once(&self, now_unix_ms: u64) -> usize {
        let removed = self.purge.policy().purge(&self.registry, now_unix_ms);
        if removed > 0 {
            self.purged_since_checkpoint.store(true, Ordering::SeqCst);
        }
        self.health_tx.send_modify(|health| health.record_purge(removed));
        self.persist_health().await;
        removed
    }

    fn is_dirty(&self) -> bool {
        self.registry.assignments_since_checkpoint() > 0
            || self.purged_since_checkpoint.load(Ordering::SeqCst)
    }

    async fn persist_health(&self) {
        let snapshot = self.health();
        if let Err(err) = write_health_snapshot(&self.checkpoint.dir, &snapshot).await {
            warn!("Failed to persist health snapshot: {err}");
        }
    }

    /// Drive checkpoints and purges until `stop` flips to `true` (or its
    /// sender goes away). The final checkpoint is left to the caller, after
    /// ingestion has drained.
    pub async fn run(self: Arc<Self>, mut stop: watch::Receiver<bool>) {
        let checkpoint_every = self.checkpoint.interval().max(MIN_TICK);
        let purge_every = self.purge.interval().max(MIN_TICK);
        let mut checkpoint_tick = time::interval_at(Instant::now() + checkpoint_every, checkpoint_every);
        checkpoint_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut purge_tick = time::interval_at(Instant::now() + purge_every, purge_every);
        purge_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let purge_enabled = self.purge.enabled;

        loop {
            tokio::select! {
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        break;
                    }
                }
                _ = checkpoint_tick.tick() => {
                    if self.is_dirty() {
                        let _ = self.checkpoint_with_retry("interval").await;
                    } else {
                        debug!("Checkpoint interval elapsed, nothing new to persist");
                    }
                }
                () = self.trigger.notified() => {
                    if self.registry.assignments_since_checkpoint() >= self.checkpoint.every_assignments {
                        let _ = self.checkpoint_with_retry("assignments").await;
                        checkpoint_tick.reset();
                    }
                }
                _ = purge_tick.tick(), if purge_enabled => {
                    self.purge_once(unix_now_ms()).await;
                }
            }
        }
        debug!("Maintenance loop stopped");
    }
}
