use crate::queue::{ArtifactQueue, Delivery, QueueItem};
use crate::scheduler::CheckpointTrigger;
use crate::stats::{IngestCounters, IngestStats};
use codefam_fingerprint::Fingerprinter;
use codefam_registry::{unix_now_ms, Assignment, Registry};
use log::{debug, error, info, warn};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;

const RECEIVE_RETRY_DELAY: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordinatorConfig {
    pub workers: usize,
}

/// Outcome of pushing one queue item through fingerprinting and assignment
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Ingested {
    pub assignment: Assignment,
    /// The text could not be fingerprinted and founded a singleton family
    pub degenerate: bool,
}

/// Fingerprint `item` and assign it to a family. Never fails: unusable text
/// degrades to a degenerate fingerprint.
pub fn ingest_item(
    registry: &Registry,
    fingerprinter: &Fingerprinter,
    item: QueueItem,
    observed_at_unix_ms: u64,
) -> Ingested {
    let fingerprinted = fingerprinter.fingerprint_or_degenerate(&item.raw_text);
    let degenerate = fingerprinted.fingerprint.is_degenerate();
    let mut sample = registry.admit(item.raw_text, item.metadata, fingerprinted, observed_at_unix_ms);
    let assignment = registry.assign_detailed(&mut sample);
    debug!(
        "Sample {} -> family {} (created: {}, score: {:?})",
        assignment.sample_id, assignment.family_id, assignment.created, assignment.score
    );
    Ingested {
        assignment,
        degenerate,
    }
}

/// Pool of workers moving artifacts from the queue into the registry.
///
/// Each worker holds at most one delivery. The delivery is acknowledged only
/// after its sample was assigned; if processing dies first, it is handed
/// back to the queue.
pub struct IngestCoordinator {
    registry: Arc<Registry>,
    fingerprinter: Fingerprinter,
    queue: Arc<dyn ArtifactQueue>,
    config: CoordinatorConfig,
    counters: IngestCounters,
    checkpoint_trigger: Option<CheckpointTrigger>,
}

impl IngestCoordinator {
    pub fn new(
        registry: Arc<Registry>,
        fingerprinter: Fingerprinter,
        queue: Arc<dyn ArtifactQueue>,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            registry,
            fingerprinter,
            queue,
            config,
            counters: IngestCounters::default(),
            checkpoint_trigger: None,
        }
    }

    #[must_use]
    pub fn with_checkpoint_trigger(mut self, trigger: CheckpointTrigger) -> Self {
        self.checkpoint_trigger = Some(trigger);
        self
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    #[must_use]
    pub fn stats(&self) -> IngestStats {
        self.counters.snapshot()
    }

    /// Process one item on the calling thread, outside the queue protocol.
    pub fn ingest_item(&self, item: QueueItem) -> Ingested {
        self.counters.add_received();
        let ingested = ingest_item(&self.registry, &self.fingerprinter, item, unix_now_ms());
        self.record(&ingested);
        ingested
    }

    fn record(&self, ingested: &Ingested) {
        self.counters
            .add_ingested(ingested.assignment.created, ingested.degenerate);
        if let Some(trigger) = &self.checkpoint_trigger {
            trigger.observe(&self.registry);
        }
    }

    /// Run the worker pool until the queue is drained or `shutdown` flips to
    /// `true`. In-flight deliveries always finish before this returns.
    pub async fn run(self: Arc<Self>, shutdown: watch::Receiver<bool>) -> IngestStats {
        let started = Instant::now();
        let workers = self.config.workers.max(1);
        info!("Starting {workers} ingestion workers");

        let mut handles = Vec::with_capacity(workers);
        for worker_id in 0..workers {
            let coordinator = Arc::clone(&self);
            let shutdown = shutdown.clone();
            handles.push(tokio::spawn(async move {
                coordinator.worker_loop(worker_id, shutdown).await;
            }));
        }
        for handle in handles {
            if let Err(err) = handle.await {
                error!("Ingestion worker task failed: {err}");
            }
        }

        let mut stats = self.counters.snapshot();
        stats.duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        info!(
            "Ingestion stopped: {} received, {} ingested, {} families created, {} requeued",
            stats.received, stats.ingested, stats.families_created, stats.requeued
        );
        stats
    }

    async fn worker_loop(&self, worker_id: usize, mut shutdown: watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                break;
            }
            let received = tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
                received = self.queue.receive() => received,
            };

            match received {
                Ok(Some(delivery)) => self.process(worker_id, delivery).await,
                Ok(None) => {
                    debug!("Worker {worker_id}: queue drained");
                    break;
                }
                Err(err) => {
                    warn!("Worker {worker_id}: receive failed: {err}");
                    tokio::time::sleep(RECEIVE_RETRY_DELAY).await;
                }
            }
        }
    }

    async fn process(&self, worker_id: usize, delivery: Delivery) {
        self.counters.add_received();
        let tag = delivery.tag;
        if delivery.redelivered {
            debug!("Worker {worker_id}: delivery {} is a redelivery", tag.0);
        }

        let registry = Arc::clone(&self.registry);
        let fingerprinter = self.fingerprinter.clone();
        let item = delivery.item;
        let outcome = tokio::task::spawn_blocking(move || {
            ingest_item(&registry, &fingerprinter, item, unix_now_ms())
        })
        .await;

        match outcome {
            Ok(ingested) => {
                self.record(&ingested);
                if let Err(err) = self.queue.ack(tag).await {
                    self.counters.add_ack_failure();
                    warn!("Worker {worker_id}: ack of delivery {} failed: {err}", tag.0);
                }
            }
            Err(err) => {
                error!(
                    "Worker {worker_id}: processing delivery {} failed: {err}; requeueing",
                    tag.0
                );
                self.counters.add_requeued();
                if let Err(err) = self.queue.nack(tag).await {
                    warn!("Worker {worker_id}: nack of delivery {} failed: {err}", tag.0);
                }
            }
        }
    }
}
