use crate::config::ServiceConfig;
use crate::coordinator::{CoordinatorConfig, IngestCoordinator};
use crate::error::{IngestError, Result};
use crate::health::HealthSnapshot;
use crate::lock::{acquire_checkpoint_lock, CheckpointLock};
use crate::queue::ArtifactQueue;
use crate::scheduler::Maintenance;
use crate::stats::IngestStats;
use codefam_fingerprint::Fingerprinter;
use codefam_registry::{CheckpointReport, CheckpointStore, Registry, RegistryMetrics};
use log::{info, warn};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};

/// What a stopped service leaves behind
#[derive(Debug, Clone, Serialize)]
pub struct ShutdownReport {
    pub ingest: IngestStats,
    pub registry: RegistryMetrics,
    pub checkpoint: CheckpointReport,
}

/// A running ingestion pipeline: workers, maintenance loop, and exclusive
/// ownership of the checkpoint directory.
///
/// Stopping always follows the same order: stop receiving, let in-flight
/// deliveries finish, stop maintenance, write a final checkpoint.
pub struct IngestService {
    registry: Arc<Registry>,
    queue: Arc<dyn ArtifactQueue>,
    maintenance: Arc<Maintenance>,
    shutdown_tx: watch::Sender<bool>,
    stop_maintenance_tx: watch::Sender<bool>,
    workers: JoinHandle<IngestStats>,
    maintenance_task: JoinHandle<()>,
    _lock: CheckpointLock,
}

impl IngestService {
    /// Lock the checkpoint directory, restore the registry from it, and start
    /// consuming `queue`. A corrupt checkpoint or a held lock fails here.
    pub async fn start(config: ServiceConfig, queue: Arc<dyn ArtifactQueue>) -> Result<Self> {
        config.validate()?;

        let lock = acquire_checkpoint_lock(&config.checkpoint.dir).await?;
        let store = CheckpointStore::new(&config.checkpoint.dir);
        let registry = Arc::new(store.restore(config.registry).await?);
        info!(
            "Registry ready: {} families, {} samples (threshold {})",
            registry.family_count(),
            registry.sample_count(),
            config.registry.threshold
        );

        let maintenance = Arc::new(Maintenance::new(
            Arc::clone(&registry),
            store,
            config.checkpoint.clone(),
            config.purge,
        ));
        let coordinator = Arc::new(
            IngestCoordinator::new(
                Arc::clone(&registry),
                Fingerprinter::new(config.fingerprint),
                Arc::clone(&queue),
                CoordinatorConfig {
                    workers: config.workers,
                },
            )
            .with_checkpoint_trigger(maintenance.trigger()),
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (stop_maintenance_tx, stop_maintenance_rx) = watch::channel(false);
        let workers = tokio::spawn(coordinator.run(shutdown_rx));
        let maintenance_task = tokio::spawn(Arc::clone(&maintenance).run(stop_maintenance_rx));

        Ok(Self {
            registry,
            queue,
            maintenance,
            shutdown_tx,
            stop_maintenance_tx,
            workers,
            maintenance_task,
            _lock: lock,
        })
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    #[must_use]
    pub fn health(&self) -> HealthSnapshot {
        self.maintenance.health()
    }

    #[must_use]
    pub fn health_stream(&self) -> watch::Receiver<HealthSnapshot> {
        self.maintenance.health_stream()
    }

    /// Stop now, finishing in-flight work.
    pub async fn shutdown(self) -> Result<ShutdownReport> {
        self.stop_receiving();
        self.finish(None).await
    }

    fn stop_receiving(&self) {
        self.queue.close();
        let _ = self.shutdown_tx.send(true);
    }

    /// Run until the queue is drained or `signal` resolves, whichever comes
    /// first, then shut down.
    pub async fn run_until<F>(mut self, signal: F) -> Result<ShutdownReport>
    where
        F: Future<Output = ()>,
    {
        let joined = tokio::select! {
            () = signal => {
                info!("Shutdown requested");
                self.stop_receiving();
                None
            }
            joined = &mut self.workers => Some(joined),
        };
        self.finish(joined).await
    }

    /// A failed worker join is reported only after maintenance stopped and
    /// the final checkpoint was attempted, so nothing writes the checkpoint
    /// directory once the lock is released.
    async fn finish(
        self,
        joined: Option<std::result::Result<IngestStats, JoinError>>,
    ) -> Result<ShutdownReport> {
        let joined = match joined {
            Some(joined) => joined,
            None => self.workers.await,
        };
        if joined.is_err() {
            self.queue.close();
            let _ = self.shutdown_tx.send(true);
        }

        let _ = self.stop_maintenance_tx.send(true);
        if let Err(err) = self.maintenance_task.await {
            warn!("Maintenance task failed: {err}");
        }

        let checkpoint = self.maintenance.checkpoint_with_retry("shutdown").await;
        let ingest = match joined {
            Ok(ingest) => ingest,
            Err(err) => {
                if let Err(checkpoint_err) = &checkpoint {
                    warn!("Final checkpoint failed as well: {checkpoint_err}");
                }
                return Err(IngestError::Other(format!("join ingestion workers: {err}")));
            }
        };
        Ok(ShutdownReport {
            ingest,
            registry: self.registry.metrics(),
            checkpoint: checkpoint?,
        })
    }
}
