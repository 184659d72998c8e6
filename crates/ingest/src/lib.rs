//! # Codefam Ingest
//!
//! Long-running ingestion service around the family registry.
//!
//! ## Pipeline
//!
//! ```text
//! ArtifactQueue (memory / spool directory)
//!     │
//!     ├──> IngestCoordinator (N workers, ack after assign)
//!     │      └─> Fingerprinter → Registry::assign
//!     │
//!     └──> Maintenance
//!            ├─> checkpoint every interval or N assignments (retry + backoff)
//!            ├─> purge stale singleton families
//!            └─> health.json
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use codefam_ingest::{IngestService, ServiceConfig, SpoolOptions, SpoolQueue};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ServiceConfig::load(None)?;
//!     let queue = SpoolQueue::open("spool", SpoolOptions::default()).await?;
//!     let service = IngestService::start(config, Arc::new(queue)).await?;
//!
//!     let report = service
//!         .run_until(async {
//!             let _ = tokio::signal::ctrl_c().await;
//!         })
//!         .await?;
//!     println!("{} samples ingested", report.ingest.ingested);
//!     Ok(())
//! }
//! ```

mod config;
mod coordinator;
mod error;
mod health;
mod limits;
mod lock;
mod queue;
mod scheduler;
mod service;
mod stats;

pub use config::{
    CheckpointConfig, PurgeConfig, ServiceConfig, CHECKPOINT_DIR_ENV, DEFAULT_CHECKPOINT_DIR,
    RETENTION_SECS_ENV, THRESHOLD_ENV,
};
pub use coordinator::{ingest_item, CoordinatorConfig, IngestCoordinator, Ingested};
pub use error::{IngestError, Result};
pub use health::{health_file_path, read_health_snapshot, write_health_snapshot, HealthSnapshot};
pub use limits::{default_workers, parse_workers, MAX_WORKERS, WORKERS_ENV};
pub use lock::{acquire_checkpoint_lock, lock_path_for_dir, CheckpointLock, LOCK_FILE_NAME};
pub use queue::{
    ArtifactQueue, Delivery, DeliveryTag, MemoryQueue, QueueItem, SpoolOptions, SpoolQueue,
};
pub use scheduler::{CheckpointTrigger, Maintenance};
pub use service::{IngestService, ShutdownReport};
pub use stats::IngestStats;
