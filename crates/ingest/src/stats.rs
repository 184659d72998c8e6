use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Statistics about one ingestion run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestStats {
    /// Deliveries taken from the queue
    pub received: u64,

    /// Deliveries assigned to a family and acknowledged
    pub ingested: u64,

    /// Samples that founded a new family
    pub families_created: u64,

    /// Samples whose text could not be fingerprinted
    pub degenerate: u64,

    /// Deliveries handed back to the queue after a processing failure
    pub requeued: u64,

    /// Acknowledgements the queue refused
    pub ack_failures: u64,

    /// Time taken in milliseconds
    pub duration_ms: u64,
}

#[derive(Debug, Default)]
pub(crate) struct IngestCounters {
    received: AtomicU64,
    ingested: AtomicU64,
    families_created: AtomicU64,
    degenerate: AtomicU64,
    requeued: AtomicU64,
    ack_failures: AtomicU64,
}

impl IngestCounters {
    pub(crate) fn add_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add_ingested(&self, created: bool, degenerate: bool) {
        self.ingested.fetch_add(1, Ordering::Relaxed);
        if created {
            self.families_created.fetch_add(1, Ordering::Relaxed);
        }
        if degenerate {
            self.degenerate.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn add_requeued(&self) {
        self.requeued.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add_ack_failure(&self) {
        self.ack_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> IngestStats {
        IngestStats {
            received: self.received.load(Ordering::Relaxed),
            ingested: self.ingested.load(Ordering::Relaxed),
            families_created: self.families_created.load(Ordering::Relaxed),
            degenerate: self.degenerate.load(Ordering::Relaxed),
            requeued: self.requeued.load(Ordering::Relaxed),
            ack_failures: self.ack_failures.load(Ordering::Relaxed),
            duration_ms: 0,
        }
    }
}
