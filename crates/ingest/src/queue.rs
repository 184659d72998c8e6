use crate::error::{IngestError, Result};
use async_trait::async_trait;
use codefam_registry::unix_now_ms;
use log::{debug, info, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Notify;

/// One raw artifact as delivered by the upstream listener.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
    pub raw_text: String,
    /// Opaque provenance (address, chain, block, contract name)
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl QueueItem {
    pub fn new(raw_text: impl Into<String>, metadata: serde_json::Value) -> Self {
        Self {
            raw_text: raw_text.into(),
            metadata,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeliveryTag(pub u64);

#[derive(Debug, Clone)]
pub struct Delivery {
    pub tag: DeliveryTag,
    pub item: QueueItem,
    /// The item was handed out before and came back via `nack` or crash
    /// recovery.
    pub redelivered: bool,
}

/// At-least-once artifact source.
///
/// A received delivery stays in flight until it is acknowledged (removed for
/// good) or negatively acknowledged (handed out again later). `receive`
/// returns `Ok(None)` once the queue is closed and nothing remains in flight.
#[async_trait]
pub trait ArtifactQueue: Send + Sync {
    async fn receive(&self) -> Result<Option<Delivery>>;

    async fn ack(&self, tag: DeliveryTag) -> Result<()>;

    async fn nack(&self, tag: DeliveryTag) -> Result<()>;

    /// Stop handing out new work. Blocked receivers wake up and end with
    /// `Ok(None)` once nothing they may still return is left.
    fn close(&self);
}

#[derive(Debug, Default)]
struct MemoryState {
    ready: VecDeque<(QueueItem, bool)>,
    in_flight: HashMap<DeliveryTag, QueueItem>,
    next_tag: u64,
    closed: bool,
}

/// In-process queue.
#[derive(Debug, Default)]
pub struct MemoryQueue {
    state: Mutex<MemoryState>,
    changed: Notify,
}

impl MemoryQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue pre-filled with `items` and already closed, so it drains.
    pub fn closed_with(items: impl IntoIterator<Item = QueueItem>) -> Self {
        let queue = Self::new();
        {
            let mut state = queue.state.lock();
            state.ready.extend(items.into_iter().map(|item| (item, false)));
            state.closed = true;
        }
        queue
    }

    pub fn push(&self, item: QueueItem) -> Result<()> {
        {
            let mut state = self.state.lock();
            if state.closed {
                return Err(IngestError::Queue("queue is closed".to_string()));
            }
            state.ready.push_back((item, false));
        }
        self.changed.notify_waiters();
        Ok(())
    }

    #[must_use]
    pub fn ready_len(&self) -> usize {
        self.state.lock().ready.len()
    }

    #[must_use]
    pub fn in_flight_len(&self) -> usize {
        self.state.lock().in_flight.len()
    }
}

#[async_trait]
impl ArtifactQueue for MemoryQueue {
    async fn receive(&self) -> Result<Option<Delivery>> {
        loop {
            let notified = self.changed.notified();
            {
                let mut state = self.state.lock();
                if let Some((item, redelivered)) = state.ready.pop_front() {
                    let tag = DeliveryTag(state.next_tag);
                    state.next_tag += 1;
                    state.in_flight.insert(tag, item.clone());
                    return Ok(Some(Delivery {
                        tag,
                        item,
                        redelivered,
                    }));
                }
                // in-flight items may still come back through nack
                if state.closed && state.in_flight.is_empty() {
                    return Ok(None);
                }
            }
            notified.await;
        }
    }

    async fn ack(&self, tag: DeliveryTag) -> Result<()> {
        let removed = self.state.lock().in_flight.remove(&tag);
        self.changed.notify_waiters();
        removed
            .map(|_| ())
            .ok_or_else(|| IngestError::Queue(format!("unknown delivery tag {}", tag.0)))
    }

    async fn nack(&self, tag: DeliveryTag) -> Result<()> {
        {
            let mut state = self.state.lock();
            let item = state
                .in_flight
                .remove(&tag)
                .ok_or_else(|| IngestError::Queue(format!("unknown delivery tag {}", tag.0)))?;
            state.ready.push_front((item, true));
        }
        self.changed.notify_waiters();
        Ok(())
    }

    /// New pushes are refused; items already queued still drain.
    fn close(&self) {
        self.state.lock().closed = true;
        self.changed.notify_waiters();
    }
}

const ITEM_EXTENSION: &str = "json";
const CLAIMED_EXTENSION: &str = "claimed";
const REJECTED_EXTENSION: &str = "rejected";
const TMP_EXTENSION: &str = "tmp";

#[derive(Debug, Clone, Copy)]
pub struct SpoolOptions {
    /// How often an empty spool is rescanned
    pub poll_interval: Duration,
    /// Report the queue as finished once the spool is empty and nothing is in
    /// flight, instead of waiting for new files.
    pub drain: bool,
}

impl Default for SpoolOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            drain: false,
        }
    }
}

/// Directory-backed queue: one `*.json` file per [`QueueItem`].
///
/// Receiving claims a file by renaming it to `*.claimed`; `ack` deletes it
/// and `nack` renames it back. Files still claimed when the process died are
/// returned to the spool by [`SpoolQueue::open`]. Unparsable files are
/// renamed to `*.rejected` and skipped.
#[derive(Debug)]
pub struct SpoolQueue {
    dir: PathBuf,
    options: SpoolOptions,
    closed: AtomicBool,
    next_tag: AtomicU64,
    claimed: Mutex<HashMap<DeliveryTag, PathBuf>>,
    redelivered: Mutex<HashSet<PathBuf>>,
    changed: Notify,
}

impl SpoolQueue {
    pub async fn open(dir: impl Into<PathBuf>, options: SpoolOptions) -> Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;

        let mut recovered = HashSet::new();
        for claimed in list_with_extension(&dir, CLAIMED_EXTENSION).await? {
            let item = claimed.with_extension(ITEM_EXTENSION);
            tokio::fs::rename(&claimed, &item).await?;
            recovered.insert(item);
        }
        if !recovered.is_empty() {
            info!(
                "Recovered {} claimed spool items in {}",
                recovered.len(),
                dir.display()
            );
        }

        Ok(Self {
            dir,
            options,
            closed: AtomicBool::new(false),
            next_tag: AtomicU64::new(0),
            claimed: Mutex::new(HashMap::new()),
            redelivered: Mutex::new(recovered),
            changed: Notify::new(),
        })
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Atomically drop one item into a spool directory.
    pub async fn enqueue(dir: &Path, item: &QueueItem) -> Result<PathBuf> {
        static SEQ: AtomicU64 = AtomicU64::new(0);

        tokio::fs::create_dir_all(dir).await?;
        let seq = SEQ.fetch_add(1, Ordering::Relaxed);
        let stem = format!("{:013}-{}-{seq:06}", unix_now_ms(), std::process::id());
        let path = dir.join(format!("{stem}.{ITEM_EXTENSION}"));
        let tmp = dir.join(format!("{stem}.{TMP_EXTENSION}"));

        let bytes = serde_json::to_vec(item)?;
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(path)
    }

    /// Files waiting to be claimed, oldest name first.
    pub async fn pending(&self) -> Result<Vec<PathBuf>> {
        list_with_extension(&self.dir, ITEM_EXTENSION).await
    }

    async fn try_claim(&self, path: &Path) -> Result<Option<Delivery>> {
        let claimed = path.with_extension(CLAIMED_EXTENSION);
        match tokio::fs::rename(path, &claimed).await {
            Ok(()) => {}
            // another worker got there first
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        }

        let parsed = match tokio::fs::read(&claimed).await {
            Ok(bytes) => serde_json::from_slice::<QueueItem>(&bytes).map_err(|err| err.to_string()),
            Err(err) => Err(err.to_string()),
        };
        match parsed {
            Ok(item) => {
                let tag = DeliveryTag(self.next_tag.fetch_add(1, Ordering::Relaxed));
                self.claimed.lock().insert(tag, claimed);
                let redelivered = self.redelivered.lock().remove(path);
                Ok(Some(Delivery {
                    tag,
                    item,
                    redelivered,
                }))
            }
            Err(reason) => {
                warn!("Rejecting malformed spool item {}: {reason}", path.display());
                let rejected = path.with_extension(REJECTED_EXTENSION);
                if let Err(err) = tokio::fs::rename(&claimed, &rejected).await {
                    warn!("Failed to move {} aside: {err}", claimed.display());
                }
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl ArtifactQueue for SpoolQueue {
    async fn receive(&self) -> Result<Option<Delivery>> {
        loop {
            if self.closed.load(Ordering::SeqCst) {
                return Ok(None);
            }
            let notified = self.changed.notified();

            for path in self.pending().await? {
                if let Some(delivery) = self.try_claim(&path).await? {
                    return Ok(Some(delivery));
                }
            }

            if self.options.drain && self.claimed.lock().is_empty() {
                debug!("Spool {} drained", self.dir.display());
                return Ok(None);
            }

            tokio::select! {
                () = notified => {}
                () = tokio::time::sleep(self.options.poll_interval) => {}
            }
        }
    }

    async fn ack(&self, tag: DeliveryTag) -> Result<()> {
        let claimed = self
            .claimed
            .lock()
            .remove(&tag)
            .ok_or_else(|| IngestError::Queue(format!("unknown delivery tag {}", tag.0)))?;
        let removed = tokio::fs::remove_file(&claimed).await;
        self.changed.notify_waiters();
        removed.map_err(IngestError::from)
    }

    async fn nack(&self, tag: DeliveryTag) -> Result<()> {
        let claimed = self
            .claimed
            .lock()
            .remove(&tag)
            .ok_or_else(|| IngestError::Queue(format!("unknown delivery tag {}", tag.0)))?;
        let item = claimed.with_extension(ITEM_EXTENSION);
        let renamed = tokio::fs::rename(&claimed, &item).await;
        if renamed.is_ok() {
            self.redelivered.lock().insert(item);
        }
        self.changed.notify_waiters();
        renamed.map_err(IngestError::from)
    }

    /// Unclaimed files stay in the spool for the next run.
    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.changed.notify_waiters();
    }
}

async fn list_with_extension(dir: &Path, extension: &str) -> Result<Vec<PathBuf>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut paths = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) == Some(extension) {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn item(text: &str) -> QueueItem {
        QueueItem::new(text, json!({}))
    }

    #[tokio::test]
    async fn memory_queue_requeues_nacked_items_first() {
        let queue = MemoryQueue::new();
        queue.push(item("a")).unwrap();
        queue.push(item("b")).unwrap();

        let first = queue.receive().await.unwrap().unwrap();
        assert_eq!(first.item.raw_text, "a");
        assert!(!first.redelivered);
        queue.nack(first.tag).await.unwrap();

        let again = queue.receive().await.unwrap().unwrap();
        assert_eq!(again.item.raw_text, "a");
        assert!(again.redelivered);
        assert_ne!(again.tag, first.tag);
        queue.ack(again.tag).await.unwrap();
        assert!(queue.ack(again.tag).await.is_err());
    }

    #[tokio::test]
    async fn closed_memory_queue_drains_then_ends() {
        let queue = MemoryQueue::closed_with([item("a")]);
        assert!(queue.push(item("late")).is_err());

        let delivery = queue.receive().await.unwrap().unwrap();
        assert_eq!(queue.in_flight_len(), 1);
        queue.ack(delivery.tag).await.unwrap();
        assert!(queue.receive().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn receiver_waits_for_in_flight_before_ending() {
        let queue = std::sync::Arc::new(MemoryQueue::closed_with([item("a")]));
        let delivery = queue.receive().await.unwrap().unwrap();

        let waiter = {
            let queue = std::sync::Arc::clone(&queue);
            tokio::spawn(async move { queue.receive().await })
        };
        tokio::task::yield_now().await;
        queue.nack(delivery.tag).await.unwrap();

        let redelivered = waiter.await.unwrap().unwrap().unwrap();
        assert_eq!(redelivered.item.raw_text, "a");
        assert!(redelivered.redelivered);
    }

    #[tokio::test]
    async fn spool_claims_acks_and_rejects() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        SpoolQueue::enqueue(dir.path(), &item("contract A{}")).await.unwrap();
        tokio::fs::write(dir.path().join("0-broken.json"), b"{ nope")
            .await
            .unwrap();

        let queue = SpoolQueue::open(
            dir.path(),
            SpoolOptions {
                drain: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let delivery = queue.receive().await.unwrap().unwrap();
        assert_eq!(delivery.item.raw_text, "contract A{}");
        assert!(dir.path().join("0-broken.rejected").exists());
        queue.ack(delivery.tag).await.unwrap();

        assert!(queue.receive().await.unwrap().is_none());
        assert!(queue.pending().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn spool_recovers_claimed_files_on_open() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let path = SpoolQueue::enqueue(dir.path(), &item("contract A{}")).await.unwrap();
        {
            let queue = SpoolQueue::open(dir.path(), SpoolOptions::default())
                .await
                .unwrap();
            let delivery = queue.receive().await.unwrap().unwrap();
            assert!(!delivery.redelivered);
            assert!(path.with_extension(CLAIMED_EXTENSION).exists());
            // dropped without ack, as after a crash
        }

        let queue = SpoolQueue::open(
            dir.path(),
            SpoolOptions {
                drain: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();
        let delivery = queue.receive().await.unwrap().unwrap();
        assert!(delivery.redelivered);
        queue.nack(delivery.tag).await.unwrap();
        assert!(path.exists());
    }

    #[tokio::test]
    async fn closing_memory_queue_wakes_idle_receivers() {
        let queue = std::sync::Arc::new(MemoryQueue::new());
        let waiter = {
            let queue = std::sync::Arc::clone(&queue);
            tokio::spawn(async move { queue.receive().await })
        };
        tokio::task::yield_now().await;
        queue.close();

        let received = tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .expect("receiver woke up")
            .unwrap()
            .unwrap();
        assert!(received.is_none());
        assert!(queue.push(item("late")).is_err());
    }

    #[tokio::test]
    async fn closed_spool_leaves_files_for_next_run() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let queue = std::sync::Arc::new(
            SpoolQueue::open(
                dir.path(),
                SpoolOptions {
                    poll_interval: Duration::from_secs(60),
                    drain: false,
                },
            )
            .await
            .unwrap(),
        );

        let waiter = {
            let queue = std::sync::Arc::clone(&queue);
            tokio::spawn(async move { queue.receive().await })
        };
        tokio::task::yield_now().await;
        queue.close();
        let received = tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .expect("receiver woke up")
            .unwrap()
            .unwrap();
        assert!(received.is_none());

        let path = SpoolQueue::enqueue(dir.path(), &item("contract A{}")).await.unwrap();
        assert!(queue.receive().await.unwrap().is_none());
        assert!(path.exists());
        assert_eq!(queue.pending().await.unwrap(), vec![path]);
    }
}
