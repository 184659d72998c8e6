use crate::flags::FamilyScope;
use crate::input::read_json_lines;
use crate::{CompareArgs, FamiliesArgs, GraphArgs, IngestArgs, PurgeArgs, RunArgs};
use anyhow::{Context as AnyhowContext, Result};
use codefam_fingerprint::{similarity, Fingerprinter};
use codefam_ingest::{
    acquire_checkpoint_lock, read_health_snapshot, IngestService, MemoryQueue, ServiceConfig,
    SpoolOptions, SpoolQueue,
};
use codefam_registry::{
    unix_now_ms, view, CheckpointStore, FamilySummary, PurgePolicy, RegistrySnapshot,
    RegistryStats,
};
use log::{info, warn};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

const TOP_LIMIT: usize = 10;

#[derive(Clone, Copy)]
pub(crate) struct Output {
    pub(crate) compact: bool,
}

impl Output {
    fn print<T: Serialize>(self, value: &T) -> Result<()> {
        let rendered = if self.compact {
            serde_json::to_string(value)?
        } else {
            serde_json::to_string_pretty(value)?
        };
        println!("{rendered}");
        Ok(())
    }
}

async fn wait_for_ctrl_c() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl-C: {err}");
        std::future::pending::<()>().await;
    }
}

pub(crate) async fn run(args: RunArgs, config: ServiceConfig, output: Output) -> Result<()> {
    let queue = SpoolQueue::open(
        &args.spool,
        SpoolOptions {
            poll_interval: Duration::from_millis(args.poll_ms.max(1)),
            drain: args.drain,
        },
    )
    .await
    .with_context(|| format!("Failed to open spool {}", args.spool.display()))?;

    info!(
        "Consuming spool {} with {} workers, checkpoints in {}",
        args.spool.display(),
        config.workers,
        config.checkpoint.dir.display()
    );
    let service = IngestService::start(config, Arc::new(queue))
        .await
        .context("Failed to start ingestion service")?;
    let report = service
        .run_until(wait_for_ctrl_c())
        .await
        .context("Ingestion service failed")?;
    output.print(&report)
}

pub(crate) async fn ingest(args: IngestArgs, config: ServiceConfig, output: Output) -> Result<()> {
    let lines = read_json_lines(&args.input)?;
    let queue = Arc::new(MemoryQueue::closed_with(lines.items));

    let service = IngestService::start(config, queue)
        .await
        .context("Failed to start ingestion service")?;
    let report = service
        .run_until(wait_for_ctrl_c())
        .await
        .context("Ingestion failed")?;

    output.print(&json!({
        "skipped_lines": lines.skipped,
        "ingest": report.ingest,
        "registry": report.registry,
        "checkpoint": report.checkpoint,
    }))
}

async fn load_snapshot(config: &ServiceConfig) -> Result<RegistrySnapshot> {
    let store = CheckpointStore::new(&config.checkpoint.dir);
    match store.read().await? {
        Some(snapshot) => Ok(snapshot),
        None => {
            warn!("No checkpoint at {}", store.path().display());
            Ok(RegistrySnapshot::empty())
        }
    }
}

pub(crate) async fn families(
    args: FamiliesArgs,
    config: &ServiceConfig,
    output: Output,
) -> Result<()> {
    let snapshot = load_snapshot(config).await?;
    let scope = if args.all {
        FamilyScope::All
    } else {
        FamilyScope::Recurring
    };
    let families: Vec<FamilySummary> = scope
        .select(&snapshot)
        .into_iter()
        .take(args.limit.unwrap_or(usize::MAX))
        .map(FamilySummary::from)
        .collect();
    output.print(&json!({
        "taken_at_unix_ms": snapshot.taken_at_unix_ms,
        "families": families,
    }))
}

pub(crate) async fn graph(args: GraphArgs, config: &ServiceConfig, output: Output) -> Result<()> {
    let snapshot = load_snapshot(config).await?;
    let families = args.scope.select(&snapshot);
    let edges = view::similarity_edges(&families, args.min_score);
    let nodes: Vec<FamilySummary> = families.into_iter().map(FamilySummary::from).collect();
    output.print(&json!({
        "nodes": nodes,
        "edges": edges,
        "top_names": view::top_names(&snapshot, TOP_LIMIT),
    }))
}

pub(crate) async fn stats(config: &ServiceConfig, output: Output) -> Result<()> {
    let snapshot = load_snapshot(config).await?;
    let health = read_health_snapshot(&config.checkpoint.dir)
        .await
        .unwrap_or_else(|err| {
            warn!("Ignoring unreadable health snapshot: {err}");
            None
        });
    output.print(&json!({
        "stats": RegistryStats::from_snapshot(&snapshot),
        "size_distribution": view::size_distribution(&snapshot),
        "top_families": view::top_families(&snapshot, TOP_LIMIT),
        "top_names": view::top_names(&snapshot, TOP_LIMIT),
        "health": health,
    }))
}

pub(crate) fn compare(args: CompareArgs, config: &ServiceConfig, output: Output) -> Result<()> {
    let fingerprinter = Fingerprinter::new(config.fingerprint);
    let read = |path: &std::path::Path| {
        std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
    };
    let a = fingerprinter.fingerprint_or_degenerate(&read(&args.a)?);
    let b = fingerprinter.fingerprint_or_degenerate(&read(&args.b)?);
    let score = similarity(&a.fingerprint, &b.fingerprint);

    output.print(&json!({
        "similarity": score,
        "same_family": score >= config.registry.threshold,
        "threshold": config.registry.threshold,
        "a": { "path": args.a, "chunks": a.fingerprint.chunk_count, "hashes": a.fingerprint.len() },
        "b": { "path": args.b, "chunks": b.fingerprint.chunk_count, "hashes": b.fingerprint.len() },
    }))
}

pub(crate) async fn purge(args: PurgeArgs, config: &ServiceConfig, output: Output) -> Result<()> {
    let _lock = acquire_checkpoint_lock(&config.checkpoint.dir)
        .await
        .context("Checkpoint directory is busy")?;
    let store = CheckpointStore::new(&config.checkpoint.dir);
    let registry = store
        .restore(config.registry)
        .await
        .context("Failed to restore registry")?;

    let policy = PurgePolicy::from_secs(args.retention_secs.unwrap_or(config.purge.retention_secs));
    let removed = policy.purge(&registry, unix_now_ms());
    let report = store
        .checkpoint(&registry)
        .await
        .context("Failed to write checkpoint")?;

    output.print(&json!({
        "removed": removed,
        "retention_secs": policy.retention.as_secs(),
        "checkpoint": report,
    }))
}
