use crate::Result;
use codefam_registry::{unix_now_ms, CheckpointReport};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;

const MAX_FAILURES: usize = 5;

pub const HEALTH_FILE_NAME: &str = "health.json";

/// Snapshot persisted to `<checkpoint dir>/health.json` so operators and
/// other processes can see when state was last made durable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthSnapshot {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_checkpoint_unix_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_checkpoint_duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_checkpoint_bytes: Option<u64>,
    pub families: usize,
    pub samples: u64,
    pub purged_total: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_purge_unix_ms: Option<u64>,
    pub consecutive_failures: u32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failure_reasons: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_failure_unix_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_failure_reason: Option<String>,
    pub reason: String,
}

impl HealthSnapshot {
    #[must_use]
    pub const fn is_healthy(&self) -> bool {
        self.consecutive_failures == 0
    }

    pub fn record_checkpoint(&mut self, report: &CheckpointReport, reason: &str) {
        self.last_checkpoint_unix_ms = Some(report.taken_at_unix_ms);
        self.last_checkpoint_duration_ms = Some(report.duration_ms);
        self.last_checkpoint_bytes = Some(report.bytes);
        self.families = report.families;
        self.samples = report.samples;
        self.consecutive_failures = 0;
        self.reason = reason.to_string();
    }

    pub fn record_purge(&mut self, removed: usize) {
        self.purged_total = self.purged_total.saturating_add(removed as u64);
        self.last_purge_unix_ms = Some(unix_now_ms());
    }

    pub fn record_failure(&mut self, reason: &str, detail: &str) {
        self.failure_reasons.push(format!("{reason}: {detail}"));
        if self.failure_reasons.len() > MAX_FAILURES {
            let start = self.failure_reasons.len() - MAX_FAILURES;
            self.failure_reasons = self.failure_reasons.split_off(start);
        }
        self.last_failure_unix_ms = Some(unix_now_ms());
        self.last_failure_reason = Some(detail.to_string());
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.reason = reason.to_string();
    }
}

pub async fn write_health_snapshot(dir: &Path, snapshot: &HealthSnapshot) -> Result<()> {
    fs::create_dir_all(dir).await?;
    let path = health_file_path(dir);
    let data = serde_json::to_vec_pretty(snapshot)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, data).await?;
    fs::rename(&tmp, &path).await?;
    Ok(())
}

pub async fn read_health_snapshot(dir: &Path) -> Result<Option<HealthSnapshot>> {
    let path = health_file_path(dir);
    match fs::read(&path).await {
        Ok(bytes) => {
            let snapshot = serde_json::from_slice(&bytes)?;
            Ok(Some(snapshot))
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}

#[must_use]
pub fn health_file_path(dir: &Path) -> PathBuf {
    dir.join(HEALTH_FILE_NAME)
}
