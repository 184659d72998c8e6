use crate::error::{IngestError, Result};
use crate::limits::{default_workers, parse_workers, MAX_WORKERS, WORKERS_ENV};
use codefam_fingerprint::FingerprintConfig;
use codefam_registry::{PurgePolicy, RegistryConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const THRESHOLD_ENV: &str = "CODEFAM_THRESHOLD";
pub const CHECKPOINT_DIR_ENV: &str = "CODEFAM_CHECKPOINT_DIR";
pub const RETENTION_SECS_ENV: &str = "CODEFAM_RETENTION_SECS";

pub const DEFAULT_CHECKPOINT_DIR: &str = ".codefam";

/// When and where registry checkpoints are written
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointConfig {
    /// Directory holding `registry.json`, `health.json` and the lock file
    pub dir: PathBuf,

    /// Maximum time between two checkpoints
    pub interval_secs: u64,

    /// Checkpoint early once this many assignments are not yet durable
    pub every_assignments: u64,

    /// Write attempts per checkpoint before raising an alert
    pub max_attempts: u32,

    /// Delay before the first retry; doubles on every further attempt
    pub initial_backoff_ms: u64,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(DEFAULT_CHECKPOINT_DIR),
            interval_secs: 60,
            every_assignments: 1_000,
            max_attempts: 5,
            initial_backoff_ms: 200,
        }
    }
}

impl CheckpointConfig {
    #[must_use]
    pub const fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    #[must_use]
    pub const fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PurgeConfig {
    pub enabled: bool,
    pub interval_secs: u64,
    /// Singleton families unseen for longer than this are evicted
    pub retention_secs: u64,
}

impl Default for PurgeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 3_600,
            retention_secs: 7 * 24 * 3_600,
        }
    }
}

impl PurgeConfig {
    #[must_use]
    pub const fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    #[must_use]
    pub const fn policy(&self) -> PurgePolicy {
        PurgePolicy::from_secs(self.retention_secs)
    }
}

/// Complete service configuration.
///
/// Resolution order: built-in defaults, then the TOML file, then
/// `CODEFAM_*` environment variables. Command-line flags are applied on top
/// by the binary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub fingerprint: FingerprintConfig,
    pub registry: RegistryConfig,
    pub checkpoint: CheckpointConfig,
    pub purge: PurgeConfig,
    pub workers: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            fingerprint: FingerprintConfig::default(),
            registry: RegistryConfig::default(),
            checkpoint: CheckpointConfig::default(),
            purge: PurgeConfig::default(),
            workers: default_workers(),
        }
    }
}

impl ServiceConfig {
    /// Defaults, optionally overlaid by a TOML file, then by the process
    /// environment. The result is validated.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_toml_file(path)?,
            None => Self::default(),
        };
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|err| {
            IngestError::InvalidConfig(format!("read {}: {err}", path.display()))
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    /// Apply `CODEFAM_*` overrides read through `lookup`.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        if let Some(raw) = non_empty(THRESHOLD_ENV) {
            self.registry.threshold = raw.parse().map_err(|_| {
                IngestError::InvalidConfig(format!("{THRESHOLD_ENV} is not a number: {raw}"))
            })?;
        }
        if let Some(raw) = non_empty(RETENTION_SECS_ENV) {
            self.purge.retention_secs = raw.parse().map_err(|_| {
                IngestError::InvalidConfig(format!(
                    "{RETENTION_SECS_ENV} is not a number of seconds: {raw}"
                ))
            })?;
        }
        if let Some(dir) = non_empty(CHECKPOINT_DIR_ENV) {
            self.checkpoint.dir = PathBuf::from(dir);
        }
        if let Some(raw) = lookup(WORKERS_ENV) {
            self.workers = parse_workers(Some(&raw), self.workers);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.fingerprint
            .validate()
            .map_err(|err| IngestError::InvalidConfig(format!("fingerprint: {err}")))?;
        self.registry
            .validate()
            .map_err(|err| IngestError::InvalidConfig(format!("registry: {err}")))?;

        if self.workers == 0 || self.workers > MAX_WORKERS {
            return Err(IngestError::InvalidConfig(format!(
                "workers must be within 1..={MAX_WORKERS}, got {}",
                self.workers
            )));
        }
        if self.checkpoint.dir.as_os_str().is_empty() {
            return Err(IngestError::InvalidConfig(
                "checkpoint.dir must not be empty".to_string(),
            ));
        }
        if self.checkpoint.interval_secs == 0 {
            return Err(IngestError::InvalidConfig(
                "checkpoint.interval_secs must be > 0".to_string(),
            ));
        }
        if self.checkpoint.every_assignments == 0 {
            return Err(IngestError::InvalidConfig(
                "checkpoint.every_assignments must be > 0".to_string(),
            ));
        }
        if self.checkpoint.max_attempts == 0 {
            return Err(IngestError::InvalidConfig(
                "checkpoint.max_attempts must be > 0".to_string(),
            ));
        }
        if self.purge.enabled && self.purge.interval_secs == 0 {
            return Err(IngestError::InvalidConfig(
                "purge.interval_secs must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_are_valid() {
        let config = ServiceConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.registry.threshold, 100.0);
        assert_eq!(config.checkpoint.dir, PathBuf::from(".codefam"));
    }

    #[test]
    fn partial_toml_keeps_other_defaults() {
        let config = ServiceConfig::from_toml_str(
            r#"
workers = 3

[registry]
threshold = 85.0

[checkpoint]
dir = "/var/lib/codefam"
every_assignments = 50

[purge]
enabled = false
"#,
        )
        .unwrap();

        assert_eq!(config.workers, 3);
        assert_eq!(config.registry.threshold, 85.0);
        assert_eq!(config.registry.max_sample_ids, 64);
        assert_eq!(config.checkpoint.dir, PathBuf::from("/var/lib/codefam"));
        assert_eq!(config.checkpoint.every_assignments, 50);
        assert_eq!(config.checkpoint.interval_secs, 60);
        assert!(!config.purge.enabled);
        assert_eq!(config.fingerprint.chunk_size, 30);
    }

    #[test]
    fn unknown_types_are_rejected() {
        assert!(ServiceConfig::from_toml_str("workers = \"many\"").is_err());
    }

    #[test]
    fn env_overrides_apply() {
        let mut config = ServiceConfig::default();
        config
            .apply_env_overrides(env(&[
                (THRESHOLD_ENV, "90"),
                (WORKERS_ENV, "500"),
                (CHECKPOINT_DIR_ENV, "/tmp/cf"),
                (RETENTION_SECS_ENV, " 120 "),
            ]))
            .unwrap();

        assert_eq!(config.registry.threshold, 90.0);
        assert_eq!(config.workers, MAX_WORKERS);
        assert_eq!(config.checkpoint.dir, PathBuf::from("/tmp/cf"));
        assert_eq!(config.purge.retention_secs, 120);
    }

    #[test]
    fn blank_env_values_are_ignored() {
        let mut config = ServiceConfig::default();
        let before = config.clone();
        config
            .apply_env_overrides(env(&[(THRESHOLD_ENV, "  "), (CHECKPOINT_DIR_ENV, "")]))
            .unwrap();
        assert_eq!(config, before);
    }

    #[test]
    fn malformed_threshold_is_an_error() {
        let mut config = ServiceConfig::default();
        let err = config
            .apply_env_overrides(env(&[(THRESHOLD_ENV, "high")]))
            .unwrap_err();
        assert!(matches!(err, IngestError::InvalidConfig(_)));
    }

    #[test]
    fn validate_rejects_bad_values() {
        let mut config = ServiceConfig::default();
        config.registry.threshold = 0.0;
        assert!(config.validate().is_err());

        let mut config = ServiceConfig::default();
        config.checkpoint.interval_secs = 0;
        assert!(config.validate().is_err());

        let mut config = ServiceConfig::default();
        config.fingerprint.window_size = 0;
        assert!(config.validate().is_err());

        let mut config = ServiceConfig::default();
        config.workers = 0;
        assert!(config.validate().is_err());

        let mut config = ServiceConfig::default();
        config.purge.enabled = false;
        config.purge.interval_secs = 0;
        assert!(config.validate().is_ok());
    }
}
