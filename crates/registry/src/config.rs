use codefam_fingerprint::MAX_SCORE;
use serde::{Deserialize, Serialize};

/// Exact-duplicate operating point.
pub const DEFAULT_THRESHOLD: f64 = MAX_SCORE;

/// Clustering behaviour of the family registry
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Minimum similarity (0, 100] for a sample to join an existing family
    pub threshold: f64,

    /// Member ids retained per family; `member_count` keeps counting past it
    pub max_sample_ids: usize,

    /// Distinct contract names retained per family
    pub max_labels: usize,

    /// Distinct deployment addresses retained per family
    pub max_addresses: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            max_sample_ids: 64,
            max_labels: 32,
            max_addresses: 256,
        }
    }
}

impl RegistryConfig {
    pub fn validate(&self) -> Result<(), String> {
        if !(self.threshold > 0.0 && self.threshold <= MAX_SCORE) {
            return Err(format!(
                "threshold must be within (0, {MAX_SCORE}], got {}",
                self.threshold
            ));
        }
        if self.max_sample_ids == 0 {
            return Err("max_sample_ids must be > 0".to_string());
        }
        Ok(())
    }
}
