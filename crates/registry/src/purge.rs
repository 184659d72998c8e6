use crate::registry::Registry;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Eviction of families that were seen once and never again.
///
/// Families with more than one member are recurring by definition and are
/// kept forever.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurgePolicy {
    pub retention: Duration,
}

impl PurgePolicy {
    #[must_use]
    pub const fn new(retention: Duration) -> Self {
        Self { retention }
    }

    #[must_use]
    pub const fn from_secs(retention_secs: u64) -> Self {
        Self::new(Duration::from_secs(retention_secs))
    }

    #[must_use]
    pub fn retention_ms(&self) -> u64 {
        u64::try_from(self.retention.as_millis()).unwrap_or(u64::MAX)
    }

    /// Remove stale singleton families. Returns how many were removed.
    pub fn purge(&self, registry: &Registry, now_unix_ms: u64) -> usize {
        let removed = registry.purge_stale(now_unix_ms, self.retention_ms());
        if removed.is_empty() {
            debug!("Purge: no singleton family older than {:?}", self.retention);
        } else {
            info!(
                "Purged {} stale singleton families (retention {:?}, {} families left)",
                removed.len(),
                self.retention,
                registry.family_count()
            );
        }
        removed.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RegistryConfig;
    use codefam_fingerprint::Fingerprinter;
    use serde_json::json;

    fn observe(registry: &Registry, text: &str, at: u64) {
        let fp = Fingerprinter::default().fingerprint_or_degenerate(text);
        let mut sample = registry.admit(text.to_string(), json!({}), fp, at);
        registry.assign(&mut sample);
    }

    #[test]
    fn purges_by_retention() {
        let registry = Registry::new(RegistryConfig::default()).unwrap();
        observe(&registry, "contract Old{}", 0);
        observe(&registry, "contract Twice{}", 0);
        observe(&registry, "contract Twice{}", 0);
        observe(&registry, "contract New{}", 59_000);

        let policy = PurgePolicy::from_secs(60);
        assert_eq!(policy.purge(&registry, 60_000), 0);
        assert_eq!(policy.purge(&registry, 60_001), 1);
        assert_eq!(registry.family_count(), 2);
        assert_eq!(registry.sample_count(), 3);
    }

    #[test]
    fn zero_retention_purges_every_past_singleton() {
        let registry = Registry::new(RegistryConfig::default()).unwrap();
        observe(&registry, "contract A{}", 10);
        observe(&registry, "contract B{}", 10);
        assert_eq!(PurgePolicy::from_secs(0).purge(&registry, 11), 2);
        assert_eq!(registry.family_count(), 0);
    }
}
