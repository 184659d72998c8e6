use crate::config::RegistryConfig;
use codefam_fingerprint::{Fingerprint, Fingerprinted};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Metadata key holding the human-readable contract name, when present.
pub const METADATA_NAME_KEY: &str = "name";

/// Metadata key holding the deployment address of the artifact.
pub const METADATA_ADDRESS_KEY: &str = "address";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SampleId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FamilyId(pub u64);

impl fmt::Display for SampleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

impl fmt::Display for FamilyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "f{}", self.0)
    }
}

/// One observed artifact.
///
/// Everything except the family assignment is fixed at construction; the
/// family is set once by the registry and never changes afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeSample {
    id: SampleId,
    raw_text: String,
    normalized_text: String,
    fingerprint: Fingerprint,
    family_id: Option<FamilyId>,
    observed_at_unix_ms: u64,
    metadata: serde_json::Value,
}

impl CodeSample {
    #[must_use]
    pub fn new(
        id: SampleId,
        raw_text: String,
        fingerprinted: Fingerprinted,
        observed_at_unix_ms: u64,
        metadata: serde_json::Value,
    ) -> Self {
        Self {
            id,
            raw_text,
            normalized_text: fingerprinted.normalized_text,
            fingerprint: fingerprinted.fingerprint,
            family_id: None,
            observed_at_unix_ms,
            metadata,
        }
    }

    #[must_use]
    pub const fn id(&self) -> SampleId {
        self.id
    }

    #[must_use]
    pub fn raw_text(&self) -> &str {
        &self.raw_text
    }

    #[must_use]
    pub fn normalized_text(&self) -> &str {
        &self.normalized_text
    }

    #[must_use]
    pub const fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    #[must_use]
    pub const fn family_id(&self) -> Option<FamilyId> {
        self.family_id
    }

    #[must_use]
    pub const fn observed_at_unix_ms(&self) -> u64 {
        self.observed_at_unix_ms
    }

    #[must_use]
    pub const fn metadata(&self) -> &serde_json::Value {
        &self.metadata
    }

    /// Contract name carried in the metadata, if any.
    #[must_use]
    pub fn label(&self) -> Option<&str> {
        self.metadata_str(METADATA_NAME_KEY)
    }

    /// Deployment address carried in the metadata, if any.
    #[must_use]
    pub fn address(&self) -> Option<&str> {
        self.metadata_str(METADATA_ADDRESS_KEY)
    }

    fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata
            .get(key)
            .and_then(serde_json::Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }

    /// Returns `false` (and leaves the sample untouched) when a family was
    /// already assigned.
    pub(crate) fn set_family(&mut self, family_id: FamilyId) -> bool {
        if self.family_id.is_some() {
            return false;
        }
        self.family_id = Some(family_id);
        true
    }
}

/// Comparison anchor of a family: the founding sample's signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Representative {
    pub sample_id: SampleId,
    pub normalized_text: String,
    pub fingerprint: Arc<Fingerprint>,
}

/// A cluster of near or exact duplicate samples
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeFamily {
    pub id: FamilyId,
    pub representative: Representative,
    pub member_count: u64,
    pub first_seen_unix_ms: u64,
    pub last_seen_unix_ms: u64,
    /// Earliest members, bounded by `RegistryConfig::max_sample_ids`.
    pub sample_ids: Vec<SampleId>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub labels: BTreeSet<String>,
    /// Distinct member addresses, bounded by `RegistryConfig::max_addresses`.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub addresses: BTreeSet<String>,
}

impl CodeFamily {
    pub(crate) fn found(id: FamilyId, sample: &CodeSample, config: &RegistryConfig) -> Self {
        let mut family = Self {
            id,
            representative: Representative {
                sample_id: sample.id(),
                normalized_text: sample.normalized_text().to_string(),
                fingerprint: Arc::new(sample.fingerprint().clone()),
            },
            member_count: 1,
            first_seen_unix_ms: sample.observed_at_unix_ms(),
            last_seen_unix_ms: sample.observed_at_unix_ms(),
            sample_ids: vec![sample.id()],
            labels: BTreeSet::new(),
            addresses: BTreeSet::new(),
        };
        family.merge_metadata(sample, config);
        family
    }

    pub(crate) fn record_member(&mut self, sample: &CodeSample, config: &RegistryConfig) {
        self.member_count = self.member_count.saturating_add(1);
        let observed = sample.observed_at_unix_ms();
        self.first_seen_unix_ms = self.first_seen_unix_ms.min(observed);
        self.last_seen_unix_ms = self.last_seen_unix_ms.max(observed);
        if self.sample_ids.len() < config.max_sample_ids {
            self.sample_ids.push(sample.id());
        }
        self.merge_metadata(sample, config);
    }

    fn merge_metadata(&mut self, sample: &CodeSample, config: &RegistryConfig) {
        merge_bounded(&mut self.labels, sample.label(), config.max_labels);
        merge_bounded(&mut self.addresses, sample.address(), config.max_addresses);
    }

    #[must_use]
    pub const fn is_singleton(&self) -> bool {
        self.member_count <= 1
    }
}

fn merge_bounded(set: &mut BTreeSet<String>, value: Option<&str>, bound: usize) {
    let Some(value) = value else {
        return;
    };
    if set.len() < bound && !set.contains(value) {
        set.insert(value.to_string());
    }
}

/// Outcome of one assignment
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Assignment {
    pub sample_id: SampleId,
    pub family_id: FamilyId,
    /// A new family was founded by this sample.
    pub created: bool,
    /// Score against the chosen family's representative; `None` when the
    /// sample founded its family or had been assigned before.
    pub score: Option<f64>,
    /// The sample already had a family; nothing changed.
    pub already_assigned: bool,
}

#[must_use]
pub fn unix_now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .ok()
        .and_then(|dur| u64::try_from(dur.as_millis()).ok())
        .unwrap_or(0)
}
