use crate::error::{RegistryError, Result};
use crate::types::{CodeFamily, FamilyId, SampleId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};

pub const REGISTRY_SNAPSHOT_SCHEMA_VERSION: u32 = 1;

/// Complete, self-consistent copy of the registry state.
///
/// This is the checkpoint file format and the input of the read-only
/// visualization helpers in [`crate::view`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrySnapshot {
    pub schema_version: u32,
    pub taken_at_unix_ms: u64,
    pub next_family_id: u64,
    pub next_sample_id: u64,
    /// Ordered by family id.
    pub families: Vec<CodeFamily>,
    /// Sample to family mapping, ordered by sample id.
    #[serde(default)]
    pub assignments: Vec<(SampleId, FamilyId)>,
}

impl RegistrySnapshot {
    #[must_use]
    pub fn empty() -> Self {
        Self {
            schema_version: REGISTRY_SNAPSHOT_SCHEMA_VERSION,
            taken_at_unix_ms: 0,
            next_family_id: 0,
            next_sample_id: 0,
            families: Vec::new(),
            assignments: Vec::new(),
        }
    }

    #[must_use]
    pub fn family(&self, id: FamilyId) -> Option<&CodeFamily> {
        self.families
            .binary_search_by_key(&id, |family| family.id)
            .ok()
            .map(|idx| &self.families[idx])
    }

    #[must_use]
    pub fn total_samples(&self) -> u64 {
        self.families
            .iter()
            .map(|family| family.member_count)
            .fold(0u64, u64::saturating_add)
    }

    /// Check the structural invariants a restored registry relies on.
    pub fn validate(&self) -> Result<()> {
        if self.schema_version != REGISTRY_SNAPSHOT_SCHEMA_VERSION {
            return Err(RegistryError::InvalidSnapshot(format!(
                "unsupported schema_version {} (expected {REGISTRY_SNAPSHOT_SCHEMA_VERSION})",
                self.schema_version
            )));
        }

        let mut family_ids: BTreeSet<FamilyId> = BTreeSet::new();
        let mut previous: Option<FamilyId> = None;
        for family in &self.families {
            if previous.is_some_and(|prev| prev >= family.id) {
                return Err(RegistryError::InvalidSnapshot(format!(
                    "families are not strictly ordered by id at {}",
                    family.id
                )));
            }
            previous = Some(family.id);
            family_ids.insert(family.id);

            if family.id.0 >= self.next_family_id {
                return Err(RegistryError::InvalidSnapshot(format!(
                    "family {} is not below next_family_id {}",
                    family.id, self.next_family_id
                )));
            }
            if family.member_count == 0 {
                return Err(RegistryError::InvalidSnapshot(format!(
                    "family {} has member_count 0",
                    family.id
                )));
            }
            if family.sample_ids.len() as u64 > family.member_count {
                return Err(RegistryError::InvalidSnapshot(format!(
                    "family {} lists more samples than its member_count",
                    family.id
                )));
            }
            if family.first_seen_unix_ms > family.last_seen_unix_ms {
                return Err(RegistryError::InvalidSnapshot(format!(
                    "family {} has first_seen after last_seen",
                    family.id
                )));
            }
        }

        let mut seen_samples: HashSet<SampleId> = HashSet::with_capacity(self.assignments.len());
        for (sample_id, family_id) in &self.assignments {
            if sample_id.0 >= self.next_sample_id {
                return Err(RegistryError::InvalidSnapshot(format!(
                    "sample {sample_id} is not below next_sample_id {}",
                    self.next_sample_id
                )));
            }
            if !seen_samples.insert(*sample_id) {
                return Err(RegistryError::InvalidSnapshot(format!(
                    "sample {sample_id} is assigned more than once"
                )));
            }
            if !family_ids.contains(family_id) {
                return Err(RegistryError::InvalidSnapshot(format!(
                    "sample {sample_id} references unknown family {family_id}"
                )));
            }
        }

        Ok(())
    }
}
