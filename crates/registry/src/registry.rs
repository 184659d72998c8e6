use crate::config::RegistryConfig;
use crate::error::{RegistryError, Result};
use crate::snapshot::{RegistrySnapshot, REGISTRY_SNAPSHOT_SCHEMA_VERSION};
use crate::types::{unix_now_ms, Assignment, CodeFamily, CodeSample, FamilyId, SampleId};
use codefam_fingerprint::{similarity, Fingerprint, Fingerprinted};
use log::debug;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Optimistic scoring rounds before the decision is made entirely under the
/// write lock.
const MAX_OPTIMISTIC_ATTEMPTS: usize = 4;

#[derive(Debug, Clone)]
struct Anchor {
    family_id: FamilyId,
    fingerprint: Arc<Fingerprint>,
}

/// Outcome of scoring one sample against an anchor snapshot.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Scored {
    generation: u64,
    /// `next_family_id` when the snapshot was taken.
    horizon: u64,
    candidate: Option<(FamilyId, f64)>,
}

#[derive(Debug)]
struct RegistryState {
    families: BTreeMap<FamilyId, CodeFamily>,
    assignments: HashMap<SampleId, FamilyId>,
    next_family_id: u64,
    /// Bumped whenever the anchor list changes (creation or purge).
    generation: u64,
    /// Representatives ordered by family id. Shared copy-on-write with
    /// in-flight scorers.
    anchors: Arc<Vec<Anchor>>,
    assignments_since_checkpoint: u64,
}

impl RegistryState {
    fn empty() -> Self {
        Self {
            families: BTreeMap::new(),
            assignments: HashMap::new(),
            next_family_id: 0,
            generation: 0,
            anchors: Arc::new(Vec::new()),
            assignments_since_checkpoint: 0,
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    assignments: AtomicU64,
    families_created: AtomicU64,
    contention_retries: AtomicU64,
    families_purged: AtomicU64,
}

/// Counters since the registry was constructed or restored
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RegistryMetrics {
    pub assignments: u64,
    pub families_created: u64,
    pub contention_retries: u64,
    pub families_purged: u64,
}

/// Process-wide clustering state.
///
/// Each incoming sample is compared against the representative of every
/// family (never against all members) and joins the best family at or above
/// the threshold, ties going to the lowest family id; otherwise it founds a
/// new family.
///
/// Scoring runs without holding the lock, against an immutable snapshot of
/// the representatives. Only the final create-or-increment decision takes the
/// write lock; if families appeared or vanished meanwhile, the decision is
/// revalidated against the fresh state before commit.
#[derive(Debug)]
pub struct Registry {
    config: RegistryConfig,
    state: RwLock<RegistryState>,
    next_sample_id: AtomicU64,
    counters: Counters,
}

impl Registry {
    pub fn new(config: RegistryConfig) -> Result<Self> {
        config.validate().map_err(RegistryError::InvalidConfig)?;
        Ok(Self {
            config,
            state: RwLock::new(RegistryState::empty()),
            next_sample_id: AtomicU64::new(0),
            counters: Counters::default(),
        })
    }

    /// Rebuild a registry from a checkpoint snapshot.
    pub fn from_snapshot(snapshot: RegistrySnapshot, config: RegistryConfig) -> Result<Self> {
        config.validate().map_err(RegistryError::InvalidConfig)?;
        snapshot.validate()?;

        let mut state = RegistryState::empty();
        state.next_family_id = snapshot.next_family_id;
        state.assignments = snapshot.assignments.into_iter().collect();

        let mut anchors = Vec::with_capacity(snapshot.families.len());
        for family in snapshot.families {
            anchors.push(Anchor {
                family_id: family.id,
                fingerprint: family.representative.fingerprint.clone(),
            });
            state.families.insert(family.id, family);
        }
        state.anchors = Arc::new(anchors);

        Ok(Self {
            config,
            state: RwLock::new(state),
            next_sample_id: AtomicU64::new(snapshot.next_sample_id),
            counters: Counters::default(),
        })
    }

    #[must_use]
    pub const fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Allocate an id for a freshly observed artifact.
    pub fn admit(
        &self,
        raw_text: String,
        metadata: serde_json::Value,
        fingerprinted: Fingerprinted,
        observed_at_unix_ms: u64,
    ) -> CodeSample {
        let id = SampleId(self.next_sample_id.fetch_add(1, Ordering::Relaxed));
        CodeSample::new(id, raw_text, fingerprinted, observed_at_unix_ms, metadata)
    }

    /// Assign a sample to a family, founding one if nothing matches.
    pub fn assign(&self, sample: &mut CodeSample) -> FamilyId {
        self.assign_detailed(sample).family_id
    }

    pub fn assign_detailed(&self, sample: &mut CodeSample) -> Assignment {
        if let Some(family_id) = sample.family_id() {
            return Assignment {
                sample_id: sample.id(),
                family_id,
                created: false,
                score: None,
                already_assigned: true,
            };
        }

        for attempt in 0..MAX_OPTIMISTIC_ATTEMPTS {
            let scored = self.score(sample);
            if let Some(assignment) = self.commit_scored(sample, scored) {
                return assignment;
            }
            debug!(
                "Retrying assignment of sample {} (attempt {})",
                sample.id(),
                attempt + 1
            );
        }

        let mut state = self.state.write();
        if let Some(assignment) = Self::existing_assignment(&state, sample) {
            return assignment;
        }
        let decision = self.best_match(state.anchors.iter(), sample.fingerprint());
        self.commit(&mut state, sample, decision)
    }

    /// Score `sample` against the current representatives without holding
    /// the lock during scoring.
    pub(crate) fn score(&self, sample: &CodeSample) -> Scored {
        let (anchors, generation, horizon) = {
            let state = self.state.read();
            (state.anchors.clone(), state.generation, state.next_family_id)
        };
        Scored {
            generation,
            horizon,
            candidate: self.best_match(anchors.iter(), sample.fingerprint()),
        }
    }

    /// Commit a decision taken by [`Registry::score`]. Returns `None` when
    /// the candidate family vanished meanwhile and scoring must start over.
    pub(crate) fn commit_scored(
        &self,
        sample: &mut CodeSample,
        scored: Scored,
    ) -> Option<Assignment> {
        let mut state = self.state.write();
        if let Some(assignment) = Self::existing_assignment(&state, sample) {
            return Some(assignment);
        }

        if state.generation == scored.generation {
            return Some(self.commit(&mut state, sample, scored.candidate));
        }

        // The anchor list changed since scoring. Families founded in the
        // meantime carry ids at or above the horizon, so they can only win
        // with a strictly higher score.
        if let Some((family_id, _)) = scored.candidate {
            if !state.families.contains_key(&family_id) {
                drop(state);
                self.counters
                    .contention_retries
                    .fetch_add(1, Ordering::Relaxed);
                debug!(
                    "Family {family_id} vanished while scoring sample {}",
                    sample.id()
                );
                return None;
            }
        }

        let fresh = self.best_match(
            state
                .anchors
                .iter()
                .filter(|anchor| anchor.family_id.0 >= scored.horizon),
            sample.fingerprint(),
        );
        let decision = match (scored.candidate, fresh) {
            (Some(old), Some(new)) if new.1 > old.1 => Some(new),
            (Some(old), _) => Some(old),
            (None, fresh) => fresh,
        };
        Some(self.commit(&mut state, sample, decision))
    }

    fn existing_assignment(state: &RegistryState, sample: &mut CodeSample) -> Option<Assignment> {
        let family_id = *state.assignments.get(&sample.id())?;
        sample.set_family(family_id);
        Some(Assignment {
            sample_id: sample.id(),
            family_id,
            created: false,
            score: None,
            already_assigned: true,
        })
    }

    /// Highest score at or above the threshold; the first (lowest id) anchor
    /// wins ties because later anchors must be strictly better.
    fn best_match<'a>(
        &self,
        anchors: impl Iterator<Item = &'a Anchor>,
        fingerprint: &Fingerprint,
    ) -> Option<(FamilyId, f64)> {
        if fingerprint.is_degenerate() {
            return None;
        }
        let mut best: Option<(FamilyId, f64)> = None;
        for anchor in anchors {
            let score = similarity(fingerprint, &anchor.fingerprint);
            if score < self.config.threshold {
                continue;
            }
            match best {
                Some((_, best_score)) if score <= best_score => {}
                _ => best = Some((anchor.family_id, score)),
            }
        }
        best
    }

    fn commit(
        &self,
        state: &mut RegistryState,
        sample: &mut CodeSample,
        decision: Option<(FamilyId, f64)>,
    ) -> Assignment {
        let joined = decision.and_then(|(family_id, score)| {
            let family = state.families.get_mut(&family_id)?;
            family.record_member(sample, &self.config);
            Some((family_id, score))
        });

        let (family_id, created, score) = match joined {
            Some((family_id, score)) => (family_id, false, Some(score)),
            None => {
                let family_id = FamilyId(state.next_family_id);
                state.next_family_id += 1;
                let family = CodeFamily::found(family_id, sample, &self.config);
                Arc::make_mut(&mut state.anchors).push(Anchor {
                    family_id,
                    fingerprint: family.representative.fingerprint.clone(),
                });
                state.families.insert(family_id, family);
                state.generation += 1;
                self.counters
                    .families_created
                    .fetch_add(1, Ordering::Relaxed);
                (family_id, true, None)
            }
        };

        state.assignments.insert(sample.id(), family_id);
        state.assignments_since_checkpoint += 1;
        sample.set_family(family_id);
        self.counters.assignments.fetch_add(1, Ordering::Relaxed);

        Assignment {
            sample_id: sample.id(),
            family_id,
            created,
            score,
            already_assigned: false,
        }
    }

    /// Remove never-recurring families whose last sighting is more than
    /// `retention_ms` before `now_unix_ms`. Returns the removed family ids.
    pub fn purge_stale(&self, now_unix_ms: u64, retention_ms: u64) -> Vec<FamilyId> {
        let mut state = self.state.write();
        let removed: Vec<FamilyId> = state
            .families
            .values()
            .filter(|family| {
                family.member_count == 1
                    && now_unix_ms.saturating_sub(family.last_seen_unix_ms) > retention_ms
            })
            .map(|family| family.id)
            .collect();
        if removed.is_empty() {
            return removed;
        }

        let removed_set: HashSet<FamilyId> = removed.iter().copied().collect();
        for family_id in &removed {
            if let Some(family) = state.families.remove(family_id) {
                for sample_id in &family.sample_ids {
                    state.assignments.remove(sample_id);
                }
            }
        }
        Arc::make_mut(&mut state.anchors).retain(|anchor| !removed_set.contains(&anchor.family_id));
        state.generation += 1;
        self.counters
            .families_purged
            .fetch_add(removed.len() as u64, Ordering::Relaxed);
        removed
    }

    /// Consistent copy of the whole registry, taken under one read lock.
    #[must_use]
    pub fn snapshot(&self) -> RegistrySnapshot {
        self.snapshot_with_pending().0
    }

    /// Snapshot plus the number of assignments it includes that no previous
    /// checkpoint covered.
    pub(crate) fn snapshot_with_pending(&self) -> (RegistrySnapshot, u64) {
        let state = self.state.read();
        let mut assignments: Vec<(SampleId, FamilyId)> = state
            .assignments
            .iter()
            .map(|(sample, family)| (*sample, *family))
            .collect();
        assignments.sort_unstable();

        let snapshot = RegistrySnapshot {
            schema_version: REGISTRY_SNAPSHOT_SCHEMA_VERSION,
            taken_at_unix_ms: unix_now_ms(),
            next_family_id: state.next_family_id,
            next_sample_id: self.next_sample_id.load(Ordering::Relaxed),
            families: state.families.values().cloned().collect(),
            assignments,
        };
        (snapshot, state.assignments_since_checkpoint)
    }

    /// Forget `covered` assignments after they reached durable storage.
    pub(crate) fn mark_checkpointed(&self, covered: u64) {
        let mut state = self.state.write();
        state.assignments_since_checkpoint = state.assignments_since_checkpoint.saturating_sub(covered);
    }

    #[must_use]
    pub fn assignments_since_checkpoint(&self) -> u64 {
        self.state.read().assignments_since_checkpoint
    }

    #[must_use]
    pub fn family(&self, id: FamilyId) -> Option<CodeFamily> {
        self.state.read().families.get(&id).cloned()
    }

    #[must_use]
    pub fn family_of(&self, sample_id: SampleId) -> Option<FamilyId> {
        self.state.read().assignments.get(&sample_id).copied()
    }

    #[must_use]
    pub fn family_count(&self) -> usize {
        self.state.read().families.len()
    }

    /// Sum of member counts over live families.
    #[must_use]
    pub fn sample_count(&self) -> u64 {
        self.state
            .read()
            .families
            .values()
            .map(|family| family.member_count)
            .fold(0u64, u64::saturating_add)
    }

    #[must_use]
    pub fn metrics(&self) -> RegistryMetrics {
        RegistryMetrics {
            assignments: self.counters.assignments.load(Ordering::Relaxed),
            families_created: self.counters.families_created.load(Ordering::Relaxed),
            contention_retries: self.counters.contention_retries.load(Ordering::Relaxed),
            families_purged: self.counters.families_purged.load(Ordering::Relaxed),
        }
    }
}
