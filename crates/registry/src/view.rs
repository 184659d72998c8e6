//! Read-only projections of a [`RegistrySnapshot`] for dashboards and the
//! command line. Nothing here mutates registry state; every function works
//! equally on a live snapshot or on one loaded from a checkpoint file.

use crate::snapshot::RegistrySnapshot;
use crate::types::{CodeFamily, FamilyId};
use codefam_fingerprint::similarity;
use serde::Serialize;
use std::collections::BTreeMap;

/// Family-to-family similarity between two representatives.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimilarityEdge {
    pub source: FamilyId,
    pub target: FamilyId,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegistryStats {
    pub total_families: usize,
    pub total_samples: u64,
    pub singleton_families: usize,
    pub recurring_families: usize,
    pub avg_samples_per_family: f64,
    /// Distinct names per family, summed over families.
    pub unique_names: usize,
    pub largest_family: Option<FamilySummary>,
}

/// Compact listing entry for one family
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FamilySummary {
    pub id: FamilyId,
    pub member_count: u64,
    pub first_seen_unix_ms: u64,
    pub last_seen_unix_ms: u64,
    pub labels: Vec<String>,
    pub address_count: usize,
}

/// How many families carry a contract name
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NameFrequency {
    pub name: String,
    pub families: usize,
}

impl From<&CodeFamily> for FamilySummary {
    fn from(family: &CodeFamily) -> Self {
        Self {
            id: family.id,
            member_count: family.member_count,
            first_seen_unix_ms: family.first_seen_unix_ms,
            last_seen_unix_ms: family.last_seen_unix_ms,
            labels: family.labels.iter().cloned().collect(),
            address_count: family.addresses.len(),
        }
    }
}

impl RegistryStats {
    #[must_use]
    pub fn from_snapshot(snapshot: &RegistrySnapshot) -> Self {
        let total_families = snapshot.families.len();
        let total_samples = snapshot.total_samples();
        let singleton_families = snapshot
            .families
            .iter()
            .filter(|family| family.is_singleton())
            .count();

        #[allow(clippy::cast_precision_loss)]
        let avg_samples_per_family = if total_families == 0 {
            0.0
        } else {
            total_samples as f64 / total_families as f64
        };

        Self {
            total_families,
            total_samples,
            singleton_families,
            recurring_families: total_families - singleton_families,
            avg_samples_per_family,
            unique_names: snapshot
                .families
                .iter()
                .map(|family| family.labels.len())
                .sum(),
            largest_family: largest_first(snapshot.families.iter())
                .first()
                .map(|family| FamilySummary::from(*family)),
        }
    }
}

/// Families by size, largest first, ties by ascending id.
fn largest_first<'a>(families: impl Iterator<Item = &'a CodeFamily>) -> Vec<&'a CodeFamily> {
    let mut sorted: Vec<&CodeFamily> = families.collect();
    sorted.sort_by(|a, b| b.member_count.cmp(&a.member_count).then(a.id.cmp(&b.id)));
    sorted
}

/// Families observed more than once, largest first.
#[must_use]
pub fn recurring_families(snapshot: &RegistrySnapshot) -> Vec<&CodeFamily> {
    largest_first(
        snapshot
            .families
            .iter()
            .filter(|family| !family.is_singleton()),
    )
}

/// Every family, largest first.
#[must_use]
pub fn all_families(snapshot: &RegistrySnapshot) -> Vec<&CodeFamily> {
    largest_first(snapshot.families.iter())
}

#[must_use]
pub fn top_families(snapshot: &RegistrySnapshot, limit: usize) -> Vec<FamilySummary> {
    largest_first(snapshot.families.iter())
        .into_iter()
        .take(limit)
        .map(FamilySummary::from)
        .collect()
}

/// Number of families per member count.
#[must_use]
pub fn size_distribution(snapshot: &RegistrySnapshot) -> BTreeMap<u64, usize> {
    let mut distribution = BTreeMap::new();
    for family in &snapshot.families {
        *distribution.entry(family.member_count).or_insert(0) += 1;
    }
    distribution
}

/// Most common contract names, counted once per family that carries them.
/// Ties are ordered by name.
#[must_use]
pub fn top_names(snapshot: &RegistrySnapshot, limit: usize) -> Vec<NameFrequency> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for name in snapshot.families.iter().flat_map(|family| &family.labels) {
        *counts.entry(name.as_str()).or_insert(0) += 1;
    }
    let mut names: Vec<NameFrequency> = counts
        .into_iter()
        .map(|(name, families)| NameFrequency {
            name: name.to_string(),
            families,
        })
        .collect();
    names.sort_by(|a, b| b.families.cmp(&a.families).then_with(|| a.name.cmp(&b.name)));
    names.truncate(limit);
    names
}

/// Pairwise representative similarity among `families`, keeping pairs at or
/// above `min_score`. Quadratic in the number of families; callers usually
/// pass [`recurring_families`].
#[must_use]
pub fn similarity_edges(families: &[&CodeFamily], min_score: f64) -> Vec<SimilarityEdge> {
    let mut edges = Vec::new();
    for (i, source) in families.iter().enumerate() {
        for target in &families[i + 1..] {
            let score = similarity(
                &source.representative.fingerprint,
                &target.representative.fingerprint,
            );
            if score > 0.0 && score >= min_score {
                let (source, target) = if source.id <= target.id {
                    (source.id, target.id)
                } else {
                    (target.id, source.id)
                };
                edges.push(SimilarityEdge {
                    source,
                    target,
                    score,
                });
            }
        }
    }
    edges.sort_by(|a, b| (a.source, a.target).cmp(&(b.source, b.target)));
    edges
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Representative, SampleId};
    use codefam_fingerprint::Fingerprint;
    use pretty_assertions::assert_eq;
    use std::collections::BTreeSet;
    use std::sync::Arc;

    fn named(mut family: CodeFamily, names: &[&str]) -> CodeFamily {
        family.labels = names.iter().map(|name| (*name).to_string()).collect();
        family
    }

    fn family(id: u64, member_count: u64, hashes: &[u64]) -> CodeFamily {
        CodeFamily {
            id: FamilyId(id),
            representative: Representative {
                sample_id: SampleId(id),
                normalized_text: String::new(),
                fingerprint: Arc::new(Fingerprint::from_hashes(hashes.to_vec(), hashes.len())),
            },
            member_count,
            first_seen_unix_ms: 0,
            last_seen_unix_ms: 0,
            sample_ids: vec![SampleId(id)],
            labels: BTreeSet::new(),
            addresses: BTreeSet::new(),
        }
    }

    fn snapshot() -> RegistrySnapshot {
        RegistrySnapshot {
            next_family_id: 4,
            next_sample_id: 4,
            families: vec![
                family(0, 3, &[1, 2, 3, 4]),
                family(1, 1, &[1, 2, 3, 4]),
                family(2, 5, &[3, 4, 5, 6]),
                family(3, 3, &[9]),
            ],
            ..RegistrySnapshot::empty()
        }
    }

    #[test]
    fn stats_summarize_families() {
        let stats = RegistryStats::from_snapshot(&snapshot());
        assert_eq!(stats.total_families, 4);
        assert_eq!(stats.total_samples, 12);
        assert_eq!(stats.singleton_families, 1);
        assert_eq!(stats.recurring_families, 3);
        assert_eq!(stats.avg_samples_per_family, 3.0);
        assert_eq!(stats.unique_names, 0);
        assert_eq!(stats.largest_family.map(|f| f.id), Some(FamilyId(2)));
    }

    #[test]
    fn empty_snapshot_stats() {
        let stats = RegistryStats::from_snapshot(&RegistrySnapshot::empty());
        assert_eq!(stats.total_families, 0);
        assert_eq!(stats.avg_samples_per_family, 0.0);
        assert!(stats.largest_family.is_none());
    }

    #[test]
    fn recurring_families_largest_first_then_id() {
        let snap = snapshot();
        let ids: Vec<FamilyId> = recurring_families(&snap).iter().map(|f| f.id).collect();
        assert_eq!(ids, vec![FamilyId(2), FamilyId(0), FamilyId(3)]);
    }

    #[test]
    fn distribution_and_top() {
        let snap = snapshot();
        let dist = size_distribution(&snap);
        assert_eq!(dist.into_iter().collect::<Vec<_>>(), vec![(1, 1), (3, 2), (5, 1)]);

        let top: Vec<FamilyId> = top_families(&snap, 2).iter().map(|f| f.id).collect();
        assert_eq!(top, vec![FamilyId(2), FamilyId(0)]);
    }

    #[test]
    fn edges_respect_min_score() {
        let snap = snapshot();
        let families: Vec<&CodeFamily> = snap.families.iter().collect();

        let edges = similarity_edges(&families, 50.0);
        assert_eq!(
            edges,
            vec![
                SimilarityEdge {
                    source: FamilyId(0),
                    target: FamilyId(1),
                    score: 100.0
                },
                SimilarityEdge {
                    source: FamilyId(0),
                    target: FamilyId(2),
                    score: 50.0
                },
                SimilarityEdge {
                    source: FamilyId(1),
                    target: FamilyId(2),
                    score: 50.0
                },
            ]
        );
        assert_eq!(similarity_edges(&families, 75.0).len(), 1);
    }

    #[test]
    fn all_families_include_singletons() {
        let snap = snapshot();
        let ids: Vec<FamilyId> = all_families(&snap).iter().map(|f| f.id).collect();
        assert_eq!(ids, vec![FamilyId(2), FamilyId(0), FamilyId(3), FamilyId(1)]);
    }

    #[test]
    fn names_are_counted_per_family() {
        let mut snap = snapshot();
        snap.families = vec![
            named(family(0, 3, &[1]), &["Token", "TokenV2"]),
            named(family(1, 1, &[2]), &["Token"]),
            named(family(2, 2, &[3]), &["Vault", "Token"]),
            named(family(3, 1, &[4]), &["Vault"]),
            family(4, 1, &[5]),
        ];

        let stats = RegistryStats::from_snapshot(&snap);
        assert_eq!(stats.unique_names, 6);

        assert_eq!(
            top_names(&snap, 10),
            vec![
                NameFrequency {
                    name: "Token".to_string(),
                    families: 3
                },
                NameFrequency {
                    name: "Vault".to_string(),
                    families: 2
                },
                NameFrequency {
                    name: "TokenV2".to_string(),
                    families: 1
                },
            ]
        );
        assert_eq!(top_names(&snap, 1).len(), 1);
        assert!(top_names(&RegistrySnapshot::empty(), 10).is_empty());
    }

    #[test]
    fn summary_counts_addresses() {
        let mut fam = family(0, 2, &[1]);
        fam.addresses = ["0x1", "0x2"].iter().map(|a| (*a).to_string()).collect();
        let summary = FamilySummary::from(&fam);
        assert_eq!(summary.address_count, 2);
        assert!(summary.labels.is_empty());
    }
}
