use crate::types::Fingerprint;

/// Score of two fingerprints where the smaller one is fully contained in
/// the other.
pub const MAX_SCORE: f64 = 100.0;

/// Number of hashes shared by both fingerprints.
///
/// Linear merge over the sorted hash vectors.
#[must_use]
pub fn overlap(a: &Fingerprint, b: &Fingerprint) -> usize {
    let (mut i, mut j, mut shared) = (0usize, 0usize, 0usize);
    while i < a.hashes.len() && j < b.hashes.len() {
        match a.hashes[i].cmp(&b.hashes[j]) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                shared += 1;
                i += 1;
                j += 1;
            }
        }
    }
    shared
}

/// Similarity in `[0, 100]`: shared hashes over the size of the smaller
/// fingerprint. A degenerate fingerprint on either side scores 0.
///
/// Normalizing by the smaller side lets a file that is fully contained in a
/// larger one reach 100, so appended code does not hide a duplicate.
#[must_use]
pub fn similarity(a: &Fingerprint, b: &Fingerprint) -> f64 {
    let smaller = a.len().min(b.len());
    if smaller == 0 {
        return 0.0;
    }
    #[allow(clippy::cast_precision_loss)]
    let score = MAX_SCORE * overlap(a, b) as f64 / smaller as f64;
    score.clamp(0.0, MAX_SCORE)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fp(hashes: &[u64]) -> Fingerprint {
        Fingerprint::from_hashes(hashes.to_vec(), hashes.len())
    }

    #[test]
    fn identical_fingerprints_score_max() {
        let a = fp(&[1, 5, 9, 12]);
        assert_eq!(similarity(&a, &a), MAX_SCORE);
    }

    #[test]
    fn disjoint_fingerprints_score_zero() {
        assert_eq!(similarity(&fp(&[1, 2]), &fp(&[3, 4])), 0.0);
    }

    #[test]
    fn contained_fingerprint_scores_max() {
        let small = fp(&[2, 4]);
        let large = fp(&[1, 2, 3, 4, 5, 6]);
        assert_eq!(similarity(&small, &large), MAX_SCORE);
        assert_eq!(similarity(&large, &small), MAX_SCORE);
    }

    #[test]
    fn partial_overlap_uses_smaller_side() {
        let a = fp(&[1, 2, 3, 4]);
        let b = fp(&[3, 4, 5, 6, 7, 8, 9, 10]);
        assert_eq!(overlap(&a, &b), 2);
        assert_eq!(similarity(&a, &b), 50.0);
    }

    #[test]
    fn degenerate_scores_zero() {
        let empty = Fingerprint::degenerate();
        assert_eq!(similarity(&empty, &fp(&[1])), 0.0);
        assert_eq!(similarity(&empty, &empty), 0.0);
    }
}
