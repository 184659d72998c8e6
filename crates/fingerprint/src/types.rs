use serde::{Deserialize, Serialize};

/// Winnowed structural signature of one normalized text
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint {
    /// Selected chunk hashes, sorted ascending and deduplicated
    pub hashes: Vec<u64>,

    /// Number of chunks the text was split into before winnowing
    pub chunk_count: usize,
}

impl Fingerprint {
    /// Build a fingerprint from arbitrary selected hashes.
    #[must_use]
    pub fn from_hashes(mut hashes: Vec<u64>, chunk_count: usize) -> Self {
        hashes.sort_unstable();
        hashes.dedup();
        Self {
            hashes,
            chunk_count,
        }
    }

    /// Fingerprint that carries no content hashes. It scores 0 against
    /// everything, so a sample holding it always founds its own family.
    #[must_use]
    pub const fn degenerate() -> Self {
        Self {
            hashes: Vec::new(),
            chunk_count: 0,
        }
    }

    #[must_use]
    pub fn is_degenerate(&self) -> bool {
        self.hashes.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }
}

/// Output of the fingerprinter: the normalized text and its signature
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprinted {
    pub normalized_text: String,
    pub fingerprint: Fingerprint,
}

impl Fingerprinted {
    /// Degenerate result for input that could not be fingerprinted.
    #[must_use]
    pub fn degenerate(normalized_text: String) -> Self {
        Self {
            normalized_text,
            fingerprint: Fingerprint::degenerate(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_hashes_sorts_and_dedups() {
        let fp = Fingerprint::from_hashes(vec![9, 3, 9, 1], 4);
        assert_eq!(fp.hashes, vec![1, 3, 9]);
        assert_eq!(fp.chunk_count, 4);
        assert_eq!(fp.len(), 3);
    }

    #[test]
    fn degenerate_is_empty() {
        let fp = Fingerprint::degenerate();
        assert!(fp.is_degenerate());
        assert!(fp.is_empty());
        assert_eq!(fp, Fingerprint::default());
    }
}
