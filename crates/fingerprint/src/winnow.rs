use sha2::{Digest, Sha256};

// Separator between tokens inside a chunk so that ["ab", "c"] and ["a", "bc"]
// hash differently.
const TOKEN_SEPARATOR: u8 = 0x1f;

/// Hash every run of `chunk_size` consecutive tokens.
///
/// A token stream shorter than `chunk_size` (but not empty) yields exactly
/// one chunk covering all tokens. An empty stream yields no hashes.
#[must_use]
pub fn chunk_hashes(tokens: &[&str], chunk_size: usize) -> Vec<u64> {
    if tokens.is_empty() || chunk_size == 0 {
        return Vec::new();
    }
    if tokens.len() <= chunk_size {
        return vec![hash_chunk(tokens)];
    }
    tokens.windows(chunk_size).map(hash_chunk).collect()
}

/// Select the minimum hash of every window of `window_size` consecutive
/// hashes (rightmost on ties). Returns the selected hashes sorted and
/// deduplicated.
#[must_use]
pub fn winnow(hashes: &[u64], window_size: usize) -> Vec<u64> {
    if hashes.is_empty() || window_size == 0 {
        return Vec::new();
    }

    let window_size = window_size.min(hashes.len());
    let mut selected: Vec<u64> = Vec::with_capacity(hashes.len() / window_size + 1);
    let mut last_pick: Option<usize> = None;

    for start in 0..=hashes.len() - window_size {
        let window = &hashes[start..start + window_size];
        let mut min_offset = 0usize;
        for (offset, hash) in window.iter().enumerate() {
            if *hash <= window[min_offset] {
                min_offset = offset;
            }
        }
        let position = start + min_offset;
        if last_pick != Some(position) {
            selected.push(hashes[position]);
            last_pick = Some(position);
        }
    }

    selected.sort_unstable();
    selected.dedup();
    selected
}

fn hash_chunk(tokens: &[&str]) -> u64 {
    let mut hasher = Sha256::new();
    for (idx, token) in tokens.iter().enumerate() {
        if idx > 0 {
            hasher.update([TOKEN_SEPARATOR]);
        }
        hasher.update(token.as_bytes());
    }
    let digest = hasher.finalize();
    u64::from_be_bytes([
        digest[0], digest[1], digest[2], digest[3], digest[4], digest[5], digest[6], digest[7],
    ])
}
