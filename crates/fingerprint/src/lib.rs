//! # Codefam Fingerprint
//!
//! Structural signatures for source-code artifacts and the similarity score
//! computed between them.
//!
//! ## Pipeline
//!
//! ```text
//! Raw source
//!     │
//!     ├──> Normalization (comments stripped, whitespace collapsed)
//!     │
//!     ├──> Tokenization (identifiers, literals, punctuation)
//!     │
//!     ├──> Chunking (overlapping runs of `chunk_size` tokens, SHA-256 → u64)
//!     │
//!     └──> Winnowing (minimum hash per window of `window_size` chunks)
//!            └─> Fingerprint { hashes, chunk_count }
//! ```
//!
//! ## Example
//!
//! ```rust
//! use codefam_fingerprint::{similarity, Fingerprinter, FingerprintConfig};
//!
//! let fingerprinter = Fingerprinter::new(FingerprintConfig::default());
//!
//! let a = fingerprinter.fingerprint("contract A { uint x; }").unwrap();
//! let b = fingerprinter.fingerprint("contract A {\n  uint x; // balance\n}").unwrap();
//!
//! assert_eq!(similarity(&a.fingerprint, &b.fingerprint), 100.0);
//! ```

mod config;
mod error;
mod fingerprinter;
mod normalize;
mod similarity;
mod types;
mod winnow;

pub use config::FingerprintConfig;
pub use error::{FingerprintError, Result};
pub use fingerprinter::{fingerprint, Fingerprinter};
pub use normalize::{normalize, tokenize};
pub use similarity::{overlap, similarity, MAX_SCORE};
pub use types::{Fingerprint, Fingerprinted};
pub use winnow::{chunk_hashes, winnow};
