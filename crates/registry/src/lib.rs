//! # Codefam Registry
//!
//! Incremental clustering of code samples into families, plus durable
//! checkpoints and the purge policy that keeps the registry bounded.
//!
//! ## Architecture
//!
//! ```text
//! CodeSample (fingerprinted)
//!     │
//!     ├──> Registry::assign
//!     │      ├─> score against family representatives (no lock held)
//!     │      └─> commit under the write lock (join best family or found one)
//!     │
//!     ├──> PurgePolicy::purge (stale singleton families)
//!     │
//!     └──> CheckpointStore
//!            ├─> registry.json (atomic tmp + rename)
//!            └─> restore on startup
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use codefam_fingerprint::Fingerprinter;
//! use codefam_registry::{unix_now_ms, CheckpointStore, RegistryConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store = CheckpointStore::new(".codefam");
//!     let registry = store.restore(RegistryConfig::default()).await?;
//!
//!     let text = "contract Token { mapping(address => uint) balances; }";
//!     let fingerprinted = Fingerprinter::default().fingerprint_or_degenerate(text);
//!     let mut sample = registry.admit(
//!         text.to_string(),
//!         serde_json::json!({ "name": "Token" }),
//!         fingerprinted,
//!         unix_now_ms(),
//!     );
//!     let family = registry.assign(&mut sample);
//!     println!("{} -> {family}", sample.id());
//!
//!     store.checkpoint(&registry).await?;
//!     Ok(())
//! }
//! ```

mod checkpoint;
mod config;
mod error;
mod purge;
mod registry;
mod snapshot;
mod types;
pub mod view;

pub use checkpoint::{CheckpointReport, CheckpointStore, CHECKPOINT_FILE_NAME};
pub use config::{RegistryConfig, DEFAULT_THRESHOLD};
pub use error::{RegistryError, Result};
pub use purge::PurgePolicy;
pub use registry::{Registry, RegistryMetrics};
pub use snapshot::{RegistrySnapshot, REGISTRY_SNAPSHOT_SCHEMA_VERSION};
pub use types::{
    unix_now_ms, Assignment, CodeFamily, CodeSample, FamilyId, Representative, SampleId,
    METADATA_ADDRESS_KEY, METADATA_NAME_KEY,
};
pub use view::{FamilySummary, NameFrequency, RegistryStats, SimilarityEdge};
