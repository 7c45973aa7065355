//! mnemos core library.
//!
//! Data structures and pure logic for the memory index engine:
//!
//! - [`index::ProximityIndex`]: hand-built multi-layer HNSW over cosine
//!   similarity, arena + integer-id representation
//! - [`graph::RelationshipGraph`]: typed entity-relationship graph with
//!   idempotent extraction merges
//! - [`codec`]: versioned binary envelope serializing both structures for
//!   content-addressed blob storage
//! - [`types`]: identity newtypes and the ledger record shape shared with
//!   the synchronization layer
//!
//! # Example
//!
//! ```
//! use mnemos_core::config::HnswConfig;
//! use mnemos_core::index::ProximityIndex;
//! use mnemos_core::types::VectorMetadata;
//!
//! let mut index = ProximityIndex::new(HnswConfig::for_dimension(3)).unwrap();
//! index.insert(0, vec![1.0, 0.0, 0.0], VectorMetadata::new()).unwrap();
//! index.insert(1, vec![0.0, 1.0, 0.0], VectorMetadata::new()).unwrap();
//!
//! let hits = index.search(&[0.9, 0.1, 0.0], 1, 50).unwrap();
//! assert_eq!(hits[0].id, 0);
//! ```

pub mod codec;
pub mod config;
pub mod error;
pub mod graph;
pub mod index;
pub mod similarity;
pub mod types;

// Re-exports for convenience
pub use config::{Config, HnswConfig};
pub use error::{CoreError, CoreResult};
pub use graph::{GraphExtraction, RelationshipGraph};
pub use index::{ProximityIndex, SearchHit};
pub use types::{BlobId, OwnerId, RecordId, VersionedIndexRecord};
