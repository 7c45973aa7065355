//! Versioned synchronization layer for mnemos.
//!
//! Builds the durable half of the memory engine on top of
//! [`mnemos_core`]: capability traits for blob storage, the version
//! ledger and embedding ([`traits`]), an owner-to-record cache
//! ([`registry`]), a debounced optimistic-concurrency transaction
//! batcher ([`batcher`]), the per-owner session coordinator
//! ([`coordinator`]) and the text-level facade ([`engine`]).
//!
//! Storage backends are injected; [`stubs`] ships in-memory
//! implementations with fault injection for tests and local runs.

pub mod batcher;
pub mod coordinator;
pub mod engine;
pub mod error;
pub mod registry;
pub mod stubs;
pub mod traits;

pub use batcher::{BatchedTransaction, BatcherConfig, BatcherStats, TransactionBatcher, TransactionResult};
pub use coordinator::{
    PreparedBlobs, ResolvedState, ScoredRecord, SyncConfig, SyncCoordinator,
};
pub use engine::{MemoryEngine, TEXT_KEY};
pub use error::{SyncError, SyncResult};
pub use registry::OwnerRegistry;
pub use traits::{
    BatchOutcome, BlobStore, Cipher, EmbeddingProvider, LedgerOp, LedgerStore, OpOutcome,
    TextGenerator,
};
