//! External capability traits consumed by the engine.
//!
//! The blob network, the ledger, the embedding model, text generation and
//! encryption are all external collaborators: the engine depends on these
//! interfaces and never on concrete clients. In-memory reference
//! implementations for tests live in [`crate::stubs`].

use async_trait::async_trait;

use mnemos_core::types::{AccessProof, BlobId, OwnerId, RecordId, VersionedIndexRecord};

use crate::error::SyncResult;

/// Content-addressed blob storage.
///
/// `put` is idempotent for identical bytes (same content, same id). Both
/// operations may fail with [`crate::SyncError::Unavailable`] (retryable)
/// or [`crate::SyncError::BlobNotFound`] (not retryable); retry policy
/// lives in the coordinator's wrapper, not in implementations.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store bytes, returning their content address.
    async fn put(&self, bytes: &[u8]) -> SyncResult<BlobId>;

    /// Fetch the bytes behind a content address.
    async fn get(&self, blob_id: &BlobId) -> SyncResult<Vec<u8>>;
}

/// A single ledger-mutating operation, as carried by a batched transaction.
#[derive(Debug, Clone)]
pub enum LedgerOp {
    /// Create a fresh versioned record at version 0.
    CreateRecord {
        owner: OwnerId,
        index_blob: BlobId,
        graph_blob: BlobId,
    },
    /// Conditionally update an existing record.
    UpdateRecord {
        record_id: RecordId,
        expected_version: u64,
        index_blob: BlobId,
        graph_blob: BlobId,
    },
}

/// Per-operation outcome of a ledger submission.
///
/// A stale version is a value-level outcome, not an `Err`: the batch as a
/// whole succeeded, and the batcher reports staleness per item so callers
/// can tell which operations must be re-derived from fresh state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpOutcome {
    /// Record created.
    Created { record_id: RecordId },
    /// Record advanced to `new_version` (= expected + 1).
    Updated { new_version: u64 },
    /// The expected version was stale; `actual` is the version the ledger
    /// holds now.
    StaleVersion { expected: u64, actual: u64 },
}

/// Aggregate result of one batch submission.
#[derive(Debug, Clone)]
pub struct BatchOutcome {
    /// One outcome per submitted op, in submission order.
    pub results: Vec<OpOutcome>,
    /// Resource cost (gas) the submission consumed.
    pub cost: f64,
}

/// The ledger-side record store.
///
/// The ledger is the single source of truth for which blobs are current.
/// `update_record` enforces strict monotonic versioning: a proposal whose
/// `expected_version` does not match the stored version yields
/// [`OpOutcome::StaleVersion`], never a silent overwrite.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Create a record for `owner` at version 0.
    async fn create_record(
        &self,
        owner: &OwnerId,
        index_blob: &BlobId,
        graph_blob: &BlobId,
    ) -> SyncResult<RecordId>;

    /// Fetch a record; `Ok(None)` when the id resolves to nothing.
    async fn get_record(&self, record_id: &RecordId) -> SyncResult<Option<VersionedIndexRecord>>;

    /// Propose a conditional update.
    async fn update_record(
        &self,
        record_id: &RecordId,
        expected_version: u64,
        index_blob: &BlobId,
        graph_blob: &BlobId,
    ) -> SyncResult<OpOutcome>;

    /// Submit several operations as one ledger transaction.
    ///
    /// The default implementation applies ops one by one for ledgers
    /// without multi-operation transactions; a transient `Err` fails the
    /// whole batch (the batcher retries it wholesale), while per-op
    /// validation failures surface inside `results`.
    async fn submit_batch(&self, ops: &[LedgerOp]) -> SyncResult<BatchOutcome> {
        let mut results = Vec::with_capacity(ops.len());
        for op in ops {
            let outcome = match op {
                LedgerOp::CreateRecord {
                    owner,
                    index_blob,
                    graph_blob,
                } => {
                    let record_id = self.create_record(owner, index_blob, graph_blob).await?;
                    OpOutcome::Created { record_id }
                }
                LedgerOp::UpdateRecord {
                    record_id,
                    expected_version,
                    index_blob,
                    graph_blob,
                } => {
                    self.update_record(record_id, *expected_version, index_blob, graph_blob)
                        .await?
                }
            };
            results.push(outcome);
        }
        Ok(BatchOutcome {
            cost: ops.len() as f64,
            results,
        })
    }
}

/// Maps text to fixed-dimension vectors.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Dimension of every vector this provider produces.
    fn dimension(&self) -> usize;

    /// Embed one text unit.
    async fn embed(&self, text: &str) -> SyncResult<Vec<f32>>;

    /// Embed several texts, order-preserving, same length as input.
    async fn embed_batch(&self, texts: &[String]) -> SyncResult<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            vectors.push(self.embed(text).await?);
        }
        Ok(vectors)
    }
}

/// Opaque generative-text capability (summaries, chat completion).
///
/// Consumed by layers above this core; declared here so engine
/// constructors can thread it through without depending on a vendor SDK.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Complete a prompt.
    async fn complete(&self, prompt: &str) -> SyncResult<String>;
}

/// Opaque encryption capability for blob payloads.
///
/// Key management and proof issuance live in the wallet layer; the engine
/// only ever sees ciphertext in, plaintext out.
pub trait Cipher: Send + Sync {
    /// Encrypt bytes for an identity.
    fn encrypt(&self, bytes: &[u8], identity: &OwnerId) -> SyncResult<Vec<u8>>;

    /// Decrypt ciphertext, given the identity and an access proof.
    fn decrypt(
        &self,
        ciphertext: &[u8],
        identity: &OwnerId,
        proof: &AccessProof,
    ) -> SyncResult<Vec<u8>>;
}
