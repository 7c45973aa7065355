//! In-memory reference implementations of the external capabilities.
//!
//! Used by unit and integration tests, and as the executable definition
//! of each capability's contract: content addressing for the blob store,
//! strict optimistic concurrency for the ledger. Fault injection hooks
//! exercise the retry and fallback paths.

use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use mnemos_core::types::{BlobId, OwnerId, RecordId, VersionedIndexRecord};

use crate::error::{SyncError, SyncResult};
use crate::traits::{BatchOutcome, BlobStore, EmbeddingProvider, LedgerOp, LedgerStore, OpOutcome};

/// Consume one pending injected failure, if any.
fn take_failure(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

// ============================================================================
// BLOB STORE
// ============================================================================

/// Content-addressed in-memory blob store.
///
/// Blob ids are the SHA-256 of the content, so `put` is idempotent for
/// identical bytes. `fail_next_*` makes the next N calls return
/// [`SyncError::Unavailable`], for exercising retry wrappers.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: DashMap<BlobId, Vec<u8>>,
    failing_puts: AtomicU32,
    failing_gets: AtomicU32,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` put calls fail transiently.
    pub fn fail_next_puts(&self, n: u32) {
        self.failing_puts.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` get calls fail transiently.
    pub fn fail_next_gets(&self, n: u32) {
        self.failing_gets.store(n, Ordering::SeqCst);
    }

    /// Number of distinct blobs stored.
    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }

    /// Drop a blob, simulating content that was never pinned.
    pub fn forget(&self, blob_id: &BlobId) -> bool {
        self.blobs.remove(blob_id).is_some()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, bytes: &[u8]) -> SyncResult<BlobId> {
        if take_failure(&self.failing_puts) {
            return Err(SyncError::Unavailable {
                context: "blob put".to_string(),
                attempts: 1,
            });
        }
        let digest = Sha256::digest(bytes);
        let blob_id = BlobId::new(format!("{:x}", digest));
        self.blobs.insert(blob_id.clone(), bytes.to_vec());
        Ok(blob_id)
    }

    async fn get(&self, blob_id: &BlobId) -> SyncResult<Vec<u8>> {
        if take_failure(&self.failing_gets) {
            return Err(SyncError::Unavailable {
                context: "blob get".to_string(),
                attempts: 1,
            });
        }
        self.blobs
            .get(blob_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| SyncError::BlobNotFound {
                blob_id: blob_id.clone(),
            })
    }
}

// ============================================================================
// LEDGER
// ============================================================================

/// In-memory ledger with strict optimistic concurrency.
///
/// `update_record` is a single-operation compare-and-set on the record
/// entry: a stale expected version yields [`OpOutcome::StaleVersion`] and
/// leaves the record untouched.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    records: DashMap<RecordId, VersionedIndexRecord>,
    failing_submissions: AtomicU32,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` batch submissions fail transiently.
    pub fn fail_next_submissions(&self, n: u32) {
        self.failing_submissions.store(n, Ordering::SeqCst);
    }

    /// Synchronous record creation for test setup.
    pub fn create_record_sync(
        &self,
        owner: &OwnerId,
        index_blob: &BlobId,
        graph_blob: &BlobId,
    ) -> RecordId {
        let record_id = RecordId::new(Uuid::new_v4().to_string());
        self.insert_record(record_id.clone(), owner, index_blob, graph_blob);
        record_id
    }

    /// Create a record under a caller-chosen id. Tests of the
    /// owner-address fallback shim use the owner's address as the id.
    pub fn create_record_with_id(
        &self,
        record_id: RecordId,
        owner: &OwnerId,
        index_blob: &BlobId,
        graph_blob: &BlobId,
    ) {
        self.insert_record(record_id, owner, index_blob, graph_blob);
    }

    /// Delete a record, simulating an unreachable/cleared ledger entry.
    pub fn delete_record(&self, record_id: &RecordId) -> bool {
        self.records.remove(record_id).is_some()
    }

    fn insert_record(
        &self,
        record_id: RecordId,
        owner: &OwnerId,
        index_blob: &BlobId,
        graph_blob: &BlobId,
    ) {
        self.records.insert(
            record_id.clone(),
            VersionedIndexRecord {
                id: record_id,
                owner: owner.clone(),
                version: 0,
                index_blob: index_blob.clone(),
                graph_blob: graph_blob.clone(),
                last_updated: chrono::Utc::now(),
            },
        );
    }
}

#[async_trait]
impl LedgerStore for MemoryLedger {
    async fn create_record(
        &self,
        owner: &OwnerId,
        index_blob: &BlobId,
        graph_blob: &BlobId,
    ) -> SyncResult<RecordId> {
        Ok(self.create_record_sync(owner, index_blob, graph_blob))
    }

    async fn get_record(&self, record_id: &RecordId) -> SyncResult<Option<VersionedIndexRecord>> {
        Ok(self.records.get(record_id).map(|entry| entry.value().clone()))
    }

    async fn update_record(
        &self,
        record_id: &RecordId,
        expected_version: u64,
        index_blob: &BlobId,
        graph_blob: &BlobId,
    ) -> SyncResult<OpOutcome> {
        // get_mut holds the entry lock: check and update are one atomic step.
        let mut entry = self
            .records
            .get_mut(record_id)
            .ok_or_else(|| SyncError::RecordNotFound {
                record_id: record_id.clone(),
            })?;

        if entry.version != expected_version {
            return Ok(OpOutcome::StaleVersion {
                expected: expected_version,
                actual: entry.version,
            });
        }

        entry.version += 1;
        entry.index_blob = index_blob.clone();
        entry.graph_blob = graph_blob.clone();
        entry.last_updated = chrono::Utc::now();
        Ok(OpOutcome::Updated {
            new_version: entry.version,
        })
    }

    async fn submit_batch(&self, ops: &[LedgerOp]) -> SyncResult<BatchOutcome> {
        if take_failure(&self.failing_submissions) {
            return Err(SyncError::Unavailable {
                context: "ledger submission".to_string(),
                attempts: 1,
            });
        }

        let mut results = Vec::with_capacity(ops.len());
        for op in ops {
            let outcome = match op {
                LedgerOp::CreateRecord {
                    owner,
                    index_blob,
                    graph_blob,
                } => OpOutcome::Created {
                    record_id: self.create_record(owner, index_blob, graph_blob).await?,
                },
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

// ============================================================================
// EMBEDDER
// ============================================================================

/// Deterministic bag-of-words embedder for tests.
///
/// Each whitespace token hashes to a dimension bucket; the resulting count
/// vector is L2-normalized. Shared tokens produce similar vectors, which
/// is all the engine's ranking tests need. Empty text embeds to the zero
/// vector, which the index rejects as [`mnemos_core::CoreError::UndefinedSimilarity`].
#[derive(Debug)]
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    fn bucket(&self, token: &str) -> usize {
        let digest = Sha256::digest(token.as_bytes());
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&digest[..8]);
        (u64::from_le_bytes(bytes) % self.dimension as u64) as usize
    }
}

#[async_trait]
impl EmbeddingProvider for HashingEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, text: &str) -> SyncResult<Vec<f32>> {
        let mut vector = vec![0.0f32; self.dimension];
        for token in text.split_whitespace() {
            vector[self.bucket(&token.to_lowercase())] += 1.0;
        }
        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > f32::EPSILON {
            for x in &mut vector {
                *x /= norm;
            }
        }
        Ok(vector)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_blob_store_is_content_addressed() {
        let store = MemoryBlobStore::new();
        let a = store.put(b"hello").await.unwrap();
        let b = store.put(b"hello").await.unwrap();
        let c = store.put(b"world").await.unwrap();

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(store.len(), 2);
        assert_eq!(store.get(&a).await.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn test_blob_store_missing_blob_not_retryable() {
        let store = MemoryBlobStore::new();
        let result = store.get(&BlobId::new("missing")).await;
        assert!(matches!(result, Err(SyncError::BlobNotFound { .. })));
    }

    #[tokio::test]
    async fn test_blob_store_fault_injection_is_bounded() {
        let store = MemoryBlobStore::new();
        store.fail_next_puts(1);
        assert!(matches!(
            store.put(b"x").await,
            Err(SyncError::Unavailable { .. })
        ));
        assert!(store.put(b"x").await.is_ok());
    }

    #[tokio::test]
    async fn test_ledger_optimistic_concurrency() {
        let ledger = MemoryLedger::new();
        let owner = OwnerId::new("u1");
        let record_id = ledger.create_record_sync(&owner, &BlobId::new("i0"), &BlobId::new("g0"));

        // expected = current → accepted, advances by exactly 1.
        let first = ledger
            .update_record(&record_id, 0, &BlobId::new("i1"), &BlobId::new("g1"))
            .await
            .unwrap();
        assert_eq!(first, OpOutcome::Updated { new_version: 1 });

        // Second proposal still carrying 0 → stale, record untouched.
        let second = ledger
            .update_record(&record_id, 0, &BlobId::new("i2"), &BlobId::new("g2"))
            .await
            .unwrap();
        assert_eq!(
            second,
            OpOutcome::StaleVersion {
                expected: 0,
                actual: 1
            }
        );
        let record = ledger.get_record(&record_id).await.unwrap().unwrap();
        assert_eq!(record.version, 1);
        assert_eq!(record.index_blob, BlobId::new("i1"));
    }

    #[tokio::test]
    async fn test_embedder_is_deterministic_and_order_preserving() {
        let embedder = HashingEmbedder::new(64);
        let a = embedder.embed("rust memory engine").await.unwrap();
        let b = embedder.embed("rust memory engine").await.unwrap();
        assert_eq!(a, b);

        let texts = vec!["alpha".to_string(), "beta".to_string()];
        let batch = embedder.embed_batch(&texts).await.unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0], embedder.embed("alpha").await.unwrap());
        assert_eq!(batch[1], embedder.embed("beta").await.unwrap());
    }
}
