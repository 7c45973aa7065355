//! Synchronization coordinator.
//!
//! Keeps three independently-failing stores mutually consistent for each
//! owner: the in-memory index/graph pair, the content-addressed blob
//! store, and the ledger-anchored version record. Mutation is
//! single-writer per owner (a per-owner async mutex); distinct owners
//! proceed in parallel. Persistence goes through the
//! [`TransactionBatcher`] and carries the version observed at submission
//! time; the ledger's strict monotonic version check makes out-of-order
//! application impossible, so a conflict is surfaced, never reordered or
//! force-retried.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use mnemos_core::codec;
use mnemos_core::config::HnswConfig;
use mnemos_core::error::CoreError;
use mnemos_core::graph::{GraphExtraction, MergeOutcome, RelationshipGraph};
use mnemos_core::index::ProximityIndex;
use mnemos_core::types::{
    BlobId, OwnerId, RecordId, VectorMetadata, VersionedIndexRecord,
};

use crate::batcher::{BatchedTransaction, TransactionBatcher, TransactionResult};
use crate::error::{SyncError, SyncResult};
use crate::registry::OwnerRegistry;
use crate::traits::{BlobStore, LedgerOp, LedgerStore};

// ============================================================================
// CONFIG
// ============================================================================

/// Configuration for the sync coordinator.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Attempts per blob operation for transient failures.
    pub blob_attempts: u32,

    /// Backoff before the first blob retry; doubles per attempt.
    pub blob_backoff: Duration,

    /// Priority assigned to persist transactions.
    pub persist_priority: i32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            blob_attempts: 3,
            blob_backoff: Duration::from_millis(100),
            persist_priority: 0,
        }
    }
}

impl SyncConfig {
    /// Load config overrides from environment variables.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(val) = std::env::var("MNEMOS_BLOB_ATTEMPTS") {
            if let Ok(attempts) = val.parse::<u32>() {
                self.blob_attempts = attempts.max(1);
            }
        }
        if let Ok(val) = std::env::var("MNEMOS_BLOB_BACKOFF_MS") {
            if let Ok(ms) = val.parse::<u64>() {
                self.blob_backoff = Duration::from_millis(ms);
            }
        }
        self
    }
}

// ============================================================================
// SESSION AND VIEWS
// ============================================================================

/// One owner's live in-memory state, guarded by a per-owner mutex.
#[derive(Debug)]
struct OwnerSession {
    record_id: RecordId,
    /// Version last observed on the ledger; the next persist proposes to
    /// replace exactly this version.
    version: u64,
    index: ProximityIndex,
    graph: RelationshipGraph,
}

/// Snapshot of a resolved owner state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedState {
    pub record_id: RecordId,
    pub version: u64,
    pub vector_count: usize,
    pub graph_node_count: usize,
    pub graph_edge_count: usize,
}

/// Blob ids produced by [`SyncCoordinator::prepare_for_creation`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedBlobs {
    pub index_blob: BlobId,
    pub graph_blob: BlobId,
}

/// One ranked search result with its stored metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredRecord {
    pub id: u64,
    pub similarity: f32,
    pub metadata: VectorMetadata,
}

// ============================================================================
// COORDINATOR
// ============================================================================

/// Orchestrates resolve / load / mutate / persist for all owners.
pub struct SyncCoordinator {
    blobs: Arc<dyn BlobStore>,
    ledger: Arc<dyn LedgerStore>,
    batcher: TransactionBatcher,
    registry: Arc<OwnerRegistry>,
    sessions: DashMap<OwnerId, Arc<Mutex<OwnerSession>>>,
    index_config: HnswConfig,
    config: SyncConfig,
}

impl SyncCoordinator {
    pub fn new(
        blobs: Arc<dyn BlobStore>,
        ledger: Arc<dyn LedgerStore>,
        batcher: TransactionBatcher,
        registry: Arc<OwnerRegistry>,
        index_config: HnswConfig,
        config: SyncConfig,
    ) -> SyncResult<Self> {
        index_config.validate().map_err(SyncError::Core)?;
        Ok(Self {
            blobs,
            ledger,
            batcher,
            registry,
            sessions: DashMap::new(),
            index_config,
            config,
        })
    }

    /// Dimension the coordinator's indexes are configured for.
    pub fn index_dimension(&self) -> usize {
        self.index_config.dimension
    }

    /// Shared owner registry.
    pub fn registry(&self) -> &Arc<OwnerRegistry> {
        &self.registry
    }

    // ========================================================================
    // CREATION AND REGISTRATION
    // ========================================================================

    /// Build and store empty structures for a new owner.
    ///
    /// Returns the two blob ids without touching the ledger: creating the
    /// version record is the caller's responsibility (it signs the chain
    /// transaction), after which it registers the record id back via
    /// [`SyncCoordinator::register`].
    pub async fn prepare_for_creation(&self, owner: &OwnerId) -> SyncResult<PreparedBlobs> {
        let index = ProximityIndex::new(self.index_config.clone())?;
        let graph = RelationshipGraph::new();

        let index_blob = self.put_blob(&codec::encode_index(&index)?).await?;
        let graph_blob = self.put_blob(&codec::encode_graph(&graph)?).await?;

        info!(
            owner = %owner,
            index_blob = %index_blob,
            graph_blob = %graph_blob,
            "prepared empty structures for creation"
        );
        Ok(PreparedBlobs {
            index_blob,
            graph_blob,
        })
    }

    /// Bind an owner to an existing ledger record.
    ///
    /// Verifies the record's owner field against the caller; a mismatch
    /// fails with [`SyncError::OwnershipMismatch`] and caches nothing.
    pub async fn register(&self, owner: &OwnerId, record_id: &RecordId) -> SyncResult<()> {
        let record = self
            .ledger
            .get_record(record_id)
            .await?
            .ok_or_else(|| SyncError::RecordNotFound {
                record_id: record_id.clone(),
            })?;

        if record.owner != *owner {
            warn!(
                caller = %owner,
                record_owner = %record.owner,
                record_id = %record_id,
                "registration rejected: ownership mismatch"
            );
            return Err(SyncError::OwnershipMismatch {
                caller: owner.clone(),
                record_owner: record.owner,
            });
        }

        self.registry.insert(owner.clone(), record_id.clone());
        info!(owner = %owner, record_id = %record_id, "owner registered");
        Ok(())
    }

    // ========================================================================
    // RESOLUTION
    // ========================================================================

    /// Resolve an owner's current state, loading from blob storage when no
    /// live session exists.
    ///
    /// `Ok(None)` means "no index yet", an expected state: unknown owner,
    /// deleted record, missing blob, or a corrupt/unsupported blob (the
    /// index is then rebuildable from scratch). Only transient storage
    /// failure that exhausts its retry budget surfaces as an error.
    pub async fn resolve(&self, owner: &OwnerId) -> SyncResult<Option<ResolvedState>> {
        if let Some(session) = self.session_if_live(owner) {
            let session = session.lock().await;
            return Ok(Some(Self::snapshot(&session)));
        }

        match self.load_session(owner).await? {
            Some(session) => {
                let arc = Arc::new(Mutex::new(session));
                // First resolver wins if two race; the loser's load is
                // discarded. The cache is advisory either way.
                let entry = self
                    .sessions
                    .entry(owner.clone())
                    .or_insert(arc)
                    .value()
                    .clone();
                let session = entry.lock().await;
                Ok(Some(Self::snapshot(&session)))
            }
            None => Ok(None),
        }
    }

    fn session_if_live(&self, owner: &OwnerId) -> Option<Arc<Mutex<OwnerSession>>> {
        self.sessions.get(owner).map(|entry| entry.value().clone())
    }

    fn snapshot(session: &OwnerSession) -> ResolvedState {
        ResolvedState {
            record_id: session.record_id.clone(),
            version: session.version,
            vector_count: session.index.len(),
            graph_node_count: session.graph.node_count(),
            graph_edge_count: session.graph.edge_count(),
        }
    }

    /// Resolve the record and load both blobs into a fresh session.
    async fn load_session(&self, owner: &OwnerId) -> SyncResult<Option<OwnerSession>> {
        // Primary path: the cached record id.
        if let Some(record_id) = self.registry.get(owner) {
            match self.ledger.get_record(&record_id).await {
                Ok(Some(record)) => return self.load_record(owner, record).await,
                Ok(None) => {
                    warn!(owner = %owner, record_id = %record_id, "cached record gone from ledger, evicting");
                    self.registry.evict(owner);
                }
                Err(e) => {
                    warn!(owner = %owner, record_id = %record_id, error = %e, "ledger lookup failed, evicting cache entry");
                    self.registry.evict(owner);
                }
            }
        }

        // Compatibility shim: older deployments keyed records directly by
        // the owner's address. This is the only place the two namespaces
        // are allowed to meet.
        let legacy_id = RecordId::new(owner.as_str());
        match self.ledger.get_record(&legacy_id).await {
            Ok(Some(record)) if record.owner == *owner => {
                debug!(owner = %owner, "resolved via owner-address fallback");
                self.registry.insert(owner.clone(), legacy_id);
                self.load_record(owner, record).await
            }
            _ => Ok(None),
        }
    }

    /// Fetch and decode the blobs a record points at.
    async fn load_record(
        &self,
        owner: &OwnerId,
        record: VersionedIndexRecord,
    ) -> SyncResult<Option<OwnerSession>> {
        let index_bytes = match self.get_blob(&record.index_blob).await {
            Ok(bytes) => bytes,
            Err(SyncError::BlobNotFound { blob_id }) => {
                warn!(owner = %owner, blob_id = %blob_id, "index blob missing, treating index as absent");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };
        let graph_bytes = match self.get_blob(&record.graph_blob).await {
            Ok(bytes) => bytes,
            Err(SyncError::BlobNotFound { blob_id }) => {
                warn!(owner = %owner, blob_id = %blob_id, "graph blob missing, treating index as absent");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        let index = match codec::decode_index(&index_bytes) {
            Ok(index) => index,
            Err(e @ (CoreError::CorruptBlob { .. } | CoreError::UnsupportedFormat { .. })) => {
                warn!(owner = %owner, error = %e, "index blob unreadable, treating index as rebuildable");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        let graph = match codec::decode_graph(&graph_bytes) {
            Ok(graph) => graph,
            Err(e @ (CoreError::CorruptBlob { .. } | CoreError::UnsupportedFormat { .. })) => {
                warn!(owner = %owner, error = %e, "graph blob unreadable, treating index as rebuildable");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        info!(
            owner = %owner,
            record_id = %record.id,
            version = record.version,
            vectors = index.len(),
            "loaded owner state from blobs"
        );

        Ok(Some(OwnerSession {
            record_id: record.id,
            version: record.version,
            index,
            graph,
        }))
    }

    /// Live session for an owner, loading it on first use.
    async fn session(&self, owner: &OwnerId) -> SyncResult<Arc<Mutex<OwnerSession>>> {
        if let Some(session) = self.session_if_live(owner) {
            return Ok(session);
        }
        match self.load_session(owner).await? {
            Some(session) => {
                let arc = Arc::new(Mutex::new(session));
                Ok(self
                    .sessions
                    .entry(owner.clone())
                    .or_insert(arc)
                    .value()
                    .clone())
            }
            None => Err(SyncError::NotRegistered {
                owner: owner.clone(),
            }),
        }
    }

    // ========================================================================
    // MUTATION AND SEARCH
    // ========================================================================

    /// Insert a vector into the owner's index under a fresh id.
    pub async fn insert_vector(
        &self,
        owner: &OwnerId,
        vector: Vec<f32>,
        metadata: VectorMetadata,
    ) -> SyncResult<u64> {
        let session = self.session(owner).await?;
        let mut session = session.lock().await;
        let id = session.index.next_id();
        session.index.insert(id, vector, metadata)?;
        debug!(owner = %owner, id, "inserted vector");
        Ok(id)
    }

    /// Merge an extraction into the owner's relationship graph.
    pub async fn merge_extraction(
        &self,
        owner: &OwnerId,
        extraction: &GraphExtraction,
    ) -> SyncResult<MergeOutcome> {
        let session = self.session(owner).await?;
        let mut session = session.lock().await;
        Ok(session.graph.merge(extraction)?)
    }

    /// k-nearest-neighbor search over the owner's index.
    pub async fn search(
        &self,
        owner: &OwnerId,
        query: &[f32],
        k: usize,
    ) -> SyncResult<Vec<ScoredRecord>> {
        let session = self.session(owner).await?;
        let session = session.lock().await;
        let hits = session
            .index
            .search(query, k, self.index_config.ef_search)?;
        Ok(hits
            .into_iter()
            .map(|hit| ScoredRecord {
                id: hit.id,
                similarity: hit.similarity,
                metadata: session
                    .index
                    .record(hit.id)
                    .map(|r| r.metadata.clone())
                    .unwrap_or_default(),
            })
            .collect())
    }

    // ========================================================================
    // PERSISTENCE
    // ========================================================================

    /// Serialize the owner's structures, store fresh blobs and propose a
    /// ledger update carrying the version observed at submission time.
    ///
    /// On success the session's cached version refreshes and the new
    /// version is returned. On a stale version the session is
    /// dropped (the next access re-resolves from the ledger) and
    /// [`SyncError::Conflict`] surfaces; the coordinator never retries a
    /// conflict on its own.
    pub async fn persist(&self, owner: &OwnerId) -> SyncResult<u64> {
        let session_arc = self.session(owner).await?;
        // Held across the submission: further mutation of this owner
        // waits for the outcome, which keeps persists in submission order.
        let mut session = session_arc.lock().await;

        let index_blob = self.put_blob(&codec::encode_index(&session.index)?).await?;
        let graph_blob = self.put_blob(&codec::encode_graph(&session.graph)?).await?;

        let expected_version = session.version;
        let tx = BatchedTransaction::new(
            owner.clone(),
            LedgerOp::UpdateRecord {
                record_id: session.record_id.clone(),
                expected_version,
                index_blob,
                graph_blob,
            },
            self.config.persist_priority,
        );
        let tx_id = tx.id;

        debug!(
            owner = %owner,
            record_id = %session.record_id,
            expected_version,
            "enqueued persist transaction"
        );

        let receiver = self.batcher.enqueue(tx);
        let result = receiver.await.map_err(|_| {
            SyncError::Internal("batcher dropped the result channel".to_string())
        })?;

        match result {
            TransactionResult::Updated { new_version } => {
                session.version = new_version;
                info!(owner = %owner, new_version, "persist committed");
                Ok(new_version)
            }
            TransactionResult::Conflict { expected, actual } => {
                warn!(
                    owner = %owner,
                    expected,
                    actual,
                    "persist rejected with stale version; caller must re-resolve"
                );
                let record_id = session.record_id.clone();
                drop(session);
                // The in-memory state no longer reflects the ledger.
                self.sessions.remove(owner);
                Err(SyncError::Conflict {
                    record_id,
                    expected_version: expected,
                })
            }
            TransactionResult::Cancelled => Err(SyncError::Cancelled {
                transaction_id: tx_id,
            }),
            TransactionResult::Failed { message } => Err(SyncError::Internal(format!(
                "persist submission failed: {message}"
            ))),
            TransactionResult::Created { .. } => Err(SyncError::Internal(
                "ledger answered an update with a creation result".to_string(),
            )),
        }
    }

    /// Drop an owner's live session, forcing the next access to reload
    /// from the ledger and blob store.
    pub fn invalidate(&self, owner: &OwnerId) {
        self.sessions.remove(owner);
    }

    // ========================================================================
    // BLOB I/O WITH RETRY
    // ========================================================================

    async fn put_blob(&self, bytes: &[u8]) -> SyncResult<BlobId> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.blobs.put(bytes).await {
                Ok(blob_id) => return Ok(blob_id),
                Err(SyncError::Unavailable { .. }) if attempt < self.config.blob_attempts => {
                    let backoff = self.config.blob_backoff * 2u32.pow(attempt - 1);
                    warn!(attempt, backoff_ms = backoff.as_millis() as u64, "blob put unavailable, retrying");
                    tokio::time::sleep(backoff).await;
                }
                Err(SyncError::Unavailable { .. }) => {
                    return Err(SyncError::Unavailable {
                        context: "blob put".to_string(),
                        attempts: attempt,
                    })
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn get_blob(&self, blob_id: &BlobId) -> SyncResult<Vec<u8>> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.blobs.get(blob_id).await {
                Ok(bytes) => return Ok(bytes),
                Err(SyncError::Unavailable { .. }) if attempt < self.config.blob_attempts => {
                    let backoff = self.config.blob_backoff * 2u32.pow(attempt - 1);
                    warn!(attempt, blob_id = %blob_id, backoff_ms = backoff.as_millis() as u64, "blob get unavailable, retrying");
                    tokio::time::sleep(backoff).await;
                }
                Err(SyncError::Unavailable { .. }) => {
                    return Err(SyncError::Unavailable {
                        context: format!("blob get {blob_id}"),
                        attempts: attempt,
                    })
                }
                Err(e) => return Err(e),
            }
        }
    }
}
