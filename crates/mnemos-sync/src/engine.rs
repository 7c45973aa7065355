//! Text-level memory engine.
//!
//! Thin facade over the [`SyncCoordinator`] that speaks text instead of
//! vectors: it embeds inserted memories and search queries through the
//! configured [`EmbeddingProvider`] and stores the source text alongside
//! each vector so search results carry their original content.

use std::sync::Arc;

use tracing::debug;

use mnemos_core::error::CoreError;
use mnemos_core::graph::{GraphExtraction, MergeOutcome};
use mnemos_core::types::{MetadataValue, OwnerId, RecordId, VectorMetadata};

use crate::coordinator::{PreparedBlobs, ResolvedState, ScoredRecord, SyncCoordinator};
use crate::error::SyncResult;
use crate::traits::EmbeddingProvider;

/// Metadata key under which the source text of a memory is stored.
pub const TEXT_KEY: &str = "text";

/// End-to-end memory engine for one deployment.
pub struct MemoryEngine {
    embedder: Arc<dyn EmbeddingProvider>,
    coordinator: Arc<SyncCoordinator>,
}

impl MemoryEngine {
    /// Wire an embedder to a coordinator.
    ///
    /// Fails when the embedder's output dimension disagrees with the
    /// dimension the coordinator's indexes are built for; catching this
    /// at construction keeps every later insert from failing one by one.
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        coordinator: Arc<SyncCoordinator>,
    ) -> SyncResult<Self> {
        let expected = coordinator.index_dimension();
        let actual = embedder.dimension();
        if expected != actual {
            return Err(CoreError::DimensionMismatch { expected, actual }.into());
        }
        Ok(Self {
            embedder,
            coordinator,
        })
    }

    /// Underlying coordinator, for vector-level access.
    pub fn coordinator(&self) -> &Arc<SyncCoordinator> {
        &self.coordinator
    }

    /// See [`SyncCoordinator::prepare_for_creation`].
    pub async fn prepare_for_creation(&self, owner: &OwnerId) -> SyncResult<PreparedBlobs> {
        self.coordinator.prepare_for_creation(owner).await
    }

    /// See [`SyncCoordinator::register`].
    pub async fn register(&self, owner: &OwnerId, record_id: &RecordId) -> SyncResult<()> {
        self.coordinator.register(owner, record_id).await
    }

    /// See [`SyncCoordinator::resolve`].
    pub async fn resolve(&self, owner: &OwnerId) -> SyncResult<Option<ResolvedState>> {
        self.coordinator.resolve(owner).await
    }

    /// Embed a memory and insert it into the owner's index.
    ///
    /// The text itself lands in the metadata under [`TEXT_KEY`] unless
    /// the caller already supplied that key.
    pub async fn insert_text(
        &self,
        owner: &OwnerId,
        text: &str,
        mut metadata: VectorMetadata,
    ) -> SyncResult<u64> {
        let vector = self.embedder.embed(text).await?;
        metadata
            .entry(TEXT_KEY.to_string())
            .or_insert_with(|| MetadataValue::Text(text.to_string()));
        let id = self.coordinator.insert_vector(owner, vector, metadata).await?;
        debug!(owner = %owner, id, chars = text.len(), "inserted memory");
        Ok(id)
    }

    /// Embed and insert a batch of memories, returning their ids in
    /// input order. Stops at the first failure; memories inserted before
    /// it remain in the in-memory index until the next persist.
    pub async fn insert_texts(&self, owner: &OwnerId, texts: &[String]) -> SyncResult<Vec<u64>> {
        let vectors = self.embedder.embed_batch(texts).await?;
        let mut ids = Vec::with_capacity(texts.len());
        for (text, vector) in texts.iter().zip(vectors) {
            let mut metadata = VectorMetadata::new();
            metadata.insert(TEXT_KEY.to_string(), MetadataValue::Text(text.clone()));
            ids.push(self.coordinator.insert_vector(owner, vector, metadata).await?);
        }
        Ok(ids)
    }

    /// See [`SyncCoordinator::merge_extraction`].
    pub async fn merge_extraction(
        &self,
        owner: &OwnerId,
        extraction: &GraphExtraction,
    ) -> SyncResult<MergeOutcome> {
        self.coordinator.merge_extraction(owner, extraction).await
    }

    /// Embed a query and return the k most similar memories.
    pub async fn search(
        &self,
        owner: &OwnerId,
        query: &str,
        k: usize,
    ) -> SyncResult<Vec<ScoredRecord>> {
        let vector = self.embedder.embed(query).await?;
        self.coordinator.search(owner, &vector, k).await
    }

    /// See [`SyncCoordinator::persist`].
    pub async fn persist(&self, owner: &OwnerId) -> SyncResult<u64> {
        self.coordinator.persist(owner).await
    }
}
