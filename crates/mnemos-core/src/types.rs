//! Shared domain types for the mnemos engine.
//!
//! Identity newtypes keep the three external namespaces apart: an
//! [`OwnerId`] names a user, a [`BlobId`] names content in the blob store,
//! a [`RecordId`] names the ledger record that points at the current blobs.
//! The compatibility shim in the coordinator is the only place allowed to
//! treat an owner address as a record id.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identity of an index owner (a wallet address in the original system).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OwnerId(pub String);

impl OwnerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Content address of a payload in the blob store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlobId(pub String);

impl BlobId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BlobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of a versioned index record on the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordId(pub String);

impl RecordId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The ledger-anchored pointer record for one owner's index.
///
/// Owned by the ledger; the engine never mutates it directly, it only
/// proposes conditional updates carrying the version it expects to replace.
/// `version` strictly increases by exactly 1 per accepted update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionedIndexRecord {
    /// Ledger identity of this record.
    pub id: RecordId,
    /// Owner the record belongs to.
    pub owner: OwnerId,
    /// Monotonic version, starting at 0 on creation.
    pub version: u64,
    /// Blob holding the serialized proximity index.
    pub index_blob: BlobId,
    /// Blob holding the serialized relationship graph.
    pub graph_blob: BlobId,
    /// When the record was last accepted for update.
    pub last_updated: DateTime<Utc>,
}

/// A single metadata value attached to a vector record.
///
/// A closed set of variants rather than an open dynamic bag, so invariants
/// on stored metadata hold at compile time.
// Externally tagged (serde's default): adjacent tagging (`tag`/`content`)
// cannot be deserialized by bincode, which the blob codec relies on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetadataValue {
    Text(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
}

/// Opaque key-value metadata carried by a vector record.
pub type VectorMetadata = BTreeMap<String, MetadataValue>;

/// One embedded text unit stored in the proximity index.
///
/// Immutable once inserted: an update is logically a delete + insert under
/// a fresh id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorRecord {
    /// Id unique within one owner's index.
    pub id: u64,
    /// The embedding, `dimension` floats.
    pub vector: Vec<f32>,
    /// Caller-supplied metadata.
    pub metadata: VectorMetadata,
    /// When the record entered the index.
    pub inserted_at: DateTime<Utc>,
}

impl VectorRecord {
    pub fn new(id: u64, vector: Vec<f32>, metadata: VectorMetadata) -> Self {
        Self {
            id,
            vector,
            metadata,
            inserted_at: Utc::now(),
        }
    }
}

/// Proof of access presented to the cipher capability when decrypting.
///
/// Opaque to the engine; produced by the wallet layer outside this core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessProof(pub Vec<u8>);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_namespaces_are_distinct_types() {
        let owner = OwnerId::new("0xabc");
        let record = RecordId::new("0xabc");
        // Same text, different namespaces; only Display output matches.
        assert_eq!(owner.to_string(), record.to_string());
    }

    #[test]
    fn test_metadata_value_serde_tagging() {
        let value = MetadataValue::Integer(7);
        let json = serde_json::to_string(&value).unwrap();
        assert!(json.contains("integer"));
        let back: MetadataValue = serde_json::from_str(&json).unwrap();
        assert_eq!(back, value);
    }
}
