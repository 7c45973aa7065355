//! Versioned binary envelope for blob payloads.
//!
//! Layout: `[4-byte magic "MNEM"][1-byte kind][2-byte LE format version]`
//! followed by a bincode payload. Any format change bumps
//! [`FORMAT_VERSION`]; a reader that meets an unknown version rejects the
//! blob with a clear error instead of misparsing it.

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::trace;

use crate::error::{CoreError, CoreResult};
use crate::graph::RelationshipGraph;
use crate::index::ProximityIndex;

/// Magic bytes identifying a mnemos blob.
pub const MAGIC: [u8; 4] = *b"MNEM";

/// Current envelope format version.
pub const FORMAT_VERSION: u16 = 1;

const HEADER_LEN: usize = 7;

/// What kind of structure a blob holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BlobKind {
    ProximityIndex = 1,
    RelationshipGraph = 2,
}

impl BlobKind {
    fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(BlobKind::ProximityIndex),
            2 => Some(BlobKind::RelationshipGraph),
            _ => None,
        }
    }
}

fn encode<T: Serialize>(kind: BlobKind, value: &T) -> CoreResult<Vec<u8>> {
    let payload = bincode::serialize(value)
        .map_err(|e| CoreError::SerializationError(format!("encoding {:?} blob: {}", kind, e)))?;

    let mut bytes = Vec::with_capacity(HEADER_LEN + payload.len());
    bytes.extend_from_slice(&MAGIC);
    bytes.push(kind as u8);
    bytes.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    bytes.extend_from_slice(&payload);

    trace!(kind = ?kind, len = bytes.len(), "encoded blob");
    Ok(bytes)
}

fn decode<T: DeserializeOwned>(expected_kind: BlobKind, bytes: &[u8]) -> CoreResult<T> {
    if bytes.len() < HEADER_LEN {
        return Err(CoreError::CorruptBlob {
            context: format!("blob shorter than envelope header ({} bytes)", bytes.len()),
        });
    }
    if bytes[0..4] != MAGIC {
        return Err(CoreError::CorruptBlob {
            context: "bad magic bytes, not a mnemos blob".to_string(),
        });
    }

    let kind = BlobKind::from_byte(bytes[4]).ok_or_else(|| CoreError::CorruptBlob {
        context: format!("unknown blob kind tag {}", bytes[4]),
    })?;
    if kind != expected_kind {
        return Err(CoreError::CorruptBlob {
            context: format!("expected {:?} blob, found {:?}", expected_kind, kind),
        });
    }

    let version = u16::from_le_bytes([bytes[5], bytes[6]]);
    if version != FORMAT_VERSION {
        return Err(CoreError::UnsupportedFormat {
            found: version,
            supported: FORMAT_VERSION,
        });
    }

    bincode::deserialize(&bytes[HEADER_LEN..]).map_err(|e| CoreError::CorruptBlob {
        context: format!("decoding {:?} payload: {}", expected_kind, e),
    })
}

/// Serialize a proximity index into an enveloped blob.
pub fn encode_index(index: &ProximityIndex) -> CoreResult<Vec<u8>> {
    encode(BlobKind::ProximityIndex, index)
}

/// Deserialize a proximity index blob. Lossless: the decoded index
/// answers queries identically to the original.
pub fn decode_index(bytes: &[u8]) -> CoreResult<ProximityIndex> {
    decode(BlobKind::ProximityIndex, bytes)
}

/// Serialize a relationship graph into an enveloped blob.
pub fn encode_graph(graph: &RelationshipGraph) -> CoreResult<Vec<u8>> {
    encode(BlobKind::RelationshipGraph, graph)
}

/// Deserialize a relationship graph blob.
pub fn decode_graph(bytes: &[u8]) -> CoreResult<RelationshipGraph> {
    decode(BlobKind::RelationshipGraph, bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HnswConfig;
    use crate::graph::{ExtractedEntity, ExtractedRelation, GraphExtraction};
    use crate::types::VectorMetadata;

    fn small_index() -> ProximityIndex {
        let mut index = ProximityIndex::new(HnswConfig {
            dimension: 4,
            ..HnswConfig::default()
        })
        .unwrap();
        index
            .insert(0, vec![1.0, 0.0, 0.0, 0.0], VectorMetadata::new())
            .unwrap();
        index
            .insert(1, vec![0.0, 1.0, 0.0, 0.1], VectorMetadata::new())
            .unwrap();
        index
            .insert(2, vec![0.1, 0.9, 0.0, 0.0], VectorMetadata::new())
            .unwrap();
        index
    }

    #[test]
    fn test_index_round_trip_preserves_search() {
        let index = small_index();
        let bytes = encode_index(&index).unwrap();
        let decoded = decode_index(&bytes).unwrap();

        let query = vec![0.05, 0.95, 0.0, 0.05];
        assert_eq!(
            index.search(&query, 3, 50).unwrap(),
            decoded.search(&query, 3, 50).unwrap()
        );
        assert_eq!(index.len(), decoded.len());
        assert_eq!(index.next_id(), decoded.next_id());
    }

    #[test]
    fn test_graph_round_trip_is_exact() {
        let mut graph = RelationshipGraph::new();
        graph
            .merge(&GraphExtraction {
                entities: vec![
                    ExtractedEntity {
                        label: "Rust".to_string(),
                        kind: Default::default(),
                        properties: VectorMetadata::new(),
                    },
                    ExtractedEntity {
                        label: "Mozilla".to_string(),
                        kind: Default::default(),
                        properties: VectorMetadata::new(),
                    },
                ],
                relations: vec![ExtractedRelation {
                    source: "Mozilla".to_string(),
                    target: "Rust".to_string(),
                    label: "created".to_string(),
                    confidence: 0.8,
                }],
            })
            .unwrap();

        let bytes = encode_graph(&graph).unwrap();
        let decoded = decode_graph(&bytes).unwrap();
        assert_eq!(graph, decoded);
    }

    #[test]
    fn test_truncated_blob_is_corrupt() {
        let bytes = encode_index(&small_index()).unwrap();
        assert!(matches!(
            decode_index(&bytes[..5]),
            Err(CoreError::CorruptBlob { .. })
        ));
    }

    #[test]
    fn test_bad_magic_is_corrupt() {
        let mut bytes = encode_index(&small_index()).unwrap();
        bytes[0] = b'X';
        assert!(matches!(
            decode_index(&bytes),
            Err(CoreError::CorruptBlob { .. })
        ));
    }

    #[test]
    fn test_kind_mismatch_is_corrupt() {
        let bytes = encode_graph(&RelationshipGraph::new()).unwrap();
        assert!(matches!(
            decode_index(&bytes),
            Err(CoreError::CorruptBlob { .. })
        ));
    }

    #[test]
    fn test_future_version_rejected_clearly() {
        let mut bytes = encode_index(&small_index()).unwrap();
        bytes[5] = 0xFF;
        bytes[6] = 0x00;
        assert!(matches!(
            decode_index(&bytes),
            Err(CoreError::UnsupportedFormat {
                found: 0x00FF,
                supported: FORMAT_VERSION
            })
        ));
    }

    #[test]
    fn test_garbled_payload_is_corrupt() {
        let mut bytes = encode_index(&small_index()).unwrap();
        let len = bytes.len();
        bytes.truncate(len / 2);
        assert!(matches!(
            decode_index(&bytes),
            Err(CoreError::CorruptBlob { .. })
        ));
    }
}
