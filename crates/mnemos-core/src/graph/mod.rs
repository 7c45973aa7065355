//! Typed entity-relationship graph companion to the proximity index.
//!
//! Nodes are keyed by a normalized label (lowercase, whitespace-collapsed);
//! edges are `(source, target, label)` triples with a confidence score.
//! Merging an extraction is idempotent: re-applying the same extraction
//! never duplicates edges or inflates confidence.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{CoreError, CoreResult};
use crate::types::{MetadataValue, VectorMetadata};

/// Category tag for an extracted entity, for grouping and display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Person,
    Organization,
    Place,
    Event,
    Concept,
    Artifact,
    #[default]
    Unknown,
}

/// A node in the relationship graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    /// Surface form as last extracted.
    pub label: String,
    /// Category tag.
    pub kind: EntityKind,
    /// Free-form properties, last-write-wins per key on merge.
    pub properties: VectorMetadata,
}

/// A directed, labeled edge between two nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphEdge {
    /// Normalized label of the source node.
    pub source: String,
    /// Normalized label of the target node.
    pub target: String,
    /// Relation label.
    pub label: String,
    /// Extraction confidence in [0, 1]; duplicates collapse to the max.
    pub confidence: f32,
}

/// One entity in an extraction payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedEntity {
    pub label: String,
    #[serde(default)]
    pub kind: EntityKind,
    #[serde(default)]
    pub properties: VectorMetadata,
}

/// One relation in an extraction payload. `source` and `target` name
/// entities by label (normalized before lookup).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedRelation {
    pub source: String,
    pub target: String,
    pub label: String,
    pub confidence: f32,
}

/// Output of an entity-extraction pass over one text unit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphExtraction {
    pub entities: Vec<ExtractedEntity>,
    pub relations: Vec<ExtractedRelation>,
}

/// Counters describing what a merge changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    pub nodes_added: usize,
    pub nodes_updated: usize,
    pub edges_added: usize,
    pub edges_updated: usize,
}

/// Key identifying an edge: (source, target, label), all normalized.
type EdgeKey = (String, String, String);

/// Normalize an entity label: lowercase, whitespace collapsed to single
/// spaces, trimmed.
pub fn normalize_label(label: &str) -> String {
    label
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// The per-owner entity-relationship graph.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RelationshipGraph {
    /// Nodes keyed by normalized label. BTreeMap keeps serialization and
    /// iteration deterministic.
    nodes: BTreeMap<String, GraphNode>,
    /// Edges keyed by (source, target, label).
    edges: BTreeMap<EdgeKey, GraphEdge>,
}

impl RelationshipGraph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of nodes.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of edges.
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Look up a node by (unnormalized) label.
    pub fn node(&self, label: &str) -> Option<&GraphNode> {
        self.nodes.get(&normalize_label(label))
    }

    /// Look up an edge by source, target and relation label.
    pub fn edge(&self, source: &str, target: &str, label: &str) -> Option<&GraphEdge> {
        self.edges.get(&(
            normalize_label(source),
            normalize_label(target),
            normalize_label(label),
        ))
    }

    /// Iterate over all nodes in normalized-label order.
    pub fn nodes(&self) -> impl Iterator<Item = &GraphNode> {
        self.nodes.values()
    }

    /// Iterate over all edges in key order.
    pub fn edges(&self) -> impl Iterator<Item = &GraphEdge> {
        self.edges.values()
    }

    /// Merge an extraction into the graph.
    ///
    /// Nodes union by normalized label with last-write-wins properties;
    /// a node's kind is only overwritten by a known (non-`Unknown`) kind.
    /// Duplicate edge triples collapse to the highest confidence. Edges
    /// must reference entities present in this extraction or already in
    /// the graph, and confidence must sit in [0, 1]; violations fail the
    /// whole merge with [`CoreError::ValidationError`] before anything is
    /// applied.
    pub fn merge(&mut self, extraction: &GraphExtraction) -> CoreResult<MergeOutcome> {
        // Validate up front so a failed merge leaves the graph untouched.
        for entity in &extraction.entities {
            if normalize_label(&entity.label).is_empty() {
                return Err(CoreError::ValidationError {
                    field: "entity.label".to_string(),
                    message: "entity label must not be empty".to_string(),
                });
            }
        }
        for relation in &extraction.relations {
            if !(0.0..=1.0).contains(&relation.confidence) {
                return Err(CoreError::ValidationError {
                    field: "relation.confidence".to_string(),
                    message: format!(
                        "confidence must be in [0, 1], got {}",
                        relation.confidence
                    ),
                });
            }
            for (field, endpoint) in [
                ("relation.source", &relation.source),
                ("relation.target", &relation.target),
            ] {
                let key = normalize_label(endpoint);
                let known = self.nodes.contains_key(&key)
                    || extraction
                        .entities
                        .iter()
                        .any(|e| normalize_label(&e.label) == key);
                if !known {
                    return Err(CoreError::ValidationError {
                        field: field.to_string(),
                        message: format!("edge references unknown node '{}'", endpoint),
                    });
                }
            }
        }

        let mut outcome = MergeOutcome::default();

        for entity in &extraction.entities {
            let key = normalize_label(&entity.label);
            match self.nodes.get_mut(&key) {
                Some(node) => {
                    let before = node.clone();
                    node.label = entity.label.clone();
                    if entity.kind != EntityKind::Unknown {
                        node.kind = entity.kind;
                    }
                    for (k, v) in &entity.properties {
                        node.properties.insert(k.clone(), v.clone());
                    }
                    if *node != before {
                        outcome.nodes_updated += 1;
                    }
                }
                None => {
                    self.nodes.insert(
                        key,
                        GraphNode {
                            label: entity.label.clone(),
                            kind: entity.kind,
                            properties: entity.properties.clone(),
                        },
                    );
                    outcome.nodes_added += 1;
                }
            }
        }

        for relation in &extraction.relations {
            let key = (
                normalize_label(&relation.source),
                normalize_label(&relation.target),
                normalize_label(&relation.label),
            );
            match self.edges.get_mut(&key) {
                Some(edge) => {
                    if relation.confidence > edge.confidence {
                        edge.confidence = relation.confidence;
                        outcome.edges_updated += 1;
                    }
                }
                None => {
                    self.edges.insert(
                        key.clone(),
                        GraphEdge {
                            source: key.0,
                            target: key.1,
                            label: key.2,
                            confidence: relation.confidence,
                        },
                    );
                    outcome.edges_added += 1;
                }
            }
        }

        debug!(
            nodes_added = outcome.nodes_added,
            edges_added = outcome.edges_added,
            "merged extraction into relationship graph"
        );

        Ok(outcome)
    }
}

/// Convenience for building property maps in extractions.
pub fn text_property(value: impl Into<String>) -> MetadataValue {
    MetadataValue::Text(value.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_extraction() -> GraphExtraction {
        GraphExtraction {
            entities: vec![
                ExtractedEntity {
                    label: "Ada  Lovelace".to_string(),
                    kind: EntityKind::Person,
                    properties: VectorMetadata::new(),
                },
                ExtractedEntity {
                    label: "Analytical Engine".to_string(),
                    kind: EntityKind::Artifact,
                    properties: VectorMetadata::new(),
                },
            ],
            relations: vec![ExtractedRelation {
                source: "ada lovelace".to_string(),
                target: "analytical engine".to_string(),
                label: "worked on".to_string(),
                confidence: 0.9,
            }],
        }
    }

    #[test]
    fn test_normalize_label() {
        assert_eq!(normalize_label("  Ada   Lovelace "), "ada lovelace");
        assert_eq!(normalize_label("RUST"), "rust");
    }

    #[test]
    fn test_merge_adds_nodes_and_edges() {
        let mut graph = RelationshipGraph::new();
        let outcome = graph.merge(&sample_extraction()).unwrap();

        assert_eq!(outcome.nodes_added, 2);
        assert_eq!(outcome.edges_added, 1);
        assert_eq!(graph.node_count(), 2);
        assert_eq!(graph.edge_count(), 1);
        assert!(graph.node("ada   lovelace").is_some());
        let edge = graph
            .edge("Ada Lovelace", "Analytical Engine", "Worked On")
            .unwrap();
        assert!((edge.confidence - 0.9).abs() < f32::EPSILON);
    }

    #[test]
    fn test_merge_is_idempotent() {
        let mut once = RelationshipGraph::new();
        once.merge(&sample_extraction()).unwrap();

        let mut twice = RelationshipGraph::new();
        twice.merge(&sample_extraction()).unwrap();
        let second = twice.merge(&sample_extraction()).unwrap();

        assert_eq!(second.nodes_added, 0);
        assert_eq!(second.edges_added, 0);
        assert_eq!(second.edges_updated, 0);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_duplicate_edge_keeps_max_confidence() {
        let mut graph = RelationshipGraph::new();
        let mut extraction = sample_extraction();
        graph.merge(&extraction).unwrap();

        extraction.relations[0].confidence = 0.4;
        graph.merge(&extraction).unwrap();
        assert!(
            (graph
                .edge("ada lovelace", "analytical engine", "worked on")
                .unwrap()
                .confidence
                - 0.9)
                .abs()
                < f32::EPSILON
        );

        extraction.relations[0].confidence = 0.95;
        let outcome = graph.merge(&extraction).unwrap();
        assert_eq!(outcome.edges_updated, 1);
        assert!(
            (graph
                .edge("ada lovelace", "analytical engine", "worked on")
                .unwrap()
                .confidence
                - 0.95)
                .abs()
                < f32::EPSILON
        );
    }

    #[test]
    fn test_edge_to_unknown_node_rejected() {
        let mut graph = RelationshipGraph::new();
        let extraction = GraphExtraction {
            entities: vec![],
            relations: vec![ExtractedRelation {
                source: "nobody".to_string(),
                target: "nothing".to_string(),
                label: "knows".to_string(),
                confidence: 0.5,
            }],
        };
        let result = graph.merge(&extraction);
        assert!(matches!(result, Err(CoreError::ValidationError { .. })));
        assert_eq!(graph.node_count(), 0);
        assert_eq!(graph.edge_count(), 0);
    }

    #[test]
    fn test_confidence_out_of_range_rejected() {
        let mut graph = RelationshipGraph::new();
        let mut extraction = sample_extraction();
        extraction.relations[0].confidence = 1.5;
        assert!(matches!(
            graph.merge(&extraction),
            Err(CoreError::ValidationError { .. })
        ));
        // Failed merge leaves the graph untouched.
        assert_eq!(graph.node_count(), 0);
    }

    #[test]
    fn test_properties_last_write_wins() {
        let mut graph = RelationshipGraph::new();
        let mut extraction = sample_extraction();
        extraction.entities[0]
            .properties
            .insert("role".to_string(), text_property("mathematician"));
        graph.merge(&extraction).unwrap();

        extraction.entities[0]
            .properties
            .insert("role".to_string(), text_property("programmer"));
        graph.merge(&extraction).unwrap();

        let node = graph.node("ada lovelace").unwrap();
        assert_eq!(
            node.properties.get("role"),
            Some(&text_property("programmer"))
        );
    }

    #[test]
    fn test_edge_can_reference_preexisting_node() {
        let mut graph = RelationshipGraph::new();
        graph.merge(&sample_extraction()).unwrap();

        // New extraction references "ada lovelace" without re-declaring it.
        let extraction = GraphExtraction {
            entities: vec![ExtractedEntity {
                label: "London".to_string(),
                kind: EntityKind::Place,
                properties: VectorMetadata::new(),
            }],
            relations: vec![ExtractedRelation {
                source: "Ada Lovelace".to_string(),
                target: "London".to_string(),
                label: "lived in".to_string(),
                confidence: 0.7,
            }],
        };
        graph.merge(&extraction).unwrap();
        assert!(graph.edge("ada lovelace", "london", "lived in").is_some());
    }
}
