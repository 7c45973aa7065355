//! Approximate nearest-neighbor index.
//!
//! One [`ProximityIndex`] per owner; insert and k-nearest-neighbor search
//! over cosine similarity, backed by a multi-layer HNSW proximity graph.

mod hnsw;

pub use hnsw::{ProximityIndex, SearchHit};
