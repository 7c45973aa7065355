//! Error types for mnemos-core.
//!
//! This module defines the central error type [`CoreError`] used throughout
//! the core crate, along with the [`CoreResult<T>`] type alias.

use thiserror::Error;

/// Top-level error type for core data-structure operations.
///
/// Structural errors ([`CoreError::DimensionMismatch`],
/// [`CoreError::ValidationError`]) are fatal to the operation that raised
/// them and are never retried. Format errors ([`CoreError::CorruptBlob`],
/// [`CoreError::UnsupportedFormat`]) signal that a serialized payload cannot
/// be trusted; callers treat the underlying structure as absent and
/// rebuildable rather than crashing.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A vector's dimension does not match the index's configured dimension.
    ///
    /// # When This Occurs
    ///
    /// - Inserting a vector produced by a different embedding model
    /// - Querying with a truncated or padded vector
    /// - Wiring an embedder whose dimension disagrees with the index config
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Dimension the index was configured with
        expected: usize,
        /// Dimension of the offending vector
        actual: usize,
    },

    /// Cosine similarity is undefined for a zero-magnitude vector.
    ///
    /// At insert time this is fatal: a zero vector can never match anything
    /// and would poison neighbor selection. At query time callers treat it
    /// as "no match" and return an empty result instead of propagating.
    #[error("cosine similarity is undefined for a zero-magnitude vector")]
    UndefinedSimilarity,

    /// A vector id was inserted twice into the same index.
    ///
    /// Records are immutable once inserted; an update is logically a
    /// delete + insert under a fresh id.
    #[error("vector id {id} already present in index")]
    DuplicateVectorId {
        /// The id that was already present
        id: u64,
    },

    /// A field value failed validation constraints.
    ///
    /// # When This Occurs
    ///
    /// - Relation confidence outside [0.0, 1.0]
    /// - An edge referencing a node absent from the graph
    /// - An empty or whitespace-only entity label
    #[error("validation error: {field} - {message}")]
    ValidationError {
        /// Name of the field that failed validation
        field: String,
        /// Description of the validation failure
        message: String,
    },

    /// A serialized blob carries a format version this build cannot read.
    ///
    /// The codec never guesses: an unknown tag is rejected outright so a
    /// newer format is never silently misparsed as an older one.
    #[error("unsupported blob format version {found} (this build reads up to {supported})")]
    UnsupportedFormat {
        /// Version tag found in the envelope
        found: u16,
        /// Highest version this build understands
        supported: u16,
    },

    /// A serialized blob failed structural checks during decode.
    ///
    /// # When This Occurs
    ///
    /// - Truncated payload (shorter than the envelope header)
    /// - Wrong magic bytes (not a mnemos blob at all)
    /// - Payload kind mismatch (graph blob decoded as an index)
    /// - bincode decode failure inside the payload
    #[error("corrupt blob: {context}")]
    CorruptBlob {
        /// What the codec was doing when the check failed
        context: String,
    },

    /// Error during serialization.
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// Configuration is invalid or missing.
    #[error("configuration error: {0}")]
    ConfigError(String),
}

impl From<config::ConfigError> for CoreError {
    fn from(err: config::ConfigError) -> Self {
        CoreError::ConfigError(err.to_string())
    }
}

/// Result type alias for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dimension_mismatch_display() {
        let err = CoreError::DimensionMismatch {
            expected: 384,
            actual: 768,
        };
        assert!(err.to_string().contains("384"));
        assert!(err.to_string().contains("768"));
    }

    #[test]
    fn test_unsupported_format_display() {
        let err = CoreError::UnsupportedFormat {
            found: 9,
            supported: 1,
        };
        assert!(err.to_string().contains("version 9"));
    }
}
