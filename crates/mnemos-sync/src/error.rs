//! Error types for mnemos-sync.
//!
//! Taxonomy follows the engine's propagation policy: structural errors
//! ([`SyncError::OwnershipMismatch`], core validation errors) propagate
//! immediately; [`SyncError::Unavailable`] is retried locally with bounded
//! backoff before surfacing; [`SyncError::Conflict`] is never auto-retried,
//! the caller must re-resolve and re-apply. "No record yet" is not an
//! error at all, it is an `Option::None` on the resolve path.

use thiserror::Error;
use uuid::Uuid;

use mnemos_core::error::CoreError;
use mnemos_core::types::{BlobId, OwnerId, RecordId};

/// Top-level error type for synchronization operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// A core data-structure or codec error.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// A record's owner field does not match the caller.
    ///
    /// Fatal, reported to the caller, never auto-corrected.
    #[error("ownership mismatch: caller {caller} does not own record held by {record_owner}")]
    OwnershipMismatch {
        /// Identity the caller presented
        caller: OwnerId,
        /// Owner recorded on the ledger
        record_owner: OwnerId,
    },

    /// An optimistic update carried a stale expected version.
    ///
    /// The ledger rejected the proposal; the caller must re-resolve and
    /// re-apply. The engine never force-overwrites.
    #[error("version conflict on record {record_id}: proposed expected version {expected_version} was stale")]
    Conflict {
        /// Record the update targeted
        record_id: RecordId,
        /// Version the proposal expected to replace
        expected_version: u64,
    },

    /// A transient I/O failure that exhausted its retry budget.
    #[error("{context} unavailable after {attempts} attempts")]
    Unavailable {
        /// What was being attempted
        context: String,
        /// How many attempts were made before giving up
        attempts: u32,
    },

    /// A blob id resolved to nothing in the blob store. Not retryable.
    #[error("blob not found: {blob_id}")]
    BlobNotFound {
        /// The missing blob
        blob_id: BlobId,
    },

    /// A record id resolved to nothing on the ledger.
    #[error("ledger record not found: {record_id}")]
    RecordNotFound {
        /// The missing record
        record_id: RecordId,
    },

    /// An operation needs a resolved session but the owner has none.
    #[error("owner {owner} has no resolved index; call register/resolve first")]
    NotRegistered {
        /// The owner without a session
        owner: OwnerId,
    },

    /// A queued transaction was cancelled before the flush boundary.
    #[error("transaction {transaction_id} was cancelled before submission")]
    Cancelled {
        /// Id of the cancelled transaction
        transaction_id: Uuid,
    },

    /// The embedding provider failed.
    #[error("embedding error: {0}")]
    Embedding(String),

    /// An unexpected internal error, typically a bug.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type alias for synchronization operations.
pub type SyncResult<T> = Result<T, SyncError>;
