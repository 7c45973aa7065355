//! Ledger transaction batching.
//!
//! Coalesces ledger-mutating operations into fewer physical submissions
//! while preserving per-operation result delivery. Queueing is
//! non-blocking; a debounce timer (or the queue hitting its size cap)
//! triggers a background flush, and at most one submission is in flight
//! at a time. Transient submission failures retry the whole batch with
//! exponential backoff; validation failures (stale versions) are reported
//! per item and never retried wholesale.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use mnemos_core::types::{OwnerId, RecordId};

use crate::error::{SyncError, SyncResult};
use crate::traits::{LedgerOp, LedgerStore, OpOutcome};

// ============================================================================
// CONFIG
// ============================================================================

/// Configuration for the transaction batcher.
#[derive(Debug, Clone)]
pub struct BatcherConfig {
    /// How long to wait after the first enqueue before flushing.
    pub debounce: Duration,

    /// Queue size that triggers an immediate flush instead of waiting.
    pub max_batch_size: usize,

    /// Attempts per batch for transient failures.
    pub max_attempts: u32,

    /// Backoff before the first retry; doubles per attempt.
    pub initial_backoff: Duration,
}

impl Default for BatcherConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_secs(2),
            max_batch_size: 10,
            max_attempts: 3,
            initial_backoff: Duration::from_millis(200),
        }
    }
}

impl BatcherConfig {
    /// Load config overrides from environment variables.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(val) = std::env::var("MNEMOS_BATCH_DEBOUNCE_MS") {
            if let Ok(ms) = val.parse::<u64>() {
                self.debounce = Duration::from_millis(ms);
            }
        }
        if let Ok(val) = std::env::var("MNEMOS_BATCH_MAX_SIZE") {
            if let Ok(size) = val.parse::<usize>() {
                self.max_batch_size = size.max(1);
            }
        }
        if let Ok(val) = std::env::var("MNEMOS_BATCH_MAX_ATTEMPTS") {
            if let Ok(attempts) = val.parse::<u32>() {
                self.max_attempts = attempts.max(1);
            }
        }
        self
    }
}

// ============================================================================
// TRANSACTIONS AND RESULTS
// ============================================================================

/// A queued ledger-mutating operation.
#[derive(Debug, Clone)]
pub struct BatchedTransaction {
    /// Unique id, used for cancellation and result correlation.
    pub id: Uuid,
    /// Owner on whose behalf the operation runs.
    pub owner: OwnerId,
    /// The ledger operation to perform.
    pub op: LedgerOp,
    /// Higher flushes sooner within a batch.
    pub priority: i32,
    /// When the transaction entered the queue.
    pub enqueued_at: DateTime<Utc>,
}

impl BatchedTransaction {
    /// Build a transaction with a fresh id, enqueued now.
    pub fn new(owner: OwnerId, op: LedgerOp, priority: i32) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner,
            op,
            priority,
            enqueued_at: Utc::now(),
        }
    }
}

/// Outcome delivered to the enqueuer of one transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionResult {
    /// A create op committed.
    Created { record_id: RecordId },
    /// An update op committed; the record now sits at `new_version`.
    Updated { new_version: u64 },
    /// The update's expected version was stale. The caller must
    /// re-resolve; the batcher does not retry conflicts.
    Conflict { expected: u64, actual: u64 },
    /// Removed from the queue before the flush boundary.
    Cancelled,
    /// The batch failed after exhausting retries, or non-transiently.
    Failed { message: String },
}

/// Running counters, exposed read-only through [`TransactionBatcher::stats`].
#[derive(Debug, Clone, Default)]
pub struct BatcherStats {
    /// Transactions ever enqueued.
    pub submitted: u64,
    /// Transactions that committed (created or updated).
    pub succeeded: u64,
    /// Transactions that ended in conflict or failure.
    pub failed: u64,
    /// Transactions cancelled before submission.
    pub cancelled: u64,
    /// Batches flushed to the ledger.
    pub batches_flushed: u64,
    /// Mean resource cost per flushed batch.
    pub average_cost: f64,
    /// When a batch last committed.
    pub last_success_at: Option<DateTime<Utc>>,
}

struct Pending {
    tx: BatchedTransaction,
    reply: oneshot::Sender<TransactionResult>,
}

// ============================================================================
// BATCHER
// ============================================================================

struct BatcherInner {
    ledger: Arc<dyn LedgerStore>,
    config: BatcherConfig,
    queue: Mutex<Vec<Pending>>,
    /// True while a debounce timer is pending; absorbs duplicate timers.
    flush_scheduled: AtomicBool,
    /// Held for the duration of one submission: at most one in flight.
    flight: tokio::sync::Mutex<()>,
    stats: RwLock<BatcherStats>,
}

/// Coalesces ledger writes into scheduled batches.
///
/// Cheap to clone; clones share the queue. Must be used inside a tokio
/// runtime (flushes run on spawned tasks).
#[derive(Clone)]
pub struct TransactionBatcher {
    inner: Arc<BatcherInner>,
}

impl TransactionBatcher {
    /// Create a batcher over the given ledger.
    pub fn new(ledger: Arc<dyn LedgerStore>, config: BatcherConfig) -> Self {
        info!(
            debounce_ms = config.debounce.as_millis() as u64,
            max_batch_size = config.max_batch_size,
            max_attempts = config.max_attempts,
            "transaction batcher created"
        );
        Self {
            inner: Arc::new(BatcherInner {
                ledger,
                config,
                queue: Mutex::new(Vec::new()),
                flush_scheduled: AtomicBool::new(false),
                flight: tokio::sync::Mutex::new(()),
                stats: RwLock::new(BatcherStats::default()),
            }),
        }
    }

    /// Enqueue a transaction.
    ///
    /// Non-blocking. The returned receiver yields exactly one
    /// [`TransactionResult`] once the transaction's batch settles (or the
    /// transaction is cancelled). Reaching `max_batch_size` flushes
    /// immediately; otherwise a flush fires after the debounce delay.
    pub fn enqueue(&self, tx: BatchedTransaction) -> oneshot::Receiver<TransactionResult> {
        let (reply, rx) = oneshot::channel();
        let queue_len = {
            let mut queue = self.inner.queue.lock();
            queue.push(Pending { tx, reply });
            queue.len()
        };
        self.inner.stats.write().submitted += 1;

        if queue_len >= self.inner.config.max_batch_size {
            debug!(queue_len, "batch size cap reached, flushing immediately");
            let inner = Arc::clone(&self.inner);
            tokio::spawn(async move { BatcherInner::flush(&inner).await });
        } else if !self.inner.flush_scheduled.swap(true, Ordering::SeqCst) {
            let inner = Arc::clone(&self.inner);
            tokio::spawn(async move {
                tokio::time::sleep(inner.config.debounce).await;
                BatcherInner::flush(&inner).await;
            });
        }

        rx
    }

    /// Remove a not-yet-flushed transaction from the queue.
    ///
    /// Returns true if the transaction was still queued; its receiver gets
    /// [`TransactionResult::Cancelled`]. After the flush boundary the
    /// transaction is irrevocable and this returns false.
    pub fn cancel(&self, transaction_id: Uuid) -> bool {
        let removed = {
            let mut queue = self.inner.queue.lock();
            queue
                .iter()
                .position(|p| p.tx.id == transaction_id)
                .map(|pos| queue.remove(pos))
        };
        match removed {
            Some(pending) => {
                debug!(transaction_id = %transaction_id, "cancelled queued transaction");
                let _ = pending.reply.send(TransactionResult::Cancelled);
                self.inner.stats.write().cancelled += 1;
                true
            }
            None => false,
        }
    }

    /// Flush the current queue now and wait for the submission to settle.
    pub async fn flush(&self) {
        BatcherInner::flush(&self.inner).await;
    }

    /// Number of queued, not-yet-flushed transactions.
    pub fn pending_len(&self) -> usize {
        self.inner.queue.lock().len()
    }

    /// Snapshot of the running counters.
    pub fn stats(&self) -> BatcherStats {
        self.inner.stats.read().clone()
    }
}

impl BatcherInner {
    /// Take the queue contents and submit them as one batch.
    ///
    /// New enqueues during the flush start a fresh batch; the flight lock
    /// keeps a concurrently requested flush from re-submitting the same
    /// items.
    async fn flush(inner: &Arc<Self>) {
        let _guard = inner.flight.lock().await;
        inner.flush_scheduled.store(false, Ordering::SeqCst);

        let mut batch: Vec<Pending> = {
            let mut queue = inner.queue.lock();
            queue.drain(..).collect()
        };
        if batch.is_empty() {
            return;
        }

        // Priority descending, enqueue time ascending.
        batch.sort_by(|a, b| {
            b.tx.priority
                .cmp(&a.tx.priority)
                .then_with(|| a.tx.enqueued_at.cmp(&b.tx.enqueued_at))
        });
        let ops: Vec<LedgerOp> = batch.iter().map(|p| p.tx.op.clone()).collect();

        debug!(batch_size = ops.len(), "submitting batch to ledger");

        let submission = Self::submit_with_retry(inner, &ops).await;

        match submission {
            Ok(outcome) => {
                let mut succeeded = 0u64;
                let mut conflicted = 0u64;

                let mut results = outcome.results.into_iter();
                for pending in batch {
                    let result = match results.next() {
                        Some(OpOutcome::Created { record_id }) => {
                            succeeded += 1;
                            TransactionResult::Created { record_id }
                        }
                        Some(OpOutcome::Updated { new_version }) => {
                            succeeded += 1;
                            TransactionResult::Updated { new_version }
                        }
                        Some(OpOutcome::StaleVersion { expected, actual }) => {
                            conflicted += 1;
                            warn!(
                                transaction_id = %pending.tx.id,
                                expected,
                                actual,
                                "stale version inside batch, reporting per-item conflict"
                            );
                            TransactionResult::Conflict { expected, actual }
                        }
                        None => TransactionResult::Failed {
                            message: "ledger returned fewer results than operations submitted"
                                .to_string(),
                        },
                    };
                    let _ = pending.reply.send(result);
                }

                let mut stats = inner.stats.write();
                stats.succeeded += succeeded;
                stats.failed += conflicted;
                stats.batches_flushed += 1;
                let n = stats.batches_flushed as f64;
                stats.average_cost = (stats.average_cost * (n - 1.0) + outcome.cost) / n;
                if succeeded > 0 {
                    stats.last_success_at = Some(Utc::now());
                }

                info!(
                    committed = succeeded,
                    conflicts = conflicted,
                    cost = outcome.cost,
                    "batch flush complete"
                );
            }
            Err(e) => {
                error!(error = %e, batch_size = batch.len(), "batch submission failed");
                let failed = batch.len() as u64;
                for pending in batch {
                    let _ = pending.reply.send(TransactionResult::Failed {
                        message: e.to_string(),
                    });
                }
                let mut stats = inner.stats.write();
                stats.failed += failed;
                stats.batches_flushed += 1;
            }
        }
    }

    /// Submit with bounded exponential backoff on transient failures.
    ///
    /// Only [`SyncError::Unavailable`] is retried; everything else fails
    /// the batch on the first attempt.
    async fn submit_with_retry(
        inner: &Arc<Self>,
        ops: &[LedgerOp],
    ) -> SyncResult<crate::traits::BatchOutcome> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match inner.ledger.submit_batch(ops).await {
                Ok(outcome) => return Ok(outcome),
                Err(e @ SyncError::Unavailable { .. }) => {
                    if attempt >= inner.config.max_attempts {
                        return Err(SyncError::Unavailable {
                            context: "ledger batch submission".to_string(),
                            attempts: attempt,
                        });
                    }
                    let backoff = inner.config.initial_backoff * 2u32.pow(attempt - 1);
                    warn!(
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "transient ledger failure, backing off"
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
