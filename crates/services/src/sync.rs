use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use tracing::{debug, warn};

use quiz_core::Clock;
use storage::local_cache::{LocalDurableCache, PendingAnswer};
use storage::repository::{AnswerSubmission, SessionStore};

use crate::error::SyncError;
use crate::network::ConnectivityHandle;
use crate::retry::RetryPolicy;

//
// ─── OUTCOMES ──────────────────────────────────────────────────────────────────
//

/// Where a submission ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Acknowledged by the remote store.
    Delivered,
    /// Held in the local pending queue for reconciliation.
    QueuedLocally,
}

/// Result of draining the pending queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileReport {
    pub delivered: usize,
    pub remaining: usize,
}

//
// ─── PIPELINE ──────────────────────────────────────────────────────────────────
//

/// Delivers answer submissions to the remote store despite transient
/// failures.
///
/// Delivery retries with exponential backoff while connectivity holds;
/// exhausted or offline submissions land in the local pending queue, which
/// [`reconcile`](Self::reconcile) drains in original submission order once
/// connectivity returns. Entries leave the queue only after remote
/// acknowledgment, giving at-least-once delivery; remote writes are
/// idempotent overwrites keyed by `(session_id, question_index)`, so
/// replays are harmless. No record is ever silently discarded.
pub struct AnswerSyncPipeline {
    sessions: Arc<dyn SessionStore>,
    cache: Arc<dyn LocalDurableCache>,
    connectivity: ConnectivityHandle,
    policy: RetryPolicy,
    clock: Clock,
    delivered: AtomicU64,
    sync_errors: AtomicU32,
    last_delivery_at: Mutex<Option<DateTime<Utc>>>,
}

impl AnswerSyncPipeline {
    #[must_use]
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        cache: Arc<dyn LocalDurableCache>,
        connectivity: ConnectivityHandle,
        clock: Clock,
    ) -> Self {
        Self {
            sessions,
            cache,
            connectivity,
            policy: RetryPolicy::default(),
            clock,
            delivered: AtomicU64::new(0),
            sync_errors: AtomicU32::new(0),
            last_delivery_at: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Submissions acknowledged by the remote store so far.
    #[must_use]
    pub fn delivered_count(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    /// Consecutive submissions that had to fall back to the local queue.
    ///
    /// Resets on the next successful delivery; a presentation layer can
    /// threshold this for a non-blocking "saving locally" notice.
    #[must_use]
    pub fn sync_error_count(&self) -> u32 {
        self.sync_errors.load(Ordering::Relaxed)
    }

    /// Time of the most recent remote acknowledgment.
    #[must_use]
    pub fn last_delivery_at(&self) -> Option<DateTime<Utc>> {
        self.last_delivery_at.lock().ok().and_then(|g| *g)
    }

    /// Number of answers waiting for reconciliation.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::CacheUnavailable` if the queue cannot be read.
    pub async fn pending_len(&self) -> Result<usize, SyncError> {
        let pending = self
            .cache
            .pending_answers()
            .await
            .map_err(SyncError::CacheUnavailable)?;
        Ok(pending.len())
    }

    /// Attempt remote delivery, falling back to the local pending queue.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::CacheUnavailable` only when delivery failed AND
    /// the local queue could not take the record. Callers treat submission
    /// as fire-and-forget; this error feeds the pipeline's own state.
    pub async fn submit(
        &self,
        submission: AnswerSubmission,
    ) -> Result<SubmitOutcome, SyncError> {
        if !self.connectivity.is_online() {
            debug!(
                session = %submission.session_id,
                index = submission.question_index,
                "offline, queueing answer locally"
            );
            return self.queue_locally(submission).await;
        }

        match self.try_deliver(&submission).await {
            Ok(()) => {
                self.mark_delivered();
                Ok(SubmitOutcome::Delivered)
            }
            Err(attempts) => {
                warn!(
                    session = %submission.session_id,
                    index = submission.question_index,
                    attempts,
                    "answer delivery exhausted retries, queueing locally"
                );
                self.queue_locally(submission).await
            }
        }
    }

    /// Drain the pending queue in original submission order.
    ///
    /// Stops at the first entry that cannot be delivered (or when
    /// connectivity drops), leaving it and everything behind it queued for
    /// the next connectivity event.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::CacheUnavailable` if the queue cannot be read.
    pub async fn reconcile(&self) -> Result<ReconcileReport, SyncError> {
        let pending = self
            .cache
            .pending_answers()
            .await
            .map_err(SyncError::CacheUnavailable)?;
        let total = pending.len();
        let mut delivered = 0;

        for entry in pending {
            if !self.connectivity.is_online() {
                break;
            }
            match self.try_deliver(&entry.submission).await {
                Ok(()) => {
                    // remove only after the remote acknowledged the write
                    if let Err(err) = self
                        .cache
                        .remove_pending(
                            entry.submission.session_id,
                            entry.submission.question_index,
                        )
                        .await
                    {
                        // replay on the next pass is safe: remote writes
                        // are keyed overwrites
                        warn!(error = %err, "delivered answer could not be dequeued");
                    }
                    self.mark_delivered();
                    delivered += 1;
                }
                Err(attempts) => {
                    warn!(
                        session = %entry.submission.session_id,
                        index = entry.submission.question_index,
                        attempts,
                        "reconciliation halted, entries stay queued"
                    );
                    break;
                }
            }
        }

        debug!(delivered, remaining = total - delivered, "reconciliation pass done");
        Ok(ReconcileReport {
            delivered,
            remaining: total - delivered,
        })
    }

    /// Reconcile on every offline→online transition until the monitor
    /// goes away.
    pub async fn run(self: Arc<Self>, mut connectivity: ConnectivityHandle) {
        loop {
            match connectivity.changed().await {
                Some(true) => {
                    if let Err(err) = self.reconcile().await {
                        warn!(error = %err, "reconciliation pass failed");
                    }
                }
                Some(false) => {}
                None => break,
            }
        }
    }

    async fn try_deliver(&self, submission: &AnswerSubmission) -> Result<(), u32> {
        let mut attempts = 0;
        loop {
            attempts += 1;
            match self.sessions.save_answer(submission).await {
                Ok(()) => return Ok(()),
                Err(err) => {
                    debug!(
                        error = %err,
                        attempt = attempts,
                        index = submission.question_index,
                        "answer delivery attempt failed"
                    );
                }
            }
            if attempts >= self.policy.max_attempts || !self.connectivity.is_online() {
                return Err(attempts);
            }
            tokio::time::sleep(self.policy.delay_for(attempts)).await;
        }
    }

    async fn queue_locally(
        &self,
        submission: AnswerSubmission,
    ) -> Result<SubmitOutcome, SyncError> {
        let pending = PendingAnswer {
            submission,
            queued_at: self.clock.now(),
        };
        match self.cache.append_pending(&pending).await {
            Ok(()) => {
                self.sync_errors.fetch_add(1, Ordering::Relaxed);
                Ok(SubmitOutcome::QueuedLocally)
            }
            Err(err) => {
                warn!(error = %err, "pending queue write failed, answer held in memory only");
                Err(SyncError::CacheUnavailable(err))
            }
        }
    }

    fn mark_delivered(&self) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
        self.sync_errors.store(0, Ordering::Relaxed);
        if let Ok(mut guard) = self.last_delivery_at.lock() {
            *guard = Some(self.clock.now());
        }
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::NetworkMonitor;
    use quiz_core::model::SessionId;
    use quiz_core::time::{fixed_clock, fixed_now};
    use storage::local_cache::MemoryCache;
    use storage::repository::InMemoryRemoteStore;

    struct Rig {
        monitor: NetworkMonitor,
        store: InMemoryRemoteStore,
        pipeline: Arc<AnswerSyncPipeline>,
    }

    fn rig(online: bool) -> Rig {
        let monitor = NetworkMonitor::new(online);
        let store = InMemoryRemoteStore::new();
        let cache = MemoryCache::new();
        let pipeline = Arc::new(
            AnswerSyncPipeline::new(
                Arc::new(store.clone()),
                Arc::new(cache),
                monitor.handle(),
                fixed_clock(),
            )
            .with_policy(RetryPolicy::immediate(3)),
        );
        Rig {
            monitor,
            store,
            pipeline,
        }
    }

    fn submission(session_id: SessionId, index: u32) -> AnswerSubmission {
        AnswerSubmission {
            session_id,
            question_index: index,
            answer_index: index,
            response_time_ms: 1000,
            submitted_at: fixed_now(),
        }
    }

    #[tokio::test]
    async fn online_submission_is_delivered() {
        let rig = rig(true);
        let id = SessionId::generate();

        let outcome = rig.pipeline.submit(submission(id, 0)).await.unwrap();
        assert_eq!(outcome, SubmitOutcome::Delivered);
        assert_eq!(rig.store.answers_for(id).len(), 1);
        assert_eq!(rig.pipeline.delivered_count(), 1);
        assert_eq!(rig.pipeline.pending_len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn offline_submission_queues_without_touching_remote() {
        let rig = rig(false);
        let id = SessionId::generate();

        let outcome = rig.pipeline.submit(submission(id, 0)).await.unwrap();
        assert_eq!(outcome, SubmitOutcome::QueuedLocally);
        assert!(rig.store.answers_for(id).is_empty());
        assert_eq!(rig.pipeline.pending_len().await.unwrap(), 1);
        assert_eq!(rig.pipeline.sync_error_count(), 1);
    }

    #[tokio::test]
    async fn transient_failure_is_retried_to_success() {
        let rig = rig(true);
        let id = SessionId::generate();
        rig.store.fail_next(1);

        let outcome = rig.pipeline.submit(submission(id, 0)).await.unwrap();
        assert_eq!(outcome, SubmitOutcome::Delivered);
        assert_eq!(rig.store.answers_for(id).len(), 1);
    }

    #[tokio::test]
    async fn exhausted_retries_fall_back_to_the_queue() {
        let rig = rig(true);
        let id = SessionId::generate();
        rig.store.fail_next(3);

        let outcome = rig.pipeline.submit(submission(id, 0)).await.unwrap();
        assert_eq!(outcome, SubmitOutcome::QueuedLocally);
        assert_eq!(rig.pipeline.pending_len().await.unwrap(), 1);
        assert_eq!(rig.pipeline.delivered_count(), 0);
    }

    #[tokio::test]
    async fn reconcile_drains_in_submission_order() {
        let rig = rig(false);
        let id = SessionId::generate();
        for i in 0..3 {
            rig.pipeline.submit(submission(id, i)).await.unwrap();
        }

        rig.monitor.set_online(true);
        let report = rig.pipeline.reconcile().await.unwrap();
        assert_eq!(report.delivered, 3);
        assert_eq!(report.remaining, 0);

        let answers = rig.store.answers_for(id);
        let order: Vec<u32> = answers.iter().map(|a| a.question_index).collect();
        assert_eq!(order, vec![0, 1, 2]);
        assert_eq!(rig.pipeline.pending_len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn failed_reconciliation_keeps_the_rest_queued() {
        let rig = rig(false);
        let id = SessionId::generate();
        for i in 0..3 {
            rig.pipeline.submit(submission(id, i)).await.unwrap();
        }

        rig.monitor.set_online(true);
        // first entry burns all three attempts and halts the pass
        rig.store.fail_next(3);
        let report = rig.pipeline.reconcile().await.unwrap();
        assert_eq!(report.delivered, 0);
        assert_eq!(report.remaining, 3);

        // next connectivity event retries and succeeds
        let report = rig.pipeline.reconcile().await.unwrap();
        assert_eq!(report.delivered, 3);
    }

    #[tokio::test]
    async fn run_reconciles_on_connectivity_restored() {
        let rig = rig(false);
        let id = SessionId::generate();
        rig.pipeline.submit(submission(id, 0)).await.unwrap();

        let worker = tokio::spawn(Arc::clone(&rig.pipeline).run(rig.monitor.handle()));
        rig.monitor.set_online(true);

        // wait for the worker to observe the transition and drain the queue
        for _ in 0..50 {
            if rig.pipeline.pending_len().await.unwrap() == 0 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(rig.store.answers_for(id).len(), 1);

        drop(rig.monitor);
        worker.await.unwrap();
    }

    #[tokio::test]
    async fn error_counter_resets_on_delivery() {
        let rig = rig(false);
        let id = SessionId::generate();
        rig.pipeline.submit(submission(id, 0)).await.unwrap();
        assert_eq!(rig.pipeline.sync_error_count(), 1);

        rig.monitor.set_online(true);
        rig.pipeline.reconcile().await.unwrap();
        assert_eq!(rig.pipeline.sync_error_count(), 0);
        assert!(rig.pipeline.last_delivery_at().is_some());
    }
}
