use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

use quiz_core::model::{
    Advance, OwnerId, QuestionId, QuestionPerformanceRecord, QuizSession, RecordedAnswer,
    SessionId, SessionMode,
};
use quiz_core::review_queue::{self, ReviewQueue};
use quiz_core::Clock;
use storage::repository::{AnswerSubmission, RemoteStore};

use crate::autosave::AutoSaveScheduler;
use crate::error::{FlowError, RecoveryError};
use crate::sync::AnswerSyncPipeline;

/// Category assigned to performance records created outside a tagged bank.
const DEFAULT_CATEGORY: &str = "general";

/// Orchestrates the study flow: session lifecycle, answer submission,
/// performance aggregation and the review queue.
///
/// The session itself stays owned by the caller (the presentation layer
/// drives it); this service wires each transition to its side effects.
/// Remote writes on the hot path are fire-and-forget so a slow or absent
/// network never blocks the learner.
pub struct StudyFlowService {
    clock: Clock,
    store: RemoteStore,
    pipeline: Arc<AnswerSyncPipeline>,
    autosave: Arc<AutoSaveScheduler>,
}

impl StudyFlowService {
    #[must_use]
    pub fn new(
        store: RemoteStore,
        pipeline: Arc<AnswerSyncPipeline>,
        autosave: Arc<AutoSaveScheduler>,
        clock: Clock,
    ) -> Self {
        Self {
            clock,
            store,
            pipeline,
            autosave,
        }
    }

    #[must_use]
    pub fn pipeline(&self) -> &Arc<AnswerSyncPipeline> {
        &self.pipeline
    }

    #[must_use]
    pub fn autosave(&self) -> &Arc<AutoSaveScheduler> {
        &self.autosave
    }

    // ─── Lifecycle ─────────────────────────────────────────────────────────────

    /// Start a session over the given question list.
    ///
    /// The remote record is created best-effort: starting offline is
    /// allowed, the record catches up on the next patch.
    ///
    /// # Errors
    ///
    /// Returns `FlowError::Session` for an empty question list.
    pub async fn start_session(
        &self,
        owner: OwnerId,
        mode: SessionMode,
        question_ids: Vec<QuestionId>,
    ) -> Result<QuizSession, FlowError> {
        let session = QuizSession::new(owner, mode, question_ids, self.clock.now())?;
        if let Err(err) = self.store.sessions.create_session(&session).await {
            warn!(session = %session.id(), error = %err, "remote session create deferred");
        }
        info!(session = %session.id(), mode = ?session.mode(), total = session.total_questions(), "session started");
        Ok(session)
    }

    /// Start a review drill over questions picked from the review queue.
    ///
    /// # Errors
    ///
    /// Returns `FlowError::Session` for an empty question list.
    pub async fn start_review(
        &self,
        owner: OwnerId,
        question_ids: Vec<QuestionId>,
    ) -> Result<QuizSession, FlowError> {
        self.start_session(owner, SessionMode::Custom, question_ids)
            .await
    }

    /// Record the learner's answer to the current question and hand it to
    /// the sync pipeline without waiting for delivery.
    ///
    /// # Errors
    ///
    /// Returns `FlowError::Performance` for a confidence rating outside 1-5
    /// and `FlowError::Session` for state-machine violations.
    pub async fn select_answer(
        &self,
        session: &mut QuizSession,
        choice: u32,
        correct: bool,
        response_time_ms: u32,
        confidence: Option<u8>,
    ) -> Result<(), FlowError> {
        if let Some(rating) = confidence {
            if !(1..=5).contains(&rating) {
                return Err(quiz_core::model::PerformanceError::InvalidConfidence(rating).into());
            }
        }

        let index = session.current_index();
        let at = self.clock.now();
        session.record_answer(
            index,
            RecordedAnswer {
                choice,
                correct,
                response_time_ms,
                confidence,
            },
            at,
        )?;

        let submission = AnswerSubmission {
            session_id: session.id(),
            question_index: index as u32,
            answer_index: choice,
            response_time_ms,
            submitted_at: at,
        };
        let pipeline = Arc::clone(&self.pipeline);
        // delivery and fallback are the pipeline's problem, not the learner's
        tokio::spawn(async move {
            if let Err(err) = pipeline.submit(submission).await {
                warn!(error = %err, "answer submission lost to a failing local queue");
            }
        });
        Ok(())
    }

    /// Advance past the current question, finalizing on completion.
    ///
    /// # Errors
    ///
    /// Returns `FlowError::Session` if the session is terminal.
    pub async fn next_question(
        &self,
        session: &mut QuizSession,
    ) -> Result<Advance, FlowError> {
        let step = session.advance(self.clock.now())?;
        if let Advance::Completed(score) = step {
            self.finalize(session, score).await;
        }
        Ok(step)
    }

    /// Complete the session explicitly and return the final score.
    ///
    /// # Errors
    ///
    /// Returns `FlowError::Session` if the session was abandoned.
    pub async fn complete_session(&self, session: &mut QuizSession) -> Result<f64, FlowError> {
        let score = session.complete(self.clock.now())?;
        self.finalize(session, score).await;
        Ok(score)
    }

    /// Abandon the session, keeping its progress durable for a later resume.
    ///
    /// # Errors
    ///
    /// Returns `FlowError::Session` if the session already completed.
    pub async fn abandon_session(&self, session: &mut QuizSession) -> Result<(), FlowError> {
        session.abandon(self.clock.now())?;
        self.autosave.save_now(session).await;
        if let Err(err) = self.store.sessions.patch_session(session).await {
            warn!(session = %session.id(), error = %err, "remote abandon patch deferred");
        }
        info!(session = %session.id(), "session abandoned");
        Ok(())
    }

    /// Resume an abandoned session within the resume window.
    ///
    /// # Errors
    ///
    /// Returns `FlowError::Session` when the window has elapsed or the
    /// session completed.
    pub async fn resume_session(&self, session: &mut QuizSession) -> Result<(), FlowError> {
        session.resume(self.clock.now())?;
        // refresh the snapshot so recovery sees the reopened session
        self.autosave.save_now(session).await;
        if let Err(err) = self.store.sessions.patch_session(session).await {
            warn!(session = %session.id(), error = %err, "remote resume patch deferred");
        }
        info!(session = %session.id(), "session resumed");
        Ok(())
    }

    /// Rebuild an interrupted session from its autosave snapshot.
    ///
    /// # Errors
    ///
    /// Returns `RecoveryError` if the snapshot cannot be read or restored.
    pub async fn recover_session(
        &self,
        session_id: SessionId,
    ) -> Result<Option<QuizSession>, RecoveryError> {
        self.autosave.recover(session_id).await
    }

    /// Presentation view of the session's current position.
    #[must_use]
    pub fn current_view(&self, session: &QuizSession) -> quiz_core::model::SessionView {
        session.view()
    }

    /// Feed elapsed countdown time into a timed session, finalizing when
    /// it expires. Returns the final score on expiry.
    pub async fn tick(&self, session: &mut QuizSession, seconds: i64) -> Option<f64> {
        let score = session.tick(seconds, self.clock.now())?;
        self.finalize(session, score).await;
        Some(score)
    }

    // ─── Review ────────────────────────────────────────────────────────────────

    /// Classified review queue for one learner, computed from their
    /// performance records at the current instant.
    ///
    /// # Errors
    ///
    /// Returns `FlowError::Storage` when the records cannot be fetched; the
    /// queue is never served from stale partial data.
    pub async fn review_queue(&self, owner: OwnerId) -> Result<ReviewQueue, FlowError> {
        let records = self.store.performance.records_for_owner(owner).await?;
        Ok(review_queue::classify_records(&records, self.clock.now()))
    }

    // ─── Finalization ──────────────────────────────────────────────────────────

    /// Post-completion side effects, all best-effort: patch the remote
    /// record, fold each answer into its performance history, drop the
    /// autosave snapshot.
    async fn finalize(&self, session: &QuizSession, score: f64) {
        if let Err(err) = self.store.sessions.patch_session(session).await {
            warn!(session = %session.id(), error = %err, "remote completion patch deferred");
        }
        self.fold_performance(session).await;
        self.autosave.discard(session.id()).await;
        info!(session = %session.id(), score, "session finalized");
    }

    async fn fold_performance(&self, session: &QuizSession) {
        let owner = session.owner_id();
        let mut records: HashMap<u64, QuestionPerformanceRecord> =
            match self.store.performance.records_for_owner(owner).await {
                Ok(records) => records
                    .into_iter()
                    .map(|r| (r.question_id().value(), r))
                    .collect(),
                Err(err) => {
                    warn!(error = %err, "performance fold skipped, records unreachable");
                    return;
                }
            };

        let at = self.clock.now();
        for (question_id, answer) in session
            .question_ids()
            .iter()
            .zip(session.answers())
            .filter_map(|(q, a)| a.map(|answer| (*q, answer)))
        {
            let record = records.entry(question_id.value()).or_insert_with(|| {
                QuestionPerformanceRecord::new(question_id, owner, DEFAULT_CATEGORY, 0, at)
            });
            if let Err(err) =
                record.record_attempt(answer.correct, answer.response_time_ms, answer.confidence, at)
            {
                warn!(question = %question_id, error = %err, "attempt not folded");
                continue;
            }
            if let Err(err) = self.store.performance.upsert_record(record).await {
                warn!(question = %question_id, error = %err, "performance upsert deferred");
            }
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
    use crate::retry::RetryPolicy;
    use quiz_core::model::{SessionStatus, TIMED_SESSION_SECONDS};
    use quiz_core::scheduler::ReviewClassification;
    use quiz_core::time::{fixed_clock, fixed_now};
    use std::time::Duration;
    use storage::local_cache::MemoryCache;
    use storage::repository::{InMemoryRemoteStore, PerformanceStore, SessionStore};
    use uuid::Uuid;

    struct Rig {
        monitor: NetworkMonitor,
        remote: InMemoryRemoteStore,
        service: StudyFlowService,
    }

    fn rig() -> Rig {
        let monitor = NetworkMonitor::new(true);
        let remote = InMemoryRemoteStore::new();
        let cache = MemoryCache::new();
        let pipeline = Arc::new(
            AnswerSyncPipeline::new(
                Arc::new(remote.clone()),
                Arc::new(cache.clone()),
                monitor.handle(),
                fixed_clock(),
            )
            .with_policy(RetryPolicy::immediate(3)),
        );
        let autosave = Arc::new(AutoSaveScheduler::new(Arc::new(cache), fixed_clock()));
        let service = StudyFlowService::new(
            RemoteStore::from_memory_store(remote.clone()),
            pipeline,
            autosave,
            fixed_clock(),
        );
        Rig {
            monitor,
            remote,
            service,
        }
    }

    fn owner() -> OwnerId {
        OwnerId::from_uuid(Uuid::from_u128(42))
    }

    fn questions(n: u64) -> Vec<QuestionId> {
        (0..n).map(QuestionId::new).collect()
    }

    async fn wait_for_answers(remote: &InMemoryRemoteStore, id: SessionId, n: usize) {
        for _ in 0..100 {
            if remote.answers_for(id).len() >= n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("expected {n} delivered answers");
    }

    #[tokio::test]
    async fn full_session_updates_score_and_performance() {
        let rig = rig();
        let mut session = rig
            .service
            .start_session(owner(), SessionMode::Quick, questions(3))
            .await
            .unwrap();

        for i in 0..3 {
            rig.service
                .select_answer(&mut session, i, i < 2, 1000, Some(4))
                .await
                .unwrap();
            rig.service.next_question(&mut session).await.unwrap();
        }

        assert_eq!(session.status(), SessionStatus::Completed);
        assert_eq!(session.score(), Some(2.0 / 3.0));

        wait_for_answers(&rig.remote, session.id(), 3).await;

        let records = rig.remote.records_for_owner(owner()).await.unwrap();
        assert_eq!(records.len(), 3);
        for record in &records {
            assert_eq!(record.attempts(), 1);
            assert_eq!(record.category(), DEFAULT_CATEGORY);
        }

        // remote record reflects the terminal state
        let stored = rig
            .remote
            .get_session(session.id())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status(), SessionStatus::Completed);
    }

    #[tokio::test]
    async fn confidence_outside_scale_is_rejected_before_recording() {
        let rig = rig();
        let mut session = rig
            .service
            .start_session(owner(), SessionMode::Quick, questions(1))
            .await
            .unwrap();

        let err = rig
            .service
            .select_answer(&mut session, 0, true, 500, Some(9))
            .await
            .unwrap_err();
        assert!(matches!(err, FlowError::Performance(_)));
        assert_eq!(session.answered_count(), 0);
    }

    #[tokio::test]
    async fn offline_start_is_allowed_and_answers_queue() {
        let rig = rig();
        rig.monitor.set_online(false);
        rig.remote.fail_next(1); // create_session fails too

        let mut session = rig
            .service
            .start_session(owner(), SessionMode::Quick, questions(1))
            .await
            .unwrap();
        rig.service
            .select_answer(&mut session, 0, true, 800, None)
            .await
            .unwrap();

        for _ in 0..100 {
            if rig.service.pipeline().pending_len().await.unwrap() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(rig.remote.answers_for(session.id()).is_empty());

        rig.monitor.set_online(true);
        let report = rig.service.pipeline().reconcile().await.unwrap();
        assert_eq!(report.delivered, 1);
        assert_eq!(rig.remote.answers_for(session.id()).len(), 1);
    }

    #[tokio::test]
    async fn abandon_then_resume_round_trips_through_the_snapshot() {
        let rig = rig();
        let mut session = rig
            .service
            .start_session(owner(), SessionMode::Timed, questions(2))
            .await
            .unwrap();
        rig.service
            .select_answer(&mut session, 1, true, 1200, Some(5))
            .await
            .unwrap();
        rig.service.tick(&mut session, 30).await;

        rig.service.abandon_session(&mut session).await.unwrap();
        assert_eq!(session.status(), SessionStatus::Abandoned);

        // progress survives a process restart via the snapshot; the
        // recovered session stays abandoned until an explicit resume
        let recovered = rig
            .service
            .recover_session(session.id())
            .await
            .unwrap()
            .expect("snapshot kept for resume");
        assert_eq!(recovered.status(), SessionStatus::Abandoned);
        assert_eq!(recovered.answered_count(), 1);
        assert_eq!(
            recovered.time_remaining(),
            Some(TIMED_SESSION_SECONDS - 30)
        );

        rig.service.resume_session(&mut session).await.unwrap();
        assert_eq!(session.status(), SessionStatus::Active);
    }

    #[tokio::test]
    async fn timer_expiry_finalizes_the_session() {
        let rig = rig();
        let mut session = rig
            .service
            .start_session(owner(), SessionMode::Timed, questions(2))
            .await
            .unwrap();
        rig.service
            .select_answer(&mut session, 0, true, 900, None)
            .await
            .unwrap();

        let score = rig.service.tick(&mut session, TIMED_SESSION_SECONDS).await;
        assert_eq!(score, Some(0.5));
        assert_eq!(session.status(), SessionStatus::Completed);

        let records = rig.remote.records_for_owner(owner()).await.unwrap();
        assert_eq!(records.len(), 1);
        // the snapshot is gone once the session is terminal
        assert!(rig
            .service
            .recover_session(session.id())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn review_queue_reflects_remote_records() {
        let rig = rig();
        let mut struggling = QuestionPerformanceRecord::new(
            QuestionId::new(1),
            owner(),
            "pharmacology",
            3,
            fixed_now(),
        );
        for _ in 0..4 {
            struggling
                .record_attempt(false, 2000, Some(1), fixed_now())
                .unwrap();
        }
        rig.remote.upsert_record(&struggling).await.unwrap();

        let queue = rig.service.review_queue(owner()).await.unwrap();
        assert_eq!(queue.due.len(), 0);
        assert_eq!(queue.upcoming.len(), 1);
        assert_eq!(
            queue.upcoming[0].classification,
            ReviewClassification::Struggling
        );
    }

    #[tokio::test]
    async fn repeat_session_folds_into_existing_records() {
        let rig = rig();
        for _ in 0..2 {
            let mut session = rig
                .service
                .start_session(owner(), SessionMode::Quick, questions(1))
                .await
                .unwrap();
            rig.service
                .select_answer(&mut session, 0, true, 1000, Some(5))
                .await
                .unwrap();
            rig.service.complete_session(&mut session).await.unwrap();
        }

        let records = rig.remote.records_for_owner(owner()).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].attempts(), 2);
        assert_eq!(records[0].accuracy(), Some(1.0));
    }
}
