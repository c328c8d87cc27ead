use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;

use quiz_core::model::{OwnerId, QuestionPerformanceRecord, QuizSession, SessionId};

/// Errors surfaced by storage adapters.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    #[error("not found")]
    NotFound,

    #[error("conflict")]
    Conflict,

    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// One answer on its way to the remote store.
///
/// Remote writes are keyed by `(session_id, question_index)` and are
/// idempotent overwrites, so replaying a submission is always safe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerSubmission {
    pub session_id: SessionId,
    pub question_index: u32,
    pub answer_index: u32,
    pub response_time_ms: u32,
    pub submitted_at: DateTime<Utc>,
}

//
// ─── REMOTE STORE CONTRACTS ────────────────────────────────────────────────────
//

/// Remote session records: the durable-storage collaborator.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Create the remote record for a freshly started session.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the record cannot be stored.
    async fn create_session(&self, session: &QuizSession) -> Result<(), StorageError>;

    /// Fetch a session record, `None` when unknown.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` for transport failures.
    async fn get_session(&self, id: SessionId) -> Result<Option<QuizSession>, StorageError>;

    /// Overwrite the remote record with the session's current state.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the record cannot be stored.
    async fn patch_session(&self, session: &QuizSession) -> Result<(), StorageError>;

    /// Store one answer, keyed by `(session_id, question_index)`.
    ///
    /// Overwrites any previous value for the key; duplicate delivery during
    /// reconciliation is therefore harmless.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the answer cannot be stored.
    async fn save_answer(&self, submission: &AnswerSubmission) -> Result<(), StorageError>;
}

/// Remote question-performance records.
#[async_trait]
pub trait PerformanceStore: Send + Sync {
    /// All performance records for one learner.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` for transport failures.
    async fn records_for_owner(
        &self,
        owner: OwnerId,
    ) -> Result<Vec<QuestionPerformanceRecord>, StorageError>;

    /// Persist or update one record, keyed by `(owner_id, question_id)`.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the record cannot be stored.
    async fn upsert_record(&self, record: &QuestionPerformanceRecord) -> Result<(), StorageError>;
}

//
// ─── IN-MEMORY REMOTE STORE ────────────────────────────────────────────────────
//

/// In-memory remote store for tests and prototyping.
///
/// `fail_next` injects transient outages: the given number of upcoming
/// operations return `StorageError::Unavailable`, which is how the sync
/// pipeline's retry and fallback paths are exercised deterministically.
#[derive(Clone, Default)]
pub struct InMemoryRemoteStore {
    sessions: Arc<Mutex<HashMap<SessionId, QuizSession>>>,
    answers: Arc<Mutex<HashMap<(SessionId, u32), AnswerSubmission>>>,
    records: Arc<Mutex<HashMap<(OwnerId, u64), QuestionPerformanceRecord>>>,
    failures_remaining: Arc<Mutex<u32>>,
}

impl InMemoryRemoteStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` operations fail with `Unavailable`.
    pub fn fail_next(&self, n: u32) {
        if let Ok(mut failures) = self.failures_remaining.lock() {
            *failures = n;
        }
    }

    /// Answers currently held for a session, in index order.
    #[must_use]
    pub fn answers_for(&self, session_id: SessionId) -> Vec<AnswerSubmission> {
        let Ok(guard) = self.answers.lock() else {
            return Vec::new();
        };
        let mut out: Vec<AnswerSubmission> = guard
            .iter()
            .filter(|((sid, _), _)| *sid == session_id)
            .map(|(_, submission)| *submission)
            .collect();
        out.sort_by_key(|s| s.question_index);
        out
    }

    fn check_outage(&self) -> Result<(), StorageError> {
        let mut failures = self
            .failures_remaining
            .lock()
            .map_err(|e| StorageError::Unavailable(e.to_string()))?;
        if *failures > 0 {
            *failures -= 1;
            return Err(StorageError::Unavailable("injected outage".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl SessionStore for InMemoryRemoteStore {
    async fn create_session(&self, session: &QuizSession) -> Result<(), StorageError> {
        self.check_outage()?;
        let mut guard = self
            .sessions
            .lock()
            .map_err(|e| StorageError::Unavailable(e.to_string()))?;
        guard.insert(session.id(), session.clone());
        Ok(())
    }

    async fn get_session(&self, id: SessionId) -> Result<Option<QuizSession>, StorageError> {
        self.check_outage()?;
        let guard = self
            .sessions
            .lock()
            .map_err(|e| StorageError::Unavailable(e.to_string()))?;
        Ok(guard.get(&id).cloned())
    }

    async fn patch_session(&self, session: &QuizSession) -> Result<(), StorageError> {
        self.check_outage()?;
        let mut guard = self
            .sessions
            .lock()
            .map_err(|e| StorageError::Unavailable(e.to_string()))?;
        guard.insert(session.id(), session.clone());
        Ok(())
    }

    async fn save_answer(&self, submission: &AnswerSubmission) -> Result<(), StorageError> {
        self.check_outage()?;
        let mut guard = self
            .answers
            .lock()
            .map_err(|e| StorageError::Unavailable(e.to_string()))?;
        guard.insert(
            (submission.session_id, submission.question_index),
            *submission,
        );
        Ok(())
    }
}

#[async_trait]
impl PerformanceStore for InMemoryRemoteStore {
    async fn records_for_owner(
        &self,
        owner: OwnerId,
    ) -> Result<Vec<QuestionPerformanceRecord>, StorageError> {
        self.check_outage()?;
        let guard = self
            .records
            .lock()
            .map_err(|e| StorageError::Unavailable(e.to_string()))?;
        Ok(guard
            .iter()
            .filter(|((oid, _), _)| *oid == owner)
            .map(|(_, record)| record.clone())
            .collect())
    }

    async fn upsert_record(&self, record: &QuestionPerformanceRecord) -> Result<(), StorageError> {
        self.check_outage()?;
        let mut guard = self
            .records
            .lock()
            .map_err(|e| StorageError::Unavailable(e.to_string()))?;
        guard.insert(
            (record.owner_id(), record.question_id().value()),
            record.clone(),
        );
        Ok(())
    }
}

/// Aggregates the remote store contracts behind trait objects so backends
/// can be swapped without touching the services crate.
#[derive(Clone)]
pub struct RemoteStore {
    pub sessions: Arc<dyn SessionStore>,
    pub performance: Arc<dyn PerformanceStore>,
}

impl RemoteStore {
    #[must_use]
    pub fn in_memory() -> Self {
        Self::from_memory_store(InMemoryRemoteStore::new())
    }

    /// Build from a concrete in-memory store, keeping the handle for
    /// fault injection in tests.
    #[must_use]
    pub fn from_memory_store(store: InMemoryRemoteStore) -> Self {
        let sessions: Arc<dyn SessionStore> = Arc::new(store.clone());
        let performance: Arc<dyn PerformanceStore> = Arc::new(store);
        Self {
            sessions,
            performance,
        }
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//
