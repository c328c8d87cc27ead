use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use quiz_core::model::{
    OwnerId, QuestionId, QuizSession, RecordedAnswer, SessionError, SessionId, SessionMode,
};

use crate::repository::{AnswerSubmission, StorageError};

//
// ─── TYPED CACHE ENTRIES ───────────────────────────────────────────────────────
//

/// An answer waiting for remote delivery, held locally until acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingAnswer {
    pub submission: AnswerSubmission,
    pub queued_at: DateTime<Utc>,
}

/// Durable snapshot of an in-progress session.
///
/// Written by the autosave scheduler and read back as the recovery source
/// when the process restarts and the remote record is unreachable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub session_id: SessionId,
    pub owner_id: OwnerId,
    pub mode: SessionMode,
    pub question_ids: Vec<QuestionId>,
    pub answers: Vec<Option<RecordedAnswer>>,
    pub current_index: usize,
    pub started_at: DateTime<Utc>,
    pub time_remaining: Option<i64>,
    /// Set when the session was abandoned before this save; keeps the
    /// resume window anchored to the real abandonment instant.
    pub abandoned_at: Option<DateTime<Utc>>,
    pub saved_at: DateTime<Utc>,
}

impl SessionSnapshot {
    #[must_use]
    pub fn of(session: &QuizSession, saved_at: DateTime<Utc>) -> Self {
        Self {
            session_id: session.id(),
            owner_id: session.owner_id(),
            mode: session.mode(),
            question_ids: session.question_ids().to_vec(),
            answers: session.answers().to_vec(),
            current_index: session.current_index(),
            started_at: session.started_at(),
            time_remaining: session.time_remaining(),
            abandoned_at: session.abandoned_at(),
            saved_at,
        }
    }

    /// Rebuild the session this snapshot was taken from.
    ///
    /// An abandoned snapshot comes back as `Abandoned`; only an explicit
    /// `resume` within the window reopens it.
    ///
    /// # Errors
    ///
    /// Returns `SessionError` if the persisted shape is inconsistent.
    pub fn restore(self, restored_at: DateTime<Utc>) -> Result<QuizSession, SessionError> {
        QuizSession::restore(
            self.session_id,
            self.owner_id,
            self.mode,
            self.question_ids,
            self.answers,
            self.current_index,
            self.started_at,
            self.time_remaining,
            self.abandoned_at,
            restored_at,
        )
    }
}

//
// ─── CACHE CONTRACT ────────────────────────────────────────────────────────────
//

/// Key-value fallback store surviving process restarts.
///
/// Single writer per device: one session's autosave and one pending-answers
/// queue, so atomic key overwrite is all the isolation required.
#[async_trait]
pub trait LocalDurableCache: Send + Sync {
    /// Append an answer to the pending queue, preserving submission order.
    ///
    /// Re-appending an existing `(session, question_index)` key refreshes
    /// the payload in place, keeping the original queue position.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the entry cannot be written.
    async fn append_pending(&self, pending: &PendingAnswer) -> Result<(), StorageError>;

    /// All pending answers in original submission order.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the queue cannot be read.
    async fn pending_answers(&self) -> Result<Vec<PendingAnswer>, StorageError>;

    /// Drop the pending entry for one `(session, question_index)` key after
    /// remote acknowledgment.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the entry cannot be removed.
    async fn remove_pending(
        &self,
        session_id: SessionId,
        question_index: u32,
    ) -> Result<(), StorageError>;

    /// Overwrite the snapshot for the snapshot's session.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the snapshot cannot be written.
    async fn save_snapshot(&self, snapshot: &SessionSnapshot) -> Result<(), StorageError>;

    /// Load the latest snapshot for a session, `None` when absent.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the snapshot cannot be read.
    async fn load_snapshot(
        &self,
        session_id: SessionId,
    ) -> Result<Option<SessionSnapshot>, StorageError>;

    /// Remove the snapshot after the session reaches a terminal state.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the snapshot cannot be removed.
    async fn clear_snapshot(&self, session_id: SessionId) -> Result<(), StorageError>;
}

//
// ─── IN-MEMORY CACHE ───────────────────────────────────────────────────────────
//

/// Volatile cache for tests and prototyping; same contract, no durability.
#[derive(Clone, Default)]
pub struct MemoryCache {
    pending: Arc<Mutex<Vec<PendingAnswer>>>,
    snapshots: Arc<Mutex<HashMap<SessionId, SessionSnapshot>>>,
}

impl MemoryCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LocalDurableCache for MemoryCache {
    async fn append_pending(&self, pending: &PendingAnswer) -> Result<(), StorageError> {
        let mut guard = self
            .pending
            .lock()
            .map_err(|e| StorageError::Unavailable(e.to_string()))?;
        // same key semantics as the SQLite cache: refresh the payload in
        // place, keeping the original queue position and queued_at
        let key = (pending.submission.session_id, pending.submission.question_index);
        if let Some(existing) = guard
            .iter_mut()
            .find(|p| (p.submission.session_id, p.submission.question_index) == key)
        {
            existing.submission = pending.submission;
        } else {
            guard.push(*pending);
        }
        Ok(())
    }

    async fn pending_answers(&self) -> Result<Vec<PendingAnswer>, StorageError> {
        let guard = self
            .pending
            .lock()
            .map_err(|e| StorageError::Unavailable(e.to_string()))?;
        Ok(guard.clone())
    }

    async fn remove_pending(
        &self,
        session_id: SessionId,
        question_index: u32,
    ) -> Result<(), StorageError> {
        let mut guard = self
            .pending
            .lock()
            .map_err(|e| StorageError::Unavailable(e.to_string()))?;
        guard.retain(|p| {
            p.submission.session_id != session_id || p.submission.question_index != question_index
        });
        Ok(())
    }

    async fn save_snapshot(&self, snapshot: &SessionSnapshot) -> Result<(), StorageError> {
        let mut guard = self
            .snapshots
            .lock()
            .map_err(|e| StorageError::Unavailable(e.to_string()))?;
        guard.insert(snapshot.session_id, snapshot.clone());
        Ok(())
    }

    async fn load_snapshot(
        &self,
        session_id: SessionId,
    ) -> Result<Option<SessionSnapshot>, StorageError> {
        let guard = self
            .snapshots
            .lock()
            .map_err(|e| StorageError::Unavailable(e.to_string()))?;
        Ok(guard.get(&session_id).cloned())
    }

    async fn clear_snapshot(&self, session_id: SessionId) -> Result<(), StorageError> {
        let mut guard = self
            .snapshots
            .lock()
            .map_err(|e| StorageError::Unavailable(e.to_string()))?;
        guard.remove(&session_id);
        Ok(())
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//
