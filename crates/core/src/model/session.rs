use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::ids::{OwnerId, QuestionId, SessionId};

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SessionError {
    #[error("session requires at least one question")]
    InvalidConfiguration,

    #[error("answer count ({answers}) does not match question count ({questions})")]
    AnswerCountMismatch { answers: usize, questions: usize },

    #[error("operation attempted on a session that is not active")]
    SessionNotActive,

    #[error("question {index} already has an answer")]
    AlreadyAnswered { index: usize },

    #[error("question index {index} out of range for session of {len} questions")]
    QuestionIndexOutOfRange { index: usize, len: usize },

    #[error("resume window elapsed; the session is permanently terminal")]
    ResumeWindowExpired,
}

//
// ─── MODE & STATUS ─────────────────────────────────────────────────────────────
//

/// Kind of study activity a session represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionMode {
    /// Short untimed run over a preselected question list.
    Quick,
    /// Countdown-driven run; reaching zero completes the session.
    Timed,
    /// Caller-assembled question list (e.g. a review drill), untimed.
    Custom,
}

impl SessionMode {
    /// Mode-to-duration table. Only timed sessions carry a countdown.
    #[must_use]
    pub fn time_limit_seconds(self) -> Option<i64> {
        match self {
            SessionMode::Timed => Some(TIMED_SESSION_SECONDS),
            SessionMode::Quick | SessionMode::Custom => None,
        }
    }
}

/// Countdown budget for `SessionMode::Timed`.
pub const TIMED_SESSION_SECONDS: i64 = 600;

/// Hours after abandonment during which a session may still be resumed.
pub const RESUME_WINDOW_HOURS: i64 = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Completed,
    Abandoned,
}

//
// ─── ANSWERS ───────────────────────────────────────────────────────────────────
//

/// One learner answer, fixed once written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordedAnswer {
    pub choice: u32,
    pub correct: bool,
    pub response_time_ms: u32,
    /// Learner's self-rated confidence for this attempt, 1-5.
    pub confidence: Option<u8>,
}

/// Result of advancing past the current question.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Advance {
    /// Moved to the next unanswered question at this index.
    Next(usize),
    /// Every question was answered; the session completed with this score.
    Completed(f64),
}

//
// ─── SESSION ───────────────────────────────────────────────────────────────────
//

/// One learner's attempt at an ordered sequence of questions.
///
/// The question list is fixed at creation; `answers` always has the same
/// length as `question_ids`. Status transitions are monotonic
/// (`Active → Completed` or `Active → Abandoned`) except that an abandoned
/// session may return to `Active` within the resume window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuizSession {
    id: SessionId,
    owner_id: OwnerId,
    mode: SessionMode,
    question_ids: Vec<QuestionId>,
    answers: Vec<Option<RecordedAnswer>>,
    status: SessionStatus,
    current: usize,
    started_at: DateTime<Utc>,
    last_activity_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    abandoned_at: Option<DateTime<Utc>>,
    time_remaining: Option<i64>,
    score: Option<f64>,
}

impl QuizSession {
    /// Start a new session over the given question list.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::InvalidConfiguration` if `question_ids` is empty.
    pub fn new(
        owner_id: OwnerId,
        mode: SessionMode,
        question_ids: Vec<QuestionId>,
        started_at: DateTime<Utc>,
    ) -> Result<Self, SessionError> {
        if question_ids.is_empty() {
            return Err(SessionError::InvalidConfiguration);
        }

        let answers = vec![None; question_ids.len()];
        Ok(Self {
            id: SessionId::generate(),
            owner_id,
            mode,
            question_ids,
            answers,
            status: SessionStatus::Active,
            current: 0,
            started_at,
            last_activity_at: started_at,
            completed_at: None,
            abandoned_at: None,
            time_remaining: mode.time_limit_seconds(),
            score: None,
        })
    }

    /// Rebuild a session from a durable snapshot.
    ///
    /// Used when the process restarts mid-session and the remote record
    /// cannot be reached. A snapshot taken after abandonment comes back as
    /// `Abandoned` with its original `abandoned_at`, so the resume window
    /// keeps counting from the real abandonment instant rather than the
    /// restore.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::InvalidConfiguration` for an empty question
    /// list, or `SessionError::AnswerCountMismatch` if the persisted answers
    /// do not line up with the questions.
    #[allow(clippy::too_many_arguments)]
    pub fn restore(
        id: SessionId,
        owner_id: OwnerId,
        mode: SessionMode,
        question_ids: Vec<QuestionId>,
        answers: Vec<Option<RecordedAnswer>>,
        current: usize,
        started_at: DateTime<Utc>,
        time_remaining: Option<i64>,
        abandoned_at: Option<DateTime<Utc>>,
        restored_at: DateTime<Utc>,
    ) -> Result<Self, SessionError> {
        if question_ids.is_empty() {
            return Err(SessionError::InvalidConfiguration);
        }
        if answers.len() != question_ids.len() {
            return Err(SessionError::AnswerCountMismatch {
                answers: answers.len(),
                questions: question_ids.len(),
            });
        }

        let current = current.min(question_ids.len().saturating_sub(1));
        let (status, last_activity_at) = match abandoned_at {
            Some(at) => (SessionStatus::Abandoned, at),
            None => (SessionStatus::Active, restored_at),
        };
        Ok(Self {
            id,
            owner_id,
            mode,
            question_ids,
            answers,
            status,
            current,
            started_at,
            last_activity_at,
            completed_at: None,
            abandoned_at,
            time_remaining,
            score: None,
        })
    }

    // ─── Accessors ─────────────────────────────────────────────────────────────

    #[must_use]
    pub fn id(&self) -> SessionId {
        self.id
    }

    #[must_use]
    pub fn owner_id(&self) -> OwnerId {
        self.owner_id
    }

    #[must_use]
    pub fn mode(&self) -> SessionMode {
        self.mode
    }

    #[must_use]
    pub fn status(&self) -> SessionStatus {
        self.status
    }

    #[must_use]
    pub fn question_ids(&self) -> &[QuestionId] {
        &self.question_ids
    }

    #[must_use]
    pub fn answers(&self) -> &[Option<RecordedAnswer>] {
        &self.answers
    }

    #[must_use]
    pub fn current_index(&self) -> usize {
        self.current
    }

    #[must_use]
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    #[must_use]
    pub fn last_activity_at(&self) -> DateTime<Utc> {
        self.last_activity_at
    }

    #[must_use]
    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    #[must_use]
    pub fn abandoned_at(&self) -> Option<DateTime<Utc>> {
        self.abandoned_at
    }

    #[must_use]
    pub fn time_remaining(&self) -> Option<i64> {
        self.time_remaining
    }

    /// Final score as a fraction of correct answers. `None` until completed.
    #[must_use]
    pub fn score(&self) -> Option<f64> {
        self.score
    }

    #[must_use]
    pub fn total_questions(&self) -> usize {
        self.question_ids.len()
    }

    #[must_use]
    pub fn answered_count(&self) -> usize {
        self.answers.iter().filter(|a| a.is_some()).count()
    }

    #[must_use]
    pub fn correct_count(&self) -> usize {
        self.answers
            .iter()
            .filter(|a| a.is_some_and(|r| r.correct))
            .count()
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Active
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.status == SessionStatus::Completed
    }

    /// Presentation view of the current position.
    #[must_use]
    pub fn view(&self) -> SessionView {
        SessionView {
            question: self.question_ids.get(self.current).copied(),
            index: self.current,
            total: self.question_ids.len(),
            time_remaining: self.time_remaining,
            has_answered: self
                .answers
                .get(self.current)
                .is_some_and(Option::is_some),
        }
    }

    // ─── Transitions ───────────────────────────────────────────────────────────

    /// Record an answer at the given question index.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::SessionNotActive` if the session is terminal,
    /// `SessionError::QuestionIndexOutOfRange` for a bad index, and
    /// `SessionError::AlreadyAnswered` if the slot is already written.
    pub fn record_answer(
        &mut self,
        index: usize,
        answer: RecordedAnswer,
        at: DateTime<Utc>,
    ) -> Result<(), SessionError> {
        if self.status != SessionStatus::Active {
            return Err(SessionError::SessionNotActive);
        }
        let len = self.question_ids.len();
        let Some(slot) = self.answers.get_mut(index) else {
            return Err(SessionError::QuestionIndexOutOfRange { index, len });
        };
        if slot.is_some() {
            return Err(SessionError::AlreadyAnswered { index });
        }

        *slot = Some(answer);
        self.last_activity_at = at;
        Ok(())
    }

    /// Move to the next unanswered question, completing the session when
    /// none remains.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::SessionNotActive` if the session is terminal.
    pub fn advance(&mut self, at: DateTime<Utc>) -> Result<Advance, SessionError> {
        if self.status != SessionStatus::Active {
            return Err(SessionError::SessionNotActive);
        }

        let len = self.question_ids.len();
        // wrap around, considering the current slot last so a skipped
        // question cannot be silently completed over
        let next = (self.current + 1..len)
            .chain(0..=self.current)
            .find(|i| self.answers[*i].is_none());

        match next {
            Some(index) => {
                self.current = index;
                self.last_activity_at = at;
                Ok(Advance::Next(index))
            }
            None => Ok(Advance::Completed(self.complete(at)?)),
        }
    }

    /// Complete the session, scoring it once.
    ///
    /// Idempotent: completing an already-completed session returns the stored
    /// score without re-scoring. This is the guard that serializes the race
    /// between a timer-driven auto-complete and a user-driven complete.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::SessionNotActive` if the session was abandoned.
    #[allow(clippy::cast_precision_loss)]
    pub fn complete(&mut self, at: DateTime<Utc>) -> Result<f64, SessionError> {
        match self.status {
            SessionStatus::Completed => {
                // already scored; second caller of the timer/user race
                Ok(self.score.unwrap_or(0.0))
            }
            SessionStatus::Abandoned => Err(SessionError::SessionNotActive),
            SessionStatus::Active => {
                let score = self.correct_count() as f64 / self.question_ids.len() as f64;
                self.status = SessionStatus::Completed;
                self.completed_at = Some(at);
                self.last_activity_at = at;
                self.score = Some(score);
                Ok(score)
            }
        }
    }

    /// Abandon the session, keeping all recorded answers.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::SessionNotActive` if the session completed.
    pub fn abandon(&mut self, at: DateTime<Utc>) -> Result<(), SessionError> {
        match self.status {
            SessionStatus::Completed => Err(SessionError::SessionNotActive),
            SessionStatus::Abandoned => Ok(()),
            SessionStatus::Active => {
                self.status = SessionStatus::Abandoned;
                self.abandoned_at = Some(at);
                self.last_activity_at = at;
                Ok(())
            }
        }
    }

    /// Return an abandoned session to `Active`, keeping answers and countdown.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::ResumeWindowExpired` when more than
    /// [`RESUME_WINDOW_HOURS`] have passed since abandonment, and
    /// `SessionError::SessionNotActive` for completed sessions.
    pub fn resume(&mut self, at: DateTime<Utc>) -> Result<(), SessionError> {
        match self.status {
            SessionStatus::Active => Ok(()),
            SessionStatus::Completed => Err(SessionError::SessionNotActive),
            SessionStatus::Abandoned => {
                let abandoned_at = self.abandoned_at.unwrap_or(self.last_activity_at);
                if at - abandoned_at > Duration::hours(RESUME_WINDOW_HOURS) {
                    return Err(SessionError::ResumeWindowExpired);
                }
                self.status = SessionStatus::Active;
                self.abandoned_at = None;
                self.last_activity_at = at;
                Ok(())
            }
        }
    }

    /// Advance the countdown by `seconds` of elapsed time.
    ///
    /// Untimed modes and terminal sessions ignore ticks. When the countdown
    /// reaches zero the session completes through the idempotent
    /// [`complete`](Self::complete) path and the final score is returned.
    pub fn tick(&mut self, seconds: i64, at: DateTime<Utc>) -> Option<f64> {
        if self.status != SessionStatus::Active {
            return None;
        }
        let remaining = self.time_remaining?;
        let remaining = (remaining - seconds).max(0);
        self.time_remaining = Some(remaining);
        if remaining == 0 {
            return self.complete(at).ok();
        }
        None
    }
}

/// What the presentation layer needs to render the current question.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionView {
    pub question: Option<QuestionId>,
    pub index: usize,
    pub total: usize,
    pub time_remaining: Option<i64>,
    pub has_answered: bool,
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//
