use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::ids::{OwnerId, QuestionId};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum PerformanceError {
    #[error("correct count ({correct}) exceeds attempts ({attempts})")]
    CountMismatch { correct: u32, attempts: u32 },

    #[error("confidence rating {0} outside the 1-5 scale")]
    InvalidConfidence(u8),
}

/// Append-only performance history for one question and one learner.
///
/// Created on the first attempt, folded on every later one, never deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionPerformanceRecord {
    question_id: QuestionId,
    owner_id: OwnerId,
    attempts: u32,
    correct_count: u32,
    last_attempted_at: DateTime<Utc>,
    average_response_time_ms: f64,
    confidence_ratings: Vec<u8>,
    is_bookmarked: bool,
    category: String,
    difficulty: u8,
}

impl QuestionPerformanceRecord {
    /// Start a history with zero attempts.
    #[must_use]
    pub fn new(
        question_id: QuestionId,
        owner_id: OwnerId,
        category: impl Into<String>,
        difficulty: u8,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            question_id,
            owner_id,
            attempts: 0,
            correct_count: 0,
            last_attempted_at: created_at,
            average_response_time_ms: 0.0,
            confidence_ratings: Vec::new(),
            is_bookmarked: false,
            category: category.into(),
            difficulty,
        }
    }

    /// Rehydrate a record from persisted storage.
    ///
    /// # Errors
    ///
    /// Returns `PerformanceError::CountMismatch` if `correct_count` exceeds
    /// `attempts`.
    #[allow(clippy::too_many_arguments)]
    pub fn from_persisted(
        question_id: QuestionId,
        owner_id: OwnerId,
        attempts: u32,
        correct_count: u32,
        last_attempted_at: DateTime<Utc>,
        average_response_time_ms: f64,
        confidence_ratings: Vec<u8>,
        is_bookmarked: bool,
        category: String,
        difficulty: u8,
    ) -> Result<Self, PerformanceError> {
        if correct_count > attempts {
            return Err(PerformanceError::CountMismatch {
                correct: correct_count,
                attempts,
            });
        }

        Ok(Self {
            question_id,
            owner_id,
            attempts,
            correct_count,
            last_attempted_at,
            average_response_time_ms,
            confidence_ratings,
            is_bookmarked,
            category,
            difficulty,
        })
    }

    // ─── Accessors ─────────────────────────────────────────────────────────────

    #[must_use]
    pub fn question_id(&self) -> QuestionId {
        self.question_id
    }

    #[must_use]
    pub fn owner_id(&self) -> OwnerId {
        self.owner_id
    }

    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    #[must_use]
    pub fn correct_count(&self) -> u32 {
        self.correct_count
    }

    #[must_use]
    pub fn last_attempted_at(&self) -> DateTime<Utc> {
        self.last_attempted_at
    }

    #[must_use]
    pub fn average_response_time_ms(&self) -> f64 {
        self.average_response_time_ms
    }

    #[must_use]
    pub fn confidence_ratings(&self) -> &[u8] {
        &self.confidence_ratings
    }

    #[must_use]
    pub fn is_bookmarked(&self) -> bool {
        self.is_bookmarked
    }

    #[must_use]
    pub fn category(&self) -> &str {
        &self.category
    }

    #[must_use]
    pub fn difficulty(&self) -> u8 {
        self.difficulty
    }

    pub fn set_bookmarked(&mut self, bookmarked: bool) {
        self.is_bookmarked = bookmarked;
    }

    /// Fraction of correct attempts. Undefined (`None`) until attempted.
    #[must_use]
    pub fn accuracy(&self) -> Option<f64> {
        if self.attempts == 0 {
            return None;
        }
        Some(f64::from(self.correct_count) / f64::from(self.attempts))
    }

    /// Mean of collected confidence ratings on the 1-5 scale.
    ///
    /// `None` when no ratings were collected; the scheduler treats that as
    /// "no confidence signal" rather than low confidence.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn average_confidence(&self) -> Option<f64> {
        if self.confidence_ratings.is_empty() {
            return None;
        }
        let sum: u32 = self.confidence_ratings.iter().map(|r| u32::from(*r)).sum();
        Some(f64::from(sum) / self.confidence_ratings.len() as f64)
    }

    /// Fold one attempt into the aggregate.
    ///
    /// `confidence` is the learner's optional self-rating for this attempt.
    ///
    /// # Errors
    ///
    /// Returns `PerformanceError::InvalidConfidence` for a rating outside 1-5.
    pub fn record_attempt(
        &mut self,
        correct: bool,
        response_time_ms: u32,
        confidence: Option<u8>,
        at: DateTime<Utc>,
    ) -> Result<(), PerformanceError> {
        if let Some(rating) = confidence {
            if !(1..=5).contains(&rating) {
                return Err(PerformanceError::InvalidConfidence(rating));
            }
        }

        let prior = f64::from(self.attempts);
        self.average_response_time_ms =
            (self.average_response_time_ms * prior + f64::from(response_time_ms)) / (prior + 1.0);

        self.attempts += 1;
        if correct {
            self.correct_count += 1;
        }
        if let Some(rating) = confidence {
            self.confidence_ratings.push(rating);
        }
        self.last_attempted_at = at;
        Ok(())
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//
