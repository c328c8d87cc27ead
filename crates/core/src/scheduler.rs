use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::QuestionPerformanceRecord;

//
// ─── CLASSIFICATION ────────────────────────────────────────────────────────────
//

/// Performance-based classification that may override the interval table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewClassification {
    /// High accuracy, high confidence, enough attempts: pushed far out.
    Mastered,
    /// Low accuracy or low confidence: pulled in to the shortest interval.
    Struggling,
    /// Everything else follows the attempts-indexed progression.
    OnTrack,
}

//
// ─── INTERVAL TABLE ────────────────────────────────────────────────────────────
//

/// Review interval per attempt count, first attempt onward.
/// Attempts beyond the table reuse the last entry.
pub const REVIEW_INTERVALS_DAYS: [i64; 5] = [1, 3, 7, 14, 30];

/// Interval for mastered questions.
pub const MASTERED_INTERVAL_DAYS: i64 = 90;

/// Interval for struggling questions.
pub const STRUGGLING_INTERVAL_DAYS: i64 = 1;

const MASTERY_MIN_ACCURACY: f64 = 0.9;
const MASTERY_MIN_CONFIDENCE: f64 = 4.0;
const MASTERY_MIN_ATTEMPTS: u32 = 3;
const STRUGGLE_MAX_ACCURACY: f64 = 0.5;
const STRUGGLE_MAX_CONFIDENCE: f64 = 2.0;

//
// ─── SCHEDULER ─────────────────────────────────────────────────────────────────
//

/// Classify a record against the mastery/struggle override rules.
///
/// A record with no attempts or no confidence ratings never triggers an
/// override from the missing signal; it falls through to the table.
#[must_use]
pub fn classify(record: &QuestionPerformanceRecord) -> ReviewClassification {
    let accuracy = record.accuracy();
    let confidence = record.average_confidence();

    let mastered = record.attempts() >= MASTERY_MIN_ATTEMPTS
        && accuracy.is_some_and(|a| a >= MASTERY_MIN_ACCURACY)
        && confidence.is_some_and(|c| c >= MASTERY_MIN_CONFIDENCE);
    if mastered {
        return ReviewClassification::Mastered;
    }

    let struggling = accuracy.is_some_and(|a| a < STRUGGLE_MAX_ACCURACY)
        || confidence.is_some_and(|c| c < STRUGGLE_MAX_CONFIDENCE);
    if struggling {
        return ReviewClassification::Struggling;
    }

    ReviewClassification::OnTrack
}

/// Days until the question should be seen again, counted from the last
/// attempt. Override rules win over the attempts-indexed table.
#[must_use]
pub fn next_interval_days(record: &QuestionPerformanceRecord) -> i64 {
    match classify(record) {
        ReviewClassification::Mastered => MASTERED_INTERVAL_DAYS,
        ReviewClassification::Struggling => STRUGGLING_INTERVAL_DAYS,
        ReviewClassification::OnTrack => {
            let index = (record.attempts().max(1) as usize - 1)
                .min(REVIEW_INTERVALS_DAYS.len() - 1);
            REVIEW_INTERVALS_DAYS[index]
        }
    }
}

/// Days remaining before the record is due, clamped at zero.
///
/// A record is due when this returns 0.
#[must_use]
pub fn days_until_due(record: &QuestionPerformanceRecord, now: DateTime<Utc>) -> i64 {
    let elapsed_days = (now - record.last_attempted_at()).num_days();
    (next_interval_days(record) - elapsed_days).max(0)
}

/// Whether the record's computed review interval has elapsed.
#[must_use]
pub fn is_due(record: &QuestionPerformanceRecord, now: DateTime<Utc>) -> bool {
    days_until_due(record, now) == 0
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{OwnerId, QuestionId};
    use crate::time::fixed_now;
    use chrono::Duration;
    use uuid::Uuid;

    fn record_with(
        attempts: u32,
        correct: u32,
        ratings: &[u8],
    ) -> QuestionPerformanceRecord {
        QuestionPerformanceRecord::from_persisted(
            QuestionId::new(1),
            OwnerId::from_uuid(Uuid::from_u128(1)),
            attempts,
            correct,
            fixed_now(),
            1200.0,
            ratings.to_vec(),
            false,
            "pharmacology".into(),
            3,
        )
        .unwrap()
    }

    #[test]
    fn single_perfect_attempt_is_not_mastered() {
        // accuracy 1.0 and confidence 5, but attempts < 3
        let record = record_with(1, 1, &[5]);
        assert_eq!(classify(&record), ReviewClassification::OnTrack);
        assert_eq!(next_interval_days(&record), REVIEW_INTERVALS_DAYS[0]);
    }

    #[test]
    fn high_accuracy_and_confidence_with_enough_attempts_is_mastered() {
        // accuracy 0.95 ≈ 19/20, confidence 4.5
        let record = record_with(20, 19, &[4, 5]);
        assert_eq!(classify(&record), ReviewClassification::Mastered);
        assert_eq!(next_interval_days(&record), MASTERED_INTERVAL_DAYS);
    }

    #[test]
    fn low_accuracy_overrides_the_table() {
        // accuracy 0.3, confidence 1.5: table would say 30 days
        let record = record_with(10, 3, &[1, 2]);
        assert_eq!(classify(&record), ReviewClassification::Struggling);
        assert_eq!(next_interval_days(&record), STRUGGLING_INTERVAL_DAYS);
    }

    #[test]
    fn low_confidence_alone_is_struggling() {
        let record = record_with(4, 3, &[1, 1, 2, 2]);
        assert_eq!(classify(&record), ReviewClassification::Struggling);
    }

    #[test]
    fn table_progression_clamps_at_last_entry() {
        let ratings = [3, 3, 3];
        assert_eq!(next_interval_days(&record_with(2, 2, &ratings)), 3);
        assert_eq!(next_interval_days(&record_with(5, 4, &ratings)), 30);
        assert_eq!(next_interval_days(&record_with(9, 7, &ratings)), 30);
    }

    #[test]
    fn empty_ratings_fall_through_to_table() {
        // would be mastered on accuracy alone; missing confidence blocks it
        let record = record_with(4, 4, &[]);
        assert_eq!(classify(&record), ReviewClassification::OnTrack);
        assert_eq!(next_interval_days(&record), REVIEW_INTERVALS_DAYS[3]);
    }

    #[test]
    fn days_until_due_clamps_at_zero() {
        let record = record_with(1, 1, &[3]);
        let now = fixed_now();

        assert_eq!(days_until_due(&record, now), 1);
        assert!(!is_due(&record, now));

        let later = now + Duration::days(5);
        assert_eq!(days_until_due(&record, later), 0);
        assert!(is_due(&record, later));
    }
}
