use chrono::{DateTime, Utc};

use crate::model::{QuestionId, QuestionPerformanceRecord};
use crate::scheduler::{self, ReviewClassification};

//
// ─── QUEUE ENTRIES ─────────────────────────────────────────────────────────────
//

/// Derived review-queue row; computed on demand, never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct ReviewQueueEntry {
    pub question_id: QuestionId,
    pub classification: ReviewClassification,
    pub days_until_due: i64,
    pub is_bookmarked: bool,
    pub last_attempted_at: DateTime<Utc>,
    /// Position inside its bucket after sorting; 0 is highest priority.
    pub priority: usize,
}

/// Partitioned review queue for presentation.
///
/// `due` and `upcoming` partition every record; `mastered` and `struggling`
/// are cross-cutting tags, so a struggling record that is also due appears
/// in both views.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReviewQueue {
    pub due: Vec<ReviewQueueEntry>,
    pub upcoming: Vec<ReviewQueueEntry>,
    pub mastered: Vec<ReviewQueueEntry>,
    pub struggling: Vec<ReviewQueueEntry>,
}

impl ReviewQueue {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.due.is_empty() && self.upcoming.is_empty()
    }
}

//
// ─── CLASSIFIER ────────────────────────────────────────────────────────────────
//

/// Partition and order performance records for review.
///
/// Due ordering front-loads remediation: struggling questions first, then
/// bookmarked ones, then the most recently attempted. Upcoming is ordered
/// soonest-due first.
#[must_use]
pub fn classify_records(
    records: &[QuestionPerformanceRecord],
    now: DateTime<Utc>,
) -> ReviewQueue {
    let mut queue = ReviewQueue::default();

    for record in records {
        let classification = scheduler::classify(record);
        let entry = ReviewQueueEntry {
            question_id: record.question_id(),
            classification,
            days_until_due: scheduler::days_until_due(record, now),
            is_bookmarked: record.is_bookmarked(),
            last_attempted_at: record.last_attempted_at(),
            priority: 0,
        };

        match classification {
            ReviewClassification::Mastered => queue.mastered.push(entry.clone()),
            ReviewClassification::Struggling => queue.struggling.push(entry.clone()),
            ReviewClassification::OnTrack => {}
        }

        if entry.days_until_due == 0 {
            queue.due.push(entry);
        } else {
            queue.upcoming.push(entry);
        }
    }

    queue.due.sort_by(|a, b| {
        let a_struggling = a.classification == ReviewClassification::Struggling;
        let b_struggling = b.classification == ReviewClassification::Struggling;
        b_struggling
            .cmp(&a_struggling)
            .then(b.is_bookmarked.cmp(&a.is_bookmarked))
            .then(b.last_attempted_at.cmp(&a.last_attempted_at))
    });
    queue.upcoming.sort_by_key(|e| e.days_until_due);

    for (i, entry) in queue.due.iter_mut().enumerate() {
        entry.priority = i;
    }
    for (i, entry) in queue.upcoming.iter_mut().enumerate() {
        entry.priority = i;
    }

    queue
}

/// Human-readable "time until next review" label.
#[must_use]
pub fn format_time_until(days: i64) -> String {
    match days {
        i64::MIN..=0 => "Due now".to_owned(),
        1 => "Tomorrow".to_owned(),
        2..=6 => format!("In {days} days"),
        7..=13 => "In 1 week".to_owned(),
        14..=29 => format!("In {} weeks", days / 7),
        30..=59 => "In 1 month".to_owned(),
        _ => format!("In {} months", days / 30),
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//
