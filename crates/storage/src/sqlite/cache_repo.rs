use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::sqlite::SqliteRow;
use uuid::Uuid;

use quiz_core::model::{OwnerId, QuestionId, RecordedAnswer, SessionId, SessionMode};

use super::SqliteCache;
use crate::local_cache::{LocalDurableCache, PendingAnswer, SessionSnapshot};
use crate::repository::{AnswerSubmission, StorageError};

fn mode_as_str(mode: SessionMode) -> &'static str {
    match mode {
        SessionMode::Quick => "quick",
        SessionMode::Timed => "timed",
        SessionMode::Custom => "custom",
    }
}

fn mode_from_str(value: &str) -> Result<SessionMode, StorageError> {
    match value {
        "quick" => Ok(SessionMode::Quick),
        "timed" => Ok(SessionMode::Timed),
        "custom" => Ok(SessionMode::Custom),
        other => Err(StorageError::Serialization(format!(
            "unknown session mode: {other}"
        ))),
    }
}

fn uuid_column(row: &SqliteRow, column: &str) -> Result<Uuid, StorageError> {
    let text: String = row
        .try_get(column)
        .map_err(|e| StorageError::Serialization(e.to_string()))?;
    Uuid::parse_str(&text).map_err(|e| StorageError::Serialization(e.to_string()))
}

fn index_u32(value: i64) -> Result<u32, StorageError> {
    u32::try_from(value).map_err(|_| StorageError::Serialization("index overflow".into()))
}

fn map_pending_row(row: &SqliteRow) -> Result<PendingAnswer, StorageError> {
    let session_id = SessionId::from_uuid(uuid_column(row, "session_id")?);
    let question_index: i64 = row
        .try_get("question_index")
        .map_err(|e| StorageError::Serialization(e.to_string()))?;
    let answer_index: i64 = row
        .try_get("answer_index")
        .map_err(|e| StorageError::Serialization(e.to_string()))?;
    let response_time_ms: i64 = row
        .try_get("response_time_ms")
        .map_err(|e| StorageError::Serialization(e.to_string()))?;
    let submitted_at: DateTime<Utc> = row
        .try_get("submitted_at")
        .map_err(|e| StorageError::Serialization(e.to_string()))?;
    let queued_at: DateTime<Utc> = row
        .try_get("queued_at")
        .map_err(|e| StorageError::Serialization(e.to_string()))?;

    Ok(PendingAnswer {
        submission: AnswerSubmission {
            session_id,
            question_index: index_u32(question_index)?,
            answer_index: index_u32(answer_index)?,
            response_time_ms: index_u32(response_time_ms)?,
            submitted_at,
        },
        queued_at,
    })
}

fn map_snapshot_row(row: &SqliteRow) -> Result<SessionSnapshot, StorageError> {
    let session_id = SessionId::from_uuid(uuid_column(row, "session_id")?);
    let owner_id = OwnerId::from_uuid(uuid_column(row, "owner_id")?);
    let mode_text: String = row
        .try_get("mode")
        .map_err(|e| StorageError::Serialization(e.to_string()))?;
    let question_ids_json: String = row
        .try_get("question_ids")
        .map_err(|e| StorageError::Serialization(e.to_string()))?;
    let answers_json: String = row
        .try_get("answers")
        .map_err(|e| StorageError::Serialization(e.to_string()))?;
    let current_index: i64 = row
        .try_get("current_index")
        .map_err(|e| StorageError::Serialization(e.to_string()))?;
    let started_at: DateTime<Utc> = row
        .try_get("started_at")
        .map_err(|e| StorageError::Serialization(e.to_string()))?;
    let time_remaining: Option<i64> = row
        .try_get("time_remaining")
        .map_err(|e| StorageError::Serialization(e.to_string()))?;
    let abandoned_at: Option<DateTime<Utc>> = row
        .try_get("abandoned_at")
        .map_err(|e| StorageError::Serialization(e.to_string()))?;
    let saved_at: DateTime<Utc> = row
        .try_get("saved_at")
        .map_err(|e| StorageError::Serialization(e.to_string()))?;

    let question_ids: Vec<QuestionId> = serde_json::from_str(&question_ids_json)
        .map_err(|e| StorageError::Serialization(e.to_string()))?;
    let answers: Vec<Option<RecordedAnswer>> = serde_json::from_str(&answers_json)
        .map_err(|e| StorageError::Serialization(e.to_string()))?;

    Ok(SessionSnapshot {
        session_id,
        owner_id,
        mode: mode_from_str(&mode_text)?,
        question_ids,
        answers,
        current_index: usize::try_from(current_index)
            .map_err(|_| StorageError::Serialization("current_index overflow".into()))?,
        started_at,
        time_remaining,
        abandoned_at,
        saved_at,
    })
}

#[async_trait::async_trait]
impl LocalDurableCache for SqliteCache {
    async fn append_pending(&self, pending: &PendingAnswer) -> Result<(), StorageError> {
        sqlx::query(
            r"
            INSERT INTO pending_answers (
                session_id, question_index, answer_index, response_time_ms,
                submitted_at, queued_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(session_id, question_index) DO UPDATE SET
                -- keep the original queue position; only refresh the payload
                answer_index = excluded.answer_index,
                response_time_ms = excluded.response_time_ms,
                submitted_at = excluded.submitted_at
            ",
        )
        .bind(pending.submission.session_id.value().to_string())
        .bind(i64::from(pending.submission.question_index))
        .bind(i64::from(pending.submission.answer_index))
        .bind(i64::from(pending.submission.response_time_ms))
        .bind(pending.submission.submitted_at)
        .bind(pending.queued_at)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Unavailable(e.to_string()))?;

        Ok(())
    }

    async fn pending_answers(&self) -> Result<Vec<PendingAnswer>, StorageError> {
        let rows = sqlx::query(
            r"
            SELECT session_id, question_index, answer_index, response_time_ms,
                   submitted_at, queued_at
            FROM pending_answers
            ORDER BY id
            ",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::Unavailable(e.to_string()))?;

        rows.iter().map(map_pending_row).collect()
    }

    async fn remove_pending(
        &self,
        session_id: SessionId,
        question_index: u32,
    ) -> Result<(), StorageError> {
        sqlx::query(
            "DELETE FROM pending_answers WHERE session_id = ?1 AND question_index = ?2",
        )
        .bind(session_id.value().to_string())
        .bind(i64::from(question_index))
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Unavailable(e.to_string()))?;

        Ok(())
    }

    async fn save_snapshot(&self, snapshot: &SessionSnapshot) -> Result<(), StorageError> {
        let question_ids = serde_json::to_string(&snapshot.question_ids)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        let answers = serde_json::to_string(&snapshot.answers)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;

        sqlx::query(
            r"
            INSERT INTO session_snapshots (
                session_id, owner_id, mode, question_ids, answers,
                current_index, started_at, time_remaining, abandoned_at,
                saved_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ON CONFLICT(session_id) DO UPDATE SET
                answers = excluded.answers,
                current_index = excluded.current_index,
                time_remaining = excluded.time_remaining,
                abandoned_at = excluded.abandoned_at,
                saved_at = excluded.saved_at
            ",
        )
        .bind(snapshot.session_id.value().to_string())
        .bind(snapshot.owner_id.value().to_string())
        .bind(mode_as_str(snapshot.mode))
        .bind(question_ids)
        .bind(answers)
        .bind(
            i64::try_from(snapshot.current_index)
                .map_err(|_| StorageError::Serialization("current_index overflow".into()))?,
        )
        .bind(snapshot.started_at)
        .bind(snapshot.time_remaining)
        .bind(snapshot.abandoned_at)
        .bind(snapshot.saved_at)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Unavailable(e.to_string()))?;

        Ok(())
    }

    async fn load_snapshot(
        &self,
        session_id: SessionId,
    ) -> Result<Option<SessionSnapshot>, StorageError> {
        let row = sqlx::query(
            r"
            SELECT session_id, owner_id, mode, question_ids, answers,
                   current_index, started_at, time_remaining, abandoned_at,
                   saved_at
            FROM session_snapshots
            WHERE session_id = ?1
            ",
        )
        .bind(session_id.value().to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StorageError::Unavailable(e.to_string()))?;

        row.as_ref().map(map_snapshot_row).transpose()
    }

    async fn clear_snapshot(&self, session_id: SessionId) -> Result<(), StorageError> {
        sqlx::query("DELETE FROM session_snapshots WHERE session_id = ?1")
            .bind(session_id.value().to_string())
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Unavailable(e.to_string()))?;

        Ok(())
    }
}
