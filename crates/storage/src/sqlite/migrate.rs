use chrono::Utc;
use sqlx::SqlitePool;

use super::SqliteInitError;

/// Runs a single, consolidated migration for the current schema.
///
/// Creates the pending-answers queue and the session-snapshot table.
pub async fn run_migrations(pool: &SqlitePool) -> Result<(), SqliteInitError> {
    async fn is_applied(pool: &SqlitePool, version: i64) -> Result<bool, sqlx::Error> {
        let row = sqlx::query("SELECT 1 FROM schema_migrations WHERE version = ?1")
            .bind(version)
            .fetch_optional(pool)
            .await?;
        Ok(row.is_some())
    }

    sqlx::query(
        r"
            CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            );
            ",
    )
    .execute(pool)
    .await?;

    // Version 1: full schema.
    if !is_applied(pool, 1).await? {
        let mut tx = pool.begin().await?;

        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS pending_answers (
                    id INTEGER PRIMARY KEY,
                    session_id TEXT NOT NULL,
                    question_index INTEGER NOT NULL CHECK (question_index >= 0),
                    answer_index INTEGER NOT NULL CHECK (answer_index >= 0),
                    response_time_ms INTEGER NOT NULL CHECK (response_time_ms >= 0),
                    submitted_at TEXT NOT NULL,
                    queued_at TEXT NOT NULL,
                    UNIQUE (session_id, question_index)
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS session_snapshots (
                    session_id TEXT PRIMARY KEY,
                    owner_id TEXT NOT NULL,
                    mode TEXT NOT NULL,
                    question_ids TEXT NOT NULL,
                    answers TEXT NOT NULL,
                    current_index INTEGER NOT NULL CHECK (current_index >= 0),
                    started_at TEXT NOT NULL,
                    time_remaining INTEGER,
                    abandoned_at TEXT,
                    saved_at TEXT NOT NULL
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query("INSERT INTO schema_migrations (version, applied_at) VALUES (1, ?1)")
            .bind(Utc::now().to_rfc3339())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
    }

    Ok(())
}
