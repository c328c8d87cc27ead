use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, warn};

use quiz_core::model::{QuizSession, SessionId, SessionStatus};
use quiz_core::Clock;
use storage::local_cache::{LocalDurableCache, SessionSnapshot};

use crate::error::RecoveryError;

/// Interval between periodic snapshots of an active session.
pub const AUTOSAVE_INTERVAL_SECONDS: u64 = 15;

/// Periodically snapshots the active session into the durable cache.
///
/// Saves are best-effort: a failed write is counted and logged but never
/// interrupts the session. The snapshot is the recovery source when the
/// process restarts mid-session.
pub struct AutoSaveScheduler {
    cache: Arc<dyn LocalDurableCache>,
    clock: Clock,
    interval: Duration,
    error_count: AtomicU32,
    last_save_at: Mutex<Option<DateTime<Utc>>>,
}

impl AutoSaveScheduler {
    #[must_use]
    pub fn new(cache: Arc<dyn LocalDurableCache>, clock: Clock) -> Self {
        Self {
            cache,
            clock,
            interval: Duration::from_secs(AUTOSAVE_INTERVAL_SECONDS),
            error_count: AtomicU32::new(0),
            last_save_at: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Consecutive failed saves. Resets on the next success.
    #[must_use]
    pub fn error_count(&self) -> u32 {
        self.error_count.load(Ordering::Relaxed)
    }

    /// Time of the most recent successful save.
    #[must_use]
    pub fn last_save_at(&self) -> Option<DateTime<Utc>> {
        self.last_save_at.lock().ok().and_then(|g| *g)
    }

    /// Snapshot the session now. Never raises; failures are counted.
    pub async fn save_now(&self, session: &QuizSession) {
        let saved_at = self.clock.now();
        let snapshot = SessionSnapshot::of(session, saved_at);
        match self.cache.save_snapshot(&snapshot).await {
            Ok(()) => {
                self.error_count.store(0, Ordering::Relaxed);
                if let Ok(mut guard) = self.last_save_at.lock() {
                    *guard = Some(saved_at);
                }
                debug!(session = %session.id(), "session snapshot saved");
            }
            Err(err) => {
                self.error_count.fetch_add(1, Ordering::Relaxed);
                warn!(session = %session.id(), error = %err, "session snapshot failed");
            }
        }
    }

    /// Rebuild a session from its latest snapshot, `None` when absent.
    ///
    /// # Errors
    ///
    /// Returns `RecoveryError` if the snapshot cannot be read or describes
    /// an inconsistent session shape.
    pub async fn recover(
        &self,
        session_id: SessionId,
    ) -> Result<Option<QuizSession>, RecoveryError> {
        let Some(snapshot) = self.cache.load_snapshot(session_id).await? else {
            return Ok(None);
        };
        let session = snapshot.restore(self.clock.now())?;
        Ok(Some(session))
    }

    /// Drop the snapshot once the session reaches a terminal state.
    pub async fn discard(&self, session_id: SessionId) {
        if let Err(err) = self.cache.clear_snapshot(session_id).await {
            warn!(session = %session_id, error = %err, "snapshot discard failed");
        }
    }

    /// Snapshot the shared session on every interval until it leaves the
    /// active state.
    pub async fn run(self: Arc<Self>, session: Arc<AsyncMutex<QuizSession>>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            let guard = session.lock().await;
            if guard.status() != SessionStatus::Active {
                break;
            }
            self.save_now(&guard).await;
        }
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//
