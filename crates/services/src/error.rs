//! Shared error types for the services crate.

use thiserror::Error;

use quiz_core::model::{PerformanceError, SessionError};
use storage::repository::StorageError;

/// Errors emitted by `AnswerSyncPipeline`.
///
/// Failed remote delivery is not an error at this level; it falls back to
/// the local queue. Only a failing queue itself is reported, and it feeds
/// the pipeline's own state rather than the learner-facing flow.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SyncError {
    #[error("local answer queue unavailable")]
    CacheUnavailable(#[source] StorageError),
}

/// Errors emitted by `AutoSaveScheduler` recovery.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RecoveryError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Session(#[from] SessionError),
}

/// Errors emitted by `StudyFlowService`.
///
/// Only session state-machine violations and storage failures on read
/// paths reach the caller; sync and autosave failures are absorbed.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum FlowError {
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Performance(#[from] PerformanceError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}
