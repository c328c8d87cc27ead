//! Orchestration layer: session flow, resilient answer sync, autosave.
//!
//! Builds on `quiz-core` for the domain rules and `storage` for the remote
//! and local stores. Nothing here blocks the learner on the network:
//! remote writes are fire-and-forget, with the local durable cache as the
//! fallback of record.

#![forbid(unsafe_code)]

pub mod autosave;
pub mod error;
pub mod network;
pub mod retry;
pub mod session_flow;
pub mod sync;

pub use autosave::{AutoSaveScheduler, AUTOSAVE_INTERVAL_SECONDS};
pub use error::{FlowError, RecoveryError, SyncError};
pub use network::{ConnectivityHandle, NetworkMonitor};
pub use retry::RetryPolicy;
pub use session_flow::StudyFlowService;
pub use sync::{AnswerSyncPipeline, ReconcileReport, SubmitOutcome};
