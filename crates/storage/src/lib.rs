//! Persistence boundary for the quiz study engine: remote-store contracts
//! for session and performance records, and the local durable cache used
//! for offline fallback and autosave snapshots.

#![forbid(unsafe_code)]

pub mod local_cache;
pub mod repository;
pub mod sqlite;

pub use local_cache::{LocalDurableCache, MemoryCache, PendingAnswer, SessionSnapshot};
pub use repository::{
    AnswerSubmission, InMemoryRemoteStore, PerformanceStore, RemoteStore, SessionStore,
    StorageError,
};
pub use sqlite::{SqliteCache, SqliteInitError};
