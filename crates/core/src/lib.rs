//! Domain core for the quiz study engine: session lifecycle, performance
//! aggregates, and the adaptive review scheduler. Pure and deterministic;
//! persistence and I/O live in the `storage` and `services` crates.

#![forbid(unsafe_code)]

pub mod error;
pub mod model;
pub mod review_queue;
pub mod scheduler;
pub mod time;

pub use error::Error;
pub use time::Clock;
