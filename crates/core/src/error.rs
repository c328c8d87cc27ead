use thiserror::Error;

use crate::model::{PerformanceError, SessionError};

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Performance(#[from] PerformanceError),
}
