mod ids;
mod performance;
mod session;

pub use ids::{OwnerId, QuestionId, SessionId};
pub use performance::{PerformanceError, QuestionPerformanceRecord};
pub use session::{
    Advance, QuizSession, RecordedAnswer, SessionError, SessionMode, SessionStatus, SessionView,
    RESUME_WINDOW_HOURS, TIMED_SESSION_SECONDS,
};
