use thiserror::Error;

/// Why a question about one student could not be answered. Always turned
/// into a conversational reply.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LookupError {
    #[error("student {student_id} not found in course {course_id}")]
    NotFound {
        course_id: String,
        student_id: String,
    },

    #[error("no student id in message (expected something like S100123)")]
    MissingEntity,
}

#[derive(Error, Debug)]
pub enum AssistantError {
    #[error("data unavailable: {0}")]
    DataUnavailable(String),

    #[error("invalid record on line {line}: {reason}")]
    InvalidRecord { line: u64, reason: String },

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

pub type Result<T> = std::result::Result<T, AssistantError>;
