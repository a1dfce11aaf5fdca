use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::{format_ms, Span};

#[derive(Debug)]
pub enum EngineError {
    /// Missing or malformed input; never retried.
    InvalidArgument(String),
    /// The exact range is not a free slot (never existed, already booked, or time mismatch).
    SlotUnavailable {
        mentor_id: String,
        date: NaiveDate,
        span: Span,
    },
    /// No caller identity on the request.
    Unauthenticated,
    /// Caller is not allowed to touch this record.
    Unauthorized(String),
    NotFound(String),
    AlreadyExists(Ulid),
    /// Compare-and-swap on an availability day lost.
    VersionConflict { expected: u64, actual: u64 },
    LimitExceeded(&'static str),
    WalError(String),
}

impl EngineError {
    pub fn booking_not_found(id: Ulid) -> Self {
        EngineError::NotFound(format!("booking {id}"))
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::InvalidArgument(msg) => write!(f, "invalid argument: {msg}"),
            EngineError::SlotUnavailable {
                mentor_id,
                date,
                span,
            } => write!(
                f,
                "slot unavailable: mentor {mentor_id} on {date} has no free slot [{}, {})",
                format_ms(span.start),
                format_ms(span.end)
            ),
            EngineError::Unauthenticated => write!(f, "missing caller identity"),
            EngineError::Unauthorized(msg) => write!(f, "not authorized: {msg}"),
            EngineError::NotFound(what) => write!(f, "not found: {what}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::VersionConflict { expected, actual } => {
                write!(f, "version conflict: expected {expected}, found {actual}")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
