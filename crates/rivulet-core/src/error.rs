use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("unknown media type: {0}")]
    UnknownMediaType(String),
    #[error("invalid time range: start {start} is after end {end}")]
    InvalidRange { start: String, end: String },
}

pub type CoreResult<T> = Result<T, CoreError>;
