use rivulet_net::NetError;
use thiserror::Error;

/// Failures reported by an [`IndexResolver`](crate::IndexResolver).
#[derive(Debug, Error, Clone, PartialEq)]
pub enum IndexError {
    /// Requested time precedes the earliest available fragment.
    #[error("time precedes available content (earliest {earliest}s)")]
    BeforeAvailable { earliest: f64 },
    /// No fragment covers the time yet.
    #[error("no fragment available at {time}s")]
    NotAvailable { time: f64 },
    #[error("malformed index: {0}")]
    Malformed(String),
}

/// Failures reported by a [`MediaBufferSink`](crate::MediaBufferSink).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SinkError {
    #[error("buffer quota exceeded")]
    QuotaExceeded,
    #[error("buffer closed")]
    Closed,
    #[error("append rejected: {0}")]
    Rejected(String),
}

/// Outcome of a fragment fetch that did not produce bytes.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum LoadError {
    #[error("transient network failure: {0}")]
    Transient(#[from] NetError),
    /// Every origin and quality combination failed.
    #[error("all sources exhausted for fragment at {start}s after {attempts} attempts")]
    Exhausted { start: f64, attempts: usize },
    #[error("fragment at {time}s not found on any source")]
    NotFound { time: f64 },
    #[error("request aborted")]
    Aborted,
}

/// Top-level error of a buffer controller.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum StreamError {
    #[error("load failed: {0}")]
    Load(#[from] LoadError),
    #[error("index resolution failed: {0}")]
    Index(#[from] IndexError),
    #[error("media sink failed: {0}")]
    Sink(#[from] SinkError),
    #[error("adaptation has no representation")]
    NoRepresentation,
    #[error("live edge not found in availability window")]
    LiveEdgeNotFound,
    #[error("controller stopped")]
    Stopped,
}

impl StreamError {
    /// Whether the controller can resume after this error.
    pub fn is_terminal(&self) -> bool {
        !matches!(
            self,
            StreamError::Index(IndexError::BeforeAvailable { .. } | IndexError::NotAvailable { .. })
        )
    }
}

pub type StreamResult<T> = Result<T, StreamError>;

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(StreamError::Index(IndexError::BeforeAvailable { earliest: 3.0 }), false)]
    #[case(StreamError::Index(IndexError::NotAvailable { time: 3.0 }), false)]
    #[case(StreamError::Index(IndexError::Malformed("sidx".into())), true)]
    #[case(StreamError::Load(LoadError::Exhausted { start: 2.0, attempts: 4 }), true)]
    #[case(StreamError::Sink(SinkError::Closed), true)]
    fn terminal_errors(#[case] error: StreamError, #[case] terminal: bool) {
        assert_eq!(error.is_terminal(), terminal);
    }

    #[test]
    fn net_error_converts_to_transient_load_error() {
        let err: LoadError = NetError::Timeout.into();
        assert_eq!(err, LoadError::Transient(NetError::Timeout));
    }
}
