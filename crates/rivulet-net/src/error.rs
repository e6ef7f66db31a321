use thiserror::Error;

/// Centralized error type for rivulet-net
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NetError {
    #[error("HTTP request failed: {0}")]
    Http(String),
    #[error("Invalid range: {0}")]
    InvalidRange(String),
    #[error("Timeout")]
    Timeout,
    #[error("Cancelled")]
    Cancelled,
    #[error("Request failed after {max_retries} retries: {source}")]
    RetryExhausted {
        max_retries: u32,
        source: Box<NetError>,
    },
    #[error("HTTP {status} for URL: {url}")]
    HttpStatus { status: u16, url: String },
}

impl NetError {
    /// Creates an HTTP status error
    pub fn http_status(status: u16, url: impl Into<String>) -> Self {
        Self::HttpStatus {
            status,
            url: url.into(),
        }
    }

    /// Creates an HTTP error from a generic string
    pub fn http<S: Into<String>>(msg: S) -> Self {
        Self::Http(msg.into())
    }

    /// Checks if this error is worth an immediate same-URL retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            NetError::Http(msg) => {
                msg.contains("timeout") || msg.contains("connection") || msg.contains("network")
            }
            NetError::Timeout => true,
            NetError::HttpStatus { status, .. } => {
                *status >= 500 || *status == 429 || *status == 408
            }
            NetError::RetryExhausted { .. } | NetError::InvalidRange(_) | NetError::Cancelled => {
                false
            }
        }
    }

    /// Checks if this error indicates a timeout
    pub fn is_timeout(&self) -> bool {
        match self {
            NetError::Timeout => true,
            NetError::HttpStatus { status, .. } => *status == 408,
            NetError::RetryExhausted { source, .. } => source.is_timeout(),
            _ => false,
        }
    }

    /// Gets the HTTP status code, looking through retry wrappers.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            NetError::HttpStatus { status, .. } => Some(*status),
            NetError::Timeout => Some(408),
            NetError::RetryExhausted { source, .. } => source.status_code(),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for NetError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            return Self::Timeout;
        }
        match (error.status(), error.url()) {
            (Some(status), Some(url)) => Self::http_status(status.as_u16(), url.as_str()),
            _ => Self::Http(error.to_string()),
        }
    }
}

pub type NetResult<T> = Result<T, NetError>;

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(NetError::Timeout, true)]
    #[case(NetError::http_status(503, "http://a/b"), true)]
    #[case(NetError::http_status(429, "http://a/b"), true)]
    #[case(NetError::http_status(404, "http://a/b"), false)]
    #[case(NetError::Http("connection reset".to_string()), true)]
    #[case(NetError::Http("bad body".to_string()), false)]
    #[case(NetError::Cancelled, false)]
    fn classifies_retryable_errors(#[case] error: NetError, #[case] expected: bool) {
        assert_eq!(error.is_retryable(), expected);
    }

    #[test]
    fn status_code_looks_through_retry_wrapper() {
        let err = NetError::RetryExhausted {
            max_retries: 2,
            source: Box::new(NetError::http_status(502, "http://a/b")),
        };
        assert_eq!(err.status_code(), Some(502));
        assert!(!err.is_retryable());
    }

    #[test]
    fn timeout_reports_request_timeout_status() {
        assert_eq!(NetError::Timeout.status_code(), Some(408));
        assert!(NetError::http_status(408, "u").is_timeout());
    }
}
