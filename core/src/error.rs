use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("request to {url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("malformed page payload: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("authentication material missing: {0}")]
    MissingAuth(String),

    #[error("message {message_id} has unparseable created_at {value:?}: {details}")]
    Timestamp {
        message_id: u64,
        value: String,
        details: String,
    },

    #[error("{operation} gave up after {attempts} consecutive failures: {last_error}")]
    RetriesExhausted {
        operation: String,
        attempts: u32,
        last_error: String,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Transient transport failures; the only category the retry controller resubmits.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Http(_) | Error::Status { .. })
    }

    pub fn is_fatal(&self) -> bool {
        !self.is_retryable()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_errors_are_retryable() {
        let err = Error::Status {
            url: "https://example.test/streams/poll".into(),
            status: 503,
        };
        assert!(err.is_retryable());
        assert!(!err.is_fatal());
    }

    #[test]
    fn decode_and_auth_failures_are_fatal() {
        let decode = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        assert!(Error::from(decode).is_fatal());
        assert!(Error::MissingAuth("csrf token".into()).is_fatal());
        assert!(Error::Protocol("cursor went forward".into()).is_fatal());
        assert!(Error::Timestamp {
            message_id: 1,
            value: "yesterday".into(),
            details: "input contains invalid characters".into(),
        }
        .is_fatal());
    }
}
