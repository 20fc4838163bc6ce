//! Shared error taxonomy for the feed core.
//!
//! Kinds mirror the design: transport/protocol/rate-limit/shape errors are
//! recovered locally by strategies and never surfaced to consumers; only
//! [`Error::Misuse`] is raised synchronously to callers.

/// A helper Result type.
pub type Result<T> = std::result::Result<T, Error>;

/// The error taxonomy shared across adapters, strategies, and the controller.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Connection refused, DNS/TLS failure, socket closed unexpectedly, timeout.
    #[error("transport error: {0}")]
    Transport(String),

    /// Status code >= 400, an exchange error envelope in a 200 body, or a
    /// WebSocket close with a non-normal code.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A specialization of `Protocol`, signalled by 429 or a well-known
    /// error envelope. Carries a `Retry-After` hint in seconds if the
    /// exchange provided one.
    #[error("rate limited{}", .retry_after_secs.map(|s| format!(", retry after {s}s")).unwrap_or_default())]
    RateLimit {
        /// Hint from the exchange, honored by strategies when present.
        retry_after_secs: Option<u64>,
    },

    /// Response parsed as JSON but did not match the expected layout, or a
    /// frame was missing required fields. Never fatal: callers are expected
    /// to skip and continue.
    #[error("shape error: {0}")]
    Shape(String),

    /// The controller is stopping; in-flight operations unwind without
    /// writing to the store.
    #[error("cancelled")]
    Cancelled,

    /// Invalid interval, unknown exchange, duplicate start/registration.
    /// Raised synchronously to the caller; not recoverable by the core.
    #[error("misuse: {0}")]
    Misuse(String),
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if let Some(status) = e.status() {
            if status.as_u16() == 429 {
                return Error::RateLimit {
                    retry_after_secs: None,
                };
            }
            return Error::Protocol(format!("HTTP {status}: {e}"));
        }
        Error::Transport(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Shape(e.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Error::Transport(e.to_string())
    }
}
