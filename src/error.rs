//! Error types for the bridge.

use thiserror::Error;

/// Errors produced by the relay bridge.
#[derive(Error, Debug)]
pub enum BridgeError {
    /// An error envelope returned by the broker API.
    #[error("broker API error ({code}): {message}")]
    Api {
        /// The error code from the broker.
        code: String,
        /// The error message from the broker.
        message: String,
        /// The HTTP status code.
        status: u16,
    },

    /// An HTTP request error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// A JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Inbound envelope signature did not verify.
    #[error("envelope signature verification failed")]
    BadSignature,

    /// Inbound envelope ciphertext could not be opened with our box key.
    #[error("envelope decryption failed")]
    Decrypt,

    /// Outbound payload encryption failed.
    #[error("payload encryption failed")]
    Encrypt,

    /// A `/reply` referenced a thread handle that was evicted or never issued.
    #[error("unknown thread_id: {0}")]
    UnknownThread(String),

    /// The local agent RPC transport failed.
    #[error("agent transport error: {0}")]
    AgentTransport(String),

    /// The agent did not acknowledge delivery within the timeout ceiling.
    #[error("agent delivery timed out after {0}s")]
    AgentTimeout(u64),

    /// Unrecoverable configuration problem; requires operator intervention.
    #[error("fatal configuration error: {0}")]
    FatalConfig(String),
}

impl BridgeError {
    /// Create a new broker API error.
    pub fn api(code: impl Into<String>, message: impl Into<String>, status: u16) -> Self {
        Self::Api {
            code: code.into(),
            message: message.into(),
            status,
        }
    }

    /// Transient-network failures: retried via the poll loop's backoff.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Api { status, .. } => *status >= 500 && *status <= 599,
            Self::Http(e) => e.is_connect() || e.is_timeout(),
            _ => false,
        }
    }

    /// Poison failures: the message can never be verified/decrypted and is
    /// acked and dropped after one attempt.
    pub fn is_poison(&self) -> bool {
        matches!(self, Self::BadSignature | Self::Decrypt)
    }

    /// Fatal failures propagate out of the event loop and exit the process.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::FatalConfig(_))
    }
}

/// Result type alias for bridge operations.
pub type Result<T> = std::result::Result<T, BridgeError>;
