use crate::{ResponseBody, TimeoutKind};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Error type returned by this crate.
#[derive(Debug, thiserror::Error)]
pub enum HttpsError {
    /// Request could not be built. Raised before any network activity.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// Transport-level failure during an attempt.
    #[error("network error: {source}")]
    Network {
        /// Status code of the response head, if one arrived before the failure.
        status_code: Option<u16>,
        #[source]
        source: TransportError,
    },
    /// Response with status code >= 400.
    #[error("{}", server_error_message(*status_code, payload))]
    Server {
        status_code: u16,
        /// Decoded response payload.
        payload: ResponseBody,
    },
    /// Response or deadline timer fired before the call completed.
    #[error("Https Client Timeout -> {kind} passed {after_ms} ms")]
    Timeout { kind: TimeoutKind, after_ms: u64 },
    /// Call was cancelled through its [`crate::CancellationSignal`].
    #[error("request aborted")]
    Aborted,
    /// Response body does not have the requested shape.
    #[error("decode error: {0}")]
    Decode(String),
    /// Timer bookkeeping went out of sync with the call state.
    #[error("internal error: {0}")]
    Internal(String),
}

impl HttpsError {
    pub const TIMEOUT_STATUS: u16 = 408;
    pub const ABORTED_STATUS: u16 = 499;

    /// Status code attached to this failure.
    ///
    /// Timeouts report 408 and aborts 499. Network errors report the status of
    /// the response head when one was received.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Network { status_code, .. } => *status_code,
            Self::Server { status_code, .. } => Some(*status_code),
            Self::Timeout { .. } => Some(Self::TIMEOUT_STATUS),
            Self::Aborted => Some(Self::ABORTED_STATUS),
            Self::Configuration(_) | Self::Decode(_) | Self::Internal(_) => None,
        }
    }

    /// Whether the retry loop may absorb this failure.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network { .. } | Self::Server { .. })
    }
}

fn server_error_message(status_code: u16, payload: &ResponseBody) -> String {
    match payload {
        ResponseBody::Text(text) => format!(
            "Received {status_code} code. Response treated as rejection. Full response: {text}"
        ),
        other => format!("server error {status_code}: {other}"),
    }
}

/// Failure reported by a [`crate::Transport`] or by the chunk callback.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("transport error: {0}")]
    Reqwest(#[from] reqwest::Error),
    #[error("connection failed: {0}")]
    Connection(String),
    #[error("chunk handler failed: {0}")]
    ChunkHandler(#[source] BoxError),
}
