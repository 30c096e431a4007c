use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use serde::de::DeserializeOwned;

use crate::{error::BoxError, HttpsError, TransportError};

/// Header mapping. Keys are unique and kept exactly as supplied.
pub type Headers = BTreeMap<String, String>;

/// Per-chunk body callback. An `Err` stops the attempt as a network error.
pub type ChunkHandler = Box<dyn FnMut(&Bytes) -> Result<(), BoxError> + Send>;

/// Receives one [`Warning`] per failed attempt when `verbose` is set.
pub type WarningHandler = Arc<dyn Fn(&Warning) + Send + Sync>;

/// Key injected into decoded JSON objects carrying the HTTP status.
pub const STATUS_CODE_FIELD: &str = "statusCode";

/// Decoded response payload.
#[derive(Clone, Debug, PartialEq)]
pub enum ResponseBody {
    /// JSON document. Objects carry a `statusCode` field.
    Json(serde_json::Value),
    /// Raw text that could not be parsed under a JSON `Accept`.
    Text(String),
    /// Body chunks were handed to a chunk callback instead of buffered.
    Streamed { bytes: u64 },
}

impl fmt::Display for ResponseBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Json(value) => write!(f, "{value}"),
            Self::Text(text) => f.write_str(text),
            Self::Streamed { bytes } => write!(f, "<streamed {bytes} bytes>"),
        }
    }
}

/// Successful call result.
#[derive(Clone, Debug, PartialEq)]
pub struct Response {
    pub status_code: u16,
    pub headers: Headers,
    pub body: ResponseBody,
}

impl Response {
    /// Deserializes a JSON body into `T`.
    pub fn json<T: DeserializeOwned>(&self) -> crate::Result<T> {
        match &self.body {
            ResponseBody::Json(value) => T::deserialize(value).map_err(|err| {
                HttpsError::Decode(format!("response does not match target type: {err}"))
            }),
            other => Err(HttpsError::Decode(format!(
                "response body is not JSON: {other}"
            ))),
        }
    }
}

/// Which timer ended a call.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TimeoutKind {
    /// No byte arrived within the response timeout.
    Response,
    /// The overall deadline elapsed.
    Deadline,
}

impl fmt::Display for TimeoutKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Response => f.write_str("Response"),
            Self::Deadline => f.write_str("Deadline"),
        }
    }
}

/// Result of one attempt, produced exactly once per attempt.
#[derive(Debug)]
pub enum AttemptOutcome {
    Success(Response),
    ServerError {
        status_code: u16,
        payload: ResponseBody,
    },
    NetworkError {
        status_code: Option<u16>,
        cause: TransportError,
    },
}

impl AttemptOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Success(response) => Some(response.status_code),
            Self::ServerError { status_code, .. } => Some(*status_code),
            Self::NetworkError { status_code, .. } => *status_code,
        }
    }

    /// Converts into the caller-facing result.
    pub fn into_result(self) -> crate::Result<Response> {
        match self {
            Self::Success(response) => Ok(response),
            Self::ServerError {
                status_code,
                payload,
            } => Err(HttpsError::Server {
                status_code,
                payload,
            }),
            Self::NetworkError { status_code, cause } => Err(HttpsError::Network {
                status_code,
                source: cause,
            }),
        }
    }
}

/// Failed attempt reported to the warning handler.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Warning {
    /// One-based attempt number.
    pub attempt: usize,
    pub status_code: Option<u16>,
    pub message: String,
}

/// Warning handler that forwards to `tracing` (a no-op without the `tracing` feature).
pub fn tracing_warning_handler() -> WarningHandler {
    Arc::new(|warning: &Warning| {
        #[cfg(feature = "tracing")]
        tracing::warn!(
            attempt = warning.attempt,
            status_code = ?warning.status_code,
            "{}",
            warning.message
        );

        #[cfg(not(feature = "tracing"))]
        let _ = warning;
    })
}
