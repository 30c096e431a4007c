//! `https-call` runs single HTTP(S) calls with two independent timeouts,
//! bounded retries and cancellation.
//!
//! Each call races the in-flight attempt against:
//! - a response timeout (time to first byte, disabled once a byte arrives),
//! - a deadline (total time budget, armed once for all attempts),
//! - an optional [`CancellationSignal`].
//!
//! The first event to resolve decides the outcome. Failed attempts (status
//! >= 400 or transport failures) are retried up to `max_retries` times; a
//! timeout (408) or abort (499) ends the call immediately.
//!
//! Entry points:
//! - [`HttpsClient::get`], [`HttpsClient::post`], [`HttpsClient::put`], [`HttpsClient::delete`]
//! - [`HttpsClient::call`] with a [`CallRequest`]

mod cancel;
mod classify;
mod client;
mod error;
mod invoke;
mod options;
mod request;
mod retry;
mod timeout;
mod transport;
mod types;

pub use cancel::CancellationSignal;
pub use classify::classify;
pub use client::{CallRequest, HttpsClient};
pub use error::{BoxError, HttpsError, TransportError};
pub use invoke::decode_body;
pub use options::CallOptions;
pub use request::{header_value, Method, RequestDescriptor, Scheme};
pub use timeout::TimeoutRace;
pub use transport::{BodyStream, ReqwestTransport, Transport, TransportResponse};
pub use types::{
    tracing_warning_handler, AttemptOutcome, ChunkHandler, Headers, Response, ResponseBody,
    TimeoutKind, Warning, WarningHandler, STATUS_CODE_FIELD,
};

pub type Result<T> = std::result::Result<T, HttpsError>;
