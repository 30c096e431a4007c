use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::{
    retry::RetryController, tracing_warning_handler, CallOptions, CancellationSignal,
    ChunkHandler, Headers, Method, ReqwestTransport, RequestDescriptor, Response, Result,
    Transport, Warning, WarningHandler,
};

/// One top-level call: method, target, payload and per-call controls.
pub struct CallRequest {
    method: String,
    host: String,
    path: String,
    body: Value,
    headers: Headers,
    options: Option<CallOptions>,
    cancellation: Option<CancellationSignal>,
    on_chunk: Option<ChunkHandler>,
}

impl fmt::Debug for CallRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallRequest")
            .field("method", &self.method)
            .field("host", &self.host)
            .field("path", &self.path)
            .field("body", &self.body)
            .field("headers", &self.headers)
            .field("options", &self.options)
            .field("cancellation", &self.cancellation)
            .field("on_chunk", &self.on_chunk.as_ref().map(|_| "<handler>"))
            .finish()
    }
}

impl CallRequest {
    /// Creates a call with an empty object body and no extra headers.
    ///
    /// `host` may carry an `https://` or `http://` prefix.
    pub fn new(
        method: impl Into<String>,
        host: impl Into<String>,
        path: impl Into<String>,
    ) -> Self {
        Self {
            method: method.into(),
            host: host.into(),
            path: path.into(),
            body: Value::Object(Default::default()),
            headers: Headers::new(),
            options: None,
            cancellation: None,
            on_chunk: None,
        }
    }

    /// Sets the body. GET calls turn a top-level object into a query string.
    pub fn body(mut self, body: Value) -> Self {
        self.body = body;
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn headers(mut self, headers: Headers) -> Self {
        self.headers.extend(headers);
        self
    }

    /// Overrides the client's default options for this call.
    pub fn options(mut self, options: CallOptions) -> Self {
        self.options = Some(options);
        self
    }

    pub fn cancellation(mut self, signal: CancellationSignal) -> Self {
        self.cancellation = Some(signal);
        self
    }

    /// Streams the response body to `handler` instead of buffering it.
    ///
    /// The handler sees the chunks of every attempt, including failed ones.
    pub fn on_chunk<F>(mut self, handler: F) -> Self
    where
        F: FnMut(&bytes::Bytes) -> std::result::Result<(), crate::BoxError> + Send + 'static,
    {
        self.on_chunk = Some(Box::new(handler));
        self
    }
}

/// Async HTTP(S) client running each call through the retry and timeout race.
pub struct HttpsClient<T = ReqwestTransport> {
    transport: Arc<T>,
    options: CallOptions,
    warnings: WarningHandler,
}

impl<T> Clone for HttpsClient<T> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            options: self.options.clone(),
            warnings: Arc::clone(&self.warnings),
        }
    }
}

impl<T> fmt::Debug for HttpsClient<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpsClient")
            .field("transport", &std::any::type_name::<T>())
            .field("options", &self.options)
            .field("warnings", &"<handler>")
            .finish()
    }
}

impl HttpsClient<ReqwestTransport> {
    /// Creates a client over a default `reqwest` transport.
    pub fn new() -> Self {
        Self::with_transport(ReqwestTransport::new())
    }

    /// Creates a client whose default options come from `HTTPS_CALL_*`
    /// environment variables. See [`CallOptions::from_env`].
    pub fn from_env() -> Result<Self> {
        Ok(Self::new().with_options(CallOptions::from_env()?))
    }
}

impl Default for HttpsClient<ReqwestTransport> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Transport> HttpsClient<T> {
    /// Creates a client over any [`Transport`], e.g. a fake in tests.
    pub fn with_transport(transport: T) -> Self {
        Self {
            transport: Arc::new(transport),
            options: CallOptions::default(),
            warnings: tracing_warning_handler(),
        }
    }

    /// Applies default options used by calls that do not override them.
    pub fn with_options(mut self, options: CallOptions) -> Self {
        self.options = options;
        self
    }

    /// Replaces the warning sink. The default forwards to `tracing`.
    pub fn with_warning_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&Warning) + Send + Sync + 'static,
    {
        self.warnings = Arc::new(handler);
        self
    }

    pub fn options(&self) -> &CallOptions {
        &self.options
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Sends a GET. `body` key/value pairs are appended to `path` as a query.
    pub async fn get(
        &self,
        host: &str,
        path: &str,
        body: Value,
        headers: Headers,
    ) -> Result<Response> {
        self.call(CallRequest::new("GET", host, path).body(body).headers(headers))
            .await
    }

    /// Sends a POST with `body` serialized.
    pub async fn post(
        &self,
        host: &str,
        path: &str,
        body: Value,
        headers: Headers,
    ) -> Result<Response> {
        self.call(CallRequest::new("POST", host, path).body(body).headers(headers))
            .await
    }

    /// Sends a PUT with `body` serialized.
    pub async fn put(
        &self,
        host: &str,
        path: &str,
        body: Value,
        headers: Headers,
    ) -> Result<Response> {
        self.call(CallRequest::new("PUT", host, path).body(body).headers(headers))
            .await
    }

    /// Sends a DELETE with `body` serialized.
    pub async fn delete(
        &self,
        host: &str,
        path: &str,
        body: Value,
        headers: Headers,
    ) -> Result<Response> {
        self.call(CallRequest::new("DELETE", host, path).body(body).headers(headers))
            .await
    }

    /// Runs one call to a single terminal result.
    ///
    /// Fails with [`crate::HttpsError::Configuration`] before any network activity
    /// when the method is unsupported or the body cannot be encoded.
    pub async fn call(&self, request: CallRequest) -> Result<Response> {
        let CallRequest {
            method,
            host,
            path,
            body,
            headers,
            options,
            cancellation,
            on_chunk,
        } = request;

        let method: Method = method.parse()?;
        let descriptor = RequestDescriptor::build(method, &host, &path, &body, headers)?;
        let options = options.unwrap_or_else(|| self.options.clone());

        #[cfg(feature = "tracing")]
        tracing::debug!(
            method = %descriptor.method,
            url = %descriptor.url(),
            max_retries = options.max_retries,
            "dispatching call"
        );

        RetryController::new(
            self.transport.as_ref(),
            &descriptor,
            &options,
            &self.warnings,
            cancellation.as_ref(),
        )
        .run(on_chunk)
        .await
    }
}
