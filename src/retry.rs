use crate::{
    cancel::cancelled, invoke::TransportInvoker, AttemptOutcome, CallOptions, CancellationSignal,
    ChunkHandler, HttpsError, RequestDescriptor, Response, Result, TimeoutRace, Transport,
    WarningHandler,
};

/// Retry loop states. Terminal states carry the call result.
#[derive(Debug)]
enum RetryState {
    Idle,
    Attempting,
    Retrying(AttemptOutcome),
    Succeeded(Response),
    TimedOut(HttpsError),
    Aborted,
    Exhausted(AttemptOutcome),
}

/// What ended the race for one attempt.
enum Race {
    Cancelled,
    Expired(HttpsError),
    Finished(AttemptOutcome),
}

/// Runs attempts of one request until success, exhaustion, timeout or abort.
///
/// Attempts are strictly sequential and reuse the same descriptor. There is no
/// delay between attempts. Timers are armed once in [`RetryController::run`]
/// and win over any remaining retry budget.
pub(crate) struct RetryController<'a, T: ?Sized> {
    invoker: TransportInvoker<'a, T>,
    options: &'a CallOptions,
    cancellation: Option<&'a CancellationSignal>,
}

impl<'a, T: Transport + ?Sized> RetryController<'a, T> {
    pub(crate) fn new(
        transport: &'a T,
        request: &'a RequestDescriptor,
        options: &'a CallOptions,
        warnings: &'a WarningHandler,
        cancellation: Option<&'a CancellationSignal>,
    ) -> Self {
        let warnings = options.verbose.then_some(warnings);
        Self {
            invoker: TransportInvoker::new(transport, request, warnings),
            options,
            cancellation,
        }
    }

    pub(crate) async fn run(self, mut on_chunk: Option<ChunkHandler>) -> Result<Response> {
        let race = TimeoutRace::arm(self.options);
        let mut num_retries = 0usize;
        let mut state = RetryState::Idle;

        loop {
            state = match state {
                RetryState::Idle => RetryState::Attempting,
                RetryState::Attempting => {
                    let attempt = num_retries + 1;
                    #[cfg(feature = "tracing")]
                    tracing::debug!(attempt, "starting attempt");

                    let race_result = tokio::select! {
                        biased;
                        () = cancelled(self.cancellation) => Race::Cancelled,
                        err = race.expired() => Race::Expired(err),
                        outcome = self.invoker.invoke(attempt, on_chunk.as_mut(), &race) => {
                            Race::Finished(outcome)
                        }
                    };

                    match race_result {
                        Race::Cancelled => RetryState::Aborted,
                        Race::Expired(err) => RetryState::TimedOut(err),
                        Race::Finished(AttemptOutcome::Success(response)) => {
                            RetryState::Succeeded(response)
                        }
                        Race::Finished(failure) if num_retries < self.options.max_retries => {
                            RetryState::Retrying(failure)
                        }
                        Race::Finished(failure) => RetryState::Exhausted(failure),
                    }
                }
                RetryState::Retrying(_failure) => {
                    num_retries += 1;
                    #[cfg(feature = "tracing")]
                    tracing::debug!(
                        num_retries,
                        max_retries = self.options.max_retries,
                        status_code = ?_failure.status_code(),
                        "retrying after failed attempt"
                    );
                    RetryState::Attempting
                }
                RetryState::Succeeded(response) => {
                    #[cfg(feature = "tracing")]
                    tracing::debug!(status_code = response.status_code, "call succeeded");
                    return Ok(response);
                }
                RetryState::TimedOut(err) => {
                    #[cfg(feature = "tracing")]
                    tracing::debug!(error = %err, "call timed out");
                    return Err(err);
                }
                RetryState::Aborted => {
                    #[cfg(feature = "tracing")]
                    tracing::debug!("call aborted");
                    return Err(HttpsError::Aborted);
                }
                RetryState::Exhausted(failure) => {
                    #[cfg(feature = "tracing")]
                    tracing::debug!(
                        attempts = num_retries + 1,
                        status_code = ?failure.status_code(),
                        "retries exhausted"
                    );
                    return failure.into_result();
                }
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use bytes::Bytes;
    use serde_json::json;

    use super::RetryController;
    use crate::{
        tracing_warning_handler, CallOptions, CancellationSignal, Headers, HttpsError, Method,
        RequestDescriptor, ResponseBody, TimeoutKind, Transport, TransportError,
        TransportResponse, Warning, WarningHandler,
    };

    /// One scripted reply of the fake transport.
    enum Reply {
        /// Waits `delay`, then answers with the status and a single body chunk.
        Status {
            status: u16,
            body: &'static str,
            delay: Duration,
        },
        /// Sends the first chunk after `first`, then stalls before the rest.
        Slow {
            first: Duration,
            rest: Duration,
        },
        /// Fails before a response head arrives.
        Refused,
    }

    fn ok(body: &'static str) -> Reply {
        Reply::Status {
            status: 200,
            body,
            delay: Duration::ZERO,
        }
    }

    fn status(status: u16, body: &'static str) -> Reply {
        Reply::Status {
            status,
            body,
            delay: Duration::ZERO,
        }
    }

    struct Scripted {
        replies: Mutex<VecDeque<Reply>>,
        sent: Mutex<Vec<RequestDescriptor>>,
    }

    impl Scripted {
        fn new(replies: Vec<Reply>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                sent: Mutex::default(),
            }
        }

        fn hits(&self) -> usize {
            self.sent.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Transport for Scripted {
        async fn send(
            &self,
            request: &RequestDescriptor,
        ) -> Result<TransportResponse, TransportError> {
            self.sent.lock().unwrap().push(request.clone());
            let reply = self
                .replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Reply::Refused);
            match reply {
                Reply::Status {
                    status,
                    body,
                    delay,
                } => {
                    tokio::time::sleep(delay).await;
                    Ok(TransportResponse::from_chunks(
                        status,
                        Headers::new(),
                        vec![Ok(Bytes::from_static(body.as_bytes()))],
                    ))
                }
                Reply::Slow { first, rest } => {
                    let body = futures::stream::unfold(0u8, move |step| async move {
                        match step {
                            0 => {
                                tokio::time::sleep(first).await;
                                Some((Ok::<_, TransportError>(Bytes::from_static(b"{\"a\":")), 1))
                            }
                            1 => {
                                tokio::time::sleep(rest).await;
                                Some((Ok::<_, TransportError>(Bytes::from_static(b"1}")), 2))
                            }
                            _ => None,
                        }
                    });
                    Ok(TransportResponse {
                        status_code: 200,
                        headers: Headers::new(),
                        body: Box::pin(body),
                    })
                }
                Reply::Refused => Err(TransportError::Connection("connection refused".into())),
            }
        }
    }

    fn request() -> RequestDescriptor {
        RequestDescriptor::build(
            Method::Post,
            "api.example.com",
            "/jobs",
            &json!({"id": 7}),
            Headers::new(),
        )
        .unwrap()
    }

    async fn run(
        transport: &Scripted,
        options: CallOptions,
        cancellation: Option<&CancellationSignal>,
    ) -> crate::Result<crate::Response> {
        let request = request();
        let warnings = tracing_warning_handler();
        RetryController::new(transport, &request, &options, &warnings, cancellation)
            .run(None)
            .await
    }

    #[tokio::test(start_paused = true)]
    async fn success_stops_the_loop() {
        let transport = Scripted::new(vec![ok(r#"{"x":1}"#), ok("{}")]);

        let response = run(&transport, CallOptions::default().with_max_retries(3), None)
            .await
            .unwrap();

        assert_eq!(response.status_code, 200);
        assert_eq!(response.body, ResponseBody::Json(json!({"x": 1, "statusCode": 200})));
        assert_eq!(transport.hits(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn server_errors_exhaust_after_max_retries_plus_one() {
        let transport = Scripted::new(vec![
            status(500, r#"{"msg":"fail"}"#),
            status(500, r#"{"msg":"fail"}"#),
            status(500, r#"{"msg":"fail"}"#),
        ]);

        let err = run(&transport, CallOptions::default().with_max_retries(2), None)
            .await
            .unwrap_err();

        assert_eq!(err.status_code(), Some(500));
        match err {
            HttpsError::Server { payload, .. } => {
                assert_eq!(payload, ResponseBody::Json(json!({"msg": "fail", "statusCode": 500})))
            }
            other => panic!("expected server error, got {other:?}"),
        }
        assert_eq!(transport.hits(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn success_on_third_attempt_is_returned() {
        let transport = Scripted::new(vec![
            status(503, "busy"),
            Reply::Refused,
            ok(r#"{"done":true}"#),
        ]);

        let response = run(&transport, CallOptions::default().with_max_retries(2), None)
            .await
            .unwrap();

        assert_eq!(response.status_code, 200);
        assert_eq!(transport.hits(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_reuse_an_identical_descriptor() {
        let transport = Scripted::new(vec![status(500, "x"), status(500, "x")]);

        let _ = run(&transport, CallOptions::default().with_max_retries(1), None).await;

        let sent = transport.sent.lock().unwrap();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0], sent[1]);
        assert_eq!(sent[0], request());
    }

    #[tokio::test(start_paused = true)]
    async fn network_error_without_retries_surfaces() {
        let transport = Scripted::new(vec![Reply::Refused]);

        let err = run(&transport, CallOptions::default(), None)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            HttpsError::Network {
                status_code: None,
                ..
            }
        ));
        assert_eq!(transport.hits(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn response_timeout_beats_remaining_retries() {
        let transport = Scripted::new(vec![Reply::Status {
            status: 200,
            body: "{}",
            delay: Duration::from_secs(5),
        }]);
        let options = CallOptions::default()
            .with_response_timeout_ms(100)
            .with_max_retries(5);

        let err = run(&transport, options, None).await.unwrap_err();

        assert_eq!(err.status_code(), Some(408));
        assert!(matches!(
            err,
            HttpsError::Timeout {
                kind: TimeoutKind::Response,
                ..
            }
        ));
        assert_eq!(transport.hits(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_applies_after_acknowledgement() {
        let transport = Scripted::new(vec![Reply::Slow {
            first: Duration::from_millis(10),
            rest: Duration::from_secs(10),
        }]);
        let options = CallOptions::default()
            .with_response_timeout_ms(50)
            .with_deadline_ms(500);

        let err = run(&transport, options, None).await.unwrap_err();

        assert!(matches!(
            err,
            HttpsError::Timeout {
                kind: TimeoutKind::Deadline,
                after_ms: 500
            }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_body_after_first_byte_is_not_a_response_timeout() {
        let transport = Scripted::new(vec![Reply::Slow {
            first: Duration::from_millis(10),
            rest: Duration::from_millis(200),
        }]);
        let options = CallOptions::default()
            .with_response_timeout_ms(50)
            .with_deadline_ms(1_000);

        let response = run(&transport, options, None).await.unwrap();

        assert_eq!(response.body, ResponseBody::Json(json!({"a": 1, "statusCode": 200})));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_is_shared_across_attempts() {
        let slow_failure = || Reply::Status {
            status: 500,
            body: "{}",
            delay: Duration::from_millis(300),
        };
        let transport = Scripted::new(vec![slow_failure(), slow_failure(), slow_failure()]);
        let options = CallOptions::default()
            .with_response_timeout_ms(10_000)
            .with_deadline_ms(700)
            .with_max_retries(5);
        let started = tokio::time::Instant::now();

        let err = run(&transport, options, None).await.unwrap_err();

        assert!(matches!(
            err,
            HttpsError::Timeout {
                kind: TimeoutKind::Deadline,
                ..
            }
        ));
        assert_eq!(transport.hits(), 3);
        assert!(started.elapsed() < Duration::from_millis(710));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_mid_flight_aborts_once() {
        let transport = Scripted::new(vec![
            Reply::Slow {
                first: Duration::from_millis(10),
                rest: Duration::from_secs(10),
            },
            ok("{}"),
        ]);
        let signal = CancellationSignal::new();
        let trigger = signal.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
            trigger.cancel();
        });

        let err = run(
            &transport,
            CallOptions::default().with_max_retries(3),
            Some(&signal),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, HttpsError::Aborted));
        assert_eq!(err.status_code(), Some(499));
        assert_eq!(transport.hits(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_before_start_issues_no_attempt() {
        let transport = Scripted::new(vec![ok("{}")]);
        let signal = CancellationSignal::new();
        signal.cancel();

        let err = run(&transport, CallOptions::default(), Some(&signal))
            .await
            .unwrap_err();

        assert!(matches!(err, HttpsError::Aborted));
        assert_eq!(transport.hits(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn warnings_follow_verbose_flag() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let warnings: WarningHandler = Arc::new(move |warning: &Warning| {
            sink.lock().unwrap().push(warning.clone());
        });
        let request = request();

        let transport = Scripted::new(vec![status(500, "a"), Reply::Refused, ok("{}")]);
        let options = CallOptions::default().with_max_retries(2);
        RetryController::new(&transport, &request, &options, &warnings, None)
            .run(None)
            .await
            .unwrap();
        {
            let seen = seen.lock().unwrap();
            assert_eq!(seen.len(), 2);
            assert_eq!(seen[0].attempt, 1);
            assert_eq!(seen[0].status_code, Some(500));
            assert_eq!(seen[1].attempt, 2);
            assert_eq!(seen[1].status_code, None);
        }

        let transport = Scripted::new(vec![status(500, "a")]);
        let quiet = CallOptions::default().with_verbose(false);
        let _ = RetryController::new(&transport, &request, &quiet, &warnings, None)
            .run(None)
            .await;
        assert_eq!(seen.lock().unwrap().len(), 2);
    }
}
