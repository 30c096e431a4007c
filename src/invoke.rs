use futures::StreamExt;
use serde_json::{Map, Value};

use crate::{
    classify::classify, AttemptOutcome, ChunkHandler, RequestDescriptor, ResponseBody,
    TimeoutRace, Transport, TransportError, Warning, WarningHandler, STATUS_CODE_FIELD,
};

/// Issues single attempts of a prepared request against a transport.
pub(crate) struct TransportInvoker<'a, T: ?Sized> {
    transport: &'a T,
    request: &'a RequestDescriptor,
    warnings: Option<&'a WarningHandler>,
}

impl<'a, T: Transport + ?Sized> TransportInvoker<'a, T> {
    /// `warnings` is `None` when the call is not verbose.
    pub(crate) fn new(
        transport: &'a T,
        request: &'a RequestDescriptor,
        warnings: Option<&'a WarningHandler>,
    ) -> Self {
        Self {
            transport,
            request,
            warnings,
        }
    }

    /// Runs one attempt to completion. Every received chunk acknowledges `race`.
    pub(crate) async fn invoke(
        &self,
        attempt: usize,
        on_chunk: Option<&mut ChunkHandler>,
        race: &TimeoutRace,
    ) -> AttemptOutcome {
        let outcome = self.exchange(on_chunk, race).await;
        self.report(attempt, &outcome);
        outcome
    }

    async fn exchange(
        &self,
        mut on_chunk: Option<&mut ChunkHandler>,
        race: &TimeoutRace,
    ) -> AttemptOutcome {
        let response = match self.transport.send(self.request).await {
            Ok(response) => response,
            Err(cause) => {
                return AttemptOutcome::NetworkError {
                    status_code: None,
                    cause,
                }
            }
        };

        let status_code = response.status_code;
        let mut body = response.body;
        let mut buffer = Vec::new();
        let mut streamed = 0u64;

        while let Some(chunk) = body.next().await {
            race.acknowledge();
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(cause) => {
                    return AttemptOutcome::NetworkError {
                        status_code: Some(status_code),
                        cause,
                    }
                }
            };
            match on_chunk.as_deref_mut() {
                Some(handler) => {
                    if let Err(err) = handler(&chunk) {
                        return AttemptOutcome::NetworkError {
                            status_code: Some(status_code),
                            cause: TransportError::ChunkHandler(err),
                        };
                    }
                    streamed += chunk.len() as u64;
                }
                None => buffer.extend_from_slice(&chunk),
            }
        }
        race.acknowledge();

        let payload = if on_chunk.is_some() {
            ResponseBody::Streamed { bytes: streamed }
        } else {
            decode_body(&buffer, status_code, self.request.accepts_json())
        };
        classify(status_code, response.headers, payload)
    }

    fn report(&self, attempt: usize, outcome: &AttemptOutcome) {
        let Some(warnings) = self.warnings else {
            return;
        };
        let message = match outcome {
            AttemptOutcome::Success(_) => return,
            AttemptOutcome::ServerError { payload, .. } => payload.to_string(),
            AttemptOutcome::NetworkError { cause, .. } => cause.to_string(),
        };
        warnings(&Warning {
            attempt,
            status_code: outcome.status_code(),
            message,
        });
    }
}

/// Decodes a buffered body.
///
/// Under a JSON `Accept` the text is parsed; objects get `statusCode` set when
/// theirs is missing or falsy (`null`, `false`, `0`, `""`) and unparseable text
/// is kept verbatim. Other calls get a
/// `{data, statusCode}` envelope around the text.
pub fn decode_body(raw: &[u8], status_code: u16, accepts_json: bool) -> ResponseBody {
    let text = String::from_utf8_lossy(raw).into_owned();
    if !accepts_json {
        let mut envelope = Map::new();
        envelope.insert("data".to_owned(), Value::String(text));
        envelope.insert(STATUS_CODE_FIELD.to_owned(), Value::from(status_code));
        return ResponseBody::Json(Value::Object(envelope));
    }

    match serde_json::from_str::<Value>(&text) {
        Ok(Value::Object(mut object)) => {
            if object.get(STATUS_CODE_FIELD).map_or(true, is_falsy) {
                object.insert(STATUS_CODE_FIELD.to_owned(), Value::from(status_code));
            }
            ResponseBody::Json(Value::Object(object))
        }
        Ok(other) => ResponseBody::Json(other),
        Err(_) => ResponseBody::Text(text),
    }
}

fn is_falsy(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(flag) => !flag,
        Value::Number(number) => number.as_f64() == Some(0.0),
        Value::String(text) => text.is_empty(),
        Value::Array(_) | Value::Object(_) => false,
    }
}
