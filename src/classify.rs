use crate::{AttemptOutcome, Headers, Response, ResponseBody};

/// First status code treated as a failed attempt.
pub const FIRST_ERROR_STATUS: u16 = 400;

/// Maps a decoded response to the attempt outcome.
///
/// The status code is attached to both the success value and the failure, and
/// the payload is carried over untouched in either case.
pub fn classify(status_code: u16, headers: Headers, payload: ResponseBody) -> AttemptOutcome {
    if status_code >= FIRST_ERROR_STATUS {
        AttemptOutcome::ServerError {
            status_code,
            payload,
        }
    } else {
        AttemptOutcome::Success(Response {
            status_code,
            headers,
            body: payload,
        })
    }
}
