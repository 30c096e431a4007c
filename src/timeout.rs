use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;
use tokio::time::{sleep_until, Instant};

use crate::{CallOptions, HttpsError, TimeoutKind};

/// Response and deadline timers for one call.
///
/// Both timers are fixed instants taken when the call starts, so every attempt
/// races against the same clock. Acknowledgement (first response byte)
/// permanently disables the response timer; the deadline stays armed.
#[derive(Debug)]
pub struct TimeoutRace {
    response_timeout_ms: u64,
    deadline_ms: u64,
    response_at: Instant,
    deadline_at: Instant,
    acknowledged: AtomicBool,
    ack: Notify,
}

impl TimeoutRace {
    /// Arms both timers starting now.
    pub fn arm(options: &CallOptions) -> Self {
        let started = Instant::now();
        Self {
            response_timeout_ms: options.response_timeout_ms,
            deadline_ms: options.deadline_ms,
            response_at: started + options.response_timeout(),
            deadline_at: started + options.deadline(),
            acknowledged: AtomicBool::new(false),
            ack: Notify::new(),
        }
    }

    /// Records receipt of the first response byte.
    pub fn acknowledge(&self) {
        if !self.acknowledged.swap(true, Ordering::SeqCst) {
            self.ack.notify_waiters();
        }
    }

    pub fn is_acknowledged(&self) -> bool {
        self.acknowledged.load(Ordering::SeqCst)
    }

    /// Resolves when a timer fires.
    ///
    /// Yields [`HttpsError::Timeout`] for the timer that fired first, or
    /// [`HttpsError::Internal`] if the response timer fires although the call
    /// was already acknowledged. The latter only happens when acknowledgement
    /// lands on another thread between the timer firing and the wakeup being
    /// observed. Dropping the future leaves the timers armed.
    pub async fn expired(&self) -> HttpsError {
        tokio::select! {
            biased;
            err = self.response_expired() => err,
            () = sleep_until(self.deadline_at) => self.timeout(TimeoutKind::Deadline),
        }
    }

    async fn response_expired(&self) -> HttpsError {
        if self.response_at >= self.deadline_at {
            return std::future::pending().await;
        }
        loop {
            // Register before reading the flag so an acknowledgement in between is not lost.
            let notified = self.ack.notified();
            if self.is_acknowledged() {
                return std::future::pending().await;
            }
            tokio::select! {
                biased;
                () = notified => continue,
                () = sleep_until(self.response_at) => return self.response_fired(),
            }
        }
    }

    fn response_fired(&self) -> HttpsError {
        if self.is_acknowledged() {
            return HttpsError::Internal("response timer fired after acknowledgement".to_owned());
        }
        self.timeout(TimeoutKind::Response)
    }

    fn timeout(&self, kind: TimeoutKind) -> HttpsError {
        let after_ms = match kind {
            TimeoutKind::Response => self.response_timeout_ms,
            TimeoutKind::Deadline => self.deadline_ms,
        };
        HttpsError::Timeout { kind, after_ms }
    }
}
