use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::{HttpsError, Result};

/// Configures timeout, retry and warning behavior for one call.
///
/// Values are frozen for the life of a call. Deserializes from camelCase keys
/// (`responseTimeoutMs`, `deadlineMs`, `maxRetries`, `verbose`); missing keys
/// fall back to the defaults.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CallOptions {
    /// Time allowed for the first response byte, in milliseconds.
    pub response_timeout_ms: u64,
    /// Total time budget for the call, in milliseconds.
    pub deadline_ms: u64,
    /// Maximum number of retries after the initial attempt.
    pub max_retries: usize,
    /// Whether failed attempts are reported to the warning handler.
    pub verbose: bool,
}

impl Default for CallOptions {
    fn default() -> Self {
        Self {
            response_timeout_ms: 10_000,
            deadline_ms: 60_000,
            max_retries: 0,
            verbose: true,
        }
    }
}

impl CallOptions {
    /// Reads options from the environment, keeping defaults for unset variables.
    ///
    /// Reads:
    /// - `HTTPS_CALL_RESPONSE_TIMEOUT_MS`
    /// - `HTTPS_CALL_DEADLINE_MS`
    /// - `HTTPS_CALL_MAX_RETRIES`
    /// - `HTTPS_CALL_VERBOSE` (`true`/`false`)
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut options = Self::default();
        if let Some(value) = parse_var(&lookup, "HTTPS_CALL_RESPONSE_TIMEOUT_MS")? {
            options.response_timeout_ms = value;
        }
        if let Some(value) = parse_var(&lookup, "HTTPS_CALL_DEADLINE_MS")? {
            options.deadline_ms = value;
        }
        if let Some(value) = parse_var(&lookup, "HTTPS_CALL_MAX_RETRIES")? {
            options.max_retries = value;
        }
        if let Some(value) = parse_var(&lookup, "HTTPS_CALL_VERBOSE")? {
            options.verbose = value;
        }
        Ok(options)
    }

    pub fn with_response_timeout_ms(mut self, ms: u64) -> Self {
        self.response_timeout_ms = ms;
        self
    }

    pub fn with_deadline_ms(mut self, ms: u64) -> Self {
        self.deadline_ms = ms;
        self
    }

    pub fn with_max_retries(mut self, retries: usize) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub(crate) fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    pub(crate) fn deadline(&self) -> Duration {
        Duration::from_millis(self.deadline_ms)
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>> {
    let Some(raw) = lookup(key) else {
        return Ok(None);
    };
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    trimmed
        .parse()
        .map(Some)
        .map_err(|_| HttpsError::Configuration(format!("invalid value for {key}: '{raw}'")))
}
