use tokio_util::sync::CancellationToken;

/// Cloneable handle that aborts an in-flight call.
///
/// Cancelling more than once has no further effect.
#[derive(Clone, Debug, Default)]
pub struct CancellationSignal {
    token: CancellationToken,
}

impl CancellationSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once [`CancellationSignal::cancel`] has been called.
    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }
}

impl From<CancellationToken> for CancellationSignal {
    fn from(token: CancellationToken) -> Self {
        Self { token }
    }
}

pub(crate) async fn cancelled(signal: Option<&CancellationSignal>) {
    match signal {
        Some(signal) => signal.cancelled().await,
        None => std::future::pending().await,
    }
}
