use std::future::Future;

use tokio_util::sync::CancellationToken;

use crate::error::{AccessControlError, AuthzResult};

/// Per-request handle carrying cancellation into store lookups.
#[derive(Clone, Debug, Default)]
pub struct RequestContext {
    token: CancellationToken,
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(token: CancellationToken) -> Self {
        Self { token }
    }

    /// A context cancelled together with `self`, but cancellable on its own.
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
        }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Drives `fut` to completion unless the context is cancelled first.
    pub async fn run<T, F>(&self, fut: F) -> AuthzResult<T>
    where
        F: Future<Output = AuthzResult<T>>,
    {
        if self.token.is_cancelled() {
            return Err(AccessControlError::Cancelled);
        }
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(AccessControlError::Cancelled),
            res = fut => res,
        }
    }
}
