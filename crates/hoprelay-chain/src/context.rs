//! Per-request routing context.

use tokio_util::sync::CancellationToken;

/// Carries the caller's cancellation token and the hash source used by
/// `hash` selectors (usually the client host).
#[derive(Debug, Clone, Default)]
pub struct DialContext {
    cancel: CancellationToken,
    hash_source: Option<String>,
}

impl DialContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_hash_source(mut self, source: impl Into<String>) -> Self {
        self.hash_source = Some(source.into());
        self
    }

    pub fn hash_source(&self) -> Option<&str> {
        self.hash_source.as_deref()
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}
