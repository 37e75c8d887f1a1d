//! Cancellation token checked by the engine between stages.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

/// A recorded cancellation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CancelRequest {
    /// Why the run should stop, e.g. `interrupted by user`.
    pub reason: String,
    /// When the request was made.
    pub requested_at: DateTime<Utc>,
}

/// Cooperative cancellation shared between a run and whoever may stop it.
///
/// A running stage is never interrupted: the engine looks at the token
/// before starting each stage, so every ledger entry stays consistent.
/// The first request wins; later ones are ignored.
#[derive(Debug, Default)]
pub struct CancellationToken {
    cancelled: AtomicBool,
    request: Mutex<Option<CancelRequest>>,
}

impl CancellationToken {
    /// Creates a token that is not cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation. Returns false if it was already requested.
    pub fn cancel(&self, reason: impl Into<String>) -> bool {
        let mut request = self.request.lock();
        if request.is_some() {
            return false;
        }
        let reason = reason.into();
        debug!(reason = %reason, "Cancellation requested");
        *request = Some(CancelRequest {
            reason,
            requested_at: Utc::now(),
        });
        self.cancelled.store(true, Ordering::SeqCst);
        true
    }

    /// Returns whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// The cancellation reason, if any.
    #[must_use]
    pub fn reason(&self) -> Option<String> {
        self.request.lock().as_ref().map(|r| r.reason.clone())
    }

    /// The full request, if any.
    #[must_use]
    pub fn request(&self) -> Option<CancelRequest> {
        self.request.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_new_token_is_not_cancelled() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());
        assert!(token.reason().is_none());
        assert!(token.request().is_none());
    }

    #[test]
    fn test_first_reason_wins() {
        let token = CancellationToken::new();
        assert!(token.cancel("interrupted"));
        assert!(!token.cancel("second"));

        assert!(token.is_cancelled());
        assert_eq!(token.reason().as_deref(), Some("interrupted"));
    }

    #[test]
    fn test_request_records_time() {
        let before = Utc::now();
        let token = CancellationToken::new();
        token.cancel("ctrl-c");
        let request = token.request().unwrap();
        assert!(request.requested_at >= before);
    }

    #[tokio::test]
    async fn test_cancel_from_another_task() {
        let token = Arc::new(CancellationToken::new());
        let remote = token.clone();
        tokio::spawn(async move {
            remote.cancel("interrupted by user");
        })
        .await
        .unwrap();
        assert_eq!(token.reason().as_deref(), Some("interrupted by user"));
    }
}
