//! Cooperative cancellation token polled by long-running operations.
//!
//! Per spec §5, level-by-level search during insert, distance-matrix
//! construction during delete, k-means iterations, per-cluster search in
//! IVF-PQ, and node/link streaming during load must poll a token at least
//! once per outer iteration.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{Error, ErrorKind, Result};

/// A cooperative cancellation signal shared across threads.
#[derive(Debug, Clone)]
pub struct CancellationToken {
    canceled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Creates a new, not-yet-canceled token.
    #[must_use]
    pub fn new() -> Self {
        Self {
            canceled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A token that can never be canceled, for callers who don't need one.
    #[must_use]
    pub fn none() -> Self {
        Self::new()
    }

    /// Requests cancellation. Idempotent.
    pub fn cancel(&self) {
        self.canceled.store(true, Ordering::SeqCst);
    }

    /// Returns `true` if cancellation has been requested.
    #[must_use]
    pub fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::SeqCst)
    }

    /// Returns `Err(Canceled)` if cancellation has been requested, else `Ok(())`.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::Canceled`] if the token has been canceled.
    pub fn check(&self, component: &'static str, operation: &'static str) -> Result<()> {
        if self.is_canceled() {
            Err(Error::new(ErrorKind::Canceled, component, operation))
        } else {
            Ok(())
        }
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_token_is_not_canceled() {
        let token = CancellationToken::new();
        assert!(!token.is_canceled());
        assert!(token.check("hnsw", "search").is_ok());
    }

    #[test]
    fn canceled_token_fails_check() {
        let token = CancellationToken::new();
        token.cancel();
        let err = token.check("hnsw", "delete").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Canceled);
    }

    #[test]
    fn clone_shares_cancellation_state() {
        let token = CancellationToken::new();
        let clone = token.clone();
        clone.cancel();
        assert!(token.is_canceled());
    }
}
