//! Cooperative cancellation for the metadata prefetch.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared one-way flag: once cancelled it stays cancelled.
///
/// Clones observe the same flag. Cancelling more than once is a no-op.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        if !self.cancelled.swap(true, Ordering::AcqRel) {
            tracing::info!("metadata prefetch cancelled");
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_is_shared_and_idempotent() {
        let token = CancellationToken::new();
        let probe = token.clone();
        assert!(!probe.is_cancelled());
        token.cancel();
        token.cancel();
        assert!(probe.is_cancelled());
        assert!(token.is_cancelled());
    }
}
