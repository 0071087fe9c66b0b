use std::sync::Arc;
use tokio::sync::watch;

use crate::error::CommitError;

/// Cancellation signal shared by everything belonging to one run.
///
/// Clones observe the same state; once cancelled it stays cancelled.
#[derive(Clone, Debug)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once `cancel` has been called (immediately if it already was)
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as self, so wait_for cannot fail
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }

    /// Error out early if the run was cancelled
    pub fn check(&self) -> Result<(), CommitError> {
        if self.is_cancelled() {
            Err(CommitError::Aborted)
        } else {
            Ok(())
        }
    }
}
