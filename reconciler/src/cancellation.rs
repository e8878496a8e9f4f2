//! Cooperative cancellation (§5): a `tokio::sync::watch<bool>` flag any
//! clone can flip, observed by the executor's stage loop, the rate limiter's
//! wait, and the retry manager's backoff sleep.

use std::future::pending;
use std::sync::Arc;
use std::time::Duration;

use reconciler_common::errors::Cancelled;
use reconciler_common::ReconcileError;
use tokio::sync::watch;

/// A handle used to request cooperative cancellation of an in-progress
/// call. `cancel()` can be called from any clone; every clone observes the
/// same cancellation.
#[derive(Clone)]
pub struct CancellationToken {
    tx: Arc<watch::Sender<bool>>,
}

impl CancellationToken {
    pub fn new() -> (Self, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        (Self { tx: Arc::new(tx) }, rx)
    }

    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

/// Sleeps for `duration`, waking early with `Cancelled` if `cancel` flips to
/// true first. Used anywhere a wait (rate-limiter backoff, retry backoff)
/// would otherwise block uninterruptibly past a cancellation request.
pub async fn sleep_or_cancel(
    duration: Duration,
    cancel: &mut watch::Receiver<bool>,
) -> Result<(), ReconcileError> {
    if *cancel.borrow() {
        return Cancelled.fail();
    }
    tokio::select! {
        _ = tokio::time::sleep(duration) => Ok(()),
        _ = wait_for_cancel(cancel) => Cancelled.fail(),
    }
}

async fn wait_for_cancel(cancel: &mut watch::Receiver<bool>) {
    loop {
        if cancel.changed().await.is_err() {
            // Sender dropped; this token will never cancel, so stop racing.
            pending::<()>().await;
        }
        if *cancel.borrow() {
            return;
        }
    }
}
