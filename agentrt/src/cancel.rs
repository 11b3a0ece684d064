//! Cooperative cancellation, shared by every suspension point (admission
//! waits, the rate-limit gate, the DAG executor).
//!
//! Built on `tokio::sync::watch<bool>` rather than pulling in `tokio-util`'s
//! `CancellationToken`, to keep the dependency surface aligned with what the
//! rest of the crate already uses.

use tokio::sync::watch;

#[derive(Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

pub fn cancel_pair() -> (CancelHandle, CancelToken) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, CancelToken { rx })
}

impl CancelToken {
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancellation is requested; never resolves otherwise.
    pub async fn cancelled(&mut self) {
        let _ = self.rx.wait_for(|&c| c).await;
    }

    /// A token that is never cancelled, for callers with no cancellation need.
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self { rx }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_token_is_not_cancelled() {
        let (_handle, token) = cancel_pair();
        assert!(!token.is_cancelled());
    }

    #[test]
    fn cancel_marks_token_cancelled() {
        let (handle, token) = cancel_pair();
        handle.cancel();
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn cancelled_future_resolves_after_cancel() {
        let (handle, mut token) = cancel_pair();
        handle.cancel();
        token.cancelled().await;
        assert!(token.is_cancelled());
    }
}
