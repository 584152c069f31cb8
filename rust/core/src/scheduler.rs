//! Cancellation signals and time budgets for long-running operations.

use std::future::Future;

use tokio::sync::watch;

use crate::error::{ErrorKind, MlldError, MlldResult};

/// A cloneable cancellation signal.
///
/// Long-running operations poll or await the token; on cancellation they
/// return `Cancelled`. Partial effects already flushed remain; pending
/// effects are dropped by the caller.
#[derive(Debug, Clone)]
pub struct CancelToken {
    sender: watch::Sender<bool>,
    receiver: watch::Receiver<bool>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        let (sender, receiver) = watch::channel(false);
        Self { sender, receiver }
    }

    /// Signal cancellation to all clones.
    pub fn cancel(&self) {
        let _ = self.sender.send(true);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Resolve when cancellation is signalled.
    pub async fn cancelled(&self) {
        let mut receiver = self.receiver.clone();
        while !*receiver.borrow() {
            if receiver.changed().await.is_err() {
                // All senders dropped without cancelling; never resolves.
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Run a future under a cancellation token and an optional millisecond
/// budget, converting overruns to `Timeout` and signals to `Cancelled`.
pub async fn run_bounded<T, F>(
    future: F,
    cancel: &CancelToken,
    timeout_ms: Option<u64>,
) -> MlldResult<T>
where
    F: Future<Output = MlldResult<T>>,
{
    if cancel.is_cancelled() {
        return Err(MlldError::new(ErrorKind::Cancelled));
    }

    let bounded = async {
        match timeout_ms {
            Some(ms) => tokio::time::timeout(std::time::Duration::from_millis(ms), future)
                .await
                .map_err(|_| MlldError::new(ErrorKind::Timeout { ms }))?,
            None => future.await,
        }
    };

    tokio::select! {
        result = bounded => result,
        () = cancel.cancelled() => Err(MlldError::new(ErrorKind::Cancelled)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn timeout_converts() {
        let cancel = CancelToken::new();
        let result: MlldResult<()> = run_bounded(
            async {
                tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                Ok(())
            },
            &cancel,
            Some(10),
        )
        .await;
        assert_eq!(
            result.map_err(|e| e.kind),
            Err(ErrorKind::Timeout { ms: 10 })
        );
    }

    #[tokio::test]
    async fn pre_cancelled_short_circuits() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let result: MlldResult<()> = run_bounded(async { Ok(()) }, &cancel, None).await;
        assert_eq!(result.map_err(|e| e.kind), Err(ErrorKind::Cancelled));
    }

    #[tokio::test]
    async fn cancellation_interrupts() {
        let cancel = CancelToken::new();
        let cancel2 = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            cancel2.cancel();
        });
        let result: MlldResult<()> = run_bounded(
            async {
                tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                Ok(())
            },
            &cancel,
            None,
        )
        .await;
        assert_eq!(result.map_err(|e| e.kind), Err(ErrorKind::Cancelled));
    }
}
