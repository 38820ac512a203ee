//! Request-scoped cancellation.

use tokio::sync::watch;

/// Observes cancellation of one job.
///
/// Cloning is cheap; every clone observes the same job.
#[derive(Clone, Debug)]
pub struct CancelToken {
    receiver: watch::Receiver<bool>,
}

impl CancelToken {
    /// Creates a connected sender and token pair.
    pub(crate) fn channel() -> (watch::Sender<bool>, Self) {
        let (sender, receiver) = watch::channel(false);
        (sender, Self { receiver })
    }

    /// A token that is never cancelled.
    #[must_use]
    pub fn never() -> Self {
        Self::channel().1
    }

    /// Returns `true` once the owning job has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Resolves once the owning job is cancelled. A token whose job can no
    /// longer be cancelled stays pending forever.
    pub async fn cancelled(&self) {
        let mut receiver = self.receiver.clone();
        if receiver.wait_for(|cancelled| *cancelled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
