use std::future::Future;

use async_trait::async_trait;
use tokio::select;
use tokio_util::sync::CancellationToken;

#[async_trait]
pub trait FutureCancel
where
    Self: Future,
{
    /// `None` if `token` got cancelled first.
    async fn cancellable(self, token: &CancellationToken) -> Option<Self::Output>;
}

#[async_trait]
impl<F> FutureCancel for F
where
    F: Future + Send,
{
    async fn cancellable(self, token: &CancellationToken) -> Option<Self::Output> {
        select! {
            biased;
            _ = token.cancelled() => None,
            x = self => Some(x),
        }
    }
}

/// Background task that is cancelled when dropped.
#[derive(Debug)]
pub struct CancelOnDrop {
    token: CancellationToken,
}

impl CancelOnDrop {
    pub fn spawn<F, O>(task: O) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
        O: FnOnce(CancellationToken) -> F,
    {
        let token = CancellationToken::new();
        tokio::spawn(task(token.clone()));
        Self { token }
    }
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
