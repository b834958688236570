//! Runtime abstraction, so the resolver core does not hard-depend on `tokio`
//! for spawning or sleeping (grounded in the same pattern used to keep a
//! client core executor-agnostic).

use std::future::Future;
use std::time::Duration;

/// Spawns tasks and sleeps. Implemented for `tokio` by [`TokioRuntime`];
/// tests may substitute a runtime that uses `tokio::time::pause`/`advance`
/// under the hood without the resolver needing to know.
pub trait Runtime: Clone + Send + Sync + 'static {
    /// Spawns a future to run in the background.
    fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static;

    /// Sleeps for the given duration.
    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send;
}

/// `tokio`-backed [`Runtime`] implementation.
#[derive(Clone, Debug, Default)]
pub struct TokioRuntime;

impl Runtime for TokioRuntime {
    fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        tokio::spawn(future);
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}
