//! Shared connection attempts

use futures::future::{BoxFuture, FutureExt, Shared};
use std::future::Future;
use tokio::task::JoinError;

use crate::error::{StoreError, StoreResult};

/// One in-flight connection attempt, awaitable by any number of callers.
pub(crate) type Attempt<T> = Shared<BoxFuture<'static, StoreResult<T>>>;

/// Run `work` as its own task and hand back a shareable view of its outcome.
///
/// The task keeps running when every waiter is dropped, so a cancelled
/// caller never strands the callers that joined it. If the task itself dies
/// (a panic inside the connector), `on_abort` runs once, on the first waiter
/// to observe it, and its error becomes the shared outcome. It must undo
/// whatever the task would have cleaned up on a normal failure.
pub(crate) fn spawn_attempt<T, F, A, AF>(work: F, on_abort: A) -> Attempt<T>
where
    T: Clone + Send + Sync + 'static,
    F: Future<Output = StoreResult<T>> + Send + 'static,
    A: FnOnce(JoinError) -> AF + Send + 'static,
    AF: Future<Output = StoreError> + Send + 'static,
{
    let task = tokio::spawn(work);
    async move {
        match task.await {
            Ok(outcome) => outcome,
            Err(join) => Err(on_abort(join).await),
        }
    }
    .boxed()
    .shared()
}
