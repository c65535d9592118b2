//! Database status and the queue of operations deferred while opening.

use crate::error::{Error, Result};
use futures::future::BoxFuture;
use std::collections::VecDeque;
use std::future::Future;
use tokio::sync::{oneshot, watch};

/// Where a database is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    /// Constructed, never opened.
    New,
    /// An open is in flight, or deferred operations are still draining.
    Opening,
    /// Ready for operations.
    Open,
    /// A close is in flight.
    Closing,
    /// Closed, or a failed open settled.
    Closed,
}

/// Receives the outcome of an in-flight open or close.
pub(crate) type Settle = watch::Receiver<Option<Result<()>>>;

/// Publishes the outcome of an in-flight open or close.
pub(crate) type Settled = watch::Sender<Option<Result<()>>>;

pub(crate) fn settle_channel() -> (Settled, Settle) {
    watch::channel(None)
}

/// Waits for an in-flight transition and returns its outcome.
pub(crate) async fn settle(mut rx: Settle) -> Result<()> {
    match rx.wait_for(Option::is_some).await {
        Ok(outcome) => (*outcome).clone().unwrap_or(Err(Error::NotOpen)),
        // The transition task went away without reporting
        Err(_) => Err(Error::NotOpen),
    }
}

/// A queued operation. Receives the open outcome and runs (or rejects)
/// itself.
pub(crate) type DeferredOp = Box<dyn FnOnce(Result<()>) -> BoxFuture<'static, ()> + Send>;

pub(crate) enum State {
    New,
    Opening(Settle),
    Open,
    Closing(Settle),
    Closed,
}

impl State {
    pub(crate) const fn status(&self) -> Status {
        match self {
            Self::New => Status::New,
            Self::Opening(_) => Status::Opening,
            Self::Open => Status::Open,
            Self::Closing(_) => Status::Closing,
            Self::Closed => Status::Closed,
        }
    }
}

pub(crate) struct Lifecycle {
    pub(crate) state: State,
    deferred: VecDeque<DeferredOp>,
}

impl Lifecycle {
    pub(crate) fn new() -> Self {
        Self {
            state: State::New,
            deferred: VecDeque::new(),
        }
    }

    /// Queues `op` to run once the open settles; its result is delivered on
    /// the returned channel.
    pub(crate) fn defer<T, F, Fut>(&mut self, op: F) -> oneshot::Receiver<Result<T>>
    where
        T: Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.deferred.push_back(Box::new(move |opened: Result<()>| {
            Box::pin(async move {
                let result = match opened {
                    Ok(()) => op().await,
                    Err(e) => Err(e),
                };
                // The caller may have stopped waiting
                let _ = tx.send(result);
            }) as BoxFuture<'static, ()>
        }));
        rx
    }

    /// Takes everything queued so far, in FIFO order.
    pub(crate) fn take_deferred(&mut self) -> Vec<DeferredOp> {
        self.deferred.drain(..).collect()
    }

    pub(crate) fn has_deferred(&self) -> bool {
        !self.deferred.is_empty()
    }
}

/// Waits for a deferred operation's result.
pub(crate) async fn deferred_result<T>(rx: oneshot::Receiver<Result<T>>) -> Result<T> {
    rx.await.unwrap_or(Err(Error::NotOpen))
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[tokio::test]
    async fn deferred_ops_run_in_order() {
        let mut lifecycle = Lifecycle::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        let receivers: Vec<_> = (0..3)
            .map(|i| {
                let log = Arc::clone(&log);
                lifecycle.defer(move || async move {
                    log.lock().push(i);
                    Ok(i)
                })
            })
            .collect();

        for op in lifecycle.take_deferred() {
            op(Ok(())).await;
        }
        assert!(!lifecycle.has_deferred());
        assert_eq!(*log.lock(), vec![0, 1, 2]);

        let mut results = Vec::new();
        for rx in receivers {
            results.push(deferred_result(rx).await.unwrap());
        }
        assert_eq!(results, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn failed_open_rejects_deferred_ops() {
        let mut lifecycle = Lifecycle::new();
        let rx = lifecycle.defer(|| async { Ok::<_, Error>(()) });
        for op in lifecycle.take_deferred() {
            op(Err(Error::AlreadyClosing)).await;
        }
        assert!(matches!(deferred_result(rx).await, Err(Error::AlreadyClosing)));
    }

    #[tokio::test]
    async fn dropped_op_reports_not_open() {
        let mut lifecycle = Lifecycle::new();
        let rx = lifecycle.defer(|| async { Ok::<_, Error>(()) });
        drop(lifecycle);
        assert!(matches!(deferred_result(rx).await, Err(Error::NotOpen)));
    }

    #[tokio::test]
    async fn settle_returns_published_outcome() {
        let (tx, rx) = settle_channel();
        tx.send_replace(Some(Err(Error::Aborted)));
        assert!(matches!(settle(rx).await, Err(Error::Aborted)));

        let (tx, rx) = settle_channel();
        drop(tx);
        assert!(matches!(settle(rx).await, Err(Error::NotOpen)));
    }
}
