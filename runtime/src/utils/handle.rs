use crate::Error;
use futures::{channel::oneshot, FutureExt as _};
use prometheus_client::metrics::gauge::Gauge;
use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};

/// Decrements the running gauge once the task finishes or is dropped.
struct Running(Gauge);

impl Drop for Running {
    fn drop(&mut self) {
        self.0.dec();
    }
}

/// Handle to a spawned task.
///
/// Resolves to the output of the task or to [Error::Closed] if the task was dropped
/// before it completed (e.g. because the runtime stopped at its time budget).
pub struct Handle<T>
where
    T: Send + 'static,
{
    receiver: oneshot::Receiver<T>,
}

impl<T> Handle<T>
where
    T: Send + 'static,
{
    pub(crate) fn init<F>(f: F, running: Gauge) -> (impl Future<Output = ()>, Self)
    where
        F: Future<Output = T> + Send + 'static,
    {
        // Increment running counter
        running.inc();
        let running = Running(running);

        // Initialize channel to handle result
        let (sender, receiver) = oneshot::channel();
        let wrapped = async move {
            let _running = running;
            let result = f.await;

            // The handle may have been dropped
            let _ = sender.send(result);
        };
        (wrapped, Self { receiver })
    }
}

impl<T> Future for Handle<T>
where
    T: Send + 'static,
{
    type Output = Result<T, Error>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.receiver.poll_unpin(cx).map_err(|_| Error::Closed)
    }
}
