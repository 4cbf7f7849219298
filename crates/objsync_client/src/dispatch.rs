//! Callback delivery.
//!
//! The receive loop of a connection never runs subscriber callbacks itself.
//! Each subscriber owns a [`Dispatcher`] that remembers the runtime the
//! subscriber was created on and runs callbacks there, one at a time, in
//! the order events arrived.

use std::panic::{catch_unwind, AssertUnwindSafe};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, warn};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Ordered delivery of callbacks onto a captured execution context.
#[derive(Clone)]
pub struct Dispatcher {
    queue: Option<mpsc::UnboundedSender<Job>>,
}

impl Dispatcher {
    /// Captures the current tokio runtime.
    ///
    /// Outside a runtime the dispatcher delivers inline on the calling
    /// thread.
    pub fn capture() -> Self {
        match Handle::try_current() {
            Ok(handle) => Self::on(&handle),
            Err(_) => Self::inline(),
        }
    }

    /// Delivers on the given runtime.
    pub fn on(handle: &Handle) -> Self {
        let (sender, mut receiver) = mpsc::unbounded_channel::<Job>();
        handle.spawn(async move {
            while let Some(job) = receiver.recv().await {
                run(job);
            }
            debug!("dispatcher drained");
        });
        Self {
            queue: Some(sender),
        }
    }

    /// Delivers inline on whichever thread dispatches.
    pub fn inline() -> Self {
        Self { queue: None }
    }

    /// Returns true if deliveries run inline.
    pub fn is_inline(&self) -> bool {
        self.queue.is_none()
    }

    /// Schedules a callback.
    pub fn dispatch<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        match &self.queue {
            Some(queue) => {
                if let Err(rejected) = queue.send(Box::new(job)) {
                    debug!("dispatcher runtime is gone, delivering inline");
                    run(rejected.0);
                }
            }
            None => run(Box::new(job)),
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("inline", &self.is_inline())
            .finish()
    }
}

fn run(job: Job) {
    if catch_unwind(AssertUnwindSafe(job)).is_err() {
        warn!("subscriber callback panicked");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[test]
    fn inline_outside_runtime() {
        let dispatcher = Dispatcher::capture();
        assert!(dispatcher.is_inline());

        let hits = Arc::new(Mutex::new(0));
        let counter = hits.clone();
        dispatcher.dispatch(move || *counter.lock() += 1);
        assert_eq!(*hits.lock(), 1);
    }

    #[tokio::test]
    async fn preserves_order() {
        let dispatcher = Dispatcher::capture();
        assert!(!dispatcher.is_inline());

        let seen = Arc::new(Mutex::new(Vec::new()));
        let (done_tx, done_rx) = tokio::sync::oneshot::channel();
        for i in 0..50 {
            let seen = seen.clone();
            dispatcher.dispatch(move || seen.lock().push(i));
        }
        dispatcher.dispatch(move || {
            let _ = done_tx.send(());
        });

        done_rx.await.unwrap();
        assert_eq!(*seen.lock(), (0..50).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn panicking_callback_does_not_stop_delivery() {
        let dispatcher = Dispatcher::capture();
        let (done_tx, done_rx) = tokio::sync::oneshot::channel();

        dispatcher.dispatch(|| panic!("boom"));
        dispatcher.dispatch(move || {
            let _ = done_tx.send(());
        });

        done_rx.await.unwrap();
    }

    #[test]
    fn delivers_on_captured_runtime_from_other_thread() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let dispatcher = Dispatcher::on(runtime.handle());
        let (tx, rx) = tokio::sync::oneshot::channel();

        std::thread::spawn(move || {
            dispatcher.dispatch(move || {
                let _ = tx.send(std::thread::current().id());
            });
        })
        .join()
        .unwrap();

        let delivered_on = runtime.block_on(rx).unwrap();
        assert_eq!(delivered_on, std::thread::current().id());
    }
}
