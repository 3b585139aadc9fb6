//! Trailing-edge debouncer.

use crate::task::TaskHandle;
use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedSender};

/// Coalesces bursts of triggers into one action.
///
/// The action runs once `window` has passed without a new trigger. A trigger
/// that arrives while the action runs schedules one more run afterwards.
/// Dropping the debouncer cancels anything still pending.
#[derive(Debug)]
pub struct Debouncer {
    tx: UnboundedSender<()>,
    _task: TaskHandle,
}

impl Debouncer {
    /// Creates a debouncer that runs `action` on the trailing edge of each
    /// burst.
    pub fn new<F, Fut>(window: Duration, action: F) -> Self
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (tx, mut rx) = mpsc::unbounded_channel::<()>();
        let task = TaskHandle::spawn(async move {
            while rx.recv().await.is_some() {
                let mut closed = false;
                loop {
                    tokio::select! {
                        () = tokio::time::sleep(window) => break,
                        msg = rx.recv() => {
                            if msg.is_none() {
                                closed = true;
                                break;
                            }
                        }
                    }
                }
                action().await;
                if closed {
                    break;
                }
            }
        });
        Self { tx, _task: task }
    }

    /// Schedules the action, restarting the window.
    pub fn trigger(&self) {
        // The task only stops when the debouncer is dropped.
        let _ = self.tx.send(());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counting(window: Duration) -> (Debouncer, Arc<AtomicUsize>) {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        let debouncer = Debouncer::new(window, move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });
        (debouncer, runs)
    }

    #[tokio::test(start_paused = true)]
    async fn burst_runs_once() {
        let (debouncer, runs) = counting(Duration::from_secs(1));
        for _ in 0..5 {
            debouncer.trigger();
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
        assert_eq!(runs.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn separate_bursts_run_separately() {
        let (debouncer, runs) = counting(Duration::from_secs(1));
        debouncer.trigger();
        tokio::time::sleep(Duration::from_secs(2)).await;
        debouncer.trigger();
        debouncer.trigger();
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_cancels_pending_run() {
        let (debouncer, runs) = counting(Duration::from_secs(1));
        debouncer.trigger();
        tokio::task::yield_now().await;
        drop(debouncer);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }
}
