//! Supervised timer tasks.
//!
//! Every per-connection timer (GBN retransmission, server CLOSEWAIT) runs as
//! its own tokio task owned by a [`TimerHandle`]. The handle carries a
//! cancel signal over a `watch` channel and the task's `JoinHandle`, so a
//! connection being closed can stop its timer and wait for it to finish
//! before the TCB is released.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Cancellation side handed to the timer task.
#[derive(Debug, Clone)]
pub struct CancelToken(watch::Receiver<bool>);

impl CancelToken {
    /// Sleep for `dur`. Returns `false` if cancelled first.
    pub async fn sleep(&mut self, dur: Duration) -> bool {
        if self.is_cancelled() {
            return false;
        }
        tokio::select! {
            _ = tokio::time::sleep(dur) => true,
            _ = self.0.wait_for(|cancelled| *cancelled) => false,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.0.borrow()
    }
}

/// Owner of one running timer task.
#[derive(Debug)]
pub struct TimerHandle {
    cancel: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl TimerHandle {
    /// Spawn `body` with a fresh cancel token.
    pub fn spawn<F, Fut>(body: F) -> Self
    where
        F: FnOnce(CancelToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (cancel, rx) = watch::channel(false);
        let task = tokio::spawn(body(CancelToken(rx)));
        Self { cancel, task }
    }

    /// Ask the task to stop at its next sleep.
    pub fn cancel(&self) {
        self.cancel.send_replace(true);
    }

    /// Cancel and wait for the task to exit.
    pub async fn join(self) {
        self.cancel();
        if let Err(e) = self.task.await {
            if e.is_panic() {
                log::warn!("[timer] timer task panicked: {e}");
            }
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn uncancelled_timer_runs_to_completion() {
        let fired = Arc::new(AtomicU32::new(0));
        let counter = fired.clone();
        let timer = TimerHandle::spawn(|mut cancel| async move {
            if cancel.sleep(Duration::from_millis(10)).await {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(timer.is_finished());
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn join_cancels_a_sleeping_timer() {
        let fired = Arc::new(AtomicU32::new(0));
        let counter = fired.clone();
        let timer = TimerHandle::spawn(|mut cancel| async move {
            while cancel.sleep(Duration::from_secs(30)).await {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });
        tokio::time::timeout(Duration::from_secs(1), timer.join())
            .await
            .expect("join should not wait for the sleep");
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
