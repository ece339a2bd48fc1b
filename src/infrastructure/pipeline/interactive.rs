//! Single-threaded queue where results are published.
//!
//! The application owns an [`InteractiveLoop`] and drives it from its UI
//! thread (or task). Workers post publish jobs through an
//! [`InteractiveHandle`]; a post made while a job is already running on the
//! loop executes immediately instead of queueing.

use std::cell::Cell;

use tokio::sync::mpsc;
use tracing::warn;

/// Work item executed on the interactive thread.
pub type InteractiveJob = Box<dyn FnOnce() + Send + 'static>;

thread_local! {
    static ON_INTERACTIVE: Cell<bool> = const { Cell::new(false) };
}

/// Marks the current thread as interactive for the guard's lifetime.
struct InteractiveScope {
    previous: bool,
}

impl InteractiveScope {
    fn enter() -> Self {
        Self {
            previous: ON_INTERACTIVE.with(|flag| flag.replace(true)),
        }
    }
}

impl Drop for InteractiveScope {
    fn drop(&mut self) {
        ON_INTERACTIVE.with(|flag| flag.set(self.previous));
    }
}

/// Posts work to the interactive loop.
#[derive(Debug, Clone)]
pub struct InteractiveHandle {
    tx: mpsc::UnboundedSender<InteractiveJob>,
}

impl InteractiveHandle {
    /// Returns true while executing on the interactive loop.
    #[must_use]
    pub fn is_current() -> bool {
        ON_INTERACTIVE.with(Cell::get)
    }

    /// Runs `job` on the interactive loop.
    ///
    /// Runs it right away when already there.
    pub fn post(&self, job: InteractiveJob) {
        if Self::is_current() {
            job();
            return;
        }
        if self.tx.send(job).is_err() {
            warn!("Interactive loop is gone, dropping job");
        }
    }
}

/// Receiving end of the interactive queue.
pub struct InteractiveLoop {
    rx: mpsc::UnboundedReceiver<InteractiveJob>,
}

impl InteractiveLoop {
    /// Creates a loop and the handle used to post to it.
    #[must_use]
    pub fn new() -> (InteractiveHandle, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (InteractiveHandle { tx }, Self { rx })
    }

    /// Runs `f` as if it were a job on this loop.
    ///
    /// Use this to wrap application code running on the UI thread so that
    /// submissions from it are recognized as interactive.
    pub fn enter<R>(&self, f: impl FnOnce() -> R) -> R {
        let _scope = InteractiveScope::enter();
        f()
    }

    /// Waits for one job and runs it. Returns false once every handle is gone.
    pub async fn turn(&mut self) -> bool {
        match self.rx.recv().await {
            Some(job) => {
                let _scope = InteractiveScope::enter();
                job();
                true
            }
            None => false,
        }
    }

    /// Runs every job already queued without waiting. Returns how many ran.
    pub fn run_pending(&mut self) -> usize {
        let mut count = 0;
        while let Ok(job) = self.rx.try_recv() {
            let _scope = InteractiveScope::enter();
            job();
            count += 1;
        }
        count
    }

    /// Runs jobs until every handle is dropped.
    pub async fn run(mut self) {
        while self.turn().await {}
    }
}

impl std::fmt::Debug for InteractiveLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InteractiveLoop").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_posted_jobs_run_in_order_on_loop() {
        let (handle, mut interactive) = InteractiveLoop::new();
        let log = Arc::new(parking_lot::Mutex::new(Vec::new()));

        for i in 0..3 {
            let log = log.clone();
            handle.post(Box::new(move || {
                log.lock().push((i, InteractiveHandle::is_current()));
            }));
        }
        assert!(log.lock().is_empty());

        assert_eq!(interactive.run_pending(), 3);
        assert_eq!(*log.lock(), vec![(0, true), (1, true), (2, true)]);
        assert!(!InteractiveHandle::is_current());
    }

    #[tokio::test]
    async fn test_post_from_loop_runs_directly() {
        let (handle, mut interactive) = InteractiveLoop::new();
        let count = Arc::new(AtomicUsize::new(0));

        let inner_handle = handle.clone();
        let inner_count = count.clone();
        handle.post(Box::new(move || {
            let c = inner_count.clone();
            inner_handle.post(Box::new(move || {
                c.fetch_add(1, Ordering::SeqCst);
            }));
            // Already executed, not queued.
            assert_eq!(inner_count.load(Ordering::SeqCst), 1);
        }));

        assert!(interactive.turn().await);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(interactive.run_pending(), 0);
    }

    #[tokio::test]
    async fn test_turn_ends_when_handles_dropped() {
        let (handle, mut interactive) = InteractiveLoop::new();
        drop(handle);
        assert!(!interactive.turn().await);
    }

    #[test]
    fn test_enter_marks_thread() {
        let (_handle, interactive) = InteractiveLoop::new();
        assert!(interactive.enter(InteractiveHandle::is_current));
        assert!(!InteractiveHandle::is_current());
    }

    #[test]
    fn test_turn_with_tokio_test_block_on() {
        let (handle, mut interactive) = InteractiveLoop::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        handle.post(Box::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        }));

        assert!(tokio_test::block_on(interactive.turn()));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
