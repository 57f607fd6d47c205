// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Thread-per-connection worker driving a send strategy's backlog.
//!
//! The strategy signals [`WorkNotifier::work_available`] whenever it parks
//! data (backpressure, partial send, relink). The worker thread then calls
//! [`SynchWorker::perform_work`] until it reports there is nothing left:
//!
//! ```text
//!   MoreToDo         -> call again immediately
//!   CloggedResource  -> wait for a signal or `clogged_retry_delay`, retry
//!   NoMoreToDo       -> sleep until the next signal
//!   BrokenResource   -> exit
//! ```
//!
//! The worker holds only a weak reference to the strategy, so dropping the
//! strategy ends the thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};

use crate::error::Result;

/// Result of one unit of background work.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum WorkOutcome {
    /// Nothing queued; sleep until signaled
    NoMoreToDo,
    /// More queued data can be sent right away
    MoreToDo,
    /// The link pushed back; retry after a delay
    CloggedResource,
    /// The link is gone for good
    BrokenResource,
}

impl std::fmt::Display for WorkOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            WorkOutcome::NoMoreToDo => "no-more-to-do",
            WorkOutcome::MoreToDo => "more-to-do",
            WorkOutcome::CloggedResource => "clogged",
            WorkOutcome::BrokenResource => "broken",
        };
        write!(f, "{}", s)
    }
}

/// Something a worker thread can drive.
pub trait SynchWorker: Send + Sync {
    fn perform_work(&self) -> WorkOutcome;
}

/// Wake-up seam between a strategy and its worker.
pub trait WorkNotifier: Send + Sync {
    fn work_available(&self);
}

/// Handle to one worker thread.
///
/// When dropped, signals the thread to stop and waits for it to join.
pub struct ThreadSynch {
    wake: Sender<()>,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl ThreadSynch {
    /// Spawn a worker named `name` driving `worker`.
    pub fn spawn(
        worker: Weak<dyn SynchWorker>,
        name: &str,
        clogged_retry_delay: Duration,
    ) -> Result<Self> {
        // One pending wake-up is enough; further signals coalesce.
        let (wake, signals) = channel::bounded(1);
        let stop = Arc::new(AtomicBool::new(false));
        let stop_clone = Arc::clone(&stop);

        let thread = thread::Builder::new()
            .name(name.into())
            .spawn(move || worker_loop(worker, signals, stop_clone, clogged_retry_delay))?;

        log::debug!("[synch] worker '{}' started", name);
        Ok(Self {
            wake,
            stop,
            thread: Some(thread),
        })
    }

    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Signal the thread and wait for it to exit.
    ///
    /// When called from the worker thread itself the join is skipped; the
    /// thread exits once the current unit of work returns.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Release);
        let _ = self.wake.try_send(());
        if let Some(handle) = self.thread.take() {
            if handle.thread().id() == thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                log::error!("[synch] worker thread panicked");
            }
        }
    }
}

impl WorkNotifier for ThreadSynch {
    fn work_available(&self) {
        // Full means a wake-up is already pending.
        let _ = self.wake.try_send(());
    }
}

impl Drop for ThreadSynch {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for ThreadSynch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadSynch")
            .field("running", &self.is_running())
            .finish()
    }
}

fn worker_loop(
    worker: Weak<dyn SynchWorker>,
    signals: Receiver<()>,
    stop: Arc<AtomicBool>,
    clogged_retry_delay: Duration,
) {
    while !stop.load(Ordering::Acquire) {
        let Some(strong) = worker.upgrade() else {
            break;
        };
        let outcome = strong.perform_work();
        drop(strong);

        log::trace!("[synch] perform_work -> {}", outcome);
        match outcome {
            WorkOutcome::MoreToDo => {}
            WorkOutcome::CloggedResource => match signals.recv_timeout(clogged_retry_delay) {
                Ok(()) | Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            },
            WorkOutcome::NoMoreToDo => {
                if signals.recv().is_err() {
                    break;
                }
            }
            WorkOutcome::BrokenResource => {
                log::debug!("[synch] link broken, worker exiting");
                break;
            }
        }
    }
    log::debug!("[synch] worker stopped");
}
