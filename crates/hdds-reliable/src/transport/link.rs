// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Link abstraction used by the send strategy.
//!
//! A link writes vectored bytes and reports the outcome the way a
//! non-blocking socket does:
//! - `Ok(n)` with `n > 0`: `n` bytes accepted (may be fewer than offered)
//! - `Ok(0)`: peer gone
//! - `Err(WouldBlock)` / `ENOBUFS`: backpressure, retry later
//! - any other error: send failure
//!
//! When the strategy loses its peer it asks the link to `relink()`.

use std::io::{self, IoSlice};

use super::chain::ByteChain;
use crate::config::MAX_SEND_BLOCKS;

/// Result of a reconnection request.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum RelinkStatus {
    /// Reconnection in progress, resume later via `resume_send()`
    #[default]
    Pending,
    /// Link usable again
    Restored,
    /// Link cannot be recovered
    Failed,
}

impl std::fmt::Display for RelinkStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RelinkStatus::Pending => "pending",
            RelinkStatus::Restored => "restored",
            RelinkStatus::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// Byte sink under a send strategy.
pub trait TransportLink: Send + Sync {
    /// Write as much of `bufs` as the link accepts.
    fn send_bytes(&self, bufs: &[IoSlice<'_>]) -> io::Result<usize>;

    /// Try to re-establish the link after a failure.
    fn relink(&self, _do_suspend: bool) -> RelinkStatus {
        RelinkStatus::Pending
    }
}

/// Write the leading blocks of `chain` (at most [`MAX_SEND_BLOCKS`]) in one call.
pub fn send_chain(link: &dyn TransportLink, chain: &ByteChain) -> io::Result<usize> {
    link.send_bytes(&chain.io_slices(MAX_SEND_BLOCKS))
}

/// ENOBUFS is backpressure on datagram sockets.
pub(crate) fn is_backpressure(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock || err.raw_os_error() == Some(ENOBUFS)
}

#[cfg(unix)]
const ENOBUFS: i32 = libc::ENOBUFS;
#[cfg(not(unix))]
const ENOBUFS: i32 = 10055; // WSAENOBUFS

#[cfg(test)]
pub mod mock {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Scripted outcome of one `send_bytes` call.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub enum MockOutcome {
        /// Accept everything offered
        Accept,
        /// Accept at most this many bytes
        Partial(usize),
        /// Return `WouldBlock`
        WouldBlock,
        /// Return `Ok(0)`
        Closed,
        /// Return an error of this kind
        Error(io::ErrorKind),
    }

    /// Mock link for testing.
    ///
    /// Captures written bytes per call and replays scripted outcomes;
    /// accepts everything once the script is exhausted.
    #[derive(Debug, Default)]
    pub struct MockLink {
        /// Bytes accepted, one entry per successful call
        writes: Mutex<Vec<Vec<u8>>>,
        /// Outcomes for upcoming calls
        script: Mutex<VecDeque<MockOutcome>>,
        /// Answer for `relink()`
        relink_status: Mutex<RelinkStatus>,
        send_calls: AtomicUsize,
        relink_calls: AtomicUsize,
    }

    impl MockLink {
        pub fn new() -> Self {
            Self::default()
        }

        /// Queue outcomes for the next calls.
        pub fn script(&self, outcomes: &[MockOutcome]) {
            self.script.lock().extend(outcomes.iter().copied());
        }

        pub fn set_relink_status(&self, status: RelinkStatus) {
            *self.relink_status.lock() = status;
        }

        /// Bytes accepted by each successful call.
        pub fn writes(&self) -> Vec<Vec<u8>> {
            self.writes.lock().clone()
        }

        /// All accepted bytes concatenated.
        pub fn written(&self) -> Vec<u8> {
            self.writes.lock().concat()
        }

        pub fn clear_writes(&self) {
            self.writes.lock().clear();
        }

        pub fn send_calls(&self) -> usize {
            self.send_calls.load(Ordering::Relaxed)
        }

        pub fn relink_calls(&self) -> usize {
            self.relink_calls.load(Ordering::Relaxed)
        }
    }

    impl TransportLink for MockLink {
        fn send_bytes(&self, bufs: &[IoSlice<'_>]) -> io::Result<usize> {
            self.send_calls.fetch_add(1, Ordering::Relaxed);
            let outcome = self.script.lock().pop_front().unwrap_or(MockOutcome::Accept);
            let limit = match outcome {
                MockOutcome::Accept => usize::MAX,
                MockOutcome::Partial(n) => n,
                MockOutcome::WouldBlock => return Err(io::ErrorKind::WouldBlock.into()),
                MockOutcome::Closed => return Ok(0),
                MockOutcome::Error(kind) => return Err(kind.into()),
            };
            let mut accepted = Vec::new();
            for buf in bufs {
                let take = (limit - accepted.len()).min(buf.len());
                accepted.extend_from_slice(&buf[..take]);
                if accepted.len() == limit {
                    break;
                }
            }
            let n = accepted.len();
            self.writes.lock().push(accepted);
            Ok(n)
        }

        fn relink(&self, _do_suspend: bool) -> RelinkStatus {
            self.relink_calls.fetch_add(1, Ordering::Relaxed);
            *self.relink_status.lock()
        }
    }
}
