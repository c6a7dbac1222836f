//! Started/stopped state shared between a sink and its pull thread.
//!
//! The low bit is the running flag; the rest counts `start` calls. A pull
//! takes a [`RunToken`] before asking the provider, and an end-of-stream
//! answer only stops the sink if no `start` happened in between.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub(crate) struct RunFlag(AtomicU64);

/// Snapshot of a running [`RunFlag`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RunToken(u64);

impl RunFlag {
    /// Mark running and open a new generation. Returns whether it was
    /// already running.
    pub fn start(&self) -> bool {
        let prev = self
            .0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |s| Some((s | 1) + 2))
            .unwrap_or_else(|s| s);
        prev & 1 == 1
    }

    pub fn stop(&self) {
        self.0.fetch_and(!1, Ordering::AcqRel);
    }

    pub fn is_running(&self) -> bool {
        self.0.load(Ordering::Acquire) & 1 == 1
    }

    /// `None` while stopped.
    pub fn token(&self) -> Option<RunToken> {
        let s = self.0.load(Ordering::Acquire);
        (s & 1 == 1).then_some(RunToken(s))
    }

    /// Stop on behalf of the pull that took `token`. Fails, leaving the flag
    /// untouched, when the sink was started or stopped since.
    pub fn finish(&self, token: RunToken) -> bool {
        self.0
            .compare_exchange(token.0, token.0 & !1, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}
