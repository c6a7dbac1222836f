//! Counters shared by the control thread, the worker and the playback path.

use std::sync::atomic::{AtomicUsize, Ordering};

use serde::Serialize;

#[derive(Default)]
pub struct ServiceDiagnostics {
    pub utterances_queued: AtomicUsize,
    pub utterances_started: AtomicUsize,
    pub utterances_completed: AtomicUsize,
    pub utterances_interrupted: AtomicUsize,
    pub utterances_failed: AtomicUsize,
    pub frames_written: AtomicUsize,
    pub frames_played: AtomicUsize,
    /// Pull callbacks that got fewer frames than requested mid-utterance.
    pub underruns: AtomicUsize,
    pub backpressure_waits: AtomicUsize,
    pub earcon_mix_errors: AtomicUsize,
}

impl ServiceDiagnostics {
    pub fn reset(&self) {
        for counter in self.counters() {
            counter.store(0, Ordering::Relaxed);
        }
    }

    fn counters(&self) -> [&AtomicUsize; 10] {
        [
            &self.utterances_queued,
            &self.utterances_started,
            &self.utterances_completed,
            &self.utterances_interrupted,
            &self.utterances_failed,
            &self.frames_written,
            &self.frames_played,
            &self.underruns,
            &self.backpressure_waits,
            &self.earcon_mix_errors,
        ]
    }

    pub(crate) fn bump(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add(counter: &AtomicUsize, n: usize) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            utterances_queued: self.utterances_queued.load(Ordering::Relaxed),
            utterances_started: self.utterances_started.load(Ordering::Relaxed),
            utterances_completed: self.utterances_completed.load(Ordering::Relaxed),
            utterances_interrupted: self.utterances_interrupted.load(Ordering::Relaxed),
            utterances_failed: self.utterances_failed.load(Ordering::Relaxed),
            frames_written: self.frames_written.load(Ordering::Relaxed),
            frames_played: self.frames_played.load(Ordering::Relaxed),
            underruns: self.underruns.load(Ordering::Relaxed),
            backpressure_waits: self.backpressure_waits.load(Ordering::Relaxed),
            earcon_mix_errors: self.earcon_mix_errors.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticsSnapshot {
    pub utterances_queued: usize,
    pub utterances_started: usize,
    pub utterances_completed: usize,
    pub utterances_interrupted: usize,
    pub utterances_failed: usize,
    pub frames_written: usize,
    pub frames_played: usize,
    pub underruns: usize,
    pub backpressure_waits: usize,
    pub earcon_mix_errors: usize,
}
