//! One-shot utterance completion.
//!
//! A [`CompletionNotifier`] travels with its utterance through the queue,
//! the worker and finally the ring buffer's drain markers. Firing consumes
//! it, so an utterance is reported at most once; the dispatcher fires it on
//! every exit path so it is reported at least once.
//!
//! Firing never blocks: the audio thread fires drain markers, so delivery is
//! a `try_send`. A full or disconnected channel drops the event.

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use std::time::Duration;
use tracing::warn;

use super::events::{UtteranceEvent, UtteranceEventKind};

/// Sending half. Owned by the utterance until fired.
#[derive(Debug)]
pub struct CompletionNotifier {
    utterance_id: u64,
    tx: Sender<UtteranceEvent>,
}

/// Receiving half returned to the caller of `speak`.
#[derive(Debug)]
pub struct CompletionHandle {
    utterance_id: u64,
    rx: Receiver<UtteranceEvent>,
}

/// Create a dedicated notifier/handle pair for one utterance.
pub fn oneshot(utterance_id: u64) -> (CompletionNotifier, CompletionHandle) {
    let (tx, rx) = bounded(1);
    (
        CompletionNotifier { utterance_id, tx },
        CompletionHandle { utterance_id, rx },
    )
}

/// Create a notifier that reports into a shared channel (one channel, many
/// utterances). The channel should be unbounded or generously sized.
pub fn routed(utterance_id: u64, tx: Sender<UtteranceEvent>) -> CompletionNotifier {
    CompletionNotifier { utterance_id, tx }
}

impl CompletionNotifier {
    pub fn utterance_id(&self) -> u64 {
        self.utterance_id
    }

    /// Deliver the outcome. Consumes the notifier.
    pub fn fire(self, kind: UtteranceEventKind) {
        let event = UtteranceEvent {
            utterance_id: self.utterance_id,
            kind,
        };
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!(utterance_id = self.utterance_id, "completion channel full, event dropped");
            }
            // Nobody is listening any more.
            Err(TrySendError::Disconnected(_)) => {}
        }
    }
}

impl CompletionHandle {
    pub fn utterance_id(&self) -> u64 {
        self.utterance_id
    }

    /// Block until the utterance is reported. `None` if the notifier was
    /// dropped without firing.
    pub fn wait(&self) -> Option<UtteranceEvent> {
        self.rx.recv().ok()
    }

    pub fn wait_timeout(&self, timeout: Duration) -> Option<UtteranceEvent> {
        match self.rx.recv_timeout(timeout) {
            Ok(ev) => Some(ev),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Non-blocking poll.
    pub fn try_get(&self) -> Option<UtteranceEvent> {
        self.rx.try_recv().ok()
    }
}
