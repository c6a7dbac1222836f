//! Event types reported to the host.
//!
//! ## Channels
//!
//! | Event | Delivered through |
//! |-------|-------------------|
//! | `ServiceStatusEvent` | `SpeechService::subscribe_status` (broadcast) |
//! | `UtteranceEvent` | the utterance's `CompletionHandle` or a routed channel |
//!
//! The line protocol in [`super::protocol`] renders both as plain strings;
//! the JSON forms are used by hosts that speak structured messages.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Service status
// ---------------------------------------------------------------------------

/// What `get_status` reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    /// Running, nothing queued, nothing synthesizing.
    Idle,
    /// Running with queued or active utterances.
    Busy,
    /// The service was never started successfully (or has been stopped).
    Error,
}

/// Broadcast whenever the service changes lifecycle state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStatusEvent {
    pub status: ServiceStatus,
    /// Optional human-readable detail (e.g. error message).
    pub detail: Option<String>,
}

// ---------------------------------------------------------------------------
// Utterance lifecycle
// ---------------------------------------------------------------------------

/// How an utterance left the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UtteranceEventKind {
    /// Synthesized and fully played out of the ring buffer.
    End,
    /// Stopped mid-synthesis, discarded from the queue, or dropped at shutdown.
    Interrupted,
    /// The engine failed; the engine was reset and the queue moved on.
    Error,
}

/// Fired exactly once per accepted utterance that carries a completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UtteranceEvent {
    /// Caller-supplied id.
    pub utterance_id: u64,
    pub kind: UtteranceEventKind,
}
