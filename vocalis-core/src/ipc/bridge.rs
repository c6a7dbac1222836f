//! Maps control messages onto a [`SpeechService`].
//!
//! Direct replies come back from [`ControlBridge::handle`]. Completion
//! replies (`end:<id>`) arrive later on [`ControlBridge::completions`], one
//! per accepted `speak`, whatever the outcome.

use std::sync::Arc;

use crossbeam_channel::{unbounded, Receiver, Sender};
use tracing::{debug, warn};

use super::{
    completion,
    events::UtteranceEvent,
    protocol::{parse_message, ControlMessage, ControlResponse, SpeakRequest},
};
use crate::service::{SpeakOptions, SpeechService};
use crate::synthesis::VoicePattern;

pub struct ControlBridge {
    service: Arc<SpeechService>,
    default_voice: Option<VoicePattern>,
    completions_tx: Sender<UtteranceEvent>,
    completions_rx: Receiver<UtteranceEvent>,
}

impl ControlBridge {
    pub fn new(service: Arc<SpeechService>) -> Self {
        let (completions_tx, completions_rx) = unbounded();
        Self {
            service,
            default_voice: None,
            completions_tx,
            completions_rx,
        }
    }

    /// Voice for every `speak`; the protocol itself carries none.
    pub fn with_default_voice(mut self, voice: VoicePattern) -> Self {
        self.default_voice = Some(voice);
        self
    }

    pub fn service(&self) -> &SpeechService {
        &self.service
    }

    /// Completion events for every utterance accepted through this bridge.
    pub fn completions(&self) -> Receiver<UtteranceEvent> {
        self.completions_rx.clone()
    }

    /// Parse and handle one raw message.
    pub fn handle_line(&self, line: &str) -> Option<ControlResponse> {
        parse_message(line).and_then(|msg| self.handle(msg))
    }

    pub fn handle(&self, msg: ControlMessage) -> Option<ControlResponse> {
        debug!(?msg, "control message");
        match msg {
            ControlMessage::StartService => match self.service.start_service() {
                Ok(()) => Some(ControlResponse::Idle),
                Err(e) => {
                    warn!("startService failed: {e}");
                    Some(ControlResponse::Error)
                }
            },
            ControlMessage::Speak(req) => Some(self.speak(req)),
            ControlMessage::Stop => {
                self.service.stop();
                None
            }
            ControlMessage::Status => Some(self.service.get_status().into()),
            ControlMessage::StopService => {
                self.service.stop_service();
                None
            }
        }
    }

    fn speak(&self, req: SpeakRequest) -> ControlResponse {
        let (rate, pitch, volume) = req.normalized();
        let notifier = completion::routed(req.utterance_id, self.completions_tx.clone());
        let mut options = SpeakOptions::default()
            .with_prosody(rate, pitch, volume)
            .with_completion(notifier);
        if let Some(voice) = &self.default_voice {
            options = options.with_voice(voice.clone());
        }
        if !self.service.speak(&req.text, options) {
            debug!(utterance_id = req.utterance_id, "speak while stopped, nothing queued");
        }
        ControlResponse::Busy
    }
}

/// Wire form of a completion: every outcome is reported as `end:<id>`.
pub fn completion_response(event: &UtteranceEvent) -> ControlResponse {
    ControlResponse::End(event.utterance_id)
}
