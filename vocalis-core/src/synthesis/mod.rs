//! Speech engine abstraction.
//!
//! The dispatcher never sees how text becomes audio. An engine pushes PCM
//! into an [`AudioReceiver`] as it produces it; the receiver answers each
//! chunk with [`CallbackStatus::Continue`] or [`CallbackStatus::Halt`], and
//! an `Err` aborts synthesis outright.
//!
//! `&mut self` on `synthesize` expresses that engines are stateful. All
//! access goes through [`EngineHandle`]'s `parking_lot::Mutex`.

pub mod properties;
pub mod tone;
pub mod voice;

pub use properties::{EngineProperties, PropertyRange};
pub use tone::ToneEngine;
pub use voice::{Voice, VoicePattern};

use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::Result;

/// Answer to one pushed chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackStatus {
    Continue,
    /// Stop producing audio for this utterance. Not an error.
    Halt,
}

/// Push-style PCM sink. Implemented by the dispatcher's ring writer and by
/// [`crate::audio::resample::SampleRateConverter`], which forwards to
/// another receiver.
pub trait AudioReceiver {
    /// Accept `data.len() / channels` interleaved frames at `sample_rate`.
    fn receive(&mut self, sample_rate: u32, channels: usize, data: &[i16])
        -> Result<CallbackStatus>;

    /// End of stream. Called once after the last `receive`.
    fn done(&mut self) -> Result<()>;
}

impl<R: AudioReceiver + ?Sized> AudioReceiver for &mut R {
    fn receive(
        &mut self,
        sample_rate: u32,
        channels: usize,
        data: &[i16],
    ) -> Result<CallbackStatus> {
        (**self).receive(sample_rate, channels, data)
    }

    fn done(&mut self) -> Result<()> {
        (**self).done()
    }
}

/// Contract for text-to-speech backends.
pub trait SpeechEngine: Send + 'static {
    fn name(&self) -> &str;

    /// One-time setup at service start.
    ///
    /// # Errors
    /// `VocalisError::EngineInit` if the engine cannot be brought up.
    fn init(&mut self) -> Result<()>;

    fn shutdown(&mut self);

    /// Discard any partially synthesized state. Called after an interrupted
    /// or failed utterance so nothing bleeds into the next one.
    fn stop(&mut self);

    fn voices(&self) -> Vec<Voice>;

    fn set_voice(&mut self, index: usize) -> Result<()>;

    /// Normalized `[0, 1]` prosody setters.
    fn set_rate(&mut self, rate: f32) -> Result<()>;
    fn set_pitch(&mut self, pitch: f32) -> Result<()>;
    fn set_volume(&mut self, volume: f32) -> Result<()>;

    fn restore_defaults(&mut self);

    /// Engine-native property access by name (`rate`, `pitch`, `volume`).
    fn get_property(&self, name: &str) -> Result<String>;
    fn set_property(&mut self, name: &str, value: &str) -> Result<()>;

    /// Rate of the PCM this engine pushes.
    fn sample_rate(&self) -> u32;

    fn channels(&self) -> usize {
        1
    }

    /// Synthesize `text`, pushing audio into `receiver` until the text is
    /// exhausted or the receiver halts. Calls `receiver.done()` on normal
    /// completion.
    ///
    /// # Returns
    /// Total samples pushed.
    fn synthesize(&mut self, text: &str, receiver: &mut dyn AudioReceiver) -> Result<usize>;
}

/// Thread-safe reference-counted handle to any `SpeechEngine` implementor.
#[derive(Clone)]
pub struct EngineHandle(pub Arc<Mutex<dyn SpeechEngine>>);

impl EngineHandle {
    pub fn new<E: SpeechEngine>(engine: E) -> Self {
        Self(Arc::new(Mutex::new(engine)))
    }
}

impl std::fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineHandle").finish_non_exhaustive()
    }
}
