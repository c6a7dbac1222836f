//! `ToneEngine`: dependency-free stand-in synthesizer.
//!
//! Renders every letter or digit as a short sine burst and everything else
//! as silence, so the full dispatcher/resampler/sink path can run without a
//! linguistic backend. Output is deterministic for a given text, voice and
//! property set.
//!
//! Prosody follows the property levels: rate shortens segments, pitch scales
//! the tone frequency, volume scales the amplitude.

use std::f32::consts::TAU;

use tracing::debug;

use crate::error::{Result, VocalisError};
use crate::synthesis::properties::{EngineProperties, PITCH_RANGE, RATE_RANGE, VOLUME_RANGE};
use crate::synthesis::voice::{Voice, VoiceGender, VoiceQuality};
use crate::synthesis::{AudioReceiver, CallbackStatus, SpeechEngine};

/// Duration of one letter at the default rate.
pub const LETTER_MS: f32 = 90.0;
/// Duration of whitespace at the default rate.
pub const SPACE_MS: f32 = 60.0;
/// Duration of punctuation and other symbols at the default rate.
pub const PAUSE_MS: f32 = 150.0;

const BASE_FREQ_HZ: f32 = 220.0;
const BASE_AMPLITUDE: f32 = 0.3;
const RAMP_MS: f32 = 5.0;
const DEFAULT_CHUNK_FRAMES: usize = 256;

pub struct ToneEngine {
    voices: Vec<Voice>,
    current_voice: usize,
    props: EngineProperties,
    chunk_frames: usize,
    initialized: bool,
    scratch: Vec<i16>,
}

impl ToneEngine {
    pub fn new() -> Self {
        Self::with_voices(default_voices())
    }

    /// Use a custom voice catalogue. An empty list falls back to the
    /// built-in voices.
    pub fn with_voices(voices: Vec<Voice>) -> Self {
        let voices = if voices.is_empty() {
            default_voices()
        } else {
            voices
        };
        Self {
            voices,
            current_voice: 0,
            props: EngineProperties::default(),
            chunk_frames: DEFAULT_CHUNK_FRAMES,
            initialized: false,
            scratch: Vec::new(),
        }
    }

    /// Frames pushed per `receive` call.
    pub fn with_chunk_frames(mut self, chunk_frames: usize) -> Self {
        self.chunk_frames = chunk_frames.max(1);
        self
    }

    pub fn properties(&self) -> EngineProperties {
        self.props
    }

    /// Frequency and nominal duration for one character.
    fn segment(ch: char) -> (Option<f32>, f32) {
        let step = if ch.is_ascii_alphabetic() {
            Some((ch.to_ascii_lowercase() as u8 - b'a') as i32)
        } else if ch.is_ascii_digit() {
            Some((ch as u8 - b'0') as i32 + 3)
        } else if ch.is_alphanumeric() {
            Some(ch as i32)
        } else {
            None
        };
        match step {
            Some(step) => {
                let semitones = (step % 12) as f32;
                (Some(BASE_FREQ_HZ * (semitones / 12.0).exp2()), LETTER_MS)
            }
            None if ch.is_whitespace() => (None, SPACE_MS),
            None => (None, PAUSE_MS),
        }
    }

    fn push_chunk(
        &mut self,
        receiver: &mut dyn AudioReceiver,
        total: &mut usize,
    ) -> Result<CallbackStatus> {
        if self.scratch.is_empty() {
            return Ok(CallbackStatus::Continue);
        }
        let status = receiver.receive(self.sample_rate(), 1, &self.scratch)?;
        *total += self.scratch.len();
        self.scratch.clear();
        Ok(status)
    }
}

impl Default for ToneEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn default_voices() -> Vec<Voice> {
    [("Tone US", "en-US", VoiceGender::Female), ("Tone GB", "en-GB", VoiceGender::Male)]
        .into_iter()
        .map(|(name, language, gender)| Voice {
            name: name.into(),
            language: language.into(),
            engine: "tone".into(),
            sample_rate: 16_000,
            quality: VoiceQuality::Low,
            region: String::new(),
            gender,
            age: 0,
        })
        .collect()
}

impl SpeechEngine for ToneEngine {
    fn name(&self) -> &str {
        "tone"
    }

    fn init(&mut self) -> Result<()> {
        if self.voices.iter().any(|v| v.sample_rate == 0) {
            return Err(VocalisError::EngineInit(
                "tone voice declares a zero sample rate".into(),
            ));
        }
        self.initialized = true;
        self.scratch = Vec::with_capacity(self.chunk_frames);
        debug!(voices = self.voices.len(), "ToneEngine::init");
        Ok(())
    }

    fn shutdown(&mut self) {
        self.initialized = false;
        self.scratch = Vec::new();
    }

    fn stop(&mut self) {
        self.scratch.clear();
    }

    fn voices(&self) -> Vec<Voice> {
        self.voices.clone()
    }

    fn set_voice(&mut self, index: usize) -> Result<()> {
        if index >= self.voices.len() {
            return Err(VocalisError::InvalidArgument(format!(
                "voice index {index} out of range (0..{})",
                self.voices.len()
            )));
        }
        self.current_voice = index;
        Ok(())
    }

    fn set_rate(&mut self, rate: f32) -> Result<()> {
        self.props.set_rate(rate)
    }

    fn set_pitch(&mut self, pitch: f32) -> Result<()> {
        self.props.set_pitch(pitch)
    }

    fn set_volume(&mut self, volume: f32) -> Result<()> {
        self.props.set_volume(volume)
    }

    fn restore_defaults(&mut self) {
        self.props.restore_defaults();
    }

    fn get_property(&self, name: &str) -> Result<String> {
        self.props.get(name)
    }

    fn set_property(&mut self, name: &str, value: &str) -> Result<()> {
        self.props.set(name, value)
    }

    fn sample_rate(&self) -> u32 {
        self.voices
            .get(self.current_voice)
            .map(|v| v.sample_rate)
            .unwrap_or(16_000)
    }

    fn synthesize(&mut self, text: &str, receiver: &mut dyn AudioReceiver) -> Result<usize> {
        if !self.initialized {
            return Err(VocalisError::Synthesis("tone engine not initialised".into()));
        }

        let rate = self.sample_rate() as f32;
        let speed = RATE_RANGE.factor(self.props.rate).max(0.05);
        let pitch = PITCH_RANGE.factor(self.props.pitch);
        let gain = (BASE_AMPLITUDE * VOLUME_RANGE.factor(self.props.volume)).min(1.0);
        let ramp = (rate * RAMP_MS / 1000.0).max(1.0);

        self.scratch.clear();
        let mut total = 0usize;

        for ch in text.chars() {
            let (freq, ms) = Self::segment(ch);
            let frames = (rate * ms / 1000.0 / speed) as usize;
            for i in 0..frames {
                let sample = match freq {
                    Some(f) => {
                        let t = i as f32;
                        let edge = t.min((frames - 1 - i) as f32);
                        let envelope = (edge / ramp).min(1.0);
                        let v = (TAU * f * pitch * t / rate).sin() * gain * envelope;
                        (v * i16::MAX as f32) as i16
                    }
                    None => 0,
                };
                self.scratch.push(sample);
                if self.scratch.len() >= self.chunk_frames
                    && self.push_chunk(receiver, &mut total)? == CallbackStatus::Halt
                {
                    self.scratch.clear();
                    return Ok(total);
                }
            }
        }

        if self.push_chunk(receiver, &mut total)? == CallbackStatus::Halt {
            return Ok(total);
        }
        receiver.done()?;
        Ok(total)
    }
}
