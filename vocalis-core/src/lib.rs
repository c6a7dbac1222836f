//! # vocalis-core
//!
//! Real-time speech output engine.
//!
//! ## Architecture
//!
//! ```text
//! speak() → utterance queue → vocalis-synth worker
//!                                  │
//!                        SpeechEngine::synthesize
//!                                  │
//!                 SampleRateConverter (engine rate ≠ sink rate)
//!                                  │
//!                       FrameRingBuffer (backpressure)
//!                                  │
//!            AudioSink pull ← PlaybackPath + EarconMixer
//! ```
//!
//! The pull callback never allocates and never waits on the control mutex.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod audio;
pub mod buffering;
pub mod earcon;
pub mod error;
pub mod ipc;
pub mod service;
pub mod synthesis;

// Convenience re-exports for downstream crates
pub use audio::{AudioProvider, AudioSink, ManualSink, SampleRateConverter, SinkFormat};
pub use buffering::FrameRingBuffer;
pub use earcon::EarconMixer;
pub use error::VocalisError;
pub use ipc::bridge::ControlBridge;
pub use ipc::events::{ServiceStatus, ServiceStatusEvent, UtteranceEvent, UtteranceEventKind};
pub use service::{ServiceConfig, SpeakOptions, SpeechService};
pub use synthesis::{EngineHandle, SpeechEngine, ToneEngine, Voice};

#[cfg(feature = "audio-cpal")]
pub use audio::{CpalSink, CpalSinkConfig};
