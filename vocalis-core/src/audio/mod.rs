//! Audio output: the pull contract between the dispatcher and a sink.
//!
//! # Design constraints
//!
//! A sink calls [`AudioProvider::fill_audio_buffer`] from its own thread,
//! often an OS audio thread at elevated priority. The provider **must not**:
//! - Allocate heap memory
//! - Block on the dispatcher's control mutex or condvar
//! - Perform I/O
//!
//! The dispatcher satisfies that contract by reading only from the
//! frame ring buffer and the earcon store.
//!
//! # Threading note
//!
//! `cpal::Stream` is `!Send` on most platforms. [`CpalSink`] therefore owns
//! its stream on a dedicated thread and talks to it over a channel.

pub mod device;
pub mod manual;
pub mod resample;
mod run_flag;
pub mod wav_sink;

#[cfg(feature = "audio-cpal")]
pub mod cpal_sink;

#[cfg(feature = "audio-cpal")]
pub use cpal_sink::{CpalSink, CpalSinkConfig};
pub use manual::ManualSink;
pub use resample::SampleRateConverter;
pub use wav_sink::{WavFileSink, WavFileSinkConfig};

use std::sync::Arc;

use crate::error::Result;

/// Shape of the stream a sink pulls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SinkFormat {
    pub sample_rate: u32,
    pub channels: usize,
    /// Frames the sink prefers to pull per callback.
    pub chunk_frames: usize,
    /// Total buffering depth the sink wants the producer to keep, in frames.
    pub total_buffer_frames: usize,
}

/// Producer side of the pull contract.
pub trait AudioProvider: Send + Sync {
    /// Fill `samples` with `frame_count * channel_count` interleaved samples.
    ///
    /// # Returns
    /// `false` once the stream is over and the sink may stop calling.
    fn fill_audio_buffer(&self, samples: &mut [i16], frame_count: usize, channel_count: usize)
        -> bool;
}

/// Platform output. Dispatcher code depends only on this trait.
pub trait AudioSink: Send {
    /// Bind the sink to the provider it will pull from. Called once before
    /// the first `start`.
    ///
    /// # Errors
    /// Device or file failures, typed per sink.
    fn init(&mut self, provider: Arc<dyn AudioProvider>) -> Result<()>;

    /// Begin (or resume) pulling.
    fn start(&mut self) -> Result<()>;

    /// Stop pulling. Safe to call repeatedly.
    fn stop(&mut self);

    /// Valid after a successful `init`.
    fn format(&self) -> SinkFormat;
}

/// Stub when the `audio-cpal` feature is disabled.
#[cfg(not(feature = "audio-cpal"))]
pub mod cpal_sink {
    use super::{AudioProvider, AudioSink, SinkFormat};
    use crate::error::{Result, VocalisError};
    use std::sync::Arc;

    #[derive(Debug, Clone, Default)]
    pub struct CpalSinkConfig {
        pub preferred_device: Option<String>,
        pub chunk_frames: usize,
        pub buffer_chunks: usize,
    }

    pub struct CpalSink {
        config: CpalSinkConfig,
    }

    impl CpalSink {
        pub fn new(config: CpalSinkConfig) -> Self {
            Self { config }
        }
    }

    impl AudioSink for CpalSink {
        fn init(&mut self, _provider: Arc<dyn AudioProvider>) -> Result<()> {
            Err(VocalisError::AudioStream(
                "compiled without audio-cpal feature".into(),
            ))
        }

        fn start(&mut self) -> Result<()> {
            Err(VocalisError::AudioStream(
                "compiled without audio-cpal feature".into(),
            ))
        }

        fn stop(&mut self) {}

        fn format(&self) -> SinkFormat {
            SinkFormat {
                sample_rate: 0,
                channels: 0,
                chunk_frames: self.config.chunk_frames,
                total_buffer_frames: self.config.chunk_frames * self.config.buffer_chunks,
            }
        }
    }
}

#[cfg(not(feature = "audio-cpal"))]
pub use cpal_sink::{CpalSink, CpalSinkConfig};
