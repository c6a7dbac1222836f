//! Streaming mono sample-rate conversion using a rubato `FastFixedIn`
//! resampler.
//!
//! ## Design
//!
//! Engines push i16 PCM at their voice's rate; sinks want their own rate.
//! `SampleRateConverter` sits between an engine and any [`AudioReceiver`],
//! accumulating input into fixed rubato chunks so the output is the same no
//! matter how the input was split across calls. Converted samples are clipped
//! back to i16 and forwarded as soon as a chunk is processed.
//!
//! The resampler's filter delay is trimmed from the head of the stream, and
//! [`SampleRateConverter::flush`] feeds silence until exactly
//! `round(frames_in * dst / src)` frames have been forwarded, then signals
//! end-of-stream downstream.
//!
//! All scratch buffers are allocated at construction; `receive` does not
//! allocate.
//!
//! ## Usage
//!
//! ```ignore
//! let mut rc = SampleRateConverter::new(ring_writer, 22_050, 44_100, 512)?;
//! engine.synthesize(text, &mut rc)?; // engine calls rc.done() at the end
//! ```

use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use tracing::debug;

use crate::error::{Result, VocalisError};
use crate::synthesis::{AudioReceiver, CallbackStatus};

/// Smallest rubato chunk accepted. Shorter chunks leave the cubic kernel no
/// room at strong downsampling ratios.
pub const MIN_CHUNK_FRAMES: usize = 64;

/// Upper bound on silent chunks fed during `flush`.
const MAX_FLUSH_CHUNKS: usize = 64;

/// Mono rate converter that forwards into `D`.
pub struct SampleRateConverter<D> {
    dest: D,
    source_rate: u32,
    dest_rate: u32,
    resampler: FastFixedIn<f32>,
    chunk_frames: usize,
    /// Pending input, always shorter than `chunk_frames` between calls.
    input: Vec<f32>,
    /// rubato output buffer: `[1][output_frames_max]`.
    output: Vec<Vec<f32>>,
    pcm: Vec<i16>,
    /// Filter delay frames still to discard from the head of the output.
    delay_left: usize,
    frames_in: u64,
    frames_out: u64,
    /// Output length cap; only set while flushing.
    limit: Option<u64>,
}

impl<D: AudioReceiver> SampleRateConverter<D> {
    /// Create a converter from `source_rate` to `dest_rate` feeding `dest`.
    ///
    /// # Errors
    /// `VocalisError::Configuration` for zero rates, and
    /// `VocalisError::Resample` if rubato rejects the ratio.
    pub fn new(dest: D, source_rate: u32, dest_rate: u32, chunk_frames: usize) -> Result<Self> {
        if source_rate == 0 || dest_rate == 0 {
            return Err(VocalisError::config(format!(
                "sample rates must be non-zero (from={source_rate}, to={dest_rate})"
            )));
        }
        let chunk_frames = chunk_frames.max(MIN_CHUNK_FRAMES);
        let ratio = dest_rate as f64 / source_rate as f64;

        let resampler = FastFixedIn::<f32>::new(
            ratio,
            1.0, // fixed ratio
            PolynomialDegree::Cubic,
            chunk_frames,
            1, // mono
        )
        .map_err(|e| VocalisError::Resample(format!("resampler init: {e}")))?;

        let max_out = resampler.output_frames_max();
        let delay = resampler.output_delay();

        debug!(
            source_rate,
            dest_rate, chunk_frames, max_out, delay, "sample rate converter created"
        );

        Ok(Self {
            dest,
            source_rate,
            dest_rate,
            resampler,
            chunk_frames,
            input: Vec::with_capacity(chunk_frames),
            output: vec![vec![0f32; max_out]; 1],
            pcm: Vec::with_capacity(max_out),
            delay_left: delay,
            frames_in: 0,
            frames_out: 0,
            limit: None,
        })
    }

    pub fn source_rate(&self) -> u32 {
        self.source_rate
    }

    pub fn dest_rate(&self) -> u32 {
        self.dest_rate
    }

    pub fn destination(&self) -> &D {
        &self.dest
    }

    pub fn destination_mut(&mut self) -> &mut D {
        &mut self.dest
    }

    pub fn into_inner(self) -> D {
        self.dest
    }

    /// Frames forwarded downstream so far.
    pub fn frames_out(&self) -> u64 {
        self.frames_out
    }

    /// Push mono samples at the source rate.
    ///
    /// # Errors
    /// `VocalisError::Configuration` when `sample_rate` differs from the
    /// configured source rate or `channels != 1`.
    pub fn push(&mut self, sample_rate: u32, channels: usize, data: &[i16]) -> Result<CallbackStatus> {
        if sample_rate != self.source_rate {
            return Err(VocalisError::config(format!(
                "converter expects {} Hz input, got {sample_rate} Hz",
                self.source_rate
            )));
        }
        if channels != 1 {
            return Err(VocalisError::config(format!(
                "converter only resamples mono audio, got {channels} channels"
            )));
        }

        let mut rest = data;
        while !rest.is_empty() {
            let room = self.chunk_frames - self.input.len();
            let (now, later) = rest.split_at(room.min(rest.len()));
            self.input
                .extend(now.iter().map(|&s| f32::from(s) / 32768.0));
            self.frames_in += now.len() as u64;
            rest = later;

            if self.input.len() == self.chunk_frames
                && self.process_chunk()? == CallbackStatus::Halt
            {
                return Ok(CallbackStatus::Halt);
            }
        }
        Ok(CallbackStatus::Continue)
    }

    /// Drain the filter with silence, forward the tail and signal
    /// end-of-stream to the destination.
    pub fn flush(&mut self) -> Result<()> {
        let expected =
            (self.frames_in as f64 * self.dest_rate as f64 / self.source_rate as f64).round() as u64;
        self.limit = Some(expected);

        let mut rounds = 0;
        while self.frames_out < expected && rounds < MAX_FLUSH_CHUNKS {
            self.input.resize(self.chunk_frames, 0.0);
            if self.process_chunk()? == CallbackStatus::Halt {
                return Ok(());
            }
            rounds += 1;
        }
        self.input.clear();
        self.dest.done()
    }

    fn process_chunk(&mut self) -> Result<CallbackStatus> {
        let (_consumed, produced) = self
            .resampler
            .process_into_buffer(&[&self.input[..]], &mut self.output, None)
            .map_err(|e| VocalisError::Resample(e.to_string()))?;
        self.input.clear();

        let skip = self.delay_left.min(produced);
        self.delay_left -= skip;
        let mut fresh = &self.output[0][skip..produced];

        if let Some(limit) = self.limit {
            let room = limit.saturating_sub(self.frames_out) as usize;
            fresh = &fresh[..fresh.len().min(room)];
        }
        if fresh.is_empty() {
            return Ok(CallbackStatus::Continue);
        }

        self.pcm.clear();
        self.pcm.extend(fresh.iter().map(|&v| clip_to_i16(v)));
        self.frames_out += self.pcm.len() as u64;
        self.dest.receive(self.dest_rate, 1, &self.pcm)
    }
}

impl<D: AudioReceiver> AudioReceiver for SampleRateConverter<D> {
    fn receive(
        &mut self,
        sample_rate: u32,
        channels: usize,
        data: &[i16],
    ) -> Result<CallbackStatus> {
        self.push(sample_rate, channels, data)
    }

    fn done(&mut self) -> Result<()> {
        self.flush()
    }
}

/// Scale a normalized sample back to i16, saturating at the range bounds.
pub fn clip_to_i16(v: f32) -> i16 {
    (v * 32768.0).round().clamp(i16::MIN as f32, i16::MAX as f32) as i16
}
