//! `WavFileSink`: renders the pull stream into a 16-bit PCM WAV file.
//!
//! A `vocalis-render` thread pulls `chunk_frames` at a time while started.
//! With `realtime` it sleeps one chunk duration between pulls, so the file
//! matches what a speaker would have played, underruns included. Without it
//! the thread only yields briefly and the file fills faster than real time.

use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use hound::{SampleFormat, WavSpec, WavWriter};
use parking_lot::Mutex;
use tracing::{debug, error, info};

use super::{run_flag::RunFlag, AudioProvider, AudioSink, SinkFormat};
use crate::error::{Result, VocalisError};

type Writer = WavWriter<BufWriter<File>>;

const FAST_RENDER_PAUSE: Duration = Duration::from_micros(200);

/// Configuration for [`WavFileSink`].
#[derive(Debug, Clone)]
pub struct WavFileSinkConfig {
    pub path: PathBuf,
    /// Default: 22050.
    pub sample_rate: u32,
    /// Default: 2.
    pub channels: usize,
    /// Default: 512.
    pub chunk_frames: usize,
    /// Default: 4.
    pub buffer_chunks: usize,
    /// Pace pulls at playback speed. Default: true.
    pub realtime: bool,
}

impl Default for WavFileSinkConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("vocalis-output.wav"),
            sample_rate: 22_050,
            channels: 2,
            chunk_frames: 512,
            buffer_chunks: 4,
            realtime: true,
        }
    }
}

pub struct WavFileSink {
    config: WavFileSinkConfig,
    provider: Option<Arc<dyn AudioProvider>>,
    writer: Arc<Mutex<Option<Writer>>>,
    run: Arc<RunFlag>,
    thread: Option<JoinHandle<()>>,
}

impl WavFileSink {
    pub fn new(config: WavFileSinkConfig) -> Self {
        Self {
            config,
            provider: None,
            writer: Arc::new(Mutex::new(None)),
            run: Arc::new(RunFlag::default()),
            thread: None,
        }
    }

    fn join_render_thread(&mut self) {
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                error!("render thread panicked");
            }
        }
    }

    /// Finish the file header. Further pulls are discarded.
    pub fn finalize(&mut self) -> Result<()> {
        self.stop();
        if let Some(writer) = self.writer.lock().take() {
            writer.finalize()?;
            info!(path = %self.config.path.display(), "wav output finalized");
        }
        Ok(())
    }
}

fn render_loop(
    provider: Arc<dyn AudioProvider>,
    writer: Arc<Mutex<Option<Writer>>>,
    run: Arc<RunFlag>,
    chunk_frames: usize,
    channels: usize,
    pause: Duration,
) {
    let mut buf = vec![0i16; chunk_frames * channels];
    while let Some(token) = run.token() {
        let keep_going = provider.fill_audio_buffer(&mut buf, chunk_frames, channels);
        {
            let mut guard = writer.lock();
            let Some(w) = guard.as_mut() else {
                break;
            };
            for &s in &buf {
                if let Err(e) = w.write_sample(s) {
                    error!("wav write failed: {e}");
                    run.stop();
                    return;
                }
            }
        }
        // A `start` since the pull began keeps the thread rendering.
        if !keep_going && run.finish(token) {
            debug!("provider finished, render thread idle");
            break;
        }
        std::thread::sleep(pause);
    }
    if let Some(w) = writer.lock().as_mut() {
        if let Err(e) = w.flush() {
            error!("wav flush failed: {e}");
        }
    }
}

impl AudioSink for WavFileSink {
    fn init(&mut self, provider: Arc<dyn AudioProvider>) -> Result<()> {
        if self.config.channels == 0 || self.config.channels > u16::MAX as usize {
            return Err(VocalisError::config(format!(
                "wav sink channel count {} unsupported",
                self.config.channels
            )));
        }
        if self.config.sample_rate == 0 || self.config.chunk_frames == 0 {
            return Err(VocalisError::config(
                "wav sink needs a non-zero sample rate and chunk size",
            ));
        }
        let spec = WavSpec {
            channels: self.config.channels as u16,
            sample_rate: self.config.sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let writer = WavWriter::create(&self.config.path, spec)?;
        *self.writer.lock() = Some(writer);
        self.provider = Some(provider);
        info!(path = %self.config.path.display(), sample_rate = spec.sample_rate, channels = spec.channels, "wav output opened");
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        let provider = self
            .provider
            .clone()
            .ok_or_else(|| VocalisError::AudioStream("sink not initialised".into()))?;
        if self.run.start() {
            return Ok(());
        }
        // Stopped: any previous render thread has left its loop.
        self.join_render_thread();

        let pause = if self.config.realtime {
            Duration::from_secs_f64(self.config.chunk_frames as f64 / self.config.sample_rate as f64)
        } else {
            FAST_RENDER_PAUSE
        };
        let writer = Arc::clone(&self.writer);
        let run = Arc::clone(&self.run);
        let chunk_frames = self.config.chunk_frames;
        let channels = self.config.channels;
        let spawned = std::thread::Builder::new()
            .name("vocalis-render".into())
            .spawn(move || render_loop(provider, writer, run, chunk_frames, channels, pause));
        match spawned {
            Ok(handle) => self.thread = Some(handle),
            Err(e) => {
                self.run.stop();
                return Err(e.into());
            }
        }
        Ok(())
    }

    fn stop(&mut self) {
        self.run.stop();
        self.join_render_thread();
    }

    fn format(&self) -> SinkFormat {
        SinkFormat {
            sample_rate: self.config.sample_rate,
            channels: self.config.channels,
            chunk_frames: self.config.chunk_frames,
            total_buffer_frames: self.config.chunk_frames * self.config.buffer_chunks,
        }
    }
}

impl Drop for WavFileSink {
    fn drop(&mut self) {
        if let Err(e) = self.finalize() {
            error!("failed to finalize wav output: {e}");
        }
    }
}
