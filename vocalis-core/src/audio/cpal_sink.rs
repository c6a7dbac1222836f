//! Hardware output via the cpal backend.
//!
//! The stream lives on a dedicated `vocalis-audio` thread because
//! `cpal::Stream` is `!Send`. `init` blocks until that thread reports the
//! device open (or fails) through a sync oneshot; afterwards `start`/`stop`
//! travel as [`StreamCommand`]s.
//!
//! The data callback converts the provider's i16 frames to whatever sample
//! format the device wants. When the provider reports the stream is over the
//! callback outputs silence and asks the stream thread to pause; `start`
//! resumes it.

use std::sync::Arc;
use std::thread::JoinHandle;

use cpal::{
    traits::{DeviceTrait, StreamTrait},
    SampleFormat, Stream, StreamConfig,
};
use crossbeam_channel::{unbounded, Receiver, Sender};
use tracing::{error, info, warn};

use super::{device::resolve_output_device, run_flag::RunFlag, AudioProvider, AudioSink, SinkFormat};
use crate::error::{Result, VocalisError};

/// Configuration for [`CpalSink`].
#[derive(Debug, Clone)]
pub struct CpalSinkConfig {
    /// Output device name. `None` uses the system default.
    pub preferred_device: Option<String>,
    /// Frames per pull the dispatcher should plan for. Default: 1024.
    pub chunk_frames: usize,
    /// Chunks of synthesized audio kept ahead of playback. Default: 4.
    pub buffer_chunks: usize,
}

impl Default for CpalSinkConfig {
    fn default() -> Self {
        Self {
            preferred_device: None,
            chunk_frames: 1024,
            buffer_chunks: 4,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum StreamCommand {
    Play,
    Pause,
    Shutdown,
}

/// State moved into the device callback.
struct PullState {
    provider: Arc<dyn AudioProvider>,
    run: Arc<RunFlag>,
    commands: Sender<StreamCommand>,
    channels: usize,
}

impl PullState {
    fn pull(&self, buf: &mut [i16]) {
        let Some(token) = self.run.token() else {
            buf.fill(0);
            return;
        };
        let frames = buf.len() / self.channels;
        if !self
            .provider
            .fill_audio_buffer(buf, frames, self.channels)
            && self.run.finish(token)
        {
            let _ = self.commands.try_send(StreamCommand::Pause);
        }
    }
}

pub struct CpalSink {
    config: CpalSinkConfig,
    format: Option<SinkFormat>,
    run: Arc<RunFlag>,
    commands: Option<Sender<StreamCommand>>,
    thread: Option<JoinHandle<()>>,
}

impl CpalSink {
    pub fn new(config: CpalSinkConfig) -> Self {
        Self {
            config,
            format: None,
            run: Arc::new(RunFlag::default()),
            commands: None,
            thread: None,
        }
    }

    fn send(&self, cmd: StreamCommand) -> Result<()> {
        let tx = self
            .commands
            .as_ref()
            .ok_or_else(|| VocalisError::AudioStream("sink not initialised".into()))?;
        tx.send(cmd)
            .map_err(|_| VocalisError::AudioStream("audio thread exited".into()))
    }
}

fn open_stream(config: &CpalSinkConfig, state: PullState) -> Result<(Stream, SinkFormat)> {
    let device = resolve_output_device(config.preferred_device.as_deref())?;

    info!(
        device = device.name().unwrap_or_default().as_str(),
        "opening output device"
    );

    let supported = device
        .default_output_config()
        .map_err(|e| VocalisError::AudioDevice(e.to_string()))?;

    let sample_rate = supported.sample_rate().0;
    // Speech and earcons are mono or stereo; open surround devices as stereo.
    let channels = supported.channels().min(2);
    let stream_config = StreamConfig {
        channels,
        sample_rate: supported.sample_rate(),
        buffer_size: cpal::BufferSize::Default,
    };

    info!(sample_rate, channels, format = ?supported.sample_format(), "output config selected");

    let state = PullState {
        channels: channels as usize,
        ..state
    };
    let scratch_len = config.chunk_frames.max(1) * channels as usize * 4;

    let stream = match supported.sample_format() {
        SampleFormat::I16 => device.build_output_stream(
            &stream_config,
            move |data: &mut [i16], _info| state.pull(data),
            |err| error!("audio stream error: {err}"),
            None,
        ),

        SampleFormat::F32 => {
            let mut scratch = vec![0i16; scratch_len];
            device.build_output_stream(
                &stream_config,
                move |data: &mut [f32], _info| {
                    if scratch.len() < data.len() {
                        scratch.resize(data.len(), 0);
                    }
                    let buf = &mut scratch[..data.len()];
                    state.pull(buf);
                    for (out, s) in data.iter_mut().zip(buf.iter()) {
                        *out = f32::from(*s) / 32768.0;
                    }
                },
                |err| error!("audio stream error: {err}"),
                None,
            )
        }

        SampleFormat::U16 => {
            let mut scratch = vec![0i16; scratch_len];
            device.build_output_stream(
                &stream_config,
                move |data: &mut [u16], _info| {
                    if scratch.len() < data.len() {
                        scratch.resize(data.len(), 0);
                    }
                    let buf = &mut scratch[..data.len()];
                    state.pull(buf);
                    for (out, s) in data.iter_mut().zip(buf.iter()) {
                        *out = (i32::from(*s) + 32768) as u16;
                    }
                },
                |err| error!("audio stream error: {err}"),
                None,
            )
        }

        fmt => {
            return Err(VocalisError::AudioStream(format!(
                "unsupported sample format: {fmt:?}"
            )))
        }
    }
    .map_err(|e| VocalisError::AudioStream(e.to_string()))?;

    let format = SinkFormat {
        sample_rate,
        channels: channels as usize,
        chunk_frames: config.chunk_frames,
        total_buffer_frames: config.chunk_frames * config.buffer_chunks,
    };
    Ok((stream, format))
}

fn run_stream_thread(
    config: CpalSinkConfig,
    state: PullState,
    commands: Receiver<StreamCommand>,
    open_tx: std::sync::mpsc::Sender<Result<SinkFormat>>,
) {
    let run = Arc::clone(&state.run);
    let stream = match open_stream(&config, state) {
        Ok((stream, format)) => {
            let _ = open_tx.send(Ok(format));
            stream
        }
        Err(e) => {
            let _ = open_tx.send(Err(e));
            return;
        }
    };

    for cmd in commands.iter() {
        match cmd {
            StreamCommand::Play => {
                if let Err(e) = stream.play() {
                    error!("failed to start output stream: {e}");
                }
            }
            // A later `start` may already have re-armed the callback.
            StreamCommand::Pause if !run.is_running() => {
                if let Err(e) = stream.pause() {
                    warn!("failed to pause output stream: {e}");
                }
            }
            StreamCommand::Pause => {}
            StreamCommand::Shutdown => break,
        }
    }
    // Stream drops here, releasing the device on this thread.
}

impl AudioSink for CpalSink {
    fn init(&mut self, provider: Arc<dyn AudioProvider>) -> Result<()> {
        if self.thread.is_some() {
            return Err(VocalisError::AlreadyRunning);
        }
        let (cmd_tx, cmd_rx) = unbounded();
        let (open_tx, open_rx) = std::sync::mpsc::channel::<Result<SinkFormat>>();

        let state = PullState {
            provider,
            run: Arc::clone(&self.run),
            commands: cmd_tx.clone(),
            channels: 1,
        };
        let config = self.config.clone();
        let handle = std::thread::Builder::new()
            .name("vocalis-audio".into())
            .spawn(move || run_stream_thread(config, state, cmd_rx, open_tx))?;

        match open_rx.recv() {
            Ok(Ok(format)) => {
                self.format = Some(format);
                self.commands = Some(cmd_tx);
                self.thread = Some(handle);
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                let _ = handle.join();
                Err(VocalisError::Other(anyhow::anyhow!(
                    "audio thread died before opening the device"
                )))
            }
        }
    }

    fn start(&mut self) -> Result<()> {
        self.run.start();
        self.send(StreamCommand::Play)
    }

    fn stop(&mut self) {
        self.run.stop();
        if self.commands.is_some() {
            let _ = self.send(StreamCommand::Pause);
        }
    }

    fn format(&self) -> SinkFormat {
        self.format.unwrap_or(SinkFormat {
            sample_rate: 0,
            channels: 0,
            chunk_frames: self.config.chunk_frames,
            total_buffer_frames: self.config.chunk_frames * self.config.buffer_chunks,
        })
    }
}

impl Drop for CpalSink {
    fn drop(&mut self) {
        self.run.stop();
        if let Some(tx) = self.commands.take() {
            let _ = tx.send(StreamCommand::Shutdown);
        }
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                error!("audio thread panicked");
            }
        }
    }
}
