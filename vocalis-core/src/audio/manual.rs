//! `ManualSink`: a sink driven by the caller instead of a device clock.
//!
//! Tests (and offline tools) keep a [`ManualSinkHandle`] and call
//! [`ManualSinkHandle::pull`] whenever they want the next buffer. Like the
//! hardware sink, it stops pulling once the provider says the stream is
//! over, until `start` is called again.

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use parking_lot::Mutex;

use super::{run_flag::RunFlag, AudioProvider, AudioSink, SinkFormat};
use crate::error::{Result, VocalisError};

#[derive(Default)]
struct ManualState {
    provider: Mutex<Option<Arc<dyn AudioProvider>>>,
    run: RunFlag,
    starts: AtomicUsize,
    stops: AtomicUsize,
}

pub struct ManualSink {
    format: SinkFormat,
    fail_init: bool,
    state: Arc<ManualState>,
}

/// Caller-side handle; clone freely.
#[derive(Clone)]
pub struct ManualSinkHandle {
    channels: usize,
    state: Arc<ManualState>,
}

impl ManualSink {
    pub fn new(format: SinkFormat) -> Self {
        Self {
            format,
            fail_init: false,
            state: Arc::new(ManualState::default()),
        }
    }

    /// Make `init` fail with `AudioDevice`, as an unplugged device would.
    pub fn failing(format: SinkFormat) -> Self {
        Self {
            fail_init: true,
            ..Self::new(format)
        }
    }

    pub fn handle(&self) -> ManualSinkHandle {
        ManualSinkHandle {
            channels: self.format.channels,
            state: Arc::clone(&self.state),
        }
    }
}

impl ManualSinkHandle {
    /// Pull `frames` frames. `None` while the sink is not started.
    ///
    /// The flag is the provider's answer; `false` also stops the sink.
    pub fn pull(&self, frames: usize) -> Option<(Vec<i16>, bool)> {
        let token = self.state.run.token()?;
        let provider = self.state.provider.lock().clone()?;
        let mut buf = vec![0i16; frames * self.channels];
        let keep_going = provider.fill_audio_buffer(&mut buf, frames, self.channels);
        if !keep_going {
            self.state.run.finish(token);
        }
        Some((buf, keep_going))
    }

    pub fn is_started(&self) -> bool {
        self.state.run.is_running()
    }

    pub fn start_count(&self) -> usize {
        self.state.starts.load(Ordering::Relaxed)
    }

    pub fn stop_count(&self) -> usize {
        self.state.stops.load(Ordering::Relaxed)
    }
}

impl AudioSink for ManualSink {
    fn init(&mut self, provider: Arc<dyn AudioProvider>) -> Result<()> {
        if self.fail_init {
            return Err(VocalisError::AudioDevice("manual sink set to fail".into()));
        }
        *self.state.provider.lock() = Some(provider);
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        if self.state.provider.lock().is_none() {
            return Err(VocalisError::AudioStream("sink not initialised".into()));
        }
        self.state.starts.fetch_add(1, Ordering::Relaxed);
        self.state.run.start();
        Ok(())
    }

    fn stop(&mut self) {
        self.state.stops.fetch_add(1, Ordering::Relaxed);
        self.state.run.stop();
    }

    fn format(&self) -> SinkFormat {
        self.format
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Ramp;

    impl AudioProvider for Ramp {
        fn fill_audio_buffer(&self, samples: &mut [i16], frame_count: usize, channel_count: usize) -> bool {
            assert_eq!(samples.len(), frame_count * channel_count);
            for (i, s) in samples.iter_mut().enumerate() {
                *s = i as i16;
            }
            frame_count < 8
        }
    }

    fn format() -> SinkFormat {
        SinkFormat {
            sample_rate: 16_000,
            channels: 2,
            chunk_frames: 4,
            total_buffer_frames: 16,
        }
    }

    #[test]
    fn pulls_only_while_started() {
        let mut sink = ManualSink::new(format());
        let handle = sink.handle();
        assert!(sink.start().is_err());
        sink.init(Arc::new(Ramp)).unwrap();
        assert!(handle.pull(4).is_none());

        sink.start().unwrap();
        let (buf, more) = handle.pull(4).unwrap();
        assert_eq!(buf.len(), 8);
        assert!(more);

        // Provider says stop: the sink stops itself.
        let (_, more) = handle.pull(8).unwrap();
        assert!(!more);
        assert!(!handle.is_started());
        assert!(handle.pull(4).is_none());

        sink.start().unwrap();
        assert_eq!(handle.start_count(), 2);
    }

    /// Ends the stream, but restarts its own sink first, as the dispatcher
    /// does when an utterance arrives while the tail is playing.
    struct RestartOnEnd {
        sink: Mutex<Option<ManualSink>>,
    }

    impl AudioProvider for RestartOnEnd {
        fn fill_audio_buffer(&self, samples: &mut [i16], _frames: usize, _channels: usize) -> bool {
            samples.fill(0);
            if let Some(sink) = self.sink.lock().as_mut() {
                sink.start().unwrap();
            }
            false
        }
    }

    #[test]
    fn restart_racing_end_of_stream_keeps_sink_started() {
        let provider = Arc::new(RestartOnEnd {
            sink: Mutex::new(None),
        });
        let mut sink = ManualSink::new(format());
        let handle = sink.handle();
        sink.init(provider.clone()).unwrap();
        sink.start().unwrap();
        *provider.sink.lock() = Some(sink);

        let (_, more) = handle.pull(4).unwrap();
        assert!(!more);
        assert!(handle.is_started());
        assert_eq!(handle.start_count(), 2);

        // Without a restart the same answer stops the sink.
        provider.sink.lock().take();
        let (_, more) = handle.pull(4).unwrap();
        assert!(!more);
        assert!(!handle.is_started());
    }

    #[test]
    fn failing_sink_rejects_init() {
        let mut sink = ManualSink::failing(format());
        assert!(matches!(
            sink.init(Arc::new(Ramp)),
            Err(VocalisError::AudioDevice(_))
        ));
    }
}
