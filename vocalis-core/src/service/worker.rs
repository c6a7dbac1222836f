//! The `vocalis-synth` thread: pops utterances, drives the engine and feeds
//! the frame ring buffer with backpressure.
//!
//! Lock order is engine → control state → ring. The ring's own lock is only
//! ever held for one copy, so the pull thread waits at most that long.

use std::sync::{atomic::Ordering, Arc};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, info_span, warn, Span};

use super::{discard, ServiceDiagnostics, Shared, Utterance};
use crate::{
    audio::{resample::SampleRateConverter, AudioSink, SinkFormat},
    buffering::ChannelMap,
    error::{Result, VocalisError},
    ipc::events::{ServiceStatus, UtteranceEventKind},
    synthesis::{AudioReceiver, CallbackStatus, EngineHandle, SpeechEngine},
};

/// How often a restart re-checks that the previous stream has drained.
const DRAIN_POLL: Duration = Duration::from_millis(10);

pub(crate) struct WorkerContext {
    pub shared: Arc<Shared>,
    pub engine: EngineHandle,
    pub sink: Arc<Mutex<Box<dyn AudioSink>>>,
    pub format: SinkFormat,
    pub converter_chunk_frames: usize,
    pub min_backpressure_wait: Duration,
    pub span: Span,
}

pub(crate) fn run(ctx: WorkerContext) {
    let _entered = ctx.span.enter();
    debug!("synthesis worker running");

    let mut busy = false;
    // The ring was marked finished so the sink could stop after the last
    // utterance; the next one must reopen it.
    let mut parked = false;

    while let Some(mut utterance) = next_utterance(&ctx.shared, &mut busy, &mut parked) {
        if parked {
            resume_output(&ctx);
            parked = false;
        }
        speak_one(&ctx, &mut utterance);
    }

    let leftovers: Vec<Utterance> = ctx.shared.state.lock().queue.drain(..).collect();
    discard(&ctx.shared, leftovers);
    debug!("synthesis worker exiting");
}

/// Block until there is work or the service stops.
fn next_utterance(shared: &Shared, busy: &mut bool, parked: &mut bool) -> Option<Utterance> {
    let mut st = shared.state.lock();
    loop {
        if !st.service_running {
            return None;
        }
        if let Some(utterance) = st.queue.pop_front() {
            st.utterance_running = true;
            if !*busy {
                *busy = true;
                shared.send_status(ServiceStatus::Busy, None);
            }
            return Some(utterance);
        }
        if *busy {
            *busy = false;
            shared.send_status(ServiceStatus::Idle, None);
        }
        if shared.stop_when_finished.load(Ordering::Acquire) && !shared.ring.is_finished() {
            shared.ring.mark_finished();
            *parked = true;
            debug!("queue empty, output may stop once drained");
        }
        shared.cond.wait(&mut st);
    }
}

fn resume_output(ctx: &WorkerContext) {
    let shared = &ctx.shared;
    {
        let mut st = shared.state.lock();
        while st.service_running && shared.ring.is_finished() && shared.ring.read_avail() > 0 {
            shared.cond.wait_for(&mut st, DRAIN_POLL);
        }
        if shared.ring.is_finished() {
            shared.ring.reset();
        }
    }
    if let Err(e) = ctx.sink.lock().start() {
        warn!("could not restart output: {e}");
    }
}

fn prepare_engine(engine: &mut dyn SpeechEngine, u: &Utterance) {
    engine.restore_defaults();
    if let Err(e) = engine.set_voice(u.voice_index) {
        warn!(voice_index = u.voice_index, "voice rejected, keeping default: {e}");
    }
    if let Err(e) = engine.set_rate(u.rate) {
        warn!(rate = u.rate, "rate rejected, keeping default: {e}");
    }
    if let Err(e) = engine.set_pitch(u.pitch) {
        warn!(pitch = u.pitch, "pitch rejected, keeping default: {e}");
    }
    if let Err(e) = engine.set_volume(u.volume) {
        warn!(volume = u.volume, "volume rejected, keeping default: {e}");
    }
}

fn speak_one(ctx: &WorkerContext, u: &mut Utterance) {
    let span = info_span!("utterance", serial = u.serial);
    let _entered = span.enter();
    let shared = &ctx.shared;
    ServiceDiagnostics::bump(&shared.diagnostics.utterances_started);
    let started = Instant::now();

    let mut engine = ctx.engine.0.lock();
    prepare_engine(&mut *engine, u);
    let engine_rate = engine.sample_rate();

    let mut writer = RingWriter::new(ctx);
    shared.synthesizing.store(true, Ordering::Release);
    let outcome = if engine_rate == ctx.format.sample_rate {
        engine.synthesize(&u.text, &mut writer)
    } else {
        debug!(engine_rate, sink_rate = ctx.format.sample_rate, "resampling engine output");
        SampleRateConverter::new(
            &mut writer,
            engine_rate,
            ctx.format.sample_rate,
            ctx.converter_chunk_frames,
        )
        .and_then(|mut converter| engine.synthesize(&u.text, &mut converter))
    };
    shared.synthesizing.store(false, Ordering::Release);
    let frames_written = writer.frames_written;

    let mut st = shared.state.lock();
    let interrupted = !st.service_running || !st.utterance_running;
    match outcome {
        _ if interrupted => {
            engine.stop();
            u.finish(UtteranceEventKind::Interrupted);
            ServiceDiagnostics::bump(&shared.diagnostics.utterances_interrupted);
            debug!(frames_written, "utterance interrupted");
        }
        Err(e) => {
            warn!("synthesis failed: {e}");
            engine.stop();
            ServiceDiagnostics::bump(&shared.diagnostics.utterances_failed);
            if let Some(completion) = u.completion.take() {
                shared.ring.add_drain_marker(completion, UtteranceEventKind::Error);
            }
        }
        Ok(samples) => {
            ServiceDiagnostics::bump(&shared.diagnostics.utterances_completed);
            if let Some(completion) = u.completion.take() {
                shared.ring.add_drain_marker(completion, UtteranceEventKind::End);
            }
            debug!(
                samples,
                frames_written,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "utterance synthesized"
            );
        }
    }
    st.utterance_running = false;
    shared.cond.notify_all();
}

/// Receives engine (or converter) output and copies it into the ring.
pub(crate) struct RingWriter<'a> {
    shared: &'a Shared,
    sink_rate: u32,
    sink_channels: usize,
    min_wait: Duration,
    scratch: Vec<i16>,
    frames_written: usize,
}

impl<'a> RingWriter<'a> {
    fn new(ctx: &'a WorkerContext) -> Self {
        Self {
            shared: &ctx.shared,
            sink_rate: ctx.format.sample_rate,
            sink_channels: ctx.format.channels,
            min_wait: ctx.min_backpressure_wait,
            scratch: Vec::with_capacity(ctx.format.chunk_frames * ctx.format.channels),
            frames_written: 0,
        }
    }

    fn interrupted(&self) -> bool {
        let st = self.shared.state.lock();
        !st.service_running || !st.utterance_running
    }

    /// Playback time of `frames` at the sink rate.
    fn backpressure_wait(&self, frames: usize) -> Duration {
        let ms = frames as u64 * 1000 / u64::from(self.sink_rate);
        Duration::from_millis(ms).max(self.min_wait)
    }

    fn write_all(&mut self, samples: &[i16]) -> Result<CallbackStatus> {
        let ring = &self.shared.ring;
        let channels = self.sink_channels;
        let max_piece = ring.frame_capacity() * channels;

        for piece in samples.chunks(max_piece) {
            let frames = piece.len() / channels;
            let wait = self.backpressure_wait(frames);
            // Writing under the control lock keeps `stop` from racing a
            // write into the ring it just cleared.
            let mut st = self.shared.state.lock();
            loop {
                if !st.service_running || !st.utterance_running {
                    return Ok(CallbackStatus::Halt);
                }
                if ring.write(piece) {
                    self.frames_written += frames;
                    ServiceDiagnostics::add(&self.shared.diagnostics.frames_written, frames);
                    break;
                }
                if ring.is_finished() {
                    return Err(VocalisError::Synthesis(
                        "frame ring buffer closed mid-utterance".into(),
                    ));
                }
                ServiceDiagnostics::bump(&self.shared.diagnostics.backpressure_waits);
                self.shared.cond.wait_for(&mut st, wait);
            }
        }
        Ok(CallbackStatus::Continue)
    }
}

impl AudioReceiver for RingWriter<'_> {
    fn receive(&mut self, sample_rate: u32, channels: usize, data: &[i16]) -> Result<CallbackStatus> {
        if self.interrupted() {
            return Ok(CallbackStatus::Halt);
        }
        if sample_rate != self.sink_rate {
            return Err(VocalisError::config(format!(
                "engine pushed {sample_rate} Hz into a {} Hz stream",
                self.sink_rate
            )));
        }
        let map = ChannelMap::upmix_only(channels, self.sink_channels)?;
        let mut scratch = std::mem::take(&mut self.scratch);
        map.apply(data, &mut scratch);
        let status = self.write_all(&scratch);
        self.scratch = scratch;
        status
    }

    fn done(&mut self) -> Result<()> {
        Ok(())
    }
}
