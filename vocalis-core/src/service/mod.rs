//! `SpeechService`: utterance queue, synthesis worker and playback path.
//!
//! ## Lifecycle
//!
//! ```text
//! SpeechService::new()
//!     └─► start_service()   → sink bound, ring sized, engine up, worker spawned
//!         ├─► speak()/stop()/earcon commands
//!         └─► stop_service() → worker joined, sink stopped, engine shut down
//! ```
//!
//! ## Threading
//!
//! Three contexts run in parallel: the caller, the `vocalis-synth` worker
//! and the sink's pull thread. The queue and the running flags share one
//! `parking_lot::Mutex` + `Condvar` between caller and worker. The pull
//! thread never touches that mutex; it only reads the frame ring buffer and
//! the earcon mixer, both of which it can access without waiting on the
//! worker for more than one ring operation.
//!
//! Every accepted utterance's completion fires exactly once: after its audio
//! has drained, when it is interrupted or discarded, or when the engine
//! fails on it.

pub mod diagnostics;
mod playback;
mod worker;

pub use diagnostics::{DiagnosticsSnapshot, ServiceDiagnostics};

use std::collections::VecDeque;
use std::path::Path;
use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tokio::sync::broadcast;
use tracing::{debug, error, info, info_span, warn, Span};

use crate::{
    audio::{AudioProvider, AudioSink, SinkFormat},
    buffering::FrameRingBuffer,
    earcon::EarconMixer,
    error::{Result, VocalisError},
    ipc::{
        completion::CompletionNotifier,
        events::{ServiceStatus, ServiceStatusEvent, UtteranceEventKind},
    },
    synthesis::{
        voice::{voice_index, voice_index_by_language},
        EngineHandle, Voice, VoicePattern,
    },
};

use playback::PlaybackPath;

/// Broadcast channel capacity for status events.
const BROADCAST_CAP: usize = 64;

/// Configuration for `SpeechService`.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Let the sink stop once all speech and earcons have played, and
    /// restart it for the next utterance. Default: false.
    pub stop_when_finished: bool,
    /// rubato chunk for engine → sink rate conversion. `None` uses the
    /// sink's chunk size.
    pub converter_chunk_frames: Option<usize>,
    /// Floor for one backpressure wait. Default: 1 ms.
    pub min_backpressure_wait: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            stop_when_finished: false,
            converter_chunk_frames: None,
            min_backpressure_wait: Duration::from_millis(1),
        }
    }
}

/// Per-utterance options for [`SpeechService::speak`].
///
/// Prosody defaults to 1.0, the top of each engine range: maximum rate,
/// pitch and volume. The engines' own default levels sit lower (for the
/// built-in ranges about `0.167`, `0.333` and `0.2`), so callers wanting
/// a normal voice pass them through [`SpeakOptions::with_prosody`].
#[derive(Debug)]
pub struct SpeakOptions {
    /// Normalized `[0, 1]`. Default: 1.0.
    pub rate: f32,
    /// Normalized `[0, 1]`. Default: 1.0.
    pub pitch: f32,
    /// Normalized `[0, 1]`. Default: 1.0.
    pub volume: f32,
    /// Voice to use; the first voice when `None` or when nothing matches.
    pub voice: Option<VoicePattern>,
    pub completion: Option<CompletionNotifier>,
}

impl Default for SpeakOptions {
    fn default() -> Self {
        Self {
            rate: 1.0,
            pitch: 1.0,
            volume: 1.0,
            voice: None,
            completion: None,
        }
    }
}

impl SpeakOptions {
    pub fn with_completion(mut self, completion: CompletionNotifier) -> Self {
        self.completion = Some(completion);
        self
    }

    pub fn with_voice(mut self, voice: VoicePattern) -> Self {
        self.voice = Some(voice);
        self
    }

    pub fn with_prosody(mut self, rate: f32, pitch: f32, volume: f32) -> Self {
        self.rate = rate;
        self.pitch = pitch;
        self.volume = volume;
        self
    }
}

/// One queued unit of speech. Owned by the dispatcher until reported.
pub(crate) struct Utterance {
    pub serial: u64,
    pub text: String,
    pub voice_index: usize,
    pub rate: f32,
    pub pitch: f32,
    pub volume: f32,
    pub completion: Option<CompletionNotifier>,
}

impl Utterance {
    pub fn finish(&mut self, kind: UtteranceEventKind) {
        if let Some(completion) = self.completion.take() {
            completion.fire(kind);
        }
    }
}

pub(crate) struct ControlState {
    pub queue: VecDeque<Utterance>,
    pub service_running: bool,
    /// The worker's current utterance has not been interrupted.
    pub utterance_running: bool,
}

/// Everything the worker and the pull thread share for one run of the
/// service.
pub(crate) struct Shared {
    pub state: Mutex<ControlState>,
    pub cond: Condvar,
    pub ring: FrameRingBuffer<i16>,
    pub mixer: EarconMixer,
    pub stop_when_finished: Arc<AtomicBool>,
    /// An utterance is being synthesized; pull shortfalls count as underruns.
    pub synthesizing: AtomicBool,
    pub diagnostics: Arc<ServiceDiagnostics>,
    pub status_tx: broadcast::Sender<ServiceStatusEvent>,
}

impl Shared {
    pub fn send_status(&self, status: ServiceStatus, detail: Option<String>) {
        let _ = self.status_tx.send(ServiceStatusEvent { status, detail });
    }
}

struct Runtime {
    shared: Arc<Shared>,
    voices: Vec<Voice>,
    worker: JoinHandle<()>,
}

#[derive(Default)]
struct Lifecycle {
    runtime: Option<Runtime>,
    /// `AudioSink::init` succeeded; it is never repeated.
    sink_bound: bool,
}

/// The speech dispatcher.
///
/// `SpeechService` is `Send + Sync`; all fields use interior mutability.
pub struct SpeechService {
    config: ServiceConfig,
    engine: EngineHandle,
    sink: Arc<Mutex<Box<dyn AudioSink>>>,
    playback: Arc<PlaybackPath>,
    lifecycle: Mutex<Lifecycle>,
    stop_when_finished: Arc<AtomicBool>,
    diagnostics: Arc<ServiceDiagnostics>,
    status_tx: broadcast::Sender<ServiceStatusEvent>,
    next_serial: AtomicU64,
    span: Span,
}

impl SpeechService {
    /// Create a stopped service. Nothing is opened until `start_service`.
    pub fn new(engine: EngineHandle, sink: Box<dyn AudioSink>, config: ServiceConfig) -> Self {
        let (status_tx, _) = broadcast::channel(BROADCAST_CAP);
        let engine_name = engine.0.lock().name().to_string();
        let span = info_span!("speech_service", engine = %engine_name);
        Self {
            stop_when_finished: Arc::new(AtomicBool::new(config.stop_when_finished)),
            config,
            engine,
            sink: Arc::new(Mutex::new(sink)),
            playback: Arc::new(PlaybackPath::default()),
            lifecycle: Mutex::new(Lifecycle::default()),
            diagnostics: Arc::new(ServiceDiagnostics::default()),
            status_tx,
            next_serial: AtomicU64::new(0),
            span,
        }
    }

    /// Bring the sink, engine and worker up.
    ///
    /// # Errors
    /// - `VocalisError::AlreadyRunning` if already started.
    /// - Sink or engine initialisation errors; the worker is not spawned.
    pub fn start_service(&self) -> Result<()> {
        let _entered = self.span.enter();
        let mut life = self.lifecycle.lock();
        if life.runtime.is_some() {
            return Err(VocalisError::AlreadyRunning);
        }
        match self.bring_up(&mut life) {
            Ok(runtime) => {
                life.runtime = Some(runtime);
                self.set_status(ServiceStatus::Idle, None);
                info!("speech service started");
                Ok(())
            }
            Err(e) => {
                error!("speech service failed to start: {e}");
                self.set_status(ServiceStatus::Error, Some(e.to_string()));
                Err(e)
            }
        }
    }

    fn bring_up(&self, life: &mut Lifecycle) -> Result<Runtime> {
        let mut sink = self.sink.lock();
        if !life.sink_bound {
            let provider: Arc<dyn AudioProvider> = self.playback.clone();
            sink.init(provider)?;
            life.sink_bound = true;
        }
        let format = sink.format();
        validate_format(&format)?;
        info!(
            sample_rate = format.sample_rate,
            channels = format.channels,
            chunk_frames = format.chunk_frames,
            total_buffer_frames = format.total_buffer_frames,
            "sink ready"
        );

        let ring = FrameRingBuffer::new(format.total_buffer_frames, format.channels)?;
        let mixer = EarconMixer::new(format.channels, format.sample_rate)?;

        let voices = {
            let mut engine = self.engine.0.lock();
            engine.init()?;
            engine.voices()
        };

        self.diagnostics.reset();
        let shared = Arc::new(Shared {
            state: Mutex::new(ControlState {
                queue: VecDeque::new(),
                service_running: true,
                utterance_running: false,
            }),
            cond: Condvar::new(),
            ring,
            mixer,
            stop_when_finished: Arc::clone(&self.stop_when_finished),
            synthesizing: AtomicBool::new(false),
            diagnostics: Arc::clone(&self.diagnostics),
            status_tx: self.status_tx.clone(),
        });

        self.playback.attach(Arc::clone(&shared));
        if let Err(e) = sink.start() {
            self.playback.detach();
            self.engine.0.lock().shutdown();
            return Err(e);
        }
        drop(sink);

        let ctx = worker::WorkerContext {
            shared: Arc::clone(&shared),
            engine: self.engine.clone(),
            sink: Arc::clone(&self.sink),
            format,
            converter_chunk_frames: self
                .config
                .converter_chunk_frames
                .unwrap_or(format.chunk_frames),
            min_backpressure_wait: self.config.min_backpressure_wait,
            span: self.span.clone(),
        };
        let spawned = std::thread::Builder::new()
            .name("vocalis-synth".into())
            .spawn(move || worker::run(ctx));
        let worker = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                self.sink.lock().stop();
                self.playback.detach();
                self.engine.0.lock().shutdown();
                return Err(e.into());
            }
        };

        Ok(Runtime {
            shared,
            voices,
            worker,
        })
    }

    /// Interrupt speech, join the worker and release sink and engine.
    /// Queued utterances are reported as interrupted. No-op when stopped.
    pub fn stop_service(&self) {
        let _entered = self.span.enter();
        let Some(runtime) = self.lifecycle.lock().runtime.take() else {
            return;
        };
        let shared = runtime.shared;
        {
            let mut st = shared.state.lock();
            st.service_running = false;
            st.utterance_running = false;
            shared.ring.reset();
            shared.cond.notify_all();
        }
        if runtime.worker.join().is_err() {
            error!("synthesis worker panicked");
        }
        let leftovers: Vec<Utterance> = shared.state.lock().queue.drain(..).collect();
        discard(&shared, leftovers);

        self.sink.lock().stop();
        self.playback.detach();
        self.engine.0.lock().shutdown();
        self.set_status(ServiceStatus::Error, Some("service stopped".into()));
        info!("speech service stopped");
    }

    /// Queue `text`. Returns `false` (and drops `options.completion` without
    /// firing it) when the service is not running.
    pub fn speak(&self, text: &str, options: SpeakOptions) -> bool {
        let life = self.lifecycle.lock();
        let Some(runtime) = life.runtime.as_ref() else {
            debug!("speak ignored, service not running");
            return false;
        };
        let voice_index = options
            .voice
            .as_ref()
            .and_then(|pattern| voice_index(&runtime.voices, pattern))
            .unwrap_or(0);
        let serial = self.next_serial.fetch_add(1, Ordering::Relaxed);
        let utterance = Utterance {
            serial,
            text: text.to_string(),
            voice_index,
            rate: options.rate,
            pitch: options.pitch,
            volume: options.volume,
            completion: options.completion,
        };

        let shared = &runtime.shared;
        let mut st = shared.state.lock();
        st.queue.push_back(utterance);
        ServiceDiagnostics::bump(&shared.diagnostics.utterances_queued);
        shared.cond.notify_all();
        debug!(serial, voice_index, queued = st.queue.len(), "utterance queued");
        true
    }

    /// Discard buffered audio and queued utterances and interrupt the active
    /// one. Earcons keep playing.
    pub fn stop(&self) {
        let life = self.lifecycle.lock();
        let Some(runtime) = life.runtime.as_ref() else {
            return;
        };
        let shared = &runtime.shared;
        let discarded: Vec<Utterance> = {
            let mut st = shared.state.lock();
            shared.ring.reset();
            st.utterance_running = false;
            shared.cond.notify_all();
            st.queue.drain(..).collect()
        };
        debug!(discarded = discarded.len(), "stop requested");
        discard(shared, discarded);
    }

    pub fn get_status(&self) -> ServiceStatus {
        let life = self.lifecycle.lock();
        match life.runtime.as_ref() {
            None => ServiceStatus::Error,
            Some(runtime) => {
                let st = runtime.shared.state.lock();
                if st.queue.is_empty() && !st.utterance_running {
                    ServiceStatus::Idle
                } else {
                    ServiceStatus::Busy
                }
            }
        }
    }

    /// Block until nothing is queued or synthesizing. Returns at once when
    /// the service is not running.
    pub fn wait_until_finished(&self) {
        let Some(shared) = self.shared() else {
            return;
        };
        let mut st = shared.state.lock();
        while st.service_running && (!st.queue.is_empty() || st.utterance_running) {
            shared.cond.wait(&mut st);
        }
    }

    pub fn set_stop_when_finished(&self, enabled: bool) {
        self.stop_when_finished.store(enabled, Ordering::Release);
        if let Some(shared) = self.shared() {
            let _st = shared.state.lock();
            shared.cond.notify_all();
        }
    }

    pub fn stop_when_finished(&self) -> bool {
        self.stop_when_finished.load(Ordering::Acquire)
    }

    // ── Earcons ──────────────────────────────────────────────────────────

    /// # Errors
    /// `NotRunning` when stopped; file and format errors from the loader.
    pub fn load_earcon_from_wav(&self, path: impl AsRef<Path>, looping: bool) -> Result<usize> {
        let shared = self.shared().ok_or(VocalisError::NotRunning)?;
        shared.mixer.load_wav_file(path, looping)
    }

    pub fn load_earcon(
        &self,
        data: &[i16],
        channels: usize,
        sample_rate: u32,
        looping: bool,
    ) -> Result<usize> {
        let shared = self.shared().ok_or(VocalisError::NotRunning)?;
        shared.mixer.load(data, channels, sample_rate, looping)
    }

    /// Start (or restart) an earcon. Wakes a sink that stopped after the
    /// last utterance.
    pub fn play_earcon(&self, id: usize) -> Result<()> {
        let shared = self.shared().ok_or(VocalisError::NotRunning)?;
        {
            let _st = shared.state.lock();
            shared.mixer.play(id)?;
        }
        if shared.ring.is_finished() {
            if let Err(e) = self.sink.lock().start() {
                warn!("could not resume sink for earcon {id}: {e}");
            }
        }
        Ok(())
    }

    pub fn stop_earcon(&self, id: usize) -> Result<()> {
        let shared = self.shared().ok_or(VocalisError::NotRunning)?;
        let _st = shared.state.lock();
        shared.mixer.stop(id)
    }

    pub fn stop_all_earcons(&self) -> Result<()> {
        let shared = self.shared().ok_or(VocalisError::NotRunning)?;
        let _st = shared.state.lock();
        shared.mixer.stop_all();
        Ok(())
    }

    pub fn is_earcon_playing(&self, id: usize) -> Result<bool> {
        let shared = self.shared().ok_or(VocalisError::NotRunning)?;
        let _st = shared.state.lock();
        shared.mixer.is_playing(id)
    }

    pub fn is_any_earcon_playing(&self) -> bool {
        self.shared()
            .map(|s| s.mixer.is_anything_playing())
            .unwrap_or(false)
    }

    // ── Introspection ───────────────────────────────────────────────────

    /// Voices the engine reported at start. Empty when stopped.
    pub fn voices(&self) -> Vec<Voice> {
        self.lifecycle
            .lock()
            .runtime
            .as_ref()
            .map(|r| r.voices.clone())
            .unwrap_or_default()
    }

    /// Pattern for the first voice speaking `language`, for use with
    /// [`SpeakOptions::with_voice`].
    pub fn voice_for_language(&self, language: &str) -> Option<VoicePattern> {
        let voices = self.voices();
        voice_index_by_language(&voices, language).map(|i| voices[i].clone())
    }

    /// Frames of synthesized audio waiting in the ring buffer.
    pub fn buffered_frames(&self) -> usize {
        self.shared().map(|s| s.ring.read_avail()).unwrap_or(0)
    }

    /// Sink format while running.
    pub fn output_format(&self) -> Option<SinkFormat> {
        self.lifecycle
            .lock()
            .runtime
            .as_ref()
            .map(|_| self.sink.lock().format())
    }

    pub fn subscribe_status(&self) -> broadcast::Receiver<ServiceStatusEvent> {
        self.status_tx.subscribe()
    }

    pub fn diagnostics_snapshot(&self) -> DiagnosticsSnapshot {
        self.diagnostics.snapshot()
    }

    pub fn is_running(&self) -> bool {
        self.lifecycle.lock().runtime.is_some()
    }

    // ── Internal helpers ─────────────────────────────────────────────────

    fn shared(&self) -> Option<Arc<Shared>> {
        self.lifecycle
            .lock()
            .runtime
            .as_ref()
            .map(|r| Arc::clone(&r.shared))
    }

    fn set_status(&self, status: ServiceStatus, detail: Option<String>) {
        let _ = self.status_tx.send(ServiceStatusEvent { status, detail });
    }
}

impl Drop for SpeechService {
    fn drop(&mut self) {
        self.stop_service();
    }
}

fn validate_format(format: &SinkFormat) -> Result<()> {
    if format.sample_rate == 0 || format.channels == 0 {
        return Err(VocalisError::config(format!(
            "sink reports {} Hz / {} channels",
            format.sample_rate, format.channels
        )));
    }
    if format.chunk_frames == 0 || format.total_buffer_frames < format.chunk_frames {
        return Err(VocalisError::config(format!(
            "sink buffering {} frames cannot hold a {}-frame chunk",
            format.total_buffer_frames, format.chunk_frames
        )));
    }
    Ok(())
}

/// Report dropped utterances so no caller is left waiting.
fn discard(shared: &Shared, utterances: Vec<Utterance>) {
    for mut u in utterances {
        u.finish(UtteranceEventKind::Interrupted);
        ServiceDiagnostics::bump(&shared.diagnostics.utterances_interrupted);
    }
}
