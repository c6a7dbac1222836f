use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::broadcast::{self, error::TryRecvError};

use vocalis_core::audio::manual::ManualSinkHandle;
use vocalis_core::audio::{AudioProvider, AudioSink};
use vocalis_core::ipc::completion::{oneshot, CompletionHandle};
use vocalis_core::ipc::protocol::ControlResponse;
use vocalis_core::synthesis::{AudioReceiver, CallbackStatus, VoicePattern};
use vocalis_core::{
    ControlBridge, EngineHandle, ManualSink, ServiceConfig, ServiceStatus, ServiceStatusEvent,
    SinkFormat, SpeakOptions, SpeechEngine, SpeechService, UtteranceEventKind, Voice, VocalisError,
};

const TIMEOUT: Duration = Duration::from_secs(5);
const PULL_FRAMES: usize = 128;
const LEVEL: i16 = 1_000;
/// Frames per engine push.
const ENGINE_CHUNK: usize = 160;

fn format() -> SinkFormat {
    SinkFormat {
        sample_rate: 16_000,
        channels: 2,
        chunk_frames: 256,
        total_buffer_frames: 1_024,
    }
}

#[derive(Default)]
struct EngineLog {
    stops: AtomicUsize,
    voices: Mutex<Vec<usize>>,
    rates: Mutex<Vec<f32>>,
}

/// Pushes `<n>` mono frames of a constant level. `fail <n>` pushes `n`
/// frames and then errors.
struct ScriptedEngine {
    rate: u32,
    chunk: usize,
    log: Arc<EngineLog>,
}

impl SpeechEngine for ScriptedEngine {
    fn name(&self) -> &str {
        "scripted"
    }

    fn init(&mut self) -> vocalis_core::error::Result<()> {
        Ok(())
    }

    fn shutdown(&mut self) {}

    fn stop(&mut self) {
        self.log.stops.fetch_add(1, Ordering::SeqCst);
    }

    fn voices(&self) -> Vec<Voice> {
        vec![
            Voice {
                name: "first".into(),
                language: "en-US".into(),
                ..Voice::default()
            },
            Voice {
                name: "second".into(),
                language: "en-GB".into(),
                ..Voice::default()
            },
        ]
    }

    fn set_voice(&mut self, index: usize) -> vocalis_core::error::Result<()> {
        self.log.voices.lock().push(index);
        Ok(())
    }

    fn set_rate(&mut self, rate: f32) -> vocalis_core::error::Result<()> {
        self.log.rates.lock().push(rate);
        Ok(())
    }

    fn set_pitch(&mut self, _pitch: f32) -> vocalis_core::error::Result<()> {
        Ok(())
    }

    fn set_volume(&mut self, _volume: f32) -> vocalis_core::error::Result<()> {
        Ok(())
    }

    fn restore_defaults(&mut self) {}

    fn get_property(&self, name: &str) -> vocalis_core::error::Result<String> {
        Err(VocalisError::InvalidArgument(name.into()))
    }

    fn set_property(&mut self, name: &str, _value: &str) -> vocalis_core::error::Result<()> {
        Err(VocalisError::InvalidArgument(name.into()))
    }

    fn sample_rate(&self) -> u32 {
        self.rate
    }

    fn synthesize(
        &mut self,
        text: &str,
        receiver: &mut dyn AudioReceiver,
    ) -> vocalis_core::error::Result<usize> {
        let (fail, count) = match text.strip_prefix("fail ") {
            Some(rest) => (true, rest),
            None => (false, text),
        };
        let mut remaining: usize = count
            .trim()
            .parse()
            .map_err(|_| VocalisError::Synthesis(format!("bad script {text:?}")))?;
        let mut pushed = 0;
        while remaining > 0 {
            let n = remaining.min(self.chunk);
            let chunk = vec![LEVEL; n];
            if receiver.receive(self.rate, 1, &chunk)? == CallbackStatus::Halt {
                return Ok(pushed);
            }
            pushed += n;
            remaining -= n;
        }
        if fail {
            return Err(VocalisError::Synthesis("scripted failure".into()));
        }
        receiver.done()?;
        Ok(pushed)
    }
}

struct Harness {
    service: Arc<SpeechService>,
    sink: ManualSinkHandle,
    log: Arc<EngineLog>,
    pulled: Vec<i16>,
}

impl Harness {
    fn new(engine_rate: u32, config: ServiceConfig) -> Self {
        let log = Arc::new(EngineLog::default());
        let engine = EngineHandle::new(ScriptedEngine {
            rate: engine_rate,
            chunk: ENGINE_CHUNK,
            log: Arc::clone(&log),
        });
        let sink = ManualSink::new(format());
        let handle = sink.handle();
        Self {
            service: Arc::new(SpeechService::new(engine, Box::new(sink), config)),
            sink: handle,
            log,
            pulled: Vec::new(),
        }
    }

    fn started(engine_rate: u32, config: ServiceConfig) -> Self {
        let h = Self::new(engine_rate, config);
        h.service.start_service().expect("service starts");
        h
    }

    fn speak(&self, text: &str, id: u64) -> CompletionHandle {
        let (notifier, handle) = oneshot(id);
        assert!(self
            .service
            .speak(text, SpeakOptions::default().with_completion(notifier)));
        handle
    }

    /// Keep pulling until `check` yields.
    fn pump_until<T>(&mut self, mut check: impl FnMut(&SpeechService) -> Option<T>) -> T {
        let deadline = Instant::now() + TIMEOUT;
        loop {
            if let Some((buf, _)) = self.sink.pull(PULL_FRAMES) {
                self.pulled.extend(buf);
            }
            if let Some(v) = check(&self.service) {
                return v;
            }
            assert!(Instant::now() < deadline, "timed out pumping the sink");
            thread::sleep(Duration::from_millis(1));
        }
    }

    fn speech_frames(&self) -> usize {
        self.pulled
            .chunks_exact(2)
            .filter(|f| f[0] == LEVEL && f[1] == LEVEL)
            .count()
    }
}

/// The ring has no room for another engine chunk. Writes are all or
/// nothing, so it never fills to the last frame.
fn ring_full(service: &SpeechService) -> bool {
    service.buffered_frames() + ENGINE_CHUNK > format().total_buffer_frames
}

fn wait_for(mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + TIMEOUT;
    while !cond() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        thread::sleep(Duration::from_millis(1));
    }
}

fn next_status(rx: &mut broadcast::Receiver<ServiceStatusEvent>) -> ServiceStatus {
    let deadline = Instant::now() + TIMEOUT;
    loop {
        match rx.try_recv() {
            Ok(ev) => return ev.status,
            Err(TryRecvError::Empty) => {
                assert!(Instant::now() < deadline, "timed out waiting for status");
                thread::sleep(Duration::from_millis(1));
            }
            Err(TryRecvError::Lagged(_)) => continue,
            Err(TryRecvError::Closed) => panic!("status channel closed"),
        }
    }
}

#[test]
fn speak_before_start_is_a_no_op() {
    let h = Harness::new(16_000, ServiceConfig::default());
    let (notifier, handle) = oneshot(1);
    assert!(!h
        .service
        .speak("100", SpeakOptions::default().with_completion(notifier)));
    assert_eq!(h.service.get_status(), ServiceStatus::Error);
    assert!(handle.try_get().is_none());
    assert!(matches!(
        h.service.load_earcon(&[0; 4], 1, 16_000, false),
        Err(VocalisError::NotRunning)
    ));
}

#[test]
fn completion_fires_once_audio_has_played() {
    let mut h = Harness::started(16_000, ServiceConfig::default());
    let done = h.speak("600", 1);

    let event = h.pump_until(|_| done.try_get());
    assert_eq!(event.kind, UtteranceEventKind::End);
    assert_eq!(event.utterance_id, 1);
    assert_eq!(h.service.diagnostics_snapshot().frames_played, 600);
    // Mono engine output is duplicated onto both sink channels.
    assert_eq!(h.speech_frames(), 600);
    assert!(h.pulled.chunks_exact(2).all(|f| f[0] == f[1]));
}

#[test]
fn long_utterance_waits_for_ring_space() {
    let mut h = Harness::started(16_000, ServiceConfig::default());
    let done = h.speak("4000", 1);
    wait_for(|| ring_full(&h.service) && h.service.diagnostics_snapshot().backpressure_waits > 0);
    assert!(h.service.buffered_frames() <= format().total_buffer_frames);
    assert!(done.try_get().is_none());

    let event = h.pump_until(|_| done.try_get());
    assert_eq!(event.kind, UtteranceEventKind::End);
    assert_eq!(h.speech_frames(), 4_000);
    let diag = h.service.diagnostics_snapshot();
    assert!(diag.backpressure_waits > 0);
    assert_eq!(diag.frames_written, 4_000);
}

#[test]
fn engine_output_is_resampled_to_the_sink_rate() {
    let mut h = Harness::started(8_000, ServiceConfig::default());
    let done = h.speak("800", 3);

    let event = h.pump_until(|_| done.try_get());
    assert_eq!(event.kind, UtteranceEventKind::End);
    assert_eq!(h.service.diagnostics_snapshot().frames_played, 1_600);
}

#[test]
fn stop_discards_buffered_audio_and_queue() {
    let h = Harness::started(16_000, ServiceConfig::default());
    let first = h.speak("100000", 1);
    let second = h.speak("100", 2);
    wait_for(|| ring_full(&h.service));

    h.service.stop();
    assert_eq!(h.service.buffered_frames(), 0);

    let a = first.wait_timeout(TIMEOUT).expect("first reported");
    let b = second.wait_timeout(TIMEOUT).expect("second reported");
    assert_eq!(a.kind, UtteranceEventKind::Interrupted);
    assert_eq!(b.kind, UtteranceEventKind::Interrupted);
    assert!(h.log.stops.load(Ordering::SeqCst) >= 1);

    h.service.wait_until_finished();
    assert_eq!(h.service.get_status(), ServiceStatus::Idle);
    assert_eq!(h.service.buffered_frames(), 0);
}

#[test]
fn wait_until_finished_blocks_while_synthesizing() {
    let mut h = Harness::started(16_000, ServiceConfig::default());
    let done = h.speak("4000", 1);
    wait_for(|| ring_full(&h.service));

    let returned = Arc::new(AtomicBool::new(false));
    let waiter = {
        let service = Arc::clone(&h.service);
        let returned = Arc::clone(&returned);
        thread::spawn(move || {
            service.wait_until_finished();
            returned.store(true, Ordering::SeqCst);
            service.diagnostics_snapshot()
        })
    };

    // Nobody pulls, so the worker stays blocked on ring space.
    thread::sleep(Duration::from_millis(50));
    assert!(!returned.load(Ordering::SeqCst));

    h.pump_until(|_| returned.load(Ordering::SeqCst).then_some(()));
    let diag = waiter.join().expect("waiter thread");
    assert_eq!(diag.frames_written, 4_000);
    assert_eq!(diag.utterances_completed, 1);

    let event = h.pump_until(|_| done.try_get());
    assert_eq!(event.kind, UtteranceEventKind::End);
    assert_eq!(h.speech_frames(), 4_000);
}

#[test]
fn engine_failure_reports_error_and_moves_on() {
    let mut h = Harness::started(16_000, ServiceConfig::default());
    let bad = h.speak("fail 100", 1);
    let good = h.speak("200", 2);

    let (mut a, mut b) = (None, None);
    h.pump_until(|_| {
        if a.is_none() {
            a = bad.try_get();
        }
        if b.is_none() {
            b = good.try_get();
        }
        (a.is_some() && b.is_some()).then_some(())
    });
    let (a, b) = (a.expect("failed utterance reported"), b.expect("next utterance reported"));
    assert_eq!(a.kind, UtteranceEventKind::Error);
    assert_eq!(b.kind, UtteranceEventKind::End);
    assert_eq!(h.log.stops.load(Ordering::SeqCst), 1);

    let diag = h.service.diagnostics_snapshot();
    assert_eq!(diag.utterances_failed, 1);
    assert_eq!(diag.utterances_completed, 1);
    // The failed utterance's partial audio still plays.
    assert_eq!(h.speech_frames(), 300);
}

#[test]
fn voice_and_prosody_reach_the_engine() {
    let mut h = Harness::started(16_000, ServiceConfig::default());
    let (notifier, done) = oneshot(9);
    let pattern = VoicePattern {
        language: "en-gb".into(),
        ..VoicePattern::default()
    };
    assert!(h.service.speak(
        "10",
        SpeakOptions::default()
            .with_voice(pattern)
            .with_prosody(0.25, 1.0, 1.0)
            .with_completion(notifier),
    ));
    h.pump_until(|_| done.try_get());

    assert_eq!(*h.log.voices.lock(), vec![1]);
    assert_eq!(*h.log.rates.lock(), vec![0.25]);
    assert_eq!(
        h.service.voice_for_language("en-US").map(|v| v.name),
        Some("first".to_string())
    );
}

#[test]
fn sink_stops_when_finished_and_restarts_for_next_utterance() {
    let config = ServiceConfig {
        stop_when_finished: true,
        ..ServiceConfig::default()
    };
    let mut h = Harness::started(16_000, config);
    let first = h.speak("300", 1);
    h.pump_until(|_| first.try_get());

    // Keep pulling until the provider declares the stream over.
    let sink = h.sink.clone();
    wait_for(|| {
        let _ = sink.pull(PULL_FRAMES);
        !sink.is_started()
    });
    assert_eq!(sink.start_count(), 1);

    let second = h.speak("300", 2);
    wait_for(|| sink.is_started());
    assert_eq!(sink.start_count(), 2);
    let event = h.pump_until(|_| second.try_get());
    assert_eq!(event.kind, UtteranceEventKind::End);
    assert_eq!(h.speech_frames(), 600);
}

#[test]
fn earcon_keeps_a_finished_stream_alive_until_it_ends() {
    let config = ServiceConfig {
        stop_when_finished: true,
        ..ServiceConfig::default()
    };
    let mut h = Harness::started(16_000, config);
    let id = h
        .service
        .load_earcon(&[2_000; 2 * PULL_FRAMES], 1, 16_000, false)
        .expect("earcon loads");
    let first = h.speak("300", 1);
    h.pump_until(|_| first.try_get());

    let sink = h.sink.clone();
    wait_for(|| {
        let _ = sink.pull(PULL_FRAMES);
        !sink.is_started()
    });
    assert_eq!(sink.start_count(), 1);

    h.service.play_earcon(id).expect("earcon plays");
    assert!(sink.is_started());
    assert_eq!(sink.start_count(), 2);

    let mut answers = Vec::new();
    let mut mixed = Vec::new();
    while let Some((buf, more)) = sink.pull(PULL_FRAMES) {
        mixed.extend(buf);
        answers.push(more);
        assert!(answers.len() <= 8, "stream never ended: {answers:?}");
    }
    assert!(answers.len() >= 2);
    assert_eq!(answers.last(), Some(&false));
    assert!(answers[..answers.len() - 1].iter().all(|&more| more));
    assert!(!h.service.is_any_earcon_playing());
    assert!(!sink.is_started());
    let loud = mixed.chunks_exact(2).filter(|f| f[0] == 2_000).count();
    assert_eq!(loud, 2 * PULL_FRAMES);
}

/// Hands the provider buffers shorter than the frame count it asks for.
#[derive(Clone, Default)]
struct ShortBufferSink {
    provider: Arc<Mutex<Option<Arc<dyn AudioProvider>>>>,
}

impl AudioSink for ShortBufferSink {
    fn init(&mut self, provider: Arc<dyn AudioProvider>) -> vocalis_core::error::Result<()> {
        *self.provider.lock() = Some(provider);
        Ok(())
    }

    fn start(&mut self) -> vocalis_core::error::Result<()> {
        Ok(())
    }

    fn stop(&mut self) {}

    fn format(&self) -> SinkFormat {
        format()
    }
}

#[test]
fn short_sink_buffer_is_filled_without_overrun() {
    let sink = ShortBufferSink::default();
    let engine = EngineHandle::new(ScriptedEngine {
        rate: 16_000,
        chunk: ENGINE_CHUNK,
        log: Arc::default(),
    });
    let service = SpeechService::new(engine, Box::new(sink.clone()), ServiceConfig::default());
    service.start_service().expect("service starts");
    let provider = sink.provider.lock().clone().expect("sink bound");

    let (notifier, done) = oneshot(1);
    assert!(service.speak("600", SpeakOptions::default().with_completion(notifier)));
    let mut pulled = Vec::new();
    let deadline = Instant::now() + TIMEOUT;
    let event = loop {
        // Room for 50 stereo frames, while 128 are requested.
        let mut buf = [0i16; 100];
        assert!(provider.fill_audio_buffer(&mut buf, PULL_FRAMES, 2));
        pulled.extend_from_slice(&buf);
        if let Some(event) = done.try_get() {
            break event;
        }
        assert!(Instant::now() < deadline, "timed out pulling short buffers");
        thread::sleep(Duration::from_millis(1));
    };
    assert_eq!(event.kind, UtteranceEventKind::End);
    let diag = service.diagnostics_snapshot();
    assert_eq!(diag.frames_played, 600);
    assert_eq!(diag.earcon_mix_errors, 0);
    assert_eq!(pulled.chunks_exact(2).filter(|f| f[0] == LEVEL).count(), 600);
}

#[test]
fn status_events_follow_the_queue() {
    let mut h = Harness::new(16_000, ServiceConfig::default());
    let mut rx = h.service.subscribe_status();
    h.service.start_service().expect("service starts");
    assert_eq!(next_status(&mut rx), ServiceStatus::Idle);

    let done = h.speak("200", 1);
    assert_eq!(next_status(&mut rx), ServiceStatus::Busy);
    h.pump_until(|_| done.try_get());
    assert_eq!(next_status(&mut rx), ServiceStatus::Idle);

    h.service.stop_service();
    assert_eq!(next_status(&mut rx), ServiceStatus::Error);
    assert_eq!(h.service.get_status(), ServiceStatus::Error);
}

#[test]
fn failed_sink_init_leaves_service_stopped() {
    let engine = EngineHandle::new(ScriptedEngine {
        rate: 16_000,
        chunk: ENGINE_CHUNK,
        log: Arc::default(),
    });
    let service = SpeechService::new(
        engine,
        Box::new(ManualSink::failing(format())),
        ServiceConfig::default(),
    );
    assert!(matches!(
        service.start_service(),
        Err(VocalisError::AudioDevice(_))
    ));
    assert!(!service.is_running());
    assert_eq!(service.get_status(), ServiceStatus::Error);
    assert!(!service.speak("10", SpeakOptions::default()));
}

#[test]
fn stop_service_interrupts_and_service_can_restart() {
    let mut h = Harness::started(16_000, ServiceConfig::default());
    assert!(matches!(
        h.service.start_service(),
        Err(VocalisError::AlreadyRunning)
    ));
    let long = h.speak("100000", 1);
    let queued = h.speak("10", 2);
    wait_for(|| h.service.buffered_frames() > 0);

    h.service.stop_service();
    assert!(!h.service.is_running());
    assert_eq!(
        long.wait_timeout(TIMEOUT).map(|e| e.kind),
        Some(UtteranceEventKind::Interrupted)
    );
    assert_eq!(
        queued.wait_timeout(TIMEOUT).map(|e| e.kind),
        Some(UtteranceEventKind::Interrupted)
    );

    h.service.start_service().expect("service restarts");
    let done = h.speak("200", 3);
    let event = h.pump_until(|_| done.try_get());
    assert_eq!(event.kind, UtteranceEventKind::End);
}

#[test]
fn earcons_mix_over_silence() {
    let mut h = Harness::started(16_000, ServiceConfig::default());
    let clip: Vec<i16> = vec![2_000; 100];
    let id = h.service.load_earcon(&clip, 1, 8_000, false).expect("earcon loads");
    assert!(!h.service.is_earcon_playing(id).expect("known id"));
    assert!(matches!(
        h.service.play_earcon(id + 1),
        Err(VocalisError::EarconNotFound { .. })
    ));

    h.service.play_earcon(id).expect("earcon plays");
    assert!(h.service.is_any_earcon_playing());
    h.pump_until(|s| (!s.is_any_earcon_playing()).then_some(()));
    assert!(h.pulled.iter().any(|&s| s > 1_000));
    assert!(h.pulled.chunks_exact(2).all(|f| f[0] == f[1]));

    h.service.play_earcon(id).expect("earcon replays");
    h.service.stop_earcon(id).expect("earcon stops");
    assert!(!h.service.is_earcon_playing(id).expect("known id"));
    h.service.stop_all_earcons().expect("running");
}

#[test]
fn bridge_speaks_the_line_protocol() {
    let mut h = Harness::new(16_000, ServiceConfig::default());
    let bridge = ControlBridge::new(Arc::clone(&h.service));
    let completions = bridge.completions();

    assert_eq!(bridge.handle_line("status"), Some(ControlResponse::Error));
    assert_eq!(bridge.handle_line("speak:5:3.4:7:1:50"), Some(ControlResponse::Busy));
    assert_eq!(bridge.handle_line("startService"), Some(ControlResponse::Idle));
    assert_eq!(bridge.handle_line("speak:5:3.4:7:7:200"), Some(ControlResponse::Busy));

    let event = h.pump_until(|_| completions.try_recv().ok());
    assert_eq!(event.utterance_id, 7);
    assert_eq!(
        vocalis_core::ipc::bridge::completion_response(&event).to_string(),
        "end:7"
    );
    // Host prosody units arrive normalized.
    assert_eq!(*h.log.rates.lock(), vec![1.0]);

    assert_eq!(bridge.handle_line("stop"), None);
    assert_eq!(bridge.handle_line("sing:loudly"), None);
    assert_eq!(bridge.handle_line("speak:1:1:1"), None);
    assert_eq!(bridge.handle_line("status"), Some(ControlResponse::Idle));
    assert_eq!(bridge.handle_line("stopService"), None);
    assert_eq!(bridge.handle_line("status"), Some(ControlResponse::Error));
    assert!(completions.try_recv().is_err());
}
