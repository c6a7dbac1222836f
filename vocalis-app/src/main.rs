//! `vocalis`: line-protocol speech host.
//!
//! Reads one control message per stdin line and writes replies and
//! completion events to stdout, one per line. Logs go to stderr.
//!
//! Besides the core protocol (`startService`, `speak:…`, `stop`, `status`,
//! `stopService`) the host understands `playEarcon:<name>`,
//! `stopEarcon:<name>`, `diagnostics` and `quit`. Earcons are the ones
//! listed in the settings file, loaded on every `startService`.
//!
//! ```text
//! vocalis                     run the host
//! vocalis --list-devices      print output devices as JSON
//! vocalis --write-settings    write the effective settings file
//! ```

mod settings;
mod state;

use std::io::{BufRead, Write};
use std::sync::Arc;
use std::thread;

use anyhow::{bail, Context};
use crossbeam_channel::unbounded;
use settings::{default_settings_path, load_settings, save_settings, AppSettings};
use state::HostState;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info};
use vocalis_core::audio::device::list_output_devices;
use vocalis_core::audio::{AudioSink, WavFileSink, WavFileSinkConfig};
use vocalis_core::ipc::bridge::completion_response;
use vocalis_core::synthesis::VoicePattern;
use vocalis_core::{
    ControlBridge, CpalSink, CpalSinkConfig, EngineHandle, ServiceConfig, SpeechService,
    ToneEngine,
};

fn build_sink(settings: &AppSettings) -> Box<dyn AudioSink> {
    if settings.writes_wav() {
        Box::new(WavFileSink::new(WavFileSinkConfig {
            path: settings.wav_path.clone(),
            sample_rate: settings.wav_sample_rate,
            channels: settings.wav_channels,
            chunk_frames: settings.chunk_frames,
            buffer_chunks: settings.buffer_chunks,
            realtime: settings.wav_realtime,
        }))
    } else {
        Box::new(CpalSink::new(CpalSinkConfig {
            preferred_device: settings.preferred_output_device.clone(),
            chunk_frames: settings.chunk_frames,
            buffer_chunks: settings.buffer_chunks,
        }))
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vocalis=info,vocalis_core=info".parse().unwrap()),
        )
        .init();

    let settings_path = default_settings_path();
    match std::env::args().nth(1).as_deref() {
        None => {}
        Some("--list-devices") => {
            println!("{}", serde_json::to_string_pretty(&list_output_devices())?);
            return Ok(());
        }
        Some("--write-settings") => {
            save_settings(&settings_path, &load_settings(&settings_path))
                .with_context(|| format!("writing {}", settings_path.display()))?;
            println!("{}", settings_path.display());
            return Ok(());
        }
        Some(other) => bail!("unknown argument {other:?} (try --list-devices or --write-settings)"),
    }

    let settings = load_settings(&settings_path);
    info!(
        settings = %settings_path.display(),
        output = settings.output.as_str(),
        "Vocalis starting"
    );

    let service = Arc::new(SpeechService::new(
        EngineHandle::new(ToneEngine::new()),
        build_sink(&settings),
        ServiceConfig {
            stop_when_finished: settings.stop_when_finished,
            ..ServiceConfig::default()
        },
    ));

    let mut bridge = ControlBridge::new(Arc::clone(&service));
    if !settings.voice_language.is_empty() {
        bridge = bridge.with_default_voice(VoicePattern {
            language: settings.voice_language.clone(),
            ..VoicePattern::default()
        });
    }
    let bridge = Arc::new(bridge);

    let (out_tx, out_rx) = unbounded::<String>();
    let writer = thread::Builder::new()
        .name("vocalis-stdout".into())
        .spawn(move || {
            let stdout = std::io::stdout();
            let mut out = stdout.lock();
            for line in out_rx.iter() {
                if writeln!(out, "{line}").and_then(|_| out.flush()).is_err() {
                    break;
                }
            }
        })?;

    let completions = bridge.completions();
    let completion_tx = out_tx.clone();
    let forwarder = thread::Builder::new()
        .name("vocalis-events".into())
        .spawn(move || {
            for event in completions.iter() {
                debug!(utterance_id = event.utterance_id, kind = ?event.kind, "utterance finished");
                if completion_tx.send(completion_response(&event).to_string()).is_err() {
                    break;
                }
            }
        })?;

    let mut status_rx = service.subscribe_status();
    thread::Builder::new()
        .name("vocalis-status".into())
        .spawn(move || loop {
            match status_rx.blocking_recv() {
                Ok(ev) => info!(status = ?ev.status, detail = ?ev.detail, "service status"),
                Err(RecvError::Lagged(n)) => debug!(skipped = n, "status log lagged"),
                Err(RecvError::Closed) => break,
            }
        })?;

    let state = HostState::new(Arc::clone(&bridge), settings, out_tx);
    for line in std::io::stdin().lock().lines() {
        let line = line.context("reading stdin")?;
        if !state.handle_line(&line) {
            break;
        }
    }

    info!("input closed, shutting down");
    service.stop_service();
    // Dropping the bridge closes the completion channel, which ends the
    // forwarder, which in turn lets the stdout writer drain and exit.
    drop(state);
    drop(bridge);
    let _ = forwarder.join();
    let _ = writer.join();
    Ok(())
}
