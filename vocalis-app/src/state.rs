//! Host state shared by the stdin reader and the event forwarders.

use std::collections::HashMap;
use std::sync::Arc;

use crossbeam_channel::Sender;
use parking_lot::Mutex;
use tracing::{info, warn};
use vocalis_core::ipc::protocol::{split_message, ControlResponse};
use vocalis_core::ControlBridge;

use crate::settings::AppSettings;

/// Wire replies for host-level earcon commands.
const REPLY_OK: &str = "ok";

pub struct HostState {
    pub bridge: Arc<ControlBridge>,
    pub settings: AppSettings,
    /// Earcon name → mixer id for the current service run.
    earcons: Mutex<HashMap<String, usize>>,
    out: Sender<String>,
}

impl HostState {
    pub fn new(bridge: Arc<ControlBridge>, settings: AppSettings, out: Sender<String>) -> Self {
        Self {
            bridge,
            settings,
            earcons: Mutex::new(HashMap::new()),
            out,
        }
    }

    fn reply(&self, line: impl Into<String>) {
        let _ = self.out.send(line.into());
    }

    /// Handle one stdin line. Returns `false` once the host should exit.
    pub fn handle_line(&self, line: &str) -> bool {
        let line = line.trim_end_matches(['\r', '\n']);
        let (method, args) = split_message(line);
        match method.as_str() {
            "playEarcon" | "stopEarcon" => self.earcon_command(&method, &args),
            "diagnostics" => self.report_diagnostics(),
            "quit" => return false,
            _ => {
                let response = self.bridge.handle_line(line);
                if response == Some(ControlResponse::Idle) && method == "startService" {
                    self.load_earcons();
                }
                if let Some(response) = response {
                    self.reply(response.to_string());
                }
            }
        }
        true
    }

    fn load_earcons(&self) {
        let service = self.bridge.service();
        let mut earcons = self.earcons.lock();
        earcons.clear();
        for earcon in &self.settings.earcons {
            match service.load_earcon_from_wav(&earcon.path, earcon.looping) {
                Ok(id) => {
                    earcons.insert(earcon.name.to_ascii_lowercase(), id);
                }
                Err(e) => warn!(
                    name = earcon.name.as_str(),
                    path = %earcon.path.display(),
                    "earcon not loaded: {e}"
                ),
            }
        }
        info!(loaded = earcons.len(), "earcons ready");
    }

    fn earcon_command(&self, method: &str, args: &[String]) {
        let Some(name) = args.first() else {
            warn!(method, "earcon command needs a name");
            self.reply(ControlResponse::Error.to_string());
            return;
        };
        let id = self.earcons.lock().get(&name.to_ascii_lowercase()).copied();
        let Some(id) = id else {
            warn!(name = name.as_str(), "unknown earcon");
            self.reply(ControlResponse::Error.to_string());
            return;
        };
        let service = self.bridge.service();
        let result = if method == "playEarcon" {
            service.play_earcon(id)
        } else {
            service.stop_earcon(id)
        };
        match result {
            Ok(()) => self.reply(REPLY_OK),
            Err(e) => {
                warn!(name = name.as_str(), "{method} failed: {e}");
                self.reply(ControlResponse::Error.to_string());
            }
        }
    }

    fn report_diagnostics(&self) {
        let snapshot = self.bridge.service().diagnostics_snapshot();
        match serde_json::to_string(&snapshot) {
            Ok(json) => self.reply(format!("diagnostics:{json}")),
            Err(e) => warn!("diagnostics not serializable: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::{unbounded, Receiver};
    use vocalis_core::{
        EngineHandle, ManualSink, ServiceConfig, SinkFormat, SpeechService, ToneEngine,
    };

    fn host() -> (HostState, Receiver<String>) {
        let sink = ManualSink::new(SinkFormat {
            sample_rate: 16_000,
            channels: 2,
            chunk_frames: 256,
            total_buffer_frames: 1_024,
        });
        let service = Arc::new(SpeechService::new(
            EngineHandle::new(ToneEngine::new()),
            Box::new(sink),
            ServiceConfig::default(),
        ));
        let bridge = Arc::new(ControlBridge::new(service));
        let (tx, rx) = unbounded();
        (HostState::new(bridge, AppSettings::default(), tx), rx)
    }

    #[test]
    fn protocol_lines_reach_the_bridge() {
        let (host, rx) = host();
        assert!(host.handle_line("status\n"));
        assert_eq!(rx.try_recv().ok().as_deref(), Some("error"));
        assert!(host.handle_line("startService"));
        assert_eq!(rx.try_recv().ok().as_deref(), Some("idle"));
        assert!(host.handle_line("stop"));
        assert!(rx.try_recv().is_err());
        assert!(!host.handle_line("quit"));
    }

    #[test]
    fn unknown_earcon_replies_error() {
        let (host, rx) = host();
        host.handle_line("startService");
        let _ = rx.try_recv();
        host.handle_line("playEarcon:missing");
        assert_eq!(rx.try_recv().ok().as_deref(), Some("error"));
        host.handle_line("stopEarcon");
        assert_eq!(rx.try_recv().ok().as_deref(), Some("error"));
    }

    #[test]
    fn diagnostics_reply_is_json() {
        let (host, rx) = host();
        host.handle_line("diagnostics");
        let line = rx.try_recv().expect("diagnostics reply");
        let json = line.strip_prefix("diagnostics:").expect("prefixed");
        let value: serde_json::Value = serde_json::from_str(json).expect("valid json");
        assert_eq!(value["utterancesQueued"], 0);
    }
}
