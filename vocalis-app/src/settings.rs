//! Persistent host settings (JSON file in the user data directory).

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

pub const SETTINGS_ENV: &str = "VOCALIS_SETTINGS";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct EarconSetting {
    /// Name hosts use in `playEarcon:<name>`.
    pub name: String,
    pub path: PathBuf,
    #[serde(rename = "loop")]
    pub looping: bool,
}

impl Default for EarconSetting {
    fn default() -> Self {
        Self {
            name: String::new(),
            path: PathBuf::new(),
            looping: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct AppSettings {
    /// `device` or `wav`.
    pub output: String,
    pub preferred_output_device: Option<String>,
    pub wav_path: PathBuf,
    pub wav_sample_rate: u32,
    pub wav_channels: usize,
    pub wav_realtime: bool,
    pub chunk_frames: usize,
    pub buffer_chunks: usize,
    pub stop_when_finished: bool,
    /// Language tag used to pick the voice for every `speak`.
    pub voice_language: String,
    pub earcons: Vec<EarconSetting>,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            output: "device".into(),
            preferred_output_device: None,
            wav_path: PathBuf::from("vocalis-output.wav"),
            wav_sample_rate: 22_050,
            wav_channels: 2,
            wav_realtime: true,
            chunk_frames: 1024,
            buffer_chunks: 4,
            stop_when_finished: true,
            voice_language: String::new(),
            earcons: Vec::new(),
        }
    }
}

impl AppSettings {
    pub fn normalize(&mut self) {
        self.output = normalize_output(&self.output);
        self.preferred_output_device = self
            .preferred_output_device
            .as_ref()
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty());
        if self.wav_path.as_os_str().is_empty() {
            self.wav_path = PathBuf::from("vocalis-output.wav");
        }
        self.wav_sample_rate = self.wav_sample_rate.clamp(8_000, 192_000);
        self.wav_channels = self.wav_channels.clamp(1, 2);
        self.chunk_frames = self.chunk_frames.clamp(64, 16_384);
        self.buffer_chunks = self.buffer_chunks.clamp(2, 32);
        self.voice_language = self.voice_language.trim().to_string();
        self.earcons = normalize_earcons(&self.earcons);
    }

    pub fn writes_wav(&self) -> bool {
        self.output == "wav"
    }
}

pub fn normalize_output(raw: &str) -> String {
    match raw.trim().to_ascii_lowercase().as_str() {
        "wav" | "file" | "wav_file" => "wav".into(),
        _ => "device".into(),
    }
}

fn normalize_earcons(raw: &[EarconSetting]) -> Vec<EarconSetting> {
    let mut out: Vec<EarconSetting> = Vec::new();
    for earcon in raw {
        let name = earcon.name.trim();
        if name.is_empty() || earcon.path.as_os_str().is_empty() {
            continue;
        }
        if out.iter().any(|e| e.name.eq_ignore_ascii_case(name)) {
            continue;
        }
        out.push(EarconSetting {
            name: name.to_string(),
            path: earcon.path.clone(),
            looping: earcon.looping,
        });
    }
    out
}

pub fn default_settings_path() -> PathBuf {
    if let Some(path) = std::env::var_os(SETTINGS_ENV).filter(|p| !p.is_empty()) {
        return PathBuf::from(path);
    }
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("Vocalis")
            .join("settings.json")
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var_os("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                std::env::var_os("HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("/tmp"))
                    .join(".local")
                    .join("share")
            })
            .join("vocalis")
            .join("settings.json")
    }
}

pub fn load_settings(path: &Path) -> AppSettings {
    let mut settings = fs::read_to_string(path)
        .ok()
        .and_then(|raw| serde_json::from_str::<AppSettings>(&raw).ok())
        .unwrap_or_default();
    settings.normalize();
    settings
}

pub fn save_settings(path: &Path, settings: &AppSettings) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(settings).map_err(std::io::Error::other)?;
    fs::write(path, json)
}
