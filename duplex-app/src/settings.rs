//! Persistent host settings (JSON file in the app data directory).

use std::fs;
use std::path::{Path, PathBuf};

use duplex_core::{inference::stub::DEFAULT_ENDPOINT_SAMPLES, ClientConfig};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct AppSettings {
    pub client: ClientConfig,
    /// Speaker name; `None` uses the system default.
    pub output_device: Option<String>,
    /// Audio the stub recognizer hears before it reports an endpoint.
    pub endpoint_samples: usize,
    /// Voices offered by the tone synthesizer.
    pub num_speakers: u32,
    /// Print `sttPartial` events, not only finals.
    pub show_partials: bool,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            client: ClientConfig::default(),
            output_device: None,
            endpoint_samples: DEFAULT_ENDPOINT_SAMPLES,
            num_speakers: 8,
            show_partials: true,
        }
    }
}

impl AppSettings {
    pub fn normalize(&mut self) {
        self.client.normalize();
        self.output_device = self
            .output_device
            .as_ref()
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty());
        self.endpoint_samples = self.endpoint_samples.clamp(1_600, 16_000 * 30);
        self.num_speakers = self.num_speakers.clamp(1, 256);
        if self.client.tts_voice.voice_id >= self.num_speakers {
            self.client.tts_voice.voice_id = 0;
        }
    }
}

pub fn default_settings_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("Lattice Labs")
            .join("Duplex")
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
            .join("duplex")
            .join("settings.json")
    }
}

/// Read settings, falling back to defaults on any read or parse failure.
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
