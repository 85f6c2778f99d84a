//! Client configuration.
//!
//! Every field is optional on the wire; missing fields take the defaults
//! below. Call `normalize()` after deserializing untrusted input.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::audio::CaptureConstraints;

pub const DEFAULT_STT_ASSET_PATH: &str = "sherpa-onnx-asr/";
pub const DEFAULT_TTS_ASSET_PATH: &str = "sherpa-onnx-tts/";
pub const DEFAULT_WORKER_PATH: &str = "./";

const MIN_SPEED: f32 = 0.25;
const MAX_SPEED: f32 = 4.0;

/// Default voice applied when `speak` is called without one.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct VoiceSettings {
    pub voice_id: u32,
    pub speed: f32,
}

impl Default for VoiceSettings {
    fn default() -> Self {
        Self {
            voice_id: 0,
            speed: 1.0,
        }
    }
}

/// Microphone processing hints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct CaptureSettings {
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            echo_cancellation: true,
            noise_suppression: true,
            auto_gain_control: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct ClientConfig {
    /// Recognizer assets, relative to `worker_path` unless absolute.
    pub stt_asset_path: String,
    /// Synthesizer assets, relative to `worker_path` unless absolute.
    pub tts_asset_path: String,
    /// Base directory for relative asset paths.
    pub worker_path: String,
    pub tts_voice: VoiceSettings,
    /// Preferred microphone name. `None` uses the system default.
    pub input_device: Option<String>,
    pub capture: CaptureSettings,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            stt_asset_path: DEFAULT_STT_ASSET_PATH.into(),
            tts_asset_path: DEFAULT_TTS_ASSET_PATH.into(),
            worker_path: DEFAULT_WORKER_PATH.into(),
            tts_voice: VoiceSettings::default(),
            input_device: None,
            capture: CaptureSettings::default(),
        }
    }
}

impl ClientConfig {
    pub fn normalize(&mut self) {
        self.stt_asset_path = normalize_path(&self.stt_asset_path, DEFAULT_STT_ASSET_PATH);
        self.tts_asset_path = normalize_path(&self.tts_asset_path, DEFAULT_TTS_ASSET_PATH);
        self.worker_path = normalize_path(&self.worker_path, DEFAULT_WORKER_PATH);
        self.tts_voice.speed = normalize_speed(self.tts_voice.speed);
        self.input_device = self
            .input_device
            .as_ref()
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty());
    }

    pub fn stt_asset_dir(&self) -> PathBuf {
        resolve(&self.worker_path, &self.stt_asset_path)
    }

    pub fn tts_asset_dir(&self) -> PathBuf {
        resolve(&self.worker_path, &self.tts_asset_path)
    }

    pub fn capture_constraints(&self) -> CaptureConstraints {
        CaptureConstraints {
            echo_cancellation: self.capture.echo_cancellation,
            noise_suppression: self.capture.noise_suppression,
            auto_gain_control: self.capture.auto_gain_control,
            preferred_device: self.input_device.clone(),
        }
    }
}

fn normalize_path(raw: &str, default: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        default.into()
    } else {
        trimmed.into()
    }
}

/// Clamp a synthesis speed into the supported range; garbage becomes 1.0.
pub fn normalize_speed(speed: f32) -> f32 {
    if speed.is_finite() && speed > 0.0 {
        speed.clamp(MIN_SPEED, MAX_SPEED)
    } else {
        1.0
    }
}

fn resolve(base: &str, asset: &str) -> PathBuf {
    let asset = Path::new(asset);
    if asset.is_absolute() {
        asset.to_path_buf()
    } else {
        Path::new(base).join(asset)
    }
}
