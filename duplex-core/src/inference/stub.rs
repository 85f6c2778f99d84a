//! Deterministic stand-in engines.
//!
//! They let the capture and playback pipelines be exercised end to end on
//! machines without model assets: the recognizer reports a numbered
//! utterance per fixed amount of audio, the synthesizer speaks a sine tone.

use std::f32::consts::TAU;
use std::path::Path;

use tracing::debug;

use crate::error::{DuplexError, Result};
use crate::inference::{
    OnlineRecognizer, RecognizerLoader, SynthesizedAudio, Synthesizer, SynthesizerLoader,
};

/// Samples consumed per `decode` step (100 ms at 16 kHz).
const DECODE_STEP: usize = 1_600;

/// Default utterance length: one second at 16 kHz.
pub const DEFAULT_ENDPOINT_SAMPLES: usize = 16_000;

/// Reports `"stub utterance <n>"` once audio has been decoded and an
/// endpoint after `endpoint_samples` decoded samples.
#[derive(Debug)]
pub struct StubRecognizer {
    endpoint_samples: usize,
    pending: usize,
    decoded: usize,
    utterance: u32,
}

impl StubRecognizer {
    pub fn new(endpoint_samples: usize) -> Self {
        Self {
            endpoint_samples: endpoint_samples.max(1),
            pending: 0,
            decoded: 0,
            utterance: 1,
        }
    }

    /// Loader for use with `RecognitionProxy` / `ClientBackends`.
    pub fn loader(endpoint_samples: usize) -> Box<dyn RecognizerLoader> {
        Box::new(move |asset_dir: &Path| -> Result<Box<dyn OnlineRecognizer>> {
            debug!(asset_dir = %asset_dir.display(), "loading stub recognizer");
            Ok(Box::new(StubRecognizer::new(endpoint_samples)))
        })
    }
}

impl Default for StubRecognizer {
    fn default() -> Self {
        Self::new(DEFAULT_ENDPOINT_SAMPLES)
    }
}

impl OnlineRecognizer for StubRecognizer {
    fn accept_waveform(&mut self, sample_rate: u32, samples: &[f32]) -> Result<()> {
        if sample_rate == 0 {
            return Err(DuplexError::Runtime("sample rate must be positive".into()));
        }
        self.pending += samples.len();
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.pending >= DECODE_STEP
    }

    fn decode(&mut self) -> Result<()> {
        let step = self.pending.min(DECODE_STEP);
        self.pending -= step;
        self.decoded += step;
        Ok(())
    }

    fn result(&self) -> String {
        if self.decoded == 0 {
            String::new()
        } else {
            format!("stub utterance {}", self.utterance)
        }
    }

    fn is_endpoint(&self) -> bool {
        self.decoded >= self.endpoint_samples
    }

    fn reset(&mut self) {
        self.decoded = 0;
        self.utterance += 1;
    }
}

/// Output rate of `ToneSynthesizer`.
pub const TONE_SAMPLE_RATE: u32 = 22_050;

const SECONDS_PER_WORD: f32 = 0.25;
const AMPLITUDE: f32 = 0.2;
const FADE_SAMPLES: usize = 110;

/// Speaks a sine tone: duration scales with word count over speed, pitch
/// with voice id.
#[derive(Debug)]
pub struct ToneSynthesizer {
    num_speakers: u32,
}

impl ToneSynthesizer {
    pub fn new(num_speakers: u32) -> Self {
        Self {
            num_speakers: num_speakers.max(1),
        }
    }

    pub fn loader(num_speakers: u32) -> Box<dyn SynthesizerLoader> {
        Box::new(move |asset_dir: &Path| -> Result<Box<dyn Synthesizer>> {
            debug!(asset_dir = %asset_dir.display(), "loading tone synthesizer");
            Ok(Box::new(ToneSynthesizer::new(num_speakers)))
        })
    }

    fn pitch(voice_id: u32) -> f32 {
        220.0 + 20.0 * voice_id as f32
    }
}

impl Default for ToneSynthesizer {
    fn default() -> Self {
        Self::new(8)
    }
}

impl Synthesizer for ToneSynthesizer {
    fn num_speakers(&self) -> u32 {
        self.num_speakers
    }

    fn sample_rate(&self) -> u32 {
        TONE_SAMPLE_RATE
    }

    fn generate(&mut self, text: &str, voice_id: u32, speed: f32) -> Result<SynthesizedAudio> {
        if voice_id >= self.num_speakers {
            return Err(DuplexError::Runtime(format!(
                "voice {voice_id} out of range ({} speakers)",
                self.num_speakers
            )));
        }
        if !speed.is_finite() || speed <= 0.0 {
            return Err(DuplexError::Runtime(format!("invalid speed {speed}")));
        }

        let words = text.split_whitespace().count();
        let seconds = words as f32 * SECONDS_PER_WORD / speed;
        let len = (seconds * TONE_SAMPLE_RATE as f32).round() as usize;
        let freq = Self::pitch(voice_id);

        let samples = (0..len)
            .map(|i| {
                let fade_in = (i as f32 / FADE_SAMPLES as f32).min(1.0);
                let fade_out = ((len - i) as f32 / FADE_SAMPLES as f32).min(1.0);
                let phase = TAU * freq * i as f32 / TONE_SAMPLE_RATE as f32;
                AMPLITUDE * fade_in * fade_out * phase.sin()
            })
            .collect();

        Ok(SynthesizedAudio {
            samples,
            sample_rate: TONE_SAMPLE_RATE,
        })
    }
}
