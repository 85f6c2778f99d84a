//! Speech engine abstraction.
//!
//! The recognizer and synthesizer runtimes are opaque collaborators. These
//! traits are the whole surface the workers consume, shaped after streaming
//! online-recognizer and offline-TTS runtimes. Engines are freed by `Drop`.
//!
//! Engines are constructed on their worker thread by a loader, so they need
//! `Send` but never `Sync`; all mutation happens on that one thread.

pub mod stub;

use std::path::Path;

use crate::error::Result;

/// Streaming speech recognizer with endpoint detection.
pub trait OnlineRecognizer: Send + 'static {
    /// Append mono PCM captured at `sample_rate`.
    fn accept_waveform(&mut self, sample_rate: u32, samples: &[f32]) -> Result<()>;

    /// `true` while enough audio is buffered for another `decode` step.
    fn is_ready(&self) -> bool;

    fn decode(&mut self) -> Result<()>;

    /// Text decoded so far for the current utterance.
    fn result(&self) -> String;

    /// `true` once trailing silence marks the end of the utterance.
    fn is_endpoint(&self) -> bool;

    /// Start a new utterance.
    fn reset(&mut self);
}

/// Builds a recognizer from its asset directory. Runs on the worker thread.
pub trait RecognizerLoader: Send + 'static {
    fn load(self: Box<Self>, asset_dir: &Path) -> Result<Box<dyn OnlineRecognizer>>;
}

impl<F> RecognizerLoader for F
where
    F: FnOnce(&Path) -> Result<Box<dyn OnlineRecognizer>> + Send + 'static,
{
    fn load(self: Box<Self>, asset_dir: &Path) -> Result<Box<dyn OnlineRecognizer>> {
        (*self)(asset_dir)
    }
}

/// One generated utterance.
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesizedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

/// Text-to-speech engine.
pub trait Synthesizer: Send + 'static {
    fn num_speakers(&self) -> u32;

    /// Rate of everything `generate` returns.
    fn sample_rate(&self) -> u32;

    /// # Errors
    /// Returns `DuplexError::Runtime` for unusable input (unknown voice,
    /// invalid speed) or engine failure.
    fn generate(&mut self, text: &str, voice_id: u32, speed: f32) -> Result<SynthesizedAudio>;
}

/// Builds a synthesizer from its asset directory. Runs on the worker thread.
pub trait SynthesizerLoader: Send + 'static {
    fn load(self: Box<Self>, asset_dir: &Path) -> Result<Box<dyn Synthesizer>>;
}

impl<F> SynthesizerLoader for F
where
    F: FnOnce(&Path) -> Result<Box<dyn Synthesizer>> + Send + 'static,
{
    fn load(self: Box<Self>, asset_dir: &Path) -> Result<Box<dyn Synthesizer>> {
        (*self)(asset_dir)
    }
}
