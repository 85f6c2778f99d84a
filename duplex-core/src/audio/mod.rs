//! Audio devices: microphone input, speaker output, rate conversion.
//!
//! # Design constraints
//!
//! Device callbacks run on OS audio threads at elevated priority. They
//! **must not** allocate on the steady-state path, block on a contended
//! lock, or perform I/O. Input callbacks satisfy this by writing into an
//! SPSC ring producer (`buffering::FrameProducer`); the output callback
//! reads from a pre-filled buffer and signals completion with a
//! non-blocking `try_send`.
//!
//! # Threading note
//!
//! `cpal::Stream` is `!Send` on most platforms (COM on Windows, CoreAudio
//! on macOS). Each cpal stream is therefore created, owned and dropped on
//! its own dedicated thread; the handles returned here only hold a release
//! channel and the thread's `JoinHandle`.

pub mod device;
pub mod input;
pub mod output;
pub mod resample;
pub mod wav;

use std::sync::{atomic::AtomicBool, Arc};

use serde::{Deserialize, Serialize};

use crate::{buffering::FrameProducer, error::Result};

pub use output::{EndedCallback, OutputContext, OutputDevice, PlaybackBuffer};

#[cfg(feature = "audio-cpal")]
pub use input::CpalInput;
#[cfg(feature = "audio-cpal")]
pub use output::CpalOutput;
pub use wav::WavInput;

/// Requested microphone processing and device selection.
///
/// The voice-processing flags are hints: backends that cannot honour them
/// capture raw input and say so at `debug` level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct CaptureConstraints {
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
    /// Input device name; `None` selects the system default.
    pub preferred_device: Option<String>,
}

impl Default for CaptureConstraints {
    fn default() -> Self {
        Self {
            echo_cancellation: true,
            noise_suppression: true,
            auto_gain_control: true,
            preferred_device: None,
        }
    }
}

/// A source of microphone audio.
pub trait InputDevice: Send + Sync + 'static {
    /// Fail with `DuplexError::Capability` when this backend cannot work at
    /// all on the current system. Called before any device is touched.
    fn check_support(&self) -> Result<()> {
        Ok(())
    }

    /// Acquire the microphone.
    ///
    /// Mono f32 samples are pushed into `producer` at the device's native
    /// rate for as long as `connected` is set; while it is clear, captured
    /// audio is discarded but the device stays open.
    ///
    /// May block (permission prompts, driver start-up); callers run it on a
    /// blocking thread.
    fn open(
        &self,
        constraints: &CaptureConstraints,
        producer: FrameProducer,
        connected: Arc<AtomicBool>,
    ) -> Result<Box<dyn InputStream>>;
}

/// An open microphone stream.
pub trait InputStream: Send {
    /// Native capture rate in Hz.
    fn sample_rate(&self) -> u32;

    /// Release the microphone.
    fn close(self: Box<Self>);
}
