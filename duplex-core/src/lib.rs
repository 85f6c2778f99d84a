//! # duplex-core
//!
//! Speech-in / speech-out client SDK.
//!
//! ## Architecture
//!
//! ```text
//! Microphone → InputDevice callback → SPSC RingBuffer → capture-pump thread
//!                                                           │
//!                                      BatchAccumulator (4096 native samples)
//!                                                           │
//!                                            decimate → 16 kHz → RecognitionProxy
//!                                                           │
//!                                         recognizer-worker (OnlineRecognizer)
//!                                                           │
//!                                            partial / final → EventHub
//!
//! speak(text) → RequestId → SynthesisProxy → synthesizer-worker (Synthesizer)
//!                                                           │
//!                                  AudioChunk{id} → stale filter → PlaybackQueue
//!                                                           │
//!                                            OutputContext (one buffer at a time)
//! ```
//!
//! The audio callback is zero-alloc. Engines run on their own threads and are
//! reached only through typed messages.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod audio;
pub mod buffering;
pub mod client;
pub mod config;
pub mod error;
pub mod hub;
pub mod inference;
pub mod ipc;
pub mod pipeline;
pub mod proxy;
pub mod worker;

#[cfg(test)]
pub(crate) mod testing;

// Convenience re-exports for downstream crates
pub use client::{ClientBackends, SpeechClient};
pub use config::{ClientConfig, VoiceSettings};
pub use error::{DuplexError, ErrorKind, ErrorReport, PermissionError};
pub use hub::{EventHub, EventSet, SubscriptionId};
pub use inference::{OnlineRecognizer, RecognizerLoader, SynthesizedAudio, Synthesizer, SynthesizerLoader};
pub use ipc::events::{
    CaptureEvent, CaptureState, ClientEvent, ClientEventName, ClientStatus, PlaybackEvent,
    PlaybackState,
};
pub use ipc::protocol::RequestId;
pub use pipeline::{capture::CapturePipeline, playback::PlaybackPipeline};
