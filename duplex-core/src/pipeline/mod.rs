//! The two audio pipelines.
//!
//! - `capture`: microphone → frame ring → pump thread → 4096-sample batches
//!   → 16 kHz decimation → recognizer; results come back as text events.
//! - `playback`: speak requests → synthesizer → stale-id filter → queue →
//!   one buffer at a time on the output context.
//!
//! Both keep their mutable state behind a `parking_lot::Mutex` and never
//! publish while holding it: events produced under the lock are collected
//! and published after it is released.

pub mod capture;
pub mod playback;

pub use capture::{CaptureDiagnosticsSnapshot, CapturePipeline};
pub use playback::{PlaybackDiagnosticsSnapshot, PlaybackPipeline};
