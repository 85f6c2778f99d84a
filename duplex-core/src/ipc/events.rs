//! Event enums published on the component hubs.
//!
//! | Hub | Event enum | Published by |
//! |-----|------------|--------------|
//! | capture | `CaptureEvent` | `CapturePipeline` |
//! | playback | `PlaybackEvent` | `PlaybackPipeline` |
//! | client | `ClientEvent` | `SpeechClient` |

use serde::{Deserialize, Serialize};

use crate::error::ErrorReport;
use crate::hub::EventSet;

// ---------------------------------------------------------------------------
// States
// ---------------------------------------------------------------------------

/// Listening state of the capture pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureState {
    /// Not capturing. The microphone may still be held for a quick restart.
    Idle,
    /// Capture stage connected; batches are flowing to the recognizer.
    Listening,
    /// Unrecoverable failure (permission, missing capability, transport).
    Error,
}

/// Speaking state of the playback pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    Idle,
    Speaking,
}

/// Aggregate readiness of the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientStatus {
    Loading,
    Ready,
    /// Terminal: a client never returns to `Ready` from here.
    Error,
}

// ---------------------------------------------------------------------------
// Capture events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum CaptureEvent {
    /// In-progress transcript; an empty string clears it.
    Partial(String),
    /// Committed utterance text, never empty.
    Final(String),
    StateChange(CaptureState),
    Error(ErrorReport),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureEventName {
    Partial,
    Final,
    StateChange,
    Error,
}

impl EventSet for CaptureEvent {
    type Name = CaptureEventName;

    fn name(&self) -> CaptureEventName {
        match self {
            CaptureEvent::Partial(_) => CaptureEventName::Partial,
            CaptureEvent::Final(_) => CaptureEventName::Final,
            CaptureEvent::StateChange(_) => CaptureEventName::StateChange,
            CaptureEvent::Error(_) => CaptureEventName::Error,
        }
    }
}

// ---------------------------------------------------------------------------
// Playback events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum PlaybackEvent {
    Start,
    End,
    StateChange(PlaybackState),
    Error(ErrorReport),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackEventName {
    Start,
    End,
    StateChange,
    Error,
}

impl EventSet for PlaybackEvent {
    type Name = PlaybackEventName;

    fn name(&self) -> PlaybackEventName {
        match self {
            PlaybackEvent::Start => PlaybackEventName::Start,
            PlaybackEvent::End => PlaybackEventName::End,
            PlaybackEvent::StateChange(_) => PlaybackEventName::StateChange,
            PlaybackEvent::Error(_) => PlaybackEventName::Error,
        }
    }
}

// ---------------------------------------------------------------------------
// Client events
// ---------------------------------------------------------------------------

/// The merged event surface of `SpeechClient`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ClientEvent {
    SttPartial(String),
    SttFinal(String),
    TtsStart,
    TtsEnd,
    Status(ClientStatus),
    Error(ErrorReport),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientEventName {
    SttPartial,
    SttFinal,
    TtsStart,
    TtsEnd,
    Status,
    Error,
}

impl ClientEventName {
    pub const ALL: [ClientEventName; 6] = [
        ClientEventName::SttPartial,
        ClientEventName::SttFinal,
        ClientEventName::TtsStart,
        ClientEventName::TtsEnd,
        ClientEventName::Status,
        ClientEventName::Error,
    ];
}

impl EventSet for ClientEvent {
    type Name = ClientEventName;

    fn name(&self) -> ClientEventName {
        match self {
            ClientEvent::SttPartial(_) => ClientEventName::SttPartial,
            ClientEvent::SttFinal(_) => ClientEventName::SttFinal,
            ClientEvent::TtsStart => ClientEventName::TtsStart,
            ClientEvent::TtsEnd => ClientEventName::TtsEnd,
            ClientEvent::Status(_) => ClientEventName::Status,
            ClientEvent::Error(_) => ClientEventName::Error,
        }
    }
}
