//! Messages exchanged with engine workers.
//!
//! Each worker is reachable only through these tagged unions. Synthesis
//! traffic is correlated by `RequestId`; a response whose id is no longer
//! current is simply ignored by the receiver; the worker is never
//! interrupted.
//!
//! Serialised form: `{"type": "<tag>", ...fields}` with camelCase tags and
//! field names.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Correlates a speak request with its audio chunks and completion signal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub u64);

impl RequestId {
    /// The id that supersedes this one.
    pub fn next(self) -> Self {
        RequestId(self.0.wrapping_add(1))
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Recognizer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum RecognizerRequest {
    Init { asset_path: String },
    /// 16 kHz mono PCM; ownership moves to the worker.
    Feed { samples: Vec<f32> },
    Destroy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum RecognizerResponse {
    Ready,
    Error { message: String },
    Result { text: String, is_endpoint: bool },
}

// ---------------------------------------------------------------------------
// Synthesizer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum SynthesizerRequest {
    Init {
        asset_path: String,
    },
    Speak {
        text: String,
        voice_id: u32,
        speed: f32,
        id: RequestId,
    },
    Destroy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum SynthesizerResponse {
    Ready {
        num_speakers: u32,
    },
    Audio {
        samples: Vec<f32>,
        sample_rate: u32,
        id: RequestId,
    },
    /// Every chunk for `id` has been sent.
    Done {
        id: RequestId,
    },
    Error {
        message: String,
    },
}

// ---------------------------------------------------------------------------
// Handshake
// ---------------------------------------------------------------------------

/// Classifies the first replies a worker sends after `Init`.
pub trait HandshakeReply: Send + 'static {
    /// `Some(Ok)` on ready, `Some(Err(message))` on failure, `None` for
    /// anything else (ignored while waiting).
    fn handshake(&self) -> Option<Result<(), String>>;
}

impl HandshakeReply for RecognizerResponse {
    fn handshake(&self) -> Option<Result<(), String>> {
        match self {
            RecognizerResponse::Ready => Some(Ok(())),
            RecognizerResponse::Error { message } => Some(Err(message.clone())),
            RecognizerResponse::Result { .. } => None,
        }
    }
}

impl HandshakeReply for SynthesizerResponse {
    fn handshake(&self) -> Option<Result<(), String>> {
        match self {
            SynthesizerResponse::Ready { .. } => Some(Ok(())),
            SynthesizerResponse::Error { message } => Some(Err(message.clone())),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizer_messages_use_type_tag_and_camel_case_fields() {
        let json = serde_json::to_value(RecognizerRequest::Init {
            asset_path: "/models/asr/".into(),
        })
        .expect("serialize init");
        assert_eq!(json["type"], "init");
        assert_eq!(json["assetPath"], "/models/asr/");

        let json = serde_json::to_value(RecognizerResponse::Result {
            text: "hello".into(),
            is_endpoint: true,
        })
        .expect("serialize result");
        assert_eq!(json["type"], "result");
        assert_eq!(json["isEndpoint"], true);

        let json = serde_json::to_value(RecognizerRequest::Destroy).expect("serialize destroy");
        assert_eq!(json, serde_json::json!({ "type": "destroy" }));
    }

    #[test]
    fn synthesizer_speak_carries_request_id_as_plain_number() {
        let json = serde_json::to_value(SynthesizerRequest::Speak {
            text: "Hi.".into(),
            voice_id: 3,
            speed: 1.5,
            id: RequestId(42),
        })
        .expect("serialize speak");
        assert_eq!(json["type"], "speak");
        assert_eq!(json["voiceId"], 3);
        assert_eq!(json["id"], 42);

        let parsed: SynthesizerResponse =
            serde_json::from_str(r#"{"type":"done","id":42}"#).expect("parse done");
        assert_eq!(parsed, SynthesizerResponse::Done { id: RequestId(42) });
    }

    #[test]
    fn ready_reply_includes_speaker_count() {
        let parsed: SynthesizerResponse =
            serde_json::from_str(r#"{"type":"ready","numSpeakers":904}"#).expect("parse ready");
        assert_eq!(parsed, SynthesizerResponse::Ready { num_speakers: 904 });
        assert_eq!(parsed.handshake(), Some(Ok(())));
    }

    #[test]
    fn handshake_classification() {
        assert_eq!(RecognizerResponse::Ready.handshake(), Some(Ok(())));
        assert_eq!(
            RecognizerResponse::Error {
                message: "bad model".into()
            }
            .handshake(),
            Some(Err("bad model".into()))
        );
        assert_eq!(
            RecognizerResponse::Result {
                text: String::new(),
                is_endpoint: false
            }
            .handshake(),
            None
        );
    }

    #[test]
    fn request_ids_increase() {
        let first = RequestId::default().next();
        assert_eq!(first, RequestId(1));
        assert!(first.next() > first);
    }
}
