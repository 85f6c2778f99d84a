//! Synthesizer worker loop.
//!
//! Text is synthesized sentence by sentence so the first chunk can start
//! playing while the rest is still being generated.

use std::path::Path;
use std::sync::OnceLock;

use crossbeam_channel::Receiver;
use regex::Regex;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, error, info, warn};

use crate::inference::{Synthesizer, SynthesizerLoader};
use crate::ipc::protocol::{RequestId, SynthesizerRequest, SynthesizerResponse};

fn sentence_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"[^.!?]+[.!?]+\s?|[^.!?]+$").ok())
        .as_ref()
}

/// Split into trimmed, non-empty sentences. Text without sentence structure
/// is returned whole.
pub fn split_sentences(text: &str) -> Vec<&str> {
    let sentences: Vec<&str> = sentence_pattern()
        .map(|re| {
            re.find_iter(text)
                .map(|m| m.as_str().trim())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default();

    if !sentences.is_empty() {
        return sentences;
    }
    let whole = text.trim();
    if whole.is_empty() {
        Vec::new()
    } else {
        vec![whole]
    }
}

/// Serve requests until `Destroy` or until the proxy hangs up.
pub fn run(
    requests: Receiver<SynthesizerRequest>,
    replies: UnboundedSender<SynthesizerResponse>,
    loader: Box<dyn SynthesizerLoader>,
) {
    let mut loader = Some(loader);
    let mut engine: Option<Box<dyn Synthesizer>> = None;

    for request in requests.iter() {
        let delivered = match request {
            SynthesizerRequest::Init { asset_path } => {
                let Some(loader) = loader.take() else {
                    warn!("synthesizer already initialised; ignoring init");
                    continue;
                };
                let reply = match loader.load(Path::new(&asset_path)) {
                    Ok(loaded) => {
                        let num_speakers = loaded.num_speakers();
                        info!(
                            asset_path = asset_path.as_str(),
                            num_speakers,
                            sample_rate = loaded.sample_rate(),
                            "synthesizer loaded"
                        );
                        engine = Some(loaded);
                        SynthesizerResponse::Ready { num_speakers }
                    }
                    Err(e) => {
                        error!("synthesizer load failed: {e}");
                        SynthesizerResponse::Error {
                            message: e.to_string(),
                        }
                    }
                };
                replies.send(reply).is_ok()
            }
            SynthesizerRequest::Speak {
                text,
                voice_id,
                speed,
                id,
            } => {
                let Some(tts) = engine.as_mut() else {
                    debug!(%id, "speak before init; dropped");
                    continue;
                };
                speak(&mut **tts, &replies, &text, voice_id, speed, id)
            }
            SynthesizerRequest::Destroy => break,
        };

        if !delivered {
            debug!("synthesis proxy gone");
            break;
        }
    }

    drop(engine);
    info!("synthesizer worker exiting");
}

/// Post one `Audio` per sentence, then `Done`. Returns `false` once the
/// proxy has hung up.
fn speak(
    engine: &mut dyn Synthesizer,
    replies: &UnboundedSender<SynthesizerResponse>,
    text: &str,
    voice_id: u32,
    speed: f32,
    id: RequestId,
) -> bool {
    for sentence in split_sentences(text) {
        let reply = match engine.generate(sentence, voice_id, speed) {
            Ok(audio) if audio.samples.is_empty() => continue,
            Ok(audio) => {
                debug!(%id, samples = audio.samples.len(), "sentence synthesized");
                SynthesizerResponse::Audio {
                    samples: audio.samples,
                    sample_rate: audio.sample_rate,
                    id,
                }
            }
            Err(e) => {
                warn!(%id, "sentence synthesis failed: {e}");
                SynthesizerResponse::Error {
                    message: e.to_string(),
                }
            }
        };
        if replies.send(reply).is_err() {
            return false;
        }
    }
    replies.send(SynthesizerResponse::Done { id }).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::stub::ToneSynthesizer;

    #[test]
    fn splits_on_sentence_punctuation() {
        assert_eq!(
            split_sentences("Hello there. How are you?  Fine"),
            vec!["Hello there.", "How are you?", "Fine"]
        );
        assert_eq!(split_sentences("Wait!!! What?"), vec!["Wait!!!", "What?"]);
    }

    #[test]
    fn text_without_sentences_is_kept_whole() {
        assert_eq!(split_sentences("..."), vec!["..."]);
        assert!(split_sentences("   ").is_empty());
    }

    fn collect_until_done(
        rx: &mut tokio::sync::mpsc::UnboundedReceiver<SynthesizerResponse>,
    ) -> Vec<SynthesizerResponse> {
        let mut out = Vec::new();
        while let Some(reply) = rx.blocking_recv() {
            let done = matches!(reply, SynthesizerResponse::Done { .. });
            out.push(reply);
            if done {
                break;
            }
        }
        out
    }

    #[test]
    fn one_chunk_per_sentence_then_done() {
        let (req_tx, req_rx) = crossbeam_channel::unbounded();
        let (resp_tx, mut resp_rx) = tokio::sync::mpsc::unbounded_channel();
        let handle = std::thread::spawn(move || run(req_rx, resp_tx, ToneSynthesizer::loader(4)));

        req_tx
            .send(SynthesizerRequest::Init {
                asset_path: "tts/".into(),
            })
            .unwrap();
        assert_eq!(
            resp_rx.blocking_recv(),
            Some(SynthesizerResponse::Ready { num_speakers: 4 })
        );

        req_tx
            .send(SynthesizerRequest::Speak {
                text: "One two. Three four five!".into(),
                voice_id: 1,
                speed: 1.0,
                id: RequestId(7),
            })
            .unwrap();
        let replies = collect_until_done(&mut resp_rx);

        assert_eq!(replies.len(), 3);
        for reply in &replies[..2] {
            match reply {
                SynthesizerResponse::Audio { id, sample_rate, .. } => {
                    assert_eq!(*id, RequestId(7));
                    assert_eq!(*sample_rate, 22_050);
                }
                other => panic!("expected audio, got {other:?}"),
            }
        }
        assert_eq!(replies[2], SynthesizerResponse::Done { id: RequestId(7) });

        req_tx.send(SynthesizerRequest::Destroy).unwrap();
        handle.join().unwrap();
    }

    #[test]
    fn failed_sentence_reports_error_and_still_completes() {
        let (req_tx, req_rx) = crossbeam_channel::unbounded();
        let (resp_tx, mut resp_rx) = tokio::sync::mpsc::unbounded_channel();
        let handle = std::thread::spawn(move || run(req_rx, resp_tx, ToneSynthesizer::loader(2)));

        req_tx
            .send(SynthesizerRequest::Init {
                asset_path: "tts/".into(),
            })
            .unwrap();
        assert!(matches!(
            resp_rx.blocking_recv(),
            Some(SynthesizerResponse::Ready { .. })
        ));

        // Voice 5 does not exist on a two-speaker engine.
        req_tx
            .send(SynthesizerRequest::Speak {
                text: "Hello.".into(),
                voice_id: 5,
                speed: 1.0,
                id: RequestId(1),
            })
            .unwrap();
        let replies = collect_until_done(&mut resp_rx);
        assert!(matches!(replies[0], SynthesizerResponse::Error { .. }));
        assert_eq!(replies[1], SynthesizerResponse::Done { id: RequestId(1) });

        drop(req_tx);
        handle.join().unwrap();
    }
}
