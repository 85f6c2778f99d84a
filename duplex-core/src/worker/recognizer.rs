//! Recognizer worker loop.

use std::path::Path;

use crossbeam_channel::Receiver;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, error, info, warn};

use crate::audio::resample::RECOGNIZER_SAMPLE_RATE;
use crate::error::Result;
use crate::inference::{OnlineRecognizer, RecognizerLoader};
use crate::ipc::protocol::{RecognizerRequest, RecognizerResponse};

/// Serve requests until `Destroy` or until the proxy hangs up.
pub fn run(
    requests: Receiver<RecognizerRequest>,
    replies: UnboundedSender<RecognizerResponse>,
    loader: Box<dyn RecognizerLoader>,
) {
    let mut loader = Some(loader);
    let mut engine: Option<Box<dyn OnlineRecognizer>> = None;

    for request in requests.iter() {
        let reply = match request {
            RecognizerRequest::Init { asset_path } => {
                let Some(loader) = loader.take() else {
                    warn!("recognizer already initialised; ignoring init");
                    continue;
                };
                match loader.load(Path::new(&asset_path)) {
                    Ok(loaded) => {
                        info!(asset_path = asset_path.as_str(), "recognizer loaded");
                        engine = Some(loaded);
                        RecognizerResponse::Ready
                    }
                    Err(e) => {
                        error!("recognizer load failed: {e}");
                        RecognizerResponse::Error {
                            message: e.to_string(),
                        }
                    }
                }
            }
            RecognizerRequest::Feed { samples } => {
                let Some(rec) = engine.as_mut() else {
                    debug!("feed before init; dropped");
                    continue;
                };
                match recognize(&mut **rec, &samples) {
                    Ok(reply) => reply,
                    Err(e) => RecognizerResponse::Error {
                        message: e.to_string(),
                    },
                }
            }
            RecognizerRequest::Destroy => break,
        };

        if replies.send(reply).is_err() {
            debug!("recognition proxy gone");
            break;
        }
    }

    drop(engine);
    info!("recognizer worker exiting");
}

/// Decode one batch. An endpoint resets the engine for the next utterance.
fn recognize(engine: &mut dyn OnlineRecognizer, samples: &[f32]) -> Result<RecognizerResponse> {
    engine.accept_waveform(RECOGNIZER_SAMPLE_RATE, samples)?;
    while engine.is_ready() {
        engine.decode()?;
    }

    let text = engine.result();
    let is_endpoint = engine.is_endpoint();
    if is_endpoint {
        engine.reset();
    }

    Ok(RecognizerResponse::Result { text, is_endpoint })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DuplexError;
    use crate::inference::stub::StubRecognizer;

    fn spawn_worker(
        loader: Box<dyn RecognizerLoader>,
    ) -> (
        crossbeam_channel::Sender<RecognizerRequest>,
        tokio::sync::mpsc::UnboundedReceiver<RecognizerResponse>,
        std::thread::JoinHandle<()>,
    ) {
        let (req_tx, req_rx) = crossbeam_channel::unbounded();
        let (resp_tx, resp_rx) = tokio::sync::mpsc::unbounded_channel();
        let handle = std::thread::spawn(move || run(req_rx, resp_tx, loader));
        (req_tx, resp_rx, handle)
    }

    fn init() -> RecognizerRequest {
        RecognizerRequest::Init {
            asset_path: "asr/".into(),
        }
    }

    #[test]
    fn endpoint_result_resets_engine() {
        let (tx, mut rx, handle) = spawn_worker(StubRecognizer::loader(3_200));
        tx.send(init()).unwrap();
        assert_eq!(rx.blocking_recv(), Some(RecognizerResponse::Ready));

        for _ in 0..2 {
            tx.send(RecognizerRequest::Feed {
                samples: vec![0.0; 1_600],
            })
            .unwrap();
        }
        assert_eq!(
            rx.blocking_recv(),
            Some(RecognizerResponse::Result {
                text: "stub utterance 1".into(),
                is_endpoint: false
            })
        );
        assert_eq!(
            rx.blocking_recv(),
            Some(RecognizerResponse::Result {
                text: "stub utterance 1".into(),
                is_endpoint: true
            })
        );

        tx.send(RecognizerRequest::Feed {
            samples: vec![0.0; 1_600],
        })
        .unwrap();
        assert_eq!(
            rx.blocking_recv(),
            Some(RecognizerResponse::Result {
                text: "stub utterance 2".into(),
                is_endpoint: false
            })
        );

        tx.send(RecognizerRequest::Destroy).unwrap();
        handle.join().unwrap();
        assert_eq!(rx.blocking_recv(), None);
    }

    #[test]
    fn load_failure_is_reported_and_second_init_ignored() {
        let loader = Box::new(|_: &Path| -> Result<Box<dyn OnlineRecognizer>> {
            Err(DuplexError::Initialization("model.onnx missing".into()))
        });
        let (tx, mut rx, handle) = spawn_worker(loader);

        tx.send(init()).unwrap();
        match rx.blocking_recv() {
            Some(RecognizerResponse::Error { message }) => {
                assert!(message.contains("model.onnx missing"))
            }
            other => panic!("unexpected reply: {other:?}"),
        }

        tx.send(init()).unwrap();
        tx.send(RecognizerRequest::Feed {
            samples: vec![0.0; 16],
        })
        .unwrap();
        drop(tx);
        handle.join().unwrap();
        assert_eq!(rx.blocking_recv(), None);
    }
}
