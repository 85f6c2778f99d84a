//! `SynthesisProxy`: handle to the synthesizer worker.
//!
//! Every speak request is tagged with the caller's `RequestId`; the worker
//! answers with zero or more `Audio` chunks and one `Done`, all carrying
//! the same id. The proxy does no filtering: deciding which ids are stale is
//! the caller's business.

use std::sync::{
    atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering},
    Arc,
};
use std::thread::JoinHandle;

use crossbeam_channel::Sender;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::error::{DuplexError, Result};
use crate::inference::SynthesizerLoader;
use crate::ipc::protocol::{RequestId, SynthesizerRequest, SynthesizerResponse};
use crate::worker;

use super::HandshakeCell;

/// Synthesized audio for one request.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioChunk {
    pub id: RequestId,
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

/// What the worker produced for a request.
#[derive(Debug, Clone, PartialEq)]
pub enum SynthesisOutput {
    Audio(AudioChunk),
    /// Every chunk for this id has been delivered.
    Done(RequestId),
}

pub type OutputHandler = Arc<dyn Fn(SynthesisOutput) + Send + Sync>;

struct Shared {
    on_output: OutputHandler,
    destroyed: AtomicBool,
    runtime_errors: AtomicU64,
}

struct Link {
    requests: Sender<SynthesizerRequest>,
    _thread: JoinHandle<()>,
}

struct Inner {
    asset_path: String,
    loader: Mutex<Option<Box<dyn SynthesizerLoader>>>,
    handshake: Arc<HandshakeCell>,
    link: Mutex<Option<Link>>,
    ready: AtomicBool,
    num_speakers: AtomicU32,
    shared: Arc<Shared>,
}

#[derive(Clone)]
pub struct SynthesisProxy {
    inner: Arc<Inner>,
}

impl SynthesisProxy {
    pub fn new(
        asset_path: impl Into<String>,
        loader: Box<dyn SynthesizerLoader>,
        on_output: OutputHandler,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                asset_path: asset_path.into(),
                loader: Mutex::new(Some(loader)),
                handshake: HandshakeCell::new(),
                link: Mutex::new(None),
                ready: AtomicBool::new(false),
                num_speakers: AtomicU32::new(0),
                shared: Arc::new(Shared {
                    on_output,
                    destroyed: AtomicBool::new(false),
                    runtime_errors: AtomicU64::new(0),
                }),
            }),
        }
    }

    /// Spawn the worker and complete the `Init` handshake.
    ///
    /// # Errors
    /// Same contract as `RecognitionProxy::initialize`.
    pub async fn initialize(&self) -> Result<()> {
        if self.is_destroyed() {
            return Err(DuplexError::Destroyed);
        }
        let proxy = self.clone();
        self.inner
            .handshake
            .run(move || async move { proxy.handshake().await })
            .await
    }

    async fn handshake(&self) -> std::result::Result<(), String> {
        let Some(loader) = self.inner.loader.lock().take() else {
            return Err("synthesizer loader already consumed".into());
        };

        let (req_tx, req_rx) = crossbeam_channel::unbounded();
        let (resp_tx, mut resp_rx) = mpsc::unbounded_channel();
        let thread = worker::spawn("synthesizer-worker", move || {
            worker::synthesizer::run(req_rx, resp_tx, loader)
        })
        .map_err(|e| e.to_string())?;

        req_tx
            .send(SynthesizerRequest::Init {
                asset_path: self.inner.asset_path.clone(),
            })
            .map_err(|_| "synthesizer worker unreachable".to_string())?;

        *self.inner.link.lock() = Some(Link {
            requests: req_tx,
            _thread: thread,
        });

        match worker::await_handshake(&mut resp_rx).await {
            Ok(SynthesizerResponse::Ready { num_speakers }) => {
                if self.is_destroyed() {
                    if let Some(link) = self.inner.link.lock().take() {
                        let _ = link.requests.send(SynthesizerRequest::Destroy);
                    }
                    return Err(DuplexError::Destroyed.to_string());
                }
                self.inner.num_speakers.store(num_speakers, Ordering::Release);
                self.inner.ready.store(true, Ordering::Release);
                tokio::spawn(dispatch(resp_rx, Arc::clone(&self.inner.shared)));
                info!(
                    asset_path = self.inner.asset_path.as_str(),
                    num_speakers, "synthesizer ready"
                );
                Ok(())
            }
            Ok(other) => Err(format!("unexpected handshake reply: {other:?}")),
            Err(message) => {
                error!("synthesizer initialization failed: {message}");
                if let Some(link) = self.inner.link.lock().take() {
                    let _ = link.requests.send(SynthesizerRequest::Destroy);
                }
                Err(message)
            }
        }
    }

    /// Queue a request. Output arrives through the handler, tagged with `id`.
    ///
    /// A no-op before a successful `initialize()` and after `destroy()`.
    pub fn speak(&self, text: &str, voice_id: u32, speed: f32, id: RequestId) {
        if !self.is_ready() {
            debug!(%id, "synthesizer not ready; speak dropped");
            return;
        }
        let link = self.inner.link.lock();
        let Some(link) = link.as_ref() else {
            return;
        };
        let request = SynthesizerRequest::Speak {
            text: text.to_string(),
            voice_id,
            speed,
            id,
        };
        if link.requests.send(request).is_err() {
            warn!(%id, "synthesizer worker gone; speak dropped");
        }
    }

    /// Shut the worker down. Idempotent; never fails.
    pub fn destroy(&self) {
        if self.inner.shared.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.ready.store(false, Ordering::Release);
        if let Some(link) = self.inner.link.lock().take() {
            let _ = link.requests.send(SynthesizerRequest::Destroy);
        }
        info!("synthesis proxy destroyed");
    }

    pub fn is_ready(&self) -> bool {
        self.inner.ready.load(Ordering::Acquire)
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.shared.destroyed.load(Ordering::Acquire)
    }

    /// Speaker count reported by the engine; 0 before initialization.
    pub fn num_speakers(&self) -> u32 {
        self.inner.num_speakers.load(Ordering::Acquire)
    }

    pub fn runtime_errors(&self) -> u64 {
        self.inner.shared.runtime_errors.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for SynthesisProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SynthesisProxy")
            .field("asset_path", &self.inner.asset_path)
            .field("ready", &self.is_ready())
            .field("num_speakers", &self.num_speakers())
            .finish_non_exhaustive()
    }
}

async fn dispatch(mut replies: mpsc::UnboundedReceiver<SynthesizerResponse>, shared: Arc<Shared>) {
    while let Some(reply) = replies.recv().await {
        if shared.destroyed.load(Ordering::Acquire) {
            break;
        }
        match reply {
            SynthesizerResponse::Audio {
                samples,
                sample_rate,
                id,
            } => (shared.on_output)(SynthesisOutput::Audio(AudioChunk {
                id,
                samples,
                sample_rate,
            })),
            SynthesizerResponse::Done { id } => (shared.on_output)(SynthesisOutput::Done(id)),
            SynthesizerResponse::Error { message } => {
                shared.runtime_errors.fetch_add(1, Ordering::Relaxed);
                warn!("synthesizer runtime error: {message}");
            }
            SynthesizerResponse::Ready { .. } => debug!("unexpected ready from synthesizer"),
        }
    }
    debug!("synthesis dispatch finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::stub::ToneSynthesizer;
    use crate::inference::Synthesizer;
    use std::path::Path;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn collecting_proxy(num_speakers: u32) -> (SynthesisProxy, Arc<Mutex<Vec<SynthesisOutput>>>) {
        proxy_with(ToneSynthesizer::loader(num_speakers))
    }

    fn proxy_with(
        loader: Box<dyn SynthesizerLoader>,
    ) -> (SynthesisProxy, Arc<Mutex<Vec<SynthesisOutput>>>) {
        let outputs = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&outputs);
        let proxy = SynthesisProxy::new(
            "tts/",
            loader,
            Arc::new(move |o: SynthesisOutput| sink.lock().push(o)),
        );
        (proxy, outputs)
    }

    async fn wait_for_done(outputs: &Mutex<Vec<SynthesisOutput>>, id: RequestId) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !outputs.lock().contains(&SynthesisOutput::Done(id)) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("timed out waiting for done");
    }

    #[tokio::test]
    async fn ready_records_speaker_count() {
        let (proxy, _) = collecting_proxy(12);
        assert_eq!(proxy.num_speakers(), 0);
        proxy.initialize().await.unwrap();
        proxy.initialize().await.unwrap();
        assert_eq!(proxy.num_speakers(), 12);
        proxy.destroy();
    }

    #[tokio::test]
    async fn initialize_is_idempotent_and_caches_failure() {
        let loads = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&loads);
        let loader = Box::new(move |_: &Path| -> Result<Box<dyn Synthesizer>> {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(DuplexError::Initialization("voice model missing".into()))
        });
        let (proxy, _) = proxy_with(loader);

        let (a, b) = tokio::join!(proxy.initialize(), proxy.initialize());
        assert!(matches!(a, Err(DuplexError::Initialization(ref m)) if m.contains("voice model missing")));
        assert!(matches!(b, Err(DuplexError::Initialization(_))));
        assert!(matches!(
            proxy.initialize().await,
            Err(DuplexError::Initialization(_))
        ));
        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert!(!proxy.is_ready());
        assert_eq!(proxy.num_speakers(), 0);
    }

    #[tokio::test]
    async fn cancelled_initialize_does_not_strand_the_loader() {
        let (proxy, _) = collecting_proxy(3);
        let cancelled = tokio::select! {
            biased;
            _ = proxy.initialize() => false,
            _ = std::future::ready(()) => true,
        };
        assert!(cancelled);

        proxy.initialize().await.unwrap();
        assert_eq!(proxy.num_speakers(), 3);
        proxy.destroy();
    }

    #[tokio::test]
    async fn chunks_and_done_carry_the_request_id() {
        let (proxy, outputs) = collecting_proxy(2);
        proxy.initialize().await.unwrap();

        proxy.speak("First part. Second part.", 0, 1.0, RequestId(3));
        wait_for_done(&outputs, RequestId(3)).await;

        let got = outputs.lock().clone();
        assert_eq!(got.len(), 3);
        for output in &got[..2] {
            assert!(matches!(output, SynthesisOutput::Audio(chunk) if chunk.id == RequestId(3)));
        }
        proxy.destroy();
    }

    #[tokio::test]
    async fn speak_before_initialize_is_dropped() {
        let (proxy, outputs) = collecting_proxy(2);
        proxy.speak("Hello.", 0, 1.0, RequestId(1));
        proxy.initialize().await.unwrap();
        proxy.speak("Hello.", 0, 1.0, RequestId(2));
        wait_for_done(&outputs, RequestId(2)).await;
        assert!(!outputs.lock().contains(&SynthesisOutput::Done(RequestId(1))));
        proxy.destroy();
    }
}
