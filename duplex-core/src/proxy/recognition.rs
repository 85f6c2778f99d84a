//! `RecognitionProxy`: handle to the recognizer worker.

use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};
use std::thread::JoinHandle;

use crossbeam_channel::{Sender, TrySendError};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::error::{DuplexError, Result};
use crate::inference::RecognizerLoader;
use crate::ipc::protocol::{RecognizerRequest, RecognizerResponse};
use crate::worker;

use super::HandshakeCell;

/// Batches the worker may have queued before new ones are dropped
/// (≈ 5.5 s of capture at 48 kHz).
pub const FEED_QUEUE_CAPACITY: usize = 64;

/// One recognizer update for the current utterance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecognitionResult {
    pub text: String,
    pub is_endpoint: bool,
}

pub type ResultHandler = Arc<dyn Fn(RecognitionResult) + Send + Sync>;

/// State shared with the dispatch task.
struct Shared {
    on_result: ResultHandler,
    destroyed: AtomicBool,
    dropped_batches: AtomicU64,
    runtime_errors: AtomicU64,
}

struct Link {
    requests: Sender<RecognizerRequest>,
    _thread: JoinHandle<()>,
}

struct Inner {
    asset_path: String,
    loader: Mutex<Option<Box<dyn RecognizerLoader>>>,
    handshake: Arc<HandshakeCell>,
    link: Mutex<Option<Link>>,
    ready: AtomicBool,
    shared: Arc<Shared>,
}

/// Cheap to clone; all clones drive the same worker.
#[derive(Clone)]
pub struct RecognitionProxy {
    inner: Arc<Inner>,
}

impl RecognitionProxy {
    pub fn new(
        asset_path: impl Into<String>,
        loader: Box<dyn RecognizerLoader>,
        on_result: ResultHandler,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                asset_path: asset_path.into(),
                loader: Mutex::new(Some(loader)),
                handshake: HandshakeCell::new(),
                link: Mutex::new(None),
                ready: AtomicBool::new(false),
                shared: Arc::new(Shared {
                    on_result,
                    destroyed: AtomicBool::new(false),
                    dropped_batches: AtomicU64::new(0),
                    runtime_errors: AtomicU64::new(0),
                }),
            }),
        }
    }

    /// Spawn the worker and complete the `Init` handshake.
    ///
    /// # Errors
    /// - `DuplexError::Initialization` if the engine failed to load or the
    ///   worker died first. Later calls return the same error.
    /// - `DuplexError::Destroyed` after `destroy()`.
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
            return Err("recognizer loader already consumed".into());
        };

        let (req_tx, req_rx) = crossbeam_channel::bounded(FEED_QUEUE_CAPACITY);
        let (resp_tx, mut resp_rx) = mpsc::unbounded_channel();
        let thread = worker::spawn("recognizer-worker", move || {
            worker::recognizer::run(req_rx, resp_tx, loader)
        })
        .map_err(|e| e.to_string())?;

        req_tx
            .try_send(RecognizerRequest::Init {
                asset_path: self.inner.asset_path.clone(),
            })
            .map_err(|_| "recognizer worker unreachable".to_string())?;

        *self.inner.link.lock() = Some(Link {
            requests: req_tx,
            _thread: thread,
        });

        match worker::await_handshake(&mut resp_rx).await {
            Ok(_) => {
                if self.is_destroyed() {
                    if let Some(link) = self.inner.link.lock().take() {
                        let _ = link.requests.try_send(RecognizerRequest::Destroy);
                    }
                    return Err(DuplexError::Destroyed.to_string());
                }
                self.inner.ready.store(true, Ordering::Release);
                tokio::spawn(dispatch(resp_rx, Arc::clone(&self.inner.shared)));
                info!(asset_path = self.inner.asset_path.as_str(), "recognizer ready");
                Ok(())
            }
            Err(message) => {
                error!("recognizer initialization failed: {message}");
                if let Some(link) = self.inner.link.lock().take() {
                    let _ = link.requests.try_send(RecognizerRequest::Destroy);
                }
                Err(message)
            }
        }
    }

    /// Hand 16 kHz PCM to the worker. Never blocks: when the worker is
    /// saturated the batch is dropped and counted.
    ///
    /// A no-op before a successful `initialize()` and after `destroy()`.
    pub fn feed(&self, samples: Vec<f32>) {
        if !self.is_ready() {
            return;
        }
        let link = self.inner.link.lock();
        let Some(link) = link.as_ref() else {
            return;
        };
        match link.requests.try_send(RecognizerRequest::Feed { samples }) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                let total = self.inner.shared.dropped_batches.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(dropped_total = total, "recognizer saturated; batch dropped");
            }
            Err(TrySendError::Disconnected(_)) => debug!("recognizer worker gone; batch dropped"),
        }
    }

    /// Shut the worker down. Idempotent; never fails.
    pub fn destroy(&self) {
        if self.inner.shared.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.ready.store(false, Ordering::Release);
        if let Some(link) = self.inner.link.lock().take() {
            // A full queue still disconnects when the sender drops below.
            let _ = link.requests.try_send(RecognizerRequest::Destroy);
        }
        info!("recognition proxy destroyed");
    }

    pub fn is_ready(&self) -> bool {
        self.inner.ready.load(Ordering::Acquire)
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.shared.destroyed.load(Ordering::Acquire)
    }

    /// Batches dropped because the worker queue was full.
    pub fn dropped_batches(&self) -> u64 {
        self.inner.shared.dropped_batches.load(Ordering::Relaxed)
    }

    /// Engine errors reported after initialization.
    pub fn runtime_errors(&self) -> u64 {
        self.inner.shared.runtime_errors.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for RecognitionProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecognitionProxy")
            .field("asset_path", &self.inner.asset_path)
            .field("ready", &self.is_ready())
            .field("destroyed", &self.is_destroyed())
            .finish_non_exhaustive()
    }
}

async fn dispatch(mut replies: mpsc::UnboundedReceiver<RecognizerResponse>, shared: Arc<Shared>) {
    while let Some(reply) = replies.recv().await {
        if shared.destroyed.load(Ordering::Acquire) {
            break;
        }
        match reply {
            RecognizerResponse::Result { text, is_endpoint } => {
                (shared.on_result)(RecognitionResult { text, is_endpoint });
            }
            RecognizerResponse::Error { message } => {
                shared.runtime_errors.fetch_add(1, Ordering::Relaxed);
                warn!("recognizer runtime error: {message}");
            }
            RecognizerResponse::Ready => debug!("unexpected ready from recognizer"),
        }
    }
    debug!("recognition dispatch finished");
}
