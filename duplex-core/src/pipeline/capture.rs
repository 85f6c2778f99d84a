//! Capture & batching pipeline.
//!
//! ## Lifecycle
//!
//! ```text
//! CapturePipeline::new()
//!     └─► initialize()   → capability check, recognizer handshake
//!         └─► start()    → device opened once, pump spawned, Listening
//!             └─► stop() → capture stage disconnected, Idle
//!                 └─► start() → reconnected, no new device open
//! destroy()              → pump joined, device released, recognizer freed
//! ```
//!
//! ## Threading
//!
//! The device callback only pushes into the frame ring. The `capture-pump`
//! thread drains it in 128-sample frames, batches, decimates and feeds the
//! recognizer; feeding never blocks. Recognizer results arrive on the proxy's
//! dispatch task and are turned into `partial` / `final` events there.

use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc, Weak,
};
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::audio::{
    resample::{decimate, RECOGNIZER_SAMPLE_RATE},
    CaptureConstraints, InputDevice, InputStream,
};
use crate::buffering::{
    batch::{AudioFrame, BatchAccumulator, FRAME_SAMPLES},
    create_frame_ring, Consumer, FrameConsumer, Observer,
};
use crate::error::{DuplexError, Result};
use crate::hub::{EventHub, SubscriptionId};
use crate::inference::RecognizerLoader;
use crate::ipc::events::{CaptureEvent, CaptureEventName, CaptureState};
use crate::proxy::{RecognitionProxy, RecognitionResult};

/// Pump sleep when less than one frame is buffered.
const PUMP_IDLE_SLEEP: Duration = Duration::from_millis(2);

/// Trim, lowercase, then capitalise the first character.
pub fn normalize_text(raw: &str) -> String {
    let lowered = raw.trim().to_lowercase();
    let mut chars = lowered.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

// ── Diagnostics ──────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct CaptureDiagnostics {
    frames_in: AtomicUsize,
    batches_fed: AtomicUsize,
    samples_fed: AtomicUsize,
    results: AtomicUsize,
    finals: AtomicUsize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureDiagnosticsSnapshot {
    pub frames_in: usize,
    pub batches_fed: usize,
    /// 16 kHz samples handed to the recognizer.
    pub samples_fed: usize,
    pub results: usize,
    pub finals: usize,
    /// Batches dropped because the recognizer was saturated.
    pub dropped_batches: u64,
}

// ── Pipeline ─────────────────────────────────────────────────────────────────

/// Everything acquired by the first successful `start()`.
struct CaptureGraph {
    stream: Box<dyn InputStream>,
    connected: Arc<AtomicBool>,
    pump_shutdown: Arc<AtomicBool>,
    pump: Option<JoinHandle<()>>,
}

impl CaptureGraph {
    /// Disconnect, join the pump and release the device.
    fn shutdown(mut self) {
        self.connected.store(false, Ordering::SeqCst);
        self.pump_shutdown.store(true, Ordering::Release);
        if let Some(pump) = self.pump.take() {
            if pump.join().is_err() {
                warn!("capture pump panicked");
            }
        }
        self.stream.close();
    }
}

struct CaptureInner {
    hub: EventHub<CaptureEvent>,
    state: Mutex<CaptureState>,
    input: Arc<dyn InputDevice>,
    constraints: CaptureConstraints,
    proxy: RecognitionProxy,
    graph: Mutex<Option<CaptureGraph>>,
    /// Serialises `start()` so the device is opened at most once.
    starting: tokio::sync::Mutex<()>,
    destroyed: AtomicBool,
    diagnostics: Arc<CaptureDiagnostics>,
}

/// Microphone → recognizer. Cheap to clone; clones share one pipeline.
#[derive(Clone)]
pub struct CapturePipeline {
    inner: Arc<CaptureInner>,
}

impl CapturePipeline {
    pub fn new(
        input: Arc<dyn InputDevice>,
        constraints: CaptureConstraints,
        asset_path: impl Into<String>,
        loader: Box<dyn RecognizerLoader>,
    ) -> Self {
        let asset_path = asset_path.into();
        let inner = Arc::new_cyclic(|weak: &Weak<CaptureInner>| {
            let weak = weak.clone();
            let proxy = RecognitionProxy::new(
                asset_path,
                loader,
                Arc::new(move |result: RecognitionResult| {
                    if let Some(inner) = weak.upgrade() {
                        inner.handle_result(result);
                    }
                }),
            );
            CaptureInner {
                hub: EventHub::new(),
                state: Mutex::new(CaptureState::Idle),
                input,
                constraints,
                proxy,
                graph: Mutex::new(None),
                starting: tokio::sync::Mutex::new(()),
                destroyed: AtomicBool::new(false),
                diagnostics: Arc::new(CaptureDiagnostics::default()),
            }
        });
        Self { inner }
    }

    /// Capability check, then the recognizer handshake.
    ///
    /// # Errors
    /// `Capability`, `Initialization` or `Destroyed`. Failures also move the
    /// pipeline to `Error` and publish an `Error` event.
    pub async fn initialize(&self) -> Result<()> {
        if self.is_destroyed() {
            return Err(DuplexError::Destroyed);
        }
        if let Err(e) = self.inner.input.check_support() {
            return Err(self.inner.fail(e));
        }
        match self.inner.proxy.initialize().await {
            Ok(()) => Ok(()),
            Err(e) => Err(self.inner.fail(e)),
        }
    }

    /// Start listening.
    ///
    /// The first call acquires the microphone and builds the capture graph;
    /// later calls only reconnect it, so the device is never reopened.
    ///
    /// # Errors
    /// `Capability`, `Permission`, device errors or `Destroyed`. Failures
    /// also move the pipeline to `Error` and publish an `Error` event.
    pub async fn start(&self) -> Result<()> {
        let inner = &self.inner;
        if self.is_destroyed() {
            return Err(DuplexError::Destroyed);
        }
        let _starting = inner.starting.lock().await;
        if self.is_destroyed() {
            return Err(DuplexError::Destroyed);
        }

        let reconnected = match inner.graph.lock().as_ref() {
            Some(graph) => {
                graph.connected.store(true, Ordering::SeqCst);
                true
            }
            None => false,
        };
        if reconnected {
            debug!("capture stage reconnected");
            inner.set_state(CaptureState::Listening);
            return Ok(());
        }

        if let Err(e) = inner.input.check_support() {
            return Err(inner.fail(e));
        }

        let (producer, consumer) = create_frame_ring();
        let connected = Arc::new(AtomicBool::new(false));

        // Device acquisition may block on a permission prompt or driver start.
        let input = Arc::clone(&inner.input);
        let constraints = inner.constraints.clone();
        let device_connected = Arc::clone(&connected);
        let opened = tokio::task::spawn_blocking(move || {
            input.open(&constraints, producer, device_connected)
        })
        .await
        .map_err(|e| DuplexError::AudioStream(format!("device open task failed: {e}")))
        .and_then(|opened| opened);

        let stream = match opened {
            Ok(stream) => stream,
            Err(e) => return Err(inner.fail(e)),
        };

        let sample_rate = stream.sample_rate();
        if sample_rate == 0 {
            stream.close();
            return Err(inner.fail(DuplexError::AudioStream(
                "input device reports a 0 Hz sample rate".into(),
            )));
        }
        let pump_shutdown = Arc::new(AtomicBool::new(false));
        let pump = {
            let proxy = inner.proxy.clone();
            let diagnostics = Arc::clone(&inner.diagnostics);
            let shutdown = Arc::clone(&pump_shutdown);
            std::thread::Builder::new()
                .name("capture-pump".into())
                .spawn(move || run_pump(consumer, sample_rate, proxy, diagnostics, shutdown))
        };
        let pump = match pump {
            Ok(handle) => handle,
            Err(e) => {
                stream.close();
                return Err(inner.fail(e.into()));
            }
        };

        let graph = CaptureGraph {
            stream,
            connected,
            pump_shutdown,
            pump: Some(pump),
        };
        {
            // `destroy()` flags before taking the graph; re-check under the lock.
            let mut slot = inner.graph.lock();
            if self.is_destroyed() {
                drop(slot);
                graph.shutdown();
                return Err(DuplexError::Destroyed);
            }
            graph.connected.store(true, Ordering::SeqCst);
            *slot = Some(graph);
        }

        info!(sample_rate, "capture started");
        inner.set_state(CaptureState::Listening);
        Ok(())
    }

    /// Disconnect the capture stage. The device, ring and pump stay alive
    /// for an instant restart.
    pub fn stop(&self) {
        if self.is_destroyed() {
            return;
        }
        if let Some(graph) = self.inner.graph.lock().as_ref() {
            graph.connected.store(false, Ordering::SeqCst);
        }
        debug!("capture stage disconnected");
        self.inner.set_state(CaptureState::Idle);
    }

    /// Release the microphone and the recognizer. Idempotent; never fails.
    pub fn destroy(&self) {
        let inner = &self.inner;
        if inner.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }

        let graph = inner.graph.lock().take();
        if let Some(graph) = graph {
            graph.shutdown();
        }

        inner.proxy.destroy();
        inner.set_state(CaptureState::Idle);
        info!("capture pipeline destroyed");
    }

    pub fn state(&self) -> CaptureState {
        *self.inner.state.lock()
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.load(Ordering::Acquire)
    }

    pub fn events(&self) -> &EventHub<CaptureEvent> {
        &self.inner.hub
    }

    pub fn subscribe<F>(&self, name: CaptureEventName, handler: F) -> SubscriptionId
    where
        F: Fn(&CaptureEvent) + Send + Sync + 'static,
    {
        self.inner.hub.subscribe(name, handler)
    }

    pub fn unsubscribe(&self, name: CaptureEventName, id: SubscriptionId) -> bool {
        self.inner.hub.unsubscribe(name, id)
    }

    pub fn proxy(&self) -> &RecognitionProxy {
        &self.inner.proxy
    }

    pub fn diagnostics(&self) -> CaptureDiagnosticsSnapshot {
        let d = &self.inner.diagnostics;
        CaptureDiagnosticsSnapshot {
            frames_in: d.frames_in.load(Ordering::Relaxed),
            batches_fed: d.batches_fed.load(Ordering::Relaxed),
            samples_fed: d.samples_fed.load(Ordering::Relaxed),
            results: d.results.load(Ordering::Relaxed),
            finals: d.finals.load(Ordering::Relaxed),
            dropped_batches: self.inner.proxy.dropped_batches(),
        }
    }
}

impl std::fmt::Debug for CapturePipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapturePipeline")
            .field("state", &self.state())
            .field("destroyed", &self.is_destroyed())
            .finish_non_exhaustive()
    }
}

impl CaptureInner {
    fn set_state(&self, next: CaptureState) {
        {
            let mut state = self.state.lock();
            if *state == next {
                return;
            }
            *state = next;
        }
        self.hub.publish(&CaptureEvent::StateChange(next));
    }

    /// Record an unrecoverable failure and hand the error back.
    fn fail(&self, err: DuplexError) -> DuplexError {
        error!("capture failure: {err}");
        self.set_state(CaptureState::Error);
        self.hub.publish(&CaptureEvent::Error(err.report()));
        err
    }

    fn handle_result(&self, result: RecognitionResult) {
        self.diagnostics.results.fetch_add(1, Ordering::Relaxed);
        let text = normalize_text(&result.text);

        self.hub.publish(&CaptureEvent::Partial(text.clone()));
        if !result.is_endpoint {
            return;
        }

        if !text.is_empty() {
            self.diagnostics.finals.fetch_add(1, Ordering::Relaxed);
            info!(chars = text.len(), "utterance finalised");
            self.hub.publish(&CaptureEvent::Final(text));
        }
        self.hub.publish(&CaptureEvent::Partial(String::new()));
    }
}

/// Drain the ring until shut down. Runs on the `capture-pump` thread.
fn run_pump(
    mut consumer: FrameConsumer,
    sample_rate: u32,
    proxy: RecognitionProxy,
    diagnostics: Arc<CaptureDiagnostics>,
    shutdown: Arc<AtomicBool>,
) {
    info!(sample_rate, "capture pump started");
    let mut accumulator = BatchAccumulator::new(sample_rate);
    let mut frame = vec![0f32; FRAME_SAMPLES];

    while !shutdown.load(Ordering::Acquire) {
        if consumer.occupied_len() < FRAME_SAMPLES {
            std::thread::sleep(PUMP_IDLE_SLEEP);
            continue;
        }

        let n = consumer.pop_slice(&mut frame);
        diagnostics.frames_in.fetch_add(1, Ordering::Relaxed);

        let Some(batch) = accumulator.push(AudioFrame::new(frame[..n].to_vec())) else {
            continue;
        };
        let pcm = decimate(batch.samples, batch.sample_rate, RECOGNIZER_SAMPLE_RATE);
        diagnostics.batches_fed.fetch_add(1, Ordering::Relaxed);
        diagnostics.samples_fed.fetch_add(pcm.len(), Ordering::Relaxed);
        debug!(samples = pcm.len(), "batch fed to recognizer");
        proxy.feed(pcm);
    }
    info!("capture pump stopped");
}
