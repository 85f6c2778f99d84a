//! Fakes for unit tests: scriptable audio devices and a synthesizer that
//! holds every request until released.

use std::path::Path;
use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
};

use parking_lot::Mutex;

use crate::audio::{
    CaptureConstraints, EndedCallback, InputDevice, InputStream, OutputContext, OutputDevice,
    PlaybackBuffer,
};
use crate::buffering::{FrameProducer, Producer};
use crate::error::{DuplexError, PermissionError, Result};
use crate::inference::{SynthesizedAudio, Synthesizer, SynthesizerLoader};

// ---------------------------------------------------------------------------
// Input
// ---------------------------------------------------------------------------

pub(crate) struct FakeInput {
    sample_rate: u32,
    opens: AtomicUsize,
    closes: Arc<AtomicUsize>,
    fail_with: Option<PermissionError>,
    unsupported: bool,
    link: Mutex<Option<(FrameProducer, Arc<AtomicBool>)>>,
    on_open: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl FakeInput {
    pub fn new(sample_rate: u32) -> Arc<Self> {
        Arc::new(Self::plain(sample_rate))
    }

    pub fn failing(err: PermissionError) -> Arc<Self> {
        Arc::new(Self {
            fail_with: Some(err),
            ..Self::plain(48_000)
        })
    }

    pub fn unsupported() -> Arc<Self> {
        Arc::new(Self {
            unsupported: true,
            ..Self::plain(48_000)
        })
    }

    fn plain(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            opens: AtomicUsize::new(0),
            closes: Arc::new(AtomicUsize::new(0)),
            fail_with: None,
            unsupported: false,
            link: Mutex::new(None),
            on_open: Mutex::new(None),
        }
    }

    /// Run `hook` on the next `open()`, after the stream exists.
    pub fn on_open(&self, hook: impl FnOnce() + Send + 'static) {
        *self.on_open.lock() = Some(Box::new(hook));
    }

    /// Deliver samples as the device callback would. Returns how many were
    /// accepted; 0 while disconnected.
    pub fn push(&self, samples: &[f32]) -> usize {
        let mut link = self.link.lock();
        match link.as_mut() {
            Some((producer, connected)) if connected.load(Ordering::SeqCst) => {
                producer.push_slice(samples)
            }
            _ => 0,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.link
            .lock()
            .as_ref()
            .map(|(_, connected)| connected.load(Ordering::SeqCst))
            .unwrap_or(false)
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

impl InputDevice for FakeInput {
    fn check_support(&self) -> Result<()> {
        if self.unsupported {
            return Err(DuplexError::Capability("no audio input backend".into()));
        }
        Ok(())
    }

    fn open(
        &self,
        _constraints: &CaptureConstraints,
        producer: FrameProducer,
        connected: Arc<AtomicBool>,
    ) -> Result<Box<dyn InputStream>> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = &self.fail_with {
            return Err(err.clone().into());
        }
        *self.link.lock() = Some((producer, connected));
        let hook = self.on_open.lock().take();
        if let Some(hook) = hook {
            hook();
        }
        Ok(Box::new(FakeStream {
            sample_rate: self.sample_rate,
            closes: Arc::clone(&self.closes),
        }))
    }
}

struct FakeStream {
    sample_rate: u32,
    closes: Arc<AtomicUsize>,
}

impl InputStream for FakeStream {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn close(self: Box<Self>) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

#[derive(Default)]
pub(crate) struct FakeOutputState {
    pub played: Vec<PlaybackBuffer>,
    pub pending: Option<EndedCallback>,
    pub stops: usize,
    pub resumes: usize,
    pub closed: bool,
}

pub(crate) struct FakeOutput {
    sample_rate: u32,
    contexts: AtomicUsize,
    fail: bool,
    state: Arc<Mutex<FakeOutputState>>,
}

impl FakeOutput {
    pub fn new(sample_rate: u32) -> Arc<Self> {
        Arc::new(Self {
            sample_rate,
            contexts: AtomicUsize::new(0),
            fail: false,
            state: Arc::new(Mutex::new(FakeOutputState::default())),
        })
    }

    pub fn broken() -> Arc<Self> {
        Arc::new(Self {
            sample_rate: 48_000,
            contexts: AtomicUsize::new(0),
            fail: true,
            state: Arc::new(Mutex::new(FakeOutputState::default())),
        })
    }

    /// Let the active buffer run out. Returns `false` if nothing was playing.
    pub fn finish_current(&self) -> bool {
        let callback = self.state.lock().pending.take();
        match callback {
            Some(on_ended) => {
                on_ended();
                true
            }
            None => false,
        }
    }

    pub fn contexts_created(&self) -> usize {
        self.contexts.load(Ordering::SeqCst)
    }

    pub fn played(&self) -> usize {
        self.state.lock().played.len()
    }

    pub fn with_state<R>(&self, f: impl FnOnce(&FakeOutputState) -> R) -> R {
        f(&self.state.lock())
    }
}

impl OutputDevice for FakeOutput {
    fn create_context(&self) -> Result<Box<dyn OutputContext>> {
        if self.fail {
            return Err(DuplexError::NoOutputDevice);
        }
        self.contexts.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeContext {
            sample_rate: self.sample_rate,
            suspended: true,
            state: Arc::clone(&self.state),
        }))
    }
}

struct FakeContext {
    sample_rate: u32,
    suspended: bool,
    state: Arc<Mutex<FakeOutputState>>,
}

impl OutputContext for FakeContext {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn is_suspended(&self) -> bool {
        self.suspended
    }

    fn resume(&mut self) -> Result<()> {
        self.suspended = false;
        self.state.lock().resumes += 1;
        Ok(())
    }

    fn play(&mut self, buffer: PlaybackBuffer, on_ended: EndedCallback) -> Result<()> {
        let mut state = self.state.lock();
        state.played.push(buffer);
        state.pending = Some(on_ended);
        Ok(())
    }

    fn stop(&mut self) {
        let mut state = self.state.lock();
        state.pending = None;
        state.stops += 1;
    }

    fn close(self: Box<Self>) {
        self.state.lock().closed = true;
    }
}

// ---------------------------------------------------------------------------
// Engines
// ---------------------------------------------------------------------------

/// A synthesizer whose `generate` blocks until the returned sender is
/// dropped, so tests can inject synthesis output by hand.
pub(crate) fn held_synthesizer() -> (Box<dyn SynthesizerLoader>, crossbeam_channel::Sender<()>) {
    let (hold_tx, hold_rx) = crossbeam_channel::bounded::<()>(0);
    let loader = Box::new(move |_: &Path| -> Result<Box<dyn Synthesizer>> {
        Ok(Box::new(HeldSynthesizer(hold_rx)))
    });
    (loader, hold_tx)
}

struct HeldSynthesizer(crossbeam_channel::Receiver<()>);

impl Synthesizer for HeldSynthesizer {
    fn num_speakers(&self) -> u32 {
        1
    }

    fn sample_rate(&self) -> u32 {
        22_050
    }

    fn generate(&mut self, _text: &str, _voice_id: u32, _speed: f32) -> Result<SynthesizedAudio> {
        let _ = self.0.recv();
        Err(DuplexError::Runtime("released".into()))
    }
}
