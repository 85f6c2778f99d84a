//! `SpeechClient`: one object that listens and speaks.
//!
//! Composes a `CapturePipeline` and a `PlaybackPipeline`, merges their
//! events into a single `ClientEvent` stream and tracks aggregate readiness.
//!
//! Status goes `Loading → Ready` once both engines are up, or
//! `Loading → Error` if either fails. `Error` is terminal.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use parking_lot::Mutex;
use tracing::{error, info};

use crate::audio::{InputDevice, OutputDevice};
use crate::config::{normalize_speed, ClientConfig};
use crate::error::{DuplexError, Result};
use crate::hub::{EventHub, SubscriptionId};
use crate::inference::{RecognizerLoader, SynthesizerLoader};
use crate::ipc::events::{
    CaptureEvent, CaptureEventName, CaptureState, ClientEvent, ClientEventName, ClientStatus,
    PlaybackEvent, PlaybackEventName, PlaybackState,
};
use crate::ipc::protocol::RequestId;
use crate::pipeline::{CapturePipeline, PlaybackPipeline};

/// Engines and devices the client runs on.
pub struct ClientBackends {
    pub recognizer: Box<dyn RecognizerLoader>,
    pub synthesizer: Box<dyn SynthesizerLoader>,
    pub input: Arc<dyn InputDevice>,
    pub output: Arc<dyn OutputDevice>,
}

impl ClientBackends {
    /// The given engines on the system microphone and speaker.
    #[cfg(feature = "audio-cpal")]
    pub fn with_system_audio(
        recognizer: Box<dyn RecognizerLoader>,
        synthesizer: Box<dyn SynthesizerLoader>,
    ) -> Self {
        Self {
            recognizer,
            synthesizer,
            input: Arc::new(crate::audio::CpalInput),
            output: Arc::new(crate::audio::CpalOutput::new()),
        }
    }
}

struct ClientInner {
    config: ClientConfig,
    hub: Arc<EventHub<ClientEvent>>,
    status: Mutex<ClientStatus>,
    capture: CapturePipeline,
    playback: PlaybackPipeline,
    destroyed: AtomicBool,
}

/// Cheap to clone; clones share one client.
#[derive(Clone)]
pub struct SpeechClient {
    inner: Arc<ClientInner>,
}

impl SpeechClient {
    pub fn new(mut config: ClientConfig, backends: ClientBackends) -> Self {
        config.normalize();

        let capture = CapturePipeline::new(
            backends.input,
            config.capture_constraints(),
            config.stt_asset_dir().to_string_lossy(),
            backends.recognizer,
        );
        let playback = PlaybackPipeline::new(
            backends.output,
            config.tts_asset_dir().to_string_lossy(),
            backends.synthesizer,
        );

        let hub = Arc::new(EventHub::new());
        forward_capture(&capture, &hub);
        forward_playback(&playback, &hub);

        Self {
            inner: Arc::new(ClientInner {
                config,
                hub,
                status: Mutex::new(ClientStatus::Loading),
                capture,
                playback,
                destroyed: AtomicBool::new(false),
            }),
        }
    }

    /// Load both engines concurrently.
    ///
    /// Both must come up for the client to become `Ready`. A failure on
    /// either side moves the client to `Error` for good; the pipeline that
    /// failed has already published its `Error` event.
    ///
    /// # Errors
    /// The first pipeline failure, or `Destroyed`.
    pub async fn initialize(&self) -> Result<()> {
        if self.is_destroyed() {
            return Err(DuplexError::Destroyed);
        }
        let inner = &self.inner;
        match tokio::try_join!(inner.capture.initialize(), inner.playback.initialize()) {
            Ok(((), ())) => {
                inner.set_status(ClientStatus::Ready);
                info!(
                    num_speakers = inner.playback.proxy().num_speakers(),
                    "speech client ready"
                );
                Ok(())
            }
            Err(e) => {
                error!("speech client initialization failed: {e}");
                inner.set_status(ClientStatus::Error);
                Err(e)
            }
        }
    }

    /// Speak `text` with the configured voice unless overridden. Supersedes
    /// anything already being spoken.
    pub fn speak(&self, text: &str, voice_id: Option<u32>, speed: Option<f32>) -> Option<RequestId> {
        let defaults = self.inner.config.tts_voice;
        let voice_id = voice_id.unwrap_or(defaults.voice_id);
        let speed = normalize_speed(speed.unwrap_or(defaults.speed));
        self.inner.playback.speak(text, voice_id, speed)
    }

    pub fn stop_speaking(&self) {
        self.inner.playback.stop();
    }

    /// # Errors
    /// See `CapturePipeline::start`.
    pub async fn start_listening(&self) -> Result<()> {
        self.inner.capture.start().await
    }

    pub fn stop_listening(&self) {
        self.inner.capture.stop();
    }

    /// Tear down both pipelines and drop every subscription. Idempotent.
    pub fn destroy(&self) {
        let inner = &self.inner;
        if inner.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }
        inner.capture.destroy();
        inner.playback.destroy();
        inner.hub.clear();
        info!("speech client destroyed");
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.load(Ordering::Acquire)
    }

    pub fn subscribe<F>(&self, name: ClientEventName, handler: F) -> SubscriptionId
    where
        F: Fn(&ClientEvent) + Send + Sync + 'static,
    {
        self.inner.hub.subscribe(name, handler)
    }

    pub fn unsubscribe(&self, name: ClientEventName, id: SubscriptionId) -> bool {
        self.inner.hub.unsubscribe(name, id)
    }

    pub fn events(&self) -> &EventHub<ClientEvent> {
        &self.inner.hub
    }

    pub fn status(&self) -> ClientStatus {
        *self.inner.status.lock()
    }

    pub fn listening_state(&self) -> CaptureState {
        self.inner.capture.state()
    }

    pub fn speaking_state(&self) -> PlaybackState {
        self.inner.playback.state()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn capture(&self) -> &CapturePipeline {
        &self.inner.capture
    }

    pub fn playback(&self) -> &PlaybackPipeline {
        &self.inner.playback
    }
}

impl std::fmt::Debug for SpeechClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpeechClient")
            .field("status", &self.status())
            .field("listening", &self.listening_state())
            .field("speaking", &self.speaking_state())
            .finish_non_exhaustive()
    }
}

impl ClientInner {
    fn set_status(&self, next: ClientStatus) {
        {
            let mut status = self.status.lock();
            if *status == next || *status == ClientStatus::Error {
                return;
            }
            *status = next;
        }
        self.hub.publish(&ClientEvent::Status(next));
    }
}

fn forward_capture(capture: &CapturePipeline, hub: &Arc<EventHub<ClientEvent>>) {
    for name in [
        CaptureEventName::Partial,
        CaptureEventName::Final,
        CaptureEventName::Error,
    ] {
        let hub = Arc::clone(hub);
        capture.subscribe(name, move |event| {
            let forwarded = match event {
                CaptureEvent::Partial(text) => ClientEvent::SttPartial(text.clone()),
                CaptureEvent::Final(text) => ClientEvent::SttFinal(text.clone()),
                CaptureEvent::Error(report) => ClientEvent::Error(report.clone()),
                CaptureEvent::StateChange(_) => return,
            };
            hub.publish(&forwarded);
        });
    }
}

fn forward_playback(playback: &PlaybackPipeline, hub: &Arc<EventHub<ClientEvent>>) {
    for name in [
        PlaybackEventName::Start,
        PlaybackEventName::End,
        PlaybackEventName::Error,
    ] {
        let hub = Arc::clone(hub);
        playback.subscribe(name, move |event| {
            let forwarded = match event {
                PlaybackEvent::Start => ClientEvent::TtsStart,
                PlaybackEvent::End => ClientEvent::TtsEnd,
                PlaybackEvent::Error(report) => ClientEvent::Error(report.clone()),
                PlaybackEvent::StateChange(_) => return,
            };
            hub.publish(&forwarded);
        });
    }
}
