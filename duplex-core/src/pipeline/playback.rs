//! Playback queue pipeline.
//!
//! Every `speak()` takes a fresh `RequestId` and supersedes the previous
//! request: the queue is cleared and the active buffer is force-stopped.
//! Synthesis output is correlated strictly by id, so chunks and `done`
//! signals from a superseded request are dropped on arrival. The engine is
//! never interrupted; its stale work is simply discarded.
//!
//! Buffers play one at a time. Each started buffer carries a playback token
//! and an `on_ended` callback; only the callback whose token is still active
//! may schedule the next buffer. The request ends once its `done` signal
//! has arrived and the queue has drained.

use std::collections::VecDeque;
use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc, Weak,
};

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::audio::{OutputContext, OutputDevice, PlaybackBuffer};
use crate::error::{DuplexError, Result};
use crate::hub::{EventHub, SubscriptionId};
use crate::inference::SynthesizerLoader;
use crate::ipc::events::{PlaybackEvent, PlaybackEventName, PlaybackState};
use crate::ipc::protocol::RequestId;
use crate::proxy::{AudioChunk, SynthesisOutput, SynthesisProxy};

#[derive(Debug, Default)]
struct PlaybackDiagnostics {
    requests: AtomicUsize,
    chunks_received: AtomicUsize,
    stale_chunks: AtomicUsize,
    stale_done: AtomicUsize,
    buffers_played: AtomicUsize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackDiagnosticsSnapshot {
    pub requests: usize,
    pub chunks_received: usize,
    pub stale_chunks: usize,
    pub stale_done: usize,
    pub buffers_played: usize,
}

/// Mutable playback state. Guarded by one lock; never held while publishing.
struct PlaybackCore {
    /// Created lazily by the first `speak()`.
    context: Option<Box<dyn OutputContext>>,
    speak_id: RequestId,
    queue: VecDeque<PlaybackBuffer>,
    /// `done` received for `speak_id`.
    done: bool,
    /// Token of the buffer currently playing.
    playing: Option<u64>,
    next_token: u64,
    state: PlaybackState,
}

impl PlaybackCore {
    /// Silence the active buffer; its `on_ended` will never run.
    fn halt(&mut self) {
        self.playing = None;
        if let Some(ctx) = self.context.as_mut() {
            ctx.stop();
        }
    }

    fn enter(&mut self, next: PlaybackState, events: &mut Vec<PlaybackEvent>) {
        if self.state != next {
            self.state = next;
            events.push(PlaybackEvent::StateChange(next));
        }
    }
}

struct PlaybackInner {
    hub: EventHub<PlaybackEvent>,
    output: Arc<dyn OutputDevice>,
    proxy: SynthesisProxy,
    core: Mutex<PlaybackCore>,
    destroyed: AtomicBool,
    diagnostics: PlaybackDiagnostics,
    weak_self: Weak<PlaybackInner>,
}

/// Text → synthesizer → speakers. Cheap to clone; clones share one pipeline.
#[derive(Clone)]
pub struct PlaybackPipeline {
    inner: Arc<PlaybackInner>,
}

impl PlaybackPipeline {
    pub fn new(
        output: Arc<dyn OutputDevice>,
        asset_path: impl Into<String>,
        loader: Box<dyn SynthesizerLoader>,
    ) -> Self {
        let asset_path = asset_path.into();
        let inner = Arc::new_cyclic(|weak: &Weak<PlaybackInner>| {
            let handler_ref = weak.clone();
            let proxy = SynthesisProxy::new(
                asset_path,
                loader,
                Arc::new(move |output: SynthesisOutput| {
                    if let Some(inner) = handler_ref.upgrade() {
                        inner.handle_output(output);
                    }
                }),
            );
            PlaybackInner {
                hub: EventHub::new(),
                output,
                proxy,
                core: Mutex::new(PlaybackCore {
                    context: None,
                    speak_id: RequestId::default(),
                    queue: VecDeque::new(),
                    done: true,
                    playing: None,
                    next_token: 0,
                    state: PlaybackState::Idle,
                }),
                destroyed: AtomicBool::new(false),
                diagnostics: PlaybackDiagnostics::default(),
                weak_self: weak.clone(),
            }
        });
        Self { inner }
    }

    /// Capability check, then the synthesizer handshake.
    ///
    /// # Errors
    /// `Capability`, `Initialization` or `Destroyed`; failures are also
    /// published as `Error` events.
    pub async fn initialize(&self) -> Result<()> {
        if self.is_destroyed() {
            return Err(DuplexError::Destroyed);
        }
        if let Err(e) = self.inner.output.check_support() {
            return Err(self.inner.report(e));
        }
        match self.inner.proxy.initialize().await {
            Ok(()) => Ok(()),
            Err(e) => Err(self.inner.report(e)),
        }
    }

    /// Speak `text`, superseding whatever is in flight.
    ///
    /// Returns the id assigned to the request, or `None` when nothing was
    /// started (blank text, synthesizer not ready, no output device, or the
    /// pipeline was destroyed).
    pub fn speak(&self, text: &str, voice_id: u32, speed: f32) -> Option<RequestId> {
        let inner = &self.inner;
        if self.is_destroyed() {
            return None;
        }
        let text = text.trim();
        if text.is_empty() {
            debug!("blank speak request ignored");
            return None;
        }
        if !inner.proxy.is_ready() {
            inner.report(DuplexError::Runtime("synthesizer is not initialised".into()));
            return None;
        }

        let mut events = Vec::new();
        let id = {
            let mut core = inner.core.lock();

            if core.context.is_none() {
                match inner.output.create_context() {
                    Ok(ctx) => {
                        info!(sample_rate = ctx.sample_rate(), "output context created");
                        core.context = Some(ctx);
                    }
                    Err(e) => {
                        drop(core);
                        inner.report(e);
                        return None;
                    }
                }
            }
            if let Some(ctx) = core.context.as_mut() {
                if ctx.is_suspended() {
                    if let Err(e) = ctx.resume() {
                        warn!("failed to resume output context: {e}");
                    }
                }
            }

            core.speak_id = core.speak_id.next();
            core.queue.clear();
            core.done = false;
            core.halt();
            core.enter(PlaybackState::Speaking, &mut events);
            events.push(PlaybackEvent::Start);
            core.speak_id
        };

        inner.diagnostics.requests.fetch_add(1, Ordering::Relaxed);
        inner.publish_all(events);
        debug!(%id, chars = text.len(), "speak request");
        inner.proxy.speak(text, voice_id, speed, id);
        Some(id)
    }

    /// Supersede the current request and silence playback. Always emits
    /// `End`.
    pub fn stop(&self) {
        if self.is_destroyed() {
            return;
        }
        let mut events = Vec::new();
        {
            let mut core = self.inner.core.lock();
            core.speak_id = core.speak_id.next();
            core.queue.clear();
            core.done = true;
            core.halt();
            core.enter(PlaybackState::Idle, &mut events);
        }
        events.push(PlaybackEvent::End);
        self.inner.publish_all(events);
    }

    /// Stop playback, close the output context and free the synthesizer.
    /// Idempotent; never fails.
    pub fn destroy(&self) {
        let inner = &self.inner;
        if inner.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut events = Vec::new();
        let context = {
            let mut core = inner.core.lock();
            core.speak_id = core.speak_id.next();
            core.queue.clear();
            core.done = true;
            core.halt();
            core.enter(PlaybackState::Idle, &mut events);
            core.context.take()
        };
        if let Some(ctx) = context {
            ctx.close();
        }
        inner.proxy.destroy();
        inner.publish_all(events);
        info!("playback pipeline destroyed");
    }

    pub fn state(&self) -> PlaybackState {
        self.inner.core.lock().state
    }

    /// Id of the most recent request; `RequestId(0)` before the first one.
    pub fn current_request(&self) -> RequestId {
        self.inner.core.lock().speak_id
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.load(Ordering::Acquire)
    }

    pub fn events(&self) -> &EventHub<PlaybackEvent> {
        &self.inner.hub
    }

    pub fn subscribe<F>(&self, name: PlaybackEventName, handler: F) -> SubscriptionId
    where
        F: Fn(&PlaybackEvent) + Send + Sync + 'static,
    {
        self.inner.hub.subscribe(name, handler)
    }

    pub fn unsubscribe(&self, name: PlaybackEventName, id: SubscriptionId) -> bool {
        self.inner.hub.unsubscribe(name, id)
    }

    pub fn proxy(&self) -> &SynthesisProxy {
        &self.inner.proxy
    }

    pub fn diagnostics(&self) -> PlaybackDiagnosticsSnapshot {
        let d = &self.inner.diagnostics;
        PlaybackDiagnosticsSnapshot {
            requests: d.requests.load(Ordering::Relaxed),
            chunks_received: d.chunks_received.load(Ordering::Relaxed),
            stale_chunks: d.stale_chunks.load(Ordering::Relaxed),
            stale_done: d.stale_done.load(Ordering::Relaxed),
            buffers_played: d.buffers_played.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for PlaybackPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackPipeline")
            .field("state", &self.state())
            .field("current_request", &self.current_request())
            .finish_non_exhaustive()
    }
}

impl PlaybackInner {
    fn publish_all(&self, events: Vec<PlaybackEvent>) {
        for event in &events {
            self.hub.publish(event);
        }
    }

    fn report(&self, err: DuplexError) -> DuplexError {
        error!("playback failure: {err}");
        self.hub.publish(&PlaybackEvent::Error(err.report()));
        err
    }

    fn handle_output(&self, output: SynthesisOutput) {
        if self.destroyed.load(Ordering::Acquire) {
            return;
        }
        match output {
            SynthesisOutput::Audio(chunk) => self.handle_chunk(chunk),
            SynthesisOutput::Done(id) => self.handle_done(id),
        }
    }

    fn handle_chunk(&self, chunk: AudioChunk) {
        self.diagnostics.chunks_received.fetch_add(1, Ordering::Relaxed);
        let mut events = Vec::new();
        {
            let mut core = self.core.lock();
            if chunk.id != core.speak_id {
                self.diagnostics.stale_chunks.fetch_add(1, Ordering::Relaxed);
                debug!(stale = %chunk.id, current = %core.speak_id, "stale chunk dropped");
                return;
            }
            let Some(ctx) = core.context.as_ref() else {
                return;
            };
            let buffer = match ctx.create_buffer(chunk.samples, chunk.sample_rate) {
                Ok(buffer) => buffer,
                Err(e) => {
                    warn!(id = %chunk.id, "chunk could not be converted: {e}");
                    events.push(PlaybackEvent::Error(e.report()));
                    drop(core);
                    self.publish_all(events);
                    return;
                }
            };
            core.queue.push_back(buffer);
            if core.playing.is_none() {
                self.play_next(&mut core, &mut events);
            }
        }
        self.publish_all(events);
    }

    fn handle_done(&self, id: RequestId) {
        let mut events = Vec::new();
        {
            let mut core = self.core.lock();
            if id != core.speak_id {
                self.diagnostics.stale_done.fetch_add(1, Ordering::Relaxed);
                debug!(stale = %id, current = %core.speak_id, "stale done ignored");
                return;
            }
            core.done = true;
            if core.playing.is_none() && core.queue.is_empty() {
                self.finish(&mut core, &mut events);
            }
        }
        self.publish_all(events);
    }

    fn on_buffer_ended(&self, token: u64) {
        let mut events = Vec::new();
        {
            let mut core = self.core.lock();
            if core.playing != Some(token) {
                return;
            }
            core.playing = None;
            self.play_next(&mut core, &mut events);
        }
        self.publish_all(events);
    }

    /// Start the queue head, or finish the request if it is complete.
    fn play_next(&self, core: &mut PlaybackCore, events: &mut Vec<PlaybackEvent>) {
        while let Some(buffer) = core.queue.pop_front() {
            core.next_token += 1;
            let token = core.next_token;
            let weak = self.weak_self.clone();
            let on_ended = Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.on_buffer_ended(token);
                }
            });

            let Some(ctx) = core.context.as_mut() else {
                return;
            };
            match ctx.play(buffer, on_ended) {
                Ok(()) => {
                    core.playing = Some(token);
                    self.diagnostics.buffers_played.fetch_add(1, Ordering::Relaxed);
                    return;
                }
                Err(e) => {
                    warn!("buffer playback failed: {e}");
                    events.push(PlaybackEvent::Error(e.report()));
                }
            }
        }
        if core.done {
            self.finish(core, events);
        }
    }

    fn finish(&self, core: &mut PlaybackCore, events: &mut Vec<PlaybackEvent>) {
        if core.state != PlaybackState::Speaking {
            return;
        }
        debug!(id = %core.speak_id, "request finished");
        core.enter(PlaybackState::Idle, events);
        events.push(PlaybackEvent::End);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{held_synthesizer, FakeOutput};

    struct Harness {
        pipeline: PlaybackPipeline,
        output: Arc<FakeOutput>,
        events: Arc<Mutex<Vec<PlaybackEvent>>>,
        _hold: crossbeam_channel::Sender<()>,
    }

    impl Harness {
        async fn new() -> Self {
            Self::with_output(FakeOutput::new(22_050)).await
        }

        async fn with_output(output: Arc<FakeOutput>) -> Self {
            let (loader, hold) = held_synthesizer();
            let pipeline = PlaybackPipeline::new(output.clone(), "tts/", loader);
            let events = Arc::new(Mutex::new(Vec::new()));
            for name in [
                PlaybackEventName::Start,
                PlaybackEventName::End,
                PlaybackEventName::StateChange,
                PlaybackEventName::Error,
            ] {
                let sink = Arc::clone(&events);
                pipeline.subscribe(name, move |e| sink.lock().push(e.clone()));
            }
            pipeline.initialize().await.unwrap();
            Self {
                pipeline,
                output,
                events,
                _hold: hold,
            }
        }

        fn deliver_chunk(&self, id: RequestId) {
            self.pipeline
                .inner
                .handle_output(SynthesisOutput::Audio(AudioChunk {
                    id,
                    samples: vec![0.1; 64],
                    sample_rate: 22_050,
                }));
        }

        fn deliver_done(&self, id: RequestId) {
            self.pipeline.inner.handle_output(SynthesisOutput::Done(id));
        }

        fn count(&self, wanted: &PlaybackEvent) -> usize {
            self.events.lock().iter().filter(|e| *e == wanted).count()
        }
    }

    #[tokio::test]
    async fn initialize_survives_a_cancelled_first_attempt() {
        let (loader, _hold) = held_synthesizer();
        let pipeline = PlaybackPipeline::new(FakeOutput::new(22_050), "tts/", loader);
        let cancelled = tokio::select! {
            biased;
            _ = pipeline.initialize() => false,
            _ = std::future::ready(()) => true,
        };
        assert!(cancelled);

        pipeline.initialize().await.unwrap();
        assert!(pipeline.proxy().is_ready());
        assert_eq!(pipeline.speak("hello", 0, 1.0), Some(RequestId(1)));
    }

    #[tokio::test]
    async fn stale_request_output_is_dropped() {
        let h = Harness::new().await;
        let first = h.pipeline.speak("first request", 0, 1.0).unwrap();
        let second = h.pipeline.speak("second request", 0, 1.0).unwrap();
        assert_eq!(first, RequestId(1));
        assert_eq!(second, RequestId(2));

        h.deliver_chunk(first);
        h.deliver_done(first);
        assert_eq!(h.output.played(), 0);
        assert_eq!(h.pipeline.state(), PlaybackState::Speaking);
        assert_eq!(h.count(&PlaybackEvent::End), 0);

        h.deliver_chunk(second);
        assert_eq!(h.output.played(), 1);
        h.deliver_done(second);
        assert!(h.output.finish_current());

        assert_eq!(h.count(&PlaybackEvent::Start), 2);
        assert_eq!(h.count(&PlaybackEvent::End), 1);
        assert_eq!(h.pipeline.state(), PlaybackState::Idle);

        let diag = h.pipeline.diagnostics();
        assert_eq!(diag.stale_chunks, 1);
        assert_eq!(diag.stale_done, 1);
    }

    #[tokio::test]
    async fn done_after_both_chunks_played_ends_once() {
        let h = Harness::new().await;
        let id = h.pipeline.speak("hello there", 0, 1.0).unwrap();

        h.deliver_chunk(id);
        h.deliver_chunk(id);
        assert_eq!(h.output.played(), 1);
        assert!(h.output.finish_current());
        assert_eq!(h.output.played(), 2);
        assert!(h.output.finish_current());
        assert_eq!(h.count(&PlaybackEvent::End), 0);

        h.deliver_done(id);
        assert_eq!(
            *h.events.lock(),
            vec![
                PlaybackEvent::StateChange(PlaybackState::Speaking),
                PlaybackEvent::Start,
                PlaybackEvent::StateChange(PlaybackState::Idle),
                PlaybackEvent::End,
            ]
        );
    }

    #[tokio::test]
    async fn done_before_drain_defers_end() {
        let h = Harness::new().await;
        let id = h.pipeline.speak("hello there", 0, 1.0).unwrap();

        h.deliver_chunk(id);
        h.deliver_chunk(id);
        h.deliver_done(id);
        assert_eq!(h.count(&PlaybackEvent::End), 0);

        assert!(h.output.finish_current());
        assert_eq!(h.count(&PlaybackEvent::End), 0);
        assert!(h.output.finish_current());
        assert_eq!(h.count(&PlaybackEvent::End), 1);
        assert_eq!(h.count(&PlaybackEvent::Start), 1);
        assert!(!h.output.finish_current());
    }

    #[tokio::test]
    async fn superseded_buffer_callback_is_ignored() {
        let h = Harness::new().await;
        let first = h.pipeline.speak("one", 0, 1.0).unwrap();
        h.deliver_chunk(first);
        assert!(h.output.with_state(|s| s.pending.is_some()));

        let second = h.pipeline.speak("two", 0, 1.0).unwrap();
        assert!(!h.output.finish_current(), "stop() must discard on_ended");

        h.deliver_chunk(second);
        h.deliver_done(second);
        assert!(h.output.finish_current());
        assert_eq!(h.count(&PlaybackEvent::End), 1);
    }

    #[tokio::test]
    async fn output_context_is_created_lazily_once_and_resumed() {
        let h = Harness::new().await;
        assert_eq!(h.output.contexts_created(), 0);
        h.pipeline.speak("one", 0, 1.0).unwrap();
        h.pipeline.speak("two", 0, 1.0).unwrap();
        assert_eq!(h.output.contexts_created(), 1);
        assert_eq!(h.output.with_state(|s| s.resumes), 1);
    }

    #[tokio::test]
    async fn blank_text_is_ignored() {
        let h = Harness::new().await;
        assert_eq!(h.pipeline.speak("   ", 0, 1.0), None);
        assert!(h.events.lock().is_empty());
        assert_eq!(h.output.contexts_created(), 0);
    }

    #[tokio::test]
    async fn stop_supersedes_and_always_emits_end() {
        let h = Harness::new().await;
        let id = h.pipeline.speak("hello", 0, 1.0).unwrap();
        h.deliver_chunk(id);
        h.pipeline.stop();

        assert_eq!(h.pipeline.state(), PlaybackState::Idle);
        assert!(h.pipeline.current_request() > id);
        assert!(!h.output.finish_current());

        h.deliver_chunk(id);
        h.deliver_done(id);
        assert_eq!(h.output.played(), 1);

        h.pipeline.stop();
        assert_eq!(h.count(&PlaybackEvent::End), 2);
    }

    #[tokio::test]
    async fn missing_output_device_reports_error() {
        let h = Harness::with_output(FakeOutput::broken()).await;
        assert_eq!(h.pipeline.speak("hello", 0, 1.0), None);
        assert_eq!(h.pipeline.state(), PlaybackState::Idle);
        assert!(matches!(h.events.lock()[0], PlaybackEvent::Error(_)));
    }

    #[tokio::test]
    async fn destroy_closes_context_and_blocks_speak() {
        let h = Harness::new().await;
        h.pipeline.speak("hello", 0, 1.0).unwrap();
        h.pipeline.destroy();
        h.pipeline.destroy();
        assert!(h.output.with_state(|s| s.closed));
        assert_eq!(h.pipeline.speak("again", 0, 1.0), None);
        assert!(matches!(
            h.pipeline.initialize().await,
            Err(DuplexError::Destroyed)
        ));
    }
}
