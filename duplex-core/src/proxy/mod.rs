//! Main-side handles for the engine workers.
//!
//! A proxy owns its worker's lifecycle: spawning, the `Init` handshake,
//! runtime reply dispatch and teardown. `initialize()` is idempotent and
//! caches its outcome, failure included, so concurrent callers share one
//! handshake. Runtime engine errors are logged and counted, never raised.

pub mod recognition;
pub mod synthesis;

pub use recognition::{RecognitionProxy, RecognitionResult};
pub use synthesis::{AudioChunk, SynthesisOutput, SynthesisProxy};

use std::future::Future;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use tokio::sync::watch;

use crate::error::{DuplexError, Result};

type Outcome = std::result::Result<(), String>;

/// One-shot `Init` handshake shared by every `initialize()` caller.
///
/// The first caller spawns the handshake as its own task; every caller,
/// the first included, only waits for the published outcome. Dropping an
/// `initialize()` future therefore never abandons a half-done handshake.
pub(crate) struct HandshakeCell {
    started: AtomicBool,
    outcome: watch::Sender<Option<Outcome>>,
}

impl HandshakeCell {
    pub(crate) fn new() -> Arc<Self> {
        let (outcome, _) = watch::channel(None);
        Arc::new(Self {
            started: AtomicBool::new(false),
            outcome,
        })
    }

    /// Start `handshake` if nobody has yet, then wait for its outcome.
    pub(crate) async fn run<F, Fut>(self: &Arc<Self>, handshake: F) -> Result<()>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Outcome> + Send + 'static,
    {
        let mut outcome_rx = self.outcome.subscribe();
        if !self.started.swap(true, Ordering::AcqRel) {
            let task = tokio::spawn(handshake());
            let cell = Arc::clone(self);
            tokio::spawn(async move {
                let outcome = match task.await {
                    Ok(outcome) => outcome,
                    Err(e) => Err(format!("handshake task failed: {e}")),
                };
                cell.outcome.send_replace(Some(outcome));
            });
        }

        let outcome = outcome_rx
            .wait_for(Option::is_some)
            .await
            .map(|published| (*published).clone())
            .map_err(|_| DuplexError::Initialization("handshake task vanished".into()))?;
        match outcome {
            Some(outcome) => handshake_result(&outcome),
            None => Err(DuplexError::Initialization("handshake outcome missing".into())),
        }
    }
}

/// Map a cached handshake outcome to the public error type.
fn handshake_result(outcome: &Outcome) -> Result<()> {
    outcome
        .as_ref()
        .map(|_| ())
        .map_err(|message| DuplexError::Initialization(message.clone()))
}
