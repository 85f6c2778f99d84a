//! Engine workers.
//!
//! Each engine lives on its own OS thread and is reachable only through the
//! typed messages in `ipc::protocol`: requests arrive on a
//! `crossbeam_channel::Receiver`, replies leave on a tokio unbounded sender
//! so the owning proxy can await them. The engine is built on the worker
//! thread and dropped there.

pub mod recognizer;
pub mod synthesizer;

use std::thread::JoinHandle;

use tokio::sync::mpsc::UnboundedReceiver;
use tracing::debug;

use crate::error::{DuplexError, Result};
use crate::ipc::protocol::HandshakeReply;

/// Spawn a named engine thread.
pub(crate) fn spawn<F>(name: &str, body: F) -> Result<JoinHandle<()>>
where
    F: FnOnce() + Send + 'static,
{
    std::thread::Builder::new()
        .name(name.to_string())
        .spawn(body)
        .map_err(|e| DuplexError::Initialization(format!("failed to spawn {name}: {e}")))
}

/// Wait for the worker's answer to `Init`.
///
/// Returns the ready reply, or the worker's error message. A worker that
/// hangs up first is reported as a transport failure.
pub(crate) async fn await_handshake<R: HandshakeReply>(
    replies: &mut UnboundedReceiver<R>,
) -> std::result::Result<R, String> {
    while let Some(reply) = replies.recv().await {
        match reply.handshake() {
            Some(Ok(())) => return Ok(reply),
            Some(Err(message)) => return Err(message),
            None => debug!("ignoring reply received before handshake"),
        }
    }
    Err("worker exited before completing initialization".into())
}
