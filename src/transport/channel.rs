//! In-process runtime channel between trusted extension contexts.
//!
//! Models the extension-runtime port connecting a background service to a
//! content script (or privileged extension page). Both ends live inside the
//! same extension, so the runtime itself vouches for message provenance and
//! no per-message origin check applies; the interesting behavior is close
//! detection, which the real port surfaces as a disconnect event.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::identifiers::TransportId;
use crate::protocol::Envelope;

use super::adapter::{EventSender, Transport, TransportEvent};

// ============================================================================
// Frame
// ============================================================================

/// One physical message on the runtime port.
enum Frame {
    /// An envelope from the peer.
    Envelope(Envelope),
    /// The peer disconnected its end.
    Disconnect,
}

// ============================================================================
// RuntimePort
// ============================================================================

/// One end of an extension-runtime channel.
///
/// Created in pairs by [`runtime_channel`]. Sends fail with
/// [`Error::TransportUnavailable`] once either end has closed; the surviving
/// end's dispatch loop observes [`TransportEvent::Closed`].
pub struct RuntimePort {
    /// Process-local transport identity.
    id: TransportId,
    /// Sender into the peer's inbound queue.
    peer_tx: mpsc::UnboundedSender<Frame>,
    /// Own inbound queue, consumed by the reader task on start.
    rx: Mutex<Option<mpsc::UnboundedReceiver<Frame>>>,
    /// Set once this end is closed, by either side.
    closed: Arc<AtomicBool>,
}

impl RuntimePort {
    /// Closes this end of the channel.
    ///
    /// The peer's dispatch loop observes [`TransportEvent::Closed`]; further
    /// sends from either end fail with [`Error::TransportUnavailable`].
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!(transport = %self.id, "Runtime port closed");
        let _ = self.peer_tx.send(Frame::Disconnect);
    }
}

impl Transport for RuntimePort {
    fn id(&self) -> TransportId {
        self.id
    }

    fn send(&self, envelope: &Envelope) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::transport_unavailable("runtime port closed"));
        }

        self.peer_tx
            .send(Frame::Envelope(envelope.clone()))
            .map_err(|_| Error::transport_unavailable("runtime port peer gone"))?;

        trace!(transport = %self.id, request_id = %envelope.request_id, "Envelope sent");
        Ok(())
    }

    fn start(&self, events: EventSender) {
        let Some(mut rx) = self.rx.lock().take() else {
            return;
        };

        let id = self.id;
        let closed = Arc::clone(&self.closed);

        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Some(Frame::Envelope(envelope)) => {
                        let _ = events.send(TransportEvent::Inbound {
                            transport: id,
                            envelope,
                        });
                    }
                    Some(Frame::Disconnect) | None => {
                        closed.store(true, Ordering::SeqCst);
                        debug!(transport = %id, "Runtime port disconnected by peer");
                        let _ = events.send(TransportEvent::Closed { transport: id });
                        break;
                    }
                }
            }
        });
    }
}

impl std::fmt::Debug for RuntimePort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimePort")
            .field("id", &self.id)
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish()
    }
}

// ============================================================================
// runtime_channel
// ============================================================================

/// Creates a connected pair of runtime ports.
///
/// The two ends are symmetric; by convention the first goes to the
/// background context and the second to the content context.
#[must_use]
pub fn runtime_channel() -> (Arc<RuntimePort>, Arc<RuntimePort>) {
    let (a_tx, a_rx) = mpsc::unbounded_channel();
    let (b_tx, b_rx) = mpsc::unbounded_channel();

    let a = Arc::new(RuntimePort {
        id: TransportId::next(),
        peer_tx: b_tx,
        rx: Mutex::new(Some(a_rx)),
        closed: Arc::new(AtomicBool::new(false)),
    });
    let b = Arc::new(RuntimePort {
        id: TransportId::next(),
        peer_tx: a_tx,
        rx: Mutex::new(Some(b_rx)),
        closed: Arc::new(AtomicBool::new(false)),
    });

    (a, b)
}

// ============================================================================
// Tests
// ============================================================================
