//! Cross-origin frame channel with origin/source authentication.
//!
//! Models `window.postMessage` between a page and an embedded helper
//! iframe. Unlike the extension runtime, this channel is open to the whole
//! page environment: any script can post into a window, claiming any
//! payload. Every physical message therefore carries the claimed origin and
//! a source-window token, and the receiving end checks both against its
//! [`FramePolicy`] before the dispatcher ever sees the envelope.
//!
//! Rejected messages are dropped, logged as security warnings, and counted;
//! no response is ever sent to an unauthenticated poster, so a probing
//! sender learns nothing.
//!
//! # Handshake
//!
//! The child frame posts a fixed readiness sentinel before any RPC traffic.
//! The parent's [`FramePort::wait_ready`] blocks until the sentinel arrives;
//! until then the parent cannot send, and inbound envelopes on the parent
//! side are not accepted.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::identifiers::TransportId;
use crate::protocol::Envelope;

use super::adapter::{EventSender, Transport, TransportEvent};

// ============================================================================
// Constants
// ============================================================================

/// Sentinel string the child posts once it is ready for RPC traffic.
pub const READY_SENTINEL: &str = "loaded";

/// Timeout for the readiness handshake.
const READY_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================================
// WindowToken
// ============================================================================

/// Opaque identity of one window taking part in a frame channel.
///
/// Stands in for the `event.source` window reference: unforgeable from the
/// outside, compared by identity only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WindowToken(u64);

/// Counter for window tokens within this process.
static NEXT_WINDOW_TOKEN: AtomicU64 = AtomicU64::new(1);

impl WindowToken {
    /// Allocates a fresh window token.
    #[inline]
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_WINDOW_TOKEN.fetch_add(1, Ordering::Relaxed))
    }
}

// ============================================================================
// FramePolicy
// ============================================================================

/// Inbound acceptance policy for one end of a frame channel.
///
/// A message is accepted only when its claimed origin matches one of
/// exactly two allowed origins (the secure and insecure variants of the
/// peer's host) and its source token equals the expected peer window.
#[derive(Debug, Clone)]
pub struct FramePolicy {
    secure_origin: String,
    insecure_origin: String,
    expected_source: WindowToken,
}

impl FramePolicy {
    /// Builds the policy accepting `https://{host}` and `http://{host}`
    /// from the window identified by `expected_source`.
    #[must_use]
    pub fn for_host(host: &str, expected_source: WindowToken) -> Self {
        Self {
            secure_origin: format!("https://{host}"),
            insecure_origin: format!("http://{host}"),
            expected_source,
        }
    }

    /// Returns `true` if a message claiming `origin` from `source` passes.
    #[must_use]
    fn allows(&self, origin: &str, source: WindowToken) -> bool {
        (origin == self.secure_origin || origin == self.insecure_origin)
            && source == self.expected_source
    }
}

// ============================================================================
// FrameMessage
// ============================================================================

/// One physical posted message, carrying its claimed provenance.
struct FrameMessage {
    /// Origin the poster claims.
    origin: String,
    /// Window the message came from.
    source: WindowToken,
    /// The posted data.
    data: FrameData,
}

/// Payload of a posted message.
enum FrameData {
    /// A plain string; only the readiness sentinel is meaningful.
    Text(String),
    /// An RPC envelope.
    Envelope(Envelope),
    /// The posting window went away (iframe removed, page navigated).
    Detach,
}

// ============================================================================
// FrameEndpoint
// ============================================================================

/// Identity and acceptance policy of one end of a frame channel.
#[derive(Debug, Clone)]
pub struct FrameEndpoint {
    origin: String,
    token: WindowToken,
    accepts: FramePolicy,
}

impl FrameEndpoint {
    /// Creates an endpoint claiming `origin` and `token` on send, and
    /// accepting inbound messages per `accepts`.
    #[must_use]
    pub fn new(origin: impl Into<String>, token: WindowToken, accepts: FramePolicy) -> Self {
        Self {
            origin: origin.into(),
            token,
            accepts,
        }
    }
}

// ============================================================================
// FramePort
// ============================================================================

/// One end of a page ⇄ iframe channel.
///
/// Created in pairs by [`frame_channel`]; the parent end gates all traffic
/// on the child's readiness sentinel.
pub struct FramePort {
    /// Process-local transport identity.
    id: TransportId,
    /// Origin claimed on every posted message.
    origin: String,
    /// Own window token, claimed on every posted message.
    token: WindowToken,
    /// Inbound acceptance policy.
    policy: FramePolicy,
    /// `true` on the parent end: no traffic until the sentinel is observed.
    gate_on_ready: bool,
    /// Sender into the peer's window.
    peer_tx: mpsc::UnboundedSender<FrameMessage>,
    /// Sender into this port's own window; cloned into posters.
    self_tx: mpsc::UnboundedSender<FrameMessage>,
    /// Own inbound queue, consumed by the reader task on start.
    rx: Mutex<Option<mpsc::UnboundedReceiver<FrameMessage>>>,
    /// Set once this end is closed, by either side.
    closed: Arc<AtomicBool>,
    /// Flipped when the readiness sentinel is observed.
    ready_tx: watch::Sender<bool>,
    /// Count of messages dropped by the policy; the security sink.
    rejected: Arc<AtomicU64>,
}

impl FramePort {
    /// Posts the readiness sentinel to the peer.
    ///
    /// Called by the child once its handlers are attached; the parent's
    /// [`wait_ready`](Self::wait_ready) unblocks when it arrives.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TransportUnavailable`] if the channel is closed.
    pub fn announce_ready(&self) -> Result<()> {
        self.post(FrameData::Text(READY_SENTINEL.to_string()))
    }

    /// Waits until the peer's readiness sentinel has been observed.
    ///
    /// The port must already be started (attached to its context); the
    /// sentinel is consumed by the reader task.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TransportUnavailable`] if the sentinel does not
    /// arrive within the handshake timeout or the channel closes first.
    pub async fn wait_ready(&self) -> Result<()> {
        let mut ready_rx = self.ready_tx.subscribe();

        timeout(READY_TIMEOUT, ready_rx.wait_for(|ready| *ready))
            .await
            .map_err(|_| {
                Error::transport_unavailable(format!(
                    "readiness sentinel not received within {}s",
                    READY_TIMEOUT.as_secs()
                ))
            })?
            .map_err(|_| Error::transport_unavailable("frame channel closed before readiness"))?;

        debug!(transport = %self.id, "Frame channel ready");
        Ok(())
    }

    /// Closes this end of the channel, modeling iframe removal or page
    /// navigation.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!(transport = %self.id, "Frame port closed");
        let _ = self.peer_tx.send(FrameMessage {
            origin: self.origin.clone(),
            source: self.token,
            data: FrameData::Detach,
        });
    }

    /// Returns a poster targeting this port's window.
    ///
    /// Any code holding a poster can post into the window with an arbitrary
    /// claimed origin and source, exactly as `window.postMessage` allows;
    /// the policy check is what keeps the protocol safe.
    #[must_use]
    pub fn poster(&self) -> FramePoster {
        FramePoster {
            tx: self.self_tx.clone(),
        }
    }

    /// Returns the number of inbound messages dropped by the policy.
    #[inline]
    #[must_use]
    pub fn rejected_count(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    /// Posts data to the peer window under this port's own identity.
    fn post(&self, data: FrameData) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::transport_unavailable("frame port closed"));
        }

        self.peer_tx
            .send(FrameMessage {
                origin: self.origin.clone(),
                source: self.token,
                data,
            })
            .map_err(|_| Error::transport_unavailable("frame peer gone"))
    }
}

impl Transport for FramePort {
    fn id(&self) -> TransportId {
        self.id
    }

    fn send(&self, envelope: &Envelope) -> Result<()> {
        if self.gate_on_ready && !*self.ready_tx.borrow() {
            return Err(Error::transport_unavailable(
                "frame channel not ready: sentinel not yet observed",
            ));
        }

        self.post(FrameData::Envelope(envelope.clone()))?;
        trace!(transport = %self.id, request_id = %envelope.request_id, "Envelope posted");
        Ok(())
    }

    fn start(&self, events: EventSender) {
        let Some(mut rx) = self.rx.lock().take() else {
            return;
        };

        let id = self.id;
        let policy = self.policy.clone();
        let gate_on_ready = self.gate_on_ready;
        let closed = Arc::clone(&self.closed);
        let ready_tx = self.ready_tx.clone();
        let rejected = Arc::clone(&self.rejected);

        tokio::spawn(async move {
            loop {
                let Some(message) = rx.recv().await else {
                    closed.store(true, Ordering::SeqCst);
                    let _ = events.send(TransportEvent::Closed { transport: id });
                    break;
                };

                if !policy.allows(&message.origin, message.source) {
                    rejected.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        transport = %id,
                        origin = %message.origin,
                        source = ?message.source,
                        "Dropped message failing origin/source check"
                    );
                    continue;
                }

                match message.data {
                    FrameData::Text(text) => {
                        if text == READY_SENTINEL {
                            debug!(transport = %id, "Readiness sentinel observed");
                            let _ = ready_tx.send(true);
                        } else {
                            warn!(transport = %id, %text, "Unrecognized text message");
                        }
                    }
                    FrameData::Envelope(envelope) => {
                        if gate_on_ready && !*ready_tx.borrow() {
                            warn!(
                                transport = %id,
                                request_id = %envelope.request_id,
                                "Dropped envelope arriving before readiness sentinel"
                            );
                            continue;
                        }
                        let _ = events.send(TransportEvent::Inbound {
                            transport: id,
                            envelope,
                        });
                    }
                    FrameData::Detach => {
                        closed.store(true, Ordering::SeqCst);
                        debug!(transport = %id, "Frame peer detached");
                        let _ = events.send(TransportEvent::Closed { transport: id });
                        break;
                    }
                }
            }
        });
    }
}

impl std::fmt::Debug for FramePort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FramePort")
            .field("id", &self.id)
            .field("origin", &self.origin)
            .field("gate_on_ready", &self.gate_on_ready)
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .field("rejected", &self.rejected.load(Ordering::Relaxed))
            .finish()
    }
}

// ============================================================================
// FramePoster
// ============================================================================

/// Handle for posting into a window from arbitrary code.
///
/// Models the openness of `window.postMessage`: holding a poster does not
/// grant trust, because the receiving port checks claimed origin and source
/// against its policy.
#[derive(Clone)]
pub struct FramePoster {
    tx: mpsc::UnboundedSender<FrameMessage>,
}

impl FramePoster {
    /// Posts an envelope claiming the given origin and source window.
    ///
    /// Returns `false` if the target window is gone.
    pub fn post(&self, origin: impl Into<String>, source: WindowToken, envelope: Envelope) -> bool {
        self.tx
            .send(FrameMessage {
                origin: origin.into(),
                source,
                data: FrameData::Envelope(envelope),
            })
            .is_ok()
    }
}

// ============================================================================
// frame_channel
// ============================================================================

/// Creates a connected parent/child frame channel.
///
/// The parent end gates all traffic on the child's readiness sentinel; the
/// child may post immediately (its first post is usually the sentinel
/// itself).
#[must_use]
pub fn frame_channel(parent: FrameEndpoint, child: FrameEndpoint) -> (Arc<FramePort>, Arc<FramePort>) {
    let (parent_tx, parent_rx) = mpsc::unbounded_channel();
    let (child_tx, child_rx) = mpsc::unbounded_channel();

    let parent_port = Arc::new(FramePort {
        id: TransportId::next(),
        origin: parent.origin,
        token: parent.token,
        policy: parent.accepts,
        gate_on_ready: true,
        peer_tx: child_tx.clone(),
        self_tx: parent_tx.clone(),
        rx: Mutex::new(Some(parent_rx)),
        closed: Arc::new(AtomicBool::new(false)),
        ready_tx: watch::Sender::new(false),
        rejected: Arc::new(AtomicU64::new(0)),
    });

    let child_port = Arc::new(FramePort {
        id: TransportId::next(),
        origin: child.origin,
        token: child.token,
        policy: child.accepts,
        gate_on_ready: false,
        peer_tx: parent_tx,
        self_tx: child_tx,
        rx: Mutex::new(Some(child_rx)),
        closed: Arc::new(AtomicBool::new(false)),
        ready_tx: watch::Sender::new(false),
        rejected: Arc::new(AtomicU64::new(0)),
    });

    (parent_port, child_port)
}

// ============================================================================
// Tests
// ============================================================================
