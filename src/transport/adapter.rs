//! Transport contract shared by all channel kinds.
//!
//! A transport connects exactly two contexts over a one-way, fire-and-forget
//! physical primitive and exposes two operations: [`Transport::send`] and
//! event delivery into the owning context's dispatch loop via
//! [`Transport::start`]. Source authentication happens inside the adapter,
//! before an envelope is ever handed to the dispatcher; rejected messages
//! are dropped and logged, never answered.

// ============================================================================
// Imports
// ============================================================================

use tokio::sync::mpsc;

use crate::error::Result;
use crate::identifiers::TransportId;
use crate::protocol::Envelope;

// ============================================================================
// TransportEvent
// ============================================================================

/// Event delivered by a transport to its owning context.
#[derive(Debug)]
pub enum TransportEvent {
    /// An authenticated envelope arrived on `transport`.
    Inbound {
        /// The transport the envelope arrived on.
        transport: TransportId,
        /// The decoded envelope.
        envelope: Envelope,
    },
    /// The underlying channel closed (peer torn down, port disconnected).
    ///
    /// The owning context reacts by rejecting every request pending on this
    /// transport in bulk.
    Closed {
        /// The transport that closed.
        transport: TransportId,
    },
}

/// Sender half of a context's transport-event queue.
pub type EventSender = mpsc::UnboundedSender<TransportEvent>;

// ============================================================================
// Transport
// ============================================================================

/// Channel-specific send/receive adapter connecting two contexts.
pub trait Transport: Send + Sync {
    /// Returns this transport's process-local identifier.
    fn id(&self) -> TransportId;

    /// Sends an envelope to the peer context.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TransportUnavailable`](crate::Error::TransportUnavailable)
    /// if the channel is closed; this layer does not retry.
    fn send(&self, envelope: &Envelope) -> Result<()>;

    /// Starts delivering inbound events into `events`.
    ///
    /// Called once, when the transport is attached to its owning context.
    /// Messages failing authentication are dropped inside the adapter and
    /// never reach the queue. A second call is a no-op.
    fn start(&self, events: EventSender);
}
