//! Pending-request table with at-most-once resolution.
//!
//! Each context owns one [`RequestRegistry`] tracking the calls it has
//! issued that are still awaiting a response. Entries are keyed by request
//! ID and resolved exactly once: by a matching response, by caller-side
//! timeout removal, or by bulk cancellation when a transport closes.
//!
//! The caller-side timeout lives with the caller, not here: the caller
//! awaits the returned channel under `tokio::time::timeout` and calls
//! [`RequestRegistry::remove`] on expiry, so a late response finds no entry
//! and is discarded as stale.

// ============================================================================
// Imports
// ============================================================================

use std::time::Instant;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::sync::oneshot;
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::identifiers::{MethodName, RequestId, TransportId};
use crate::protocol::ResponsePayload;

// ============================================================================
// Types
// ============================================================================

/// Channel half delivering the outcome to the waiting caller.
type CompletionSender = oneshot::Sender<Result<ResponsePayload>>;

/// Channel half the caller awaits.
pub type CompletionReceiver = oneshot::Receiver<Result<ResponsePayload>>;

// ============================================================================
// PendingEntry
// ============================================================================

/// Bookkeeping for one outstanding call.
struct PendingEntry {
    /// Transport the request went out on; keys bulk cancellation.
    transport: TransportId,
    /// Method name, kept for diagnostics.
    method: MethodName,
    /// When the call was issued.
    created_at: Instant,
    /// Continuation delivering the outcome.
    tx: CompletionSender,
}

// ============================================================================
// RequestRegistry
// ============================================================================

/// Per-context table of requests awaiting a response.
///
/// Thread-safe; shared between the context's public call surface and its
/// dispatch loop.
#[derive(Default)]
pub struct RequestRegistry {
    pending: Mutex<FxHashMap<RequestId, PendingEntry>>,
}

impl RequestRegistry {
    /// Creates an empty registry.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new pending request and returns the channel the caller
    /// awaits for its outcome.
    ///
    /// Request IDs are ≥48 bits of entropy, so an id is never re-registered
    /// within a context's lifetime.
    #[must_use]
    pub fn register(
        &self,
        request_id: RequestId,
        transport: TransportId,
        method: MethodName,
    ) -> CompletionReceiver {
        let (tx, rx) = oneshot::channel();
        let entry = PendingEntry {
            transport,
            method,
            created_at: Instant::now(),
            tx,
        };

        let mut pending = self.pending.lock();
        pending.insert(request_id, entry);
        trace!(%request_id, pending = pending.len(), "Registered pending request");

        rx
    }

    /// Resolves the pending request matching `request_id` with a response
    /// payload.
    ///
    /// Returns `false` (and logs) if no such request is pending: a late or
    /// duplicate response is a no-op, never a double resolution.
    pub fn complete(&self, request_id: RequestId, payload: ResponsePayload) -> bool {
        let entry = self.pending.lock().remove(&request_id);

        match entry {
            Some(entry) => {
                trace!(
                    %request_id,
                    method = %entry.method,
                    elapsed_ms = entry.created_at.elapsed().as_millis() as u64,
                    "Completing pending request"
                );
                let _ = entry.tx.send(Ok(payload));
                true
            }
            None => {
                warn!(%request_id, "Response for unknown or already-resolved request");
                false
            }
        }
    }

    /// Removes a pending entry without resolving it.
    ///
    /// Used by the caller when its timeout fires; a response arriving after
    /// removal finds nothing and is discarded.
    pub fn remove(&self, request_id: RequestId) -> bool {
        let removed = self.pending.lock().remove(&request_id).is_some();
        if removed {
            debug!(%request_id, "Removed timed-out pending request");
        }
        removed
    }

    /// Rejects every request pending on `transport` with
    /// [`Error::TransportClosed`].
    ///
    /// Requests pending on other transports are untouched. Returns the
    /// number of requests rejected.
    pub fn cancel_all(&self, transport: TransportId) -> usize {
        let cancelled: Vec<PendingEntry> = {
            let mut pending = self.pending.lock();
            let ids: Vec<RequestId> = pending
                .iter()
                .filter(|(_, entry)| entry.transport == transport)
                .map(|(id, _)| *id)
                .collect();
            ids.into_iter()
                .filter_map(|id| pending.remove(&id))
                .collect()
        };

        let count = cancelled.len();
        for entry in cancelled {
            let _ = entry.tx.send(Err(Error::TransportClosed));
        }

        if count > 0 {
            debug!(%transport, count, "Cancelled pending requests on closed transport");
        }
        count
    }

    /// Rejects every pending request with [`Error::TransportClosed`].
    ///
    /// Called at context teardown. Returns the number of requests rejected.
    pub fn cancel_everything(&self) -> usize {
        let cancelled: Vec<(RequestId, PendingEntry)> =
            self.pending.lock().drain().collect();
        let count = cancelled.len();

        for (_, entry) in cancelled {
            let _ = entry.tx.send(Err(Error::TransportClosed));
        }

        if count > 0 {
            debug!(count, "Cancelled all pending requests at teardown");
        }
        count
    }

    /// Returns the number of requests currently pending.
    #[inline]
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }
}

impl std::fmt::Debug for RequestRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestRegistry")
            .field("pending", &self.pending.lock().len())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn method(name: &str) -> MethodName {
        MethodName::new(name).expect("valid name")
    }

    #[tokio::test]
    async fn test_complete_delivers_payload() {
        let registry = RequestRegistry::new();
        let id = RequestId::generate();
        let rx = registry.register(id, TransportId::next(), method("echo"));

        assert!(registry.complete(id, ResponsePayload::ok(json!(42))));

        let outcome = rx.await.expect("sender kept").expect("ok payload");
        assert_eq!(outcome, ResponsePayload::ok(json!(42)));
        assert_eq!(registry.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_complete_unknown_id_is_noop() {
        let registry = RequestRegistry::new();
        assert!(!registry.complete(RequestId::generate(), ResponsePayload::ok(json!(null))));
    }

    #[tokio::test]
    async fn test_at_most_one_resolution() {
        let registry = RequestRegistry::new();
        let id = RequestId::generate();
        let _rx = registry.register(id, TransportId::next(), method("echo"));

        assert!(registry.complete(id, ResponsePayload::ok(json!(1))));
        // Second response for the same id finds nothing.
        assert!(!registry.complete(id, ResponsePayload::ok(json!(2))));
    }

    #[tokio::test]
    async fn test_late_response_after_remove_is_noop() {
        let registry = RequestRegistry::new();
        let id = RequestId::generate();
        let _rx = registry.register(id, TransportId::next(), method("echo"));

        assert!(registry.remove(id));
        assert!(!registry.complete(id, ResponsePayload::ok(json!(42))));
    }

    #[tokio::test]
    async fn test_cancel_all_scoped_to_transport() {
        let registry = RequestRegistry::new();
        let closed = TransportId::next();
        let alive = TransportId::next();

        let a = RequestId::generate();
        let b = RequestId::generate();
        let rx_a = registry.register(a, closed, method("echo"));
        let rx_b = registry.register(b, alive, method("echo"));

        assert_eq!(registry.cancel_all(closed), 1);

        let outcome = rx_a.await.expect("sender kept");
        assert!(matches!(outcome, Err(Error::TransportClosed)));

        // The other transport's request is still pending.
        assert_eq!(registry.pending_count(), 1);
        assert!(registry.complete(b, ResponsePayload::ok(json!("still alive"))));
        assert!(rx_b.await.expect("sender kept").is_ok());
    }

    #[tokio::test]
    async fn test_cancel_everything() {
        let registry = RequestRegistry::new();
        let transport = TransportId::next();

        let rx_a = registry.register(RequestId::generate(), transport, method("a"));
        let rx_b = registry.register(RequestId::generate(), transport, method("b"));

        assert_eq!(registry.cancel_everything(), 2);
        assert_eq!(registry.pending_count(), 0);

        assert!(matches!(rx_a.await.expect("sent"), Err(Error::TransportClosed)));
        assert!(matches!(rx_b.await.expect("sent"), Err(Error::TransportClosed)));
    }
}
