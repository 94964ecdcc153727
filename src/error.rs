//! Error types for the messaging layer.
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`].
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Transport | [`Error::TransportUnavailable`], [`Error::TransportClosed`] |
//! | Authentication | [`Error::OriginMismatch`] |
//! | Dispatch | [`Error::UnknownMethod`], [`Error::Handler`], [`Error::Timeout`] |
//! | Configuration | [`Error::DuplicateMethod`], [`Error::InvalidArgument`] |
//! | Protocol | [`Error::Protocol`], [`Error::Json`] |
//!
//! Errors that cross a context boundary are reduced to their kind and
//! message (see [`Error::to_wire`]); stack traces and local detail never
//! leave the failing context.

// ============================================================================
// Imports
// ============================================================================

use std::result::Result as StdResult;

use thiserror::Error;

use crate::identifiers::RequestId;
use crate::protocol::WireError;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Transport Errors
    // ========================================================================
    /// Send attempted on a closed or nonexistent channel.
    ///
    /// Fails immediately; this layer does not retry.
    #[error("Transport unavailable: {message}")]
    TransportUnavailable {
        /// Description of why the channel cannot be used.
        message: String,
    },

    /// Channel torn down while requests were in flight.
    ///
    /// Every request pending on the closed transport is rejected with this
    /// error in bulk.
    #[error("Transport closed")]
    TransportClosed,

    // ========================================================================
    // Authentication Errors
    // ========================================================================
    /// Inbound message failed origin/source authentication.
    ///
    /// Such messages are dropped and logged; no response is ever sent to the
    /// unauthenticated sender.
    #[error("Origin mismatch: {origin}")]
    OriginMismatch {
        /// The claimed origin that failed validation.
        origin: String,
    },

    // ========================================================================
    // Dispatch Errors
    // ========================================================================
    /// No handler and no forwarding route for the requested method.
    #[error("Unknown method: {method}")]
    UnknownMethod {
        /// The unrecognized method name.
        method: String,
    },

    /// A remote handler raised during execution.
    ///
    /// The original error's kind and message are preserved across the
    /// boundary; stack traces are not.
    #[error("Handler error ({kind}): {message}")]
    Handler {
        /// Error kind as reported by the failing context.
        kind: String,
        /// Error message as reported by the failing context.
        message: String,
    },

    /// Caller-configured deadline elapsed before any response arrived.
    ///
    /// A response arriving after this fires is discarded as stale.
    #[error("Request {request_id} timed out after {timeout_ms}ms")]
    Timeout {
        /// The request ID that timed out.
        request_id: RequestId,
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Registering the same method name twice.
    #[error("Duplicate method registration: {method}")]
    DuplicateMethod {
        /// The method name registered twice.
        method: String,
    },

    /// Invalid argument supplied to an operation or handler.
    #[error("Invalid argument: {message}")]
    InvalidArgument {
        /// Description of the invalid argument.
        message: String,
    },

    // ========================================================================
    // Protocol Errors
    // ========================================================================
    /// Protocol violation or malformed envelope.
    #[error("Protocol error: {message}")]
    Protocol {
        /// Description of the protocol violation.
        message: String,
    },

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a transport-unavailable error.
    #[inline]
    pub fn transport_unavailable(message: impl Into<String>) -> Self {
        Self::TransportUnavailable {
            message: message.into(),
        }
    }

    /// Creates an origin-mismatch error.
    #[inline]
    pub fn origin_mismatch(origin: impl Into<String>) -> Self {
        Self::OriginMismatch {
            origin: origin.into(),
        }
    }

    /// Creates an unknown-method error.
    #[inline]
    pub fn unknown_method(method: impl Into<String>) -> Self {
        Self::UnknownMethod {
            method: method.into(),
        }
    }

    /// Creates a handler error from a kind and message.
    #[inline]
    pub fn handler(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Handler {
            kind: kind.into(),
            message: message.into(),
        }
    }

    /// Creates a request timeout error.
    #[inline]
    pub fn timeout(request_id: RequestId, timeout_ms: u64) -> Self {
        Self::Timeout {
            request_id,
            timeout_ms,
        }
    }

    /// Creates a duplicate-method configuration error.
    #[inline]
    pub fn duplicate_method(method: impl Into<String>) -> Self {
        Self::DuplicateMethod {
            method: method.into(),
        }
    }

    /// Creates an invalid argument error.
    #[inline]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Creates a protocol error.
    #[inline]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a timeout error.
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Returns `true` if this is a transport error.
    #[inline]
    #[must_use]
    pub fn is_transport_error(&self) -> bool {
        matches!(
            self,
            Self::TransportUnavailable { .. } | Self::TransportClosed
        )
    }

    /// Returns `true` if this is a security rejection.
    ///
    /// Security rejections are resolved at the receiving boundary and never
    /// surface to the remote party.
    #[inline]
    #[must_use]
    pub fn is_security_error(&self) -> bool {
        matches!(self, Self::OriginMismatch { .. })
    }
}

// ============================================================================
// Wire Mapping
// ============================================================================

impl Error {
    /// Returns the stable kind string carried in error responses.
    #[must_use]
    pub fn kind(&self) -> &str {
        match self {
            Self::TransportUnavailable { .. } => "TransportUnavailable",
            Self::TransportClosed => "TransportClosed",
            Self::OriginMismatch { .. } => "OriginMismatch",
            Self::UnknownMethod { .. } => "UnknownMethod",
            Self::Handler { kind, .. } => kind,
            Self::Timeout { .. } => "Timeout",
            Self::DuplicateMethod { .. } => "DuplicateMethod",
            Self::InvalidArgument { .. } => "InvalidArgument",
            Self::Protocol { .. } => "Protocol",
            Self::Json(_) => "Protocol",
        }
    }

    /// Reduces this error to its wire form: kind and message only.
    #[must_use]
    pub fn to_wire(&self) -> WireError {
        let message = match self {
            Self::Handler { message, .. } => message.clone(),
            Self::UnknownMethod { method } => method.clone(),
            other => other.to_string(),
        };
        WireError {
            kind: self.kind().to_string(),
            message,
        }
    }

    /// Reconstructs an error from its wire form on the calling side.
    ///
    /// `UnknownMethod` keeps its own variant; every other kind is surfaced
    /// as [`Error::Handler`], preserving the remote kind and message.
    #[must_use]
    pub fn from_wire(wire: WireError) -> Self {
        match wire.kind.as_str() {
            "UnknownMethod" => Self::UnknownMethod {
                method: wire.message,
            },
            _ => Self::Handler {
                kind: wire.kind,
                message: wire.message,
            },
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::transport_unavailable("port closed");
        assert_eq!(err.to_string(), "Transport unavailable: port closed");

        let err = Error::unknown_method("translators.get");
        assert_eq!(err.to_string(), "Unknown method: translators.get");
    }

    #[test]
    fn test_is_timeout() {
        let timeout_err = Error::timeout(RequestId::generate(), 5000);
        let other_err = Error::TransportClosed;

        assert!(timeout_err.is_timeout());
        assert!(!other_err.is_timeout());
    }

    #[test]
    fn test_is_transport_error() {
        assert!(Error::TransportClosed.is_transport_error());
        assert!(Error::transport_unavailable("gone").is_transport_error());
        assert!(!Error::protocol("bad envelope").is_transport_error());
    }

    #[test]
    fn test_is_security_error() {
        assert!(Error::origin_mismatch("https://evil.example").is_security_error());
        assert!(!Error::TransportClosed.is_security_error());
    }

    #[test]
    fn test_wire_round_trip_preserves_kind_and_message() {
        let original = Error::handler("SelectItemsError", "no items to select");
        let wire = original.to_wire();
        assert_eq!(wire.kind, "SelectItemsError");
        assert_eq!(wire.message, "no items to select");

        let back = Error::from_wire(wire);
        match back {
            Error::Handler { kind, message } => {
                assert_eq!(kind, "SelectItemsError");
                assert_eq!(message, "no items to select");
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_method_survives_wire() {
        let wire = Error::unknown_method("ping").to_wire();
        assert_eq!(wire.kind, "UnknownMethod");

        let back = Error::from_wire(wire);
        assert!(matches!(back, Error::UnknownMethod { method } if method == "ping"));
    }

    #[test]
    fn test_from_json_error() {
        let json_err = serde_json::from_str::<String>("invalid").unwrap_err();
        let err: Error = json_err.into();
        assert_eq!(err.kind(), "Protocol");
    }
}
