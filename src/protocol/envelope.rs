//! Wire envelope types.
//!
//! An [`Envelope`] is the self-contained unit exchanged over a transport.
//! Envelopes are immutable values: a forwarding context relays them
//! verbatim, and the request ID survives unchanged across every hop.
//!
//! # Format
//!
//! Request:
//! ```json
//! {
//!   "requestId": "uuid",
//!   "sourceContextId": "content-1",
//!   "targetHint": "background",
//!   "direction": "request",
//!   "method": "module.methodName",
//!   "payload": [ ... ],
//!   "expectsResponse": true
//! }
//! ```
//!
//! Response:
//! ```json
//! {
//!   "requestId": "uuid",
//!   "sourceContextId": "background",
//!   "direction": "response",
//!   "payload": { "status": "ok", "value": ... }
//! }
//! ```

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::identifiers::{ContextId, MethodName, RequestId};

// ============================================================================
// Envelope
// ============================================================================

/// Unit exchanged on the wire: one request or one response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Correlation identifier, generated by the caller and echoed unchanged
    /// in the matching response.
    #[serde(rename = "requestId")]
    pub request_id: RequestId,

    /// Context that produced this envelope.
    #[serde(rename = "sourceContextId")]
    pub source: ContextId,

    /// Intended destination context, used by routers to pick a next hop.
    #[serde(
        rename = "targetHint",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub target: Option<ContextId>,

    /// Direction-tagged body.
    #[serde(flatten)]
    pub body: Body,
}

impl Envelope {
    /// Builds a request envelope with a freshly generated request ID.
    #[must_use]
    pub fn request(
        source: ContextId,
        target: Option<ContextId>,
        method: MethodName,
        payload: Vec<Value>,
        expects_response: bool,
    ) -> Self {
        Self {
            request_id: RequestId::generate(),
            source,
            target,
            body: Body::Request {
                method,
                payload,
                expects_response,
            },
        }
    }

    /// Builds a response envelope echoing `request_id`.
    #[must_use]
    pub fn response(source: ContextId, request_id: RequestId, payload: ResponsePayload) -> Self {
        Self {
            request_id,
            source,
            target: None,
            body: Body::Response { payload },
        }
    }

    /// Returns `true` if this is a request envelope.
    #[inline]
    #[must_use]
    pub fn is_request(&self) -> bool {
        matches!(self.body, Body::Request { .. })
    }

    /// Returns `true` if this is a response envelope.
    #[inline]
    #[must_use]
    pub fn is_response(&self) -> bool {
        matches!(self.body, Body::Response { .. })
    }

    /// Returns the method name for request envelopes.
    #[inline]
    #[must_use]
    pub fn method(&self) -> Option<&MethodName> {
        match &self.body {
            Body::Request { method, .. } => Some(method),
            Body::Response { .. } => None,
        }
    }
}

// ============================================================================
// Body
// ============================================================================

/// Direction-tagged envelope body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "direction", rename_all = "lowercase")]
pub enum Body {
    /// A call to a named remote operation.
    Request {
        /// Name of the remote operation.
        method: MethodName,
        /// Transformed argument values, in call order.
        payload: Vec<Value>,
        /// `false` marks a fire-and-forget notification; no response envelope
        /// will ever be produced for it.
        #[serde(rename = "expectsResponse", default = "default_true")]
        expects_response: bool,
    },
    /// The outcome of a previously issued request.
    Response {
        /// Success value or carried error.
        payload: ResponsePayload,
    },
}

fn default_true() -> bool {
    true
}

// ============================================================================
// ResponsePayload
// ============================================================================

/// Outcome carried by a response envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ResponsePayload {
    /// Successful completion.
    Ok {
        /// The handler's (transformed) return value; absent means null.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<Value>,
    },
    /// Failed completion.
    Error {
        /// Kind and message of the failure.
        error: WireError,
    },
}

impl ResponsePayload {
    /// Builds a success payload.
    #[inline]
    #[must_use]
    pub fn ok(value: Value) -> Self {
        Self::Ok {
            value: if value.is_null() { None } else { Some(value) },
        }
    }

    /// Builds an error payload.
    #[inline]
    #[must_use]
    pub fn error(error: WireError) -> Self {
        Self::Error { error }
    }

    /// Returns `true` if this payload carries a success value.
    #[inline]
    #[must_use]
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok { .. })
    }
}

// ============================================================================
// WireError
// ============================================================================

/// The transport-safe form of an error: kind and message only.
///
/// Stack traces and context-local detail never cross a boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireError {
    /// Stable error kind, e.g. `"UnknownMethod"`.
    pub kind: String,
    /// Human-readable message from the failing context.
    pub message: String,
}

// ============================================================================
// Tests
// ============================================================================
