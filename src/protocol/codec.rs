//! Envelope codec: argument/result transformation at the wire boundary.
//!
//! Some values cannot cross a context boundary as-is (a live object backed
//! by context-local state, for example) and must be flattened to a plain
//! structural form before transmission and rebuilt afterwards. The codec
//! applies these per-method transforms:
//!
//! - `preSend` runs in the *calling* context, over the argument list, before
//!   the request envelope is built;
//! - `postReceive` runs in the *calling* context, over the success value,
//!   after the response envelope arrives.
//!
//! Hooks are pure functions over payload values. They must not perform I/O;
//! this keeps the protocol deterministic and replayable in tests.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use serde_json::Value;

use crate::error::{Error, Result};
use crate::identifiers::{ContextId, MethodName, RequestId};
use crate::registry::HandlerRegistry;

use super::{Envelope, ResponsePayload};

// ============================================================================
// Codec
// ============================================================================

/// Converts calls and outcomes to and from wire envelopes.
///
/// Holds a shared reference to the context's method table so it can look up
/// per-method hooks on both the sending and the resolving side.
#[derive(Clone)]
pub struct Codec {
    methods: Arc<HandlerRegistry>,
}

impl Codec {
    /// Creates a codec over the given method table.
    #[inline]
    #[must_use]
    pub fn new(methods: Arc<HandlerRegistry>) -> Self {
        Self { methods }
    }

    /// Encodes a call into a request envelope with a fresh request ID.
    ///
    /// Applies the method's `preSend` hook to `args` first, if one is
    /// registered.
    ///
    /// # Errors
    ///
    /// Returns whatever error the `preSend` hook raises.
    pub fn encode_request(
        &self,
        source: ContextId,
        target: Option<ContextId>,
        method: &MethodName,
        args: Vec<Value>,
        expects_response: bool,
    ) -> Result<Envelope> {
        let args = match self.methods.get(method).and_then(|reg| reg.pre_send_hook()) {
            Some(hook) => hook(args)?,
            None => args,
        };

        Ok(Envelope::request(
            source,
            target,
            method.clone(),
            args,
            expects_response,
        ))
    }

    /// Decodes a response payload into the caller-visible outcome.
    ///
    /// On success, applies the method's `postReceive` hook to reconstruct a
    /// live value from the plain structural form.
    ///
    /// # Errors
    ///
    /// Returns the carried error for `status: error` payloads, or whatever
    /// error the `postReceive` hook raises.
    pub fn decode_response(&self, method: &MethodName, payload: ResponsePayload) -> Result<Value> {
        match payload {
            ResponsePayload::Ok { value } => {
                let value = value.unwrap_or(Value::Null);
                match self
                    .methods
                    .get(method)
                    .and_then(|reg| reg.post_receive_hook())
                {
                    Some(hook) => hook(value),
                    None => Ok(value),
                }
            }
            ResponsePayload::Error { error } => Err(Error::from_wire(error)),
        }
    }

    /// Encodes a handler outcome into a response envelope.
    #[must_use]
    pub fn encode_response(
        &self,
        source: ContextId,
        request_id: RequestId,
        outcome: Result<Value>,
    ) -> Envelope {
        let payload = match outcome {
            Ok(value) => ResponsePayload::ok(value),
            Err(error) => ResponsePayload::error(error.to_wire()),
        };
        Envelope::response(source, request_id, payload)
    }

    /// Decodes request arguments on the handling side.
    ///
    /// Pads missing trailing arguments with null up to the method's
    /// registered minimum.
    #[must_use]
    pub fn decode_request(&self, method: &MethodName, mut payload: Vec<Value>) -> Vec<Value> {
        if let Some(registration) = self.methods.get(method) {
            while payload.len() < registration.min_args_count() {
                payload.push(Value::Null);
            }
        }
        payload
    }

    /// Returns `true` if `method` is registered as call/response (rather
    /// than fire-and-forget). Unregistered methods default to `true`.
    #[inline]
    #[must_use]
    pub fn expects_response(&self, method: &MethodName) -> bool {
        self.methods
            .get(method)
            .is_none_or(|reg| reg.expects_response())
    }
}

// ============================================================================
// Tests
// ============================================================================
