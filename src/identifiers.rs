//! Type-safe identifiers for messaging entities.
//!
//! Newtype wrappers prevent mixing incompatible IDs at compile time:
//!
//! | Type | Identifies | Generation |
//! |------|-----------|------------|
//! | [`RequestId`] | One logical call, end-to-end across hops | Random UUID v4 |
//! | [`ContextId`] | One isolated execution context | Caller-chosen name |
//! | [`TransportId`] | One attached channel within a process | Monotonic counter |
//! | [`MethodName`] | One remote operation | Caller-chosen, `module.method` style |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

// ============================================================================
// RequestId
// ============================================================================

/// Unique identifier correlating a request with its response.
///
/// Generated by the calling context and echoed unchanged in the matching
/// response, across any number of forwarding hops. UUID v4 gives far more
/// than the required 48 bits of entropy, so collisions within a context's
/// lifetime are effectively impossible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(Uuid);

impl RequestId {
    /// Generates a fresh random request ID.
    #[inline]
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// ============================================================================
// ContextId
// ============================================================================

/// Name of one isolated execution context participating in the protocol.
///
/// Examples: `"background"`, `"content-42"`, `"helper-iframe"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContextId(String);

impl ContextId {
    /// Creates a context ID.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if the name is empty.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(Error::invalid_argument("context id must not be empty"));
        }
        Ok(Self(name))
    }

    /// Returns the context name as a string slice.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// TransportId
// ============================================================================

/// Process-local identifier for one attached transport.
///
/// Never crosses the wire; used to key pending requests and routes to the
/// channel they belong to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransportId(u64);

/// Counter for transport IDs within this process.
static NEXT_TRANSPORT_ID: AtomicU64 = AtomicU64::new(1);

impl TransportId {
    /// Allocates the next transport ID.
    #[inline]
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_TRANSPORT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for TransportId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// ============================================================================
// MethodName
// ============================================================================

/// Name of a remote operation, conventionally `module.methodName`.
///
/// The dotted form mirrors how handlers are organized, but a bare name is
/// also valid; only emptiness is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MethodName(String);

impl MethodName {
    /// Creates a method name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if the name is empty.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(Error::invalid_argument("method name must not be empty"));
        }
        Ok(Self(name))
    }

    /// Returns the method name as a string slice.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the `module` part of a dotted `module.methodName`, if any.
    #[inline]
    #[must_use]
    pub fn module(&self) -> Option<&str> {
        self.0.split_once('.').map(|(module, _)| module)
    }
}

impl fmt::Display for MethodName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Tests
// ============================================================================
