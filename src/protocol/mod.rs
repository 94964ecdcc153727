//! Wire protocol: envelopes and the codec that builds them.
//!
//! # Protocol Overview
//!
//! | Message | Direction | Purpose |
//! |---------|-----------|---------|
//! | `request` | caller → handler | Invoke a named remote operation |
//! | `response` | handler → caller | Deliver the correlated outcome |
//!
//! Method names follow the `module.methodName` convention, e.g.
//! `translators.get` or `http.request`.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `envelope` | Envelope, body, and wire error types |
//! | `codec` | Per-method pre-send / post-receive transforms |

// ============================================================================
// Submodules
// ============================================================================

/// Envelope and wire error types.
pub mod envelope;

/// Per-method transformation at the wire boundary.
pub mod codec;

// ============================================================================
// Re-exports
// ============================================================================

pub use codec::Codec;
pub use envelope::{Body, Envelope, ResponsePayload, WireError};
