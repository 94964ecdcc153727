//! Channel adapters between isolated contexts.
//!
//! Each transport connects exactly two contexts over a one-way,
//! fire-and-forget physical primitive and synthesizes reliable event
//! delivery (inbound envelopes, close notification) on top of it.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  runtime channel   ┌──────────────┐
//! │  Background  │◄──────────────────►│   Content    │
//! │   context    │                    │   context    │
//! └──────────────┘                    └──────┬───────┘
//!                                            │ frame channel
//!                                            │ (origin-checked)
//!                                     ┌──────▼───────┐
//!                                     │ Helper iframe│
//!                                     │   context    │
//!                                     └──────────────┘
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `adapter` | The [`Transport`] trait and [`TransportEvent`] |
//! | `channel` | In-process extension-runtime port pair |
//! | `frame` | `postMessage`-style port with origin/source authentication |

// ============================================================================
// Submodules
// ============================================================================

/// Transport trait and events.
pub mod adapter;

/// Extension-runtime channel between trusted contexts.
pub mod channel;

/// Cross-origin frame channel with authentication and handshake.
pub mod frame;

// ============================================================================
// Re-exports
// ============================================================================

pub use adapter::{EventSender, Transport, TransportEvent};
pub use channel::{RuntimePort, runtime_channel};
pub use frame::{
    FrameEndpoint, FramePolicy, FramePort, FramePoster, READY_SENTINEL, WindowToken, frame_channel,
};
