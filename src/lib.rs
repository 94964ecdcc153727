//! Cross-context messaging/RPC for isolated browser-extension contexts.
//!
//! A browser extension runs as a set of isolated script environments (a
//! background service, content scripts inside arbitrary pages, privileged
//! extension pages, cross-origin helper iframes) connected only by
//! one-way, fire-and-forget postable-message primitives. This crate
//! synthesizes bidirectional request/response semantics on top of them:
//! named operations, correlated results, routing across intermediate
//! contexts, and deterministic failure when a context disappears.
//!
//! # Architecture
//!
//! Each [`Context`] owns its method table, its pending-request table, and
//! the transports connecting it to its neighbors; there is no ambient
//! global state. A single dispatch loop per context decides, for every
//! inbound envelope, whether to resolve a pending call, invoke a local
//! handler, relay the envelope toward its destination, or synthesize an
//! error response.
//!
//! Key guarantees:
//!
//! - A request resolves exactly once: with its handler's result, a carried
//!   error, `UnknownMethod`, `Timeout`, or `TransportClosed`.
//! - The request ID survives unchanged across any number of forwarding
//!   hops; intermediate contexts are pure relays.
//! - Messages failing origin/source authentication are dropped and counted,
//!   never answered.
//!
//! # Quick Start
//!
//! ```no_run
//! use connector_messaging::{
//!     Context, ContextId, MethodName, MethodRegistration, Result, runtime_channel,
//! };
//! use serde_json::{Value, json};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let (background_port, content_port) = runtime_channel();
//!
//!     // Background owns the handler.
//!     let _background = Context::builder(ContextId::new("background")?)
//!         .register(
//!             MethodRegistration::new(MethodName::new("echo")?)
//!                 .handler(|args| async move {
//!                     Ok(args.into_iter().next().unwrap_or(Value::Null))
//!                 }),
//!         )
//!         .transport(background_port)
//!         .build()?;
//!
//!     // Content calls it across the runtime channel.
//!     let content = Context::builder(ContextId::new("content-1")?)
//!         .transport(content_port)
//!         .build()?;
//!
//!     let answer = content.call(&MethodName::new("echo")?, vec![json!(42)]).await?;
//!     assert_eq!(answer, json!(42));
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`context`] | [`Context`], its builder, and the dispatch loop |
//! | [`error`] | Error taxonomy and [`Result`] alias |
//! | [`http`] | The `http.request` relay method |
//! | [`identifiers`] | Type-safe ID wrappers |
//! | [`protocol`] | Wire envelopes and the per-method codec |
//! | [`registry`] | Method table and pending-request table |
//! | [`transport`] | Runtime and frame channel adapters |

// ============================================================================
// Modules
// ============================================================================

/// Execution contexts and the dispatch loop.
///
/// Use [`Context::builder()`] to configure a context's methods, transports,
/// and routes.
pub mod context;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// HTTP relay method for sandboxed contexts.
pub mod http;

/// Type-safe identifiers for messaging entities.
///
/// Newtype wrappers prevent mixing incompatible IDs at compile time.
pub mod identifiers;

/// Wire protocol: envelopes and the codec that builds them.
pub mod protocol;

/// Per-context registries: methods and pending requests.
pub mod registry;

/// Channel adapters between isolated contexts.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Context types
pub use context::{Context, ContextBuilder};

// Error types
pub use error::{Error, Result};

// HTTP relay types
pub use http::{
    HttpExecutor, OutboundRequest, RELAY_METHOD, RawResponse, RelayResponse,
    http_relay_registration, parse_raw_headers,
};

// Identifier types
pub use identifiers::{ContextId, MethodName, RequestId, TransportId};

// Protocol types
pub use protocol::{Body, Codec, Envelope, ResponsePayload, WireError};

// Registry types
pub use registry::{
    HandlerRegistry, HandlerRegistryBuilder, MethodRegistration, RequestRegistry,
};

// Transport types
pub use transport::{
    FrameEndpoint, FramePolicy, FramePort, FramePoster, READY_SENTINEL, RuntimePort, Transport,
    TransportEvent, WindowToken, frame_channel, runtime_channel,
};
