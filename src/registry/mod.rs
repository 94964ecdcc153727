//! Per-context registries: methods and pending requests.
//!
//! Every context owns exactly one of each:
//!
//! | Registry | Holds | Mutability |
//! |----------|-------|-----------|
//! | [`HandlerRegistry`] | Method name → registration (handler + hooks) | Immutable after build |
//! | [`RequestRegistry`] | Request ID → pending continuation | Mutated per call |

// ============================================================================
// Submodules
// ============================================================================

/// Method registration table.
pub mod handlers;

/// Pending-request table.
pub mod pending;

// ============================================================================
// Re-exports
// ============================================================================

pub use handlers::{
    Handler, HandlerRegistry, HandlerRegistryBuilder, MethodRegistration, PostReceiveHook,
    PreSendHook,
};
pub use pending::{CompletionReceiver, RequestRegistry};
