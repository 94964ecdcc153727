//! Method registration table.
//!
//! Each context holds one [`HandlerRegistry`]: an immutable mapping from
//! method name to [`MethodRegistration`], built once at startup through
//! [`HandlerRegistryBuilder`]. There is no runtime mutation of the table;
//! a context's remote surface is fixed when it is constructed.
//!
//! A registration does not have to carry a handler. Calling contexts
//! register hook-only entries for methods they invoke remotely (the hooks
//! run in the caller), while the owning context registers the handler.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use futures_util::future::BoxFuture;
use rustc_hash::FxHashMap;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::identifiers::MethodName;

// ============================================================================
// Function Types
// ============================================================================

/// Async handler implementing a named remote operation.
///
/// Receives the decoded argument list and produces the (untransformed)
/// result value.
pub type Handler = Arc<dyn Fn(Vec<Value>) -> BoxFuture<'static, Result<Value>> + Send + Sync>;

/// Caller-side transform applied to the argument list before transmission.
///
/// Must be pure: payload in, payload out, no I/O.
pub type PreSendHook = Arc<dyn Fn(Vec<Value>) -> Result<Vec<Value>> + Send + Sync>;

/// Caller-side transform applied to the success value after a response.
///
/// Must be pure: payload in, payload out, no I/O.
pub type PostReceiveHook = Arc<dyn Fn(Value) -> Result<Value> + Send + Sync>;

// ============================================================================
// MethodRegistration
// ============================================================================

/// Declarative description of one remote operation.
#[derive(Clone)]
pub struct MethodRegistration {
    method: MethodName,
    handler: Option<Handler>,
    pre_send: Option<PreSendHook>,
    post_receive: Option<PostReceiveHook>,
    expects_response: bool,
    min_args: usize,
}

impl MethodRegistration {
    /// Creates a registration for `method` with no handler and no hooks.
    #[must_use]
    pub fn new(method: MethodName) -> Self {
        Self {
            method,
            handler: None,
            pre_send: None,
            post_receive: None,
            expects_response: true,
            min_args: 0,
        }
    }

    /// Sets the async handler implementing this method.
    #[must_use]
    pub fn handler<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        self.handler = Some(Arc::new(move |args| Box::pin(f(args))));
        self
    }

    /// Sets the caller-side pre-send transform for the argument list.
    #[must_use]
    pub fn pre_send<F>(mut self, f: F) -> Self
    where
        F: Fn(Vec<Value>) -> Result<Vec<Value>> + Send + Sync + 'static,
    {
        self.pre_send = Some(Arc::new(f));
        self
    }

    /// Sets the caller-side post-receive transform for the success value.
    #[must_use]
    pub fn post_receive<F>(mut self, f: F) -> Self
    where
        F: Fn(Value) -> Result<Value> + Send + Sync + 'static,
    {
        self.post_receive = Some(Arc::new(f));
        self
    }

    /// Marks this method fire-and-forget: handlers run, but no response
    /// envelope is ever produced.
    #[must_use]
    pub fn no_response(mut self) -> Self {
        self.expects_response = false;
        self
    }

    /// Requires at least `n` arguments; missing trailing arguments are
    /// padded with null before handler invocation.
    #[must_use]
    pub fn min_args(mut self, n: usize) -> Self {
        self.min_args = n;
        self
    }

    /// Returns the method name.
    #[inline]
    #[must_use]
    pub fn method(&self) -> &MethodName {
        &self.method
    }

    /// Returns the handler, if this registration carries one.
    #[inline]
    #[must_use]
    pub fn handler_fn(&self) -> Option<&Handler> {
        self.handler.as_ref()
    }

    /// Returns the pre-send hook, if any.
    #[inline]
    #[must_use]
    pub fn pre_send_hook(&self) -> Option<&PreSendHook> {
        self.pre_send.as_ref()
    }

    /// Returns the post-receive hook, if any.
    #[inline]
    #[must_use]
    pub fn post_receive_hook(&self) -> Option<&PostReceiveHook> {
        self.post_receive.as_ref()
    }

    /// Returns `true` if calls to this method produce a response.
    #[inline]
    #[must_use]
    pub fn expects_response(&self) -> bool {
        self.expects_response
    }

    /// Returns the minimum argument count.
    #[inline]
    #[must_use]
    pub fn min_args_count(&self) -> usize {
        self.min_args
    }
}

impl std::fmt::Debug for MethodRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MethodRegistration")
            .field("method", &self.method)
            .field("has_handler", &self.handler.is_some())
            .field("has_pre_send", &self.pre_send.is_some())
            .field("has_post_receive", &self.post_receive.is_some())
            .field("expects_response", &self.expects_response)
            .field("min_args", &self.min_args)
            .finish()
    }
}

// ============================================================================
// HandlerRegistry
// ============================================================================

/// Immutable per-context table from method name to registration.
#[derive(Debug, Default)]
pub struct HandlerRegistry {
    methods: FxHashMap<MethodName, MethodRegistration>,
}

impl HandlerRegistry {
    /// Starts building a registry.
    #[inline]
    #[must_use]
    pub fn builder() -> HandlerRegistryBuilder {
        HandlerRegistryBuilder::default()
    }

    /// Looks up the registration for `method`.
    #[inline]
    #[must_use]
    pub fn get(&self, method: &MethodName) -> Option<&MethodRegistration> {
        self.methods.get(method)
    }

    /// Returns `true` if `method` is registered with a handler here.
    #[inline]
    #[must_use]
    pub fn owns(&self, method: &MethodName) -> bool {
        self.methods
            .get(method)
            .is_some_and(|reg| reg.handler.is_some())
    }

    /// Returns the number of registered methods.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.methods.len()
    }

    /// Returns `true` if no methods are registered.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

// ============================================================================
// HandlerRegistryBuilder
// ============================================================================

/// Builds a [`HandlerRegistry`] at context startup.
#[derive(Debug, Default)]
pub struct HandlerRegistryBuilder {
    methods: FxHashMap<MethodName, MethodRegistration>,
}

impl HandlerRegistryBuilder {
    /// Adds a registration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateMethod`] if the name is already taken.
    pub fn register(mut self, registration: MethodRegistration) -> Result<Self> {
        let method = registration.method.clone();
        if self.methods.contains_key(&method) {
            return Err(Error::duplicate_method(method.as_str()));
        }
        self.methods.insert(method, registration);
        Ok(self)
    }

    /// Finalizes the registry.
    #[must_use]
    pub fn build(self) -> HandlerRegistry {
        HandlerRegistry {
            methods: self.methods,
        }
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

    #[test]
    fn test_duplicate_registration_is_config_error() {
        let result = HandlerRegistry::builder()
            .register(MethodRegistration::new(method("echo")))
            .expect("first registration")
            .register(MethodRegistration::new(method("echo")));

        match result {
            Err(Error::DuplicateMethod { method }) => assert_eq!(method, "echo"),
            other => panic!("expected duplicate-method error, got {other:?}"),
        }
    }

    #[test]
    fn test_owns_requires_handler() {
        let registry = HandlerRegistry::builder()
            .register(
                MethodRegistration::new(method("echo"))
                    .handler(|args| async move { Ok(args.into_iter().next().unwrap_or(Value::Null)) }),
            )
            .expect("register")
            .register(
                MethodRegistration::new(method("translators.get")).post_receive(|value| Ok(value)),
            )
            .expect("register")
            .build();

        assert!(registry.owns(&method("echo")));
        // Hook-only entry: the caller knows the method but does not own it.
        assert!(!registry.owns(&method("translators.get")));
        assert!(!registry.owns(&method("missing")));
    }

    async fn invoke(registry: &HandlerRegistry, name: &str, args: Vec<Value>) -> Result<Value> {
        let registration = registry.get(&method(name)).expect("registered");
        let handler = registration.handler_fn().expect("has handler");
        handler(args).await
    }

    #[tokio::test]
    async fn test_handler_invocation() {
        let registry = HandlerRegistry::builder()
            .register(MethodRegistration::new(method("add")).handler(|args| async move {
                let a = args.first().and_then(Value::as_i64).unwrap_or(0);
                let b = args.get(1).and_then(Value::as_i64).unwrap_or(0);
                Ok(json!(a + b))
            }))
            .expect("register")
            .build();

        let sum = invoke(&registry, "add", vec![json!(3), json!(4)])
            .await
            .expect("handler result");
        assert_eq!(sum, json!(7));
    }

    #[test]
    fn test_registration_flags() {
        let registration = MethodRegistration::new(method("progress.update"))
            .no_response()
            .min_args(2);

        assert!(!registration.expects_response());
        assert_eq!(registration.min_args_count(), 2);
        assert!(registration.handler_fn().is_none());
    }
}
