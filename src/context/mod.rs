//! Execution contexts and the dispatch loop.
//!
//! A [`Context`] is one isolated script environment participating in the
//! protocol: a background service, a content script instance, an extension
//! page, or a helper iframe. It owns its method table, its pending-request
//! table, and the transports connecting it to its neighbors; there is no
//! ambient global state.
//!
//! # Dispatch
//!
//! Every context runs a single dispatch loop as a tokio task. On each
//! inbound envelope the loop decides, in order:
//!
//! 1. **Response**: resolve the matching local pending request, or relay
//!    it back over the transport the request originally arrived on.
//! 2. **Request with a local handler**: spawn the handler invocation and
//!    respond on the arriving transport with the same request ID. The loop
//!    itself never awaits a handler.
//! 3. **Request with a known next hop**: forward the envelope verbatim
//!    (same ID, same payload) toward its destination.
//! 4. **Neither**: synthesize an `UnknownMethod` error response; a request
//!    never hangs from the protocol's own perspective.
//!
//! # Example
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
//!     let content = Context::builder(ContextId::new("content-1")?)
//!         .transport(content_port)
//!         .build()?;
//!
//!     let answer = content.call(&MethodName::new("echo")?, vec![json!(42)]).await?;
//!     assert_eq!(answer, json!(42));
//!     Ok(())
//! }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::identifiers::{ContextId, MethodName, RequestId, TransportId};
use crate::protocol::{Body, Codec, Envelope};
use crate::registry::{
    HandlerRegistry, HandlerRegistryBuilder, MethodRegistration, RequestRegistry,
};
use crate::transport::{Transport, TransportEvent};

// ============================================================================
// Types
// ============================================================================

/// Transports attached to a context, keyed by id.
type TransportMap = FxHashMap<TransportId, Arc<dyn Transport>>;

// ============================================================================
// ContextCommand
// ============================================================================

/// Internal commands for the dispatch loop.
enum ContextCommand {
    /// Tear the context down.
    Shutdown,
}

// ============================================================================
// Context
// ============================================================================

/// One isolated execution environment participating in the protocol.
///
/// Constructed through [`Context::builder`]; the method table and routing
/// table are fixed at build time. Tear down explicitly with
/// [`shutdown`](Self::shutdown), which rejects every pending request.
///
/// # Thread Safety
///
/// `Context` is `Send + Sync`; calls may be issued concurrently from any
/// number of tasks, each tracked independently by request ID.
pub struct Context {
    /// This context's identity, stamped on every envelope it produces.
    id: ContextId,
    /// Envelope codec over the method table.
    codec: Codec,
    /// Outstanding calls issued by this context.
    pending: Arc<RequestRegistry>,
    /// Attached transports (shared with the dispatch loop, which removes
    /// entries as channels close).
    transports: Arc<RwLock<TransportMap>>,
    /// Destination context → transport carrying traffic toward it.
    routes: Arc<FxHashMap<ContextId, TransportId>>,
    /// Transport for destinations not in the routing table.
    default_route: Option<TransportId>,
    /// Channel for sending commands to the dispatch loop.
    command_tx: mpsc::UnboundedSender<ContextCommand>,
}

impl Context {
    /// Starts building a context.
    #[inline]
    #[must_use]
    pub fn builder(id: ContextId) -> ContextBuilder {
        ContextBuilder::new(id)
    }

    /// Returns this context's identity.
    #[inline]
    #[must_use]
    pub fn id(&self) -> &ContextId {
        &self.id
    }

    /// Returns the number of calls awaiting a response.
    #[inline]
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.pending_count()
    }

    /// Invokes a remote method and waits for its outcome.
    ///
    /// No deadline is applied: a caller that omits a timeout accepts
    /// indefinite waiting. For fire-and-forget methods (registered with
    /// `no_response`) this returns null as soon as the request is sent.
    ///
    /// # Errors
    ///
    /// Rejects with the error carried in the response, or with a transport
    /// error if the request could not be sent or the channel closed while
    /// the call was in flight.
    pub async fn call(&self, method: &MethodName, args: Vec<Value>) -> Result<Value> {
        self.issue(None, method, args, None).await
    }

    /// Invokes a remote method with a caller-side deadline.
    ///
    /// # Errors
    ///
    /// Rejects with [`Error::Timeout`] if no response arrives in time; a
    /// response arriving later is discarded as stale.
    pub async fn call_with_timeout(
        &self,
        method: &MethodName,
        args: Vec<Value>,
        deadline: Duration,
    ) -> Result<Value> {
        self.issue(None, method, args, Some(deadline)).await
    }

    /// Invokes a remote method addressed to a specific destination context.
    ///
    /// The destination is carried as the envelope's target hint, letting
    /// intermediate contexts pick the right next hop.
    ///
    /// # Errors
    ///
    /// As [`call`](Self::call), plus [`Error::TransportUnavailable`] if no
    /// route toward the destination is configured.
    pub async fn call_target(
        &self,
        target: ContextId,
        method: &MethodName,
        args: Vec<Value>,
    ) -> Result<Value> {
        self.issue(Some(target), method, args, None).await
    }

    /// Sends a fire-and-forget notification.
    ///
    /// The remote handler runs, but no response envelope is ever produced
    /// and no pending entry is created.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TransportUnavailable`] if the request could not be
    /// sent.
    pub fn notify(&self, method: &MethodName, args: Vec<Value>) -> Result<()> {
        let envelope = self
            .codec
            .encode_request(self.id.clone(), None, method, args, false)?;
        let transport = self.outbound_transport(None)?;
        transport.send(&envelope)
    }

    /// Tears the context down.
    ///
    /// Every pending request is rejected with
    /// [`Error::TransportClosed`]; in-flight handler results are abandoned.
    pub fn shutdown(&self) {
        let _ = self.command_tx.send(ContextCommand::Shutdown);
    }

    /// Issues one call: encode, register, send, await.
    async fn issue(
        &self,
        target: Option<ContextId>,
        method: &MethodName,
        args: Vec<Value>,
        deadline: Option<Duration>,
    ) -> Result<Value> {
        let expects_response = self.codec.expects_response(method);
        let envelope = self.codec.encode_request(
            self.id.clone(),
            target.clone(),
            method,
            args,
            expects_response,
        )?;
        let request_id = envelope.request_id;
        let transport = self.outbound_transport(target.as_ref())?;

        if !expects_response {
            transport.send(&envelope)?;
            return Ok(Value::Null);
        }

        // Register before sending so a fast response always finds the entry.
        let completion = self
            .pending
            .register(request_id, transport.id(), method.clone());

        if let Err(err) = transport.send(&envelope) {
            self.pending.remove(request_id);
            return Err(err);
        }
        trace!(%request_id, %method, "Request sent");

        let outcome = match deadline {
            Some(deadline) => match timeout(deadline, completion).await {
                Ok(received) => received,
                Err(_) => {
                    // Expired: remove the entry so a late response is a no-op.
                    self.pending.remove(request_id);
                    return Err(Error::timeout(request_id, deadline.as_millis() as u64));
                }
            },
            None => completion.await,
        };

        match outcome {
            Ok(Ok(payload)) => self.codec.decode_response(method, payload),
            Ok(Err(err)) => Err(err),
            // Sender dropped without resolving; only happens at teardown.
            Err(_) => Err(Error::TransportClosed),
        }
    }

    /// Picks the transport carrying traffic toward `target`.
    fn outbound_transport(&self, target: Option<&ContextId>) -> Result<Arc<dyn Transport>> {
        let via = target
            .and_then(|destination| self.routes.get(destination).copied())
            .or(self.default_route)
            .ok_or_else(|| Error::transport_unavailable("no route to destination"))?;

        self.transports
            .read()
            .get(&via)
            .cloned()
            .ok_or_else(|| Error::transport_unavailable("transport detached"))
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("id", &self.id)
            .field("pending", &self.pending.pending_count())
            .field("transports", &self.transports.read().len())
            .finish()
    }
}

// ============================================================================
// ContextBuilder
// ============================================================================

/// Builder for configuring a [`Context`].
///
/// Use [`Context::builder()`] to create one.
pub struct ContextBuilder {
    id: ContextId,
    registrations: Vec<MethodRegistration>,
    transports: Vec<Arc<dyn Transport>>,
    routes: Vec<(ContextId, TransportId)>,
    default_route: Option<TransportId>,
}

impl ContextBuilder {
    /// Creates a builder for a context named `id`.
    #[must_use]
    fn new(id: ContextId) -> Self {
        Self {
            id,
            registrations: Vec::new(),
            transports: Vec::new(),
            routes: Vec::new(),
            default_route: None,
        }
    }

    /// Adds a method registration: a handler this context owns, or
    /// caller-side hooks for a method it invokes remotely.
    #[must_use]
    pub fn register(mut self, registration: MethodRegistration) -> Self {
        self.registrations.push(registration);
        self
    }

    /// Attaches a transport. The transport starts delivering events when
    /// the context is built.
    #[must_use]
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transports.push(transport);
        self
    }

    /// Routes traffic addressed to `destination` over the transport `via`.
    #[must_use]
    pub fn route(mut self, destination: ContextId, via: TransportId) -> Self {
        self.routes.push((destination, via));
        self
    }

    /// Sets the next hop for destinations absent from the routing table.
    ///
    /// Defaults to the only transport when exactly one is attached.
    #[must_use]
    pub fn default_route(mut self, via: TransportId) -> Self {
        self.default_route = Some(via);
        self
    }

    /// Builds the context, starts its transports, and spawns its dispatch
    /// loop.
    ///
    /// # Errors
    ///
    /// - [`Error::DuplicateMethod`] if two registrations share a name
    /// - [`Error::InvalidArgument`] if a route names an unattached transport
    pub fn build(self) -> Result<Context> {
        let mut methods = HandlerRegistryBuilder::default();
        for registration in self.registrations {
            methods = methods.register(registration)?;
        }
        let methods = Arc::new(methods.build());

        let mut transport_map = TransportMap::default();
        for transport in self.transports {
            transport_map.insert(transport.id(), transport);
        }

        let mut routes = FxHashMap::default();
        for (destination, via) in self.routes {
            if !transport_map.contains_key(&via) {
                return Err(Error::invalid_argument(format!(
                    "route to {destination} references unattached transport {via}"
                )));
            }
            routes.insert(destination, via);
        }

        let default_route = match self.default_route {
            Some(via) => {
                if !transport_map.contains_key(&via) {
                    return Err(Error::invalid_argument(format!(
                        "default route references unattached transport {via}"
                    )));
                }
                Some(via)
            }
            None if transport_map.len() == 1 => transport_map.keys().next().copied(),
            None => None,
        };

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        for transport in transport_map.values() {
            transport.start(events_tx.clone());
        }

        let codec = Codec::new(Arc::clone(&methods));
        let pending = Arc::new(RequestRegistry::new());
        let transports = Arc::new(RwLock::new(transport_map));
        let routes = Arc::new(routes);

        let dispatcher = Dispatcher {
            id: self.id.clone(),
            methods,
            codec: codec.clone(),
            pending: Arc::clone(&pending),
            transports: Arc::clone(&transports),
            routes: Arc::clone(&routes),
            default_route,
            relay: FxHashMap::default(),
        };
        tokio::spawn(dispatcher.run(events_rx, command_rx));

        debug!(context = %self.id, "Context started");

        Ok(Context {
            id: self.id,
            codec,
            pending,
            transports,
            routes,
            default_route,
            command_tx,
        })
    }
}

impl std::fmt::Debug for ContextBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextBuilder")
            .field("id", &self.id)
            .field("registrations", &self.registrations.len())
            .field("transports", &self.transports.len())
            .field("routes", &self.routes.len())
            .finish()
    }
}

// ============================================================================
// Dispatcher
// ============================================================================

/// State owned by the dispatch loop task.
struct Dispatcher {
    id: ContextId,
    methods: Arc<HandlerRegistry>,
    codec: Codec,
    pending: Arc<RequestRegistry>,
    transports: Arc<RwLock<TransportMap>>,
    routes: Arc<FxHashMap<ContextId, TransportId>>,
    default_route: Option<TransportId>,
    /// Relayed request → transport it arrived on, so the response retraces
    /// the request's path. Loop-local; no other task touches it.
    relay: FxHashMap<RequestId, TransportId>,
}

impl Dispatcher {
    /// Dispatch loop: one iteration per transport event or command.
    async fn run(
        mut self,
        mut events_rx: mpsc::UnboundedReceiver<TransportEvent>,
        mut command_rx: mpsc::UnboundedReceiver<ContextCommand>,
    ) {
        loop {
            tokio::select! {
                event = events_rx.recv() => {
                    match event {
                        Some(TransportEvent::Inbound { transport, envelope }) => {
                            self.handle_inbound(transport, envelope);
                        }
                        Some(TransportEvent::Closed { transport }) => {
                            self.handle_closed(transport);
                        }
                        None => {
                            debug!(context = %self.id, "Event channel closed");
                            break;
                        }
                    }
                }

                command = command_rx.recv() => {
                    match command {
                        Some(ContextCommand::Shutdown) | None => {
                            debug!(context = %self.id, "Shutdown");
                            break;
                        }
                    }
                }
            }
        }

        self.pending.cancel_everything();
        debug!(context = %self.id, "Dispatch loop terminated");
    }

    /// Routes one inbound envelope.
    fn handle_inbound(&mut self, transport: TransportId, envelope: Envelope) {
        match &envelope.body {
            Body::Response { .. } => self.handle_response(envelope),
            Body::Request { .. } => self.handle_request(transport, envelope),
        }
    }

    /// Delivers a response: resolve locally, or relay it back along the
    /// path its request traveled.
    fn handle_response(&mut self, envelope: Envelope) {
        let request_id = envelope.request_id;

        // Relayed requests never appear in the local pending table, so the
        // relay lookup decides ownership.
        if let Some(back) = self.relay.remove(&request_id) {
            match self.transport(back) {
                Some(transport) => {
                    trace!(%request_id, via = %back, "Relaying response back");
                    if let Err(err) = transport.send(&envelope) {
                        debug!(%request_id, error = %err, "Response relay abandoned");
                    }
                }
                None => {
                    debug!(%request_id, "Response relay abandoned; return path gone");
                }
            }
            return;
        }

        let Body::Response { payload } = envelope.body else {
            return;
        };
        // Late responses (timeout already fired) log and fall through here.
        self.pending.complete(request_id, payload);
    }

    /// Handles a request: invoke, forward, or synthesize an error.
    fn handle_request(&mut self, arrived_on: TransportId, envelope: Envelope) {
        let Body::Request {
            method,
            payload,
            expects_response,
        } = envelope.body.clone()
        else {
            return;
        };

        if self.methods.owns(&method) {
            self.invoke_handler(
                arrived_on,
                envelope.request_id,
                method,
                payload,
                expects_response,
            );
            return;
        }

        if self.forward(arrived_on, &envelope, expects_response) {
            return;
        }

        if expects_response {
            debug!(
                context = %self.id,
                %method,
                "No handler and no route; synthesizing error response"
            );
            self.respond(
                arrived_on,
                envelope.request_id,
                Err(Error::unknown_method(method.as_str())),
            );
        } else {
            warn!(context = %self.id, %method, "Dropping notification for unknown method");
        }
    }

    /// Spawns the local handler and responds on the arriving transport.
    fn invoke_handler(
        &self,
        arrived_on: TransportId,
        request_id: RequestId,
        method: MethodName,
        payload: Vec<Value>,
        expects_response: bool,
    ) {
        let Some(handler) = self
            .methods
            .get(&method)
            .and_then(|registration| registration.handler_fn())
            .cloned()
        else {
            return;
        };

        let args = self.codec.decode_request(&method, payload);
        let codec = self.codec.clone();
        let id = self.id.clone();
        let transports = Arc::clone(&self.transports);

        // The loop never awaits a handler; many invocations run in flight.
        tokio::spawn(async move {
            trace!(context = %id, %request_id, %method, "Handler invoked");
            let outcome = handler(args).await;

            if !expects_response {
                if let Err(err) = outcome {
                    warn!(context = %id, %method, error = %err, "Notification handler failed");
                }
                return;
            }

            let response = codec.encode_response(id.clone(), request_id, outcome);
            let transport = transports.read().get(&arrived_on).cloned();
            match transport {
                Some(transport) => {
                    if let Err(err) = transport.send(&response) {
                        debug!(context = %id, %request_id, error = %err, "Response abandoned");
                    }
                }
                None => {
                    // The channel died while the handler ran; result discarded.
                    debug!(context = %id, %request_id, "Response abandoned; transport gone");
                }
            }
        });
    }

    /// Forwards a request envelope verbatim toward its destination.
    ///
    /// Returns `false` if no usable next hop exists.
    fn forward(&mut self, arrived_on: TransportId, envelope: &Envelope, expects_response: bool) -> bool {
        let next_hop = envelope
            .target
            .as_ref()
            .and_then(|destination| self.routes.get(destination).copied())
            .or(self.default_route)
            // Never bounce a request back out the transport it arrived on.
            .filter(|via| *via != arrived_on);

        let Some(via) = next_hop else {
            return false;
        };
        let Some(transport) = self.transport(via) else {
            return false;
        };

        if expects_response {
            self.relay.insert(envelope.request_id, arrived_on);
        }

        match transport.send(envelope) {
            Ok(()) => {
                trace!(
                    context = %self.id,
                    request_id = %envelope.request_id,
                    via = %via,
                    "Request forwarded"
                );
                true
            }
            Err(err) => {
                debug!(
                    context = %self.id,
                    request_id = %envelope.request_id,
                    error = %err,
                    "Forward failed"
                );
                self.relay.remove(&envelope.request_id);
                false
            }
        }
    }

    /// Sends a locally synthesized response over `via`.
    fn respond(&self, via: TransportId, request_id: RequestId, outcome: Result<Value>) {
        let response = self.codec.encode_response(self.id.clone(), request_id, outcome);
        match self.transport(via) {
            Some(transport) => {
                if let Err(err) = transport.send(&response) {
                    debug!(%request_id, error = %err, "Synthesized response abandoned");
                }
            }
            None => debug!(%request_id, "Synthesized response abandoned; transport gone"),
        }
    }

    /// Reacts to a transport closing: bulk-reject its pending requests and
    /// forget it.
    fn handle_closed(&mut self, transport: TransportId) {
        debug!(context = %self.id, %transport, "Transport closed");
        self.pending.cancel_all(transport);
        self.transports.write().remove(&transport);
        self.relay.retain(|_, via| *via != transport);
    }

    /// Looks up an attached transport.
    fn transport(&self, id: TransportId) -> Option<Arc<dyn Transport>> {
        self.transports.read().get(&id).cloned()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::runtime_channel;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn ctx(name: &str) -> ContextId {
        ContextId::new(name).expect("valid id")
    }

    fn method(name: &str) -> MethodName {
        MethodName::new(name).expect("valid name")
    }

    /// Background owning `echo` and `add`, content on the other end.
    fn echo_pair() -> (Context, Context, Arc<AtomicUsize>) {
        let (background_port, content_port) = runtime_channel();
        let invocations = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&invocations);
        let background = Context::builder(ctx("background"))
            .register(MethodRegistration::new(method("echo")).handler(move |args| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(args.into_iter().next().unwrap_or(Value::Null))
                }
            }))
            .register(MethodRegistration::new(method("add")).handler(|args| async move {
                let a = args.first().and_then(Value::as_i64).unwrap_or(0);
                let b = args.get(1).and_then(Value::as_i64).unwrap_or(0);
                Ok(json!(a + b))
            }))
            .transport(background_port)
            .build()
            .expect("background context");

        let content = Context::builder(ctx("content-1"))
            .register(MethodRegistration::new(method("add")).pre_send(|mut args| {
                if let Some(first) = args.first_mut()
                    && let Some(n) = first.as_i64()
                {
                    *first = json!(n * 2);
                }
                Ok(args)
            }))
            .transport(content_port)
            .build()
            .expect("content context");

        (background, content, invocations)
    }

    #[tokio::test]
    async fn test_echo_resolves_handler_value() {
        let (_background, content, invocations) = echo_pair();

        let value = content
            .call(&method("echo"), vec![json!(42)])
            .await
            .expect("echo result");

        assert_eq!(value, json!(42));
        assert_eq!(invocations.load(Ordering::SeqCst), 1);
        assert_eq!(content.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_pre_send_hook_transforms_arguments() {
        let (_background, content, _) = echo_pair();

        // Doubling preSend: handler receives (6, 4).
        let value = content
            .call(&method("add"), vec![json!(3), json!(4)])
            .await
            .expect("add result");

        assert_eq!(value, json!(10));
    }

    #[tokio::test]
    async fn test_unknown_method_resolves_error() {
        let (_background, content, _) = echo_pair();

        let err = content
            .call(&method("no.such.method"), vec![])
            .await
            .expect_err("unknown method");

        assert!(matches!(err, Error::UnknownMethod { .. }));
        assert_eq!(content.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_handler_error_carries_kind_and_message() {
        let (background_port, content_port) = runtime_channel();

        let _background = Context::builder(ctx("background"))
            .register(MethodRegistration::new(method("save")).handler(|_args| async move {
                Err(Error::handler("SaveError", "disk full"))
            }))
            .transport(background_port)
            .build()
            .expect("background context");

        let content = Context::builder(ctx("content-1"))
            .transport(content_port)
            .build()
            .expect("content context");

        let err = content
            .call(&method("save"), vec![])
            .await
            .expect_err("handler failure");

        match err {
            Error::Handler { kind, message } => {
                assert_eq!(kind, "SaveError");
                assert_eq!(message, "disk full");
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_timeout_rejects_and_late_response_is_stale() {
        let (background_port, content_port) = runtime_channel();

        let _background = Context::builder(ctx("background"))
            .register(MethodRegistration::new(method("slow")).handler(|_args| async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok(json!("done"))
            }))
            .transport(background_port)
            .build()
            .expect("background context");

        let content = Context::builder(ctx("content-1"))
            .transport(content_port)
            .build()
            .expect("content context");

        let err = content
            .call_with_timeout(&method("slow"), vec![], Duration::from_millis(5))
            .await
            .expect_err("deadline");
        assert!(err.is_timeout());
        assert_eq!(content.pending_count(), 0);

        // Let the late response arrive; it must be discarded, and the
        // channel must still carry fresh calls.
        tokio::time::sleep(Duration::from_millis(80)).await;
        let value = content
            .call(&method("slow"), vec![])
            .await
            .expect("fresh call");
        assert_eq!(value, json!("done"));
    }

    #[tokio::test]
    async fn test_transport_close_rejects_only_its_pending_calls() {
        let (background_port, content_background_port) = runtime_channel();
        let (helper_port, content_helper_port) = runtime_channel();

        let _background = Context::builder(ctx("background"))
            .register(MethodRegistration::new(method("hang")).handler(|_args| async move {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(Value::Null)
            }))
            .transport(Arc::clone(&background_port) as Arc<dyn Transport>)
            .build()
            .expect("background context");

        let _helper = Context::builder(ctx("helper"))
            .register(MethodRegistration::new(method("tick")).handler(|_args| async move {
                tokio::time::sleep(Duration::from_millis(40)).await;
                Ok(json!("tock"))
            }))
            .transport(helper_port)
            .build()
            .expect("helper context");

        let content = Arc::new(
            Context::builder(ctx("content-1"))
                .route(ctx("background"), content_background_port.id())
                .route(ctx("helper"), content_helper_port.id())
                .transport(content_background_port)
                .transport(content_helper_port)
                .build()
                .expect("content context"),
        );

        let hang = tokio::spawn({
            let content = Arc::clone(&content);
            async move {
                content
                    .call_target(ctx("background"), &method("hang"), vec![])
                    .await
            }
        });
        let tick = tokio::spawn({
            let content = Arc::clone(&content);
            async move {
                content
                    .call_target(ctx("helper"), &method("tick"), vec![])
                    .await
            }
        });

        // The background environment goes away while both calls are in
        // flight.
        tokio::time::sleep(Duration::from_millis(10)).await;
        background_port.close();

        let hung = hang.await.expect("join");
        let ticked = tick.await.expect("join");
        assert!(matches!(hung, Err(Error::TransportClosed)));
        assert_eq!(ticked.expect("helper unaffected"), json!("tock"));
    }

    #[tokio::test]
    async fn test_forwarding_preserves_request_id_end_to_end() {
        // Parent ── C (pure relay) ── D (owns "ping").
        let (parent_port, c_parent_port) = runtime_channel();
        let (c_d_port, d_port) = runtime_channel();

        let parent_tap = Tap::default();
        let c_tap = Tap::default();

        let parent = Context::builder(ctx("parent"))
            .transport(parent_tap.wrap(parent_port))
            .build()
            .expect("parent context");

        let c_d_route = c_d_port.id();
        let _c = Context::builder(ctx("c"))
            .transport(c_parent_port)
            .transport(c_tap.wrap(c_d_port))
            .default_route(c_d_route)
            .build()
            .expect("relay context");

        let _d = Context::builder(ctx("d"))
            .register(MethodRegistration::new(method("ping")).handler(|_args| async move {
                Ok(json!("pong"))
            }))
            .transport(d_port)
            .build()
            .expect("owning context");

        let value = parent
            .call(&method("ping"), vec![])
            .await
            .expect("forwarded call");
        assert_eq!(value, json!("pong"));

        // The id D saw equals the id the caller generated, and the relayed
        // envelope is byte-identical to the original.
        let sent_by_parent = parent_tap.first_request();
        let sent_by_c = c_tap.first_request();
        assert_eq!(sent_by_parent.request_id, sent_by_c.request_id);
        assert_eq!(sent_by_parent, sent_by_c);
    }

    #[tokio::test]
    async fn test_relay_with_no_route_synthesizes_unknown_method() {
        let (parent_port, c_parent_port) = runtime_channel();

        let parent = Context::builder(ctx("parent"))
            .transport(parent_port)
            .build()
            .expect("parent context");

        // C has no handler for "ping" and only the arriving transport, so
        // there is nowhere to forward.
        let _c = Context::builder(ctx("c"))
            .transport(c_parent_port)
            .build()
            .expect("relay context");

        let err = parent
            .call(&method("ping"), vec![])
            .await
            .expect_err("no route");
        assert!(matches!(err, Error::UnknownMethod { .. }));
    }

    #[tokio::test]
    async fn test_notification_runs_handler_without_response() {
        let (background_port, content_port) = runtime_channel();
        let invocations = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&invocations);
        let _background = Context::builder(ctx("background"))
            .register(
                MethodRegistration::new(method("progress.update"))
                    .no_response()
                    .handler(move |_args| {
                        let counter = Arc::clone(&counter);
                        async move {
                            counter.fetch_add(1, Ordering::SeqCst);
                            Ok(Value::Null)
                        }
                    }),
            )
            .transport(background_port)
            .build()
            .expect("background context");

        let content = Context::builder(ctx("content-1"))
            .transport(content_port)
            .build()
            .expect("content context");

        content
            .notify(&method("progress.update"), vec![json!(50)])
            .expect("notify");

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(invocations.load(Ordering::SeqCst), 1);
        assert_eq!(content.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_calls_pair_with_own_responses() {
        let (background_port, content_port) = runtime_channel();

        let _background = Context::builder(ctx("background"))
            .register(MethodRegistration::new(method("delay")).handler(|args| async move {
                let value = args.first().cloned().unwrap_or(Value::Null);
                let delay = args.get(1).and_then(Value::as_u64).unwrap_or(0);
                tokio::time::sleep(Duration::from_millis(delay)).await;
                Ok(value)
            }))
            .transport(background_port)
            .build()
            .expect("background context");

        let content = Arc::new(
            Context::builder(ctx("content-1"))
                .transport(content_port)
                .build()
                .expect("content context"),
        );

        // Reversed delays force responses to arrive in reverse call order.
        let mut calls = Vec::new();
        for i in 0..8u64 {
            let content = Arc::clone(&content);
            calls.push(tokio::spawn(async move {
                content
                    .call(&method("delay"), vec![json!(i), json!((8 - i) * 10)])
                    .await
            }));
        }

        for (i, call) in calls.into_iter().enumerate() {
            let value = call.await.expect("join").expect("call result");
            assert_eq!(value, json!(i as u64));
        }
        assert_eq!(content.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_rejects_pending_calls() {
        let (background_port, content_port) = runtime_channel();

        let _background = Context::builder(ctx("background"))
            .register(MethodRegistration::new(method("hang")).handler(|_args| async move {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(Value::Null)
            }))
            .transport(background_port)
            .build()
            .expect("background context");

        let content = Arc::new(
            Context::builder(ctx("content-1"))
                .transport(content_port)
                .build()
                .expect("content context"),
        );

        let pending_call = tokio::spawn({
            let content = Arc::clone(&content);
            async move { content.call(&method("hang"), vec![]).await }
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        content.shutdown();

        let outcome = pending_call.await.expect("join");
        assert!(matches!(outcome, Err(Error::TransportClosed)));
    }

    #[tokio::test]
    async fn test_duplicate_registration_fails_build() {
        let (background_port, _content_port) = runtime_channel();

        let result = Context::builder(ctx("background"))
            .register(MethodRegistration::new(method("echo")))
            .register(MethodRegistration::new(method("echo")))
            .transport(background_port)
            .build();

        assert!(matches!(result, Err(Error::DuplicateMethod { .. })));
    }

    #[tokio::test]
    async fn test_route_to_unattached_transport_fails_build() {
        let (background_port, _content_port) = runtime_channel();
        let (stray, _stray_peer) = runtime_channel();

        let result = Context::builder(ctx("background"))
            .transport(background_port)
            .route(ctx("elsewhere"), stray.id())
            .build();

        assert!(matches!(result, Err(Error::InvalidArgument { .. })));
    }

    mod interleaving {
        use super::*;
        use proptest::prelude::*;

        /// Whatever order responses arrive in, each call resolves with the
        /// value matching its own request id.
        fn pair_by_id(delays: Vec<u64>) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .build()
                .expect("runtime");

            runtime.block_on(async move {
                let (background_port, content_port) = runtime_channel();

                let _background = Context::builder(ctx("background"))
                    .register(MethodRegistration::new(method("delay")).handler(
                        |args| async move {
                            let value = args.first().cloned().unwrap_or(Value::Null);
                            let delay = args.get(1).and_then(Value::as_u64).unwrap_or(0);
                            tokio::time::sleep(Duration::from_millis(delay)).await;
                            Ok(value)
                        },
                    ))
                    .transport(background_port)
                    .build()
                    .expect("background context");

                let content = Arc::new(
                    Context::builder(ctx("content-1"))
                        .transport(content_port)
                        .build()
                        .expect("content context"),
                );

                let mut calls = Vec::new();
                for (i, delay) in delays.into_iter().enumerate() {
                    let content = Arc::clone(&content);
                    calls.push(tokio::spawn(async move {
                        content
                            .call(&method("delay"), vec![json!(i), json!(delay)])
                            .await
                    }));
                }

                for (i, call) in calls.into_iter().enumerate() {
                    let value = call.await.expect("join").expect("call result");
                    assert_eq!(value, json!(i));
                }
            });
        }

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(8))]

            #[test]
            fn prop_interleaved_responses_pair_by_id(
                delays in proptest::collection::vec(0u64..25, 2..8)
            ) {
                pair_by_id(delays);
            }
        }
    }

    // ========================================================================
    // Test Transport Tap
    // ========================================================================

    /// Records envelopes sent through a wrapped transport.
    #[derive(Default, Clone)]
    struct Tap {
        sent: Arc<Mutex<Vec<Envelope>>>,
    }

    impl Tap {
        fn wrap(&self, inner: Arc<crate::transport::RuntimePort>) -> Arc<dyn Transport> {
            Arc::new(TapTransport {
                inner,
                sent: Arc::clone(&self.sent),
            })
        }

        fn first_request(&self) -> Envelope {
            self.sent
                .lock()
                .iter()
                .find(|envelope| envelope.is_request())
                .cloned()
                .expect("a request was sent")
        }
    }

    struct TapTransport {
        inner: Arc<crate::transport::RuntimePort>,
        sent: Arc<Mutex<Vec<Envelope>>>,
    }

    impl Transport for TapTransport {
        fn id(&self) -> TransportId {
            self.inner.id()
        }

        fn send(&self, envelope: &Envelope) -> Result<()> {
            self.sent.lock().push(envelope.clone());
            self.inner.send(envelope)
        }

        fn start(&self, events: crate::transport::EventSender) {
            self.inner.start(events);
        }
    }
}
