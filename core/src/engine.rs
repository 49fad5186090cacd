//! Correlation engine: send-request, register-handler and the response path.
//!
//! ```text
//!  caller                         engine                        transport
//!    │ request(Call) ──────────▶ build envelope
//!    │                           insert PendingRequest
//!    │                           listen(response listener) ───▶ attach
//!    │                           send(envelope) ──────────────▶ deliver
//!    │ ◀── PendingReply
//!    │                                     inbound response ◀── listener
//!    │                           match op + correlation id
//!    │ ◀── resolve (at most once), detach listener
//!
//!  peer registration listener:  inbound request ─▶ select handler ─▶ spawn
//!                               handler result ─▶ send response envelope
//! ```
//!
//! Every dispatch path runs the [`NamespaceGate`] first, so engines sharing one
//! transport under different namespaces never see each other's traffic.

use std::sync::{Arc, Weak};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing::{debug, info, trace, warn};

use crate::category::Category;
use crate::config::EngineConfig;
use crate::correlation::CorrelationId;
use crate::dispatch::{Inbound, NamespaceGate};
use crate::envelope::{codes, encode_args, Envelope, RemoteError};
use crate::pending::{PendingReply, PendingTable};
use crate::registry::{Handler, HandlerTable, Registration, RegistrationHandle};
use crate::stats::{Counters, EngineStats};
use crate::transport::{Listener, Transport};
use crate::{ParleyError, Result};

/// One outbound call.
///
/// `O` is the transport's send option ([`Transport::Target`]).
#[derive(Debug, Clone, PartialEq)]
pub enum Call<O> {
    /// Send with the transport's default delivery
    Simple { operation: String, args: Vec<Value> },
    /// Send with an out-of-band option, e.g. one specific destination
    WithOption {
        option: O,
        operation: String,
        args: Vec<Value>,
    },
}

impl<O> Call<O> {
    /// Build a call from any serializable argument tuple.
    ///
    /// Tuples expand into positional arguments; `()` means none. See
    /// [`encode_args`] for the full rules.
    pub fn new<A: Serialize>(operation: impl Into<String>, args: A) -> Result<Self> {
        Ok(Call::Simple {
            operation: operation.into(),
            args: encode_args(args)?,
        })
    }

    pub fn with_option<A: Serialize>(
        option: O,
        operation: impl Into<String>,
        args: A,
    ) -> Result<Self> {
        Ok(Call::WithOption {
            option,
            operation: operation.into(),
            args: encode_args(args)?,
        })
    }

    pub fn operation(&self) -> &str {
        match self {
            Call::Simple { operation, .. } | Call::WithOption { operation, .. } => operation,
        }
    }

    fn into_parts(self) -> (Option<O>, String, Vec<Value>) {
        match self {
            Call::Simple { operation, args } => (None, operation, args),
            Call::WithOption {
                option,
                operation,
                args,
            } => (Some(option), operation, args),
        }
    }
}

struct EngineInner<T: Transport> {
    transport: T,
    gate: NamespaceGate,
    pending: Arc<PendingTable>,
    counters: Arc<Counters>,
    request_timeout: Option<Duration>,
}

/// Request/response correlation engine bound to one transport.
///
/// Cloning is cheap and yields another handle to the same engine. Each engine
/// built with [`Engine::new`] or [`DeferredEngine::bind`] owns its own pending
/// table and registrations; nothing is shared between engines except, possibly,
/// the physical transport.
///
/// # Examples
///
/// ```no_run
/// use parley_core::{handler, Engine, HandlerError, MemoryTransport};
///
/// # async fn example() -> parley_core::Result<()> {
/// let (host, worker) = MemoryTransport::pair();
/// let host = Engine::new(host);
/// let worker = Engine::new(worker);
///
/// worker.on_message(
///     "add",
///     handler::from_fn(|(x, y): (i64, i64)| Ok::<_, HandlerError>(x + y)),
/// )?;
///
/// let sum: i64 = host.call("add", (2, 3)).await?;
/// assert_eq!(sum, 5);
/// # Ok(())
/// # }
/// ```
pub struct Engine<T: Transport> {
    inner: Arc<EngineInner<T>>,
}

impl<T: Transport> Clone for Engine<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Transport> Engine<T> {
    /// Bind an engine to `transport` with the default configuration.
    pub fn new(transport: T) -> Self {
        Self::with_config(transport, EngineConfig::default())
    }

    pub fn with_config(transport: T, config: EngineConfig) -> Self {
        let namespace = config.resolve_namespace(transport.namespace());
        debug!(target: "parley", namespace = %namespace, "Engine created");
        Self {
            inner: Arc::new(EngineInner {
                transport,
                gate: NamespaceGate::new(namespace),
                pending: Arc::new(PendingTable::new()),
                counters: Arc::new(Counters::default()),
                request_timeout: config.request_timeout,
            }),
        }
    }

    pub fn namespace(&self) -> &str {
        self.inner.gate.namespace()
    }

    pub fn transport(&self) -> &T {
        &self.inner.transport
    }

    /// Number of requests still awaiting a response.
    pub fn pending(&self) -> usize {
        self.inner.pending.len()
    }

    pub fn stats(&self) -> EngineStats {
        self.inner.counters.snapshot(self.inner.pending.len())
    }

    /// Send a request and return the future of its response.
    ///
    /// The pending record and its response listener are in place before the
    /// envelope reaches the transport, so even a synchronous transport that
    /// answers inside `send` is matched. A transport failure is returned here
    /// and the request is discarded. The returned reply carries the engine's
    /// default timeout, if one is configured.
    #[tracing::instrument(skip(self, call), fields(operation = %call.operation(), namespace = %self.namespace()))]
    pub async fn request(&self, call: Call<T::Target>) -> Result<PendingReply> {
        let (option, operation, args) = call.into_parts();
        let envelope = Envelope::request(operation.clone(), self.namespace(), args);
        let raw = envelope.to_value()?;
        let id = envelope.correlation_id;

        let (tx, rx) = oneshot::channel();
        self.inner
            .pending
            .insert(operation.clone(), id.clone(), tx);
        let mut reply = PendingReply::new(
            operation.clone(),
            id.clone(),
            rx,
            Arc::clone(&self.inner.pending),
            Arc::clone(&self.inner.counters),
        );
        if let Some(timeout) = self.inner.request_timeout {
            reply = reply.with_timeout(timeout);
        }

        let listener = self.response_listener(operation, id.clone());
        let subscription = self.inner.transport.listen(listener);
        self.inner.pending.attach(&id, subscription);

        debug!(target: "parley", correlation_id = %id, option = ?option, "Sending request");
        // On failure `reply` is dropped, which discards the pending record
        self.inner.transport.send(raw, option).await?;
        Counters::bump(&self.inner.counters.requests_sent);
        Ok(reply)
    }

    /// Send `operation(args...)` and deserialize the response payload.
    pub async fn call<R, A>(&self, operation: &str, args: A) -> Result<R>
    where
        R: DeserializeOwned,
        A: Serialize,
    {
        self.request(Call::new(operation, args)?).await?.json().await
    }

    /// Like [`Engine::call`], passing `option` to the transport.
    pub async fn call_with<R, A>(&self, option: T::Target, operation: &str, args: A) -> Result<R>
    where
        R: DeserializeOwned,
        A: Serialize,
    {
        self.request(Call::with_option(option, operation, args)?)
            .await?
            .json()
            .await
    }

    /// Register one handler for one operation.
    pub fn on_message(
        &self,
        operation: impl Into<String>,
        handler: Arc<dyn Handler>,
    ) -> Result<RegistrationHandle> {
        self.register(Registration::single(operation, handler))
    }

    /// Register a table of handlers in one call.
    pub fn on_messages(&self, table: HandlerTable) -> Result<RegistrationHandle> {
        self.register(Registration::Table(table))
    }

    /// Attach a transport listener serving `registration`.
    ///
    /// Handlers run as tasks on the tokio runtime current at registration
    /// time, so a slow handler never holds up other dispatch. Exactly one
    /// response is sent per handled request: the handler's value, or an
    /// error response if it fails, rejects its arguments or panics.
    pub fn register(&self, registration: Registration) -> Result<RegistrationHandle> {
        let runtime = Handle::try_current().map_err(|_| ParleyError::NoRuntime)?;
        let operations = registration.operations();
        let listener = request_listener(Arc::downgrade(&self.inner), registration, runtime);
        let subscription = self.inner.transport.listen(listener);

        info!(target: "parley", namespace = %self.namespace(), operations = ?operations, "Registered message handlers");
        Ok(RegistrationHandle::new(operations, subscription))
    }

    /// Build a bound proxy for a fixed set of operations.
    pub fn category(&self, name: impl Into<String>, operations: &[&str]) -> Category<T> {
        Category::new(self.clone(), name.into(), operations, None)
    }

    fn response_listener(&self, operation: String, id: CorrelationId) -> Listener {
        let gate = self.inner.gate.clone();
        let pending = Arc::clone(&self.inner.pending);
        let counters = Arc::clone(&self.inner.counters);

        Arc::new(move |raw: &Value| {
            // Namespace first, then the id; both before decoding the envelope
            if !gate.admit_raw(raw) {
                return;
            }
            if raw.get("correlationId").and_then(Value::as_str) != Some(id.as_str()) {
                return;
            }
            let Inbound::Response(envelope) = gate.classify(raw) else {
                return;
            };
            if !envelope.answers(&operation, &id) {
                return;
            }

            let outcome = match envelope.error {
                Some(err) => Err(ParleyError::Remote {
                    operation: envelope.operation,
                    code: err.code,
                    message: err.message,
                }),
                None => Ok(envelope.payload),
            };
            if pending.resolve(&id, outcome) {
                Counters::bump(&counters.responses_resolved);
            } else {
                trace!(target: "parley", correlation_id = %id, "Ignoring duplicate response");
            }
        })
    }
}

// The listener holds the engine weakly: the transport owns the listener, and
// the engine owns the transport.
fn request_listener<T: Transport>(
    engine: Weak<EngineInner<T>>,
    registration: Registration,
    runtime: Handle,
) -> Listener {
    Arc::new(move |raw: &Value| {
        let Some(inner) = engine.upgrade() else {
            return;
        };
        let request = match inner.gate.classify(raw) {
            Inbound::Request(envelope) => envelope,
            Inbound::Response(_) | Inbound::Foreign | Inbound::Malformed => {
                Counters::bump(&inner.counters.ignored_envelopes);
                return;
            }
        };
        let Some(handler) = registration.select(&request.operation) else {
            trace!(target: "parley", operation = %request.operation, "No handler in this registration");
            Counters::bump(&inner.counters.ignored_envelopes);
            return;
        };

        debug!(target: "parley", operation = %request.operation, correlation_id = %request.correlation_id, "Dispatching request");
        runtime.spawn(serve(inner, handler, request));
    })
}

async fn serve<T: Transport>(
    inner: Arc<EngineInner<T>>,
    handler: Arc<dyn Handler>,
    request: Envelope,
) {
    let args = request.args();
    // Run the handler in its own task so a panic turns into an error response
    let outcome = match tokio::spawn(async move { handler.handle(args).await }).await {
        Ok(result) => result.map_err(RemoteError::from),
        Err(join_err) => Err(RemoteError::new(
            codes::HANDLER_PANICKED,
            join_err.to_string(),
        )),
    };

    let response = match outcome {
        Ok(payload) => {
            Counters::bump(&inner.counters.requests_handled);
            Envelope::response_to(&request, payload)
        }
        Err(err) => {
            Counters::bump(&inner.counters.handler_failures);
            warn!(target: "parley", operation = %request.operation, correlation_id = %request.correlation_id, code = %err.code, error = %err.message, "Handler failed");
            Envelope::error_response_to(&request, err)
        }
    };

    let raw = match response.to_value() {
        Ok(raw) => raw,
        Err(e) => {
            warn!(target: "parley", operation = %request.operation, error = %e, "Failed to encode response");
            return;
        }
    };
    if let Err(e) = inner.transport.send(raw, None).await {
        warn!(target: "parley", operation = %request.operation, correlation_id = %request.correlation_id, error = %e, "Failed to send response");
    }
}

/// Engine configuration waiting for a transport.
///
/// For setups where each side must configure its own transport before use:
/// build the deferred engine early, then [`bind`](DeferredEngine::bind) it
/// once the transport exists. Every bind yields an independent engine.
///
/// ```
/// use parley_core::{DeferredEngine, EngineConfig, MemoryTransport};
///
/// let deferred = DeferredEngine::new(EngineConfig::new().with_namespace("jobs"));
/// let (a, _b) = MemoryTransport::pair();
/// let engine = deferred.bind(a);
/// assert_eq!(engine.namespace(), "jobs");
/// ```
#[derive(Debug, Clone, Default)]
pub struct DeferredEngine {
    config: EngineConfig,
}

impl DeferredEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn bind<T: Transport>(&self, transport: T) -> Engine<T> {
        Engine::with_config(transport, self.config.clone())
    }
}

/// Deferred construction: configure now, bind a transport later.
pub fn deferred(config: EngineConfig) -> DeferredEngine {
    DeferredEngine::new(config)
}
