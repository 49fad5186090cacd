//! Handler registry: maps operation names to local handler functions.
//!
//! A [`Registration`] is either one handler bound to one operation or a
//! [`HandlerTable`] covering any subset of operations. Each registration gets
//! its own transport listener, so several registrations can split the
//! operations of one contract between them; envelopes for operations a
//! registration does not cover are ignored by it.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::envelope::{codes, RemoteError};
use crate::transport::Subscription;

/// Failure reported by a handler, carried back to the caller in an error response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("[{code}] {message}")]
pub struct HandlerError {
    pub code: String,
    pub message: String,
}

impl HandlerError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Error with the generic `HANDLER_ERROR` code.
    pub fn message(message: impl Into<String>) -> Self {
        Self::new(codes::HANDLER_ERROR, message)
    }

    pub fn invalid_arguments(message: impl Into<String>) -> Self {
        Self::new(codes::INVALID_ARGUMENTS, message)
    }
}

impl From<String> for HandlerError {
    fn from(message: String) -> Self {
        Self::message(message)
    }
}

impl From<&str> for HandlerError {
    fn from(message: &str) -> Self {
        Self::message(message)
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(err: serde_json::Error) -> Self {
        Self::message(err.to_string())
    }
}

impl From<HandlerError> for RemoteError {
    fn from(err: HandlerError) -> Self {
        RemoteError::new(err.code, err.message)
    }
}

/// Local function invoked for an inbound request.
///
/// Receives the request's positional arguments and returns the response
/// payload. Most handlers are built from closures with [`handler::from_fn`] or
/// [`handler::from_async_fn`]; implement the trait directly for stateful
/// handlers.
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    async fn handle(&self, args: Vec<Value>) -> Result<Value, HandlerError>;
}

/// Closure adapters producing [`Handler`] trait objects.
///
/// Arguments are decoded with serde from the positional list, so a handler
/// for `add(x, y)` takes an `(i64, i64)` tuple and a single-argument handler
/// takes a one-element tuple like `(String,)`. `()` accepts no arguments and
/// `Vec<Value>` accepts any. Return values are encoded with serde; `()`
/// becomes `null`.
///
/// ```
/// use parley_core::{handler, HandlerError};
///
/// let add = handler::from_fn(|(x, y): (i64, i64)| Ok::<_, HandlerError>(x + y));
/// let greet = handler::from_async_fn(|(name,): (String,)| async move {
///     Ok::<_, HandlerError>(format!("hello {name}"))
/// });
/// ```
pub mod handler {
    use super::*;

    pub fn from_fn<A, R, F>(f: F) -> Arc<dyn Handler>
    where
        F: Fn(A) -> Result<R, HandlerError> + Send + Sync + 'static,
        A: DeserializeOwned + 'static,
        R: Serialize + 'static,
    {
        Arc::new(SyncFn {
            f,
            _marker: PhantomData,
        })
    }

    pub fn from_async_fn<A, R, F, Fut>(f: F) -> Arc<dyn Handler>
    where
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, HandlerError>> + Send + 'static,
        A: DeserializeOwned + 'static,
        R: Serialize + 'static,
    {
        Arc::new(AsyncFn {
            f,
            _marker: PhantomData,
        })
    }

    struct SyncFn<F, A, R> {
        f: F,
        _marker: PhantomData<fn(A) -> R>,
    }

    #[async_trait]
    impl<F, A, R> Handler for SyncFn<F, A, R>
    where
        F: Fn(A) -> Result<R, HandlerError> + Send + Sync + 'static,
        A: DeserializeOwned + 'static,
        R: Serialize + 'static,
    {
        async fn handle(&self, args: Vec<Value>) -> Result<Value, HandlerError> {
            let args = decode_args::<A>(args)?;
            let value = (self.f)(args)?;
            Ok(serde_json::to_value(value)?)
        }
    }

    struct AsyncFn<F, A, R> {
        f: F,
        _marker: PhantomData<fn(A) -> R>,
    }

    #[async_trait]
    impl<F, A, R, Fut> Handler for AsyncFn<F, A, R>
    where
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, HandlerError>> + Send + 'static,
        A: DeserializeOwned + 'static,
        R: Serialize + 'static,
    {
        async fn handle(&self, args: Vec<Value>) -> Result<Value, HandlerError> {
            let args = decode_args::<A>(args)?;
            let value = (self.f)(args).await?;
            Ok(serde_json::to_value(value)?)
        }
    }

    pub(crate) fn decode_args<A: DeserializeOwned>(args: Vec<Value>) -> Result<A, HandlerError> {
        // `()` only deserializes from null, not from an empty array
        if args.is_empty() {
            if let Ok(decoded) = serde_json::from_value(Value::Null) {
                return Ok(decoded);
            }
        }
        serde_json::from_value(Value::Array(args))
            .map_err(|e| HandlerError::invalid_arguments(e.to_string()))
    }
}

/// Handlers keyed by operation name, registered in one call.
#[derive(Clone, Default)]
pub struct HandlerTable {
    handlers: HashMap<String, Arc<dyn Handler>>,
}

impl HandlerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert; a later handler for the same operation replaces the earlier one.
    pub fn on(mut self, operation: impl Into<String>, handler: Arc<dyn Handler>) -> Self {
        self.insert(operation, handler);
        self
    }

    pub fn insert(&mut self, operation: impl Into<String>, handler: Arc<dyn Handler>) {
        self.handlers.insert(operation.into(), handler);
    }

    pub fn get(&self, operation: &str) -> Option<&Arc<dyn Handler>> {
        self.handlers.get(operation)
    }

    pub fn contains(&self, operation: &str) -> bool {
        self.handlers.contains_key(operation)
    }

    /// Covered operation names, sorted.
    pub fn operations(&self) -> Vec<String> {
        let mut ops: Vec<String> = self.handlers.keys().cloned().collect();
        ops.sort();
        ops
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl fmt::Debug for HandlerTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerTable")
            .field("operations", &self.operations())
            .finish()
    }
}

/// One handler registration.
#[derive(Clone)]
pub enum Registration {
    /// One handler bound to exactly one operation
    Single {
        operation: String,
        handler: Arc<dyn Handler>,
    },
    /// Handlers for any subset of operations
    Table(HandlerTable),
}

impl Registration {
    pub fn single(operation: impl Into<String>, handler: Arc<dyn Handler>) -> Self {
        Registration::Single {
            operation: operation.into(),
            handler,
        }
    }

    /// Handler for `operation`, if this registration covers it.
    pub fn select(&self, operation: &str) -> Option<Arc<dyn Handler>> {
        match self {
            Registration::Single {
                operation: bound,
                handler,
            } if bound == operation => Some(Arc::clone(handler)),
            Registration::Single { .. } => None,
            Registration::Table(table) => table.get(operation).cloned(),
        }
    }

    pub fn operations(&self) -> Vec<String> {
        match self {
            Registration::Single { operation, .. } => vec![operation.clone()],
            Registration::Table(table) => table.operations(),
        }
    }
}

impl From<HandlerTable> for Registration {
    fn from(table: HandlerTable) -> Self {
        Registration::Table(table)
    }
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Registration::Single { operation, .. } => {
                f.debug_struct("Single").field("operation", operation).finish()
            }
            Registration::Table(table) => f.debug_tuple("Table").field(table).finish(),
        }
    }
}

/// Live registration on an engine's transport.
///
/// Dropping the handle keeps the handlers installed; call
/// [`RegistrationHandle::unregister`] to detach them.
#[derive(Debug)]
pub struct RegistrationHandle {
    operations: Vec<String>,
    subscription: Subscription,
}

impl RegistrationHandle {
    pub(crate) fn new(operations: Vec<String>, subscription: Subscription) -> Self {
        Self {
            operations,
            subscription,
        }
    }

    pub fn operations(&self) -> &[String] {
        &self.operations
    }

    pub fn unregister(self) {
        self.subscription.unsubscribe();
    }
}

#[cfg(test)]
mod tests {
    use super::handler::decode_args;
    use super::*;
    use serde_json::json;

    #[test]
    fn decode_args_handles_arities() {
        let pair: (i64, i64) = decode_args(vec![json!(2), json!(3)]).unwrap();
        assert_eq!(pair, (2, 3));
        decode_args::<()>(vec![]).unwrap();
        let any: Vec<Value> = decode_args(vec![]).unwrap();
        assert!(any.is_empty());
    }

    #[test]
    fn decode_args_reports_bad_input() {
        let err = decode_args::<(i64, i64)>(vec![json!("two")]).unwrap_err();
        assert_eq!(err.code, codes::INVALID_ARGUMENTS);
    }

    #[tokio::test]
    async fn sync_and_async_adapters_agree() {
        let sync = handler::from_fn(|(x, y): (i64, i64)| Ok::<_, HandlerError>(x * y));
        let asynchronous = handler::from_async_fn(|(x, y): (i64, i64)| async move {
            Ok::<_, HandlerError>(x * y)
        });

        let args = vec![json!(6), json!(7)];
        assert_eq!(sync.handle(args.clone()).await, Ok(json!(42)));
        assert_eq!(asynchronous.handle(args).await, Ok(json!(42)));
    }

    #[test]
    fn single_registration_selects_exact_operation() {
        let h = handler::from_fn(|(): ()| Ok::<_, HandlerError>("pong"));
        let reg = Registration::single("ping", h);
        assert!(reg.select("ping").is_some());
        assert!(reg.select("pong").is_none());
    }

    #[test]
    fn table_registration_covers_subset() {
        let h = handler::from_fn(|(): ()| Ok::<_, HandlerError>(()));
        let reg: Registration = HandlerTable::new().on("a", h.clone()).on("b", h).into();
        assert_eq!(reg.operations(), vec!["a".to_string(), "b".to_string()]);
        assert!(reg.select("c").is_none());
    }
}
