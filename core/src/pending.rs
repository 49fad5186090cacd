//! Pending-request table and the caller-side reply future.
//!
//! ```text
//! Request Flow:
//!   1. Engine inserts a PendingRequest (operation + oneshot::Sender)
//!   2. Engine attaches a per-request transport listener, stores its Subscription
//!   3. Engine sends the request envelope
//!   4. Caller awaits the PendingReply (oneshot::Receiver)
//!
//! Response Flow:
//!   5. Listener sees a matching response envelope
//!   6. resolve() removes the record (at most once), detaches the listener
//!   7. oneshot::Sender fires, PendingReply completes
//!
//! Cancellation Flow (timeout or dropped reply):
//!   5. cancel() removes the record and detaches the listener
//!   6. A late response finds no record and is ignored
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::time::{Instant, Sleep};
use tracing::debug;

use crate::correlation::CorrelationId;
use crate::stats::Counters;
use crate::transport::Subscription;
use crate::{ParleyError, Result};

type Resolver = oneshot::Sender<Result<Value>>;

/// One in-flight request awaiting its response.
struct PendingRequest {
    operation: String,
    resolver: Resolver,
    /// Detaches the per-request listener. `None` until the listener is attached.
    subscription: Option<Subscription>,
}

/// In-flight requests of one engine, keyed by correlation id.
///
/// Removal is the single point of fulfilment: whichever of `resolve` or
/// `cancel` removes a record first wins, and every later attempt for the
/// same id is a no-op. That is what makes duplicate responses harmless.
#[derive(Default)]
pub struct PendingTable {
    entries: DashMap<CorrelationId, PendingRequest>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&self, operation: String, id: CorrelationId, resolver: Resolver) {
        self.entries.insert(
            id,
            PendingRequest {
                operation,
                resolver,
                subscription: None,
            },
        );
    }

    /// Store the listener subscription for `id`, or detach it right away if the
    /// request already completed.
    pub(crate) fn attach(&self, id: &CorrelationId, subscription: Subscription) {
        if let Some(mut entry) = self.entries.get_mut(id) {
            entry.subscription = Some(subscription);
            return;
        }
        subscription.unsubscribe();
    }

    /// Complete the request `id` with `outcome`. Returns `false` if it was
    /// already completed or cancelled.
    pub(crate) fn resolve(&self, id: &CorrelationId, outcome: Result<Value>) -> bool {
        let Some((_, request)) = self.entries.remove(id) else {
            return false;
        };
        if let Some(subscription) = request.subscription {
            subscription.unsubscribe();
        }
        debug!(target: "parley", operation = %request.operation, correlation_id = %id, "Pending request resolved");
        // The caller may have stopped listening; nothing left to do then
        let _ = request.resolver.send(outcome);
        true
    }

    /// Drop the request `id` without resolving it. Returns `false` if it was
    /// already completed or cancelled.
    pub fn cancel(&self, id: &CorrelationId) -> bool {
        let Some((_, request)) = self.entries.remove(id) else {
            return false;
        };
        if let Some(subscription) = request.subscription {
            subscription.unsubscribe();
        }
        debug!(target: "parley", operation = %request.operation, correlation_id = %id, "Pending request cancelled");
        true
    }

    pub fn contains(&self, id: &CorrelationId) -> bool {
        self.entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Future resolving to the payload of the response to one request.
///
/// Resolves at most once. Without a timeout it stays pending until a matching
/// response arrives, possibly forever. Dropping the reply before it resolves
/// cancels the request: its record is removed and its transport listener
/// detached, so an abandoned call leaves nothing behind.
///
/// # Examples
///
/// ```no_run
/// use std::time::Duration;
/// use parley_core::{Call, Engine, MemoryTransport};
///
/// # async fn example() -> parley_core::Result<()> {
/// let (host, _worker) = MemoryTransport::pair();
/// let engine = Engine::new(host);
///
/// let reply = engine
///     .request(Call::new("add", (2, 3))?)
///     .await?
///     .with_timeout(Duration::from_secs(1));
/// let sum: i64 = reply.json().await?;
/// # Ok(())
/// # }
/// ```
pub struct PendingReply {
    operation: String,
    correlation_id: CorrelationId,
    receiver: oneshot::Receiver<Result<Value>>,
    table: Arc<PendingTable>,
    counters: Arc<Counters>,
    timeout: Option<(Duration, Instant)>,
    sleep: Option<Pin<Box<Sleep>>>,
    done: bool,
}

impl PendingReply {
    pub(crate) fn new(
        operation: String,
        correlation_id: CorrelationId,
        receiver: oneshot::Receiver<Result<Value>>,
        table: Arc<PendingTable>,
        counters: Arc<Counters>,
    ) -> Self {
        Self {
            operation,
            correlation_id,
            receiver,
            table,
            counters,
            timeout: None,
            sleep: None,
            done: false,
        }
    }

    /// Fail with [`ParleyError::Timeout`] if no response arrives within
    /// `timeout` from now. Replaces any timeout set earlier; a duration too
    /// large to reach, such as `Duration::MAX`, waits without a deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        // A deadline past the clock's range means no deadline at all
        self.timeout = Instant::now()
            .checked_add(timeout)
            .map(|deadline| (timeout, deadline));
        self.sleep = None;
        self
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    pub fn correlation_id(&self) -> &CorrelationId {
        &self.correlation_id
    }

    /// Await the response and deserialize its payload.
    pub async fn json<R: DeserializeOwned>(self) -> Result<R> {
        let payload = self.await?;
        Ok(serde_json::from_value(payload)?)
    }

    fn timed_out(&mut self, timeout: Duration) -> Result<Value> {
        if !self.table.cancel(&self.correlation_id) {
            // Lost the race against a response; take it
            if let Ok(outcome) = self.receiver.try_recv() {
                return outcome;
            }
        }
        Counters::bump(&self.counters.timeouts);
        Err(ParleyError::Timeout {
            operation: self.operation.clone(),
            timeout_ms: timeout.as_millis() as u64,
        })
    }
}

impl Future for PendingReply {
    type Output = Result<Value>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        if this.done {
            return Poll::Ready(Err(ParleyError::Cancelled));
        }

        match Pin::new(&mut this.receiver).poll(cx) {
            Poll::Ready(Ok(outcome)) => {
                this.done = true;
                return Poll::Ready(outcome);
            }
            Poll::Ready(Err(_)) => {
                this.done = true;
                return Poll::Ready(Err(ParleyError::Cancelled));
            }
            Poll::Pending => {}
        }

        if let Some((timeout, deadline)) = this.timeout {
            let sleep = this
                .sleep
                .get_or_insert_with(|| Box::pin(tokio::time::sleep_until(deadline)));
            if sleep.as_mut().poll(cx).is_ready() {
                this.done = true;
                return Poll::Ready(this.timed_out(timeout));
            }
        }
        Poll::Pending
    }
}

impl Drop for PendingReply {
    fn drop(&mut self) {
        if !self.done {
            self.table.cancel(&self.correlation_id);
        }
    }
}
