//! Transport adapter contract and reference adapters.
//!
//! The engine never talks to a delivery mechanism directly. It attaches
//! listeners through [`Transport::listen`] and hands encoded envelopes to
//! [`Transport::send`]. Anything that can move a `serde_json::Value` between
//! two contexts can back an engine:
//!
//! - [`MemoryTransport`]: in-process hub, one endpoint per context
//! - [`StreamTransport`]: newline-delimited JSON over a byte stream pair,
//!   e.g. a child process' stdin/stdout

mod memory;
mod stream;

pub use memory::{EndpointId, MemoryHub, MemoryTransport};
pub use stream::StreamTransport;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;

use crate::Result;

/// Callback invoked with every raw value the transport receives.
pub type Listener = Arc<dyn Fn(&Value) + Send + Sync>;

/// Delivery mechanism an engine is bound to.
///
/// Implementations must support any number of concurrently attached
/// listeners, and must tolerate a listener detaching itself while it is being
/// invoked. Listeners may be called from any thread.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Out-of-band send option, e.g. the address of one specific peer.
    type Target: Clone + fmt::Debug + Send + Sync + 'static;

    /// Attach a listener; the returned subscription detaches it.
    fn listen(&self, listener: Listener) -> Subscription;

    /// Hand one encoded envelope to the delivery mechanism.
    async fn send(&self, message: Value, target: Option<Self::Target>) -> Result<()>;

    /// Namespace this transport was configured with, if any.
    fn namespace(&self) -> Option<String> {
        None
    }
}

#[async_trait]
impl<T: Transport> Transport for Arc<T> {
    type Target = T::Target;

    fn listen(&self, listener: Listener) -> Subscription {
        (**self).listen(listener)
    }

    async fn send(&self, message: Value, target: Option<Self::Target>) -> Result<()> {
        (**self).send(message, target).await
    }

    fn namespace(&self) -> Option<String> {
        (**self).namespace()
    }
}

/// Handle that detaches a listener from its transport.
///
/// Dropping a subscription leaves the listener attached; call
/// [`Subscription::unsubscribe`] to detach it.
pub struct Subscription {
    detach: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub fn new(detach: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            detach: Some(Box::new(detach)),
        }
    }

    /// A subscription with nothing to detach.
    pub fn noop() -> Self {
        Self { detach: None }
    }

    pub fn unsubscribe(mut self) {
        if let Some(detach) = self.detach.take() {
            detach();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("attached", &self.detach.is_some())
            .finish()
    }
}

#[derive(Default)]
struct ListenerSetInner {
    next_id: AtomicU64,
    listeners: DashMap<u64, Listener>,
}

/// Concurrent listener table for transport implementations.
///
/// [`ListenerSet::dispatch`] snapshots the attached listeners before invoking
/// them, so no map guard is held while user code runs and listeners are free
/// to attach or detach others (or themselves) during delivery.
#[derive(Clone, Default)]
pub struct ListenerSet {
    inner: Arc<ListenerSetInner>,
}

impl ListenerSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&self, listener: Listener) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.listeners.insert(id, listener);

        let inner: Weak<ListenerSetInner> = Arc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = inner.upgrade() {
                inner.listeners.remove(&id);
            }
        })
    }

    /// Deliver `message` to every attached listener. Returns how many were invoked.
    pub fn dispatch(&self, message: &Value) -> usize {
        let snapshot: Vec<Listener> = self
            .inner
            .listeners
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        for listener in &snapshot {
            listener(message);
        }
        snapshot.len()
    }

    pub fn len(&self) -> usize {
        self.inner.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.listeners.is_empty()
    }

    pub fn clear(&self) {
        self.inner.listeners.clear();
    }
}

impl fmt::Debug for ListenerSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerSet")
            .field("listeners", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    #[test]
    fn unsubscribe_detaches_listener() {
        let set = ListenerSet::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        let sub = set.attach(Arc::new(move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        }));

        assert_eq!(set.dispatch(&json!(1)), 1);
        sub.unsubscribe();
        assert_eq!(set.dispatch(&json!(2)), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn listener_can_detach_itself_during_dispatch() {
        let set = ListenerSet::new();
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
        let hits = Arc::new(AtomicUsize::new(0));

        let s = Arc::clone(&slot);
        let h = Arc::clone(&hits);
        let sub = set.attach(Arc::new(move |_| {
            h.fetch_add(1, Ordering::SeqCst);
            if let Some(sub) = s.lock().unwrap().take() {
                sub.unsubscribe();
            }
        }));
        *slot.lock().unwrap() = Some(sub);

        set.dispatch(&json!("first"));
        set.dispatch(&json!("second"));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(set.is_empty());
    }
}
