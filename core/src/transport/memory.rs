use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, trace};

use super::{Listener, ListenerSet, Subscription, Transport};
use crate::{ParleyError, Result};

/// Address of one endpoint on a [`MemoryHub`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EndpointId(u64);

impl EndpointId {
    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "endpoint-{}", self.0)
    }
}

#[derive(Default)]
struct HubInner {
    next_id: AtomicU64,
    endpoints: DashMap<EndpointId, ListenerSet>,
    closed: AtomicBool,
}

/// In-process message hub connecting any number of endpoints.
///
/// A send without a target reaches every other endpoint on the hub (the
/// sender does not hear itself, like a broadcast channel). A send with an
/// [`EndpointId`] target reaches that endpoint only. Delivery is synchronous:
/// listeners run before `send` returns.
#[derive(Clone, Default)]
pub struct MemoryHub {
    inner: Arc<HubInner>,
}

impl MemoryHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a new endpoint to the hub.
    pub fn endpoint(&self) -> MemoryTransport {
        let id = EndpointId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let listeners = ListenerSet::new();
        self.inner.endpoints.insert(id, listeners.clone());
        debug!(target: "parley", endpoint = %id, "Memory endpoint attached");
        MemoryTransport {
            id,
            hub: self.clone(),
            listeners,
            namespace: None,
        }
    }

    pub fn endpoint_count(&self) -> usize {
        self.inner.endpoints.len()
    }

    /// Refuse every later send on every endpoint.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.inner.endpoints.clear();
        debug!(target: "parley", "Memory hub closed");
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    fn deliver(
        &self,
        from: EndpointId,
        message: &Value,
        target: Option<EndpointId>,
    ) -> Result<usize> {
        if self.is_closed() {
            return Err(ParleyError::Transport("memory hub is closed".into()));
        }
        if !self.inner.endpoints.contains_key(&from) {
            return Err(ParleyError::Transport(format!("{} is disconnected", from)));
        }

        // Clone the listener sets out so no shard guard is held during delivery
        let recipients: Vec<ListenerSet> = match target {
            Some(to) => {
                let set = self
                    .inner
                    .endpoints
                    .get(&to)
                    .map(|entry| entry.value().clone())
                    .ok_or_else(|| ParleyError::Transport(format!("unknown {}", to)))?;
                vec![set]
            }
            None => self
                .inner
                .endpoints
                .iter()
                .filter(|entry| *entry.key() != from)
                .map(|entry| entry.value().clone())
                .collect(),
        };

        let delivered: usize = recipients.iter().map(|set| set.dispatch(message)).sum();
        trace!(target: "parley", from = %from, delivered, "Memory hub delivered message");
        Ok(delivered)
    }
}

/// One endpoint of a [`MemoryHub`].
///
/// Cloning yields another handle to the same endpoint; listeners attached
/// through any clone share one listener table.
#[derive(Clone)]
pub struct MemoryTransport {
    id: EndpointId,
    hub: MemoryHub,
    listeners: ListenerSet,
    namespace: Option<String>,
}

impl MemoryTransport {
    /// Two endpoints on a private hub, each hearing only the other.
    pub fn pair() -> (MemoryTransport, MemoryTransport) {
        let hub = MemoryHub::new();
        (hub.endpoint(), hub.endpoint())
    }

    /// Advertise a namespace to engines built on this endpoint.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn id(&self) -> EndpointId {
        self.id
    }

    pub fn hub(&self) -> &MemoryHub {
        &self.hub
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Detach this endpoint from its hub; later sends to or from it fail.
    pub fn disconnect(&self) {
        self.hub.inner.endpoints.remove(&self.id);
        self.listeners.clear();
        debug!(target: "parley", endpoint = %self.id, "Memory endpoint disconnected");
    }
}

impl fmt::Debug for MemoryTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryTransport")
            .field("id", &self.id)
            .field("listeners", &self.listeners.len())
            .field("namespace", &self.namespace)
            .finish()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    type Target = EndpointId;

    fn listen(&self, listener: Listener) -> Subscription {
        self.listeners.attach(listener)
    }

    async fn send(&self, message: Value, target: Option<EndpointId>) -> Result<()> {
        self.hub.deliver(self.id, &message, target).map(|_| ())
    }

    fn namespace(&self) -> Option<String> {
        self.namespace.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    fn recorder(transport: &MemoryTransport) -> Arc<Mutex<Vec<Value>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        let _sub = transport.listen(Arc::new(move |msg: &Value| {
            s.lock().unwrap().push(msg.clone());
        }));
        seen
    }

    #[tokio::test]
    async fn broadcast_skips_sender() {
        let hub = MemoryHub::new();
        let a = hub.endpoint();
        let b = hub.endpoint();
        let c = hub.endpoint();
        let seen_a = recorder(&a);
        let seen_b = recorder(&b);
        let seen_c = recorder(&c);

        a.send(json!("hello"), None).await.unwrap();

        assert!(seen_a.lock().unwrap().is_empty());
        assert_eq!(seen_b.lock().unwrap().as_slice(), &[json!("hello")]);
        assert_eq!(seen_c.lock().unwrap().as_slice(), &[json!("hello")]);
    }

    #[tokio::test]
    async fn targeted_send_reaches_one_endpoint() {
        let hub = MemoryHub::new();
        let a = hub.endpoint();
        let b = hub.endpoint();
        let c = hub.endpoint();
        let seen_b = recorder(&b);
        let seen_c = recorder(&c);

        a.send(json!(1), Some(c.id())).await.unwrap();

        assert!(seen_b.lock().unwrap().is_empty());
        assert_eq!(seen_c.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn closed_hub_rejects_sends() {
        let (a, _b) = MemoryTransport::pair();
        a.hub().close();
        let err = a.send(json!(1), None).await.unwrap_err();
        assert!(matches!(err, ParleyError::Transport(_)));
    }

    #[tokio::test]
    async fn unknown_target_is_an_error() {
        let (a, b) = MemoryTransport::pair();
        let target = b.id();
        b.disconnect();
        assert!(a.send(json!(1), Some(target)).await.is_err());
    }
}
