use std::sync::Arc;

use serde_json::Value;

use crate::envelope::Envelope;

/// What an inbound raw value means to one engine.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Request addressed to this engine's namespace
    Request(Envelope),
    /// Response addressed to this engine's namespace
    Response(Envelope),
    /// Envelope belonging to another namespace on the same transport
    Foreign,
    /// Not an envelope at all
    Malformed,
}

/// Label check keeping engines that share a transport apart.
///
/// The namespace is compared on the raw value before anything else is
/// decoded, so foreign traffic costs one string comparison. This is a
/// collision-avoidance label, not an access control.
#[derive(Debug, Clone)]
pub struct NamespaceGate {
    namespace: Arc<str>,
}

impl NamespaceGate {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: Arc::from(namespace.into()),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn admit(&self, envelope: &Envelope) -> bool {
        envelope.namespace == *self.namespace
    }

    /// Namespace check on a raw value, before any decoding.
    pub fn admit_raw(&self, raw: &Value) -> bool {
        raw.get("namespace").and_then(Value::as_str) == Some(&*self.namespace)
    }

    pub fn classify(&self, raw: &Value) -> Inbound {
        if !self.admit_raw(raw) {
            return match raw.get("namespace") {
                Some(Value::String(_)) => Inbound::Foreign,
                _ => Inbound::Malformed,
            };
        }
        match Envelope::from_value(raw) {
            Some(envelope) if envelope.is_response => Inbound::Response(envelope),
            Some(envelope) => Inbound::Request(envelope),
            None => Inbound::Malformed,
        }
    }
}
