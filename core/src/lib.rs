// Parley Core Library
// Request/response correlation over caller-supplied message transports

pub mod category;
pub mod config;
pub mod correlation;
pub mod dispatch;
pub mod engine;
pub mod envelope;
pub mod pending;
pub mod registry;
pub mod stats;
pub mod telemetry;
pub mod transport;

// Export core types
pub use category::{Category, Operation};
pub use config::EngineConfig;
pub use correlation::CorrelationId;
pub use dispatch::{Inbound, NamespaceGate};
pub use engine::{deferred, Call, DeferredEngine, Engine};
pub use envelope::{Envelope, RemoteError, DEFAULT_NAMESPACE};
pub use pending::{PendingReply, PendingTable};
pub use registry::{handler, Handler, HandlerError, HandlerTable, Registration, RegistrationHandle};
pub use stats::EngineStats;
pub use transport::{
    Listener, ListenerSet, MemoryHub, MemoryTransport, StreamTransport, Subscription, Transport,
};

// Error types
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ParleyError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Request '{operation}' timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    #[error("Request was cancelled before a response arrived")]
    Cancelled,

    #[error("Remote handler for '{operation}' failed: [{code}] {message}")]
    Remote {
        operation: String,
        code: String,
        message: String,
    },

    #[error("Unknown operation: {0}")]
    UnknownOperation(String),

    #[error("No tokio runtime available to run handlers")]
    NoRuntime,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}
pub type Result<T> = std::result::Result<T, ParleyError>;
