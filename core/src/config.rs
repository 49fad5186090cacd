use std::time::Duration;

use crate::envelope::DEFAULT_NAMESPACE;

/// Environment variable naming the engine namespace.
pub const ENV_NAMESPACE: &str = "PARLEY_NAMESPACE";
/// Environment variable holding the default request timeout in milliseconds.
pub const ENV_REQUEST_TIMEOUT_MS: &str = "PARLEY_REQUEST_TIMEOUT_MS";

/// Engine configuration captured at construction time.
///
/// Both fields are optional. Without a namespace the engine uses the
/// transport's namespace, then `"default"`. Without a timeout requests wait
/// for their response indefinitely.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use parley_core::EngineConfig;
///
/// let cfg = EngineConfig::new()
///     .with_namespace("worker")
///     .with_request_timeout(Duration::from_secs(5));
/// assert_eq!(cfg.resolve_namespace(None), "worker");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineConfig {
    pub namespace: Option<String>,
    pub request_timeout: Option<Duration>,
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Read `PARLEY_NAMESPACE` and `PARLEY_REQUEST_TIMEOUT_MS`.
    /// Empty or unparsable values are ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`EngineConfig::from_env`], reading variables through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        Self {
            namespace: lookup(ENV_NAMESPACE)
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
            request_timeout: lookup(ENV_REQUEST_TIMEOUT_MS)
                .and_then(|v| v.trim().parse::<u64>().ok())
                .filter(|ms| *ms > 0)
                .map(Duration::from_millis),
        }
    }

    /// Namespace an engine built with this config uses on a transport
    /// advertising `transport_namespace`.
    pub fn resolve_namespace(&self, transport_namespace: Option<String>) -> String {
        self.namespace
            .clone()
            .or(transport_namespace)
            .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string())
    }
}
