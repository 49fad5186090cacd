use std::fs;
use std::path::Path;
use std::time::Duration;

use parley_core::{EngineConfig, DEFAULT_NAMESPACE};

const DEMO_NAMESPACE: &str = "calculator";
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Configuration for the calculator demo
#[derive(Clone, Debug, PartialEq)]
pub struct CalculatorConfig {
    /// Engine settings shared by host and worker
    pub engine: EngineConfig,
    /// Artificial delay applied by `slow_echo`
    pub slow_echo_delay_ms: u64,
    /// `RUST_LOG` fallback for the worker process
    pub worker_log_filter: String,
}

impl Default for CalculatorConfig {
    fn default() -> Self {
        Self::from_engine(EngineConfig::from_env())
    }
}

impl CalculatorConfig {
    /// Fill what the engine config leaves open with the demo's defaults.
    fn from_engine(mut engine: EngineConfig) -> Self {
        engine.namespace.get_or_insert_with(|| DEMO_NAMESPACE.to_string());
        engine.request_timeout.get_or_insert(DEFAULT_REQUEST_TIMEOUT);
        Self {
            engine,
            slow_echo_delay_ms: std::env::var("SLOW_ECHO_DELAY_MS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(250),
            worker_log_filter: std::env::var("WORKER_LOG")
                .unwrap_or_else(|_| "info,parley=debug".to_string()),
        }
    }

    /// Load configuration from a TOML file (path via CALCULATOR_CONFIG or ./calculator.toml),
    /// overlaying values onto env-driven defaults.
    pub fn load() -> Self {
        let default = Self::default();
        let path = std::env::var("CALCULATOR_CONFIG").unwrap_or_else(|_| "calculator.toml".into());
        let p = Path::new(&path);
        if !p.exists() {
            tracing::debug!(target: "calculator", path = %path, "No TOML config found; using defaults/env");
            return default;
        }
        match fs::read_to_string(p) {
            Ok(s) => Self::from_toml_str(&s, default),
            Err(e) => {
                tracing::warn!(target: "calculator", error = %e, "Failed to read TOML; using defaults");
                default
            }
        }
    }

    fn from_toml_str(s: &str, default: Self) -> Self {
        match toml::from_str::<CalculatorToml>(s) {
            Ok(t) => t.overlay(default),
            Err(e) => {
                tracing::warn!(target: "calculator", error = %e, "Failed to parse TOML; using defaults");
                default
            }
        }
    }

    pub fn namespace(&self) -> &str {
        self.engine.namespace.as_deref().unwrap_or(DEFAULT_NAMESPACE)
    }

    pub fn engine_config(&self) -> EngineConfig {
        self.engine.clone()
    }

    pub fn slow_echo_delay(&self) -> Duration {
        Duration::from_millis(self.slow_echo_delay_ms)
    }

    /// Environment handed to the worker process so it runs with the same settings.
    pub fn worker_env(&self) -> Vec<(&'static str, String)> {
        let mut env = vec![
            (parley_core::config::ENV_NAMESPACE, self.namespace().to_string()),
            ("SLOW_ECHO_DELAY_MS", self.slow_echo_delay_ms.to_string()),
            ("WORKER_LOG", self.worker_log_filter.clone()),
        ];
        if let Some(timeout) = self.engine.request_timeout {
            env.push((
                parley_core::config::ENV_REQUEST_TIMEOUT_MS,
                timeout.as_millis().to_string(),
            ));
        }
        env
    }
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
struct CalculatorToml {
    pub namespace: Option<String>,
    pub request_timeout_ms: Option<u64>,
    pub slow_echo_delay_ms: Option<u64>,
    pub worker_log_filter: Option<String>,
}

impl CalculatorToml {
    fn overlay(self, mut base: CalculatorConfig) -> CalculatorConfig {
        if let Some(x) = self.namespace.filter(|s| !s.is_empty()) {
            base.engine.namespace = Some(x);
        }
        // Same rule as PARLEY_REQUEST_TIMEOUT_MS: zero is ignored
        if let Some(x) = self.request_timeout_ms.filter(|ms| *ms > 0) {
            base.engine.request_timeout = Some(Duration::from_millis(x));
        }
        if let Some(x) = self.slow_echo_delay_ms {
            base.slow_echo_delay_ms = x;
        }
        if let Some(x) = self.worker_log_filter {
            base.worker_log_filter = x;
        }
        base
    }
}
