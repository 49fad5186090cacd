use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Engine statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineStats {
    pub requests_sent: u64,
    pub responses_resolved: u64,
    pub requests_handled: u64,
    pub handler_failures: u64,
    pub ignored_envelopes: u64,
    pub timeouts: u64,
    pub pending: usize,
}

// Live counters shared by an engine, its listeners and its pending replies
#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub requests_sent: AtomicU64,
    pub responses_resolved: AtomicU64,
    pub requests_handled: AtomicU64,
    pub handler_failures: AtomicU64,
    pub ignored_envelopes: AtomicU64,
    pub timeouts: AtomicU64,
}

impl Counters {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, pending: usize) -> EngineStats {
        EngineStats {
            requests_sent: self.requests_sent.load(Ordering::Relaxed),
            responses_resolved: self.responses_resolved.load(Ordering::Relaxed),
            requests_handled: self.requests_handled.load(Ordering::Relaxed),
            handler_failures: self.handler_failures.load(Ordering::Relaxed),
            ignored_envelopes: self.ignored_envelopes.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            pending,
        }
    }
}
