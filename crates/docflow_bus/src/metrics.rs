//! Bus counters.
//!
//! Lock-free atomics, one instance per [`crate::MessageBusAdapter`] so
//! separate buses (and tests) never share counts.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug)]
pub struct BusMetrics {
    pub published: AtomicU64,
    pub publish_failures: AtomicU64,
    pub acked: AtomicU64,
    pub requeued: AtomicU64,
    pub dead_lettered: AtomicU64,
    pub handler_timeouts: AtomicU64,
}

impl Default for BusMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl BusMetrics {
    pub const fn new() -> Self {
        Self {
            published: AtomicU64::new(0),
            publish_failures: AtomicU64::new(0),
            acked: AtomicU64::new(0),
            requeued: AtomicU64::new(0),
            dead_lettered: AtomicU64::new(0),
            handler_timeouts: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn inc_published(&self) {
        self.published.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_publish_failures(&self) {
        self.publish_failures.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_acked(&self) {
        self.acked.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_requeued(&self) {
        self.requeued.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_dead_lettered(&self) {
        self.dead_lettered.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_handler_timeouts(&self) {
        self.handler_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> BusMetricsSnapshot {
        BusMetricsSnapshot {
            published: self.published.load(Ordering::Relaxed),
            publish_failures: self.publish_failures.load(Ordering::Relaxed),
            acked: self.acked.load(Ordering::Relaxed),
            requeued: self.requeued.load(Ordering::Relaxed),
            dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
            handler_timeouts: self.handler_timeouts.load(Ordering::Relaxed),
        }
    }

    /// Prometheus text exposition.
    pub fn prometheus_format(&self) -> String {
        let s = self.snapshot();
        let counters = [
            ("published", "Envelopes published", s.published),
            ("publish_failures", "Publish attempts that failed", s.publish_failures),
            ("acked", "Deliveries acknowledged", s.acked),
            ("requeued", "Deliveries requeued after a transient failure", s.requeued),
            ("dead_lettered", "Deliveries rejected to the dead-letter queue", s.dead_lettered),
            ("handler_timeouts", "Collaborator calls that exceeded the stage timeout", s.handler_timeouts),
        ];
        let mut out = String::new();
        for (name, help, value) in counters {
            out.push_str(&format!(
                "# HELP docflow_bus_{name}_total {help}\n# TYPE docflow_bus_{name}_total counter\ndocflow_bus_{name}_total {value}\n\n"
            ));
        }
        out
    }
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BusMetricsSnapshot {
    pub published: u64,
    pub publish_failures: u64,
    pub acked: u64,
    pub requeued: u64,
    pub dead_lettered: u64,
    pub handler_timeouts: u64,
}
