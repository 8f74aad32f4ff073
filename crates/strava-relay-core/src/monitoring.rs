//! # Monitoring
//!
//! Metrics seam for the detached processing phase. The API crate injects a
//! Prometheus-backed collector; tests and tools use [`NoOpMetricsCollector`].
//!
//! Metric recording never fails and never affects event processing.
//!
//! ```rust
//! use strava_relay_core::monitoring::{MetricsCollector, NoOpMetricsCollector};
//! use std::sync::Arc;
//!
//! let metrics: Arc<dyn MetricsCollector> = Arc::new(NoOpMetricsCollector);
//! metrics.record_outcome("processed");
//! ```

use crate::webhook::EventKind;
use std::time::Duration;

/// Records processing metrics.
pub trait MetricsCollector: Send + Sync {
    /// Final outcome of one event (`processed`, `skipped`, `failed`).
    fn record_outcome(&self, status: &str);

    /// One handler call, successful or not.
    fn record_handler_call(&self, kind: EventKind, duration: Duration, success: bool);

    /// A handler call is about to be retried.
    fn record_handler_retry(&self, kind: EventKind);

    /// An event was written to the dead-letter store.
    fn record_dead_letter(&self, reason: &str);
}

/// Collector that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpMetricsCollector;

impl MetricsCollector for NoOpMetricsCollector {
    fn record_outcome(&self, _status: &str) {}

    fn record_handler_call(&self, _kind: EventKind, _duration: Duration, _success: bool) {}

    fn record_handler_retry(&self, _kind: EventKind) {}

    fn record_dead_letter(&self, _reason: &str) {}
}
