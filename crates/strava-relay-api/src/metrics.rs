//! Metrics collection and observability types for the API service.

use prometheus::{Histogram, HistogramVec, IntCounter, IntCounterVec, IntGauge};
use std::sync::Arc;
use std::time::Duration;
use strava_relay_core::webhook::EventKind;
use strava_relay_core::MetricsCollector;

/// Service metrics for observability
///
/// Registered with the default Prometheus registry, so construct it once per
/// process and share the `Arc`.
#[derive(Debug)]
pub struct ServiceMetrics {
    // HTTP request metrics
    pub http_requests_total: IntCounter,
    pub http_request_duration: Histogram,

    // Webhook intake metrics
    pub webhook_requests_total: IntCounter,
    pub verification_failures_total: IntCounter,
    pub events_acknowledged_total: IntCounter,
    pub payloads_dropped_total: IntCounter,

    // Dispatch metrics
    pub event_outcomes_total: IntCounterVec,
    pub dispatch_queue_rejections_total: IntCounter,
    pub dispatch_in_flight: IntGauge,

    // Handler metrics
    pub handler_calls_total: IntCounterVec,
    pub handler_duration_seconds: HistogramVec,
    pub handler_retries_total: IntCounterVec,
    pub dead_letters_total: IntCounterVec,

    // Administrative operations
    pub replay_operations_total: IntCounter,
}

impl ServiceMetrics {
    pub fn new() -> Result<Arc<Self>, prometheus::Error> {
        use prometheus::{
            register_histogram, register_histogram_vec, register_int_counter,
            register_int_counter_vec, register_int_gauge,
        };

        Ok(Arc::new(Self {
            http_requests_total: register_int_counter!(
                "http_requests_total",
                "Total number of HTTP requests",
            )?,
            http_request_duration: register_histogram!(
                "http_request_duration_seconds",
                "HTTP request processing time",
                vec![0.001, 0.01, 0.1, 1.0, 10.0]
            )?,

            webhook_requests_total: register_int_counter!(
                "webhook_requests_total",
                "Total webhook requests received (handshakes and deliveries)"
            )?,
            verification_failures_total: register_int_counter!(
                "webhook_verification_failures_total",
                "Subscription handshakes rejected"
            )?,
            events_acknowledged_total: register_int_counter!(
                "webhook_events_acknowledged_total",
                "Event deliveries acknowledged with EVENT_RECEIVED"
            )?,
            payloads_dropped_total: register_int_counter!(
                "webhook_payloads_dropped_total",
                "Acknowledged deliveries whose body was over the size limit or unreadable"
            )?,

            event_outcomes_total: register_int_counter_vec!(
                "webhook_event_outcomes_total",
                "Final processing outcome of each event",
                &["status"]
            )?,
            dispatch_queue_rejections_total: register_int_counter!(
                "dispatch_queue_rejections_total",
                "Events rejected because the dispatch queue was full or draining"
            )?,
            dispatch_in_flight: register_int_gauge!(
                "dispatch_in_flight",
                "Events accepted by the dispatch pool and not yet finished"
            )?,

            handler_calls_total: register_int_counter_vec!(
                "handler_calls_total",
                "Handler invocations by event kind and result",
                &["kind", "result"]
            )?,
            handler_duration_seconds: register_histogram_vec!(
                "handler_duration_seconds",
                "Handler invocation time distribution",
                &["kind"],
                vec![0.01, 0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 15.0]
            )?,
            handler_retries_total: register_int_counter_vec!(
                "handler_retries_total",
                "Handler attempts scheduled for retry",
                &["kind"]
            )?,
            dead_letters_total: register_int_counter_vec!(
                "dead_letters_total",
                "Events written to the dead-letter store",
                &["reason"]
            )?,

            replay_operations_total: register_int_counter!(
                "replay_operations_total",
                "Dead-lettered events resubmitted for processing"
            )?,
        }))
    }
}

impl MetricsCollector for ServiceMetrics {
    fn record_outcome(&self, status: &str) {
        self.event_outcomes_total.with_label_values(&[status]).inc();
    }

    fn record_handler_call(&self, kind: EventKind, duration: Duration, success: bool) {
        let result = if success { "success" } else { "error" };
        self.handler_calls_total
            .with_label_values(&[kind.as_str(), result])
            .inc();
        self.handler_duration_seconds
            .with_label_values(&[kind.as_str()])
            .observe(duration.as_secs_f64());
    }

    fn record_handler_retry(&self, kind: EventKind) {
        self.handler_retries_total
            .with_label_values(&[kind.as_str()])
            .inc();
    }

    fn record_dead_letter(&self, reason: &str) {
        self.dead_letters_total.with_label_values(&[reason]).inc();
    }
}
