//! # Dispatch Pool
//!
//! Runs the detached phase of webhook handling on a fixed set of workers.
//!
//! ```text
//! submit() --try_send--> [ingress queue] --> router --> [worker 0 queue] --> worker 0
//!                                              |   \--> [worker 1 queue] --> worker 1
//!                                         normalize     ...
//!                                         hash(session)
//! ```
//!
//! The router normalizes raw deliveries and pins every session (one Strava
//! entity) to a single worker, so events for the same activity or athlete are
//! handled one at a time in arrival order. Each job runs in its own task; a
//! panic is caught through the join error and recorded as a failed outcome.
//!
//! Submission never waits: when the ingress queue is full the job is
//! rejected and [`DispatchPool::submit_or_dead_letter`] moves it to the
//! dead-letter store instead. The router waits at most `route_timeout_ms` for
//! room in a worker queue; an event whose worker stays saturated is
//! dead-lettered so the other workers keep receiving events.

use crate::config::DispatchConfig;
use crate::metrics::ServiceMetrics;
use bytes::Bytes;
use serde::Serialize;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use strava_relay_core::{
    DeadLetterPayload, DeadLetterReason, DeadLetterRecord, Dispatcher, EventId, MetricsCollector,
    ProcessingOutcome, ProcessingStatus, Timestamp, WebhookEvent,
};
use tokio::sync::mpsc::{
    self,
    error::{SendTimeoutError, TrySendError},
};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Reasons a job was not accepted
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    #[error("Dispatch queue is full")]
    QueueFull,

    #[error("Dispatch pool is shutting down")]
    ShuttingDown,
}

/// Work handed to the pool
#[derive(Debug, Clone)]
pub struct DispatchJob {
    pub event_id: EventId,
    pub received_at: Timestamp,
    pub payload: JobPayload,
}

#[derive(Debug, Clone)]
pub enum JobPayload {
    /// Delivery body as received; normalized by the router.
    Raw(Bytes),
    Event(WebhookEvent),
}

impl DispatchJob {
    /// A fresh delivery body.
    pub fn raw(event_id: EventId, body: Bytes, received_at: Timestamp) -> Self {
        Self {
            event_id,
            received_at,
            payload: JobPayload::Raw(body),
        }
    }

    /// An already normalized event.
    pub fn event(event: WebhookEvent) -> Self {
        Self {
            event_id: event.event_id,
            received_at: event.received_at,
            payload: JobPayload::Event(event),
        }
    }

    /// Rebuild the job captured in a dead-letter record.
    pub fn from_dead_letter(record: &DeadLetterRecord) -> Self {
        match &record.payload {
            DeadLetterPayload::Raw(body) => Self::raw(
                record.event_id,
                Bytes::from(body.clone().into_bytes()),
                record.received_at,
            ),
            DeadLetterPayload::Event(event) => Self::event(event.clone()),
        }
    }

    fn into_dead_letter(self, reason: DeadLetterReason, message: &str) -> DeadLetterRecord {
        match self.payload {
            JobPayload::Raw(body) => {
                let mut record =
                    DeadLetterRecord::for_raw(self.event_id, &body, self.received_at, reason);
                record.last_error = Some(message.to_string());
                record
            }
            JobPayload::Event(event) => {
                DeadLetterRecord::for_event(event, reason, Some(message.to_string()), 0)
            }
        }
    }
}

/// Point-in-time view of pool activity
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispatchStats {
    pub workers: usize,
    pub queue_capacity: usize,
    pub draining: bool,
    pub submitted: u64,
    pub rejected: u64,
    pub in_flight: u64,
    pub processed: u64,
    pub skipped: u64,
    pub failed: u64,
}

#[derive(Debug, Default)]
struct Counters {
    submitted: AtomicU64,
    rejected: AtomicU64,
    in_flight: AtomicU64,
    processed: AtomicU64,
    skipped: AtomicU64,
    failed: AtomicU64,
}

/// State shared by the pool handle, the router and the workers
struct Shared {
    dispatcher: Arc<Dispatcher>,
    counters: Counters,
    metrics: Option<Arc<ServiceMetrics>>,
}

impl Shared {
    fn job_started(&self) {
        self.counters.in_flight.fetch_add(1, Ordering::SeqCst);
        if let Some(metrics) = &self.metrics {
            metrics.dispatch_in_flight.inc();
        }
    }

    fn job_rejected(&self) {
        self.counters.rejected.fetch_add(1, Ordering::Relaxed);
        if let Some(metrics) = &self.metrics {
            metrics.dispatch_queue_rejections_total.inc();
        }
    }

    fn job_finished(&self, outcome: &ProcessingOutcome) {
        let counter = match outcome.status {
            ProcessingStatus::Processed => &self.counters.processed,
            ProcessingStatus::Skipped(_) => &self.counters.skipped,
            ProcessingStatus::Failed { .. } => &self.counters.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.job_dropped();
    }

    fn job_dropped(&self) {
        self.counters.in_flight.fetch_sub(1, Ordering::SeqCst);
        if let Some(metrics) = &self.metrics {
            metrics.dispatch_in_flight.dec();
        }
    }

    async fn store_overloaded(&self, record: DeadLetterRecord) {
        let event_id = record.event_id;
        match self.dispatcher.dead_letters().store(record).await {
            Ok(()) => {
                if let Some(metrics) = &self.metrics {
                    metrics.record_dead_letter(DeadLetterReason::Overloaded.label());
                }
            }
            Err(e) => error!(
                event_id = %event_id,
                error = %e,
                "Rejected event could not be dead-lettered and is lost"
            ),
        }
    }
}

/// Bounded worker pool for detached event processing
pub struct DispatchPool {
    shared: Arc<Shared>,
    ingress: RwLock<Option<mpsc::Sender<DispatchJob>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    draining: AtomicBool,
    workers: usize,
    queue_capacity: usize,
}

impl DispatchPool {
    /// Spawn the router and workers.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(
        dispatcher: Arc<Dispatcher>,
        config: &DispatchConfig,
        metrics: Option<Arc<ServiceMetrics>>,
    ) -> Arc<Self> {
        let workers = config.worker_count.max(1);
        let queue_capacity = config.queue_capacity.max(1);
        let route_timeout = Duration::from_millis(config.route_timeout_ms.max(1));

        let shared = Arc::new(Shared {
            dispatcher,
            counters: Counters::default(),
            metrics,
        });

        let mut tasks = Vec::with_capacity(workers + 1);
        let mut worker_queues = Vec::with_capacity(workers);
        for worker_id in 0..workers {
            let (tx, rx) = mpsc::channel(queue_capacity);
            worker_queues.push(tx);
            tasks.push(tokio::spawn(run_worker(worker_id, rx, shared.clone())));
        }

        let (ingress_tx, ingress_rx) = mpsc::channel(queue_capacity);
        tasks.push(tokio::spawn(run_router(
            ingress_rx,
            worker_queues,
            route_timeout,
            shared.clone(),
        )));

        info!(workers, queue_capacity, "Dispatch pool started");

        Arc::new(Self {
            shared,
            ingress: RwLock::new(Some(ingress_tx)),
            tasks: Mutex::new(tasks),
            draining: AtomicBool::new(false),
            workers,
            queue_capacity,
        })
    }

    /// Queue a job without waiting.
    pub fn submit(&self, job: DispatchJob) -> Result<(), DispatchError> {
        self.enqueue(job).map_err(|(error, _)| error)
    }

    /// Queue a job, moving it to the dead-letter store when rejected.
    ///
    /// The dead-letter write happens on a separate task so the caller is
    /// never delayed by storage.
    pub fn submit_or_dead_letter(&self, job: DispatchJob) -> Result<(), DispatchError> {
        let (error, job) = match self.enqueue(job) {
            Ok(()) => return Ok(()),
            Err(rejected) => rejected,
        };

        warn!(
            event_id = %job.event_id,
            error = %error,
            "Dispatch rejected event, moving it to the dead-letter store"
        );

        let record = job.into_dead_letter(DeadLetterReason::Overloaded, &error.to_string());
        let shared = self.shared.clone();
        tokio::spawn(async move { shared.store_overloaded(record).await });

        Err(error)
    }

    fn enqueue(&self, job: DispatchJob) -> Result<(), (DispatchError, DispatchJob)> {
        if self.is_draining() {
            self.shared.job_rejected();
            return Err((DispatchError::ShuttingDown, job));
        }

        let ingress = self.ingress.read().unwrap_or_else(PoisonError::into_inner);
        let Some(sender) = ingress.as_ref() else {
            self.shared.job_rejected();
            return Err((DispatchError::ShuttingDown, job));
        };

        // Count before sending so a fast worker never decrements first.
        self.shared.job_started();
        match sender.try_send(job) {
            Ok(()) => {
                self.shared.counters.submitted.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(e) => {
                self.shared.job_dropped();
                self.shared.job_rejected();
                match e {
                    TrySendError::Full(job) => Err((DispatchError::QueueFull, job)),
                    TrySendError::Closed(job) => Err((DispatchError::ShuttingDown, job)),
                }
            }
        }
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> DispatchStats {
        let c = &self.shared.counters;
        DispatchStats {
            workers: self.workers,
            queue_capacity: self.queue_capacity,
            draining: self.is_draining(),
            submitted: c.submitted.load(Ordering::Relaxed),
            rejected: c.rejected.load(Ordering::Relaxed),
            in_flight: c.in_flight.load(Ordering::SeqCst),
            processed: c.processed.load(Ordering::Relaxed),
            skipped: c.skipped.load(Ordering::Relaxed),
            failed: c.failed.load(Ordering::Relaxed),
        }
    }

    /// Stop accepting jobs and wait for queued and running jobs to finish.
    ///
    /// Returns `true` when everything drained within `timeout`.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        self.draining.store(true, Ordering::SeqCst);

        // Dropping the only ingress sender lets the router, then the workers,
        // run out of input and exit.
        drop(
            self.ingress
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .take(),
        );

        let tasks = std::mem::take(
            &mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner),
        );
        if tasks.is_empty() {
            return true;
        }

        info!(
            in_flight = self.shared.counters.in_flight.load(Ordering::SeqCst),
            timeout_secs = timeout.as_secs(),
            "Draining dispatch pool"
        );

        match tokio::time::timeout(timeout, futures::future::join_all(tasks)).await {
            Ok(_) => {
                info!("Dispatch pool drained");
                true
            }
            Err(_) => {
                warn!(
                    abandoned = self.shared.counters.in_flight.load(Ordering::SeqCst),
                    "Dispatch pool did not drain before timeout"
                );
                false
            }
        }
    }
}

impl std::fmt::Debug for DispatchPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchPool")
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

fn worker_for(event: &WebhookEvent, workers: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    event.session_id().hash(&mut hasher);
    (hasher.finish() % workers as u64) as usize
}

async fn run_router(
    mut ingress: mpsc::Receiver<DispatchJob>,
    workers: Vec<mpsc::Sender<WebhookEvent>>,
    route_timeout: Duration,
    shared: Arc<Shared>,
) {
    while let Some(job) = ingress.recv().await {
        let event = match job.payload {
            JobPayload::Event(event) => event,
            JobPayload::Raw(body) => {
                match shared
                    .dispatcher
                    .normalize(job.event_id, &body, job.received_at)
                {
                    Ok(event) => event,
                    Err(outcome) => {
                        shared.job_finished(&outcome);
                        continue;
                    }
                }
            }
        };

        let worker_id = worker_for(&event, workers.len());
        debug!(event_id = %event.event_id, worker_id, "Routing event to worker");

        // Waiting here holds back the ingress queue, which is what makes
        // submit() reject once the whole pool is saturated.
        match workers[worker_id].send_timeout(event, route_timeout).await {
            Ok(()) => {}
            Err(SendTimeoutError::Timeout(event)) => {
                warn!(
                    event_id = %event.event_id,
                    worker_id,
                    timeout_ms = route_timeout.as_millis() as u64,
                    "Worker queue stayed full, moving event to the dead-letter store"
                );
                shared.job_dropped();
                shared.job_rejected();
                let record = DeadLetterRecord::for_event(
                    event,
                    DeadLetterReason::Overloaded,
                    Some(format!("worker {} queue full", worker_id)),
                    0,
                );
                shared.store_overloaded(record).await;
            }
            Err(SendTimeoutError::Closed(event)) => {
                error!(event_id = %event.event_id, worker_id, "Worker stopped, dropping event");
                shared.job_dropped();
            }
        }
    }

    debug!("Dispatch router stopped");
}

async fn run_worker(
    worker_id: usize,
    mut queue: mpsc::Receiver<WebhookEvent>,
    shared: Arc<Shared>,
) {
    while let Some(event) = queue.recv().await {
        let dispatcher = shared.dispatcher.clone();
        let job = event.clone();
        let handle = tokio::spawn(async move { dispatcher.dispatch(job).await });

        let outcome = match handle.await {
            Ok(outcome) => outcome,
            Err(e) if e.is_panic() => shared.dispatcher.record_panic(event).await,
            Err(e) => {
                error!(
                    event_id = %event.event_id,
                    worker_id,
                    error = %e,
                    "Dispatch task cancelled"
                );
                shared.job_dropped();
                continue;
            }
        };

        shared.job_finished(&outcome);
    }

    debug!(worker_id, "Dispatch worker stopped");
}

#[cfg(test)]
#[path = "dispatch_pool_tests.rs"]
mod tests;
