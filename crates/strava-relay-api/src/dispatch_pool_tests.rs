//! Tests for the bounded dispatch pool.

use super::*;
use async_trait::async_trait;
use serde_json::json;
use std::time::Instant;
use strava_relay_core::{
    ActivityHandlers, DeadLetterStore, ExternalObjectId, ExternalOwnerId, HandlerError,
    InMemoryDeadLetterStore, InMemoryEventLedger, InMemoryIdentityStore, UpsertOutcome, UserId,
};
use tokio::sync::Semaphore;

const OWNER: u64 = 134815;

enum Behavior {
    Normal,
    /// Each call waits for a permit.
    Gated(Arc<Semaphore>),
    /// Calls for this activity wait for a permit.
    GatedOn(u64, Arc<Semaphore>),
    /// Calls for this activity panic.
    PanicOn(u64),
    /// The first call sleeps before recording.
    SlowFirst(Duration),
}

struct ScriptedHandlers {
    behavior: Behavior,
    calls: Mutex<Vec<(&'static str, ExternalObjectId)>>,
}

impl ScriptedHandlers {
    fn new(behavior: Behavior) -> Self {
        Self {
            behavior,
            calls: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> Vec<(&'static str, ExternalObjectId)> {
        self.calls.lock().unwrap().clone()
    }

    async fn handle(&self, label: &'static str, object_id: &ExternalObjectId) {
        match &self.behavior {
            Behavior::Normal => {}
            Behavior::Gated(gate) => gate.acquire().await.unwrap().forget(),
            Behavior::GatedOn(id, gate) => {
                if object_id.as_u64() == Some(*id) {
                    gate.acquire().await.unwrap().forget();
                }
            }
            Behavior::PanicOn(id) => {
                if object_id.as_u64() == Some(*id) {
                    panic!("handler exploded on {}", id);
                }
            }
            Behavior::SlowFirst(delay) => {
                if self.calls.lock().unwrap().is_empty() {
                    tokio::time::sleep(*delay).await;
                }
            }
        }
        self.calls.lock().unwrap().push((label, object_id.clone()));
    }
}

#[async_trait]
impl ActivityHandlers for ScriptedHandlers {
    async fn upsert_activity(
        &self,
        _user_id: &UserId,
        activity_id: &ExternalObjectId,
    ) -> Result<UpsertOutcome, HandlerError> {
        self.handle("upsert", activity_id).await;
        Ok(UpsertOutcome::Inserted)
    }

    async fn delete_activity(
        &self,
        _user_id: &UserId,
        activity_id: &ExternalObjectId,
    ) -> Result<bool, HandlerError> {
        self.handle("delete", activity_id).await;
        Ok(true)
    }

    async fn deauthorize(&self, user_id: &UserId) -> Result<bool, HandlerError> {
        self.handle("deauthorize", &ExternalObjectId::new(user_id.as_str()).unwrap())
            .await;
        Ok(true)
    }
}

struct Fixture {
    pool: Arc<DispatchPool>,
    handlers: Arc<ScriptedHandlers>,
    dead_letters: InMemoryDeadLetterStore,
}

fn fixture(behavior: Behavior, worker_count: usize, queue_capacity: usize) -> Fixture {
    fixture_with(
        behavior,
        DispatchConfig {
            worker_count,
            queue_capacity,
            route_timeout_ms: 5_000,
            ..DispatchConfig::default()
        },
    )
}

fn fixture_with(behavior: Behavior, config: DispatchConfig) -> Fixture {
    let identities = InMemoryIdentityStore::new();
    identities.link(ExternalOwnerId::from(OWNER), UserId::new("user-1").unwrap());

    let handlers = Arc::new(ScriptedHandlers::new(behavior));
    let dead_letters = InMemoryDeadLetterStore::new();

    let dispatcher = Dispatcher::new(
        Arc::new(identities),
        handlers.clone(),
        Arc::new(InMemoryEventLedger::new()),
        Arc::new(dead_letters.clone()),
    );

    Fixture {
        pool: DispatchPool::start(Arc::new(dispatcher), &config, None),
        handlers,
        dead_letters,
    }
}

fn activity_job(aspect: &str, object_id: u64, event_time: i64) -> DispatchJob {
    let body = json!({
        "object_type": "activity",
        "object_id": object_id,
        "aspect_type": aspect,
        "owner_id": OWNER,
        "subscription_id": 120475,
        "event_time": event_time,
        "updates": {}
    });
    DispatchJob::raw(
        EventId::new(),
        Bytes::from(serde_json::to_vec(&body).unwrap()),
        Timestamp::now(),
    )
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "condition not met within 5s");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test]
async fn test_submitted_event_is_processed() {
    let f = fixture(Behavior::Normal, 2, 8);

    f.pool.submit(activity_job("create", 42, 1_700_000_000)).unwrap();

    wait_until(|| f.pool.stats().processed == 1).await;
    assert_eq!(
        f.handlers.calls(),
        vec![("upsert", ExternalObjectId::from(42))]
    );

    let stats = f.pool.stats();
    assert_eq!(stats.submitted, 1);
    assert_eq!(stats.in_flight, 0);
}

#[tokio::test]
async fn test_malformed_body_is_skipped_without_handler_call() {
    let f = fixture(Behavior::Normal, 1, 8);

    f.pool
        .submit(DispatchJob::raw(
            EventId::new(),
            Bytes::from_static(b"{not json"),
            Timestamp::now(),
        ))
        .unwrap();

    wait_until(|| f.pool.stats().skipped == 1).await;
    assert!(f.handlers.calls().is_empty());
    assert_eq!(f.pool.stats().in_flight, 0);
}

#[tokio::test]
async fn test_same_entity_events_keep_arrival_order() {
    let f = fixture(Behavior::SlowFirst(Duration::from_millis(50)), 4, 8);

    f.pool.submit(activity_job("create", 42, 1_700_000_000)).unwrap();
    f.pool.submit(activity_job("update", 42, 1_700_000_010)).unwrap();
    f.pool.submit(activity_job("delete", 42, 1_700_000_020)).unwrap();

    wait_until(|| f.pool.stats().processed == 3).await;
    let labels: Vec<_> = f.handlers.calls().into_iter().map(|(label, _)| label).collect();
    assert_eq!(labels, vec!["upsert", "upsert", "delete"]);
}

#[tokio::test]
async fn test_full_queue_rejects_and_dead_letters() {
    let gate = Arc::new(Semaphore::new(0));
    let f = fixture(Behavior::Gated(gate.clone()), 1, 1);

    // One job in the handler, one per queue, one held by the router: the
    // pipeline saturates after a handful of submissions.
    let mut rejected = None;
    for object_id in 0..20 {
        let job = activity_job("create", 100 + object_id, 1_700_000_000);
        match f.pool.submit_or_dead_letter(job.clone()) {
            Ok(()) => tokio::time::sleep(Duration::from_millis(10)).await,
            Err(e) => {
                rejected = Some((e, job.event_id));
                break;
            }
        }
    }

    let (error, event_id) = rejected.expect("pool never reported a full queue");
    assert_eq!(error, DispatchError::QueueFull);
    assert!(f.pool.stats().rejected >= 1);

    let dead_letters = f.dead_letters.clone();
    wait_until(|| !dead_letters.is_empty()).await;
    let record = f.dead_letters.get(&event_id).await.unwrap().unwrap();
    assert_eq!(record.reason, DeadLetterReason::Overloaded);
    assert!(matches!(record.payload, DeadLetterPayload::Raw(_)));

    gate.add_permits(100);
    let submitted = f.pool.stats().submitted;
    wait_until(|| f.pool.stats().processed == submitted).await;
}

#[tokio::test]
async fn test_plain_submit_does_not_dead_letter() {
    let gate = Arc::new(Semaphore::new(0));
    let f = fixture(Behavior::Gated(gate.clone()), 1, 1);

    let mut saw_full = false;
    for object_id in 0..20 {
        if f.pool.submit(activity_job("create", 100 + object_id, 1)).is_err() {
            saw_full = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert!(saw_full);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(f.dead_letters.is_empty());
    gate.add_permits(100);
}

#[tokio::test]
async fn test_saturated_worker_does_not_stall_other_workers() {
    let gate = Arc::new(Semaphore::new(0));
    let f = fixture_with(
        Behavior::GatedOn(1, gate.clone()),
        DispatchConfig {
            worker_count: 2,
            queue_capacity: 1,
            route_timeout_ms: 50,
            ..DispatchConfig::default()
        },
    );

    let activity = |id: u64| {
        WebhookEvent::activity(
            strava_relay_core::AspectType::Update,
            ExternalOwnerId::from(OWNER),
            ExternalObjectId::from(id),
        )
    };
    let busy_worker = worker_for(&activity(1), 2);
    let other_id = (2..1_000)
        .find(|id| worker_for(&activity(*id), 2) != busy_worker)
        .expect("some activity maps to the other worker");

    // Activity 1: one call blocked in the handler, one waiting in the worker
    // queue, and one left over for the router.
    let mut blocked = Vec::new();
    for offset in 0..3 {
        let job = activity_job("update", 1, 1_700_000_000 + offset);
        blocked.push(job.event_id);
        f.pool.submit(job).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    f.pool
        .submit(activity_job("create", other_id, 1_700_000_000))
        .unwrap();
    wait_until(|| {
        f.handlers
            .calls()
            .iter()
            .any(|(_, id)| id.as_u64() == Some(other_id))
    })
    .await;

    let dead_letters = f.dead_letters.clone();
    wait_until(|| !dead_letters.is_empty()).await;
    let records = f.dead_letters.list(10).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].event_id, blocked[2]);
    assert_eq!(records[0].reason, DeadLetterReason::Overloaded);
    assert!(matches!(records[0].payload, DeadLetterPayload::Event(_)));
    assert_eq!(f.pool.stats().rejected, 1);

    gate.add_permits(10);
    wait_until(|| f.pool.stats().processed == 3).await;
    assert_eq!(f.pool.stats().in_flight, 0);
}

#[tokio::test]
async fn test_handler_panic_is_contained() {
    let f = fixture(Behavior::PanicOn(13), 1, 8);

    f.pool.submit(activity_job("create", 13, 1_700_000_000)).unwrap();
    f.pool.submit(activity_job("create", 14, 1_700_000_000)).unwrap();

    wait_until(|| {
        let stats = f.pool.stats();
        stats.failed == 1 && stats.processed == 1
    })
    .await;

    assert_eq!(f.handlers.calls(), vec![("upsert", ExternalObjectId::from(14))]);

    let records = f.dead_letters.list(10).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].reason, DeadLetterReason::HandlerPanicked);
}

#[tokio::test]
async fn test_shutdown_drains_queued_jobs() {
    let f = fixture(Behavior::SlowFirst(Duration::from_millis(30)), 2, 8);

    for object_id in 1..=3 {
        f.pool.submit(activity_job("create", object_id, 1_700_000_000)).unwrap();
    }

    assert!(f.pool.shutdown(Duration::from_secs(5)).await);
    assert!(f.pool.is_draining());
    assert_eq!(f.pool.stats().processed, 3);
    assert_eq!(f.handlers.calls().len(), 3);

    let error = f.pool.submit(activity_job("create", 9, 1)).unwrap_err();
    assert_eq!(error, DispatchError::ShuttingDown);
}

#[tokio::test]
async fn test_shutdown_gives_up_after_timeout() {
    let gate = Arc::new(Semaphore::new(0));
    let f = fixture(Behavior::Gated(gate.clone()), 1, 4);

    f.pool.submit(activity_job("create", 1, 1_700_000_000)).unwrap();
    wait_until(|| f.pool.stats().in_flight == 1).await;

    assert!(!f.pool.shutdown(Duration::from_millis(50)).await);
    assert_eq!(f.pool.stats().in_flight, 1);
    gate.add_permits(1);
}

#[test]
fn test_dead_letter_replay_restores_event_job() {
    let event = WebhookEvent::activity(
        strava_relay_core::AspectType::Update,
        ExternalOwnerId::from(OWNER),
        ExternalObjectId::from(42),
    );
    let record = DeadLetterRecord::for_event(
        event.clone(),
        DeadLetterReason::RetriesExhausted { attempts: 5 },
        Some("503".to_string()),
        5,
    );

    let job = DispatchJob::from_dead_letter(&record);
    assert_eq!(job.event_id, event.event_id);
    assert!(matches!(job.payload, JobPayload::Event(ref e) if *e == event));
}
