//! Worker behavior against the in-memory store: claim batches, record
//! outcomes, and keep one event's failure away from the rest.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use aqua_core::models::{event_type, DomainEvent, EventId, EventStatus};
use aqua_core::{Clock, TestClock};
use aqua_dispatch::store::mock::MockEventStore;
use aqua_dispatch::store::EventStore;
use aqua_dispatch::worker::{DispatchWorker, EngineStats, PoolSettings, WorkerContext};
use aqua_dispatch::{BrokerClient, DispatchError, RetryPolicy};
use aqua_testing::{EventBuilder, FailingBroker, RecordingBroker};
use chrono::{DateTime, Utc};
use serde_json::json;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

fn worker_with(
    store: &MockEventStore,
    broker: Arc<dyn BrokerClient>,
    policy: RetryPolicy,
    clock: Arc<dyn Clock>,
    send_timeout: Duration,
) -> (DispatchWorker, Arc<RwLock<EngineStats>>) {
    let stats = Arc::new(RwLock::new(EngineStats::default()));
    let ctx = WorkerContext {
        store: Arc::new(store.clone()),
        broker,
        policy,
        send_timeout,
        hints: None,
        stats: stats.clone(),
        cancellation_token: CancellationToken::new(),
        clock,
    };
    let settings = PoolSettings {
        workers: 1,
        batch_size: 10,
        poll_interval: Duration::from_millis(50),
    };
    (DispatchWorker::new(0, "test", settings, ctx), stats)
}

async fn seed_pending(
    store: &MockEventStore,
    aggregate_id: &str,
    now: DateTime<Utc>,
) -> EventId {
    let event = EventBuilder::with_defaults()
        .aggregate(aggregate_id)
        .payload(json!({"orderId": aggregate_id}))
        .created_at(now)
        .build();
    let id = event.id;
    store.seed(event).await;
    id
}

#[tokio::test]
async fn delivers_claimed_events() {
    let store = MockEventStore::new();
    let broker = Arc::new(RecordingBroker::new());
    let clock = TestClock::new();
    let id = seed_pending(&store, "order-1", clock.now_utc()).await;
    let (worker, stats) = worker_with(
        &store,
        broker.clone(),
        RetryPolicy::default(),
        Arc::new(clock),
        Duration::from_secs(5),
    );

    let processed = worker.process_batch().await.unwrap();

    assert_eq!(processed, 1);
    assert_eq!(store.status_of(id).await, Some(EventStatus::Delivered));
    assert_eq!(broker.sent_count(), 1);

    let stats = stats.read().await.clone();
    assert_eq!(stats.events_delivered, 1);
    assert_eq!(stats.in_flight_deliveries, 0);
}

#[tokio::test]
async fn transient_failure_schedules_backoff_retry() {
    let store = MockEventStore::new();
    let clock = TestClock::new();
    let id = seed_pending(&store, "order-1", clock.now_utc()).await;
    let (worker, stats) = worker_with(
        &store,
        Arc::new(FailingBroker::network()),
        RetryPolicy::default(),
        Arc::new(clock),
        Duration::from_secs(5),
    );

    worker.process_batch().await.unwrap();

    let event = store.event(id).await.unwrap();
    assert_eq!(event.status, EventStatus::Pending);
    assert_eq!(event.attempt_count, 1);
    assert_eq!(
        event.next_eligible_at - event.updated_at,
        chrono::Duration::seconds(1)
    );
    assert!(event.last_error.unwrap().contains("network"));

    assert_eq!(stats.read().await.events_rescheduled, 1);
}

#[tokio::test]
async fn exhausted_attempts_dead_letter_the_event() {
    let store = MockEventStore::new();
    let clock = TestClock::new();
    let policy = RetryPolicy::exponential(
        3,
        Duration::from_millis(1000),
        2.0,
        Duration::from_millis(30000),
    );
    let id = seed_pending(&store, "order-1", clock.now_utc()).await;
    let (worker, stats) = worker_with(
        &store,
        Arc::new(FailingBroker::network()),
        policy,
        Arc::new(clock.clone()),
        Duration::from_secs(5),
    );

    let mut deltas = Vec::new();
    for _ in 0..3 {
        worker.process_batch().await.unwrap();
        let event = store.event(id).await.unwrap();
        assert_eq!(event.status, EventStatus::Pending);
        deltas.push((event.next_eligible_at - event.updated_at).num_milliseconds());
        clock.advance(Duration::from_secs(3600));
    }
    assert_eq!(deltas, vec![1000, 2000, 4000]);

    worker.process_batch().await.unwrap();
    let event = store.event(id).await.unwrap();
    assert_eq!(event.status, EventStatus::Dead);
    assert_eq!(event.attempt_count, 3);
    assert!(event.last_error.is_some());

    let stats = stats.read().await.clone();
    assert_eq!(stats.events_dead_lettered, 1);
    assert_eq!(stats.events_rescheduled, 3);
}

#[tokio::test]
async fn permanent_rejection_dead_letters_immediately() {
    let store = MockEventStore::new();
    let clock = TestClock::new();
    let id = seed_pending(&store, "order-1", clock.now_utc()).await;
    let (worker, _stats) = worker_with(
        &store,
        Arc::new(FailingBroker::rejecting(400)),
        RetryPolicy::default(),
        Arc::new(clock),
        Duration::from_secs(5),
    );

    worker.process_batch().await.unwrap();

    let event = store.event(id).await.unwrap();
    assert_eq!(event.status, EventStatus::Dead);
    assert_eq!(event.attempt_count, 0);
}

#[tokio::test]
async fn one_failing_event_does_not_block_the_batch() {
    let store = MockEventStore::new();
    let broker = Arc::new(RecordingBroker::new());
    broker.fail_aggregate("order-poison");

    let clock = TestClock::new();
    let now = clock.now_utc();
    let poison = seed_pending(&store, "order-poison", now).await;
    let mut healthy = Vec::new();
    for i in 0..4 {
        healthy.push(seed_pending(&store, &format!("order-{i}"), now).await);
    }

    let (worker, _stats) = worker_with(
        &store,
        broker.clone(),
        RetryPolicy::default(),
        Arc::new(clock),
        Duration::from_secs(5),
    );
    let processed = worker.process_batch().await.unwrap();

    assert_eq!(processed, 5);
    for id in healthy {
        assert_eq!(store.status_of(id).await, Some(EventStatus::Delivered));
    }
    assert_eq!(store.status_of(poison).await, Some(EventStatus::Pending));
}

#[tokio::test]
async fn empty_store_returns_zero() {
    let store = MockEventStore::new();
    let (worker, _stats) = worker_with(
        &store,
        Arc::new(RecordingBroker::new()),
        RetryPolicy::default(),
        Arc::new(TestClock::new()),
        Duration::from_secs(5),
    );
    assert_eq!(worker.process_batch().await.unwrap(), 0);
}

#[tokio::test]
async fn claim_errors_propagate() {
    let store = MockEventStore::new();
    store.inject_claim_error("connection lost").await;
    let (worker, _stats) = worker_with(
        &store,
        Arc::new(RecordingBroker::new()),
        RetryPolicy::default(),
        Arc::new(TestClock::new()),
        Duration::from_secs(5),
    );

    let err = worker.process_batch().await.unwrap_err();
    assert!(matches!(err, DispatchError::Store { .. }));
}

struct HangingBroker;

impl BrokerClient for HangingBroker {
    fn send<'a>(
        &'a self,
        _event: &'a DomainEvent,
    ) -> Pin<Box<dyn Future<Output = aqua_dispatch::Result<()>> + Send + 'a>> {
        Box::pin(std::future::pending())
    }
}

#[tokio::test]
async fn slow_broker_hits_the_attempt_timeout() {
    let store = MockEventStore::new();
    let clock = TestClock::new();
    let id = seed_pending(&store, "order-1", clock.now_utc()).await;
    let (worker, _stats) = worker_with(
        &store,
        Arc::new(HangingBroker),
        RetryPolicy::default(),
        Arc::new(clock),
        Duration::from_millis(50),
    );

    worker.process_batch().await.unwrap();

    let event = store.event(id).await.unwrap();
    assert_eq!(event.status, EventStatus::Pending);
    assert!(event.last_error.unwrap().contains("timed out"));
}

#[tokio::test]
async fn redelivery_of_a_requeued_event_succeeds() {
    let store = MockEventStore::new();
    let clock = TestClock::new();
    let now = clock.now_utc();
    let id = seed_pending(&store, "order-1", now).await;

    let (failing, _stats) = worker_with(
        &store,
        Arc::new(FailingBroker::rejecting(422)),
        RetryPolicy::default(),
        Arc::new(clock.clone()),
        Duration::from_secs(5),
    );
    failing.process_batch().await.unwrap();
    assert_eq!(store.status_of(id).await, Some(EventStatus::Dead));

    let requeued = store.retry_dead_letters(None, clock.now_utc()).await.unwrap();
    assert_eq!(requeued, 1);

    let (healthy, _stats) = worker_with(
        &store,
        Arc::new(RecordingBroker::new()),
        RetryPolicy::default(),
        Arc::new(clock),
        Duration::from_secs(5),
    );
    healthy.process_batch().await.unwrap();
    assert_eq!(store.status_of(id).await, Some(EventStatus::Delivered));
}
