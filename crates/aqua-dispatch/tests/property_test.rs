//! Property-based tests for retry curves, routing, and claim exclusivity.
//!
//! These pin down the arithmetic and ordering guarantees that the unit
//! tests only spot-check: backoff delays stay within their cap, routing
//! and destinations are total over arbitrary type names, concurrent claims
//! never hand out the same event twice, and terminal states survive any
//! sequence of later markings.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use aqua_core::models::{event_type, EventStatus};
use aqua_dispatch::client::destination_for;
use aqua_dispatch::retry::{RetryContext, RetryDecision, RetryPolicy};
use aqua_dispatch::routing::{RouteClass, RoutingTable};
use aqua_dispatch::store::mock::MockEventStore;
use aqua_dispatch::store::EventStore;
use aqua_dispatch::DispatchError;
use aqua_testing::EventBuilder;
use chrono::Utc;
use proptest::prelude::*;

proptest! {
    /// Exponential delays never exceed the configured cap, for any
    /// combination of curve parameters and attempt number.
    #[test]
    fn exponential_delay_never_exceeds_its_cap(
        initial_ms in 1u64..10_000,
        multiplier in 1.0f64..4.0,
        max_ms in 1u64..60_000,
        attempt in 0u32..64,
    ) {
        let policy = RetryPolicy::exponential(
            3,
            Duration::from_millis(initial_ms),
            multiplier,
            Duration::from_millis(max_ms),
        );
        prop_assert!(policy.next_delay(attempt) <= Duration::from_millis(max_ms));
    }

    /// Consecutive exponential delays never shrink while the multiplier is
    /// at least one.
    #[test]
    fn exponential_delays_never_shrink(
        initial_ms in 1u64..10_000,
        multiplier in 1.0f64..4.0,
        attempt in 0u32..40,
    ) {
        let policy = RetryPolicy::exponential(
            3,
            Duration::from_millis(initial_ms),
            multiplier,
            Duration::from_secs(86_400),
        );
        prop_assert!(policy.next_delay(attempt + 1) >= policy.next_delay(attempt));
    }

    /// Ladder lookups clamp to the last rung instead of wrapping or
    /// panicking, whatever the attempt number.
    #[test]
    fn ladder_indexes_clamp_to_the_last_rung(
        rungs_secs in prop::collection::vec(1u64..100_000, 1..8),
        attempt in 0u32..100,
    ) {
        let rungs: Vec<Duration> = rungs_secs.iter().copied().map(Duration::from_secs).collect();
        let policy = RetryPolicy::ladder(5, rungs.clone());
        let index = (attempt as usize).min(rungs.len() - 1);
        prop_assert_eq!(policy.next_delay(attempt), rungs[index]);
    }

    /// Routing is total: any type name classifies, and only the listed
    /// high-frequency types take the fast path.
    #[test]
    fn only_listed_types_classify_as_fast(name in "[A-Z_]{1,30}") {
        let table = RoutingTable::default();
        let class = table.classify(&name);
        let is_high = event_type::HIGH_FREQUENCY.contains(&name.as_str());
        prop_assert_eq!(class == RouteClass::Fast, is_high);
    }

    /// Every type name maps to one of the four broker destinations, and
    /// order-prefixed names always go to the order stream.
    #[test]
    fn every_event_type_maps_to_a_destination(name in "[A-Za-z_]{1,40}") {
        let destination = destination_for(&name);
        prop_assert!(
            ["order-events", "payment-events", "delivery-events", "user-events"]
                .contains(&destination)
        );
        if name.starts_with("ORDER_") {
            prop_assert_eq!(destination, "order-events");
        }
    }

    /// A persistently failing event is rescheduled exactly `max_attempts`
    /// times before the decision flips to give-up.
    #[test]
    fn retryable_failures_reschedule_exactly_budget_times(max_attempts in 1u32..8) {
        let policy = RetryPolicy::exponential(
            max_attempts,
            Duration::from_millis(100),
            2.0,
            Duration::from_secs(10),
        );
        let mut attempt_count = 0u32;
        let mut reschedules = 0u32;
        loop {
            let retry = RetryContext::new(
                attempt_count,
                DispatchError::network("broker down"),
                Utc::now(),
                policy.clone(),
            );
            match retry.decide_retry() {
                RetryDecision::Retry { .. } => {
                    reschedules += 1;
                    attempt_count += 1;
                }
                RetryDecision::GiveUp { .. } => break,
            }
            prop_assert!(reschedules <= max_attempts, "retry budget exceeded");
        }
        prop_assert_eq!(reschedules, max_attempts);
    }

    /// Permanent rejections give up regardless of how much budget is left.
    #[test]
    fn non_retryable_errors_always_give_up(attempts_before in 0u32..10) {
        let retry = RetryContext::new(
            attempts_before,
            DispatchError::broker_rejected(400, "bad request"),
            Utc::now(),
            RetryPolicy::default(),
        );
        prop_assert!(
            matches!(retry.decide_retry(), RetryDecision::GiveUp { .. }),
            "non-retryable error should give up"
        );
    }

    /// Two concurrent claims over the same table never hand out the same
    /// event, and together they drain everything that fits their batches.
    #[test]
    fn concurrent_claims_never_share_events(
        event_count in 1usize..12,
        batch_size in 1usize..8,
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let store = MockEventStore::new();
            for i in 0..event_count {
                store
                    .seed(
                        EventBuilder::with_defaults()
                            .aggregate(format!("order-{i}"))
                            .build(),
                    )
                    .await;
            }

            let now = Utc::now();
            let (left, right) = tokio::join!(
                store.claim_next_batch(batch_size, now),
                store.claim_next_batch(batch_size, now),
            );
            let left = left.unwrap();
            let right = right.unwrap();

            let mut seen = HashSet::new();
            for event in left.iter().chain(right.iter()) {
                prop_assert!(seen.insert(event.id), "event {} claimed twice", event.id);
            }
            prop_assert_eq!(seen.len(), event_count.min(batch_size * 2));
            Ok(())
        })?;
    }

    /// Once terminal, an event's status survives any later sequence of
    /// delivery, failure, or dead-letter markings.
    #[test]
    fn terminal_states_survive_any_further_marking(
        delivered_first in prop::bool::ANY,
        operations in prop::collection::vec(0u8..3, 1..6),
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let store = MockEventStore::new();
            let event = EventBuilder::with_defaults().build();
            let id = event.id;
            store.seed(event).await;

            let now = Utc::now();
            store.claim_next_batch(10, now).await.unwrap();

            let terminal = if delivered_first {
                store.mark_delivered(id, now).await.unwrap();
                EventStatus::Delivered
            } else {
                store.mark_dead(id, "gone".to_string(), now).await.unwrap();
                EventStatus::Dead
            };

            for op in operations {
                match op {
                    0 => store.mark_delivered(id, now).await.unwrap(),
                    1 => {
                        store
                            .mark_failed(id, 1, now, "late failure".to_string(), now)
                            .await
                            .unwrap();
                    }
                    _ => store.mark_dead(id, "late death".to_string(), now).await.unwrap(),
                }
            }

            prop_assert_eq!(store.status_of(id).await, Some(terminal));
            Ok(())
        })?;
    }
}

/// The share-nothing claim guarantee also holds when many workers race:
/// an `Arc`-shared store claimed from eight tasks hands out each event
/// exactly once.
#[test]
fn many_racing_claimants_partition_the_backlog() {
    let rt = tokio::runtime::Runtime::new().unwrap();
    rt.block_on(async {
        let store = Arc::new(MockEventStore::new());
        let mut expected = HashSet::new();
        for i in 0..40 {
            let event = EventBuilder::with_defaults()
                .aggregate(format!("order-{i}"))
                .build();
            expected.insert(event.id);
            store.seed(event).await;
        }

        let now = Utc::now();
        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.claim_next_batch(5, now).await.unwrap()
            }));
        }

        let mut seen = HashSet::new();
        for handle in handles {
            for event in handle.await.unwrap() {
                assert!(seen.insert(event.id), "event {} claimed twice", event.id);
            }
        }
        assert_eq!(seen, expected);
    });
}
