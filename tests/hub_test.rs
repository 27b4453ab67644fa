//! Concurrency tests for the progress hub.
//!
//! Tests:
//! - Deadline-bounded waits cancel when progress never arrives
//! - Capacity is exact under concurrent registration
//! - Advances release exactly the satisfied waiters
//! - Cancellation racing with advances never loses a reached target
//! - Close drains waiters and rejects every later call

mod common;

use futures::future::join_all;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tidemark::{CancellationToken, HubError, HubStatus};

#[tokio::test]
async fn test_deadline_cancels_unsatisfied_wait() {
    let hub = common::shared_hub(0, 4);
    hub.advance_to(0).unwrap();
    assert_eq!(common::status(&hub).done_upto, 0);

    let start = Instant::now();
    let result = hub.wait_for_timeout(1, Duration::from_millis(100)).await;
    let elapsed = start.elapsed();

    assert_eq!(result, Err(HubError::CancellationRequested));
    assert!(
        elapsed >= Duration::from_millis(90),
        "wait returned too early: {:?}",
        elapsed
    );
    assert_eq!(
        common::status(&hub),
        HubStatus {
            done_upto: 0,
            waiting: 0
        }
    );
}

#[tokio::test]
async fn test_capacity_exhaustion_and_release() {
    let hub = common::shared_hub(0, 2);
    let token = CancellationToken::new();

    let handles: Vec<_> = (0..2)
        .map(|_| {
            let hub = hub.clone();
            let token = token.clone();
            tokio::spawn(async move { hub.wait_for(5, &token).await })
        })
        .collect();

    assert!(common::wait_for_waiting(&hub, 2).await);

    let rejected = hub.wait_for(5, &token).await;
    assert_eq!(rejected, Err(HubError::MaxWaitersExceeded { capacity: 2 }));
    assert_eq!(common::status(&hub).waiting, 2);

    hub.advance_to(5).unwrap();
    for result in join_all(handles).await {
        assert_eq!(result.expect("waiter task panicked"), Ok(()));
    }
    assert_eq!(common::status(&hub).waiting, 0);
}

#[tokio::test]
async fn test_advance_releases_exactly_satisfied_waiters() {
    let hub = common::shared_hub(0, 16);
    let token = CancellationToken::new();

    let handles: Vec<_> = (1..=10u64)
        .map(|target| {
            let hub = hub.clone();
            let token = token.clone();
            tokio::spawn(async move { hub.wait_for(target, &token).await })
        })
        .collect();
    assert!(common::wait_for_waiting(&hub, 10).await);

    hub.advance_to(4).unwrap();
    assert_eq!(common::status(&hub).waiting, 6);

    assert!(
        common::wait_for(Duration::from_secs(5), || {
            handles[..4].iter().all(|h| h.is_finished())
        })
        .await
    );
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(handles[4..].iter().all(|h| !h.is_finished()));

    hub.advance_to(10).unwrap();
    for result in join_all(handles).await {
        assert_eq!(result.unwrap(), Ok(()));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_advances_are_monotonic() {
    let hub = common::shared_hub(3, 4);

    let advancers: Vec<_> = (0..8u64)
        .map(|worker| {
            let hub = hub.clone();
            tokio::spawn(async move {
                for i in 0..500u64 {
                    // Scrambled order, including values below the start
                    let value = (i * 37 + worker * 11) % 1000;
                    hub.advance_to(value).unwrap();
                }
            })
        })
        .collect();

    let observer = {
        let hub = hub.clone();
        tokio::spawn(async move {
            let mut last = 0;
            for _ in 0..1000 {
                let done_upto = hub.status().unwrap().done_upto;
                assert!(done_upto >= last, "progress went backwards");
                last = done_upto;
                tokio::task::yield_now().await;
            }
        })
    };

    for result in join_all(advancers).await {
        result.unwrap();
    }
    observer.await.unwrap();

    let expected = (0..8u64)
        .flat_map(|worker| (0..500u64).map(move |i| (i * 37 + worker * 11) % 1000))
        .max()
        .unwrap()
        .max(3);
    assert_eq!(common::status(&hub).done_upto, expected);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_many_waiters_released_by_producer() {
    const WAITERS: u64 = 200;

    let hub = common::shared_hub(0, (WAITERS * 2) as usize);

    let handles: Vec<_> = (0..2)
        .flat_map(|_| 1..=WAITERS)
        .map(|target| {
            let hub = hub.clone();
            tokio::spawn(async move { hub.wait_for(target, &CancellationToken::new()).await })
        })
        .collect();
    assert!(common::wait_for_waiting(&hub, (WAITERS * 2) as usize).await);

    let overflow = hub.wait_for(WAITERS * 2 + 1, &CancellationToken::new()).await;
    assert_eq!(
        overflow,
        Err(HubError::MaxWaitersExceeded {
            capacity: (WAITERS * 2) as usize
        })
    );

    let stop = CancellationToken::new();
    let producer = {
        let hub = hub.clone();
        let stop = stop.clone();
        tokio::spawn(async move {
            let mut next = 1u64;
            let mut ticker = tokio::time::interval(Duration::from_millis(1));
            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = ticker.tick() => {
                        hub.advance_to(next + 2).unwrap();
                        next += 1;
                    }
                }
            }
        })
    };

    for result in join_all(handles).await {
        assert_eq!(result.unwrap(), Ok(()));
    }
    stop.cancel();
    producer.await.unwrap();

    assert_eq!(hub.wait_for(5, &CancellationToken::new()).await, Ok(()));

    // A waiter still blocked at close time sees the close, not a hang
    let late = {
        let hub = hub.clone();
        tokio::spawn(async move { hub.wait_for(u64::MAX, &CancellationToken::new()).await })
    };
    assert!(common::wait_for_waiting(&hub, 1).await);
    hub.close().unwrap();
    assert_eq!(late.await.unwrap(), Err(HubError::AlreadyClosed));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_simultaneous_cancellation_and_notification() {
    const ITERATIONS: u64 = 100;

    let hub = common::shared_hub(0, 30);

    let waiters: Vec<_> = (0..2)
        .map(|_| {
            let hub = hub.clone();
            tokio::spawn(async move {
                for target in 0..ITERATIONS {
                    let before = hub.status().unwrap().done_upto;
                    match hub.wait_for_timeout(target, Duration::from_millis(1)).await {
                        Ok(()) => {}
                        Err(HubError::CancellationRequested) => {
                            // Cancellation is only allowed while the target was unreached
                            assert!(
                                before < target,
                                "cancelled wait for {} although progress was {}",
                                target,
                                before
                            );
                        }
                        Err(other) => panic!("unexpected error: {other}"),
                    }
                }
            })
        })
        .collect();

    for value in 1..ITERATIONS {
        hub.advance_to(value).unwrap();
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    for result in join_all(waiters).await {
        result.unwrap();
    }
    assert_eq!(common::status(&hub).waiting, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cancellation_does_not_disturb_other_waiters() {
    let hub = common::shared_hub(0, 8);
    let cancelled = CancellationToken::new();
    let kept = CancellationToken::new();

    let doomed: Vec<_> = (0..3)
        .map(|_| {
            let hub = hub.clone();
            let token = cancelled.clone();
            tokio::spawn(async move { hub.wait_for(10, &token).await })
        })
        .collect();
    let survivor = {
        let hub = hub.clone();
        let token = kept.clone();
        tokio::spawn(async move { hub.wait_for(10, &token).await })
    };
    assert!(common::wait_for_waiting(&hub, 4).await);

    cancelled.cancel();
    for result in join_all(doomed).await {
        assert_eq!(result.unwrap(), Err(HubError::CancellationRequested));
    }
    assert_eq!(
        common::status(&hub),
        HubStatus {
            done_upto: 0,
            waiting: 1
        }
    );

    hub.advance_to(10).unwrap();
    assert_eq!(survivor.await.unwrap(), Ok(()));
}

#[tokio::test]
async fn test_dropped_wait_returns_slot() {
    let hub = common::shared_hub(0, 1);

    let timed_out =
        tokio::time::timeout(Duration::from_millis(10), hub.wait_for(1, &CancellationToken::new()))
            .await;
    assert!(timed_out.is_err());
    assert_eq!(common::status(&hub).waiting, 0);

    let waiter = {
        let hub = hub.clone();
        tokio::spawn(async move { hub.wait_for(1, &CancellationToken::new()).await })
    };
    assert!(common::wait_for_waiting(&hub, 1).await);
    hub.advance_to(1).unwrap();
    assert_eq!(waiter.await.unwrap(), Ok(()));
}

#[tokio::test]
async fn test_close_drains_waiters() {
    let hub = common::shared_hub(0, 8);

    let handles: Vec<_> = (1..=5u64)
        .map(|target| {
            let hub = hub.clone();
            tokio::spawn(async move { hub.wait_for(target, &CancellationToken::new()).await })
        })
        .collect();
    assert!(common::wait_for_waiting(&hub, 5).await);

    hub.close().unwrap();
    for result in join_all(handles).await {
        assert_eq!(result.unwrap(), Err(HubError::AlreadyClosed));
    }
    assert!(hub.is_closed());
}

#[tokio::test]
async fn test_close_rejects_everything_after() {
    let hub = common::shared_hub(0, 10);
    hub.advance_to(7).unwrap();

    assert_eq!(hub.close(), Ok(()));
    assert_eq!(hub.close(), Err(HubError::AlreadyClosed));
    assert_eq!(hub.status(), Err(HubError::AlreadyClosed));
    assert_eq!(hub.advance_to(1), Err(HubError::AlreadyClosed));
    assert_eq!(
        hub.wait_for(0, &CancellationToken::new()).await,
        Err(HubError::AlreadyClosed)
    );
    assert_eq!(
        hub.wait_for_timeout(3, Duration::from_millis(1)).await,
        Err(HubError::AlreadyClosed)
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_close_races_with_registration() {
    let hub = common::shared_hub(0, 64);
    let start = Arc::new(tokio::sync::Barrier::new(33));

    let waiters: Vec<_> = (0..32u64)
        .map(|i| {
            let hub = hub.clone();
            let start = start.clone();
            tokio::spawn(async move {
                start.wait().await;
                hub.wait_for(i + 1, &CancellationToken::new()).await
            })
        })
        .collect();

    start.wait().await;
    hub.close().unwrap();

    // Each waiter either registered before the close and was drained, or
    // arrived afterwards and was turned away; none may hang.
    let results = tokio::time::timeout(Duration::from_secs(5), join_all(waiters))
        .await
        .expect("waiters hung after close");
    for result in results {
        assert_eq!(result.unwrap(), Err(HubError::AlreadyClosed));
    }
}
