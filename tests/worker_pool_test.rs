use prospect::error::ScanError;
use prospect::scan::WorkerPool;
use prospect_core_resilience::TaskOutcome;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn done(i: usize) -> TaskOutcome<usize, ScanError> {
    TaskOutcome::new(i.to_string(), Ok(i), Duration::ZERO, 1)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_large_batch_with_panics_returns_every_outcome() {
    let pool = WorkerPool::new(20);
    let outcomes = pool
        .run((0..1_500usize).collect(), |i| async move {
            if i % 97 == 0 {
                panic!("malformed listing {}", i);
            }
            if i % 10 == 0 {
                tokio::task::yield_now().await;
            }
            done(i)
        })
        .await;

    assert_eq!(outcomes.len(), 1_500);

    let labels: HashSet<&str> = outcomes.iter().map(|o| o.label.as_str()).collect();
    assert_eq!(labels.len(), 1_500, "every item reported exactly once");

    let panicked = outcomes
        .iter()
        .filter(|o| {
            matches!(
                o.error(),
                Some(ScanError::Panicked(msg)) if msg.contains("malformed listing")
            )
        })
        .count();
    assert_eq!(panicked, (0..1_500).filter(|i| i % 97 == 0).count());
    assert_eq!(outcomes.iter().filter(|o| o.succeeded()).count(), 1_500 - panicked);
}

#[tokio::test]
async fn test_panicking_worker_keeps_its_slot() {
    // One worker: if a panic killed it, nothing after item 0 would run
    let pool = WorkerPool::new(1);
    let outcomes = pool
        .run((0..5usize).collect(), |i| async move {
            if i == 0 {
                panic!("first item explodes");
            }
            done(i)
        })
        .await;

    assert_eq!(outcomes.len(), 5);
    assert_eq!(outcomes.iter().filter(|o| o.succeeded()).count(), 4);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cancel_mid_batch_accounts_for_all_items() {
    let token = CancellationToken::new();
    let started = Arc::new(AtomicUsize::new(0));

    let pool = WorkerPool::new(3).with_cancellation(token.clone());
    let (s, t) = (started.clone(), token.clone());
    let outcomes = pool
        .run((0..50usize).collect(), move |i| {
            let started = s.clone();
            let token = t.clone();
            async move {
                if started.fetch_add(1, Ordering::SeqCst) + 1 == 6 {
                    token.cancel();
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
                done(i)
            }
        })
        .await;

    assert_eq!(outcomes.len(), 50);
    let ran = started.load(Ordering::SeqCst);
    assert!(ran >= 6 && ran <= 8, "ran {} items", ran);
    assert_eq!(outcomes.iter().filter(|o| o.succeeded()).count(), ran);
    assert!(outcomes
        .iter()
        .filter(|o| !o.succeeded())
        .all(|o| matches!(o.error(), Some(ScanError::Cancelled)) && o.attempts == 0));
}
