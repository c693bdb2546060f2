//! Lock contention timing and the lock table served over HTTP

use clusterd::transaction::{LockManager, MemLockBackend};
use clusterd::Error;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[tokio::test]
async fn test_contended_acquire_times_out_after_timeout() {
    let locks = LockManager::in_memory(Duration::from_secs(5));
    let _held = locks.lock("vol1").await.unwrap();

    let timeout = Duration::from_millis(300);
    let start = Instant::now();
    let err = locks.acquire("vol1", timeout).await.unwrap_err();
    let elapsed = start.elapsed();

    assert!(matches!(err, Error::LockTimeout(name) if name == "vol1"));
    assert!(elapsed >= timeout, "gave up before the timeout: {:?}", elapsed);
    assert!(elapsed < timeout + Duration::from_millis(250), "overshot: {:?}", elapsed);
}

#[tokio::test]
async fn test_waiter_gets_lock_once_released() {
    let backend = Arc::new(MemLockBackend::new());
    let locks = LockManager::new(backend.clone(), Duration::from_secs(2));
    let mut held = locks.lock("vol1").await.unwrap();

    let waiter = {
        let locks = locks.clone();
        tokio::spawn(async move {
            let mut guard = locks.lock("vol1").await.unwrap();
            guard.release().await;
        })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    held.release().await;
    waiter.await.unwrap();
    assert!(backend.holder("vol1").is_none());
}

#[tokio::test]
async fn test_only_one_of_many_contenders_holds_the_lock() {
    let locks = LockManager::in_memory(Duration::from_millis(100));
    let attempts: Vec<_> = (0..8)
        .map(|_| {
            let locks = locks.clone();
            tokio::spawn(async move { locks.lock("vol1").await })
        })
        .collect();

    let mut guards = Vec::new();
    let mut timeouts = 0;
    for attempt in attempts {
        match attempt.await.unwrap() {
            Ok(guard) => guards.push(guard),
            Err(Error::LockTimeout(_)) => timeouts += 1,
            Err(e) => panic!("unexpected error: {}", e),
        }
    }
    assert_eq!(guards.len(), 1);
    assert_eq!(timeouts, 7);
}
