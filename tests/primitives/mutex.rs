use crate::common::fast_config;
use parking_lot::Mutex as Log;
use schematic_core::primitives::{Mutex, PrimitiveEngine};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn critical_sections_never_interleave() {
    let engine = PrimitiveEngine::in_memory(fast_config());
    let mutex = Mutex::create(&engine, Some("ledger".into())).await.unwrap();
    let log = Arc::new(Log::new(Vec::new()));

    let tasks: Vec<_> = (0..5)
        .map(|n| {
            let mutex = mutex.clone();
            let log = Arc::clone(&log);
            tokio::spawn(async move {
                let cancel = CancellationToken::new();
                mutex
                    .with_lock(&cancel, || async {
                        log.lock().push(("enter", n));
                        tokio::time::sleep(Duration::from_millis(3)).await;
                        log.lock().push(("leave", n));
                    })
                    .await
            })
        })
        .collect();

    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let entries = log.lock().clone();
    assert_eq!(entries.len(), 10);
    for pair in entries.chunks(2) {
        assert_eq!(pair[0].0, "enter");
        assert_eq!(pair[1], ("leave", pair[0].1));
    }
    assert!(!mutex.is_locked().await.unwrap());
}

#[tokio::test]
async fn attached_handles_see_the_same_lock() {
    let engine = PrimitiveEngine::in_memory(fast_config());
    let owner = Mutex::create(&engine, Some("shared".into())).await.unwrap();
    let other = Mutex::attach(&engine, "shared").await.unwrap();

    let guard = owner.try_lock().await.unwrap().expect("lock is free");
    assert!(other.is_locked().await.unwrap());
    assert!(other.try_lock().await.unwrap().is_none());

    guard.release().await.unwrap();
    let guard = other.try_lock().await.unwrap().expect("released lock is free");
    guard.release().await.unwrap();
}
