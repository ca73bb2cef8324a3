//! Integration tests driving the public API through complete transactions.

use sequencer_rs::prelude::*;
use std::sync::Arc;
use std::time::Duration;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn params() -> Params {
    Params::new()
        .with_seq_type(1, 1, 1)
        .with_flush_interval_ms(500)
        .with_retry_policy(RetryPolicy::new(3, 100))
}

async fn one_tick(params: &Params) {
    tokio::time::sleep(params.flush_interval() + Duration::from_millis(10)).await;
}

// ---------------------------------------------------------------------------
// Concrete scenario
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn numbers_continue_from_storage_and_become_durable() {
    let storage = Arc::new(MemStorage::new());
    storage.set_number(NumberKey::new(1, 1), 100);
    storage.set_last_plog_offset(99);

    let params = params();
    let mut sequencer = Sequencer::new(params.clone(), Arc::clone(&storage))
        .unwrap_or_else(|e| panic!("failed to create sequencer: {e}"));
    assert!(sequencer.wait_ready().await.is_ok());

    assert_eq!(sequencer.start(1, 1).await, Some(100));
    assert_eq!(sequencer.next(1).await.ok(), Some(101));
    assert_eq!(sequencer.next(1).await.ok(), Some(102));
    sequencer.flush();

    one_tick(&params).await;

    let numbers = storage.read_numbers(1, &[1]).await;
    assert_eq!(numbers, Ok(vec![102]));
    assert_eq!(storage.read_last_plog_offset().await, Ok(100));

    assert!(sequencer.start(1, 1).await.is_some());
    assert_eq!(sequencer.next(1).await.ok(), Some(103));
    sequencer.flush();

    sequencer.shutdown().await;
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn params_loaded_from_json_drive_the_engine() {
    let params = Params::from_json(
        r#"{
            "seq_types": { "3": { "1": 0, "2": 500 } },
            "lru_cache_size": 16,
            "flush_interval_ms": 100
        }"#,
    )
    .unwrap_or_else(|e| panic!("invalid params: {e}"));

    let mut sequencer = Sequencer::new(params, MemStorage::new())
        .unwrap_or_else(|e| panic!("failed to create sequencer: {e}"));
    assert!(sequencer.wait_ready().await.is_ok());

    assert!(sequencer.start(3, 9).await.is_some());
    assert_eq!(sequencer.next(1).await.ok(), Some(1));
    assert_eq!(sequencer.next(2).await.ok(), Some(501));
    sequencer.flush();

    sequencer.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn status_receiver_observes_recovery() {
    let storage = Arc::new(MemStorage::new());
    let mut sequencer = Sequencer::new(params(), Arc::clone(&storage))
        .unwrap_or_else(|e| panic!("failed to create sequencer: {e}"));
    let mut status = sequencer.subscribe_status();

    assert!(sequencer.wait_ready().await.is_ok());
    assert_eq!(*status.borrow_and_update(), Status::Ready);

    assert!(sequencer.start(1, 1).await.is_some());
    sequencer.actualize();
    assert!(status.has_changed().unwrap_or(false));
    assert_eq!(*status.borrow_and_update(), Status::Actualizing);

    assert!(status.changed().await.is_ok());
    assert_eq!(*status.borrow(), Status::Ready);

    sequencer.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn backpressure_clears_after_drain() {
    let params = params().with_max_num_unflushed_values(1);
    let storage = Arc::new(MemStorage::new());
    let mut sequencer = Sequencer::new(params.clone(), Arc::clone(&storage))
        .unwrap_or_else(|e| panic!("failed to create sequencer: {e}"));
    assert!(sequencer.wait_ready().await.is_ok());

    assert!(sequencer.start(1, 1).await.is_some());
    assert!(sequencer.next(1).await.is_ok());
    sequencer.flush();

    // The first two writes fail, so the drain lags behind the wake-up.
    storage.fail_next(StorageOp::WriteValues, 2);
    assert_eq!(sequencer.start(1, 1).await, None);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(sequencer.start(1, 1).await, None);

    one_tick(&params).await;
    assert_eq!(sequencer.num_unflushed(), 0);
    assert!(sequencer.start(1, 1).await.is_some());
    assert_eq!(sequencer.next(1).await.ok(), Some(3));
    sequencer.flush();

    sequencer.shutdown().await;
}
