//! Integration tests for crash recovery through PLog replay.

use sequencer_rs::prelude::*;
use std::sync::Arc;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn params() -> Params {
    Params::new()
        .with_seq_type(1, 1, 0)
        .with_seq_type(1, 2, 0)
        .with_retry_policy(RetryPolicy::new(3, 100))
}

async fn ready(storage: &Arc<MemStorage>) -> Sequencer<Arc<MemStorage>> {
    let sequencer = Sequencer::new(params(), Arc::clone(storage))
        .unwrap_or_else(|e| panic!("failed to create sequencer: {e}"));
    assert!(sequencer.wait_ready().await.is_ok());
    sequencer
}

/// Runs one transaction and logs its values at the transaction's offset,
/// the way a caller writes its PLog record before flushing.
async fn logged_transaction(
    sequencer: &mut Sequencer<Arc<MemStorage>>,
    ws_id: WsId,
    seq_id: SeqId,
    count: usize,
) -> Vec<Number> {
    let offset = sequencer
        .start(1, ws_id)
        .await
        .unwrap_or_else(|| panic!("start refused"));
    let mut issued = Vec::with_capacity(count);
    for _ in 0..count {
        let number = sequencer
            .next(seq_id)
            .await
            .unwrap_or_else(|e| panic!("next failed: {e}"));
        issued.push(number);
    }
    let values = issued
        .iter()
        .map(|&value| SeqValue::new(ws_id, seq_id, value))
        .collect();
    sequencer.storage().append_plog(offset, values);
    sequencer.flush();
    issued
}

// ---------------------------------------------------------------------------
// Crash before the flusher ran
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn restart_recovers_unflushed_numbers_from_plog() {
    let storage = Arc::new(MemStorage::new());

    let mut first = ready(&storage).await;
    assert_eq!(logged_transaction(&mut first, 7, 1, 3).await, vec![1, 2, 3]);
    assert_eq!(logged_transaction(&mut first, 7, 2, 1).await, vec![1]);
    // Crash: nothing reached storage.
    drop(first);
    assert_eq!(storage.number(NumberKey::new(7, 1)), 0);

    let mut second = ready(&storage).await;
    assert_eq!(storage.number(NumberKey::new(7, 1)), 3);
    assert_eq!(storage.number(NumberKey::new(7, 2)), 1);
    assert_eq!(storage.last_plog_offset(), 2);

    assert_eq!(logged_transaction(&mut second, 7, 1, 2).await, vec![4, 5]);
    second.shutdown().await;
}

// ---------------------------------------------------------------------------
// Crash between the values write and the offset write
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn replaying_an_already_written_batch_is_harmless() {
    let storage = Arc::new(MemStorage::new());
    storage.set_last_plog_offset(4);
    storage.append_plog(5, vec![SeqValue::new(7, 1, 9), SeqValue::new(7, 1, 10)]);
    // Values of offset 5 made it, the offset did not.
    storage.set_number(NumberKey::new(7, 1), 10);

    let mut sequencer = ready(&storage).await;
    assert_eq!(storage.number(NumberKey::new(7, 1)), 10);
    assert_eq!(storage.last_plog_offset(), 5);

    assert_eq!(logged_transaction(&mut sequencer, 7, 1, 1).await, vec![11]);
    sequencer.shutdown().await;
}

// ---------------------------------------------------------------------------
// Shutdown
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn shutdown_then_restart_loses_nothing_logged() {
    let storage = Arc::new(MemStorage::new());

    let mut first = ready(&storage).await;
    let issued = logged_transaction(&mut first, 1, 1, 5).await;
    first.shutdown().await;

    let mut second = ready(&storage).await;
    let next = logged_transaction(&mut second, 1, 1, 1).await;
    assert_eq!(next, vec![issued[issued.len() - 1] + 1]);
    second.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn failed_engine_is_replaced_by_a_new_instance() {
    let storage = Arc::new(MemStorage::new());
    storage.append_plog(1, vec![SeqValue::new(1, 1, 41)]);
    storage.fail_always(StorageOp::WriteValues);

    let broken = Sequencer::new(params(), Arc::clone(&storage))
        .unwrap_or_else(|e| panic!("failed to create sequencer: {e}"));
    assert!(matches!(
        broken.wait_ready().await,
        Err(SequencerError::ActualizationFailed { .. })
    ));
    broken.shutdown().await;

    storage.heal_all();
    let mut sequencer = ready(&storage).await;
    assert_eq!(logged_transaction(&mut sequencer, 1, 1, 1).await, vec![42]);
    sequencer.shutdown().await;
}
