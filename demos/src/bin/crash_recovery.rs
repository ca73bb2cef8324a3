//! Example demonstrating recovery from the PLog after a crash
//!
//! This example shows how to:
//! 1. Log every transaction in the PLog before committing it
//! 2. Lose the in-memory state before the flusher had a chance to run
//! 3. Rebuild the counters with the startup actualization of a new instance
//! 4. Abort a transaction with `actualize` and continue without reissuing numbers

use sequencer_rs::prelude::*;
use std::sync::Arc;
use tracing::{info, warn};

const WS_KIND: WsKind = 1;
const WS_ID: WsId = 7;
const SEQ_ID: SeqId = 1;

fn params() -> Params {
    Params::new()
        .with_seq_type(WS_KIND, SEQ_ID, 0)
        .with_flush_interval_ms(60_000)
}

/// Allocates `count` numbers and writes the matching PLog record at the
/// transaction's offset before committing.
async fn logged_transaction(
    sequencer: &mut Sequencer<Arc<MemStorage>>,
    count: usize,
) -> Result<Vec<Number>, SequencerError> {
    let Some(offset) = sequencer.start(WS_KIND, WS_ID).await else {
        warn!("transaction refused");
        return Ok(Vec::new());
    };

    let mut numbers = Vec::with_capacity(count);
    for _ in 0..count {
        numbers.push(sequencer.next(SEQ_ID).await?);
    }
    let record = numbers
        .iter()
        .map(|&n| SeqValue::new(WS_ID, SEQ_ID, n))
        .collect();
    sequencer.storage().append_plog(offset, record);
    sequencer.flush();

    info!(offset, ?numbers, "transaction logged and flushed");
    Ok(numbers)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    info!("Starting crash recovery example");
    let storage = Arc::new(MemStorage::new());

    // First instance: the flush interval is long, nothing becomes durable.
    let mut first = Sequencer::new(params(), Arc::clone(&storage))?;
    first.wait_ready().await?;
    logged_transaction(&mut first, 3).await?;
    logged_transaction(&mut first, 2).await?;
    info!(
        durable = storage.number(NumberKey::new(WS_ID, SEQ_ID)),
        plog_records = storage.plog_len(),
        "simulating a crash"
    );
    drop(first);

    // Second instance: the startup actualization replays the PLog.
    let mut second = Sequencer::new(params(), Arc::clone(&storage))?;
    second.wait_ready().await?;
    info!(
        durable = storage.number(NumberKey::new(WS_ID, SEQ_ID)),
        offset = storage.last_plog_offset(),
        "state rebuilt from the PLog"
    );
    logged_transaction(&mut second, 1).await?;

    // Abort a transaction: its numbers are never handed out again.
    if second.start(WS_KIND, WS_ID).await.is_some() {
        let abandoned = second.next(SEQ_ID).await?;
        warn!(abandoned, "aborting transaction");
        second.actualize();
        second.wait_ready().await?;
    }
    logged_transaction(&mut second, 1).await?;

    second.shutdown().await;
    info!("Example completed");
    Ok(())
}
