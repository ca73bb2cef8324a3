//! Example walking through the lifecycle of a sequencer
//!
//! This example shows how to:
//! 1. Build `Params` with the builder methods
//! 2. Wait for the startup actualization
//! 3. Allocate numbers inside transactions and commit them with `flush`
//! 4. Observe the flusher making them durable
//! 5. Shut the engine down cleanly

use sequencer_rs::prelude::*;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

const WS_KIND_PROJECT: WsKind = 1;
const SEQ_RECORD_ID: SeqId = 1;
const SEQ_WLOG_OFFSET: SeqId = 2;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    info!("Starting sequencer lifecycle example");

    let params = Params::new()
        .with_seq_type(WS_KIND_PROJECT, SEQ_RECORD_ID, 322_680_000_000_000)
        .with_seq_type(WS_KIND_PROJECT, SEQ_WLOG_OFFSET, 0)
        .with_flush_interval_ms(200);
    let storage = Arc::new(MemStorage::new());

    let mut sequencer = Sequencer::new(params, Arc::clone(&storage))?;
    sequencer.wait_ready().await?;
    info!(status = %sequencer.status(), "sequencer ready");

    for ws_id in [100u64, 200, 100] {
        let Some(offset) = sequencer.start(WS_KIND_PROJECT, ws_id).await else {
            info!(ws_id, "transaction refused, retrying later");
            continue;
        };

        let record_id = sequencer.next(SEQ_RECORD_ID).await?;
        let wlog_offset = sequencer.next(SEQ_WLOG_OFFSET).await?;
        info!(ws_id, offset, record_id, wlog_offset, "numbers allocated");

        sequencer.flush();
    }

    info!(unflushed = sequencer.num_unflushed(), "waiting for the flusher");
    tokio::time::sleep(Duration::from_millis(300)).await;

    for value in storage.numbers() {
        info!(key = %value.key, value = value.value, "durable number");
    }
    info!(offset = storage.last_plog_offset(), "durable PLog offset");

    sequencer.shutdown().await;
    info!("Example completed");
    Ok(())
}
