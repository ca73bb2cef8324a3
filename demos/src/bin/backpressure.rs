//! Example demonstrating backpressure
//!
//! This example shows how to:
//! 1. Load `Params` from JSON
//! 2. Hit the unflushed-values threshold with many workspaces
//! 3. Retry refused transactions until the flusher has drained the backlog

use sequencer_rs::prelude::*;
use std::time::Duration;
use tracing::info;

const PARAMS: &str = r#"{
    "seq_types": { "1": { "1": 0 } },
    "max_num_unflushed_values": 10,
    "flush_interval_ms": 100,
    "retry": { "max_attempts": 3, "delay_ms": 50 }
}"#;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    info!("Starting backpressure example");

    let params = Params::from_json(PARAMS)?;
    info!(params = %serde_json::to_string(&params)?, "loaded params");

    let mut sequencer = Sequencer::new(params, MemStorage::new())?;
    sequencer.wait_ready().await?;

    let mut refused = 0u32;
    for ws_id in 1..=50u64 {
        loop {
            if sequencer.start(1, ws_id).await.is_some() {
                sequencer.next(1).await?;
                sequencer.flush();
                break;
            }
            refused += 1;
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    info!(
        refused,
        unflushed = sequencer.num_unflushed(),
        durable = sequencer.storage().numbers().len(),
        "all workspaces served"
    );

    sequencer.shutdown().await;
    info!("Example completed");
    Ok(())
}
