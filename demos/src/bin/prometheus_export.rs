//! Example exporting sequencer metrics in the Prometheus text format
//!
//! Run with:
//!   cargo run --bin prometheus_export --features metrics
//!   (from the demos directory)

use metrics_exporter_prometheus::PrometheusBuilder;
use sequencer_rs::prelude::*;
use std::time::Duration;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let handle = PrometheusBuilder::new().install_recorder()?;

    let params = Params::new()
        .with_seq_type(1, 1, 0)
        .with_flush_interval_ms(50);
    let mut sequencer = Sequencer::new(params, MemStorage::new())?;
    sequencer.wait_ready().await?;

    for ws_id in 1..=20u64 {
        if sequencer.start(1, ws_id).await.is_some() {
            sequencer.next(1).await?;
            sequencer.flush();
        }
    }
    tokio::time::sleep(Duration::from_millis(100)).await;

    info!("Prometheus snapshot:\n{}", handle.render());

    sequencer.shutdown().await;
    Ok(())
}
