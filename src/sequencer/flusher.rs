//! Background task persisting flushed values.
//!
//! The flusher wakes on its interval timer, or early when `start` hits the
//! backpressure threshold. Each round it snapshots the pending-flush table,
//! writes the values, then the offset, and finally drops from the table
//! only the entries the snapshot covered. A flush that happened meanwhile
//! stays pending for the next round.
//!
//! When a write exhausts its retry budget the flusher hands over to the
//! actualizer and exits; the actualizer restarts it once state has been
//! rebuilt from the PLog.

use super::engine::Shared;
use super::retry::{OnExhausted, RetryError};
use super::storage::SeqStorage;
use super::types::{PLogOffset, SeqValue};
use std::sync::Arc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// What one flush round persisted.
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct FlushRound {
    pub(crate) values: usize,
    pub(crate) offset: Option<PLogOffset>,
}

pub(crate) async fn run<S: SeqStorage>(shared: Arc<Shared<S>>, cancel: CancellationToken) {
    let period = shared.params.flush_interval();
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => trace!("flush timer fired"),
            _ = shared.flush_requested.notified() => debug!("flush requested"),
        }

        match flush_once(&shared, &cancel).await {
            Ok(round) if round.offset.is_some() || round.values > 0 => {
                debug!(values = round.values, offset = ?round.offset, "flushed");
                super::metrics::flush_completed(round.values);
            }
            Ok(_) => {}
            Err(RetryError::Cancelled) => break,
            Err(err) => {
                shared.escalate(err);
                break;
            }
        }
    }
    debug!("flusher stopped");
}

/// Persists a snapshot of the pending-flush table: values first, then the
/// offset, then drops whatever the snapshot covered.
pub(crate) async fn flush_once<S: SeqStorage>(
    shared: &Shared<S>,
    cancel: &CancellationToken,
) -> Result<FlushRound, RetryError> {
    let (batch, offset) = {
        let pending = shared.lock_pending();
        let batch: Vec<SeqValue> = pending
            .values
            .iter()
            .map(|(&key, &value)| SeqValue { key, value })
            .collect();
        (batch, pending.offset)
    };
    if batch.is_empty() && offset.is_none() {
        return Ok(FlushRound::default());
    }

    let retry = shared.params.retry;
    let storage = &shared.storage;

    if !batch.is_empty() {
        let batch = batch.as_slice();
        retry
            .run("write_values", OnExhausted::Actualize, cancel, move || {
                storage.write_values(batch)
            })
            .await?;
    }

    if let Some(offset) = offset {
        retry
            .run("write_plog_offset", OnExhausted::Actualize, cancel, move || {
                storage.write_plog_offset(offset)
            })
            .await?;
    }

    let unflushed = {
        let mut pending = shared.lock_pending();
        for written in &batch {
            if pending.values.get(&written.key) == Some(&written.value) {
                pending.values.remove(&written.key);
            }
        }
        if pending.offset == offset {
            pending.offset = None;
        }
        pending.values.len()
    };
    super::metrics::unflushed_values(unflushed);

    Ok(FlushRound {
        values: batch.len(),
        offset,
    })
}
