//! Background task rebuilding authoritative counter state from the PLog.
//!
//! Runs once when a [`Sequencer`](super::Sequencer) is created and again
//! every time recovery is requested. The flusher is stopped for the whole
//! run so the two never touch storage at the same time.
//!
//! A run replays the PLog from the durable offset, aggregates the highest
//! value seen per key, folds in values still waiting in the pending-flush
//! table and the numbers already in storage, persists the result (values
//! before offset) and reseeds the LRU cache. A persisted number never goes
//! down. Any storage failure that survives the retry budget leaves the
//! engine in [`Status::Failed`].

use super::engine::Shared;
use super::error::StorageError;
use super::retry::{OnExhausted, RetryError};
use super::storage::SeqStorage;
use super::types::{Number, NumberKey, PLogOffset, SeqId, SeqValue, Status, WsId};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use tracing::{debug, info, warn};

/// Folds `values` into `into`, keeping the highest number per key.
///
/// The result does not depend on the order of `values` nor on how they are
/// split across calls.
///
/// # Examples
///
/// ```
/// use std::collections::HashMap;
/// use sequencer_rs::sequencer::{aggregate_max, NumberKey, SeqValue};
///
/// let mut aggregate = HashMap::new();
/// aggregate_max(&mut aggregate, &[SeqValue::new(1, 1, 102), SeqValue::new(1, 1, 101)]);
/// assert_eq!(aggregate.get(&NumberKey::new(1, 1)), Some(&102));
/// ```
pub fn aggregate_max(into: &mut HashMap<NumberKey, Number>, values: &[SeqValue]) {
    for v in values {
        into.entry(v.key)
            .and_modify(|current| *current = (*current).max(v.value))
            .or_insert(v.value);
    }
}

/// Accumulated result of one PLog replay.
#[derive(Debug, Default)]
struct Replay {
    values: HashMap<NumberKey, Number>,
    last_offset: Option<PLogOffset>,
    records: u64,
}

impl Replay {
    fn record(&mut self, values: &[SeqValue], offset: PLogOffset) {
        aggregate_max(&mut self.values, values);
        self.last_offset = Some(self.last_offset.map_or(offset, |last| last.max(offset)));
        self.records += 1;
    }
}

/// Summary of a finished actualization.
#[derive(Debug)]
struct Outcome {
    replayed: u64,
    values: usize,
    offset: PLogOffset,
}

pub(crate) async fn run<S: SeqStorage>(shared: Arc<Shared<S>>) {
    match actualize(&shared).await {
        Ok(outcome) => {
            if shared.cancel.is_cancelled() {
                debug!("actualization finished during shutdown");
                return;
            }
            shared.start_flusher();
            shared.status.send_replace(Status::Ready);
            info!(
                replayed = outcome.replayed,
                values = outcome.values,
                offset = outcome.offset,
                "actualization completed"
            );
            super::metrics::actualization_completed(outcome.replayed);
        }
        Err(RetryError::Cancelled) => debug!("actualization cancelled"),
        Err(err) => shared.escalate(err),
    }
}

async fn actualize<S: SeqStorage>(shared: &Arc<Shared<S>>) -> Result<Outcome, RetryError> {
    if let Some(flusher) = shared.take_flusher() {
        flusher.cancel.cancel();
        if let Err(err) = flusher.join.await {
            warn!(error = %err, "flusher task ended abnormally");
        }
    }

    let retry = shared.params.retry;
    let cancel = &shared.cancel;
    let storage = &shared.storage;

    let durable = retry
        .run("read_last_plog_offset", OnExhausted::Abort, cancel, move || {
            storage.read_last_plog_offset()
        })
        .await?;
    info!(from = durable, "actualization started");

    let mut replay = retry
        .run("replay_plog", OnExhausted::Abort, cancel, move || async move {
            let mut replay = Replay::default();
            let mut batcher =
                |values: &[SeqValue], offset: PLogOffset| replay.record(values, offset);
            storage.replay_plog(durable, &mut batcher).await?;
            Ok::<_, StorageError>(replay)
        })
        .await?;

    let pending_offset = {
        let pending = shared.lock_pending();
        for (&key, &value) in &pending.values {
            replay
                .values
                .entry(key)
                .and_modify(|current| *current = (*current).max(value))
                .or_insert(value);
        }
        pending.offset
    };

    // Values handed off by an aborted transaction reach storage without a
    // PLog record, so the replay alone may be behind what is stored.
    let mut by_ws: BTreeMap<WsId, Vec<SeqId>> = BTreeMap::new();
    for key in replay.values.keys() {
        by_ws.entry(key.ws_id).or_default().push(key.seq_id);
    }
    for (&ws_id, seq_ids) in &by_ws {
        let seq_ids = seq_ids.as_slice();
        let stored = retry
            .run("read_numbers", OnExhausted::Abort, cancel, move || {
                storage.read_numbers(ws_id, seq_ids)
            })
            .await?;
        for (&seq_id, &value) in seq_ids.iter().zip(&stored) {
            if value == 0 {
                continue;
            }
            if let Some(current) = replay.values.get_mut(&NumberKey::new(ws_id, seq_id)) {
                *current = (*current).max(value);
            }
        }
    }

    let offset = [Some(durable), replay.last_offset, pending_offset]
        .into_iter()
        .flatten()
        .max()
        .unwrap_or(durable);

    let mut batch: Vec<SeqValue> = replay
        .values
        .iter()
        .map(|(&key, &value)| SeqValue { key, value })
        .collect();
    batch.sort_by_key(|v| v.key);

    if !batch.is_empty() {
        let batch = batch.as_slice();
        retry
            .run("write_values", OnExhausted::Abort, cancel, move || {
                storage.write_values(batch)
            })
            .await?;
    }
    if offset != durable {
        retry
            .run("write_plog_offset", OnExhausted::Abort, cancel, move || {
                storage.write_plog_offset(offset)
            })
            .await?;
    }

    {
        let mut pending = shared.lock_pending();
        for v in &batch {
            let covered = pending
                .values
                .get(&v.key)
                .is_some_and(|&value| value <= v.value);
            if covered {
                pending.values.remove(&v.key);
            }
        }
        if pending.offset.is_some_and(|pending_offset| pending_offset <= offset) {
            pending.offset = None;
        }

        shared.cache.purge();
        for v in &batch {
            let value = pending
                .values
                .get(&v.key)
                .map_or(v.value, |&newer| newer.max(v.value));
            shared.cache.put(v.key, value);
        }
    }

    shared
        .next_offset
        .fetch_max(offset.saturating_add(1), Ordering::SeqCst);

    Ok(Outcome {
        replayed: replay.records,
        values: batch.len(),
        offset,
    })
}
