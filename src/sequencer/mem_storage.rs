//! In-memory [`SeqStorage`] implementation.
//!
//! Numbers live in a [`DashMap`], the PLog in an ordered [`SkipMap`] keyed by
//! offset. Besides serving as the default adapter for tests and demos, the
//! store can inject transient failures per operation, count calls and slow
//! down replay, which is what the recovery paths of the engine are tested
//! against.

use super::error::StorageError;
use super::storage::{PLogBatcher, SeqStorage};
use super::types::{Number, NumberKey, PLogOffset, SeqId, SeqValue, WsId};
use crossbeam_skiplist::SkipMap;
use dashmap::DashMap;
use std::fmt;
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;
use tracing::trace;

/// The storage operations of [`SeqStorage`], used to address fault
/// injection and call counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageOp {
    /// [`SeqStorage::read_numbers`]
    ReadNumbers,
    /// [`SeqStorage::write_values`]
    WriteValues,
    /// [`SeqStorage::read_last_plog_offset`]
    ReadLastPLogOffset,
    /// [`SeqStorage::write_plog_offset`]
    WritePLogOffset,
    /// [`SeqStorage::replay_plog`]
    ReplayPLog,
}

const OP_COUNT: usize = 5;

impl StorageOp {
    /// Every operation, in declaration order.
    pub const ALL: [StorageOp; OP_COUNT] = [
        StorageOp::ReadNumbers,
        StorageOp::WriteValues,
        StorageOp::ReadLastPLogOffset,
        StorageOp::WritePLogOffset,
        StorageOp::ReplayPLog,
    ];

    /// The method name, as used in logs and errors.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageOp::ReadNumbers => "read_numbers",
            StorageOp::WriteValues => "write_values",
            StorageOp::ReadLastPLogOffset => "read_last_plog_offset",
            StorageOp::WritePLogOffset => "write_plog_offset",
            StorageOp::ReplayPLog => "replay_plog",
        }
    }

    #[inline]
    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for StorageOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Thread-safe in-memory storage with a replayable PLog.
///
/// # Examples
///
/// ```
/// use sequencer_rs::sequencer::{MemStorage, NumberKey, SeqValue};
///
/// let storage = MemStorage::new();
/// storage.set_number(NumberKey::new(1, 1), 100);
/// storage.set_last_plog_offset(99);
/// storage.append_plog(100, vec![SeqValue::new(1, 1, 101)]);
///
/// assert_eq!(storage.number(NumberKey::new(1, 1)), 100);
/// assert_eq!(storage.plog_len(), 1);
/// ```
#[derive(Default)]
pub struct MemStorage {
    numbers: DashMap<NumberKey, Number>,
    last_plog_offset: AtomicU64,
    plog: SkipMap<PLogOffset, Vec<SeqValue>>,

    fail_next: [AtomicU32; OP_COUNT],
    fail_always: [AtomicBool; OP_COUNT],
    calls: [AtomicU64; OP_COUNT],
    replay_delay_ms: AtomicU64,
}

impl MemStorage {
    /// Creates an empty store: no numbers, offset `0`, empty PLog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the durable number for `key`.
    pub fn set_number(&self, key: NumberKey, value: Number) {
        self.numbers.insert(key, value);
    }

    /// Returns the durable number for `key`, `0` if never written.
    #[must_use]
    pub fn number(&self, key: NumberKey) -> Number {
        self.numbers.get(&key).map(|v| *v).unwrap_or_default()
    }

    /// Returns every stored number, ordered by key.
    #[must_use]
    pub fn numbers(&self) -> Vec<SeqValue> {
        let mut values: Vec<SeqValue> = self
            .numbers
            .iter()
            .map(|entry| SeqValue {
                key: *entry.key(),
                value: *entry.value(),
            })
            .collect();
        values.sort_by_key(|v| v.key);
        values
    }

    /// Sets the durable PLog cursor.
    pub fn set_last_plog_offset(&self, offset: PLogOffset) {
        self.last_plog_offset.store(offset, Ordering::SeqCst);
    }

    /// Returns the durable PLog cursor.
    #[must_use]
    pub fn last_plog_offset(&self) -> PLogOffset {
        self.last_plog_offset.load(Ordering::SeqCst)
    }

    /// Appends (or replaces) the PLog record at `offset`.
    pub fn append_plog(&self, offset: PLogOffset, values: Vec<SeqValue>) {
        self.plog.insert(offset, values);
    }

    /// Number of records in the PLog.
    #[must_use]
    pub fn plog_len(&self) -> usize {
        self.plog.len()
    }

    /// Makes the next `count` calls of `op` fail with a transient error.
    pub fn fail_next(&self, op: StorageOp, count: u32) {
        self.fail_next[op.index()].store(count, Ordering::SeqCst);
    }

    /// Makes every call of `op` fail with a transient error until
    /// [`heal`](Self::heal) is called.
    pub fn fail_always(&self, op: StorageOp) {
        self.fail_always[op.index()].store(true, Ordering::SeqCst);
    }

    /// Removes every injected fault for `op`.
    pub fn heal(&self, op: StorageOp) {
        self.fail_next[op.index()].store(0, Ordering::SeqCst);
        self.fail_always[op.index()].store(false, Ordering::SeqCst);
    }

    /// Removes every injected fault.
    pub fn heal_all(&self) {
        for op in StorageOp::ALL {
            self.heal(op);
        }
    }

    /// Number of times `op` was invoked, failed calls included.
    #[must_use]
    pub fn calls(&self, op: StorageOp) -> u64 {
        self.calls[op.index()].load(Ordering::SeqCst)
    }

    /// Sleeps for `delay` before delivering each PLog record during replay.
    pub fn set_replay_delay(&self, delay: Duration) {
        let ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self.replay_delay_ms.store(ms, Ordering::SeqCst);
    }

    fn enter(&self, op: StorageOp) -> Result<(), StorageError> {
        let idx = op.index();
        self.calls[idx].fetch_add(1, Ordering::SeqCst);

        if self.fail_always[idx].load(Ordering::SeqCst) {
            return Err(StorageError::unavailable(format!("{op} failure injected")));
        }

        let injected = self.fail_next[idx]
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if injected {
            return Err(StorageError::unavailable(format!("{op} failure injected")));
        }
        Ok(())
    }

    fn next_record(&self, from: PLogOffset) -> Option<(PLogOffset, Vec<SeqValue>)> {
        self.plog
            .lower_bound(Bound::Included(&from))
            .map(|entry| (*entry.key(), entry.value().clone()))
    }
}

impl fmt::Debug for MemStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemStorage")
            .field("numbers", &self.numbers.len())
            .field("last_plog_offset", &self.last_plog_offset())
            .field("plog", &self.plog.len())
            .finish()
    }
}

impl SeqStorage for MemStorage {
    async fn read_numbers(
        &self,
        ws_id: WsId,
        seq_ids: &[SeqId],
    ) -> Result<Vec<Number>, StorageError> {
        self.enter(StorageOp::ReadNumbers)?;
        Ok(seq_ids
            .iter()
            .map(|&seq_id| self.number(NumberKey::new(ws_id, seq_id)))
            .collect())
    }

    async fn write_values(&self, batch: &[SeqValue]) -> Result<(), StorageError> {
        self.enter(StorageOp::WriteValues)?;
        for v in batch {
            self.numbers.insert(v.key, v.value);
        }
        trace!(values = batch.len(), "values written");
        Ok(())
    }

    async fn read_last_plog_offset(&self) -> Result<PLogOffset, StorageError> {
        self.enter(StorageOp::ReadLastPLogOffset)?;
        Ok(self.last_plog_offset())
    }

    async fn write_plog_offset(&self, offset: PLogOffset) -> Result<(), StorageError> {
        self.enter(StorageOp::WritePLogOffset)?;
        self.set_last_plog_offset(offset);
        trace!(offset, "plog offset written");
        Ok(())
    }

    async fn replay_plog(
        &self,
        from: PLogOffset,
        batcher: &mut PLogBatcher<'_>,
    ) -> Result<(), StorageError> {
        self.enter(StorageOp::ReplayPLog)?;

        let mut cursor = from;
        while let Some((offset, values)) = self.next_record(cursor) {
            let delay = self.replay_delay_ms.load(Ordering::SeqCst);
            if delay > 0 {
                tokio::time::sleep(Duration::from_millis(delay)).await;
            } else {
                tokio::task::yield_now().await;
            }

            batcher(&values, offset);

            match offset.checked_add(1) {
                Some(next) => cursor = next,
                None => break,
            }
        }
        Ok(())
    }
}
