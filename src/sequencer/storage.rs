//! Storage adapter contract consumed by the sequencer.
//!
//! The [`SeqStorage`] trait is the narrow boundary between the engine and
//! whatever durably stores counter values and the write-ahead log (PLog).
//! How bytes reach the disk or the network is the adapter's business.
//!
//! Durability ordering is enforced by the engine, not the adapter: the
//! flusher and the actualizer always call
//! [`write_values`](SeqStorage::write_values) for a batch and only after it
//! returned `Ok` call [`write_plog_offset`](SeqStorage::write_plog_offset).
//! A crash between the two calls leaves an older offset on disk, so the next
//! actualization replays the same PLog range again. Replay aggregates with
//! `max`, which makes the repetition harmless.
//!
//! See [`MemStorage`](super::MemStorage) for the in-memory implementation
//! used by tests and demos.

use super::error::StorageError;
use super::types::{Number, PLogOffset, SeqId, SeqValue, WsId};
use std::future::Future;
use std::sync::Arc;

/// Callback fed by [`SeqStorage::replay_plog`], once per PLog record, with
/// every value the record implies and the record's offset.
pub type PLogBatcher<'a> = dyn FnMut(&[SeqValue], PLogOffset) + Send + 'a;

/// Durable key/number store plus a replayable write-ahead log.
///
/// # Thread Safety
///
/// The adapter is shared between the foreground caller, the flusher and the
/// actualizer, hence `Send + Sync`. The engine never issues two writes
/// concurrently.
pub trait SeqStorage: Send + Sync + 'static {
    /// Returns the last durably stored number for each of `seq_ids` in
    /// `ws_id`, in the same order. Counters never written read as `0`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the backend cannot be read.
    fn read_numbers(
        &self,
        ws_id: WsId,
        seq_ids: &[SeqId],
    ) -> impl Future<Output = Result<Vec<Number>, StorageError>> + Send;

    /// Durably upserts a batch of numbers.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the batch was not persisted.
    fn write_values(
        &self,
        batch: &[SeqValue],
    ) -> impl Future<Output = Result<(), StorageError>> + Send;

    /// Returns the last PLog offset whose values are durably reflected in
    /// storage, or `0` if none was ever written.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the cursor cannot be read.
    fn read_last_plog_offset(
        &self,
    ) -> impl Future<Output = Result<PLogOffset, StorageError>> + Send;

    /// Durably records `offset` as the last PLog offset reflected in storage.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the cursor was not persisted.
    fn write_plog_offset(
        &self,
        offset: PLogOffset,
    ) -> impl Future<Output = Result<(), StorageError>> + Send;

    /// Streams the PLog from `from` (inclusive) to its end, calling `batcher`
    /// once per record in offset order.
    ///
    /// The values of one record may contain duplicates and arrive in any
    /// order. Dropping the returned future stops the replay.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if a record cannot be read or decoded.
    fn replay_plog(
        &self,
        from: PLogOffset,
        batcher: &mut PLogBatcher<'_>,
    ) -> impl Future<Output = Result<(), StorageError>> + Send;
}

impl<T: SeqStorage> SeqStorage for Arc<T> {
    fn read_numbers(
        &self,
        ws_id: WsId,
        seq_ids: &[SeqId],
    ) -> impl Future<Output = Result<Vec<Number>, StorageError>> + Send {
        (**self).read_numbers(ws_id, seq_ids)
    }

    fn write_values(
        &self,
        batch: &[SeqValue],
    ) -> impl Future<Output = Result<(), StorageError>> + Send {
        (**self).write_values(batch)
    }

    fn read_last_plog_offset(
        &self,
    ) -> impl Future<Output = Result<PLogOffset, StorageError>> + Send {
        (**self).read_last_plog_offset()
    }

    fn write_plog_offset(
        &self,
        offset: PLogOffset,
    ) -> impl Future<Output = Result<(), StorageError>> + Send {
        (**self).write_plog_offset(offset)
    }

    fn replay_plog(
        &self,
        from: PLogOffset,
        batcher: &mut PLogBatcher<'_>,
    ) -> impl Future<Output = Result<(), StorageError>> + Send {
        (**self).replay_plog(from, batcher)
    }
}
