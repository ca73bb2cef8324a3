//! # Sequence-Number Engine with Write-Ahead-Log Recovery
//!
//! A single-writer engine handing out strictly increasing numbers per workspace and
//! per sequence: record IDs, log offsets, any counter that must never go backwards
//! and never be issued twice, even across crashes.
//!
//! ## Key Features
//!
//! - **Tiered Lookup**: the current value of a counter is resolved from a bounded LRU
//!   cache, then the numbers of the open transaction, then the values waiting to be
//!   flushed, then storage, and finally the configured initial value.
//!
//! - **Asynchronous Flushing**: committing a transaction never waits for storage. A
//!   background flusher persists committed values on a timer, values first and the
//!   write-ahead-log (PLog) offset second.
//!
//! - **Crash-Consistent Recovery**: on startup and on demand the actualizer replays the
//!   PLog from the durable offset, keeps the highest value seen per counter and makes
//!   the result durable before any new transaction may start.
//!
//! - **Backpressure**: when too many values are waiting for the flusher, new
//!   transactions are refused and the flusher is woken at once.
//!
//! - **Bounded Retries**: every storage call is retried a fixed number of times with a
//!   fixed delay. Exhaustion escalates to recovery instead of letting memory and
//!   storage drift apart.
//!
//! - **Pluggable Storage**: anything implementing [`SeqStorage`] can back the engine.
//!   [`MemStorage`] ships with the crate for tests and demos.
//!
//! ## Design Goals
//!
//! 1. **Correctness**: a number is never reissued for the same counter, whatever the
//!    interleaving of commits, aborts, crashes and recoveries.
//! 2. **Low latency**: the allocation path touches memory only, unless the counter is
//!    cold.
//! 3. **Single writer, checked by the compiler**: every transactional method takes
//!    `&mut self`.
//!
//! ## Usage
//!
//! ```rust
//! use sequencer_rs::prelude::*;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), SequencerError> {
//! let storage = MemStorage::new();
//! storage.set_number(NumberKey::new(1, 1), 100);
//! storage.set_last_plog_offset(99);
//!
//! let params = Params::new().with_seq_type(1, 1, 1);
//! let mut sequencer = Sequencer::new(params, storage)?;
//! sequencer.wait_ready().await?;
//!
//! let offset = sequencer.start(1, 1).await;
//! assert_eq!(offset, Some(100));
//! assert_eq!(sequencer.next(1).await?, 101);
//! assert_eq!(sequencer.next(1).await?, 102);
//! sequencer.flush();
//!
//! sequencer.shutdown().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Transaction Lifecycle
//!
//! ```text
//! Idle --start--> Active --next*--> Active --flush-----> Idle
//!                                          \--actualize--> Idle (state rebuilt from the PLog)
//! ```
//!
//! `start` returns `None` instead of an offset while recovery is running or while the
//! backpressure threshold is reached; the caller retries later. Starting a second
//! transaction, or calling `next`/`flush`/`actualize` without one, is a programming
//! error and panics.
//!
//! ## Durability Ordering
//!
//! The flusher and the actualizer always write values before the PLog offset. A crash
//! between the two writes leaves an older offset on disk; the next recovery replays
//! the same records again, which is harmless because replay keeps the maximum value
//! per counter.
//!
//! ## Feature Flags
//!
//! - `metrics`: publish counters and gauges through the `metrics` facade.

pub mod sequencer;

pub mod prelude;

pub use sequencer::{
    MemStorage, Number, NumberCache, NumberKey, OnExhausted, PLogOffset, Params, RetryError,
    RetryPolicy, SeqId, SeqStorage, SeqValue, Sequencer, SequencerError, Status, StorageError,
    StorageOp, WsId, WsKind, aggregate_max,
};
