//! Sequence-number engine: per-workspace counters with asynchronous
//! durable flushing and PLog-replay recovery.
//!
//! # Components
//!
//! - [`Sequencer`]: the façade exposing `start` / `next` / `flush` /
//!   `actualize`
//! - [`NumberCache`]: bounded LRU of recently allocated numbers
//! - [`SeqStorage`]: storage adapter contract
//! - [`MemStorage`]: in-memory adapter with fault injection
//! - [`Params`]: sequence definitions and tuning knobs
//! - [`RetryPolicy`]: bounded fixed-delay retry of storage calls
//!
//! Two background tasks run next to the caller: the flusher, which
//! persists committed values on a timer, and the actualizer, which replays
//! the PLog at startup and whenever state must be rebuilt. They never run
//! at the same time.
//!
//! # Lookup order
//!
//! `next` resolves the current value of a counter from the first tier that
//! knows it:
//!
//! ```text
//! LRU cache -> in-process values -> pending-flush values -> storage -> initial value
//! ```

mod actualizer;
pub mod cache;
mod engine;
pub mod error;
mod flusher;
pub mod mem_storage;
mod metrics;
pub mod params;
pub mod retry;
pub mod storage;
pub mod types;


pub use actualizer::aggregate_max;
pub use cache::NumberCache;
pub use engine::Sequencer;
pub use error::{SequencerError, StorageError};
pub use mem_storage::{MemStorage, StorageOp};
pub use params::{
    DEFAULT_FLUSH_INTERVAL_MS, DEFAULT_LRU_CACHE_SIZE, DEFAULT_MAX_NUM_UNFLUSHED_VALUES, Params,
};
pub use retry::{
    DEFAULT_MAX_ATTEMPTS, DEFAULT_RETRY_DELAY_MS, OnExhausted, RetryError, RetryPolicy,
};
pub use storage::{PLogBatcher, SeqStorage};
pub use types::{Number, NumberKey, PLogOffset, SeqId, SeqValue, Status, WsId, WsKind};
