//! Construction-time configuration of a [`Sequencer`](super::Sequencer).
//!
//! [`Params`] is immutable once the sequencer is built. It can be assembled
//! with the `with_*` builder methods or loaded from JSON:
//!
//! ```rust
//! use sequencer_rs::sequencer::Params;
//!
//! let params = Params::from_json(
//!     r#"{
//!         "seq_types": { "1": { "1": 1, "2": 1000 } },
//!         "max_num_unflushed_values": 200,
//!         "flush_interval_ms": 250
//!     }"#,
//! )
//! .expect("valid params");
//! assert_eq!(params.initial_value(1, 2), Some(1000));
//! assert_eq!(params.lru_cache_size, 1000);
//! ```

use super::error::SequencerError;
use super::retry::RetryPolicy;
use super::types::{Number, SeqId, WsKind};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Default capacity of the number LRU cache.
pub const DEFAULT_LRU_CACHE_SIZE: usize = 1000;

/// Default backpressure threshold: `start` is refused once this many values
/// are waiting for the flusher.
pub const DEFAULT_MAX_NUM_UNFLUSHED_VALUES: usize = 500;

/// Default period of the flusher timer in milliseconds.
pub const DEFAULT_FLUSH_INTERVAL_MS: u64 = 500;

/// Sequence definitions and tuning knobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Params {
    /// Initial value per sequence, per workspace kind. The first number
    /// handed out for a fresh counter is `initial + 1`.
    pub seq_types: HashMap<WsKind, HashMap<SeqId, Number>>,

    /// Capacity of the LRU cache of recently allocated numbers.
    pub lru_cache_size: usize,

    /// Backpressure threshold for the pending-flush table.
    pub max_num_unflushed_values: usize,

    /// Period of the flusher timer in milliseconds.
    pub flush_interval_ms: u64,

    /// Retry budget applied to every storage call.
    pub retry: RetryPolicy,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            seq_types: HashMap::new(),
            lru_cache_size: DEFAULT_LRU_CACHE_SIZE,
            max_num_unflushed_values: DEFAULT_MAX_NUM_UNFLUSHED_VALUES,
            flush_interval_ms: DEFAULT_FLUSH_INTERVAL_MS,
            retry: RetryPolicy::default(),
        }
    }
}

impl Params {
    /// Creates params with no sequences and default tuning.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses params from JSON. Omitted fields keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`SequencerError::InvalidParams`] if the JSON is malformed or
    /// the resulting params fail [`validate`](Params::validate).
    pub fn from_json(json: &str) -> Result<Self, SequencerError> {
        let params: Params =
            serde_json::from_str(json).map_err(|e| SequencerError::InvalidParams {
                message: e.to_string(),
            })?;
        params.validate()?;
        Ok(params)
    }

    /// Declares a sequence for a workspace kind.
    #[must_use = "builders do nothing unless consumed"]
    pub fn with_seq_type(mut self, ws_kind: WsKind, seq_id: SeqId, initial: Number) -> Self {
        self.seq_types
            .entry(ws_kind)
            .or_default()
            .insert(seq_id, initial);
        self
    }

    /// Replaces all sequence definitions.
    #[must_use = "builders do nothing unless consumed"]
    pub fn with_seq_types(mut self, seq_types: HashMap<WsKind, HashMap<SeqId, Number>>) -> Self {
        self.seq_types = seq_types;
        self
    }

    /// Sets the LRU cache capacity.
    #[must_use = "builders do nothing unless consumed"]
    pub fn with_lru_cache_size(mut self, size: usize) -> Self {
        self.lru_cache_size = size;
        self
    }

    /// Sets the backpressure threshold.
    #[must_use = "builders do nothing unless consumed"]
    pub fn with_max_num_unflushed_values(mut self, max: usize) -> Self {
        self.max_num_unflushed_values = max;
        self
    }

    /// Sets the flusher period in milliseconds.
    #[must_use = "builders do nothing unless consumed"]
    pub fn with_flush_interval_ms(mut self, interval_ms: u64) -> Self {
        self.flush_interval_ms = interval_ms;
        self
    }

    /// Sets the retry budget for storage calls.
    #[must_use = "builders do nothing unless consumed"]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// The flusher period.
    #[must_use]
    #[inline]
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    /// Returns `true` if `ws_kind` is configured.
    #[must_use]
    #[inline]
    pub fn has_ws_kind(&self, ws_kind: WsKind) -> bool {
        self.seq_types.contains_key(&ws_kind)
    }

    /// Initial value of `seq_id` within `ws_kind`, if configured.
    #[must_use]
    #[inline]
    pub fn initial_value(&self, ws_kind: WsKind, seq_id: SeqId) -> Option<Number> {
        self.seq_types
            .get(&ws_kind)
            .and_then(|seqs| seqs.get(&seq_id))
            .copied()
    }

    /// Checks the tuning knobs.
    ///
    /// # Errors
    ///
    /// Returns [`SequencerError::InvalidParams`] for a zero cache size, zero
    /// backpressure threshold, zero flush interval or a retry policy with no
    /// attempts.
    pub fn validate(&self) -> Result<(), SequencerError> {
        let problem = if self.lru_cache_size == 0 {
            Some("lru_cache_size must be greater than zero")
        } else if self.max_num_unflushed_values == 0 {
            Some("max_num_unflushed_values must be greater than zero")
        } else if self.flush_interval_ms == 0 {
            Some("flush_interval_ms must be greater than zero")
        } else if self.retry.max_attempts == 0 {
            Some("retry.max_attempts must be greater than zero")
        } else {
            None
        };

        match problem {
            Some(message) => Err(SequencerError::InvalidParams {
                message: message.to_string(),
            }),
            None => Ok(()),
        }
    }
}
