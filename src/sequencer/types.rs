//! Core value types shared by the sequencer, its background tasks and the
//! storage adapter contract.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A class of workspace. Each kind owns a fixed set of sequences and their
/// initial values, supplied through [`Params`](super::Params).
pub type WsKind = u16;

/// Identifier of a workspace instance.
pub type WsId = u64;

/// Identifier of a logical counter within a workspace kind.
pub type SeqId = u16;

/// A counter value handed out by the sequencer.
pub type Number = u64;

/// A position in the write-ahead log (PLog).
pub type PLogOffset = u64;

/// Composite identity of a counter: one sequence within one workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NumberKey {
    /// The workspace the number belongs to.
    pub ws_id: WsId,
    /// The sequence within that workspace.
    pub seq_id: SeqId,
}

impl NumberKey {
    /// Creates a new key.
    #[must_use]
    #[inline]
    pub const fn new(ws_id: WsId, seq_id: SeqId) -> Self {
        Self { ws_id, seq_id }
    }
}

impl fmt::Display for NumberKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ws{}/seq{}", self.ws_id, self.seq_id)
    }
}

/// A `(NumberKey, Number)` pair produced by transactions and consumed by the
/// flusher and the actualizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SeqValue {
    /// The counter this value belongs to.
    pub key: NumberKey,
    /// The counter value.
    pub value: Number,
}

impl SeqValue {
    /// Creates a new value for `ws_id`/`seq_id`.
    #[must_use]
    #[inline]
    pub const fn new(ws_id: WsId, seq_id: SeqId, value: Number) -> Self {
        Self {
            key: NumberKey::new(ws_id, seq_id),
            value,
        }
    }
}

/// Lifecycle state of the sequencer's recovery machinery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    /// The PLog is being replayed. `start` is rejected and the flusher is stopped.
    Actualizing,
    /// Transactions may start.
    Ready,
    /// Actualization gave up. The instance must be discarded and recreated.
    Failed {
        /// Description of the last storage failure.
        message: String,
    },
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Actualizing => write!(f, "actualizing"),
            Status::Ready => write!(f, "ready"),
            Status::Failed { message } => write!(f, "failed: {message}"),
        }
    }
}
