//! Error types for the sequencer.
//!
//! [`SequencerError`] is what callers of the transactional API see.
//! [`StorageError`] is produced by [`SeqStorage`](super::SeqStorage)
//! adapters and never reaches a caller unwrapped: it is either absorbed by a
//! retry or escalated to the actualizer. A transactional caller only learns
//! that its transaction was aborted, through
//! [`SequencerError::TransactionAborted`].
//!
//! Contract violations (starting a transaction twice, calling `next` outside
//! a transaction, ...) are not represented here. They panic.

use super::types::{NumberKey, PLogOffset, SeqId, WsKind};
use thiserror::Error;

/// Errors returned by the sequencer's public API.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SequencerError {
    /// The sequence is not configured for the active workspace kind.
    #[error("unknown sequence {seq_id} for workspace kind {ws_kind}")]
    UnknownSeqId {
        /// Workspace kind of the active transaction.
        ws_kind: WsKind,
        /// The sequence that was requested.
        seq_id: SeqId,
    },

    /// A storage read kept failing, the transaction was aborted and
    /// actualization started. Wait for readiness and start over.
    #[error("transaction aborted: {operation} failed after {attempts} attempts, actualizing")]
    TransactionAborted {
        /// The storage operation that failed.
        operation: &'static str,
        /// Number of attempts made.
        attempts: u32,
    },

    /// The next number for the key does not fit in a `Number`.
    #[error("sequence overflow for {key}")]
    Overflow {
        /// The exhausted counter.
        key: NumberKey,
    },

    /// Configuration rejected at construction time.
    #[error("invalid sequencer params: {message}")]
    InvalidParams {
        /// What is wrong with the configuration.
        message: String,
    },

    /// The actualizer gave up. The instance must be recreated.
    #[error("actualization failed: {message}")]
    ActualizationFailed {
        /// Description of the last storage failure.
        message: String,
    },

    /// The sequencer was shut down while the operation was waiting.
    #[error("sequencer shut down")]
    Cancelled,
}

/// Errors reported by a storage adapter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum StorageError {
    /// The backend is temporarily unreachable or overloaded.
    #[error("storage unavailable: {message}")]
    Unavailable {
        /// Backend-provided description.
        message: String,
    },

    /// An I/O failure while talking to the backend.
    #[error("storage I/O error: {message}")]
    Io {
        /// Backend-provided description.
        message: String,
    },

    /// A PLog record could not be decoded. Retrying will not help.
    #[error("corrupt PLog record at offset {offset}: {message}")]
    Corrupt {
        /// Offset of the unreadable record.
        offset: PLogOffset,
        /// Decoder-provided description.
        message: String,
    },
}

impl StorageError {
    /// Shorthand for [`StorageError::Unavailable`].
    pub fn unavailable(message: impl Into<String>) -> Self {
        StorageError::Unavailable {
            message: message.into(),
        }
    }

    /// Returns `true` if the operation may succeed when retried.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            StorageError::Unavailable { .. } | StorageError::Io { .. } => true,
            StorageError::Corrupt { .. } => false,
        }
    }
}

impl From<std::io::Error> for StorageError {
    #[cold]
    fn from(err: std::io::Error) -> Self {
        StorageError::Io {
            message: err.to_string(),
        }
    }
}
